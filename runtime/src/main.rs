// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Demo boot glue (§1: "Any CLI, boot glue ... are non-core"): boots a
//! [`runtime::System`], spawns the well-known `system/echo` and
//! `default/shell` apps, then pumps the renderer loop against a
//! [`runtime::FarEnd`] standing in for a real graphics host.
//!
//! A board integration replaces this file; nothing else in the workspace
//! depends on it.

use abi::{Message, MessageClass, ProcessId, ProcessKind};
use ringbuf::*;
use rt_process::WindowConfig;
use runtime::System;
use std::time::Duration;

ringbuf!(Boot, 16, Boot::None);

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Boot {
    None,
    Started,
    SpawnedSystemApp,
    SpawnedShell,
    EchoReplied,
}

fn main() {
    ringbuf_entry!(Boot::Started);
    let sys = System::boot();

    sys.spawn_builtin_at(
        ProcessId::SYSTEM_APP.0,
        "system/echo",
        rt_demos::echo_entry,
        ProcessKind::SystemApp,
        WindowConfig::HEADLESS,
    )
    .expect("system/echo must spawn at boot");
    ringbuf_entry!(Boot::SpawnedSystemApp);

    let builtins = [System::builtin_shell()];
    let spawner = sys.spawner(&builtins);
    spawner.spawn_app(sys.table, "default/shell").expect("default/shell must spawn at boot");
    ringbuf_entry!(Boot::SpawnedShell);

    let hello = Message::new(MessageClass::AppControl, ProcessId::KERNEL, b"hello").unwrap();
    sys.bus.send(ProcessId::SYSTEM_APP, hello, 100).unwrap();
    let reply = sys.bus.receive(ProcessId::KERNEL, 200).unwrap();
    ringbuf_entry!(Boot::EchoReplied);
    println!("system/echo replied: {:?}", reply.payload());

    let far_end = runtime::FarEnd::spawn(sys.driver.clone());
    for _ in 0..20 {
        sys.pump_renderer_once();
        std::thread::sleep(Duration::from_millis(10));
    }
    drop(far_end);
}
