// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Native stand-ins for the opaque VM-hosted apps this core spawns.
//!
//! The actual mruby/Lua VMs are out of scope (§1); `echo_entry`/`shell_entry`
//! give the process table and `runtime`'s integration tests a couple of
//! `Native` processes to spawn that behave like small well-known apps
//! (`system/echo`, `default/shell` in spec.md's built-in-app examples)
//! without needing either VM built.
#![cfg_attr(not(test), no_std)]

use abi::{Message, MessageClass, ProcessId};
use rt_process::{NativeContext, STOP_SENTINEL};
use rt_rtos::Rtos;

const POLL_TIMEOUT_MS: u32 = 1000;
const REPLY_TIMEOUT_MS: u32 = 100;

fn is_stop(msg: &Message) -> bool {
    msg.class == MessageClass::AppControl && msg.payload() == [STOP_SENTINEL]
}

/// Echoes every `AppControl` message it receives back to its sender,
/// verbatim, until asked to stop. Grounded in S1 ("Spawn & echo") of the
/// testable-properties scenarios.
pub fn echo_entry<R: Rtos>(ctx: &NativeContext<'_, R>) {
    loop {
        let msg = match ctx.bus.receive(ctx.own_pid, POLL_TIMEOUT_MS) {
            Ok(msg) => msg,
            Err(_) => continue,
        };
        if is_stop(&msg) {
            break;
        }
        if let Some(reply) = Message::new(msg.class, ctx.own_pid, msg.payload()) {
            let _ = ctx.bus.send(msg.src_pid, reply, REPLY_TIMEOUT_MS);
        }
    }
}

/// A toy `default/shell`: replies `"ok"` to anything that isn't a stop
/// request. Stands in for the built-in shell app named in §4.9's example
/// well-known-app table; it has no command language of its own, only enough
/// behavior to exercise spawn/kill and message round trips against a
/// *different* well-known app than `echo_entry`.
pub fn shell_entry<R: Rtos>(ctx: &NativeContext<'_, R>) {
    loop {
        let msg = match ctx.bus.receive(ctx.own_pid, POLL_TIMEOUT_MS) {
            Ok(msg) => msg,
            Err(_) => continue,
        };
        if is_stop(&msg) {
            break;
        }
        if let Some(reply) = Message::new(MessageClass::AppControl, ctx.own_pid, b"ok") {
            let _ = ctx.bus.send(msg.src_pid, reply, REPLY_TIMEOUT_MS);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use abi::constants::DEFAULT_QUEUE_CAPACITY;
    use rt_bus::{Bus, QueueConfig};
    use rt_rtos::sim::SimRtos;

    #[test]
    fn echo_replies_with_the_same_payload() {
        let bus = Bus::init(SimRtos::new());
        let echo_pid = ProcessId(3);
        let caller_pid = ProcessId::KERNEL;
        bus.create_queue(echo_pid, QueueConfig { capacity: DEFAULT_QUEUE_CAPACITY }).unwrap();
        bus.create_queue(caller_pid, QueueConfig { capacity: DEFAULT_QUEUE_CAPACITY }).unwrap();

        let ctx = NativeContext { bus: &bus, own_pid: echo_pid };
        let msg = Message::new(MessageClass::AppControl, caller_pid, b"hello").unwrap();
        bus.send(echo_pid, msg, 0).unwrap();
        let stop = Message::new(MessageClass::AppControl, caller_pid, &[STOP_SENTINEL]).unwrap();
        bus.send(echo_pid, stop, 0).unwrap();

        echo_entry(&ctx);

        let reply = bus.receive(caller_pid, 0).unwrap();
        assert_eq!(reply.payload(), b"hello");
        assert_eq!(reply.src_pid, echo_pid);
    }

    #[test]
    fn shell_replies_ok_to_any_non_stop_message() {
        let bus = Bus::init(SimRtos::new());
        let shell_pid = ProcessId(2);
        let caller_pid = ProcessId::KERNEL;
        bus.create_queue(shell_pid, QueueConfig { capacity: DEFAULT_QUEUE_CAPACITY }).unwrap();
        bus.create_queue(caller_pid, QueueConfig { capacity: DEFAULT_QUEUE_CAPACITY }).unwrap();

        let ctx = NativeContext { bus: &bus, own_pid: shell_pid };
        let msg = Message::new(MessageClass::AppControl, caller_pid, b"run paint").unwrap();
        bus.send(shell_pid, msg, 0).unwrap();
        let stop = Message::new(MessageClass::AppControl, caller_pid, &[STOP_SENTINEL]).unwrap();
        bus.send(shell_pid, stop, 0).unwrap();

        shell_entry(&ctx);

        let reply = bus.receive(caller_pid, 0).unwrap();
        assert_eq!(reply.payload(), b"ok");
    }
}
