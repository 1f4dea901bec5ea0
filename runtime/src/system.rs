// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! The composition root: wires every crate in the workspace together over
//! [`SimRtos`] and owns the static memory regions a board integration would
//! otherwise carve out of linker sections (§4.2).
//!
//! Grounded in `process/src/table.rs`'s own test harness, which already
//! established the "`Box::leak` a value to get the `&'static` references
//! the process table requires" idiom for a hosted (non-embedded) build; this
//! module is that same idiom run once, for real, at a single call site
//! instead of once per unit test.

use crate::driver::LoopbackDriver;
use abi::constants::MAX_USER_APPS;
use abi::{err, ProcessId, ProcessKind, ProcessRef, VmKind};
use rt_bus::{Bus, QueueConfig};
use rt_gfx::Serializer;
use rt_link::{LinkTransport, TransportConfig};
use rt_pool::{PoolHandle, PoolId, RegionTable, SysAlloc};
use rt_process::{BuiltinApp, BuiltinSource, FileProxy, LoadSource, ProcessTable, SpawnAttr, Spawner, VmHost, WindowConfig};
use rt_renderer::RendererProxy;
use rt_rtos::sim::SimRtos;
use std::alloc::Layout;
use std::ptr::NonNull;
use std::sync::Arc;

/// §6's per-region sizes: system/kernel/system-app/user-app each ~500 KiB,
/// compiler scratch 64-288 KiB.
const REGION_BYTES: usize = 500 * 1024;
const COMPILER_SCRATCH_BYTES: usize = 64 * 1024;

/// Default display mode the composition root announces to the far end at
/// boot, before any graphics frame (§6: control sub_cmd `0x01`).
pub const DEFAULT_DISPLAY_WIDTH: u16 = 320;
pub const DEFAULT_DISPLAY_HEIGHT: u16 = 240;
pub const DEFAULT_COLOR_DEPTH: u8 = 8;

/// The scripting VMs are out of scope (§1); this is the stand-in `VmHost`
/// every board integration must replace with real mruby/Lua bindings. Any
/// attempt to spawn a `Bytecode`-loaded process against it fails cleanly
/// with `Failed` rather than silently pretending to run something.
pub struct UnsupportedVm;

impl VmHost<SimRtos> for UnsupportedVm {
    type Handle = ();

    fn open(&self, _pool: PoolHandle) -> abi::Result<()> {
        Err(err::failed())
    }

    fn load(&self, _handle: (), _bytecode: &[u8]) -> abi::Result<()> {
        Err(err::failed())
    }

    fn run(&self, _handle: ()) -> abi::Result<()> {
        Ok(())
    }

    fn close(&self, _handle: ()) {}
}

/// A `FileProxy` with nothing behind it. This workspace has no real
/// filesystem/SD-card driver (§1, out of scope); `spawn_path` and companion
/// `.cfg` lookups against this proxy always miss, which the spawner already
/// treats as "fall back to defaults", never as a hard error.
pub struct NoFiles;

impl FileProxy for NoFiles {
    fn read(&self, _path: &str, _out: &mut [u8]) -> abi::Result<usize> {
        Err(err::not_found())
    }
}

fn leak<T>(value: T) -> &'static T {
    Box::leak(Box::new(value))
}

/// Allocates `len` host bytes, 8-byte aligned, and leaks them for the
/// lifetime of the process -- standing in for a board's static linker
/// section (§4.2: "a static byte region ... caller-owned static storage").
fn static_region(len: usize) -> NonNull<u8> {
    let layout = Layout::from_size_align(len, 8).unwrap();
    let ptr = unsafe { std::alloc::alloc(layout) };
    NonNull::new(ptr).expect("host allocator out of memory")
}

/// Everything the runtime core needs, wired together and handed back as
/// `'static` references so every leaf crate's `&'static self` methods (the
/// process table's `spawn`/`kill`/... ) are directly callable.
pub struct System {
    pub rtos: SimRtos,
    pub bus: &'static Bus<SimRtos>,
    pub sys_alloc: &'static SysAlloc<SimRtos>,
    pub regions: &'static RegionTable,
    pub transport: &'static LinkTransport<SimRtos, Arc<LoopbackDriver>>,
    pub renderer: &'static RendererProxy<'static, SimRtos, Arc<LoopbackDriver>>,
    pub table: &'static ProcessTable<SimRtos, UnsupportedVm>,
    pub driver: Arc<LoopbackDriver>,
}

impl System {
    /// Boots the whole workspace: registers the static memory regions,
    /// brings up the bus, the link transport over a [`LoopbackDriver`], the
    /// renderer proxy, and the process table, then sends the mandatory
    /// "init display" control frame (§6).
    ///
    /// The renderer proxy does not go through `ProcessTable::spawn` like an
    /// ordinary app: like the kernel slot (pid 0), it is a fixed, eternal
    /// part of the core rather than something `kill()` ever tears down, so
    /// its queue is registered directly and its drain loop is driven by
    /// [`System::pump_renderer_once`] rather than a table-managed task.
    pub fn boot() -> System {
        let mut regions = RegionTable::new();
        for (id, len) in [
            (PoolId::System, REGION_BYTES),
            (PoolId::Kernel, REGION_BYTES),
            (PoolId::SystemApp, REGION_BYTES),
            (PoolId::CompilerScratch, COMPILER_SCRATCH_BYTES),
        ] {
            let base = static_region(len);
            regions.register(id, base.as_ptr() as usize, len).unwrap();
        }
        for i in 0..MAX_USER_APPS as u8 {
            let base = static_region(REGION_BYTES);
            regions.register(PoolId::UserApp(i), base.as_ptr() as usize, REGION_BYTES).unwrap();
        }
        let regions: &'static RegionTable = leak(regions);

        let sys_alloc: &'static SysAlloc<SimRtos> = leak(SysAlloc::new(SimRtos::new()));
        let system_region = regions.get(PoolId::System).unwrap();
        unsafe {
            sys_alloc
                .init_system(NonNull::new(system_region.base as *mut u8).unwrap(), system_region.len)
                .unwrap();
        }

        let bus: &'static Bus<SimRtos> = leak(Bus::init(SimRtos::new()));
        bus.create_queue(ProcessId::KERNEL, QueueConfig { capacity: 10 }).unwrap();
        bus.create_queue(ProcessId::RENDERER_PROXY, QueueConfig { capacity: 16 }).unwrap();

        let driver = LoopbackDriver::new();
        let transport: &'static LinkTransport<SimRtos, Arc<LoopbackDriver>> =
            leak(LinkTransport::init(SimRtos::new(), driver.clone(), TransportConfig::default()));

        let renderer: &'static RendererProxy<'static, SimRtos, Arc<LoopbackDriver>> =
            leak(RendererProxy::new(SimRtos::new(), bus, transport, ProcessId::RENDERER_PROXY));
        renderer.init_display(DEFAULT_DISPLAY_WIDTH, DEFAULT_DISPLAY_HEIGHT, DEFAULT_COLOR_DEPTH).unwrap();

        let vm_host: &'static UnsupportedVm = leak(UnsupportedVm);
        let table: &'static ProcessTable<SimRtos, UnsupportedVm> =
            leak(ProcessTable::new(SimRtos::new(), bus, sys_alloc.registry(), regions, vm_host));

        System { rtos: SimRtos::new(), bus, sys_alloc, regions, transport, renderer, table, driver }
    }

    /// One iteration of the renderer proxy's loop (§4.10 steps 1-4): drain at
    /// most one bus message, dispatch it, pump the link, then emit the
    /// periodic "update" tick if it is due. A caller (the demo binary, an
    /// integration test) runs this in its own loop or background thread.
    pub fn pump_renderer_once(&self) {
        self.renderer.process_one();
        self.renderer.maybe_emit_tick();
    }

    /// Spawns a built-in native app at a fixed slot (used for the
    /// well-known `system-app` slot, pid 2). `window` positions its canvas
    /// on screen; the renderer proxy is told separately via
    /// [`rt_renderer::RendererProxy::register_window`] so a bare `Present`
    /// from this pid composites at the right place.
    pub fn spawn_builtin_at(
        &self,
        slot_id: u8,
        name: &'static str,
        entry: rt_process::NativeEntry<SimRtos>,
        kind: ProcessKind,
        window: WindowConfig,
    ) -> abi::Result<ProcessRef> {
        let id = self.table.spawn(SpawnAttr {
            slot_id: Some(slot_id),
            kind,
            vm_kind: VmKind::Native,
            name,
            load: LoadSource::Native(entry),
            window,
            ..SpawnAttr::default()
        })?;
        if !window.headless {
            self.renderer.register_window(ProcessId(slot_id), window.x, window.y);
        }
        Ok(id)
    }

    /// A `Spawner` over this system's process table, with no built-in apps
    /// and no file proxy -- callers that need either build their own
    /// `Spawner` from `builtins`/`NoFiles` directly; this is a convenience
    /// for the common "spawn nothing but native demos by slot id" case.
    pub fn spawner<'a>(&self, builtins: &'a [BuiltinApp<SimRtos>]) -> Spawner<'a, SimRtos, NoFiles> {
        Spawner::new(leak(NoFiles), builtins)
    }

    /// A graphics serializer for `pid`, assuming a bus queue already exists
    /// for it (true for any process the table has spawned).
    pub fn gfx_for(&self, pid: ProcessId) -> Serializer<'static, SimRtos> {
        Serializer::new(self.bus, pid)
    }

    pub fn builtin_shell() -> BuiltinApp<SimRtos> {
        BuiltinApp {
            name: "default/shell",
            vm_kind: VmKind::Native,
            source: BuiltinSource::Native(rt_demos::shell_entry),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use abi::{Message, MessageClass};

    #[test]
    fn boot_wires_every_component_and_sends_init_display() {
        let sys = System::boot();
        let sent = sys.driver.sent_frames();
        assert_eq!(sent.len(), 1, "init display must be the first frame on the wire (§6)");
    }

    #[test]
    fn system_app_spawns_and_echoes_over_the_bus() {
        let sys = System::boot();
        sys.spawn_builtin_at(2, "system/echo", rt_demos::echo_entry, ProcessKind::SystemApp, WindowConfig::HEADLESS).unwrap();

        let hello = Message::new(MessageClass::AppControl, ProcessId::KERNEL, b"hello").unwrap();
        sys.bus.send(ProcessId(2), hello, 100).unwrap();
        let reply = sys.bus.receive(ProcessId::KERNEL, 200).unwrap();
        assert_eq!(reply.payload(), b"hello");
        assert_eq!(reply.src_pid, ProcessId(2));
    }

    #[test]
    fn user_app_spawned_through_the_spawner_gets_the_next_free_slot() {
        let sys = System::boot();
        let builtins = [System::builtin_shell()];
        let spawner = sys.spawner(&builtins);
        let id = spawner.spawn_app(sys.table, "default/shell").unwrap();
        assert!(id.index() >= 3, "user apps live at slot 3 and up");
        assert_eq!(sys.table.get_by_id(id).unwrap().state, abi::ProcessState::Running);
    }

    #[test]
    fn kill_and_respawn_bumps_generation_and_frees_the_pool() {
        let sys = System::boot();
        let id = sys.spawn_builtin_at(3, "demo", rt_demos::echo_entry, ProcessKind::UserApp, WindowConfig::HEADLESS).unwrap();
        sys.table.kill(id).unwrap();
        assert!(sys.table.get_by_id(id).is_none());

        let id2 = sys.spawn_builtin_at(3, "demo", rt_demos::echo_entry, ProcessKind::UserApp, WindowConfig::HEADLESS).unwrap();
        assert_eq!(id2.slot, id.slot);
        assert_ne!(id2.generation, id.generation);
    }

    #[test]
    fn create_canvas_round_trips_through_the_renderer_and_the_loopback_link() {
        let sys = System::boot();
        sys.spawn_builtin_at(2, "system/gfx_demo", rt_demos::echo_entry, ProcessKind::SystemApp, WindowConfig::HEADLESS).unwrap();

        let gfx = sys.gfx_for(ProcessId(2));
        let far_end = crate::farend::FarEnd::spawn(sys.driver.clone());
        let pump = {
            let renderer = sys.renderer;
            std::thread::spawn(move || {
                for _ in 0..200 {
                    renderer.process_one();
                    std::thread::sleep(std::time::Duration::from_millis(2));
                }
            })
        };
        let canvas_id = gfx.create_canvas(64, 64).unwrap();
        assert!(canvas_id > 0);
        pump.join().unwrap();
        drop(far_end);
    }
}
