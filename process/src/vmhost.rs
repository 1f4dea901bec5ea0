// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! The VM capability set (§9 design notes): scripting VMs are polymorphic
//! over `{open(pool) -> handle, run(handle) -> (), close(handle)}` rather
//! than the process table knowing anything about mruby or Lua specifically.
//!
//! `Native` processes (§4.8 spawn step 6) bypass this trait entirely: their
//! spawn attribute carries a plain function pointer instead, per the design
//! notes' instruction to replace the source's pointer-tagging trick with an
//! explicit `load_mode + load_data` pair.

use abi::ProcessId;
use rt_bus::Bus;
use rt_pool::PoolHandle;
use rt_rtos::Rtos;

/// One VM kind's binding, generic over the RTOS it runs under. A board
/// integration supplies one real implementation (mruby, say); test code
/// supplies a stand-in that only understands a toy bytecode format, per
/// SPEC_FULL's "VM capability set" note.
pub trait VmHost<R: Rtos> {
    /// Opaque per-process VM state. Must be `Copy` so it fits in a process
    /// slot without a heap allocation of its own -- the VM's actual storage
    /// lives inside the pool the slot was opened over.
    type Handle: Copy;

    /// Opens a fresh VM instance backed by `pool` (so the VM's own heap
    /// traffic goes through that process's pool, never another's).
    fn open(&self, pool: PoolHandle) -> abi::Result<Self::Handle>;

    /// Loads bytecode into an opened VM, before it is run.
    fn load(&self, handle: Self::Handle, bytecode: &[u8]) -> abi::Result<()>;

    /// Runs the VM to completion (or until it cooperatively yields back
    /// control at a `Stop` spin point -- see [`super::table::STOP_SENTINEL`]).
    fn run(&self, handle: Self::Handle) -> abi::Result<()>;

    /// Tears down a VM instance. Called from the reaper, not the dying
    /// slot's own task (§4.8 cleanup).
    fn close(&self, handle: Self::Handle);
}

/// What a `Native` process's worker is handed instead of a `VmHost`: direct
/// access to its own bus identity, nothing else. A native entry that needs
/// graphics builds its own `rt_gfx::Serializer` over `bus`.
pub struct NativeContext<'a, R: Rtos> {
    pub bus: &'a Bus<R>,
    pub own_pid: ProcessId,
}

/// A native process's entry point: a plain function pointer, per the design
/// notes' "Native: store the function pointer" (never tagged into `source`).
pub type NativeEntry<R> = fn(&NativeContext<'_, R>);
