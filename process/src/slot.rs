// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! The process slot (§3 "Process Slot") and the snapshot [`ProcessInfo`]
//! `ps()` hands back.

use crate::attr::WindowConfig;
use crate::vmhost::{NativeEntry, VmHost};
use abi::constants::MAX_NAME_LEN;
use abi::{Generation, LoadMode, ProcessId, ProcessKind, ProcessState, SlotIndex, VmKind};
use heapless::String as HString;
use rt_pool::PoolHandle;
use rt_rtos::Rtos;

/// What a worker task runs once it reaches `Running`. Carried separately
/// from the rest of the slot's fields so it stays `Copy` and fits in the
/// per-slot [`crate::table::Handoff`] the trampoline reads without locking.
#[derive(Clone, Copy)]
pub(crate) enum WorkerEntry<R: Rtos, V: VmHost<R>> {
    Native(NativeEntry<R>),
    Vm(V::Handle),
}

/// One entry of the fixed process table. Everything here is mutated only
/// while the table's registry mutex is held, except `handoff`, which is a
/// `Cell` the worker task reads exactly once at startup without locking
/// (§9: "index + generation pairs, resolved through the process table under
/// a short critical section" -- the handoff itself is not part of that
/// resolution, only the bootstrap hop onto the new task).
pub(crate) struct Slot<R: Rtos, V: VmHost<R>> {
    pub state: ProcessState,
    pub pid: ProcessId,
    pub generation: Generation,
    pub kind: ProcessKind,
    pub vm_kind: VmKind,
    pub name: HString<MAX_NAME_LEN>,
    pub load_mode: LoadMode,
    pub pool_id: rt_pool::PoolId,
    pub alloc_handle: Option<PoolHandle>,
    pub task_handle: Option<R::Task>,
    pub sem: Option<R::Sem>,
    /// Given by the worker task itself once it reaches `Zombie` (§4.8), so a
    /// graceful `stop()` can wait for cooperative exit the way `kill()`'s
    /// immediate `task_delete` lets it skip waiting entirely.
    pub exit_sem: Option<R::Sem>,
    pub window: WindowConfig,
    pub vm_handle: Option<V::Handle>,
    pub handoff: core::cell::Cell<crate::table::Handoff<R, V>>,
}

impl<R: Rtos, V: VmHost<R>> Slot<R, V> {
    pub fn free(pid: ProcessId, pool_id: rt_pool::PoolId) -> Self {
        Slot {
            state: ProcessState::Free,
            pid,
            generation: Generation(0),
            kind: ProcessKind::UserApp,
            vm_kind: VmKind::Native,
            name: HString::new(),
            load_mode: LoadMode::Bytecode,
            pool_id,
            alloc_handle: None,
            task_handle: None,
            sem: None,
            exit_sem: None,
            window: WindowConfig::HEADLESS,
            vm_handle: None,
            handoff: core::cell::Cell::new(crate::table::Handoff::default()),
        }
    }

    /// Invariant 2 (§3): `state == Free` iff nothing else is allocated.
    pub fn is_clean(&self) -> bool {
        self.task_handle.is_none() && self.vm_handle.is_none() && self.alloc_handle.is_none()
    }
}

/// A point-in-time snapshot of one slot, for `ps()` / `get_by_id()`. Memory
/// fields come from the pool allocator's own `stats()` call (§4.8).
#[derive(Clone, Debug)]
pub struct ProcessInfo {
    pub slot: SlotIndex,
    pub pid: ProcessId,
    pub generation: Generation,
    pub state: ProcessState,
    pub kind: ProcessKind,
    pub vm_kind: VmKind,
    pub name: HString<MAX_NAME_LEN>,
    pub stack_high_water: usize,
    pub mem_total: usize,
    pub mem_used: usize,
    pub mem_free: usize,
    pub mem_frag: usize,
}
