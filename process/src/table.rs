// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! The process table (§4.8): the slot array, the lifecycle state machine,
//! and `spawn`/`kill`/`stop`/`suspend`/`resume`/`ps`/`get_by_id`/`current`.
//!
//! Identity is always `(slot_index, generation)` (§9: "index + generation
//! pairs, resolved through the process table under a short critical
//! section"); nothing here ever hands out a raw pointer into a slot.
//!
//! Cleanup runs in a reaper context, never in the dying slot's own task
//! (§4.8). This implementation's reaper is [`ProcessTable::reap`], a plain
//! method any caller may invoke -- `kill` calls it itself, synchronously,
//! from the killer's own task, which already satisfies "not the dying
//! slot's task" while keeping the lifecycle deterministic enough to test.

use crate::attr::{LoadSource, SpawnAttr};
use crate::slot::{ProcessInfo, Slot, WorkerEntry};
use crate::vmhost::{NativeContext, VmHost};
use abi::constants::{MAX_PROCESSES, MAX_USER_APPS};
use abi::{err, Generation, ProcessId, ProcessRef, ProcessState, SlotIndex};
use heapless::String as HString;
use heapless::Vec as HVec;
use ringbuf::*;
use rt_bus::{Bus, QueueConfig};
use rt_pool::{PoolHandle, PoolId, PoolRegistry, RegionTable};
use rt_rtos::{with_mutex, Rtos, TaskSpec, Ticks};

/// Payload byte of the cooperative shutdown message `stop()` posts to the
/// target's own queue (§4.8: "signals the slot via its queue with a `Stop`
/// control message; the VM worker cooperates at its next spin point"). A
/// native entry's poll loop checks for this; there is no wire-level meaning.
pub const STOP_SENTINEL: u8 = 0xFE;

const USER_APP_BASE: usize = 3;

/// How long `stop()` waits for a cooperative worker to reach `Zombie` before
/// giving up on reaping it itself. A worker that never notices its `Stop`
/// message is left in `Stopping`, still occupying its slot, for a later
/// `kill()` to force out.
const STOP_REAP_TIMEOUT_MS: u32 = 2000;

ringbuf!(Trace, 32, Trace::None);

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Trace {
    None,
    Transition { slot: u8, from: ProcessState, to: ProcessState },
    SpawnFailed { slot: u8 },
    Reaped { slot: u8, generation: u16 },
}

/// What a worker task's trampoline needs to bootstrap itself: which table it
/// belongs to, which slot it is, and what to run. Stored inline in the
/// slot's own `Cell` (see [`Slot`]) so no heap allocation is needed to hand
/// it across the `task_create` boundary.
#[derive(Clone, Copy)]
pub(crate) struct Handoff<R: Rtos, V: VmHost<R>> {
    pub table: Option<&'static ProcessTable<R, V>>,
    pub slot: SlotIndex,
    pub entry: WorkerEntry<R, V>,
}

impl<R: Rtos, V: VmHost<R>> Default for Handoff<R, V> {
    fn default() -> Self {
        Handoff {
            table: None,
            slot: SlotIndex(0),
            entry: WorkerEntry::Native(noop_native),
        }
    }
}

fn noop_native<R: Rtos>(_ctx: &NativeContext<'_, R>) {}

/// Monomorphized per `(R, V)`, coerced to [`rt_rtos::TaskEntry`] at the
/// `task_create` call site (§9: the C source's function-pointer-plus-opaque-
/// argument idiom, done here with a generic free function instead of a
/// closure, since a closure's environment would need an allocator to box).
fn worker_trampoline<R: Rtos, V: VmHost<R>>(arg: usize) {
    let handoff_ptr = arg as *const core::cell::Cell<Handoff<R, V>>;
    let handoff = unsafe { (*handoff_ptr).get() };
    if let Some(table) = handoff.table {
        table.run_worker(handoff.slot, handoff.entry);
    }
}

/// The slot array, generic over the RTOS and the VM capability set backing
/// scripted processes.
pub struct ProcessTable<R: Rtos, V: VmHost<R>> {
    rtos: R,
    registry_sem: R::Sem,
    slots: core::cell::RefCell<[Slot<R, V>; MAX_PROCESSES]>,
    bus: &'static Bus<R>,
    pools: &'static PoolRegistry<R>,
    regions: &'static RegionTable,
    vm_host: &'static V,
}

impl<R: Rtos, V: VmHost<R>> ProcessTable<R, V> {
    pub fn new(
        rtos: R,
        bus: &'static Bus<R>,
        pools: &'static PoolRegistry<R>,
        regions: &'static RegionTable,
        vm_host: &'static V,
    ) -> Self {
        let registry_sem = rtos.sem_mutex();
        let slots = core::array::from_fn(|i| Slot::free(ProcessId(i as u8), Self::pool_id_for_slot(i)));
        ProcessTable {
            rtos,
            registry_sem,
            slots: core::cell::RefCell::new(slots),
            bus,
            pools,
            regions,
            vm_host,
        }
    }

    fn pool_id_for_slot(idx: usize) -> PoolId {
        match idx {
            0 => PoolId::Kernel,
            1 | 2 => PoolId::SystemApp,
            n if n >= USER_APP_BASE && n < USER_APP_BASE + MAX_USER_APPS => {
                PoolId::UserApp((n - USER_APP_BASE) as u8)
            }
            _ => PoolId::SystemApp,
        }
    }

    fn with_registry<T>(&self, body: impl FnOnce(&mut [Slot<R, V>; MAX_PROCESSES]) -> T) -> T {
        with_mutex(&self.rtos, self.registry_sem, || body(&mut self.slots.borrow_mut()))
    }

    fn transition(slot: &mut Slot<R, V>, next: ProcessState) -> abi::Result<()> {
        if !slot.state.can_transition_to(next) {
            return Err(err::invalid_state());
        }
        let from = slot.state;
        slot.state = next;
        ringbuf_entry!(Trace::Transition { slot: 0, from, to: next });
        Ok(())
    }

    /// Resolves `id` to a live slot, checking both bounds and generation
    /// (§9: a stale `ProcessRef` must never alias whatever reused the slot).
    fn slot_mut<'s>(
        slots: &'s mut [Slot<R, V>; MAX_PROCESSES],
        id: ProcessRef,
    ) -> abi::Result<&'s mut Slot<R, V>> {
        let idx = id.index();
        if idx >= MAX_PROCESSES {
            return Err(err::detailed(abi::ErrorKind::NotFound, abi::ErrorDetail::SlotOutOfRange));
        }
        let slot = &mut slots[idx];
        if slot.state == ProcessState::Free || slot.generation != id.generation {
            return Err(err::detailed(abi::ErrorKind::NotFound, abi::ErrorDetail::StaleGeneration));
        }
        Ok(slot)
    }

    /// Spawn algorithm, §4.8 steps 1-10. Any failure after step 3 unwinds
    /// the slot back to `Free` (generation bumped) and returns the error
    /// that caused it.
    pub fn spawn(&'static self, attr: SpawnAttr<'_, R>) -> abi::Result<ProcessRef> {
        attr.validate()?;

        let idx = self.with_registry(|slots| -> abi::Result<usize> {
            let idx = match attr.slot_id {
                Some(id) => {
                    let idx = id as usize;
                    if idx >= MAX_PROCESSES || slots[idx].state != ProcessState::Free {
                        return Err(err::invalid_state());
                    }
                    idx
                }
                None => slots
                    .iter()
                    .enumerate()
                    .skip(USER_APP_BASE)
                    .take(MAX_USER_APPS)
                    .find(|(_, s)| s.state == ProcessState::Free)
                    .map(|(i, _)| i)
                    .ok_or_else(err::busy)?,
            };
            let slot = &mut slots[idx];
            Self::transition(slot, ProcessState::Allocated)?;
            slot.kind = attr.kind;
            slot.vm_kind = attr.vm_kind;
            slot.name = HString::try_from(attr.name).map_err(|_| err::invalid_param())?;
            slot.load_mode = attr.load_mode;
            slot.window = attr.window;
            Ok(idx)
        })?;

        match self.spawn_rest(idx, &attr) {
            Ok(id) => Ok(id),
            Err(e) => {
                self.rollback_spawn(idx);
                ringbuf_entry!(Trace::SpawnFailed { slot: idx as u8 });
                Err(e)
            }
        }
    }

    fn spawn_rest(&'static self, idx: usize, attr: &SpawnAttr<'_, R>) -> abi::Result<ProcessRef> {
        // Step 4: pool.
        let pool_id = self.with_registry(|slots| slots[idx].pool_id);
        let region = self.regions.get(pool_id).ok_or_else(err::not_found)?;
        let region_ptr = core::ptr::NonNull::new(region.base as *mut u8).ok_or_else(err::invalid_param)?;
        let alloc_handle = unsafe { self.pools.create_handle(region_ptr, region.len) }?;
        self.with_registry(|slots| slots[idx].alloc_handle = Some(alloc_handle));

        // Step 5: semaphore, plus the exit semaphore a graceful `stop()`
        // waits on.
        let sem = self.rtos.sem_binary();
        self.with_registry(|slots| slots[idx].sem = Some(sem));
        let exit_sem = self.rtos.sem_binary();
        self.with_registry(|slots| slots[idx].exit_sem = Some(exit_sem));

        // Step 6: VM instantiation, or a bare native function pointer.
        let worker_entry = match &attr.load {
            LoadSource::Native(f) => WorkerEntry::Native(*f),
            LoadSource::Bytecode(bytecode) => {
                let handle = self.vm_host.open(alloc_handle)?;
                if let Err(e) = self.vm_host.load(handle, bytecode) {
                    self.vm_host.close(handle);
                    return Err(e);
                }
                self.with_registry(|slots| slots[idx].vm_handle = Some(handle));
                WorkerEntry::Vm(handle)
            }
        };

        // Step 7: bus queue.
        self.bus
            .create_queue(ProcessId(idx as u8), QueueConfig { capacity: attr.queue_capacity })?;

        // Step 8: Allocated -> Init.
        self.with_registry(|slots| Self::transition(&mut slots[idx], ProcessState::Init))?;

        // Step 9: task_create. The worker's own first action is to wait on
        // `sem`, so it cannot observe `task_handle`/`Running` before this
        // function commits them below.
        let handoff = Handoff {
            table: Some(self),
            slot: SlotIndex(idx as u8),
            entry: worker_entry,
        };
        let handoff_ptr = self.with_registry(|slots| {
            slots[idx].handoff.set(handoff);
            &slots[idx].handoff as *const _ as usize
        });
        let task = self.rtos.task_create(TaskSpec {
            name: attr.name,
            entry: worker_trampoline::<R, V>,
            arg: handoff_ptr,
            stack_words: attr.stack_words,
            priority: attr.priority,
        })?;

        self.with_registry(|slots| {
            slots[idx].task_handle = Some(task);
            let _ = Self::transition(&mut slots[idx], ProcessState::Running);
        });
        self.rtos.sem_give(sem);

        let generation = self.with_registry(|slots| slots[idx].generation);
        Ok(ProcessRef::new(SlotIndex(idx as u8), generation))
    }

    /// Walks the slot backwards through whatever partial construction it
    /// reached, per §4.8's "if any step after (3) fails" rollback.
    fn rollback_spawn(&'static self, idx: usize) {
        let (pool, vm, sem, exit_sem, had_queue) = self.with_registry(|slots| {
            let s = &slots[idx];
            (s.alloc_handle, s.vm_handle, s.sem, s.exit_sem, s.state != ProcessState::Allocated)
        });
        if had_queue {
            let _ = self.bus.delete_queue(ProcessId(idx as u8));
        }
        if let Some(h) = vm {
            self.vm_host.close(h);
        }
        if let Some(p) = pool {
            let _ = self.pools.destroy_handle(p);
        }
        if let Some(s) = sem {
            self.rtos.sem_delete(s);
        }
        if let Some(s) = exit_sem {
            self.rtos.sem_delete(s);
        }
        self.with_registry(|slots| {
            let slot = &mut slots[idx];
            slot.alloc_handle = None;
            slot.vm_handle = None;
            slot.sem = None;
            slot.exit_sem = None;
            slot.task_handle = None;
            slot.name = HString::new();
            let _ = Self::transition(slot, ProcessState::Free);
            slot.generation = slot.generation.next();
        });
    }

    fn run_worker(&'static self, slot: SlotIndex, entry: WorkerEntry<R, V>) {
        let task = self.rtos.task_current();
        self.rtos.task_set_tls(task, 1, slot.index());
        let sem = self.with_registry(|slots| slots[slot.index()].sem);
        if let Some(sem) = sem {
            self.rtos.sem_take(sem, Ticks::FOREVER);
        }
        match entry {
            WorkerEntry::Native(f) => {
                let ctx = NativeContext {
                    bus: self.bus,
                    own_pid: ProcessId(slot.0),
                };
                f(&ctx);
            }
            WorkerEntry::Vm(handle) => {
                let _ = self.vm_host.run(handle);
            }
        }
        self.on_worker_exit(slot);
    }

    /// A worker returning (cooperative `Stop`, or the VM/native entry simply
    /// finishing) only advances the state machine to `Zombie`; the actual
    /// teardown happens in [`Self::reap`], never on this task (§4.8). Gives
    /// the slot's `exit_sem` last, so a `stop()` call blocked on it wakes up
    /// only once the slot has actually reached `Zombie`.
    fn on_worker_exit(&'static self, slot: SlotIndex) {
        let exit_sem = self.with_registry(|slots| {
            let s = &mut slots[slot.index()];
            if matches!(s.state, ProcessState::Running | ProcessState::Suspended) {
                let _ = Self::transition(s, ProcessState::Stopping);
            }
            if s.state == ProcessState::Stopping {
                let _ = Self::transition(s, ProcessState::Zombie);
            }
            s.exit_sem
        });
        if let Some(sem) = exit_sem {
            self.rtos.sem_give(sem);
        }
    }

    /// Graceful shutdown request: `Running|Suspended -> Stopping`, a
    /// best-effort `Stop` control message to the target's own queue, then a
    /// bounded wait for the worker to cooperatively reach `Zombie` so this
    /// call reaps it itself -- the graceful counterpart to `kill`'s
    /// immediate reap (§4.8: cleanup never runs on the dying slot's own
    /// task, but nothing says the *caller* of `stop` may not be the reaper).
    /// A suspended target is resumed first so it can actually observe the
    /// `Stop` message at its next receive.
    pub fn stop(&'static self, id: ProcessRef) -> abi::Result<()> {
        let (was_suspended, task, exit_sem) = self.with_registry(|slots| -> abi::Result<(bool, Option<R::Task>, Option<R::Sem>)> {
            let s = Self::slot_mut(slots, id)?;
            let was_suspended = s.state == ProcessState::Suspended;
            Self::transition(s, ProcessState::Stopping)?;
            Ok((was_suspended, s.task_handle, s.exit_sem))
        })?;
        if was_suspended {
            if let Some(t) = task {
                self.rtos.task_resume(t);
            }
        }
        if let Some(msg) = abi::Message::new(abi::MessageClass::AppControl, ProcessId::KERNEL, &[STOP_SENTINEL]) {
            let _ = self.bus.send(ProcessId(id.index() as u8), msg, 0);
        }
        if let Some(sem) = exit_sem {
            self.rtos.sem_take(sem, self.rtos.ms_to_ticks(STOP_REAP_TIMEOUT_MS));
        }
        let reached_zombie = matches!(
            self.with_registry(|slots| Self::slot_mut(slots, id).map(|s| s.state)),
            Ok(ProcessState::Zombie)
        );
        if reached_zombie {
            self.reap(id)
        } else {
            Ok(())
        }
    }

    /// Non-graceful variant: forces `task_delete`, then reaps synchronously
    /// from the caller's own task (§4.8's "never in the dying slot's own
    /// task" is satisfied as long as the caller is not the slot itself).
    pub fn kill(&'static self, id: ProcessRef) -> abi::Result<()> {
        self.with_registry(|slots| -> abi::Result<()> {
            let s = Self::slot_mut(slots, id)?;
            if matches!(s.state, ProcessState::Running | ProcessState::Suspended) {
                Self::transition(s, ProcessState::Stopping)?;
            }
            Ok(())
        })?;
        let task = self.with_registry(|slots| slots[id.index()].task_handle);
        if let Some(t) = task {
            self.rtos.task_delete(t);
        }
        self.with_registry(|slots| {
            let s = &mut slots[id.index()];
            if s.state == ProcessState::Stopping {
                let _ = Self::transition(s, ProcessState::Zombie);
            }
        });
        self.reap(id)
    }

    pub fn suspend(&'static self, id: ProcessRef) -> abi::Result<()> {
        let task = self.with_registry(|slots| -> abi::Result<Option<R::Task>> {
            let s = Self::slot_mut(slots, id)?;
            if s.state == ProcessState::Suspended {
                return Ok(None);
            }
            Self::transition(s, ProcessState::Suspended)?;
            Ok(s.task_handle)
        })?;
        if let Some(t) = task {
            self.rtos.task_suspend(t);
        }
        Ok(())
    }

    /// Unlike `suspend`, `resume` has no idempotency carve-out: `Running`
    /// has no legal self-transition in `can_transition_to`, so resuming an
    /// already-running process is rejected as `InvalidState` like any other
    /// illegal transition would be.
    pub fn resume(&'static self, id: ProcessRef) -> abi::Result<()> {
        let task = self.with_registry(|slots| -> abi::Result<Option<R::Task>> {
            let s = Self::slot_mut(slots, id)?;
            Self::transition(s, ProcessState::Running)?;
            Ok(s.task_handle)
        })?;
        if let Some(t) = task {
            self.rtos.task_resume(t);
        }
        Ok(())
    }

    /// Tears down a `Zombie` slot: closes the VM, deletes the queue,
    /// destroys the pool handle, frees the semaphore, clears fields,
    /// increments generation, and sets the slot `Free` (§4.8 cleanup).
    pub fn reap(&'static self, id: ProcessRef) -> abi::Result<()> {
        let idx = id.index();
        let (pool, vm, sem, exit_sem) = self.with_registry(
            |slots| -> abi::Result<(Option<PoolHandle>, Option<V::Handle>, Option<R::Sem>, Option<R::Sem>)> {
                let s = Self::slot_mut(slots, id)?;
                if s.state != ProcessState::Zombie {
                    return Err(err::invalid_state());
                }
                Ok((s.alloc_handle, s.vm_handle, s.sem, s.exit_sem))
            },
        )?;

        let _ = self.bus.delete_queue(ProcessId(idx as u8));
        if let Some(h) = vm {
            self.vm_host.close(h);
        }
        if let Some(p) = pool {
            let _ = self.pools.destroy_handle(p);
        }
        if let Some(s) = sem {
            self.rtos.sem_delete(s);
        }
        if let Some(s) = exit_sem {
            self.rtos.sem_delete(s);
        }

        let generation = self.with_registry(|slots| {
            let slot = &mut slots[idx];
            slot.alloc_handle = None;
            slot.vm_handle = None;
            slot.sem = None;
            slot.exit_sem = None;
            slot.task_handle = None;
            slot.name = HString::new();
            let _ = Self::transition(slot, ProcessState::Free);
            slot.generation = slot.generation.next();
            slot.generation
        });
        ringbuf_entry!(Trace::Reaped { slot: idx as u8, generation: generation.0 });
        Ok(())
    }

    fn info_for(&self, slot_idx: SlotIndex, slot: &Slot<R, V>) -> ProcessInfo {
        let stats = slot.alloc_handle.and_then(|h| self.pools.stats(h).ok()).unwrap_or_default();
        let stack_high_water = slot.task_handle.map(|t| self.rtos.task_stack_high_water(t)).unwrap_or(0);
        ProcessInfo {
            slot: slot_idx,
            pid: slot.pid,
            generation: slot.generation,
            state: slot.state,
            kind: slot.kind,
            vm_kind: slot.vm_kind,
            name: slot.name.clone(),
            stack_high_water,
            mem_total: stats.total,
            mem_used: stats.used,
            mem_free: stats.free,
            mem_frag: stats.free_blocks,
        }
    }

    pub fn get_by_id(&'static self, id: ProcessRef) -> Option<ProcessInfo> {
        self.with_registry(|slots| {
            let s = Self::slot_mut(slots, id).ok()?;
            Some(self.info_for(SlotIndex(id.index() as u8), s))
        })
    }

    /// Snapshot of every non-`Free` slot, for introspection (§4.8: `ps`
    /// keeps working during partial failures; a `Zombie` stays listed until
    /// the reaper observes it).
    pub fn ps(&'static self) -> HVec<ProcessInfo, MAX_PROCESSES> {
        self.with_registry(|slots| {
            let mut out = HVec::new();
            for (i, slot) in slots.iter().enumerate() {
                if slot.state != ProcessState::Free {
                    let _ = out.push(self.info_for(SlotIndex(i as u8), slot));
                }
            }
            out
        })
    }

    /// Implemented as a TLS read, per §4.8: "when a new task is created, it
    /// receives a pointer to its slot via TLS slot index 1". Returns `None`
    /// for a task that was never spawned through this table (e.g. the task
    /// that constructed it).
    pub fn current(&'static self) -> Option<ProcessRef> {
        let task = self.rtos.task_current();
        let slot_idx = self.rtos.task_get_tls(task, 1)?;
        self.with_registry(|slots| {
            let s = slots.get(slot_idx)?;
            if s.state == ProcessState::Free {
                return None;
            }
            Some(ProcessRef::new(SlotIndex(slot_idx as u8), s.generation))
        })
    }
}

// `Slot<R, V>`'s interior state is touched only while holding
// `registry_sem` (taken via `Rtos::sem_take`/`sem_give`); the `Cell<Handoff>`
// exception is written once under that same lock and read exactly once, by
// the worker task it was written for, before that task touches anything
// else -- matching the Bus's and LinkTransport's "RefCell guarded by our own
// semaphore" discipline.
unsafe impl<R: Rtos + Send, V: VmHost<R> + Send> Sync for ProcessTable<R, V> {}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::attr::WindowConfig;
    use crate::vmhost::VmHost as _;
    use abi::{LoadMode, ProcessKind, VmKind};
    use rt_pool::{MemoryRegion, SysAlloc};
    use rt_rtos::sim::SimRtos;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct NoVm;
    impl<R: Rtos> VmHost<R> for NoVm {
        type Handle = ();
        fn open(&self, _pool: PoolHandle) -> abi::Result<()> {
            Err(err::failed())
        }
        fn load(&self, _h: (), _b: &[u8]) -> abi::Result<()> {
            Ok(())
        }
        fn run(&self, _h: ()) -> abi::Result<()> {
            Ok(())
        }
        fn close(&self, _h: ()) {}
    }

    fn leak<T>(v: T) -> &'static T {
        Box::leak(Box::new(v))
    }

    fn region(size: usize) -> MemoryRegion {
        let layout = std::alloc::Layout::from_size_align(size, 8).unwrap();
        let base = unsafe { std::alloc::alloc(layout) } as usize;
        std::mem::forget(layout);
        MemoryRegion { id: PoolId::UserApp(0), base, len: size }
    }

    fn test_table() -> &'static ProcessTable<SimRtos, NoVm> {
        let bus: &'static Bus<SimRtos> = leak(Bus::init(SimRtos::new()));
        let pools: &'static PoolRegistry<SimRtos> = leak(PoolRegistry::new(SimRtos::new()));
        let mut regions = RegionTable::new();
        for (id, size) in [
            (PoolId::Kernel, 8192),
            (PoolId::SystemApp, 8192),
            (PoolId::UserApp(0), 8192),
            (PoolId::UserApp(1), 8192),
            (PoolId::UserApp(2), 8192),
        ] {
            let r = region(size);
            regions.register(id, r.base, r.len).unwrap();
        }
        let regions: &'static RegionTable = leak(regions);
        let vm_host: &'static NoVm = leak(NoVm);
        leak(ProcessTable::new(SimRtos::new(), bus, pools, regions, vm_host))
    }

    static ECHO_HITS: AtomicUsize = AtomicUsize::new(0);

    fn echo_entry(ctx: &NativeContext<'_, SimRtos>) {
        if let Ok(msg) = ctx.bus.receive(ctx.own_pid, 1000) {
            let _ = ctx.bus.send(ProcessId::KERNEL, msg, 1000);
            ECHO_HITS.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn echo_attr(slot_id: u8) -> SpawnAttr<'static, SimRtos> {
        SpawnAttr {
            slot_id: Some(slot_id),
            kind: ProcessKind::SystemApp,
            vm_kind: VmKind::Native,
            name: "echo",
            load_mode: LoadMode::Bytecode,
            load: LoadSource::Native(echo_entry),
            stack_words: 4096,
            priority: 8,
            affinity: -1,
            window: WindowConfig::HEADLESS,
            queue_capacity: 10,
        }
    }

    #[test]
    fn spawn_and_echo() {
        let table = test_table();
        table.bus.create_queue(ProcessId::KERNEL, QueueConfig { capacity: 4 }).unwrap();

        let id = table.spawn(echo_attr(3)).unwrap();
        assert_eq!(id.slot, SlotIndex(3));
        assert_eq!(id.generation, Generation(0));
        assert_eq!(table.get_by_id(id).unwrap().state, ProcessState::Running);

        let msg = abi::Message::new(abi::MessageClass::AppControl, ProcessId::KERNEL, b"hello").unwrap();
        table.bus.send(ProcessId(3), msg, 100).unwrap();

        let reply = table.bus.receive(ProcessId::KERNEL, 500).unwrap();
        assert_eq!(reply.payload(), b"hello");
        assert_eq!(reply.src_pid, ProcessId(3));
    }

    #[test]
    fn kill_transitions_through_zombie_to_free_and_reuses_the_slot() {
        let table = test_table();
        table.bus.create_queue(ProcessId::KERNEL, QueueConfig { capacity: 4 }).unwrap();
        let id = table.spawn(echo_attr(4)).unwrap();

        assert!(table.kill(id).is_ok());
        assert!(table.get_by_id(id).is_none(), "generation bumped, stale ref no longer resolves");

        let id2 = table.spawn(echo_attr(4)).unwrap();
        assert_eq!(id2.slot, SlotIndex(4));
        assert_eq!(id2.generation, Generation(1));
    }

    #[test]
    fn stop_reaps_the_slot_once_the_worker_exits_cooperatively() {
        let table = test_table();
        table.bus.create_queue(ProcessId::KERNEL, QueueConfig { capacity: 4 }).unwrap();
        let id = table.spawn(echo_attr(7)).unwrap();

        assert!(table.stop(id).is_ok());
        assert!(table.get_by_id(id).is_none(), "generation bumped, stale ref no longer resolves");

        // echo_entry echoes the stop message back to KERNEL before exiting;
        // drain it so it doesn't bleed into whatever the next test expects.
        let _ = table.bus.receive(ProcessId::KERNEL, 0);

        let id2 = table.spawn(echo_attr(7)).unwrap();
        assert_eq!(id2.slot, SlotIndex(7));
        assert_eq!(id2.generation, Generation(1));
    }

    #[test]
    fn resume_on_already_running_is_invalid_state() {
        let table = test_table();
        table.bus.create_queue(ProcessId::KERNEL, QueueConfig { capacity: 4 }).unwrap();
        let id = table.spawn(echo_attr(8)).unwrap();
        assert_eq!(table.get_by_id(id).unwrap().state, ProcessState::Running);

        let err = table.resume(id).unwrap_err();
        assert!(err.is(abi::ErrorKind::InvalidState));
    }

    #[test]
    fn spawn_on_non_free_slot_is_invalid_state() {
        let table = test_table();
        table.bus.create_queue(ProcessId::KERNEL, QueueConfig { capacity: 4 }).unwrap();
        let _id = table.spawn(echo_attr(5)).unwrap();
        let err = table.spawn(echo_attr(5)).unwrap_err();
        assert!(err.is(abi::ErrorKind::InvalidState));
    }

    #[test]
    fn spawn_failure_rolls_back_to_free() {
        let table = test_table();
        let mut attr = echo_attr(6);
        attr.vm_kind = VmKind::MRuby;
        attr.load = LoadSource::Bytecode(&[1, 2, 3]);
        let err = table.spawn(attr).unwrap_err();
        assert!(err.is(abi::ErrorKind::Failed));

        let snapshot = table.ps();
        assert!(snapshot.iter().all(|p| p.slot != SlotIndex(6)), "failed slot must roll back to Free, not linger");
    }

    #[test]
    fn ps_lists_every_non_free_slot() {
        let table = test_table();
        table.bus.create_queue(ProcessId::KERNEL, QueueConfig { capacity: 4 }).unwrap();
        let _id = table.spawn(echo_attr(3)).unwrap();
        let ps = table.ps();
        assert!(ps.iter().any(|p| p.slot == SlotIndex(3) && p.name == "echo"));
    }
}
