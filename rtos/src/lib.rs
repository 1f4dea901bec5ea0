// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! The RTOS abstraction contract (§4.3 "RTOS Abstraction").
//!
//! Every other crate in this workspace is written against [`Rtos`], never
//! against a concrete scheduler. On real hardware a board crate supplies an
//! implementation backed by the vendor RTOS; `sim` supplies a std-hosted one
//! so the rest of the core can be unit-tested on the host.
#![cfg_attr(not(any(test, feature = "sim")), no_std)]

use abi::Error;
use core::fmt;

#[cfg(any(test, feature = "sim"))]
pub mod sim;

/// A tick count, or the sentinel meaning "wait with no timeout".
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct Ticks(pub u32);

impl Ticks {
    /// No waiting at all; the call must succeed or fail immediately.
    pub const ZERO: Ticks = Ticks(0);
    /// Block until the operation can complete. Spec §9 forbids *unbounded*
    /// waits at the call sites that matter (bus send/receive, link sync
    /// requests); those sites must pick a real deadline and never pass this
    /// value through to the RTOS. It exists here only because the RTOS
    /// primitive itself (a FreeRTOS-style semaphore/queue) is defined in
    /// terms of it.
    pub const FOREVER: Ticks = Ticks(u32::MAX);
}

/// Entry point for an RTOS-scheduled task. Takes a single opaque argument
/// word, matching the C ABI a real embedded task-create call expects; a
/// closure's environment does not fit in a task-create call with no
/// allocator, so call sites encode any extra state via `arg` (usually a
/// pointer/index into a static table) rather than capturing it.
pub type TaskEntry = fn(arg: usize);

/// Priority, in the RTOS's own units; higher runs first, matching most
/// preemptive RTOS conventions (FreeRTOS, ThreadX).
pub type Priority = u8;

/// Parameters for creating a task, grouped so `task_create` doesn't grow an
/// ever-longer positional argument list as new knobs get added.
#[derive(Clone, Copy)]
pub struct TaskSpec<'a> {
    pub name: &'a str,
    pub entry: TaskEntry,
    pub arg: usize,
    pub stack_words: usize,
    pub priority: Priority,
}

/// The RTOS abstraction every other crate in this workspace is generic over.
///
/// Handles (`Task`, `Sem`, `Queue`) are opaque `Copy` values; callers never
/// inspect them, only pass them back. This keeps the trait object-safe-ish
/// in spirit (no GATs) while still letting a board implementation use
/// whatever representation its vendor RTOS hands back (a raw pointer, an
/// index, a `TaskHandle_t`, ...).
pub trait Rtos {
    type Task: Copy + Eq + fmt::Debug;
    type Sem: Copy + Eq + fmt::Debug;
    type Queue: Copy + Eq + fmt::Debug;

    /// Ticks that never elapse a real-time deadline; used as a sentinel by
    /// callers that need to distinguish "poll once" from "wait forever" at
    /// the type level without round-tripping through `Ticks::FOREVER`.
    const MAX_TICKS: u32 = u32::MAX;

    fn task_create(&self, spec: TaskSpec<'_>) -> Result<Self::Task, Error>;
    fn task_delete(&self, task: Self::Task);
    fn task_suspend(&self, task: Self::Task);
    fn task_resume(&self, task: Self::Task);
    fn task_current(&self) -> Self::Task;
    fn task_priority(&self, task: Self::Task) -> Priority;
    fn task_stack_high_water(&self, task: Self::Task) -> usize;
    fn task_get_tls(&self, task: Self::Task, slot: usize) -> Option<usize>;
    fn task_set_tls(&self, task: Self::Task, slot: usize, value: usize);

    /// A mutex is just a binary semaphore created already-given, per the
    /// usual RTOS convention; there is no separate mutex handle type.
    fn sem_mutex(&self) -> Self::Sem;
    fn sem_binary(&self) -> Self::Sem;
    /// Blocks for up to `ticks`, returning whether the semaphore was taken.
    fn sem_take(&self, sem: Self::Sem, ticks: Ticks) -> bool;
    fn sem_give(&self, sem: Self::Sem);
    fn sem_delete(&self, sem: Self::Sem);

    fn queue_create(&self, capacity: usize) -> Self::Queue;
    /// Blocks for up to `ticks` if the queue is full, returning whether the
    /// item was enqueued.
    fn queue_send(&self, queue: Self::Queue, item: abi::Message, ticks: Ticks) -> bool;
    /// Blocks for up to `ticks` if the queue is empty.
    fn queue_receive(&self, queue: Self::Queue, ticks: Ticks) -> Option<abi::Message>;
    fn queue_delete(&self, queue: Self::Queue);

    /// Monotonic tick counter since boot.
    fn tick_now(&self) -> u64;
    fn ms_to_ticks(&self, ms: u32) -> Ticks;
}

/// Runs `body` while holding `sem` as a mutex, giving it back on every exit
/// path including an early return from `body`. Grounded in the bus and pool
/// registries' "acquire, mutate, release before anything blocking" pattern:
/// this helper is the non-blocking half of that idiom.
pub fn with_mutex<R: Rtos, T>(rtos: &R, sem: R::Sem, body: impl FnOnce() -> T) -> T {
    rtos.sem_take(sem, Ticks::FOREVER);
    let result = body();
    rtos.sem_give(sem);
    result
}
