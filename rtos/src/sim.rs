// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! A std-hosted [`Rtos`] good enough to run this workspace's own test suite.
//!
//! Tasks are real OS threads; semaphores and queues are `Condvar`-backed.
//! There is no preemptive suspend of an arbitrary thread in std Rust, so
//! `task_suspend`/`task_resume` here are cooperative: a suspended task's
//! next call into `sim_yield_point` blocks until resumed. Every task this
//! workspace spawns under the sim is written to call that yield point on
//! its own poll loop, so this is sufficient for the core's own tests even
//! though it would not suffice as a real scheduler.

use crate::{Rtos, Ticks};
use abi::err;
use std::cell::Cell;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Condvar, Mutex};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

thread_local! {
    // Which `Task` the calling OS thread *is*, for `task_current()`. Real
    // hardware gets this for free (the currently running task is whatever
    // the scheduler last context-switched to); a std-hosted sim has to
    // stash it per-thread itself. Unset on the thread that constructs a
    // `SimRtos` and never spawned as a task of its own (`task_current()`
    // there returns `Task(0)`, the kernel slot, matching a well-known pid
    // for code that runs before any task exists).
    static CURRENT_TASK: Cell<usize> = const { Cell::new(0) };
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct Task(pub usize);
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct Sem(pub usize);
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct Queue(pub usize);

struct TaskSlot {
    _join: Option<JoinHandle<()>>,
    suspended: Mutex<bool>,
    suspend_cv: Condvar,
    priority: AtomicUsize,
    tls: Mutex<[Option<usize>; 4]>,
}

struct SemSlot {
    state: Mutex<u32>,
    cv: Condvar,
}

struct QueueSlot {
    items: Mutex<VecDeque<abi::Message>>,
    capacity: usize,
    not_empty: Condvar,
    not_full: Condvar,
}

/// The sim RTOS instance. Owns every task/sem/queue it has ever created;
/// `delete` calls remove bookkeeping but (per the module doc) cannot force
/// a real OS thread to stop, so callers must make their own task entries
/// exit cooperatively.
pub struct SimRtos {
    boot: Instant,
    tasks: Mutex<Vec<Option<TaskSlot>>>,
    sems: Mutex<Vec<Option<SemSlot>>>,
    queues: Mutex<Vec<Option<QueueSlot>>>,
    tick_hz: u64,
}

impl Default for SimRtos {
    fn default() -> Self {
        SimRtos::new()
    }
}

impl SimRtos {
    pub fn new() -> Self {
        SimRtos {
            boot: Instant::now(),
            tasks: Mutex::new(Vec::new()),
            sems: Mutex::new(Vec::new()),
            queues: Mutex::new(Vec::new()),
            tick_hz: 1000,
        }
    }

    /// Call from inside a task entry's poll loop to honor `task_suspend`.
    pub fn sim_yield_point(&self, task: Task) {
        let tasks = self.tasks.lock().unwrap();
        if let Some(Some(slot)) = tasks.get(task.0) {
            let mut suspended = slot.suspended.lock().unwrap();
            while *suspended {
                suspended = slot.suspend_cv.wait(suspended).unwrap();
            }
        }
    }
}

impl Rtos for SimRtos {
    type Task = Task;
    type Sem = Sem;
    type Queue = Queue;

    fn task_create(&self, spec: crate::TaskSpec<'_>) -> Result<Self::Task, abi::Error> {
        let mut tasks = self.tasks.lock().unwrap();
        let id = tasks.len();
        let name = spec.name.to_string();
        let entry = spec.entry;
        let arg = spec.arg;
        let join = std::thread::Builder::new()
            .name(name)
            .spawn(move || {
                CURRENT_TASK.with(|c| c.set(id));
                entry(arg)
            })
            .map_err(|_| err::failed())?;
        tasks.push(Some(TaskSlot {
            _join: Some(join),
            suspended: Mutex::new(false),
            suspend_cv: Condvar::new(),
            priority: AtomicUsize::new(spec.priority as usize),
            tls: Mutex::new([None; 4]),
        }));
        Ok(Task(id))
    }

    fn task_delete(&self, task: Self::Task) {
        let mut tasks = self.tasks.lock().unwrap();
        if let Some(slot) = tasks.get_mut(task.0) {
            *slot = None;
        }
    }

    fn task_suspend(&self, task: Self::Task) {
        let tasks = self.tasks.lock().unwrap();
        if let Some(Some(slot)) = tasks.get(task.0) {
            *slot.suspended.lock().unwrap() = true;
        }
    }

    fn task_resume(&self, task: Self::Task) {
        let tasks = self.tasks.lock().unwrap();
        if let Some(Some(slot)) = tasks.get(task.0) {
            *slot.suspended.lock().unwrap() = false;
            slot.suspend_cv.notify_all();
        }
    }

    fn task_current(&self) -> Self::Task {
        Task(CURRENT_TASK.with(|c| c.get()))
    }

    fn task_priority(&self, task: Self::Task) -> u8 {
        let tasks = self.tasks.lock().unwrap();
        match tasks.get(task.0) {
            Some(Some(slot)) => slot.priority.load(Ordering::Relaxed) as u8,
            _ => 0,
        }
    }

    fn task_stack_high_water(&self, _task: Self::Task) -> usize {
        // std threads don't expose stack high-water marks; the sim reports a
        // constant so callers exercising this path get a stable value.
        4096
    }

    fn task_get_tls(&self, task: Self::Task, slot_idx: usize) -> Option<usize> {
        let tasks = self.tasks.lock().unwrap();
        match tasks.get(task.0) {
            Some(Some(slot)) => slot.tls.lock().unwrap().get(slot_idx).copied().flatten(),
            _ => None,
        }
    }

    fn task_set_tls(&self, task: Self::Task, slot_idx: usize, value: usize) {
        let tasks = self.tasks.lock().unwrap();
        if let Some(Some(slot)) = tasks.get(task.0) {
            if let Some(cell) = slot.tls.lock().unwrap().get_mut(slot_idx) {
                *cell = Some(value);
            }
        }
    }

    fn sem_mutex(&self) -> Self::Sem {
        let mut sems = self.sems.lock().unwrap();
        let id = sems.len();
        sems.push(Some(SemSlot {
            state: Mutex::new(1),
            cv: Condvar::new(),
        }));
        Sem(id)
    }

    fn sem_binary(&self) -> Self::Sem {
        let mut sems = self.sems.lock().unwrap();
        let id = sems.len();
        sems.push(Some(SemSlot {
            state: Mutex::new(0),
            cv: Condvar::new(),
        }));
        Sem(id)
    }

    fn sem_take(&self, sem: Self::Sem, ticks: Ticks) -> bool {
        let sems = self.sems.lock().unwrap();
        let slot = match sems.get(sem.0) {
            Some(Some(s)) => s,
            _ => return false,
        };
        let mut count = slot.state.lock().unwrap();
        if ticks == Ticks::ZERO {
            if *count > 0 {
                *count -= 1;
                return true;
            }
            return false;
        }
        if ticks == Ticks::FOREVER {
            while *count == 0 {
                count = slot.cv.wait(count).unwrap();
            }
            *count -= 1;
            return true;
        }
        let deadline = Duration::from_millis(ticks.0 as u64);
        let (mut count, timed_out) = slot
            .cv
            .wait_timeout_while(count, deadline, |c| *c == 0)
            .unwrap();
        if timed_out.timed_out() && *count == 0 {
            return false;
        }
        *count -= 1;
        true
    }

    fn sem_give(&self, sem: Self::Sem) {
        let sems = self.sems.lock().unwrap();
        if let Some(Some(slot)) = sems.get(sem.0) {
            *slot.state.lock().unwrap() += 1;
            slot.cv.notify_one();
        }
    }

    fn sem_delete(&self, sem: Self::Sem) {
        let mut sems = self.sems.lock().unwrap();
        if let Some(s) = sems.get_mut(sem.0) {
            *s = None;
        }
    }

    fn queue_create(&self, capacity: usize) -> Self::Queue {
        let mut queues = self.queues.lock().unwrap();
        let id = queues.len();
        queues.push(Some(QueueSlot {
            items: Mutex::new(VecDeque::with_capacity(capacity)),
            capacity,
            not_empty: Condvar::new(),
            not_full: Condvar::new(),
        }));
        Queue(id)
    }

    fn queue_send(&self, queue: Self::Queue, item: abi::Message, ticks: Ticks) -> bool {
        let queues = self.queues.lock().unwrap();
        let slot = match queues.get(queue.0) {
            Some(Some(s)) => s,
            _ => return false,
        };
        let mut items = slot.items.lock().unwrap();
        if ticks == Ticks::ZERO {
            if items.len() >= slot.capacity {
                return false;
            }
        } else if ticks == Ticks::FOREVER {
            while items.len() >= slot.capacity {
                items = slot.not_full.wait(items).unwrap();
            }
        } else {
            let deadline = Duration::from_millis(ticks.0 as u64);
            let (guard, timed_out) = slot
                .not_full
                .wait_timeout_while(items, deadline, |q| q.len() >= slot.capacity)
                .unwrap();
            items = guard;
            if timed_out.timed_out() && items.len() >= slot.capacity {
                return false;
            }
        }
        items.push_back(item);
        slot.not_empty.notify_one();
        true
    }

    fn queue_receive(&self, queue: Self::Queue, ticks: Ticks) -> Option<abi::Message> {
        let queues = self.queues.lock().unwrap();
        let slot = match queues.get(queue.0) {
            Some(Some(s)) => s,
            _ => return None,
        };
        let mut items = slot.items.lock().unwrap();
        if ticks == Ticks::ZERO {
            if items.is_empty() {
                return None;
            }
        } else if ticks == Ticks::FOREVER {
            while items.is_empty() {
                items = slot.not_empty.wait(items).unwrap();
            }
        } else {
            let deadline = Duration::from_millis(ticks.0 as u64);
            let (guard, timed_out) = slot
                .not_empty
                .wait_timeout_while(items, deadline, |q| q.is_empty())
                .unwrap();
            items = guard;
            if timed_out.timed_out() && items.is_empty() {
                return None;
            }
        }
        let item = items.pop_front();
        slot.not_full.notify_one();
        item
    }

    fn queue_delete(&self, queue: Self::Queue) {
        let mut queues = self.queues.lock().unwrap();
        if let Some(q) = queues.get_mut(queue.0) {
            *q = None;
        }
    }

    fn tick_now(&self) -> u64 {
        (self.boot.elapsed().as_secs_f64() * self.tick_hz as f64) as u64
    }

    fn ms_to_ticks(&self, ms: u32) -> Ticks {
        Ticks(((ms as u64 * self.tick_hz) / 1000) as u32)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mutex_excludes_concurrent_access() {
        let rtos = SimRtos::new();
        let sem = rtos.sem_mutex();
        assert!(rtos.sem_take(sem, Ticks::ZERO));
        assert!(!rtos.sem_take(sem, Ticks::ZERO));
        rtos.sem_give(sem);
        assert!(rtos.sem_take(sem, Ticks::ZERO));
    }

    #[test]
    fn queue_respects_capacity_and_fifo_order() {
        let rtos = SimRtos::new();
        let q = rtos.queue_create(2);
        let m1 = abi::Message::new(abi::MessageClass::AppControl, abi::ProcessId(1), b"a").unwrap();
        let m2 = abi::Message::new(abi::MessageClass::AppControl, abi::ProcessId(1), b"b").unwrap();
        let m3 = abi::Message::new(abi::MessageClass::AppControl, abi::ProcessId(1), b"c").unwrap();
        assert!(rtos.queue_send(q, m1, Ticks::ZERO));
        assert!(rtos.queue_send(q, m2, Ticks::ZERO));
        assert!(!rtos.queue_send(q, m3, Ticks::ZERO));
        assert_eq!(rtos.queue_receive(q, Ticks::ZERO).unwrap().payload(), b"a");
        assert_eq!(rtos.queue_receive(q, Ticks::ZERO).unwrap().payload(), b"b");
        assert!(rtos.queue_receive(q, Ticks::ZERO).is_none());
    }

    #[test]
    fn ms_to_ticks_is_monotonic_with_ms() {
        let rtos = SimRtos::new();
        assert!(rtos.ms_to_ticks(100).0 >= rtos.ms_to_ticks(10).0);
    }
}
