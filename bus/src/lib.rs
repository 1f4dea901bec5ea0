// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! The message bus (§4.4): a single process-wide registry mapping `pid` to
//! a bounded queue, with thread-safe mutation.
//!
//! The registry mutex is only ever held for the lookup, never across a
//! blocking `queue_send`/`queue_receive` -- a slow receiver must not be able
//! to stall every other bus operation. `send`/`receive`/`broadcast` all
//! follow the same "look up under the lock, release, then block" shape.
#![cfg_attr(not(test), no_std)]

use abi::constants::MAX_PROCESSES;
use abi::{err, Error, ErrorDetail, ErrorKind, Message, ProcessId};
use core::cell::RefCell;
use rt_rtos::{Rtos, Ticks};

/// Per-queue configuration at creation time.
#[derive(Clone, Copy, Debug)]
pub struct QueueConfig {
    pub capacity: usize,
}

/// Running counters for one process's queue.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct MessageQueueStats {
    pub sent: u32,
    pub received: u32,
    pub send_failures: u32,
}

struct QueueEntry<R: Rtos> {
    handle: R::Queue,
    stats: MessageQueueStats,
}

/// The bus registry, generic over the RTOS supplying its queues and mutex.
pub struct Bus<R: Rtos> {
    rtos: R,
    registry_sem: R::Sem,
    entries: RefCell<[Option<QueueEntry<R>>; MAX_PROCESSES]>,
}

impl<R: Rtos> Bus<R> {
    /// Builds an uninitialized bus. Mirrors the source's `init()`/`deinit()`
    /// pair: construction here takes the place of `init()`, and dropping
    /// the value (after `deinit`-ing every queue) takes the place of
    /// `deinit()`.
    pub fn init(rtos: R) -> Self {
        let registry_sem = rtos.sem_mutex();
        Bus {
            rtos,
            registry_sem,
            entries: RefCell::new(core::array::from_fn(|_| None)),
        }
    }

    /// Tears down every registered queue. After this call the bus must be
    /// re-`init`ialized (a fresh `Bus`) before use.
    pub fn deinit(&self) {
        self.with_registry(|| {
            let mut entries = self.entries.borrow_mut();
            for slot in entries.iter_mut() {
                if let Some(entry) = slot.take() {
                    self.rtos.queue_delete(entry.handle);
                }
            }
        });
    }

    fn with_registry<T>(&self, body: impl FnOnce() -> T) -> T {
        rt_rtos::with_mutex(&self.rtos, self.registry_sem, body)
    }

    fn index_of(pid: ProcessId) -> abi::Result<usize> {
        if pid.is_none() || pid.index() >= MAX_PROCESSES {
            return Err(err::invalid_param());
        }
        Ok(pid.index())
    }

    pub fn create_queue(&self, pid: ProcessId, cfg: QueueConfig) -> abi::Result<()> {
        let idx = Self::index_of(pid)?;
        if cfg.capacity == 0 {
            return Err(err::detailed(ErrorKind::InvalidParam, ErrorDetail::ZeroCapacity));
        }
        self.with_registry(|| {
            let mut entries = self.entries.borrow_mut();
            if entries[idx].is_some() {
                return Err(err::invalid_state());
            }
            let handle = self.rtos.queue_create(cfg.capacity);
            entries[idx] = Some(QueueEntry {
                handle,
                stats: MessageQueueStats::default(),
            });
            Ok(())
        })
    }

    pub fn delete_queue(&self, pid: ProcessId) -> abi::Result<()> {
        let idx = Self::index_of(pid)?;
        self.with_registry(|| {
            let mut entries = self.entries.borrow_mut();
            match entries[idx].take() {
                Some(entry) => {
                    self.rtos.queue_delete(entry.handle);
                    Ok(())
                }
                None => Err(err::not_found()),
            }
        })
    }

    pub fn exists(&self, pid: ProcessId) -> bool {
        match Self::index_of(pid) {
            Ok(idx) => self.with_registry(|| self.entries.borrow()[idx].is_some()),
            Err(_) => false,
        }
    }

    pub fn stats(&self, pid: ProcessId) -> abi::Result<MessageQueueStats> {
        let idx = Self::index_of(pid)?;
        self.with_registry(|| {
            self.entries.borrow()[idx]
                .as_ref()
                .map(|e| e.stats)
                .ok_or_else(err::not_found)
        })
    }

    fn lookup_handle(&self, idx: usize) -> Option<R::Queue> {
        self.with_registry(|| self.entries.borrow()[idx].as_ref().map(|e| e.handle))
    }

    fn record(&self, idx: usize, f: impl FnOnce(&mut MessageQueueStats)) {
        self.with_registry(|| {
            if let Some(entry) = self.entries.borrow_mut()[idx].as_mut() {
                f(&mut entry.stats);
            }
        });
    }

    /// Sends `msg` to `dest_pid`, blocking up to `timeout_ms`.
    ///
    /// The registry mutex is held only to resolve `dest_pid -> queue
    /// handle`; the (possibly blocking) `queue_send` itself runs with the
    /// registry unlocked, per §4.4.
    pub fn send(&self, dest_pid: ProcessId, msg: Message, timeout_ms: u32) -> abi::Result<()> {
        let idx = Self::index_of(dest_pid)?;
        let Some(handle) = self.lookup_handle(idx) else {
            return Err(err::not_found());
        };
        let ticks = self.rtos.ms_to_ticks(timeout_ms);
        if self.rtos.queue_send(handle, msg, ticks) {
            self.record(idx, |s| s.sent += 1);
            Ok(())
        } else {
            self.record(idx, |s| s.send_failures += 1);
            Err(err::timeout())
        }
    }

    pub fn receive(&self, pid: ProcessId, timeout_ms: u32) -> abi::Result<Message> {
        let idx = Self::index_of(pid)?;
        let Some(handle) = self.lookup_handle(idx) else {
            return Err(err::not_found());
        };
        let ticks = self.rtos.ms_to_ticks(timeout_ms);
        match self.rtos.queue_receive(handle, ticks) {
            Some(msg) => {
                self.record(idx, |s| s.received += 1);
                Ok(msg)
            }
            None => Err(err::timeout()),
        }
    }

    /// Sends `msg` to every registered queue, using the same
    /// lock-release-then-send discipline per recipient. Never fails as a
    /// whole; returns the count of recipients that accepted the message
    /// within `timeout_ms`.
    pub fn broadcast(&self, msg: Message, timeout_ms: u32) -> usize {
        let ticks = self.rtos.ms_to_ticks(timeout_ms);
        let mut delivered = 0;
        for idx in 0..MAX_PROCESSES {
            let Some(handle) = self.lookup_handle(idx) else {
                continue;
            };
            if self.rtos.queue_send(handle, msg, ticks) {
                self.record(idx, |s| s.sent += 1);
                delivered += 1;
            } else {
                self.record(idx, |s| s.send_failures += 1);
            }
        }
        delivered
    }
}

// Bus<R> is built from `RefCell`s accessed only while holding `registry_sem`
// (taken via `Rtos::sem_take`/`sem_give`), so cross-task access is already
// serialized at the RTOS level; it is sound to share a `Bus` across the
// tasks the RTOS schedules.
unsafe impl<R: Rtos + Send> Sync for Bus<R> {}

#[cfg(test)]
mod tests {
    use super::*;
    use abi::MessageClass;
    use rt_rtos::sim::SimRtos;

    fn msg(text: &[u8]) -> Message {
        Message::new(MessageClass::AppControl, ProcessId(0), text).unwrap()
    }

    #[test]
    fn fifo_within_one_sender_receiver_pair() {
        let bus = Bus::init(SimRtos::new());
        bus.create_queue(ProcessId(3), QueueConfig { capacity: 10 }).unwrap();

        bus.send(ProcessId(3), msg(b"one"), 0).unwrap();
        bus.send(ProcessId(3), msg(b"two"), 0).unwrap();
        bus.send(ProcessId(3), msg(b"three"), 0).unwrap();

        assert_eq!(bus.receive(ProcessId(3), 0).unwrap().payload(), b"one");
        assert_eq!(bus.receive(ProcessId(3), 0).unwrap().payload(), b"two");
        assert_eq!(bus.receive(ProcessId(3), 0).unwrap().payload(), b"three");
    }

    #[test]
    fn send_to_unknown_pid_is_not_found() {
        let bus = Bus::init(SimRtos::new());
        assert!(bus.send(ProcessId(4), msg(b"x"), 0).unwrap_err().is(ErrorKind::NotFound));
    }

    #[test]
    fn create_queue_twice_is_invalid_state() {
        let bus = Bus::init(SimRtos::new());
        bus.create_queue(ProcessId(1), QueueConfig { capacity: 4 }).unwrap();
        let err = bus.create_queue(ProcessId(1), QueueConfig { capacity: 4 }).unwrap_err();
        assert!(err.is(ErrorKind::InvalidState));
    }

    #[test]
    fn full_queue_times_out_and_counts_failure() {
        let bus = Bus::init(SimRtos::new());
        bus.create_queue(ProcessId(2), QueueConfig { capacity: 1 }).unwrap();
        bus.send(ProcessId(2), msg(b"a"), 0).unwrap();
        let err = bus.send(ProcessId(2), msg(b"b"), 0).unwrap_err();
        assert!(err.is(ErrorKind::Timeout));
        assert_eq!(bus.stats(ProcessId(2)).unwrap().send_failures, 1);
    }

    #[test]
    fn broadcast_partial_failure_counts_successes() {
        let bus = Bus::init(SimRtos::new());
        bus.create_queue(ProcessId(0), QueueConfig { capacity: 1 }).unwrap();
        bus.create_queue(ProcessId(1), QueueConfig { capacity: 1 }).unwrap();
        bus.create_queue(ProcessId(2), QueueConfig { capacity: 1 }).unwrap();
        // Fill pid 1's queue so the broadcast finds it full.
        bus.send(ProcessId(1), msg(b"full"), 0).unwrap();

        let delivered = bus.broadcast(msg(b"hi"), 0);
        assert_eq!(delivered, 2);
        assert_eq!(bus.stats(ProcessId(1)).unwrap().send_failures, 1);
    }
}
