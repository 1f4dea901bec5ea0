// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Link transport (§4.6): multiplexes many logical requests over one frame
//! stream, matches responses to requests, retransmits on timeout.
//!
//! Only the renderer proxy ever calls [`LinkTransport::process`] or
//! [`LinkTransport::send`]/[`send_sync`](LinkTransport::send_sync) (§4.10:
//! "the proxy is the single writer to the link"); `send_sync` polls
//! `process` internally while it waits, so the driver gets the same single
//! mutex as the pending table, sync slots, and callback registry, exactly
//! as §4.6 describes.
//!
//! Two bits of the outer frame `type` byte are this core's own convention,
//! not specified by the wire format in §6: `ACK_REQUIRED` (0x20, named in
//! the spec) and `IS_ACK` (0x10, this implementation's choice for "this
//! frame itself is an acknowledgment" -- the spec leaves how a receiver
//! tells an ACK from a request to the renderer's own protocol, so this core
//! fixes one rather than leaving `process` unable to tell them apart).

use crate::framing::{self, EncodedFrame};
use abi::constants::{
    DEFAULT_LINK_TIMEOUT_MS, DEFAULT_MAX_RETRIES, DEFAULT_WINDOW_SIZE, MAX_PENDING, PAYLOAD_CAP,
    SYNC_SLOT_COUNT,
};
use abi::{err, Error, ErrorDetail, ErrorKind};
use core::cell::RefCell;
use heapless::Vec as HVec;
use ringbuf::*;
use rt_rtos::{Rtos, Ticks};

pub const ACK_REQUIRED: u8 = 0x20;
pub const CHUNKED: u8 = 0x40;
pub const IS_ACK: u8 = 0x10;

const MAX_CALLBACKS: usize = 16;

/// How long a single `send_sync` wait slice blocks on its waiter semaphore
/// before looping back to pump the link itself. The renderer proxy is the
/// only caller of both `send_sync` and `process` (§4.10: "the proxy is the
/// single writer to the link"), so nothing else will ever drain the ACK that
/// would wake a pure `sem_take` wait -- `send_sync` has to pump its own
/// progress rather than assume a second actor is calling `process`.
const SEND_SYNC_POLL_MS: u32 = 5;

ringbuf!(Trace, 8, Trace::None);

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
enum Trace {
    None,
    PendingSlotsExhausted { seq: u8, detail: ErrorDetail },
}

/// A byte-level frame driver: whatever carries COBS-encoded bytes to and
/// from the far end (a UART, a socket, a loopback test double). The
/// transport never assumes anything about how bytes actually move.
pub trait FrameDriver {
    fn write_frame(&mut self, encoded: &[u8]) -> abi::Result<()>;
    /// Pops one buffered, terminator-delimited frame into `out`, if one is
    /// fully available. Returns whether a frame was produced.
    fn poll_frame(&mut self, out: &mut EncodedFrame) -> bool;
}

#[derive(Clone, Copy, Debug)]
pub struct TransportConfig {
    pub timeout_ms: u32,
    pub enable_retransmit: bool,
    pub max_retries: u8,
    pub window_size: u16,
}

impl Default for TransportConfig {
    fn default() -> Self {
        TransportConfig {
            timeout_ms: DEFAULT_LINK_TIMEOUT_MS,
            enable_retransmit: true,
            max_retries: DEFAULT_MAX_RETRIES,
            window_size: DEFAULT_WINDOW_SIZE,
        }
    }
}

struct PendingEntry {
    seq: u8,
    deadline_ticks: u64,
    retries_remaining: u8,
    frame: EncodedFrame,
    sync_slot: Option<u8>,
}

struct SyncSlot<R: Rtos> {
    in_use: bool,
    seq: u8,
    waiter_sem: R::Sem,
    status: u8,
    response: HVec<u8, PAYLOAD_CAP>,
}

struct Callback {
    sub_cmd: u8,
    handler: fn(u8, &[u8], usize),
    user_data: usize,
}

struct Shared<R: Rtos> {
    next_seq: u8,
    pending: [Option<PendingEntry>; MAX_PENDING],
    callbacks: [Option<Callback>; MAX_CALLBACKS],
    cfg: TransportConfig,
    sync_slots: [Option<SyncSlot<R>>; SYNC_SLOT_COUNT],
}

/// The transport, generic over the RTOS (for its mutex and sync-slot
/// semaphores) and the byte-level driver underneath it.
pub struct LinkTransport<R: Rtos, D: FrameDriver> {
    rtos: R,
    sem: R::Sem,
    shared: RefCell<Shared<R>>,
    driver: RefCell<D>,
}

impl<R: Rtos, D: FrameDriver> LinkTransport<R, D> {
    pub fn init(rtos: R, driver: D, cfg: TransportConfig) -> Self {
        let sem = rtos.sem_mutex();
        let sync_slots = core::array::from_fn(|_| {
            Some(SyncSlot {
                in_use: false,
                seq: 0,
                waiter_sem: rtos.sem_binary(),
                status: 0,
                response: HVec::new(),
            })
        });
        LinkTransport {
            rtos,
            sem,
            shared: RefCell::new(Shared {
                next_seq: 0,
                pending: core::array::from_fn(|_| None),
                callbacks: core::array::from_fn(|_| None),
                cfg,
                sync_slots,
            }),
            driver: RefCell::new(driver),
        }
    }

    pub fn deinit(&self) {
        let mut shared = self.shared.borrow_mut();
        for slot in shared.sync_slots.iter_mut().flatten() {
            self.rtos.sem_delete(slot.waiter_sem);
        }
    }

    fn with_lock<T>(&self, body: impl FnOnce(&mut Shared<R>) -> T) -> T {
        rt_rtos::with_mutex(&self.rtos, self.sem, || body(&mut self.shared.borrow_mut()))
    }

    /// Guards the driver under the same mutex as `Shared`. A single-writer
    /// design (§4.10: only the renderer proxy ever touches the link) means
    /// this is never nested with `with_lock`, so sharing one semaphore
    /// between the two never risks a self-deadlock -- it only has to rule
    /// out two threads calling `write_frame`/`poll_frame` at once, which
    /// `send_sync`'s own internal polling of `process()` now makes possible.
    fn with_driver<T>(&self, body: impl FnOnce(&mut D) -> T) -> T {
        rt_rtos::with_mutex(&self.rtos, self.sem, || body(&mut self.driver.borrow_mut()))
    }

    fn next_seq(shared: &mut Shared<R>) -> u8 {
        let seq = shared.next_seq;
        shared.next_seq = shared.next_seq.wrapping_add(1);
        seq
    }

    pub fn register_callback(
        &self,
        sub_cmd: u8,
        handler: fn(u8, &[u8], usize),
        user_data: usize,
    ) -> abi::Result<()> {
        self.with_lock(|shared| {
            if let Some(slot) = shared.callbacks.iter_mut().find(|c| c.is_none()) {
                *slot = Some(Callback {
                    sub_cmd,
                    handler,
                    user_data,
                });
                Ok(())
            } else {
                Err(err::busy())
            }
        })
    }

    pub fn unregister_callback(&self, sub_cmd: u8) {
        self.with_lock(|shared| {
            for slot in shared.callbacks.iter_mut() {
                if slot.as_ref().map(|c| c.sub_cmd) == Some(sub_cmd) {
                    *slot = None;
                }
            }
        });
    }

    /// Fire-and-forget send. Records a pending-retransmit entry only when
    /// `cfg.enable_retransmit` is set, per §4.6.
    pub fn send(&self, kind: u8, sub_cmd: u8, payload: &[u8]) -> abi::Result<()> {
        let mut encoded = EncodedFrame::new();
        let (seq, timeout_ticks, enable_retransmit, max_retries) = self.with_lock(|shared| {
            let seq = Self::next_seq(shared);
            (
                seq,
                self.rtos.ms_to_ticks(shared.cfg.timeout_ms),
                shared.cfg.enable_retransmit,
                shared.cfg.max_retries,
            )
        });
        framing::encode(kind, seq, sub_cmd, payload, &mut encoded)?;
        self.with_driver(|d| d.write_frame(&encoded))?;

        if enable_retransmit {
            let recorded = self.with_lock(|shared| {
                match shared.pending.iter_mut().find(|p| p.is_none()) {
                    Some(slot) => {
                        *slot = Some(PendingEntry {
                            seq,
                            deadline_ticks: self.rtos.tick_now() + timeout_ticks.0 as u64,
                            retries_remaining: max_retries,
                            frame: encoded,
                            sync_slot: None,
                        });
                        true
                    }
                    None => false,
                }
            });
            if !recorded {
                ringbuf_entry!(Trace::PendingSlotsExhausted { seq, detail: ErrorDetail::PendingSlotsExhausted });
            }
        }
        Ok(())
    }

    /// Blocking request/response send. Returns `(status, response_len)` on
    /// success -- the Rust-idiomatic stand-in for the C ABI's
    /// `response_buf, response_len_in_out` pair.
    pub fn send_sync(
        &self,
        kind: u8,
        sub_cmd: u8,
        payload: &[u8],
        response_buf: &mut [u8],
        timeout_ms: u32,
    ) -> abi::Result<(u8, usize)> {
        let acquired = self.with_lock(|shared| {
            let idx = shared.sync_slots.iter().position(|s| !s.as_ref().unwrap().in_use);
            idx.map(|i| {
                let seq = Self::next_seq(shared);
                let slot = shared.sync_slots[i].as_mut().unwrap();
                slot.in_use = true;
                slot.seq = seq;
                slot.status = 0;
                slot.response.clear();
                (i, seq, slot.waiter_sem)
            })
        });
        let Some((slot_idx, seq, waiter_sem)) = acquired else {
            return Err(err::busy());
        };
        // Drain any stale signal left by an abandoned previous occupant of
        // this slot before we start waiting on it ourselves.
        while self.rtos.sem_take(waiter_sem, Ticks::ZERO) {}

        let mut encoded = EncodedFrame::new();
        framing::encode(kind | ACK_REQUIRED, seq, sub_cmd, payload, &mut encoded)?;
        self.with_driver(|d| d.write_frame(&encoded))?;

        let timeout_ticks = self.rtos.ms_to_ticks(self.with_lock(|s| s.cfg.timeout_ms));
        let recorded = self.with_lock(|shared| {
            match shared.pending.iter_mut().find(|p| p.is_none()) {
                Some(slot) => {
                    *slot = Some(PendingEntry {
                        seq,
                        deadline_ticks: self.rtos.tick_now() + timeout_ticks.0 as u64,
                        retries_remaining: shared.cfg.max_retries,
                        frame: encoded,
                        sync_slot: Some(slot_idx as u8),
                    });
                    true
                }
                None => false,
            }
        });
        if !recorded {
            // No retransmit bookkeeping for this request, but the sync slot
            // itself is still live: the wait below still completes, either
            // on the ACK arriving or on its own timeout, just without a
            // retry if the ACK is lost.
            ringbuf_entry!(Trace::PendingSlotsExhausted { seq, detail: ErrorDetail::PendingSlotsExhausted });
        }

        // Nothing but this call will ever drive `process()` for a
        // single-threaded caller (the renderer proxy owns both), so a plain
        // blocking `sem_take` would wait out the full timeout every time:
        // the ACK that signals `waiter_sem` is only ever observed from
        // inside `process()`. Pump the link ourselves between short waits.
        let deadline_ticks = self.rtos.tick_now() + self.rtos.ms_to_ticks(timeout_ms).0 as u64;
        let poll_ticks = self.rtos.ms_to_ticks(timeout_ms.min(SEND_SYNC_POLL_MS));
        let mut woke = false;
        loop {
            self.process();
            if self.rtos.sem_take(waiter_sem, poll_ticks) {
                woke = true;
                break;
            }
            if self.rtos.tick_now() >= deadline_ticks {
                break;
            }
        }

        let result = self.with_lock(|shared| {
            let slot = shared.sync_slots[slot_idx].as_mut().unwrap();
            let outcome = if woke {
                let n = slot.response.len().min(response_buf.len());
                response_buf[..n].copy_from_slice(&slot.response[..n]);
                Ok((slot.status, n))
            } else {
                Err(err::timeout())
            };
            slot.in_use = false;
            // Sever the pending entry's link to this slot; it may still be
            // retried/dropped, but must never again signal a semaphore that
            // by then belongs to an unrelated request.
            for p in shared.pending.iter_mut().flatten() {
                if p.sync_slot == Some(slot_idx as u8) {
                    p.sync_slot = None;
                }
            }
            outcome
        });
        result
    }

    /// Drains every frame currently buffered by the driver, dispatching
    /// requests and matching ACKs, then scans for retransmission work.
    pub fn process(&self) {
        loop {
            let mut buf = EncodedFrame::new();
            let got = self.with_driver(|d| d.poll_frame(&mut buf));
            if !got {
                break;
            }
            match framing::decode(&buf) {
                Err(_) => continue,
                Ok(frame) => {
                    if frame.kind & IS_ACK != 0 {
                        self.handle_ack(&frame.payload);
                    } else {
                        self.dispatch_and_ack(frame.kind, frame.seq, frame.sub_cmd, &frame.payload);
                    }
                }
            }
        }
        self.retransmit_scan();
    }

    fn handle_ack(&self, payload: &[u8]) {
        if payload.len() < 3 {
            return;
        }
        let original_seq = u16::from_le_bytes([payload[0], payload[1]]);
        let status = payload[2];
        let response = &payload[3..];

        self.with_lock(|shared| {
            let mut matched_sem = None;
            for slot in shared.sync_slots.iter_mut().flatten() {
                if slot.in_use && slot.seq as u16 == original_seq {
                    slot.status = status;
                    slot.response.clear();
                    let _ = slot.response.extend_from_slice(response);
                    matched_sem = Some(slot.waiter_sem);
                    break;
                }
            }
            shared
                .pending
                .iter_mut()
                .filter(|p| p.as_ref().map(|e| e.seq as u16) == Some(original_seq))
                .for_each(|p| *p = None);
            if let Some(sem) = matched_sem {
                self.rtos.sem_give(sem);
            }
        });
    }

    fn dispatch_and_ack(&self, kind: u8, seq: u8, sub_cmd: u8, payload: &[u8]) {
        let handler = self.with_lock(|shared| {
            shared
                .callbacks
                .iter()
                .flatten()
                .find(|c| c.sub_cmd == sub_cmd)
                .map(|c| (c.handler, c.user_data))
        });
        let status = match handler {
            Some((f, user_data)) => {
                f(sub_cmd, payload, user_data);
                0
            }
            None => 1,
        };

        let mut ack_payload = [0u8; 3];
        ack_payload[..2].copy_from_slice(&(seq as u16).to_le_bytes());
        ack_payload[2] = status;

        let ack_seq = self.with_lock(Self::next_seq);
        let mut encoded = EncodedFrame::new();
        if framing::encode(kind | IS_ACK, ack_seq, sub_cmd, &ack_payload, &mut encoded).is_ok() {
            let _ = self.with_driver(|d| d.write_frame(&encoded));
        }
    }

    fn retransmit_scan(&self) {
        let now = self.rtos.tick_now();
        let mut to_resend: HVec<(EncodedFrame, u8, u64), MAX_PENDING> = HVec::new();
        let mut to_signal_timeout: HVec<R::Sem, SYNC_SLOT_COUNT> = HVec::new();

        self.with_lock(|shared| {
            let timeout_ticks = self.rtos.ms_to_ticks(shared.cfg.timeout_ms).0 as u64;
            for entry in shared.pending.iter_mut() {
                let Some(p) = entry else { continue };
                if now < p.deadline_ticks {
                    continue;
                }
                if p.retries_remaining > 0 {
                    p.retries_remaining -= 1;
                    p.deadline_ticks = now + timeout_ticks;
                    let _ = to_resend.push((p.frame.clone(), p.seq, p.deadline_ticks));
                } else {
                    if let Some(idx) = p.sync_slot {
                        if let Some(slot) = shared.sync_slots[idx as usize].as_mut() {
                            if slot.in_use {
                                slot.status = ErrorKind::Timeout as u8;
                                let _ = to_signal_timeout.push(slot.waiter_sem);
                            }
                        }
                    }
                    *entry = None;
                }
            }
        });

        for (frame, _seq, _deadline) in &to_resend {
            let _ = self.with_driver(|d| d.write_frame(frame));
        }
        for sem in to_signal_timeout {
            self.rtos.sem_give(sem);
        }
    }
}

impl Clone for EncodedFrame {
    fn clone(&self) -> Self {
        let mut out = EncodedFrame::new();
        out.extend_from_slice(self).unwrap();
        out
    }
}

// `Shared<R>`/`D` are only ever touched while holding `sem` (taken via
// `Rtos::sem_take`/`sem_give`), matching the Bus's synchronization
// discipline.
unsafe impl<R: Rtos + Send, D: FrameDriver + Send> Sync for LinkTransport<R, D> {}

#[cfg(test)]
mod tests {
    use super::*;
    use rt_rtos::sim::SimRtos;
    use std::collections::VecDeque;
    use std::sync::Mutex;

    #[derive(Default)]
    struct LoopbackDriver {
        inbox: Mutex<VecDeque<EncodedFrame>>,
        sent: Mutex<Vec<EncodedFrame>>,
        drop_next: Mutex<usize>,
    }

    impl FrameDriver for std::sync::Arc<LoopbackDriver> {
        fn write_frame(&mut self, encoded: &[u8]) -> abi::Result<()> {
            let mut sent = self.sent.lock().unwrap();
            let mut f = EncodedFrame::new();
            f.extend_from_slice(encoded).unwrap();
            sent.push(f);
            Ok(())
        }

        fn poll_frame(&mut self, out: &mut EncodedFrame) -> bool {
            let mut inbox = self.inbox.lock().unwrap();
            if let Some(f) = inbox.pop_front() {
                out.extend_from_slice(&f).unwrap();
                true
            } else {
                false
            }
        }
    }

    fn inject(driver: &std::sync::Arc<LoopbackDriver>, kind: u8, seq: u8, sub_cmd: u8, payload: &[u8]) {
        let mut encoded = EncodedFrame::new();
        framing::encode(kind, seq, sub_cmd, payload, &mut encoded).unwrap();
        driver.inbox.lock().unwrap().push_back(encoded);
    }

    #[test]
    fn send_sync_returns_ack_payload() {
        let driver = std::sync::Arc::new(LoopbackDriver::default());
        let transport = LinkTransport::init(SimRtos::new(), driver.clone(), TransportConfig::default());

        // Drive the handshake from another thread: wait for the request to
        // land in `sent`, then inject the matching ACK.
        let driver2 = driver.clone();
        let worker = std::thread::spawn(move || {
            for _ in 0..1000 {
                let maybe_req = {
                    let sent = driver2.sent.lock().unwrap();
                    sent.last().cloned()
                };
                if let Some(req) = maybe_req {
                    let decoded = framing::decode(&req).unwrap();
                    let mut payload = vec![0u8; 3];
                    payload[..2].copy_from_slice(&(decoded.seq as u16).to_le_bytes());
                    payload[2] = 0;
                    payload.extend_from_slice(&[0x05, 0x00]);
                    inject(&driver2, decoded.kind | IS_ACK, 99, decoded.sub_cmd, &payload);
                    return;
                }
                std::thread::sleep(std::time::Duration::from_millis(1));
            }
        });

        let mut response = [0u8; 8];
        // process() must run to drain the injected ACK; poll it from this
        // thread while the worker injects.
        let deadline = std::time::Instant::now() + std::time::Duration::from_secs(2);
        let result = loop {
            transport.process();
            match transport.send_sync(2, 0x50, b"", &mut response, 5) {
                Err(e) if e.is(ErrorKind::Timeout) && std::time::Instant::now() < deadline => continue,
                other => break other,
            }
        };
        worker.join().unwrap();
        let (status, len) = result.unwrap();
        assert_eq!(status, 0);
        assert_eq!(&response[..len], &[0x05, 0x00]);
    }

    #[test]
    fn sync_slots_exhausted_returns_busy_without_blocking() {
        // `send_sync` frees its slot before returning, success or timeout, so
        // a sequential loop of calls never actually holds more than one slot
        // at a time. Exhausting all `SYNC_SLOT_COUNT` slots for real needs
        // that many calls in flight *concurrently*, each blocked on a
        // semaphore nothing will ever signal -- hence the long timeout and
        // the barrier instead of just looping `send_sync` in this thread.
        let driver = std::sync::Arc::new(LoopbackDriver::default());
        let transport = std::sync::Arc::new(LinkTransport::init(
            SimRtos::new(),
            driver,
            TransportConfig::default(),
        ));
        let barrier = std::sync::Arc::new(std::sync::Barrier::new(SYNC_SLOT_COUNT + 1));

        let holders: Vec<_> = (0..SYNC_SLOT_COUNT)
            .map(|_| {
                let transport = transport.clone();
                let barrier = barrier.clone();
                std::thread::spawn(move || {
                    barrier.wait();
                    let mut buf = [0u8; 4];
                    let _ = transport.send_sync(2, 0x50, b"", &mut buf, 60_000);
                })
            })
            .collect();

        barrier.wait();
        // Give the holder threads a chance to actually acquire their slots
        // before this thread tries the one that should find them all taken.
        std::thread::sleep(std::time::Duration::from_millis(50));

        let mut buf = [0u8; 4];
        let err = transport.send_sync(2, 0x50, b"", &mut buf, 0).unwrap_err();
        assert!(err.is(ErrorKind::Busy));

        // Unblock the holders: inject ACKs for every outstanding seq so none
        // of them waits out the full 60s timeout.
        let driver = transport.driver.borrow().clone();
        let sent_seqs: Vec<u8> = driver
            .sent
            .lock()
            .unwrap()
            .iter()
            .filter_map(|f| framing::decode(f).ok())
            .map(|f| f.seq)
            .collect();
        for seq in sent_seqs {
            let mut payload = vec![0u8; 3];
            payload[..2].copy_from_slice(&(seq as u16).to_le_bytes());
            payload[2] = 0;
            inject(&driver, 2 | IS_ACK, 200, 0x50, &payload);
        }
        transport.process();
        for h in holders {
            h.join().unwrap();
        }
    }

    #[test]
    fn unknown_callback_sub_cmd_still_gets_an_ack() {
        let driver = std::sync::Arc::new(LoopbackDriver::default());
        let transport = LinkTransport::init(SimRtos::new(), driver.clone(), TransportConfig::default());
        inject(&driver, 2, 7, 0x99, b"");
        transport.process();
        let sent = driver.sent.lock().unwrap();
        let ack = framing::decode(sent.last().unwrap()).unwrap();
        assert_eq!(ack.kind & IS_ACK, IS_ACK);
    }
}
