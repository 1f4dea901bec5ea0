// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! A trivial stand-in for the graphics host on the other end of the link.
//!
//! This workspace has no real display driver to talk to; `FarEnd` plays the
//! minimum role a compliant far end must (ACK every `ACK_REQUIRED` frame,
//! hand back a plausible canvas id for `create_canvas`) so `runtime`'s own
//! demo binary and integration tests can exercise [`rt_renderer::RendererProxy`]
//! end to end without a second process.

use crate::driver::LoopbackDriver;
use rt_gfx::SUB_CMD_CREATE_CANVAS;
use rt_link::{decode, encode, EncodedFrame, ACK_REQUIRED, IS_ACK};
use std::sync::atomic::{AtomicBool, AtomicU16, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

/// Drives a [`LoopbackDriver`] from a background thread: every frame with
/// `ACK_REQUIRED` set gets an ACK back, `create_canvas` requests get a
/// freshly minted canvas id.
pub struct FarEnd {
    stop: Arc<AtomicBool>,
    join: Option<JoinHandle<()>>,
}

impl FarEnd {
    pub fn spawn(driver: Arc<LoopbackDriver>) -> Self {
        let stop = Arc::new(AtomicBool::new(false));
        let stop_flag = stop.clone();
        let next_canvas_id = AtomicU16::new(1);
        let mut acked = 0usize;
        let join = std::thread::spawn(move || {
            while !stop_flag.load(Ordering::Relaxed) {
                let sent = driver.sent_frames();
                while acked < sent.len() {
                    Self::maybe_ack(&driver, &sent[acked], &next_canvas_id);
                    acked += 1;
                }
                std::thread::sleep(Duration::from_millis(2));
            }
        });
        FarEnd { stop, join: Some(join) }
    }

    fn maybe_ack(driver: &Arc<LoopbackDriver>, frame: &EncodedFrame, next_canvas_id: &AtomicU16) {
        let Ok(decoded) = decode(frame) else { return };
        if decoded.kind & ACK_REQUIRED == 0 {
            return;
        }
        let mut response = [0u8; 4];
        let response_len = if decoded.sub_cmd == SUB_CMD_CREATE_CANVAS {
            let id = next_canvas_id.fetch_add(1, Ordering::Relaxed);
            response[0..2].copy_from_slice(&id.to_le_bytes());
            2
        } else {
            0
        };
        let mut payload = Vec::with_capacity(3 + response_len);
        payload.extend_from_slice(&(decoded.seq as u16).to_le_bytes());
        payload.push(0); // status: ok
        payload.extend_from_slice(&response[..response_len]);

        let mut ack = EncodedFrame::new();
        if encode(decoded.kind | IS_ACK, decoded.seq, decoded.sub_cmd, &payload, &mut ack).is_ok() {
            driver.inject(ack);
        }
    }
}

impl Drop for FarEnd {
    fn drop(&mut self) {
        self.stop.store(true, Ordering::Relaxed);
        if let Some(j) = self.join.take() {
            let _ = j.join();
        }
    }
}
