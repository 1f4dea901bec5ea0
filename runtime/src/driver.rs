// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! A host-only loopback [`FrameDriver`] standing in for the UART/socket a
//! board would use to reach the graphics host (§4.5/§4.6). Nothing in this
//! workspace has a real display to talk to, so whatever drives the "far
//! end" of the link -- a test thread or [`crate::farend::FarEnd`] -- reads
//! `sent_frames`/calls `inject` directly.

use rt_link::{EncodedFrame, FrameDriver};
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

#[derive(Default)]
pub struct LoopbackDriver {
    inbox: Mutex<VecDeque<EncodedFrame>>,
    sent: Mutex<Vec<EncodedFrame>>,
}

impl LoopbackDriver {
    pub fn new() -> Arc<Self> {
        Arc::new(LoopbackDriver::default())
    }

    /// Queues `encoded` as if it had just arrived from the far end.
    pub fn inject(&self, encoded: EncodedFrame) {
        self.inbox.lock().unwrap().push_back(encoded);
    }

    /// Every frame written so far, oldest first.
    pub fn sent_frames(&self) -> Vec<EncodedFrame> {
        self.sent.lock().unwrap().clone()
    }
}

impl FrameDriver for Arc<LoopbackDriver> {
    fn write_frame(&mut self, encoded: &[u8]) -> abi::Result<()> {
        let mut f = EncodedFrame::new();
        f.extend_from_slice(encoded).map_err(|_| abi::err::invalid_param())?;
        self.sent.lock().unwrap().push(f);
        Ok(())
    }

    fn poll_frame(&mut self, out: &mut EncodedFrame) -> bool {
        match self.inbox.lock().unwrap().pop_front() {
            Some(f) => {
                let _ = out.extend_from_slice(&f);
                true
            }
            None => false,
        }
    }
}
