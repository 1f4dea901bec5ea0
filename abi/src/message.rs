// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! The fixed-size message carried by every bus queue.
//!
//! The payload is an inline array, not a pointer: the RTOS queue primitive
//! copies the whole item by value, and a pointer here would reintroduce
//! ownership questions the rest of the design deliberately avoids.

use crate::constants::PAYLOAD_CAP;
use crate::ident::ProcessId;

/// The class of a bus message, carried in the wire header as `type: u16`.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
#[repr(u16)]
pub enum MessageClass {
    AppControl = 1,
    AppGraphics = 2,
    AppAudio = 4,
    HidEvent = 128,
    KernelInternal = 255,
}

impl MessageClass {
    pub const fn from_u16(v: u16) -> Option<Self> {
        Some(match v {
            1 => MessageClass::AppControl,
            2 => MessageClass::AppGraphics,
            4 => MessageClass::AppAudio,
            128 => MessageClass::HidEvent,
            255 => MessageClass::KernelInternal,
            _ => return None,
        })
    }
}

/// One bus message: a fixed-size, `Copy` value the RTOS queue can move by
/// `memcpy`. `size` is always `<= PAYLOAD_CAP`; only the first `size` bytes of
/// `data` are meaningful.
#[derive(Clone, Copy)]
pub struct Message {
    pub class: MessageClass,
    pub src_pid: ProcessId,
    pub size: u16,
    pub data: [u8; PAYLOAD_CAP],
}

impl Message {
    /// Builds a message from a class, sender, and a byte slice no longer than
    /// `PAYLOAD_CAP`. Returns `None` if `bytes` overflows the payload.
    pub fn new(class: MessageClass, src_pid: ProcessId, bytes: &[u8]) -> Option<Self> {
        if bytes.len() > PAYLOAD_CAP {
            return None;
        }
        let mut data = [0u8; PAYLOAD_CAP];
        data[..bytes.len()].copy_from_slice(bytes);
        Some(Message {
            class,
            src_pid,
            size: bytes.len() as u16,
            data,
        })
    }

    pub fn payload(&self) -> &[u8] {
        &self.data[..self.size as usize]
    }
}

impl core::fmt::Debug for Message {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Message")
            .field("class", &self.class)
            .field("src_pid", &self.src_pid)
            .field("size", &self.size)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_oversize_payload() {
        let huge = [0u8; PAYLOAD_CAP + 1];
        assert!(Message::new(MessageClass::AppControl, ProcessId(0), &huge).is_none());
    }

    #[test]
    fn round_trips_short_payload() {
        let m = Message::new(MessageClass::AppControl, ProcessId(2), b"hello").unwrap();
        assert_eq!(m.payload(), b"hello");
        assert_eq!(m.size, 5);
    }
}
