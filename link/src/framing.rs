// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Link framing (§4.5): `(type, seq, sub_cmd, payload)` tuples to and from
//! a self-delimiting, integrity-checked byte stream.
//!
//! Wire order per frame, pre-COBS: `type:u8 || seq:u8 || len:u16(LE) ||
//! payload:len || crc32:u32(LE)`. `payload` here is itself a msgpack array
//! `[type, seq, sub_cmd, bin]` (§3 "Link Frame") so out-of-band tooling can
//! inspect a captured frame without also parsing the outer header. COBS
//! makes `0x00` a terminator that can never appear mid-frame, so one
//! corrupted frame can never desynchronize the ones that follow it.

use abi::constants::MAX_FRAME_BYTES;
use abi::{err, ErrorDetail, ErrorKind};
use crc::{Crc, CRC_32_ISO_HDLC};
use heapless::Vec as HVec;
use serde_bytes::{ByteBuf, Bytes};

/// IEEE 802.3 CRC32, seed 0 -- the same polynomial/seed Ethernet and zlib
/// use, and what `crc::CRC_32_ISO_HDLC` names.
const CRC: Crc<u32> = Crc::<u32>::new(&CRC_32_ISO_HDLC);

const HEADER_LEN: usize = 1 + 1 + 2;
const CRC_LEN: usize = 4;

/// Upper bound on a COBS-encoded, `0x00`-terminated frame built from a
/// `MAX_FRAME_BYTES` body.
pub const MAX_ENCODED_BYTES: usize = corncobs::max_encoded_len(MAX_FRAME_BYTES);

/// A COBS-encoded, terminated frame, owned and bounded.
pub type EncodedFrame = HVec<u8, MAX_ENCODED_BYTES>;

/// A decoded frame, owned, bounded by `MAX_FRAME_BYTES`.
pub struct DecodedFrame {
    pub kind: u8,
    pub seq: u8,
    pub sub_cmd: u8,
    pub payload: HVec<u8, MAX_FRAME_BYTES>,
}

fn msgpack_envelope(kind: u8, seq: u8, sub_cmd: u8, payload: &[u8]) -> abi::Result<HVec<u8, MAX_FRAME_BYTES>> {
    let tuple = (kind, seq, sub_cmd, Bytes::new(payload));
    let bytes = rmp_serde::to_vec(&tuple).map_err(|_| err::invalid_param())?;
    let mut out = HVec::new();
    out.extend_from_slice(&bytes)
        .map_err(|_| err::detailed(ErrorKind::InvalidParam, ErrorDetail::FrameTooLarge))?;
    Ok(out)
}

/// Encodes `(kind, seq, sub_cmd, payload)` into a COBS-framed, CRC-protected,
/// `0x00`-terminated byte sequence appended to `out`. Returns the number of
/// bytes appended.
///
/// Refuses (`Err(InvalidParam)`, detail `FrameTooLarge`) before ever
/// touching the encoder if the framed message would exceed
/// `MAX_FRAME_BYTES` -- COBS overhead is bounded by `ceil(n/254) + 1`, so
/// this check is conservative but cheap.
pub fn encode(
    kind: u8,
    seq: u8,
    sub_cmd: u8,
    payload: &[u8],
    out: &mut EncodedFrame,
) -> abi::Result<usize> {
    let msgpack_payload = msgpack_envelope(kind, seq, sub_cmd, payload)?;

    let mut body: HVec<u8, MAX_FRAME_BYTES> = HVec::new();
    body.push(kind).map_err(|_| too_large())?;
    body.push(seq).map_err(|_| too_large())?;
    let len = msgpack_payload.len() as u16;
    body.extend_from_slice(&len.to_le_bytes()).map_err(|_| too_large())?;
    body.extend_from_slice(&msgpack_payload).map_err(|_| too_large())?;

    if body.len() + CRC_LEN > MAX_FRAME_BYTES {
        return Err(too_large());
    }
    let crc = CRC.checksum(&body);
    body.extend_from_slice(&crc.to_le_bytes()).map_err(|_| too_large())?;

    let encoded_cap = corncobs::max_encoded_len(body.len());
    if out.capacity() - out.len() < encoded_cap {
        return Err(too_large());
    }
    let mut encode_buf = [0u8; MAX_ENCODED_BYTES];
    let n = corncobs::encode_buf(&body, &mut encode_buf[..encoded_cap]);
    out.extend_from_slice(&encode_buf[..n]).map_err(|_| too_large())?;
    Ok(n)
}

fn too_large() -> abi::Error {
    err::detailed(ErrorKind::InvalidParam, ErrorDetail::FrameTooLarge)
}

/// Decodes one COBS-terminated frame (the bytes up to and including the
/// `0x00` terminator) into its header, sub-command, and payload. The CRC is
/// recomputed and checked; a mismatch returns `Err(Checksum)` without
/// touching caller state, per §4.5: a bad frame is dropped, never
/// propagated.
pub fn decode(framed: &[u8]) -> abi::Result<DecodedFrame> {
    let mut scratch: HVec<u8, MAX_FRAME_BYTES> = HVec::new();
    scratch
        .extend_from_slice(framed)
        .map_err(|_| too_large())?;
    let n = corncobs::decode_in_place(&mut scratch).map_err(|_| err::checksum())?;
    let body = &scratch[..n];

    if body.len() < HEADER_LEN + CRC_LEN {
        return Err(err::checksum());
    }
    let (header_and_payload, crc_bytes) = body.split_at(body.len() - CRC_LEN);
    let expected_crc = u32::from_le_bytes(crc_bytes.try_into().unwrap());
    let actual_crc = CRC.checksum(header_and_payload);
    if actual_crc != expected_crc {
        return Err(err::checksum());
    }

    let kind = header_and_payload[0];
    let seq = header_and_payload[1];
    let len = u16::from_le_bytes([header_and_payload[2], header_and_payload[3]]) as usize;
    let msgpack_payload = &header_and_payload[HEADER_LEN..];
    if msgpack_payload.len() != len {
        return Err(err::checksum());
    }

    let (env_kind, env_seq, sub_cmd, bytes): (u8, u8, u8, ByteBuf) =
        rmp_serde::from_slice(msgpack_payload).map_err(|_| err::checksum())?;
    if env_kind != kind || env_seq != seq {
        return Err(err::checksum());
    }

    let mut payload = HVec::new();
    payload
        .extend_from_slice(&bytes)
        .map_err(|_| too_large())?;

    Ok(DecodedFrame {
        kind,
        seq,
        sub_cmd,
        payload,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    type Encoded = EncodedFrame;

    #[test]
    fn round_trips_a_payload() {
        let mut out: Encoded = HVec::new();
        encode(2, 7, 0x15, b"fill_rect-args", &mut out).unwrap();

        let decoded = decode(&out).unwrap();
        assert_eq!(decoded.kind, 2);
        assert_eq!(decoded.seq, 7);
        assert_eq!(decoded.sub_cmd, 0x15);
        assert_eq!(&decoded.payload[..], b"fill_rect-args");
    }

    #[test]
    fn encoded_bytes_contain_no_interior_zero() {
        let mut out: Encoded = HVec::new();
        encode(1, 0, 0x01, &[0, 1, 2, 3, 0, 0, 9], &mut out).unwrap();
        assert_eq!(out.last(), Some(&0u8));
        assert!(!out[..out.len() - 1].contains(&0u8));
    }

    #[test]
    fn single_bit_corruption_is_detected() {
        let mut out: Encoded = HVec::new();
        encode(2, 3, 0x10, b"draw_pixel", &mut out).unwrap();
        // Flip a bit well inside the body, away from the terminator.
        out[2] ^= 0x01;

        let err = decode(&out).unwrap_err();
        assert!(err.is(ErrorKind::Checksum));
    }

    #[test]
    fn a_corrupted_frame_does_not_affect_decoding_the_next_one() {
        let mut good: Encoded = HVec::new();
        encode(2, 1, 0x30, b"", &mut good).unwrap();

        let mut bad: Encoded = HVec::new();
        encode(2, 2, 0x31, b"oops", &mut bad).unwrap();
        bad[1] ^= 0xFF;

        assert!(decode(&bad).is_err());
        let decoded = decode(&good).unwrap();
        assert_eq!(decoded.sub_cmd, 0x30);
    }
}
