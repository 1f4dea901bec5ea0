// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! The link transport's two halves (§4.5, §4.6): framing is stateless and
//! symmetric; the transport on top of it is stateful and owns sequencing,
//! retransmission, and sync waiters.
#![cfg_attr(not(test), no_std)]

pub mod framing;
pub mod transport;

pub use framing::{decode, encode, DecodedFrame, EncodedFrame, MAX_ENCODED_BYTES};
pub use transport::{
    FrameDriver, LinkTransport, TransportConfig, ACK_REQUIRED, CHUNKED, IS_ACK,
};
