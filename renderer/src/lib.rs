// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! The renderer proxy (§4.10): the one process that ever touches the link.
//!
//! Every other process's graphics calls arrive here as bus messages; this
//! crate batches the draw primitives into a bounded buffer and only talks to
//! [`rt_link::LinkTransport`] when the buffer fills, a frame is presented, or
//! an explicit canvas op or create-canvas request needs the wire.
#![cfg_attr(not(test), no_std)]

mod proxy;

pub use proxy::{RendererProxy, SUB_CMD_INIT_DISPLAY, SUB_CMD_UPDATE};
