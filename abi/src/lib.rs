// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Shared wire- and ABI-level types for the runtime core.
//!
//! Nothing in this crate knows about RTOS primitives, pool allocation, or the
//! link transport. It exists so that `rt-process`, `rt-bus`, `rt-link`, and
//! `rt-gfx` can agree on identities, the error taxonomy, and the shape of a
//! bus message without depending on each other.

#![cfg_attr(not(test), no_std)]

mod error;
mod ident;
mod kinds;
mod message;

pub mod constants;

pub use error::{err, Error, ErrorDetail, ErrorKind};
pub use ident::{Generation, ProcessId, ProcessRef, SlotIndex};
pub use kinds::{LoadMode, ProcessKind, ProcessState, VmKind};
pub use message::{Message, MessageClass};

/// Common result alias used across every component of the core.
pub type Result<T> = core::result::Result<T, Error>;
