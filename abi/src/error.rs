// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! The error taxonomy shared by every component (see the error handling
//! design: one enum of kinds, composed with an optional per-module detail
//! rather than a fresh error type per crate).

use core::fmt;

/// The universal error kinds. None of these is ever a panic: the core is
/// expected to report these up the call stack, not unwind.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ErrorKind {
    /// Caller passed a null/out-of-range/malformed argument.
    InvalidParam,
    /// The operation is legal in principle but not in the current state.
    InvalidState,
    /// Unknown pid, handle, sub_cmd, or path.
    NotFound,
    /// The allocator returned null.
    NoMemory,
    /// A bounded wait expired.
    Timeout,
    /// No resource slot is available right now; the caller may retry.
    Busy,
    /// Frame integrity check failed. Never surfaced past link `process()`.
    Checksum,
    /// Any other non-classifiable failure.
    Failed,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ErrorKind::InvalidParam => "invalid parameter",
            ErrorKind::InvalidState => "invalid state",
            ErrorKind::NotFound => "not found",
            ErrorKind::NoMemory => "out of memory",
            ErrorKind::Timeout => "timed out",
            ErrorKind::Busy => "busy",
            ErrorKind::Checksum => "checksum mismatch",
            ErrorKind::Failed => "failed",
        };
        f.write_str(s)
    }
}

/// Module-specific detail that can ride along with an [`ErrorKind`]. Kept as
/// a single flat enum (rather than one error type per crate) per the shared
/// taxonomy design.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ErrorDetail {
    /// Pool allocator handle was never registered, or was already torn down.
    UnknownPoolHandle,
    /// The region backing a pool is smaller than the minimum pool overhead.
    PoolTooSmall,
    /// A process slot index was out of range of the configured table.
    SlotOutOfRange,
    /// The `(slot, generation)` pair named a process that no longer exists.
    StaleGeneration,
    /// A bus queue capacity of zero was requested.
    ZeroCapacity,
    /// All synchronous request-tracking slots are in use.
    SyncSlotsExhausted,
    /// All outgoing-pending tracking slots are in use.
    PendingSlotsExhausted,
    /// A payload would not fit in `MAX_FRAME_BYTES` once framed.
    FrameTooLarge,
    /// No callback is registered for the given sub-command.
    UnknownSubCommand,
}

impl fmt::Display for ErrorDetail {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ErrorDetail::UnknownPoolHandle => "unknown pool handle",
            ErrorDetail::PoolTooSmall => "pool region too small",
            ErrorDetail::SlotOutOfRange => "slot index out of range",
            ErrorDetail::StaleGeneration => "stale generation",
            ErrorDetail::ZeroCapacity => "zero queue capacity",
            ErrorDetail::SyncSlotsExhausted => "no free sync request slot",
            ErrorDetail::PendingSlotsExhausted => "no free pending-ack slot",
            ErrorDetail::FrameTooLarge => "frame exceeds MAX_FRAME_BYTES",
            ErrorDetail::UnknownSubCommand => "no callback for sub_cmd",
        };
        f.write_str(s)
    }
}

/// An error as returned at any API boundary in the core: a universal kind,
/// plus optional detail for diagnostics.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct Error {
    pub kind: ErrorKind,
    pub detail: Option<ErrorDetail>,
}

impl Error {
    pub const fn new(kind: ErrorKind) -> Self {
        Error { kind, detail: None }
    }

    pub const fn with_detail(kind: ErrorKind, detail: ErrorDetail) -> Self {
        Error {
            kind,
            detail: Some(detail),
        }
    }

    pub fn is(&self, kind: ErrorKind) -> bool {
        self.kind == kind
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.detail {
            Some(d) => write!(f, "{}: {}", self.kind, d),
            None => write!(f, "{}", self.kind),
        }
    }
}

impl From<ErrorKind> for Error {
    fn from(kind: ErrorKind) -> Self {
        Error::new(kind)
    }
}

/// Shorthand constructors, one per kind, mirroring the taxonomy in the error
/// handling design so call sites read as `err::invalid_param()` rather than
/// spelling out the struct literal every time.
pub mod err {
    use super::{Error, ErrorDetail, ErrorKind};

    pub const fn invalid_param() -> Error {
        Error::new(ErrorKind::InvalidParam)
    }
    pub const fn invalid_state() -> Error {
        Error::new(ErrorKind::InvalidState)
    }
    pub const fn not_found() -> Error {
        Error::new(ErrorKind::NotFound)
    }
    pub const fn no_memory() -> Error {
        Error::new(ErrorKind::NoMemory)
    }
    pub const fn timeout() -> Error {
        Error::new(ErrorKind::Timeout)
    }
    pub const fn busy() -> Error {
        Error::new(ErrorKind::Busy)
    }
    pub const fn checksum() -> Error {
        Error::new(ErrorKind::Checksum)
    }
    pub const fn failed() -> Error {
        Error::new(ErrorKind::Failed)
    }
    pub const fn detailed(kind: ErrorKind, detail: ErrorDetail) -> Error {
        Error::with_detail(kind, detail)
    }
}
