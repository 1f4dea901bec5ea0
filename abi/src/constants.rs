// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Build-time configuration constants (§6 "Configuration (enumerated)").
//!
//! These are plain `const`s rather than a runtime config struct: the process
//! table, bus registry, and link transport are all backed by fixed-size
//! arrays sized from these at compile time, matching the fixed-slot-cap
//! design (no dynamic process count beyond the configured cap).

/// Size of the process slot table.
pub const MAX_PROCESSES: usize = 8;
/// Number of `UserApp` slots among `MAX_PROCESSES`.
pub const MAX_USER_APPS: usize = 3;

/// Maximum bytes in a single bus message payload.
pub const PAYLOAD_CAP: usize = 256;
/// Default per-process queue capacity.
pub const DEFAULT_QUEUE_CAPACITY: usize = 10;

/// Default link transport request timeout, in milliseconds.
pub const DEFAULT_LINK_TIMEOUT_MS: u32 = 1000;
/// Default retransmit attempts before a pending send is abandoned.
pub const DEFAULT_MAX_RETRIES: u8 = 3;
/// Default transport window size (informational; the transport itself does
/// not enforce cross-sequence ordering).
pub const DEFAULT_WINDOW_SIZE: u16 = 8;
/// Number of synchronous request-tracking slots.
pub const SYNC_SLOT_COUNT: usize = 4;
/// Number of outgoing messages that may be awaiting ACK at once.
pub const MAX_PENDING: usize = 16;

/// Largest payload the framing layer will encode. COBS overhead is bounded by
/// `ceil(n/254) + 1`; frames that would not fit after encoding are refused
/// before they are ever handed to the transport driver.
pub const MAX_FRAME_BYTES: usize = 1024;

/// Capacity of the renderer proxy's batched command buffer.
pub const RENDERER_COMMAND_BUFFER_CAPACITY: usize = 128;
/// Renderer proxy receive-loop timeout, in milliseconds.
pub const RENDERER_RECEIVE_TIMEOUT_MS: u32 = 10;
/// Renderer proxy periodic "update" tick interval, in milliseconds.
pub const RENDERER_TICK_MS: u32 = 16;

/// Maximum length of a process name, including the NUL terminator.
pub const MAX_NAME_LEN: usize = 32;
/// Maximum length of a filesystem-path process source.
pub const MAX_PATH_LEN: usize = 256;
/// Maximum UTF-8 bytes in a single draw-string command before truncation.
pub const MAX_TEXT_LEN: usize = 255;
