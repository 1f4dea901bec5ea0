// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! The composition root crate: boots every other crate in the workspace
//! over a single [`rt_rtos::sim::SimRtos`] and exposes the result as
//! [`System`].
//!
//! This crate is host-only (it is the one member of the workspace that is
//! not `no_std`): nothing here runs on a board, it is the harness that
//! proves the rest of the workspace composes into a working whole, and the
//! demo binary a board integration would replace with its own boot glue
//! (§1: "Any CLI, boot glue ... are non-core").

pub mod driver;
pub mod farend;
pub mod system;

pub use driver::LoopbackDriver;
pub use farend::FarEnd;
pub use system::{NoFiles, System, UnsupportedVm};
