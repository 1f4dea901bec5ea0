// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! The process slot table (§4.8), its spawn attributes (§4.8 step 1), the
//! VM capability set (§9), and the name/path spawner in front of it all
//! (§4.9).
#![cfg_attr(not(test), no_std)]

mod attr;
mod slot;
mod spawner;
mod table;
mod vmhost;

pub use attr::{LoadSource, SpawnAttr, WindowConfig};
pub use slot::ProcessInfo;
pub use spawner::{BuiltinApp, BuiltinSource, FileProxy, Spawner};
pub use table::{ProcessTable, STOP_SENTINEL};
pub use vmhost::{NativeContext, NativeEntry, VmHost};
