// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Spawn attributes (§4.8 spawn step 1: "validate attributes").

use crate::vmhost::NativeEntry;
use abi::constants::{DEFAULT_QUEUE_CAPACITY, MAX_NAME_LEN};
use abi::{err, LoadMode, ProcessKind, VmKind};
use rt_rtos::{Priority, Rtos};

/// Window geometry for a process's canvas, or headless. §3: "values ignored
/// when headless".
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct WindowConfig {
    pub headless: bool,
    pub width: u16,
    pub height: u16,
    pub x: i16,
    pub y: i16,
}

impl WindowConfig {
    pub const HEADLESS: WindowConfig = WindowConfig {
        headless: true,
        width: 0,
        height: 0,
        x: 0,
        y: 0,
    };

    pub(crate) fn is_valid(&self) -> bool {
        if self.headless {
            self.width == 0 && self.height == 0 && self.x == 0 && self.y == 0
        } else {
            self.width > 0 && self.height > 0
        }
    }
}

/// Where a process's code comes from, resolved down to what the process
/// table can actually act on: either an in-memory blob, or a native
/// function pointer. `LoadMode::File` is resolved to `Bytecode` by the
/// [`crate::Spawner`] before this ever reaches the table (§4.9) -- the
/// table itself never touches a filesystem.
pub enum LoadSource<'a, R: Rtos> {
    Bytecode(&'a [u8]),
    Native(NativeEntry<R>),
}

/// Everything `ProcessTable::spawn` needs to place one process.
pub struct SpawnAttr<'a, R: Rtos> {
    /// `Some(n)` pins the spawn to slot `n` (must be `Free`); `None` scans
    /// for any free user-app slot, per §4.8 spawn step 2.
    pub slot_id: Option<u8>,
    pub kind: ProcessKind,
    pub vm_kind: VmKind,
    pub name: &'a str,
    /// Recorded on the slot for `ps` purposes even though `load` below is
    /// already resolved; see the design notes' `load_mode + load_data` pair.
    pub load_mode: LoadMode,
    pub load: LoadSource<'a, R>,
    pub stack_words: usize,
    pub priority: Priority,
    pub affinity: i8,
    pub window: WindowConfig,
    pub queue_capacity: usize,
}

impl<'a, R: Rtos> SpawnAttr<'a, R> {
    /// Stack size range and priority ceiling are this workspace's own
    /// sanity bounds; the spec leaves the exact numbers to the board, only
    /// requiring that *some* sane range is enforced (§4.8 step 1).
    const MIN_STACK_WORDS: usize = 64;
    const MAX_STACK_WORDS: usize = 16384;
    const MAX_PRIORITY: Priority = 31;

    pub(crate) fn validate(&self) -> abi::Result<()> {
        if self.name.is_empty() || self.name.len() >= MAX_NAME_LEN {
            return Err(err::invalid_param());
        }
        if !(Self::MIN_STACK_WORDS..=Self::MAX_STACK_WORDS).contains(&self.stack_words) {
            return Err(err::invalid_param());
        }
        if self.priority > Self::MAX_PRIORITY {
            return Err(err::invalid_param());
        }
        if !self.window.is_valid() {
            return Err(err::invalid_param());
        }
        if self.queue_capacity == 0 {
            return Err(err::invalid_param());
        }
        match (&self.vm_kind, &self.load) {
            (VmKind::Native, LoadSource::Native(_)) => {}
            (VmKind::Native, LoadSource::Bytecode(_)) => return Err(err::invalid_param()),
            (VmKind::MRuby | VmKind::Lua, LoadSource::Bytecode(_)) => {}
            (VmKind::MRuby | VmKind::Lua, LoadSource::Native(_)) => return Err(err::invalid_param()),
        }
        Ok(())
    }
}

impl<'a, R: Rtos> Default for SpawnAttr<'a, R> {
    fn default() -> Self {
        SpawnAttr {
            slot_id: None,
            kind: ProcessKind::UserApp,
            vm_kind: VmKind::Native,
            name: "",
            load_mode: LoadMode::Bytecode,
            load: LoadSource::Bytecode(&[]),
            stack_words: 2048,
            priority: 8,
            affinity: -1,
            window: WindowConfig::HEADLESS,
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
        }
    }
}
