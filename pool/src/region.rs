// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! The static memory-region table (§4.2).
//!
//! Stateless aside from the table itself: every region's address and size
//! are fixed at build time. A board integrating this core supplies the
//! backing storage (usually `static mut` arrays placed by the linker) and
//! registers it here before any pool is created over it.

use abi::constants::MAX_USER_APPS;

/// Which static region backs a given pool.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum PoolId {
    System,
    Kernel,
    SystemApp,
    UserApp(u8),
    CompilerScratch,
}

impl PoolId {
    fn table_index(self) -> Option<usize> {
        match self {
            PoolId::System => Some(0),
            PoolId::Kernel => Some(1),
            PoolId::SystemApp => Some(2),
            PoolId::CompilerScratch => Some(3),
            PoolId::UserApp(i) if (i as usize) < MAX_USER_APPS => Some(4 + i as usize),
            PoolId::UserApp(_) => None,
        }
    }
}

const TABLE_LEN: usize = 4 + MAX_USER_APPS;

/// One entry of the region table: a byte range a pool may be created over.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct MemoryRegion {
    pub id: PoolId,
    pub base: usize,
    pub len: usize,
}

/// The region table. `register` is called once per region at startup (by
/// the board integration, not by this crate) before any pool consumes it.
pub struct RegionTable {
    entries: [Option<MemoryRegion>; TABLE_LEN],
}

impl Default for RegionTable {
    fn default() -> Self {
        RegionTable {
            entries: [None; TABLE_LEN],
        }
    }
}

impl RegionTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, id: PoolId, base: usize, len: usize) -> abi::Result<()> {
        let idx = id.table_index().ok_or(abi::err::invalid_param())?;
        self.entries[idx] = Some(MemoryRegion { id, base, len });
        Ok(())
    }

    pub fn get(&self, id: PoolId) -> Option<MemoryRegion> {
        id.table_index().and_then(|idx| self.entries[idx])
    }

    /// Reports which registered region, if any, contains `ptr`. Used by
    /// debug tooling, never by the allocator itself.
    pub fn check_pointer(&self, ptr: usize) -> Option<PoolId> {
        self.entries
            .iter()
            .flatten()
            .find(|r| ptr >= r.base && ptr < r.base.saturating_add(r.len))
            .map(|r| r.id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn check_pointer_finds_owning_region() {
        let mut table = RegionTable::new();
        table.register(PoolId::System, 0x1000, 0x100).unwrap();
        table.register(PoolId::UserApp(0), 0x2000, 0x100).unwrap();

        assert_eq!(table.check_pointer(0x1050), Some(PoolId::System));
        assert_eq!(table.check_pointer(0x2050), Some(PoolId::UserApp(0)));
        assert_eq!(table.check_pointer(0x3000), None);
    }

    #[test]
    fn user_app_index_out_of_range_is_rejected() {
        let mut table = RegionTable::new();
        let err = table
            .register(PoolId::UserApp(MAX_USER_APPS as u8), 0x4000, 0x10)
            .unwrap_err();
        assert!(err.is(abi::ErrorKind::InvalidParam));
    }
}
