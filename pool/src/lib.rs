// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! The pool allocator (§4.1) and the static memory-region table (§4.2).
//!
//! Every process's heap is a pool over its own region; the one exception is
//! the distinguished `System` pool, shared by all processes and reached
//! only through [`SysAlloc::sys_malloc`]/[`SysAlloc::sys_free`] (§4.1:
//! "the only cross-process allocations permitted").
#![cfg_attr(not(test), no_std)]

mod allocator;
mod region;
mod registry;

pub use allocator::PoolStats;
pub use region::{MemoryRegion, PoolId, RegionTable};
pub use registry::{PoolHandle, PoolRegistry, MAX_POOLS};

use core::cell::OnceCell;
use core::ptr::NonNull;
use rt_rtos::Rtos;

/// Wraps a [`PoolRegistry`] with a distinguished `System` handle, so
/// `sys_malloc`/`sys_free` never need the caller to thread a handle through.
pub struct SysAlloc<R: Rtos> {
    registry: PoolRegistry<R>,
    system: OnceCell<PoolHandle>,
}

impl<R: Rtos> SysAlloc<R> {
    pub fn new(rtos: R) -> Self {
        SysAlloc {
            registry: PoolRegistry::new(rtos),
            system: OnceCell::new(),
        }
    }

    pub fn registry(&self) -> &PoolRegistry<R> {
        &self.registry
    }

    /// Must be called exactly once, with the `System` region, before any
    /// `sys_malloc` call. Mirrors `fmrb_init_system_mem`.
    ///
    /// # Safety
    /// See [`PoolRegistry::create_handle`].
    pub unsafe fn init_system(&self, region: NonNull<u8>, len: usize) -> abi::Result<()> {
        let handle = self.registry.create_handle(region, len)?;
        self.system
            .set(handle)
            .map_err(|_| abi::err::invalid_state())
    }

    pub fn sys_malloc(&self, n: usize) -> Option<NonNull<u8>> {
        let handle = *self.system.get()?;
        self.registry.malloc(handle, n).ok().flatten()
    }

    /// # Safety
    /// `ptr`, if `Some`, must be a live allocation from `sys_malloc`.
    pub unsafe fn sys_free(&self, ptr: Option<NonNull<u8>>) {
        if let Some(handle) = self.system.get() {
            let _ = unsafe { self.registry.free(*handle, ptr) };
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rt_rtos::sim::SimRtos;
    use std::alloc::{alloc, Layout};

    #[test]
    fn sys_malloc_before_init_returns_none() {
        let sys = SysAlloc::new(SimRtos::new());
        assert!(sys.sys_malloc(16).is_none());
    }

    #[test]
    fn sys_malloc_after_init_succeeds() {
        let sys = SysAlloc::new(SimRtos::new());
        let layout = Layout::from_size_align(4096, 8).unwrap();
        let region = NonNull::new(unsafe { alloc(layout) }).unwrap();
        unsafe { sys.init_system(region, 4096).unwrap() };

        let p = sys.sys_malloc(128).unwrap();
        unsafe { sys.sys_free(Some(p)) };
    }
}
