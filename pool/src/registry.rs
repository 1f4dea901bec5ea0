// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! The pool registry: a slotmap of [`Allocator`]s keyed by [`PoolHandle`].
//!
//! A handle is a capability token, not an index to do arithmetic on (§9
//! design notes); it carries a generation so a handle captured before a
//! `destroy_handle`/reuse cannot silently address whatever pool reuses that
//! slot next. The registry mutex and each pool's own mutex are distinct,
//! matching the lock-order rule: registry first, to find the pool, then
//! released before the pool's own mutex is taken for the actual operation.

use crate::allocator::{Allocator, PoolStats};
use abi::err;
use core::cell::RefCell;
use core::ptr::NonNull;
use rt_rtos::{Rtos, Ticks};

/// Upper bound on simultaneously live pools: one per process slot plus a
/// handful of fixed system pools.
pub const MAX_POOLS: usize = 16;

/// Capability token for one pool. Carries a generation so a stale handle
/// from a torn-down pool is rejected rather than silently aliasing whatever
/// reused that slot.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct PoolHandle {
    index: u16,
    generation: u16,
}

struct Slot {
    generation: u16,
    allocator: Allocator,
}

/// Registry of live pools, generic over the RTOS that backs its per-pool
/// mutexes.
pub struct PoolRegistry<R: Rtos> {
    rtos: R,
    registry_sem: R::Sem,
    slots: RefCell<[Option<(Slot, R::Sem)>; MAX_POOLS]>,
    generation_counter: RefCell<u16>,
}

impl<R: Rtos> PoolRegistry<R> {
    pub fn new(rtos: R) -> Self {
        let registry_sem = rtos.sem_mutex();
        PoolRegistry {
            rtos,
            registry_sem,
            slots: RefCell::new(core::array::from_fn(|_| None)),
            generation_counter: RefCell::new(0),
        }
    }

    fn with_registry<T>(&self, body: impl FnOnce() -> T) -> T {
        rt_rtos::with_mutex(&self.rtos, self.registry_sem, body)
    }

    /// Places a pool over `region`, per `fmrb_malloc_create_handle`'s shape:
    /// validate, construct the allocator in-place, assign a handle under the
    /// registry mutex.
    ///
    /// # Safety
    /// `region` must point to `len` bytes this registry may exclusively own
    /// and keep alive until the matching `destroy_handle`.
    pub unsafe fn create_handle(&self, region: NonNull<u8>, len: usize) -> abi::Result<PoolHandle> {
        if len < Allocator::MIN_REGION {
            return Err(err::detailed(
                abi::ErrorKind::InvalidParam,
                abi::ErrorDetail::PoolTooSmall,
            ));
        }
        let allocator = Allocator::new(region, len)?;
        let pool_sem = self.rtos.sem_mutex();

        self.with_registry(|| {
            let mut slots = self.slots.borrow_mut();
            let free_index = slots.iter().position(Option::is_none);
            let Some(index) = free_index else {
                return Err(err::busy());
            };
            let mut gen = self.generation_counter.borrow_mut();
            *gen = gen.wrapping_add(1);
            let generation = *gen;
            slots[index] = Some((
                Slot {
                    generation,
                    allocator,
                },
                pool_sem,
            ));
            Ok(PoolHandle {
                index: index as u16,
                generation,
            })
        })
    }

    pub fn destroy_handle(&self, handle: PoolHandle) -> abi::Result<()> {
        self.with_registry(|| {
            let mut slots = self.slots.borrow_mut();
            match slots.get_mut(handle.index as usize) {
                Some(entry @ Some(_)) if entry.as_ref().unwrap().0.generation == handle.generation => {
                    let (_, sem) = entry.take().unwrap();
                    self.rtos.sem_delete(sem);
                    Ok(())
                }
                _ => Err(err::detailed(
                    abi::ErrorKind::NotFound,
                    abi::ErrorDetail::UnknownPoolHandle,
                )),
            }
        })
    }

    /// Looks up `handle`'s pool mutex under the registry lock, then releases
    /// the registry lock before taking the pool mutex for the actual
    /// allocator operation -- the same "release before the slow part"
    /// discipline the bus uses for queue sends.
    fn with_pool<T>(
        &self,
        handle: PoolHandle,
        body: impl FnOnce(&mut Allocator) -> T,
    ) -> abi::Result<T> {
        let pool_sem = self.with_registry(|| {
            let slots = self.slots.borrow();
            match slots.get(handle.index as usize) {
                Some(Some((slot, sem))) if slot.generation == handle.generation => Ok(*sem),
                _ => Err(err::detailed(
                    abi::ErrorKind::NotFound,
                    abi::ErrorDetail::UnknownPoolHandle,
                )),
            }
        })?;

        self.rtos.sem_take(pool_sem, Ticks::FOREVER);
        let result = {
            let mut slots = self.slots.borrow_mut();
            match slots.get_mut(handle.index as usize) {
                Some(Some((slot, sem))) if slot.generation == handle.generation && *sem == pool_sem => {
                    Ok(body(&mut slot.allocator))
                }
                _ => Err(err::detailed(
                    abi::ErrorKind::NotFound,
                    abi::ErrorDetail::UnknownPoolHandle,
                )),
            }
        };
        self.rtos.sem_give(pool_sem);
        result
    }

    pub fn malloc(&self, handle: PoolHandle, n: usize) -> abi::Result<Option<NonNull<u8>>> {
        self.with_pool(handle, |a| a.malloc(n))
    }

    pub fn calloc(&self, handle: PoolHandle, n: usize) -> abi::Result<Option<NonNull<u8>>> {
        self.with_pool(handle, |a| a.calloc(n))
    }

    /// # Safety
    /// `ptr`, if `Some`, must be a live allocation from this `handle`.
    pub unsafe fn realloc(
        &self,
        handle: PoolHandle,
        ptr: Option<NonNull<u8>>,
        n: usize,
    ) -> abi::Result<Option<NonNull<u8>>> {
        self.with_pool(handle, |a| unsafe { a.realloc(ptr, n) })
    }

    /// `free(_, None)` is a no-op, matching `fmrb_free(handle, NULL)`.
    ///
    /// # Safety
    /// `ptr`, if `Some`, must be a live allocation from this `handle`.
    pub unsafe fn free(&self, handle: PoolHandle, ptr: Option<NonNull<u8>>) -> abi::Result<()> {
        self.with_pool(handle, |a| unsafe { a.free(ptr) })
    }

    pub fn stats(&self, handle: PoolHandle) -> abi::Result<PoolStats> {
        self.with_pool(handle, |a| a.stats())
    }

    pub fn check(&self, handle: PoolHandle) -> abi::Result<()> {
        self.with_pool(handle, |a| a.check())?
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rt_rtos::sim::SimRtos;
    use std::alloc::{alloc, dealloc, Layout};

    fn region(size: usize) -> (NonNull<u8>, Layout) {
        let layout = Layout::from_size_align(size, 8).unwrap();
        (NonNull::new(unsafe { alloc(layout) }).unwrap(), layout)
    }

    #[test]
    fn destroyed_handle_is_rejected_not_reused_silently() {
        let registry = PoolRegistry::new(SimRtos::new());
        let (r1, _l1) = region(4096);
        let h1 = unsafe { registry.create_handle(r1, 4096).unwrap() };
        registry.destroy_handle(h1).unwrap();

        let err = registry.malloc(h1, 16).unwrap_err();
        assert!(err.is(abi::ErrorKind::NotFound));
    }

    #[test]
    fn pool_isolation_two_pools_never_alias() {
        let registry = PoolRegistry::new(SimRtos::new());
        let (r1, _l1) = region(4096);
        let (r2, _l2) = region(4096);
        let h1 = unsafe { registry.create_handle(r1, 4096).unwrap() };
        let h2 = unsafe { registry.create_handle(r2, 4096).unwrap() };

        let p1 = registry.malloc(h1, 256).unwrap().unwrap();
        let p2 = registry.malloc(h2, 256).unwrap().unwrap();

        unsafe {
            p1.as_ptr().write_bytes(0xAA, 256);
            p2.as_ptr().write_bytes(0x55, 256);
        }
        unsafe {
            assert_eq!(core::slice::from_raw_parts(p1.as_ptr(), 256)[0], 0xAA);
            assert_eq!(core::slice::from_raw_parts(p2.as_ptr(), 256)[0], 0x55);
        }
    }

    #[test]
    fn free_of_null_is_a_no_op() {
        let registry = PoolRegistry::new(SimRtos::new());
        let (r1, _l1) = region(4096);
        let h1 = unsafe { registry.create_handle(r1, 4096).unwrap() };
        unsafe { registry.free(h1, None).unwrap() };
    }
}
