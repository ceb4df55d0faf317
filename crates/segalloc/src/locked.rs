//! Thread-safe pool
//!
//! [`PoolAllocator`] is a single-owner object. [`LockedPool`] puts it behind
//! a [`parking_lot::Mutex`] so one pool can serve several threads; every
//! operation holds the lock for its whole duration, including any arena
//! growth.
//!
//! The failure handler runs while the lock is held. A handler that calls
//! back into the same `LockedPool` deadlocks.

use core::alloc::{GlobalAlloc, Layout};
use core::ptr::{self, NonNull};
use std::alloc::System;

use parking_lot::{Mutex, MutexGuard};

use crate::config::PoolConfig;
use crate::error::AllocResult;
use crate::pool::{PoolAllocator, PoolStats};
use crate::primary::{FailureHandler, PrimaryAllocator};
use crate::size_class::ALIGN;
use crate::stats::AllocatorStats;
use crate::traits::{Allocator, StatisticsProvider};

/// Mutex-guarded [`PoolAllocator`]
pub struct LockedPool<H: GlobalAlloc = System> {
    inner: Mutex<PoolAllocator<H>>,
}

impl LockedPool<System> {
    /// Creates a locked pool over the system heap
    pub fn new() -> Self {
        Self::from_pool(PoolAllocator::new())
    }

    /// Creates a locked pool over the system heap with custom configuration
    pub fn with_config(config: PoolConfig) -> AllocResult<Self> {
        PoolAllocator::with_config(config).map(Self::from_pool)
    }
}

impl Default for LockedPool<System> {
    fn default() -> Self {
        Self::new()
    }
}

impl<H: GlobalAlloc> LockedPool<H> {
    /// Creates a locked pool on top of an existing primary tier
    pub fn with_primary(primary: PrimaryAllocator<H>, config: PoolConfig) -> AllocResult<Self> {
        PoolAllocator::with_primary(primary, config).map(Self::from_pool)
    }

    pub fn from_pool(pool: PoolAllocator<H>) -> Self {
        Self {
            inner: Mutex::new(pool),
        }
    }

    /// Locks the pool for a sequence of operations
    pub fn lock(&self) -> MutexGuard<'_, PoolAllocator<H>> {
        self.inner.lock()
    }

    pub fn into_inner(self) -> PoolAllocator<H> {
        self.inner.into_inner()
    }

    /// See [`PoolAllocator::allocate`]
    pub fn allocate(&self, size: usize) -> NonNull<u8> {
        self.inner.lock().allocate(size)
    }

    /// See [`PoolAllocator::try_allocate`]
    pub fn try_allocate(&self, size: usize) -> AllocResult<NonNull<u8>> {
        self.inner.lock().try_allocate(size)
    }

    /// See [`PoolAllocator::deallocate`]
    ///
    /// # Safety
    /// `ptr` must come from this pool and `size` must match its allocation.
    pub unsafe fn deallocate(&self, ptr: NonNull<u8>, size: usize) {
        // SAFETY: forwarded caller contract.
        unsafe { self.inner.lock().deallocate(ptr, size) };
    }

    /// See [`PoolAllocator::reallocate`]
    ///
    /// # Safety
    /// `ptr` must come from this pool and `old_size` must match its allocation.
    pub unsafe fn reallocate(
        &self,
        ptr: NonNull<u8>,
        old_size: usize,
        new_size: usize,
    ) -> NonNull<u8> {
        // SAFETY: forwarded caller contract.
        unsafe { self.inner.lock().reallocate(ptr, old_size, new_size) }
    }

    /// See [`PoolAllocator::try_reallocate`]
    ///
    /// # Safety
    /// `ptr` must come from this pool and `old_size` must match its allocation.
    pub unsafe fn try_reallocate(
        &self,
        ptr: NonNull<u8>,
        old_size: usize,
        new_size: usize,
    ) -> AllocResult<NonNull<u8>> {
        // SAFETY: forwarded caller contract.
        unsafe { self.inner.lock().try_reallocate(ptr, old_size, new_size) }
    }

    pub fn set_failure_handler(&self, handler: Option<FailureHandler>) -> Option<FailureHandler> {
        self.inner.lock().set_failure_handler(handler)
    }

    pub fn stats(&self) -> PoolStats {
        self.inner.lock().stats()
    }

    pub fn statistics(&self) -> AllocatorStats {
        self.inner.lock().statistics()
    }
}

impl<H: GlobalAlloc> core::fmt::Debug for LockedPool<H> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self.inner.try_lock() {
            Some(pool) => f.debug_tuple("LockedPool").field(&*pool).finish(),
            None => f.write_str("LockedPool(<locked>)"),
        }
    }
}

/// Layouts aligned beyond the pool's block alignment go to the primary tier
#[inline]
fn pooled_layout(layout: Layout) -> bool {
    layout.align() <= ALIGN
}

// SAFETY: Routing is a pure function of the layout's alignment.
// - align <= ALIGN: served by the pool, whose blocks are ALIGN-aligned and at
//   least layout.size() bytes
// - align > ALIGN: served by the primary tier with the exact layout
// deallocate sees the same layout, so a block always returns to the tier it
// came from.
unsafe impl<H: GlobalAlloc> Allocator for LockedPool<H> {
    unsafe fn allocate(&self, layout: Layout) -> AllocResult<NonNull<[u8]>> {
        let ptr = if pooled_layout(layout) {
            self.inner.lock().try_allocate(layout.size())?
        } else {
            self.inner.lock().primary().try_allocate_layout(layout)?
        };
        Ok(NonNull::slice_from_raw_parts(ptr, layout.size()))
    }

    unsafe fn deallocate(&self, ptr: NonNull<u8>, layout: Layout) {
        if pooled_layout(layout) {
            // SAFETY: forwarded caller contract; ptr came from the pool path.
            unsafe { self.inner.lock().deallocate(ptr, layout.size()) };
        } else {
            // SAFETY: forwarded caller contract; ptr came from the primary
            // tier with this layout.
            unsafe { self.inner.lock().primary().deallocate_layout(ptr, layout) };
        }
    }

    unsafe fn reallocate(
        &self,
        ptr: NonNull<u8>,
        old_layout: Layout,
        new_layout: Layout,
    ) -> AllocResult<NonNull<[u8]>> {
        if pooled_layout(old_layout) && pooled_layout(new_layout) {
            // SAFETY: forwarded caller contract.
            let resized = unsafe {
                self.inner
                    .lock()
                    .try_reallocate(ptr, old_layout.size(), new_layout.size())?
            };
            return Ok(NonNull::slice_from_raw_parts(resized, new_layout.size()));
        }

        // Crossing tiers: allocate, copy, deallocate
        // SAFETY: forwarded caller contract.
        let new_ptr = unsafe { Allocator::allocate(self, new_layout)? };
        let copy_size = old_layout.size().min(new_layout.size());
        // SAFETY: both regions are live for copy_size bytes and distinct.
        unsafe { ptr::copy_nonoverlapping(ptr.as_ptr(), new_ptr.cast::<u8>().as_ptr(), copy_size) };
        // SAFETY: ptr was allocated with old_layout (caller contract).
        unsafe { Allocator::deallocate(self, ptr, old_layout) };
        Ok(new_ptr)
    }
}
