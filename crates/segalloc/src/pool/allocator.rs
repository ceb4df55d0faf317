//! Main pool allocator implementation
//!
//! # Safety
//!
//! The pool threads intrusive free lists through memory it obtained from the
//! primary tier:
//! - Every pooled block lies inside a grant recorded in the arena's chunk
//!   ledger, at an offset that is a multiple of [`ALIGN`]
//! - A block is either on exactly one free list or owned by exactly one
//!   caller
//! - The caller must hand a block back with the size it was requested with;
//!   a different size files the block under the wrong class
//!
//! ## Invariants
//!
//! - `arena.remaining()` is a multiple of [`ALIGN`] and, whenever a refill
//!   needs to grow the arena, smaller than the requested block size, so a
//!   folded remainder always maps onto an exact size class
//! - Grants are returned to the primary tier only when the pool is dropped

use core::alloc::GlobalAlloc;
use core::ptr::{self, NonNull};
use std::alloc::System;

#[cfg(feature = "logging")]
use tracing::{debug, trace, warn};

use super::arena::Arena;
use super::free_list::FreeList;
use super::stats::PoolStats;
use crate::config::PoolConfig;
use crate::error::{AllocResult, MemoryError};
use crate::primary::{FailureHandler, PrimaryAllocator, unrecoverable};
use crate::size_class::{
    ALIGN, NUM_CLASSES, block_size, checked_round_up, class_index, class_size, is_pooled,
};
use crate::stats::AllocatorStats;
use crate::traits::{MemoryUsage, StatisticsProvider};

/// Segregated free-list allocator for small requests
///
/// Requests up to [`MAX_BYTES`](crate::size_class::MAX_BYTES) are rounded up
/// to a size class and served from that class's free list. Empty lists are
/// refilled in batches carved out of an arena that grows from the primary
/// tier; everything larger is forwarded to the primary tier unchanged.
///
/// # Memory Layout
/// ```text
/// grant from primary tier
/// [blk][blk][blk][blk][blk] ... [   arena: uncommitted   ]
///   ↓         ↓    ↓                ↑ start        end ↑
/// caller   free → free → null
/// ```
///
/// The pool is a single-owner object: every operation takes `&mut self`.
/// Wrap it in [`LockedPool`](crate::locked::LockedPool) to share it between
/// threads.
pub struct PoolAllocator<H: GlobalAlloc = System> {
    primary: PrimaryAllocator<H>,
    free_lists: [FreeList; NUM_CLASSES],
    arena: Arena,
    config: PoolConfig,
    stats: AllocatorStats,
}

// SAFETY: PoolAllocator owns every block reachable from its free lists and
// arena; the raw pointers are never shared with another pool. Moving the pool
// to another thread moves that ownership with it. It is not Sync because all
// mutation goes through &mut self.
unsafe impl<H: GlobalAlloc + Send> Send for PoolAllocator<H> {}

impl PoolAllocator<System> {
    /// Creates a pool over the system heap with the default configuration
    pub fn new() -> Self {
        Self::from_parts(PrimaryAllocator::new(), PoolConfig::default())
    }

    /// Creates a pool over the system heap with custom configuration
    ///
    /// # Errors
    /// Returns [`MemoryError::InvalidConfig`] if `config` fails validation.
    pub fn with_config(config: PoolConfig) -> AllocResult<Self> {
        Self::with_primary(PrimaryAllocator::new(), config)
    }
}

impl Default for PoolAllocator<System> {
    fn default() -> Self {
        Self::new()
    }
}

impl<H: GlobalAlloc> PoolAllocator<H> {
    /// Creates a pool on top of an existing primary tier
    ///
    /// # Errors
    /// Returns [`MemoryError::InvalidConfig`] if `config` fails validation.
    pub fn with_primary(primary: PrimaryAllocator<H>, config: PoolConfig) -> AllocResult<Self> {
        config.validate()?;
        Ok(Self::from_parts(primary, config))
    }

    fn from_parts(primary: PrimaryAllocator<H>, config: PoolConfig) -> Self {
        Self {
            primary,
            free_lists: [const { FreeList::new() }; NUM_CLASSES],
            arena: Arena::new(),
            config,
            stats: AllocatorStats::new(),
        }
    }

    /// The primary tier backing this pool
    pub fn primary(&self) -> &PrimaryAllocator<H> {
        &self.primary
    }

    pub fn config(&self) -> &PoolConfig {
        &self.config
    }

    /// Installs the primary tier's failure handler, returning the previous one
    pub fn set_failure_handler(&self, handler: Option<FailureHandler>) -> Option<FailureHandler> {
        self.primary.set_failure_handler(handler)
    }

    // ========================================================================
    // Allocation
    // ========================================================================

    /// Allocates `size` bytes
    ///
    /// Never returns null. Terminates the process if neither the pool nor the
    /// primary tier can satisfy the request.
    pub fn allocate(&mut self, size: usize) -> NonNull<u8> {
        match self.try_allocate(size) {
            Ok(ptr) => ptr,
            Err(err) => unrecoverable(&err, size),
        }
    }

    /// Fallible form of [`allocate`](Self::allocate)
    ///
    /// # Errors
    /// - [`MemoryError::AllocationFailed`] if the arena cannot grow and the
    ///   primary tier gives up
    /// - [`MemoryError::SizeOverflow`] if the growth request overflows
    pub fn try_allocate(&mut self, size: usize) -> AllocResult<NonNull<u8>> {
        let result = self.obtain(size);
        if self.config.track_stats {
            match result {
                Ok(_) => self.stats.record_allocation(size),
                Err(_) => self.stats.record_failure(),
            }
        }
        result
    }

    /// Returns `ptr` to the pool (or to the primary tier for large sizes)
    ///
    /// # Safety
    /// - `ptr` must come from this pool's `allocate` / `try_allocate` /
    ///   reallocate variants and must not be used afterwards
    /// - `size` must equal the size the block was requested (or last resized)
    ///   with. This is not checked: a different size corrupts the free lists.
    pub unsafe fn deallocate(&mut self, ptr: NonNull<u8>, size: usize) {
        if self.config.track_stats {
            self.stats.record_deallocation(size);
        }
        // SAFETY: forwarded caller contract.
        unsafe { self.release(ptr, size) };
    }

    /// Serves `size` bytes from the right tier and paints the alloc pattern
    fn obtain(&mut self, size: usize) -> AllocResult<NonNull<u8>> {
        let ptr = if is_pooled(size) {
            self.allocate_pooled(size)?
        } else {
            self.primary.try_allocate(size)?
        };
        if let Some(pattern) = self.config.alloc_pattern {
            // SAFETY: ptr is a fresh block of at least footprint(size) bytes
            // owned by the caller now.
            unsafe { ptr::write_bytes(ptr.as_ptr(), pattern, footprint(size)) };
        }
        Ok(ptr)
    }

    fn allocate_pooled(&mut self, size: usize) -> AllocResult<NonNull<u8>> {
        let class = class_index(size);
        match self.free_lists[class].pop() {
            Some(block) => Ok(block),
            None => self.refill(class_size(class)),
        }
    }

    /// Paints the dealloc pattern and hands `ptr` back to the tier it came
    /// from
    ///
    /// # Safety
    /// Same contract as [`deallocate`](Self::deallocate).
    unsafe fn release(&mut self, ptr: NonNull<u8>, size: usize) {
        if let Some(pattern) = self.config.dealloc_pattern {
            // SAFETY: the caller still hands us footprint(size) live bytes.
            unsafe { ptr::write_bytes(ptr.as_ptr(), pattern, footprint(size)) };
        }

        if is_pooled(size) {
            // SAFETY: ptr is a block of class_index(size) handed back by its
            // owner (caller contract), aligned to ALIGN and large enough for
            // the link word.
            unsafe { self.free_lists[class_index(size)].push(ptr) };
        } else {
            // SAFETY: large blocks come straight from the primary tier with
            // this size (caller contract).
            unsafe { self.primary.deallocate(ptr, size) };
        }
    }

    /// Resizes a block, preserving `min(old_size, new_size)` bytes
    ///
    /// Never returns null. Terminates the process if the request cannot be
    /// satisfied.
    ///
    /// # Safety
    /// Same as [`try_reallocate`](Self::try_reallocate).
    pub unsafe fn reallocate(
        &mut self,
        ptr: NonNull<u8>,
        old_size: usize,
        new_size: usize,
    ) -> NonNull<u8> {
        // SAFETY: forwarded caller contract.
        match unsafe { self.try_reallocate(ptr, old_size, new_size) } {
            Ok(ptr) => ptr,
            Err(err) => unrecoverable(&err, new_size),
        }
    }

    /// Fallible form of [`reallocate`](Self::reallocate)
    ///
    /// - Both sizes above the ceiling: resized by the primary tier
    /// - Both sizes in the same class: `ptr` is returned unchanged
    /// - Otherwise: allocate, copy, deallocate
    ///
    /// On error the original block is left untouched.
    ///
    /// # Safety
    /// Same contract as [`deallocate`](Self::deallocate) for `ptr` and
    /// `old_size`.
    pub unsafe fn try_reallocate(
        &mut self,
        ptr: NonNull<u8>,
        old_size: usize,
        new_size: usize,
    ) -> AllocResult<NonNull<u8>> {
        if !is_pooled(old_size) && !is_pooled(new_size) {
            // SAFETY: ptr is a live primary-tier block of old_size bytes.
            let resized = unsafe { self.primary.try_reallocate(ptr, old_size, new_size) };
            if self.config.track_stats {
                match resized {
                    Ok(_) => self.stats.record_reallocation(old_size, new_size),
                    Err(_) => self.stats.record_failure(),
                }
            }
            return resized;
        }

        let same_block = is_pooled(old_size)
            && is_pooled(new_size)
            && block_size(old_size) == block_size(new_size);
        if same_block {
            if self.config.track_stats {
                self.stats.record_reallocation(old_size, new_size);
            }
            return Ok(ptr);
        }

        let new_ptr = match self.obtain(new_size) {
            Ok(new_ptr) => new_ptr,
            Err(err) => {
                if self.config.track_stats {
                    self.stats.record_failure();
                }
                return Err(err);
            }
        };
        let copy_size = old_size.min(new_size);
        // SAFETY: the old block holds old_size live bytes, the new one at
        // least new_size, and they are distinct blocks.
        unsafe { ptr::copy_nonoverlapping(ptr.as_ptr(), new_ptr.as_ptr(), copy_size) };
        // SAFETY: forwarded caller contract.
        unsafe { self.release(ptr, old_size) };
        if self.config.track_stats {
            self.stats.record_reallocation(old_size, new_size);
        }
        Ok(new_ptr)
    }

    // ========================================================================
    // Refill
    // ========================================================================

    /// Obtains a batch of `size`-byte blocks, returns the first and threads
    /// the rest onto the class's free list
    fn refill(&mut self, size: usize) -> AllocResult<NonNull<u8>> {
        let mut nobjs = self.config.batch_size;
        let chunk = self.chunk_alloc(size, &mut nobjs)?;

        #[cfg(feature = "logging")]
        trace!(block_size = size, blocks = nobjs, "refilled free list");

        if nobjs > 1 {
            // SAFETY: chunk_alloc committed nobjs * size bytes starting at
            // chunk; the first block goes to the caller, the other nobjs - 1
            // are unused, ALIGN-aligned and at least one pointer wide.
            unsafe {
                self.free_lists[class_index(size)].push_chain(chunk.add(size), size, nobjs - 1);
            }
        }
        Ok(chunk)
    }

    /// Commits up to `*nobjs` blocks of `size` bytes from the arena
    ///
    /// On return `*nobjs` holds the number of blocks actually committed,
    /// which is at least one. Grows the arena when it cannot supply a single
    /// block: the leftover is folded onto its free list, then a grant of
    /// `2 * nobjs * size + round_up(heap_size >> growth_shift)` bytes is
    /// requested. If the heap refuses, a block of a larger class is
    /// repurposed as the arena; if none is free, the primary tier's handler
    /// path is the last resort.
    fn chunk_alloc(&mut self, size: usize, nobjs: &mut usize) -> AllocResult<NonNull<u8>> {
        loop {
            let total = size
                .checked_mul(*nobjs)
                .ok_or_else(|| MemoryError::size_overflow("refill batch"))?;
            let left = self.arena.remaining();

            if left >= total {
                return Ok(self.arena.carve(total));
            }
            if left >= size {
                *nobjs = left / size;
                return Ok(self.arena.carve(*nobjs * size));
            }

            let bytes_to_get = self.growth_request(total)?;
            self.fold_remainder();

            if let Some(grant) = self.primary.allocate_once(bytes_to_get) {
                self.arena.install_grant(grant, bytes_to_get);

                #[cfg(feature = "logging")]
                debug!(
                    bytes = bytes_to_get,
                    heap_size = self.arena.heap_size(),
                    "grew pool arena"
                );
                continue;
            }

            #[cfg(feature = "logging")]
            warn!(
                bytes = bytes_to_get,
                block_size = size,
                "system heap refused arena growth, scavenging larger classes"
            );

            if self.scavenge(size) {
                continue;
            }

            let grant = self.primary.try_allocate(bytes_to_get)?;
            self.arena.install_grant(grant, bytes_to_get);

            #[cfg(feature = "logging")]
            debug!(
                bytes = bytes_to_get,
                heap_size = self.arena.heap_size(),
                "grew pool arena after failure handler"
            );
        }
    }

    /// Size of the next arena grant for a batch of `total` bytes
    fn growth_request(&self, total: usize) -> AllocResult<usize> {
        checked_round_up(self.arena.heap_size() >> self.config.growth_shift)
            .and_then(|increment| total.checked_mul(2)?.checked_add(increment))
            .ok_or_else(|| MemoryError::size_overflow("arena growth request"))
    }

    /// Moves what is left of the arena onto the free list of its exact size
    fn fold_remainder(&mut self) {
        if let Some((rest, len)) = self.arena.take_remainder() {
            debug_assert!(len % ALIGN == 0 && is_pooled(len));

            #[cfg(feature = "logging")]
            debug!(bytes = len, "folding arena remainder into free list");

            // SAFETY: rest is the unused tail of a grant, ALIGN-aligned and
            // exactly len bytes, a whole block of class_index(len).
            unsafe { self.free_lists[class_index(len)].push(rest) };
        }
    }

    /// Repurposes one free block of a class larger than `size` as the arena
    fn scavenge(&mut self, size: usize) -> bool {
        for class in class_index(size) + 1..NUM_CLASSES {
            if let Some(block) = self.free_lists[class].pop() {
                self.arena.install_block(block, class_size(class));
                return true;
            }
        }
        false
    }

    // ========================================================================
    // Introspection
    // ========================================================================

    /// Number of free blocks on the list of size class `class`
    ///
    /// Out-of-range classes report zero.
    pub fn free_list_len(&self, class: usize) -> usize {
        self.free_lists.get(class).map_or(0, FreeList::len)
    }

    /// Uncommitted bytes left in the current arena
    pub fn arena_remaining(&self) -> usize {
        self.arena.remaining()
    }

    /// Bytes obtained from the primary tier over the pool's lifetime
    pub fn heap_size(&self) -> usize {
        self.arena.heap_size()
    }

    pub fn stats(&self) -> PoolStats {
        let mut free_blocks = [0; NUM_CLASSES];
        for (count, list) in free_blocks.iter_mut().zip(&self.free_lists) {
            *count = list.len();
        }
        PoolStats {
            heap_size: self.arena.heap_size(),
            arena_remaining: self.arena.remaining(),
            free_blocks,
            chunk_count: self.arena.chunks().len(),
        }
    }
}

/// Bytes a caller may touch in the block serving a request of `size`
#[inline]
fn footprint(size: usize) -> usize {
    if is_pooled(size) {
        block_size(size)
    } else {
        size
    }
}

impl<H: GlobalAlloc> Drop for PoolAllocator<H> {
    fn drop(&mut self) {
        for chunk in self.arena.take_chunks() {
            // SAFETY: every chunk was granted by self.primary with exactly
            // this size and is never freed anywhere else.
            unsafe { self.primary.deallocate(chunk.ptr, chunk.size) };
        }
    }
}

impl<H: GlobalAlloc> core::fmt::Debug for PoolAllocator<H> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("PoolAllocator")
            .field("heap_size", &self.arena.heap_size())
            .field("arena_remaining", &self.arena.remaining())
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl<H: GlobalAlloc> MemoryUsage for PoolAllocator<H> {
    fn used_memory(&self) -> usize {
        self.stats().used_bytes()
    }

    fn available_memory(&self) -> Option<usize> {
        let stats = self.stats();
        Some(stats.free_bytes() + stats.arena_remaining)
    }

    fn total_memory(&self) -> Option<usize> {
        Some(self.arena.heap_size())
    }
}

impl<H: GlobalAlloc> StatisticsProvider for PoolAllocator<H> {
    fn statistics(&self) -> AllocatorStats {
        self.stats
    }

    fn reset_statistics(&mut self) {
        self.stats.reset();
    }

    fn statistics_enabled(&self) -> bool {
        self.config.track_stats
    }
}
