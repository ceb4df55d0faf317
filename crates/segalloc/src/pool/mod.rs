//! Segregated free-list pool
//!
//! Serves requests up to [`MAX_BYTES`](crate::size_class::MAX_BYTES) from
//! per-class free lists refilled out of an arena that grows from the primary
//! tier. Larger requests pass straight through to the primary tier.
//!
//! ## Modules
//! - `allocator` - `PoolAllocator`: allocate, deallocate, reallocate, refill
//! - `free_list` - intrusive free list threaded through free blocks
//! - `arena` - uncommitted range of the latest grant plus the chunk ledger
//! - `stats` - `PoolStats` snapshot

pub mod allocator;
mod arena;
mod free_list;
pub mod stats;

pub use allocator::PoolAllocator;
pub use stats::PoolStats;
