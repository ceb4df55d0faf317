//! Two-tier memory allocator for small, short-lived objects
//!
//! Small requests (up to 128 bytes) are rounded up to one of 16 size classes
//! and served from segregated free lists. Empty lists are refilled in
//! batches carved out of an arena that grows geometrically from the system
//! heap. Everything larger goes straight to the system heap.
//!
//! - [`PrimaryAllocator`]: system heap plus a retryable out-of-memory hook
//! - [`PoolAllocator`]: the free-list pool, single owner (`&mut self`)
//! - [`LockedPool`]: the pool behind a mutex, for sharing between threads
//! - [`TypedAllocator`]: "`count` objects of `T`" on top of any [`Allocator`]
//!
//! # Features
//!
//! - `logging` (default): structured events through `tracing` on arena
//!   growth, refills, scavenging and failure-handler invocations
//!
//! # Example
//!
//! ```
//! use segalloc::PoolAllocator;
//!
//! let mut pool = PoolAllocator::new();
//!
//! let block = pool.allocate(24);
//! unsafe {
//!     block.as_ptr().write_bytes(0, 24);
//!     // The same size must be passed back
//!     pool.deallocate(block, 24);
//! }
//!
//! // Freed blocks are reused
//! let again = pool.allocate(24);
//! assert_eq!(again, block);
//! # unsafe { pool.deallocate(again, 24) };
//! ```

#![cfg_attr(docsrs, feature(doc_cfg))]
#![allow(unsafe_code)]

pub mod config;
pub mod error;
pub mod locked;
pub mod pool;
pub mod primary;
pub mod size_class;
pub mod stats;
pub mod traits;
pub mod typed;

pub use config::{PoolConfig, PrimaryConfig};
pub use error::{AllocError, AllocResult, MemoryError, MemoryResult, Result};
pub use locked::LockedPool;
pub use pool::{PoolAllocator, PoolStats};
pub use primary::{FailureHandler, HEAP_ALIGN, PrimaryAllocator};
pub use stats::AllocatorStats;
pub use traits::{Allocator, BasicMemoryUsage, MemoryUsage, StatisticsProvider};
pub use typed::TypedAllocator;

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::config::{PoolConfig, PrimaryConfig};
    pub use crate::error::{MemoryError, MemoryResult};
    pub use crate::locked::LockedPool;
    pub use crate::pool::PoolAllocator;
    pub use crate::primary::{FailureHandler, PrimaryAllocator};
    pub use crate::traits::{Allocator, MemoryUsage, StatisticsProvider};
    pub use crate::typed::TypedAllocator;
}
