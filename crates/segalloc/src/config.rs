//! Allocator configuration
//!
//! [`PoolConfig`] carries the tuning knobs of the pool tier (refill batch
//! size, arena growth rate, debug fill patterns). [`PrimaryConfig`] carries
//! the retry policy of the system-heap tier.

use crate::error::{MemoryError, MemoryResult};
use crate::size_class::MAX_BYTES;

/// Blocks requested from the arena per refill
pub const DEFAULT_BATCH_SIZE: usize = 20;

/// Arena growth adds `heap_size >> DEFAULT_GROWTH_SHIFT` on top of twice the
/// requested batch
pub const DEFAULT_GROWTH_SHIFT: u32 = 4;

/// Largest accepted [`PoolConfig::batch_size`]
///
/// Keeps `2 * batch_size * MAX_BYTES` plus the growth increment within
/// `isize::MAX`, so an arena growth request always forms a valid layout.
pub const MAX_BATCH_SIZE: usize = isize::MAX as usize / (4 * MAX_BYTES);

/// Failure-handler invocations allowed per request before giving up
pub const DEFAULT_MAX_HANDLER_RETRIES: usize = 1024;

/// Configuration for pool allocator
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolConfig {
    /// Number of blocks a refill asks the arena for
    pub batch_size: usize,

    /// Shift applied to the cumulative heap size to get the extra growth
    /// increment of every new arena grant
    pub growth_shift: u32,

    /// Enable statistics tracking
    pub track_stats: bool,

    /// Fill pattern byte for newly allocated memory (for debugging)
    pub alloc_pattern: Option<u8>,
    /// Fill pattern byte for deallocated memory (for debugging)
    pub dealloc_pattern: Option<u8>,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            batch_size: DEFAULT_BATCH_SIZE,
            growth_shift: DEFAULT_GROWTH_SHIFT,
            track_stats: cfg!(debug_assertions),
            alloc_pattern: if cfg!(debug_assertions) {
                Some(0xBB)
            } else {
                None
            },
            dealloc_pattern: if cfg!(debug_assertions) {
                Some(0xDD)
            } else {
                None
            },
        }
    }
}

impl PoolConfig {
    /// Production configuration - optimized for performance
    #[must_use]
    pub fn production() -> Self {
        Self {
            batch_size: DEFAULT_BATCH_SIZE,
            growth_shift: DEFAULT_GROWTH_SHIFT,
            track_stats: false,
            alloc_pattern: None,
            dealloc_pattern: None,
        }
    }

    /// Debug configuration - optimized for debugging
    #[must_use]
    pub fn debug() -> Self {
        Self {
            batch_size: DEFAULT_BATCH_SIZE,
            growth_shift: DEFAULT_GROWTH_SHIFT,
            track_stats: true,
            alloc_pattern: Some(0xBB),
            dealloc_pattern: Some(0xDD),
        }
    }

    /// Performance configuration - larger refills, faster arena growth
    #[must_use]
    pub fn performance() -> Self {
        Self {
            batch_size: 64,
            growth_shift: 3,
            track_stats: false,
            alloc_pattern: None,
            dealloc_pattern: None,
        }
    }

    /// Sets the refill batch size
    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size;
        self
    }

    /// Sets the arena growth shift
    pub fn with_growth_shift(mut self, growth_shift: u32) -> Self {
        self.growth_shift = growth_shift;
        self
    }

    /// Enables or disables statistics tracking
    pub fn with_stats(mut self, track_stats: bool) -> Self {
        self.track_stats = track_stats;
        self
    }

    /// Checks that the configuration describes a usable pool
    pub fn validate(&self) -> MemoryResult<()> {
        if self.batch_size == 0 {
            return Err(MemoryError::invalid_config(
                "batch_size must be at least 1",
            ));
        }
        if self.batch_size > MAX_BATCH_SIZE {
            return Err(MemoryError::invalid_config(&format!(
                "batch_size must not exceed {MAX_BATCH_SIZE}"
            )));
        }
        if self.growth_shift >= usize::BITS {
            return Err(MemoryError::invalid_config(&format!(
                "growth_shift must be below {}",
                usize::BITS
            )));
        }
        Ok(())
    }
}

/// Configuration for the system-heap tier
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PrimaryConfig {
    /// How many times the failure handler may run for a single request.
    /// `None` keeps retrying for as long as a handler is registered.
    pub max_handler_retries: Option<usize>,
}

impl Default for PrimaryConfig {
    fn default() -> Self {
        Self {
            max_handler_retries: Some(DEFAULT_MAX_HANDLER_RETRIES),
        }
    }
}

impl PrimaryConfig {
    /// Retry through the failure handler until the heap gives in or the
    /// handler is unregistered
    #[must_use]
    pub fn unbounded() -> Self {
        Self {
            max_handler_retries: None,
        }
    }

    /// Sets the per-request handler retry budget
    pub fn with_max_handler_retries(mut self, retries: usize) -> Self {
        self.max_handler_retries = Some(retries);
        self
    }

    pub fn validate(&self) -> MemoryResult<()> {
        if self.max_handler_retries == Some(0) {
            return Err(MemoryError::invalid_config(
                "max_handler_retries must be at least 1; use None for unbounded retries",
            ));
        }
        Ok(())
    }
}
