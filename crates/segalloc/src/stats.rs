//! Allocator statistics tracking
//!
//! Plain counters kept by the pool tier when
//! [`PoolConfig::track_stats`](crate::config::PoolConfig::track_stats) is on.
//! The pool is never shared without its lock, so no atomics are needed.

/// Statistics for memory allocators
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AllocatorStats {
    /// Total bytes currently allocated
    pub allocated_bytes: usize,
    /// Peak bytes allocated
    pub peak_allocated_bytes: usize,
    /// Total number of allocations
    pub allocation_count: usize,
    /// Total number of deallocations
    pub deallocation_count: usize,
    /// Total number of reallocations
    pub reallocation_count: usize,
    /// Number of failed allocations
    pub failed_allocations: usize,
    /// Total bytes ever allocated (cumulative)
    pub total_bytes_allocated: usize,
    /// Total bytes ever deallocated (cumulative)
    pub total_bytes_deallocated: usize,
}

impl AllocatorStats {
    /// Creates a new empty stats object
    pub const fn new() -> Self {
        Self {
            allocated_bytes: 0,
            peak_allocated_bytes: 0,
            allocation_count: 0,
            deallocation_count: 0,
            reallocation_count: 0,
            failed_allocations: 0,
            total_bytes_allocated: 0,
            total_bytes_deallocated: 0,
        }
    }

    /// Reset all statistics to zero
    pub fn reset(&mut self) {
        *self = Self::new();
    }

    pub(crate) fn record_allocation(&mut self, size: usize) {
        self.allocation_count += 1;
        self.total_bytes_allocated = self.total_bytes_allocated.saturating_add(size);
        self.allocated_bytes = self.allocated_bytes.saturating_add(size);
        self.peak_allocated_bytes = self.peak_allocated_bytes.max(self.allocated_bytes);
    }

    pub(crate) fn record_deallocation(&mut self, size: usize) {
        self.deallocation_count += 1;
        self.total_bytes_deallocated = self.total_bytes_deallocated.saturating_add(size);
        self.allocated_bytes = self.allocated_bytes.saturating_sub(size);
    }

    /// A resize counts as one reallocation; the byte totals move by the
    /// difference only
    pub(crate) fn record_reallocation(&mut self, old_size: usize, new_size: usize) {
        self.reallocation_count += 1;
        if new_size >= old_size {
            let grown = new_size - old_size;
            self.total_bytes_allocated = self.total_bytes_allocated.saturating_add(grown);
            self.allocated_bytes = self.allocated_bytes.saturating_add(grown);
            self.peak_allocated_bytes = self.peak_allocated_bytes.max(self.allocated_bytes);
        } else {
            let shrunk = old_size - new_size;
            self.total_bytes_deallocated = self.total_bytes_deallocated.saturating_add(shrunk);
            self.allocated_bytes = self.allocated_bytes.saturating_sub(shrunk);
        }
    }

    pub(crate) fn record_failure(&mut self) {
        self.failed_allocations += 1;
    }

    /// Calculate the average allocation size
    pub fn average_allocation_size(&self) -> Option<f64> {
        if self.allocation_count > 0 {
            Some(self.total_bytes_allocated as f64 / self.allocation_count as f64)
        } else {
            None
        }
    }

    /// Calculate current allocation efficiency (0.0 to 1.0)
    /// Higher values indicate fewer failed allocations
    pub fn allocation_efficiency(&self) -> f64 {
        let total_attempts = self.allocation_count + self.failed_allocations;
        if total_attempts > 0 {
            self.allocation_count as f64 / total_attempts as f64
        } else {
            1.0
        }
    }
}

impl Default for AllocatorStats {
    fn default() -> Self {
        Self::new()
    }
}

impl core::fmt::Display for AllocatorStats {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        writeln!(f, "Allocator Statistics:")?;
        writeln!(f, "  Current allocated: {} bytes", self.allocated_bytes)?;
        writeln!(f, "  Peak allocated: {} bytes", self.peak_allocated_bytes)?;
        writeln!(f, "  Allocations: {}", self.allocation_count)?;
        writeln!(f, "  Deallocations: {}", self.deallocation_count)?;
        writeln!(f, "  Reallocations: {}", self.reallocation_count)?;
        writeln!(f, "  Failed allocations: {}", self.failed_allocations)?;

        if let Some(avg) = self.average_allocation_size() {
            writeln!(f, "  Average allocation size: {avg:.2} bytes")?;
        }

        writeln!(
            f,
            "  Allocation efficiency: {:.2}%",
            self.allocation_efficiency() * 100.0
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_record_cycle() {
        let mut stats = AllocatorStats::new();
        stats.record_allocation(64);
        stats.record_allocation(32);
        assert_eq!(stats.allocated_bytes, 96);
        assert_eq!(stats.peak_allocated_bytes, 96);

        stats.record_deallocation(64);
        assert_eq!(stats.allocated_bytes, 32);
        assert_eq!(stats.peak_allocated_bytes, 96);
        assert_eq!(stats.allocation_count, 2);
        assert_eq!(stats.deallocation_count, 1);
        assert_eq!(stats.average_allocation_size(), Some(48.0));
    }

    #[test]
    fn test_reallocation_moves_by_difference() {
        let mut stats = AllocatorStats::new();
        stats.record_allocation(16);
        stats.record_reallocation(16, 48);
        assert_eq!(stats.allocated_bytes, 48);
        assert_eq!(stats.peak_allocated_bytes, 48);

        stats.record_reallocation(48, 8);
        assert_eq!(stats.allocated_bytes, 8);
        assert_eq!(stats.total_bytes_deallocated, 40);
        assert_eq!(stats.reallocation_count, 2);
    }

    #[test]
    fn test_efficiency() {
        let mut stats = AllocatorStats::new();
        assert_eq!(stats.allocation_efficiency(), 1.0);
        stats.record_allocation(8);
        stats.record_failure();
        assert_eq!(stats.allocation_efficiency(), 0.5);

        stats.reset();
        assert_eq!(stats, AllocatorStats::default());
    }
}
