//! Pool allocator statistics

use crate::size_class::{NUM_CLASSES, class_size};

/// Snapshot of the pool's free lists and arena
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolStats {
    /// Bytes obtained from the primary tier over the pool's lifetime
    pub heap_size: usize,
    /// Uncommitted bytes left in the current arena
    pub arena_remaining: usize,
    /// Free blocks per size class
    pub free_blocks: [usize; NUM_CLASSES],
    /// Arena grants recorded in the chunk ledger
    pub chunk_count: usize,
}

impl PoolStats {
    /// Bytes sitting on free lists
    pub fn free_bytes(&self) -> usize {
        self.free_blocks
            .iter()
            .enumerate()
            .map(|(class, &count)| count * class_size(class))
            .sum()
    }

    /// Bytes carved out of grants and currently handed out to callers
    pub fn used_bytes(&self) -> usize {
        self.heap_size
            .saturating_sub(self.free_bytes())
            .saturating_sub(self.arena_remaining)
    }
}

impl core::fmt::Display for PoolStats {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        writeln!(f, "Pool Statistics:")?;
        writeln!(f, "  Heap size: {} bytes in {} chunks", self.heap_size, self.chunk_count)?;
        writeln!(f, "  Arena remaining: {} bytes", self.arena_remaining)?;
        writeln!(f, "  Free bytes: {}", self.free_bytes())?;
        writeln!(f, "  In use: {} bytes", self.used_bytes())?;
        for (class, &count) in self.free_blocks.iter().enumerate() {
            if count > 0 {
                writeln!(f, "  {:>3}-byte blocks free: {count}", class_size(class))?;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_byte_accounting() {
        let mut free_blocks = [0; NUM_CLASSES];
        free_blocks[0] = 3; // 24 bytes
        free_blocks[15] = 1; // 128 bytes
        let stats = PoolStats {
            heap_size: 1024,
            arena_remaining: 100,
            free_blocks,
            chunk_count: 2,
        };
        assert_eq!(stats.free_bytes(), 152);
        assert_eq!(stats.used_bytes(), 1024 - 152 - 100);

        let report = stats.to_string();
        assert!(report.contains("  8-byte blocks free: 3"));
        assert!(report.contains("128-byte blocks free: 1"));
    }
}
