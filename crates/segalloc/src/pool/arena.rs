//! Bump arena feeding the free lists
//!
//! The arena is the uncommitted tail of the most recent grant: a contiguous
//! range that refills carve whole blocks out of. It also remembers every
//! grant obtained from the primary tier so the pool can hand them back when
//! it is dropped.

use core::ptr::NonNull;

/// A region obtained from the primary tier
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct Chunk {
    pub(crate) ptr: NonNull<u8>,
    pub(crate) size: usize,
}

#[derive(Debug)]
pub(crate) struct Arena {
    /// First uncommitted byte; dangling while `remaining == 0`
    start: NonNull<u8>,
    remaining: usize,
    /// Bytes obtained from the primary tier over the pool's lifetime
    heap_size: usize,
    chunks: Vec<Chunk>,
}

impl Arena {
    pub(crate) const fn new() -> Self {
        Self {
            start: NonNull::dangling(),
            remaining: 0,
            heap_size: 0,
            chunks: Vec::new(),
        }
    }

    pub(crate) fn remaining(&self) -> usize {
        self.remaining
    }

    pub(crate) fn heap_size(&self) -> usize {
        self.heap_size
    }

    pub(crate) fn chunks(&self) -> &[Chunk] {
        &self.chunks
    }

    /// Commits the first `bytes` of the arena
    ///
    /// Panics in debug builds if the arena holds fewer than `bytes`.
    pub(crate) fn carve(&mut self, bytes: usize) -> NonNull<u8> {
        debug_assert!(bytes <= self.remaining);
        let block = self.start;
        // SAFETY: bytes <= remaining, so the result stays inside (or one
        // past the end of) the current grant.
        self.start = unsafe { self.start.add(bytes) };
        self.remaining -= bytes;
        block
    }

    /// Empties the arena, returning what was left of it
    pub(crate) fn take_remainder(&mut self) -> Option<(NonNull<u8>, usize)> {
        if self.remaining == 0 {
            return None;
        }
        let rest = (self.start, self.remaining);
        self.start = NonNull::dangling();
        self.remaining = 0;
        Some(rest)
    }

    /// Installs a fresh grant from the primary tier
    pub(crate) fn install_grant(&mut self, ptr: NonNull<u8>, size: usize) {
        debug_assert_eq!(self.remaining, 0);
        self.chunks.push(Chunk { ptr, size });
        self.heap_size = self.heap_size.saturating_add(size);
        self.start = ptr;
        self.remaining = size;
    }

    /// Installs a block scavenged from a larger free list
    ///
    /// The block already belongs to a recorded grant, so neither the ledger
    /// nor `heap_size` changes.
    pub(crate) fn install_block(&mut self, ptr: NonNull<u8>, size: usize) {
        debug_assert_eq!(self.remaining, 0);
        self.start = ptr;
        self.remaining = size;
    }

    /// Forgets every grant, returning the ledger
    pub(crate) fn take_chunks(&mut self) -> Vec<Chunk> {
        self.start = NonNull::dangling();
        self.remaining = 0;
        core::mem::take(&mut self.chunks)
    }
}
