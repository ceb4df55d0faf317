//! Intrusive singly-linked free list
//!
//! # Safety
//!
//! A free block stores the link to the next free block in its own first
//! bytes, so the list needs no storage of its own:
//! - Every block on a list is at least `size_of::<*mut u8>()` bytes and
//!   aligned to [`ALIGN`](crate::size_class::ALIGN)
//! - A block is on at most one list, and never while it is handed out
//! - The list never touches memory past the link word

use core::ptr::NonNull;

/// Node in the free list
///
/// When a block is free, its first bytes hold a pointer to the next free
/// block of the same class.
#[repr(C)]
struct FreeBlock {
    next: Option<NonNull<Self>>,
}

/// LIFO list of free blocks of one size class
#[derive(Debug)]
pub(crate) struct FreeList {
    head: Option<NonNull<FreeBlock>>,
    len: usize,
}

impl FreeList {
    pub(crate) const fn new() -> Self {
        Self { head: None, len: 0 }
    }

    pub(crate) fn len(&self) -> usize {
        self.len
    }

    /// Detaches the head block
    pub(crate) fn pop(&mut self) -> Option<NonNull<u8>> {
        let head = self.head?;
        // SAFETY: Reading the link of the head block.
        // - head was pushed by push/push_chain, whose contracts make it a
        //   live, aligned block large enough for the link word
        // - the block has not been handed out since (it is still listed)
        self.head = unsafe { head.as_ref().next };
        self.len -= 1;
        Some(head.cast())
    }

    /// Makes `block` the new head
    ///
    /// # Safety
    /// - `block` must be valid for writes of one pointer and aligned for it
    /// - `block` must not be on any list or in use by a caller
    pub(crate) unsafe fn push(&mut self, block: NonNull<u8>) {
        let block = block.cast::<FreeBlock>();
        // SAFETY: caller guarantees block is writable, aligned and unused.
        unsafe { block.as_ptr().write(FreeBlock { next: self.head }) };
        self.head = Some(block);
        self.len += 1;
    }

    /// Threads `count` consecutive blocks of `block_size` bytes starting at
    /// `start` onto the list, in address order
    ///
    /// The last threaded block links to the previous head.
    ///
    /// # Safety
    /// - `[start, start + count * block_size)` must be writable memory that
    ///   nothing else references
    /// - `start` and `block_size` must keep every block pointer-aligned, and
    ///   `block_size` must hold at least one pointer
    pub(crate) unsafe fn push_chain(
        &mut self,
        start: NonNull<u8>,
        block_size: usize,
        count: usize,
    ) {
        let mut next = self.head;
        for i in (0..count).rev() {
            // SAFETY: i * block_size < count * block_size, inside the region
            // the caller handed over.
            let block = unsafe { start.add(i * block_size) }.cast::<FreeBlock>();
            // SAFETY: block lies in the caller's region and is aligned.
            unsafe { block.as_ptr().write(FreeBlock { next }) };
            next = Some(block);
        }
        self.head = next;
        self.len += count;
    }
}
