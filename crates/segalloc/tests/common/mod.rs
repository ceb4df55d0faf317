//! System heap test doubles shared by the integration tests
//!
//! Failure handlers are plain `fn()`s, so the state they manipulate lives in
//! a `static HeapControl` owned by each test.

#![allow(dead_code)]

use std::alloc::{GlobalAlloc, Layout, System};
use std::ptr;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

/// Switches and counters behind a [`ControlledHeap`]
pub struct HeapControl {
    refuse: AtomicBool,
    attempts: AtomicUsize,
    frees: AtomicUsize,
}

impl HeapControl {
    pub const fn new() -> Self {
        Self {
            refuse: AtomicBool::new(false),
            attempts: AtomicUsize::new(0),
            frees: AtomicUsize::new(0),
        }
    }

    /// Makes every following request fail (`true`) or succeed (`false`)
    pub fn set_refuse(&self, refuse: bool) {
        self.refuse.store(refuse, Ordering::SeqCst);
    }

    /// Allocation requests seen so far, refused ones included
    pub fn attempts(&self) -> usize {
        self.attempts.load(Ordering::SeqCst)
    }

    pub fn frees(&self) -> usize {
        self.frees.load(Ordering::SeqCst)
    }
}

/// System heap that counts requests and can be told to refuse them
pub struct ControlledHeap(pub &'static HeapControl);

unsafe impl GlobalAlloc for ControlledHeap {
    unsafe fn alloc(&self, layout: Layout) -> *mut u8 {
        self.0.attempts.fetch_add(1, Ordering::SeqCst);
        if self.0.refuse.load(Ordering::SeqCst) {
            ptr::null_mut()
        } else {
            unsafe { System.alloc(layout) }
        }
    }

    unsafe fn dealloc(&self, ptr: *mut u8, layout: Layout) {
        self.0.frees.fetch_add(1, Ordering::SeqCst);
        unsafe { System.dealloc(ptr, layout) };
    }
}

/// Bytes of the block backing a request of `size`, as the pool hands it out
pub fn footprint(size: usize) -> usize {
    if size <= segalloc::size_class::MAX_BYTES {
        segalloc::size_class::block_size(size)
    } else {
        size
    }
}
