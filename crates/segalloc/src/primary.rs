//! Primary (system heap) allocator
//!
//! Wraps a [`GlobalAlloc`] (by default [`std::alloc::System`]) with the
//! out-of-memory protocol the pool tier relies on: when the heap refuses a
//! request, the registered [`FailureHandler`] is invoked and the request is
//! retried. Without a handler, or once the retry budget in [`PrimaryConfig`]
//! is spent, the request is unrecoverable.
//!
//! The infallible entry points ([`PrimaryAllocator::allocate`],
//! [`PrimaryAllocator::reallocate`]) never return null: an unrecoverable
//! request terminates the process through [`handle_alloc_error`]. The `try_*`
//! variants report the same condition as [`MemoryError::AllocationFailed`].

use core::alloc::{GlobalAlloc, Layout};
use core::ptr::{self, NonNull};
use std::alloc::{System, handle_alloc_error};

use parking_lot::RwLock;

#[cfg(feature = "logging")]
use tracing::{error, warn};

use crate::config::PrimaryConfig;
use crate::error::{AllocResult, MemoryError};
use crate::traits::Allocator;

/// Alignment of every byte-sized request served by the primary tier
///
/// Matches what C `malloc` guarantees on 64-bit targets, so any block of
/// this tier can hold any scalar type.
pub const HEAP_ALIGN: usize = 16;

/// Out-of-memory hook
///
/// Called when the system heap refuses a request. Its job is to make memory
/// available (drop caches, release reserves, ...) before the request is
/// retried. It must not call back into the allocator that invoked it.
pub type FailureHandler = fn();

/// System heap allocator with a retryable out-of-memory hook
///
/// # Thread Safety
/// The handler slot is guarded by a lock and the heap itself must be a
/// [`GlobalAlloc`], so the allocator is `Sync` whenever `H` is.
pub struct PrimaryAllocator<H = System> {
    heap: H,
    handler: RwLock<Option<FailureHandler>>,
    config: PrimaryConfig,
}

impl PrimaryAllocator<System> {
    /// Creates a primary allocator over the system heap
    pub const fn new() -> Self {
        Self {
            heap: System,
            handler: RwLock::new(None),
            config: PrimaryConfig {
                max_handler_retries: Some(crate::config::DEFAULT_MAX_HANDLER_RETRIES),
            },
        }
    }
}

impl Default for PrimaryAllocator<System> {
    fn default() -> Self {
        Self::new()
    }
}

impl<H: GlobalAlloc> PrimaryAllocator<H> {
    /// Creates a primary allocator over `heap` with the default retry policy
    pub fn with_heap(heap: H) -> Self {
        Self {
            heap,
            handler: RwLock::new(None),
            config: PrimaryConfig::default(),
        }
    }

    /// Creates a primary allocator over `heap` with a custom retry policy
    pub fn with_config(heap: H, config: PrimaryConfig) -> AllocResult<Self> {
        config.validate()?;
        Ok(Self {
            heap,
            handler: RwLock::new(None),
            config,
        })
    }

    /// The underlying heap
    pub fn heap(&self) -> &H {
        &self.heap
    }

    pub fn config(&self) -> &PrimaryConfig {
        &self.config
    }

    /// Installs `handler` and returns the one it replaces
    ///
    /// Passing `None` unregisters the current handler. Returning the previous
    /// value lets callers chain handlers or restore the old one later.
    pub fn set_failure_handler(&self, handler: Option<FailureHandler>) -> Option<FailureHandler> {
        core::mem::replace(&mut *self.handler.write(), handler)
    }

    /// The currently registered handler
    pub fn failure_handler(&self) -> Option<FailureHandler> {
        *self.handler.read()
    }

    /// Allocates `size` bytes, retrying through the failure handler
    ///
    /// Never returns null. Terminates the process if the request cannot be
    /// satisfied.
    pub fn allocate(&self, size: usize) -> NonNull<u8> {
        match self.try_allocate(size) {
            Ok(ptr) => ptr,
            Err(err) => unrecoverable(&err, size),
        }
    }

    /// Fallible form of [`allocate`](Self::allocate)
    pub fn try_allocate(&self, size: usize) -> AllocResult<NonNull<u8>> {
        self.try_allocate_layout(byte_layout(size)?)
    }

    /// Makes exactly one request to the heap, without consulting the handler
    ///
    /// Returns `None` if the heap refuses or `size` cannot form a layout.
    pub fn allocate_once(&self, size: usize) -> Option<NonNull<u8>> {
        let layout = byte_layout(size).ok()?;
        if layout.size() == 0 {
            return Some(dangling(layout));
        }
        // SAFETY: layout has non-zero size (checked above).
        NonNull::new(unsafe { self.heap.alloc(layout) })
    }

    /// Allocates memory for `layout`, retrying through the failure handler
    pub fn try_allocate_layout(&self, layout: Layout) -> AllocResult<NonNull<u8>> {
        if layout.size() == 0 {
            return Ok(dangling(layout));
        }

        // SAFETY: layout has non-zero size (checked above).
        if let Some(ptr) = NonNull::new(unsafe { self.heap.alloc(layout) }) {
            return Ok(ptr);
        }

        // SAFETY: same layout as the first attempt.
        self.retry_with_handler(layout, || unsafe { self.heap.alloc(layout) })
    }

    /// Releases `ptr` back to the heap
    ///
    /// # Safety
    /// - `ptr` must come from [`allocate`](Self::allocate) (or a `try_` /
    ///   reallocate variant) of this allocator
    /// - `size` must be the size that allocation was made with
    pub unsafe fn deallocate(&self, ptr: NonNull<u8>, size: usize) {
        if size == 0 {
            return;
        }
        // SAFETY: the allocation was made with byte_layout(size), which
        // succeeded, so the same parameters form a valid layout.
        let layout = unsafe { Layout::from_size_align_unchecked(size, HEAP_ALIGN) };
        // SAFETY: caller guarantees ptr/size match a live allocation.
        unsafe { self.heap.dealloc(ptr.as_ptr(), layout) };
    }

    /// Releases memory obtained through [`try_allocate_layout`](Self::try_allocate_layout)
    ///
    /// # Safety
    /// `ptr` must be live and allocated by this allocator with `layout`.
    pub unsafe fn deallocate_layout(&self, ptr: NonNull<u8>, layout: Layout) {
        if layout.size() == 0 {
            return;
        }
        // SAFETY: caller guarantees ptr/layout match a live allocation.
        unsafe { self.heap.dealloc(ptr.as_ptr(), layout) };
    }

    /// Resizes an allocation, retrying through the failure handler
    ///
    /// Never returns null. Terminates the process if the request cannot be
    /// satisfied.
    ///
    /// # Safety
    /// Same as [`try_reallocate`](Self::try_reallocate).
    pub unsafe fn reallocate(
        &self,
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
    /// On error the original allocation is left untouched.
    ///
    /// # Safety
    /// - `ptr` must be a live allocation of this allocator
    /// - `old_size` must be the size it was allocated (or last resized) with
    pub unsafe fn try_reallocate(
        &self,
        ptr: NonNull<u8>,
        old_size: usize,
        new_size: usize,
    ) -> AllocResult<NonNull<u8>> {
        let new_layout = byte_layout(new_size)?;
        if old_size == 0 {
            return self.try_allocate_layout(new_layout);
        }
        if new_size == 0 {
            // SAFETY: forwarded caller contract.
            unsafe { self.deallocate(ptr, old_size) };
            return Ok(dangling(new_layout));
        }

        // SAFETY: old allocation was made with this layout.
        let old_layout = unsafe { Layout::from_size_align_unchecked(old_size, HEAP_ALIGN) };
        let attempt = || {
            // SAFETY: ptr is live with old_layout (caller contract); a failed
            // realloc leaves it live, so every retry sees the same state.
            unsafe { self.heap.realloc(ptr.as_ptr(), old_layout, new_size) }
        };
        if let Some(resized) = NonNull::new(attempt()) {
            return Ok(resized);
        }
        self.retry_with_handler(new_layout, attempt)
    }

    /// Runs the handler/retry loop after a first refusal
    fn retry_with_handler(
        &self,
        layout: Layout,
        mut attempt: impl FnMut() -> *mut u8,
    ) -> AllocResult<NonNull<u8>> {
        let mut invocations = 0usize;
        loop {
            // Copy out of the slot so the lock is released before the
            // handler runs; the handler may swap itself out.
            let Some(handler) = self.failure_handler() else {
                return Err(MemoryError::allocation_failed_with_layout(layout));
            };
            if self
                .config
                .max_handler_retries
                .is_some_and(|limit| invocations >= limit)
            {
                return Err(MemoryError::allocation_failed_with_layout(layout));
            }

            #[cfg(feature = "logging")]
            warn!(
                size = layout.size(),
                attempt = invocations + 1,
                "system heap exhausted, invoking failure handler"
            );

            handler();
            invocations += 1;

            if let Some(ptr) = NonNull::new(attempt()) {
                return Ok(ptr);
            }
        }
    }
}

impl<H> core::fmt::Debug for PrimaryAllocator<H> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("PrimaryAllocator")
            .field("handler_registered", &self.handler.read().is_some())
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

// SAFETY: PrimaryAllocator hands out memory straight from the heap.
// - Every pointer comes from H (a GlobalAlloc) or is dangling for size 0
// - deallocate/reallocate forward the caller's layout unchanged
unsafe impl<H: GlobalAlloc> Allocator for PrimaryAllocator<H> {
    unsafe fn allocate(&self, layout: Layout) -> AllocResult<NonNull<[u8]>> {
        let ptr = self.try_allocate_layout(layout)?;
        Ok(NonNull::slice_from_raw_parts(ptr, layout.size()))
    }

    unsafe fn deallocate(&self, ptr: NonNull<u8>, layout: Layout) {
        // SAFETY: forwarded caller contract.
        unsafe { self.deallocate_layout(ptr, layout) };
    }

    unsafe fn reallocate(
        &self,
        ptr: NonNull<u8>,
        old_layout: Layout,
        new_layout: Layout,
    ) -> AllocResult<NonNull<[u8]>> {
        if old_layout.align() == new_layout.align()
            && old_layout.size() > 0
            && new_layout.size() > 0
        {
            let attempt = || {
                // SAFETY: ptr is live with old_layout (caller contract).
                unsafe { self.heap.realloc(ptr.as_ptr(), old_layout, new_layout.size()) }
            };
            let resized = match NonNull::new(attempt()) {
                Some(resized) => resized,
                None => self.retry_with_handler(new_layout, attempt)?,
            };
            return Ok(NonNull::slice_from_raw_parts(resized, new_layout.size()));
        }

        // Fall back to allocate + copy + deallocate
        let new_ptr = self.try_allocate_layout(new_layout)?;
        let copy_size = old_layout.size().min(new_layout.size());
        if copy_size > 0 {
            // SAFETY: both regions are live for copy_size bytes and belong
            // to distinct allocations.
            unsafe { ptr::copy_nonoverlapping(ptr.as_ptr(), new_ptr.as_ptr(), copy_size) };
        }
        // SAFETY: forwarded caller contract.
        unsafe { self.deallocate_layout(ptr, old_layout) };
        Ok(NonNull::slice_from_raw_parts(new_ptr, new_layout.size()))
    }
}

/// Layout of a byte-sized request
fn byte_layout(size: usize) -> AllocResult<Layout> {
    Layout::from_size_align(size, HEAP_ALIGN)
        .map_err(|_| MemoryError::size_overflow("byte layout exceeds isize::MAX"))
}

/// Well-aligned non-null pointer for zero-sized requests
fn dangling(layout: Layout) -> NonNull<u8> {
    // SAFETY: Layout guarantees a non-zero power-of-two alignment.
    unsafe { NonNull::new_unchecked(ptr::without_provenance_mut(layout.align())) }
}

/// Terminates the process after an unrecoverable allocation failure
#[cold]
pub(crate) fn unrecoverable(err: &MemoryError, size: usize) -> ! {
    #[cfg(feature = "logging")]
    error!(size, error = %err, code = err.code(), "unrecoverable allocation failure, aborting");
    #[cfg(not(feature = "logging"))]
    let _ = err;

    match Layout::from_size_align(size, HEAP_ALIGN) {
        Ok(layout) => handle_alloc_error(layout),
        Err(_) => std::process::abort(),
    }
}

#[cfg(test)]
mod tests {
    use core::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

    use super::*;

    /// Heap that refuses everything
    struct RefusingHeap;

    unsafe impl GlobalAlloc for RefusingHeap {
        unsafe fn alloc(&self, _layout: Layout) -> *mut u8 {
            ptr::null_mut()
        }

        unsafe fn dealloc(&self, _ptr: *mut u8, _layout: Layout) {}
    }

    /// Heap that refuses until `RELEASED` is set
    struct ReserveHeap;

    static RELEASED: AtomicBool = AtomicBool::new(false);
    static RELEASE_CALLS: AtomicUsize = AtomicUsize::new(0);

    fn release_reserve() {
        RELEASE_CALLS.fetch_add(1, Ordering::SeqCst);
        RELEASED.store(true, Ordering::SeqCst);
    }

    unsafe impl GlobalAlloc for ReserveHeap {
        unsafe fn alloc(&self, layout: Layout) -> *mut u8 {
            if RELEASED.load(Ordering::SeqCst) {
                unsafe { System.alloc(layout) }
            } else {
                ptr::null_mut()
            }
        }

        unsafe fn dealloc(&self, ptr: *mut u8, layout: Layout) {
            unsafe { System.dealloc(ptr, layout) };
        }
    }

    static NOOP_CALLS: AtomicUsize = AtomicUsize::new(0);

    fn free_nothing() {
        NOOP_CALLS.fetch_add(1, Ordering::SeqCst);
    }

    fn other_handler() {}

    #[test]
    fn test_basic_allocation() {
        let allocator = PrimaryAllocator::new();
        let ptr = allocator.allocate(256);
        assert_eq!(ptr.as_ptr() as usize % HEAP_ALIGN, 0);

        unsafe {
            ptr::write_bytes(ptr.as_ptr(), 0x5A, 256);
            assert_eq!(*ptr.as_ptr().add(255), 0x5A);
            allocator.deallocate(ptr, 256);
        }
    }

    #[test]
    fn test_zero_sized_allocation() {
        let allocator = PrimaryAllocator::new();
        let ptr = allocator.allocate(0);
        assert_eq!(ptr.as_ptr() as usize, HEAP_ALIGN);
        // Should not crash
        unsafe { allocator.deallocate(ptr, 0) };
    }

    #[test]
    fn test_reallocation_preserves_prefix() {
        let allocator = PrimaryAllocator::new();
        let ptr = allocator.allocate(300);

        unsafe {
            for i in 0..300 {
                *ptr.as_ptr().add(i) = i as u8;
            }
            let grown = allocator.reallocate(ptr, 300, 4096);
            for i in 0..300 {
                assert_eq!(*grown.as_ptr().add(i), i as u8);
            }
            let shrunk = allocator.reallocate(grown, 4096, 200);
            for i in 0..200 {
                assert_eq!(*shrunk.as_ptr().add(i), i as u8);
            }
            allocator.deallocate(shrunk, 200);
        }
    }

    #[test]
    fn test_set_failure_handler_returns_previous() {
        let allocator = PrimaryAllocator::new();
        assert!(allocator.failure_handler().is_none());

        assert!(allocator.set_failure_handler(Some(free_nothing)).is_none());
        let previous = allocator.set_failure_handler(Some(other_handler));
        assert_eq!(previous, Some(free_nothing as FailureHandler));

        // Restore
        allocator.set_failure_handler(previous);
        assert_eq!(allocator.failure_handler(), Some(free_nothing as FailureHandler));
    }

    #[test]
    fn test_no_handler_is_unrecoverable() {
        let allocator = PrimaryAllocator::with_heap(RefusingHeap);
        let err = allocator.try_allocate(64).unwrap_err();
        assert_eq!(
            err,
            MemoryError::AllocationFailed {
                size: 64,
                align: HEAP_ALIGN
            }
        );
        assert!(allocator.allocate_once(64).is_none());
    }

    #[test]
    fn test_handler_retry_budget() {
        let allocator = PrimaryAllocator::with_config(
            RefusingHeap,
            PrimaryConfig::default().with_max_handler_retries(3),
        )
        .unwrap();
        allocator.set_failure_handler(Some(free_nothing));

        assert!(allocator.try_allocate(32).is_err());
        assert_eq!(NOOP_CALLS.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn test_handler_makes_room() {
        let allocator = PrimaryAllocator::with_heap(ReserveHeap);
        allocator.set_failure_handler(Some(release_reserve));

        let ptr = allocator.try_allocate(512).unwrap();
        assert_eq!(RELEASE_CALLS.load(Ordering::SeqCst), 1);
        unsafe { allocator.deallocate(ptr, 512) };
    }

    #[test]
    fn test_oversized_request_is_rejected() {
        let allocator = PrimaryAllocator::new();
        let err = allocator.try_allocate(usize::MAX).unwrap_err();
        assert_eq!(err.code(), "MEM:ALLOC:OVERFLOW");
    }

    #[test]
    fn test_layout_allocation_respects_alignment() {
        let allocator = PrimaryAllocator::new();
        let layout = Layout::from_size_align(96, 128).unwrap();
        unsafe {
            let ptr = Allocator::allocate(&allocator, layout).unwrap();
            assert_eq!(ptr.cast::<u8>().as_ptr() as usize % 128, 0);
            assert_eq!(ptr.len(), 96);
            Allocator::deallocate(&allocator, ptr.cast(), layout);
        }
    }

    #[test]
    fn test_thread_safety_markers() {
        fn assert_send<T: Send>() {}
        fn assert_sync<T: Sync>() {}

        assert_send::<PrimaryAllocator>();
        assert_sync::<PrimaryAllocator>();
    }
}
