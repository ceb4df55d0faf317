//! Typed front-end
//!
//! Converts "`count` objects of `T`" into a byte layout for any
//! [`Allocator`]. The memory is handed out uninitialized; constructing and
//! dropping the objects is the caller's business.

use core::alloc::Layout;
use core::marker::PhantomData;
use core::ptr::NonNull;

use crate::error::{AllocResult, MemoryError};
use crate::primary::unrecoverable;
use crate::traits::Allocator;

/// Allocates arrays of `T` from a borrowed allocator
///
/// # Examples
/// ```
/// use segalloc::{LockedPool, TypedAllocator};
///
/// let pool = LockedPool::new();
/// let typed = TypedAllocator::<u32, _>::new(&pool);
///
/// let ptr = typed.allocate(4);
/// unsafe {
///     ptr.as_ptr().write(7);
///     assert_eq!(ptr.as_ptr().read(), 7);
///     typed.deallocate(ptr, 4);
/// }
/// ```
pub struct TypedAllocator<'a, T, A: Allocator + ?Sized> {
    allocator: &'a A,
    _marker: PhantomData<fn() -> T>,
}

impl<'a, T, A: Allocator + ?Sized> TypedAllocator<'a, T, A> {
    pub fn new(allocator: &'a A) -> Self {
        Self {
            allocator,
            _marker: PhantomData,
        }
    }

    /// The allocator requests are forwarded to
    pub fn allocator(&self) -> &'a A {
        self.allocator
    }

    /// Allocates room for `count` values of `T`
    ///
    /// A zero count (or a zero-sized `T`) returns a dangling pointer without
    /// touching the allocator.
    ///
    /// # Errors
    /// - [`MemoryError::SizeOverflow`] if `count * size_of::<T>()` overflows
    /// - whatever the underlying allocator reports
    pub fn try_allocate(&self, count: usize) -> AllocResult<NonNull<T>> {
        let Some(layout) = array_layout::<T>(count)? else {
            return Ok(NonNull::dangling());
        };
        // SAFETY: layout has non-zero size; the block is returned to the
        // caller uninitialized.
        let block = unsafe { self.allocator.allocate(layout)? };
        Ok(block.cast())
    }

    /// Allocates room for `count` values of `T`
    ///
    /// Never returns null. Terminates the process if the request cannot be
    /// satisfied.
    pub fn allocate(&self, count: usize) -> NonNull<T> {
        match self.try_allocate(count) {
            Ok(ptr) => ptr,
            Err(err) => unrecoverable(&err, count.saturating_mul(size_of::<T>())),
        }
    }

    /// Allocates room for a single `T`
    pub fn allocate_one(&self) -> NonNull<T> {
        self.allocate(1)
    }

    /// Returns room for `count` values of `T`
    ///
    /// # Safety
    /// - `ptr` must come from this front-end (or one over the same allocator)
    ///   with the same `count`
    /// - any values stored there must already be dropped
    pub unsafe fn deallocate(&self, ptr: NonNull<T>, count: usize) {
        // The layout was valid when the block was allocated
        if let Ok(Some(layout)) = array_layout::<T>(count) {
            // SAFETY: forwarded caller contract.
            unsafe { self.allocator.deallocate(ptr.cast(), layout) };
        }
    }

    /// Returns room for a single `T`
    ///
    /// # Safety
    /// Same as [`deallocate`](Self::deallocate) with a count of one.
    pub unsafe fn deallocate_one(&self, ptr: NonNull<T>) {
        // SAFETY: forwarded caller contract.
        unsafe { self.deallocate(ptr, 1) };
    }
}

impl<T, A: Allocator + ?Sized> Clone for TypedAllocator<'_, T, A> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<T, A: Allocator + ?Sized> Copy for TypedAllocator<'_, T, A> {}

impl<T, A: Allocator + ?Sized> core::fmt::Debug for TypedAllocator<'_, T, A> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("TypedAllocator")
            .field("type", &core::any::type_name::<T>())
            .finish_non_exhaustive()
    }
}

/// Layout of `count` values of `T`, or `None` when it covers no bytes
fn array_layout<T>(count: usize) -> AllocResult<Option<Layout>> {
    let layout = Layout::array::<T>(count)
        .map_err(|_| MemoryError::size_overflow("count * size_of::<T>()"))?;
    Ok((layout.size() > 0).then_some(layout))
}
