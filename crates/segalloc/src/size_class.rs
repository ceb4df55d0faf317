//! Size classes for the pool tier
//!
//! Requests up to [`MAX_BYTES`] are served from one of [`NUM_CLASSES`] free
//! lists. Class `i` holds blocks of `(i + 1) * ALIGN` bytes, so the classes
//! cover 8, 16, ..., 128 bytes.

/// Granularity every pooled request is rounded up to
pub const ALIGN: usize = 8;

/// Largest request served from the pool; anything bigger goes to the
/// primary tier unchanged
pub const MAX_BYTES: usize = 128;

/// Number of segregated free lists
pub const NUM_CLASSES: usize = MAX_BYTES / ALIGN;

const _: () = assert!(ALIGN.is_power_of_two());
const _: () = assert!(MAX_BYTES.is_multiple_of(ALIGN));
// A free block must be able to hold its own link
const _: () = assert!(ALIGN >= size_of::<*mut u8>());

/// Rounds `bytes` up to the next multiple of [`ALIGN`]
///
/// # Examples
/// ```
/// use segalloc::size_class::round_up;
///
/// assert_eq!(round_up(1), 8);
/// assert_eq!(round_up(16), 16);
/// assert_eq!(round_up(17), 24);
/// ```
#[inline]
pub const fn round_up(bytes: usize) -> usize {
    (bytes + ALIGN - 1) & !(ALIGN - 1)
}

/// Overflow-checked [`round_up`]
#[inline]
pub const fn checked_round_up(bytes: usize) -> Option<usize> {
    match bytes.checked_add(ALIGN - 1) {
        Some(padded) => Some(padded & !(ALIGN - 1)),
        None => None,
    }
}

/// Returns the free-list index serving a request of `bytes`
///
/// A zero-byte request shares class 0 with 1..=8 byte requests.
///
/// `bytes` must not exceed [`MAX_BYTES`].
#[inline]
pub const fn class_index(bytes: usize) -> usize {
    debug_assert!(bytes <= MAX_BYTES);
    if bytes == 0 {
        0
    } else {
        bytes.div_ceil(ALIGN) - 1
    }
}

/// Returns the block size of class `index`
#[inline]
pub const fn class_size(index: usize) -> usize {
    debug_assert!(index < NUM_CLASSES);
    (index + 1) * ALIGN
}

/// Returns the size of the block actually handed out for a pooled request
#[inline]
pub const fn block_size(bytes: usize) -> usize {
    class_size(class_index(bytes))
}

/// Whether a request of `bytes` is served by the pool tier
#[inline]
pub const fn is_pooled(bytes: usize) -> bool {
    bytes <= MAX_BYTES
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_class_count() {
        assert_eq!(NUM_CLASSES, 16);
        assert_eq!(class_size(NUM_CLASSES - 1), MAX_BYTES);
    }

    #[test]
    fn test_class_index_boundaries() {
        assert_eq!(class_index(0), 0);
        assert_eq!(class_index(1), 0);
        assert_eq!(class_index(8), 0);
        assert_eq!(class_index(9), 1);
        assert_eq!(class_index(16), 1);
        assert_eq!(class_index(120), 14);
        assert_eq!(class_index(121), 15);
        assert_eq!(class_index(128), 15);
    }

    #[test]
    fn test_block_size_covers_request() {
        for bytes in 0..=MAX_BYTES {
            let block = block_size(bytes);
            assert!(block >= bytes, "block {block} too small for {bytes}");
            assert_eq!(block % ALIGN, 0);
            assert!(block - bytes < ALIGN || bytes == 0);
        }
    }

    #[test]
    fn test_round_up_matches_class_size() {
        for bytes in 1..=MAX_BYTES {
            assert_eq!(round_up(bytes), class_size(class_index(bytes)));
        }
    }

    #[test]
    fn test_checked_round_up() {
        assert_eq!(checked_round_up(0), Some(0));
        assert_eq!(checked_round_up(13), Some(16));
        assert_eq!(checked_round_up(usize::MAX), None);
    }

    #[test]
    fn test_is_pooled() {
        assert!(is_pooled(0));
        assert!(is_pooled(MAX_BYTES));
        assert!(!is_pooled(MAX_BYTES + 1));
        assert!(!is_pooled(256));
    }
}
