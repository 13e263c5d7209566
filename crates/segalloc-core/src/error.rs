//! Error types for heap and arena operations.

use thiserror::Error;

/// Failure reported by an [`ArenaProvider`](crate::heap::ArenaProvider).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum ArenaError {
    /// The backing region cannot grow by the requested amount.
    #[error("arena exhausted: requested {requested} bytes with {used} of {limit} in use")]
    Exhausted {
        requested: usize,
        used: usize,
        limit: usize,
    },
}

/// Errors surfaced by the allocator's `try_*` entry points.
///
/// Every variant is reported before any heap mutation takes place, so a
/// failed call leaves the heap exactly as it was.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum HeapError {
    #[error(transparent)]
    ArenaExhausted(#[from] ArenaError),
    /// Zero-size request.
    #[error("invalid argument: {0}")]
    InvalidArgument(&'static str),
    /// Adjusted block size does not fit in a machine word.
    #[error("requested size {0} overflows block size computation")]
    SizeOverflow(usize),
    /// An operation was attempted before `init`.
    #[error("heap is not initialized")]
    Uninitialized,
    /// A boundary-tag access fell outside the live heap.
    #[error("word access at offset {offset} is outside the heap (limit {limit})")]
    OutOfBounds { offset: usize, limit: usize },
    /// The pointer does not name a block payload inside this heap.
    #[error("pointer {0:#x} does not reference a block in this heap")]
    InvalidPointer(usize),
    /// The pointer names a block that is already free.
    #[error("block at {0:#x} is already free")]
    DoubleFree(usize),
}

pub type Result<T> = std::result::Result<T, HeapError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn arena_error_converts_into_heap_error() {
        let arena = ArenaError::Exhausted {
            requested: 4096,
            used: 8192,
            limit: 10_000,
        };
        let heap: HeapError = arena.into();
        assert_eq!(heap, HeapError::ArenaExhausted(arena));
        assert_eq!(
            heap.to_string(),
            "arena exhausted: requested 4096 bytes with 8192 of 10000 in use"
        );
    }

    #[test]
    fn display_names_the_offending_pointer() {
        assert_eq!(
            HeapError::DoubleFree(0x40).to_string(),
            "block at 0x40 is already free"
        );
        assert_eq!(
            HeapError::OutOfBounds {
                offset: 96,
                limit: 64
            }
            .to_string(),
            "word access at offset 96 is outside the heap (limit 64)"
        );
    }
}
