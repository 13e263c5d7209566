//! Grow-only backing store for the heap.
//!
//! The allocator never touches memory it did not obtain through
//! [`ArenaProvider::grow`]. Offsets returned by `grow` stay valid for the
//! lifetime of the arena: the region is extended in place, never relocated
//! or shrunk (until `reset`).

use crate::error::ArenaError;

/// Default capacity of a [`VecArena`]: 20 MiB.
pub const DEFAULT_ARENA_LIMIT: usize = 20 * (1 << 20);

/// Raw, monotonically growing byte region.
pub trait ArenaProvider {
    /// Extends the region by `delta` bytes and returns the offset of the
    /// first new byte (the old break). On failure the region is unchanged.
    fn grow(&mut self, delta: usize) -> Result<usize, ArenaError>;

    /// Drops all memory and returns the break to zero.
    fn reset(&mut self);

    /// Current break, in bytes.
    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn as_bytes(&self) -> &[u8];

    fn as_bytes_mut(&mut self) -> &mut [u8];
}

/// `Vec<u8>`-backed arena with a fixed capacity limit.
#[derive(Debug, Clone)]
pub struct VecArena {
    bytes: Vec<u8>,
    limit: usize,
    grow_calls: u64,
}

impl VecArena {
    /// Creates an arena capped at [`DEFAULT_ARENA_LIMIT`].
    #[must_use]
    pub fn new() -> Self {
        Self::with_limit(DEFAULT_ARENA_LIMIT)
    }

    /// Creates an arena that refuses to grow past `limit` bytes.
    #[must_use]
    pub fn with_limit(limit: usize) -> Self {
        Self {
            bytes: Vec::new(),
            limit,
            grow_calls: 0,
        }
    }

    pub fn limit(&self) -> usize {
        self.limit
    }

    /// Number of successful `grow` calls since creation or the last reset.
    pub fn grow_calls(&self) -> u64 {
        self.grow_calls
    }
}

impl Default for VecArena {
    fn default() -> Self {
        Self::new()
    }
}

impl ArenaProvider for VecArena {
    fn grow(&mut self, delta: usize) -> Result<usize, ArenaError> {
        let old = self.bytes.len();
        let exhausted = ArenaError::Exhausted {
            requested: delta,
            used: old,
            limit: self.limit,
        };
        let new_len = old.checked_add(delta).ok_or(exhausted)?;
        if new_len > self.limit {
            return Err(exhausted);
        }
        self.bytes.resize(new_len, 0);
        self.grow_calls += 1;
        Ok(old)
    }

    fn reset(&mut self) {
        self.bytes.clear();
        self.grow_calls = 0;
    }

    fn len(&self) -> usize {
        self.bytes.len()
    }

    fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    fn as_bytes_mut(&mut self) -> &mut [u8] {
        &mut self.bytes
    }
}
