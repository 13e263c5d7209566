//! Heap growth.

use super::Heap;
use super::arena::ArenaProvider;
use super::block::{self, MIN_BLOCK, Tag, WORD};
use crate::error::{HeapError, Result};
use crate::log::{AllocatorLogLevel, Event};

impl<A: ArenaProvider> Heap<A> {
    /// Grows the heap by `words` words, rounded up to an even count.
    ///
    /// The old epilogue header becomes the header of the new free block and
    /// a fresh epilogue is written at the new break. The new block is then
    /// coalesced with a free predecessor; the returned offset is the payload
    /// of the merged block.
    pub(crate) fn extend(&mut self, words: usize) -> Result<usize> {
        let Some(size) = words
            .max(MIN_BLOCK / WORD)
            .checked_next_multiple_of(2)
            .and_then(|w| w.checked_mul(WORD))
        else {
            return Err(HeapError::SizeOverflow(words));
        };

        let bp = match self.arena.grow(size) {
            Ok(old_break) => old_break,
            Err(err) => {
                self.emit(
                    Event::new(AllocatorLogLevel::Warn, "sbrk", "extend_failed", "oom").size(size),
                    err.to_string(),
                );
                return Err(err.into());
            }
        };

        let mem = self.arena.as_bytes_mut();
        block::write_tags(mem, bp, Tag::new(size, false))?;
        block::write_epilogue(mem, bp + size)?;
        self.counters.extend_calls += 1;
        self.emit(
            Event::new(AllocatorLogLevel::Debug, "sbrk", "extend", "success")
                .ptr(bp)
                .size(size),
            "",
        );
        self.coalesce(bp)
    }
}
