//! Boundary-tag coalescing.

use super::Heap;
use super::arena::ArenaProvider;
use super::block::{self, DWORD, Tag};
use super::free_list::classify;
use crate::error::Result;
use crate::log::{AllocatorLogLevel, Event};

impl<A: ArenaProvider> Heap<A> {
    /// Merges the free, unindexed block at `bp` with any free neighbours and
    /// indexes the result. Returns the payload offset of the merged block.
    pub(crate) fn coalesce(&mut self, bp: usize) -> Result<usize> {
        let mem = self.arena.as_bytes_mut();
        let size = block::header(mem, bp)?.size;
        let prev_alloc = block::read_tag(mem, bp - DWORD)?.allocated;
        let next_bp = block::next_block(mem, bp)?;
        let next = block::header(mem, next_bp)?;

        let (start, merged, case) = match (prev_alloc, next.allocated) {
            (true, true) => (bp, size, "none"),
            (true, false) => {
                self.index.remove(mem, next_bp)?;
                (bp, size + next.size, "next")
            }
            (false, true) => {
                let prev_bp = block::prev_block(mem, bp)?;
                let prev_size = block::header(mem, prev_bp)?.size;
                self.index.remove(mem, prev_bp)?;
                (prev_bp, size + prev_size, "prev")
            }
            (false, false) => {
                let prev_bp = block::prev_block(mem, bp)?;
                let prev_size = block::header(mem, prev_bp)?.size;
                self.index.remove(mem, prev_bp)?;
                self.index.remove(mem, next_bp)?;
                (prev_bp, size + prev_size + next.size, "both")
            }
        };

        block::write_tags(mem, start, Tag::new(merged, false))?;
        let bucket = classify(merged);
        self.index.insert(mem, start, bucket)?;
        self.emit(
            Event::new(AllocatorLogLevel::Trace, "free", "coalesce", case)
                .ptr(start)
                .size(merged)
                .bin(bucket),
            "",
        );
        Ok(start)
    }
}
