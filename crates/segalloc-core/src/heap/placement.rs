//! Fit search and block placement.

use super::Heap;
use super::arena::ArenaProvider;
use super::block::{self, MIN_BLOCK, Tag};
use super::free_list::classify;
use crate::error::Result;
use crate::log::{AllocatorLogLevel, Event};

impl<A: ArenaProvider> Heap<A> {
    pub(crate) fn find_fit(&self, asize: usize) -> Result<Option<usize>> {
        self.index
            .find_fit(self.arena.as_bytes(), asize, self.config.search_start)
    }

    /// Carves an `asize` block out of the indexed free block at `bp`.
    ///
    /// The tail is split off and re-indexed when it can hold a minimum
    /// block; otherwise the whole block is handed out. Returns the size of
    /// the allocated block.
    pub(crate) fn place(&mut self, bp: usize, asize: usize) -> Result<usize> {
        let mem = self.arena.as_bytes_mut();
        let size = block::header(mem, bp)?.size;
        self.index.remove(mem, bp)?;

        let remainder = size - asize;
        let placed = if remainder >= MIN_BLOCK {
            block::write_tags(mem, bp, Tag::new(asize, true))?;
            let rest = bp + asize;
            block::write_tags(mem, rest, Tag::new(remainder, false))?;
            self.index.insert(mem, rest, classify(remainder))?;
            asize
        } else {
            block::write_tags(mem, bp, Tag::new(size, true))?;
            size
        };

        self.counters.allocated_blocks += 1;
        self.counters.allocated_bytes += placed;
        if placed != size {
            self.emit(
                Event::new(AllocatorLogLevel::Trace, "malloc", "split", "success")
                    .ptr(bp + asize)
                    .size(remainder)
                    .bin(classify(remainder)),
                "",
            );
        }
        Ok(placed)
    }
}

#[cfg(test)]
mod tests {
    use crate::config::{DEFAULT_CHUNK_SIZE, HeapConfig, SearchStart};
    use crate::heap::block::{self, DWORD, MIN_BLOCK, Tag};
    use crate::heap::{ArenaProvider, Heap, VecArena};
    use crate::log::AllocatorLogLevel;

    fn heap() -> Heap {
        let config = HeapConfig::default().with_search_start(SearchStart::Canonical);
        let mut heap = Heap::new(VecArena::new(), config);
        heap.init().unwrap();
        heap
    }

    #[test]
    fn split_leaves_indexed_remainder() {
        let mut heap = heap();
        let ptr = heap.allocate(100).unwrap();
        let asize = block::adjusted_size(100).unwrap();
        let mem = heap.arena().as_bytes();
        assert_eq!(block::header(mem, ptr).unwrap(), Tag::new(asize, true));
        let rest = ptr + asize;
        assert_eq!(
            block::header(mem, rest).unwrap(),
            Tag::new(DEFAULT_CHUNK_SIZE - asize, false)
        );
        assert_eq!(heap.stats().free_blocks, 1);
        assert_eq!(heap.stats().free_bytes, DEFAULT_CHUNK_SIZE - asize);
    }

    #[test]
    fn small_remainder_is_absorbed() {
        let mut heap = heap();
        // Leaves less than a minimum block behind in the first chunk.
        let size = DEFAULT_CHUNK_SIZE - DWORD - DWORD;
        let ptr = heap.allocate(size).unwrap();
        let mem = heap.arena().as_bytes();
        assert_eq!(
            block::header(mem, ptr).unwrap(),
            Tag::new(DEFAULT_CHUNK_SIZE, true)
        );
        assert!(DEFAULT_CHUNK_SIZE - block::adjusted_size(size).unwrap() < MIN_BLOCK);
        assert_eq!(heap.stats().free_blocks, 0);
        assert_eq!(heap.usable_size(ptr), Some(DEFAULT_CHUNK_SIZE - DWORD));
    }

    #[test]
    fn split_is_logged_at_trace() {
        let config = HeapConfig::default().with_log_level(Some(AllocatorLogLevel::Trace));
        let mut heap = Heap::new(VecArena::new(), config);
        heap.init().unwrap();
        heap.allocate(32).unwrap();
        assert!(heap.lifecycle_logs().iter().any(|r| r.event == "split"));
    }
}
