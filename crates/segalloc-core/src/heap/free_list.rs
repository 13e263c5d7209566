//! Segregated free-list index.
//!
//! `NUM_CLASSES` buckets, each a circular doubly linked list threaded through
//! the first two payload words of its free blocks:
//!
//! ```text
//!   sentinel[i] ──next──▶ block A ──next──▶ block B ──next──▶ sentinel[i]
//!        ▲                   │                 │
//!        └──────prev─────────┴──────prev───────┘
//! ```
//!
//! Sentinels live in the index table rather than in the arena. A link word
//! stored in the heap therefore names either a block payload offset (always
//! `DWORD`-aligned and nonzero) or a sentinel, encoded as `(bucket << 1) | 1`.
//! Zero is the cleared link left behind by `remove`.

use super::block::{self, WORD};
use crate::config::SearchStart;
use crate::error::{HeapError, Result};

/// Number of size-class buckets.
pub const NUM_CLASSES: usize = 15;

/// Cleared link value.
pub const NULL_LINK: usize = 0;

/// Computes the bucket for a block of `size` bytes.
///
/// Bucket `i` covers `[2^i, 2^(i+1))`; the last bucket is unbounded above.
#[inline]
pub fn classify(size: usize) -> usize {
    size.checked_ilog2()
        .map_or(0, |log| log as usize)
        .min(NUM_CLASSES - 1)
}

/// First bucket scanned for a request of `asize` bytes.
#[inline]
pub fn search_start(asize: usize, policy: SearchStart) -> usize {
    let canonical = classify(asize);
    match policy {
        SearchStart::SkipCanonical if canonical + 1 != NUM_CLASSES => canonical + 1,
        _ => canonical,
    }
}

/// A free-list node reference.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Link {
    Sentinel(usize),
    Block(usize),
}

impl Link {
    #[inline]
    pub const fn encode(self) -> usize {
        match self {
            Self::Sentinel(bucket) => (bucket << 1) | 1,
            Self::Block(bp) => bp,
        }
    }

    /// Decodes a stored link; `None` for the cleared link or a sentinel
    /// index outside the table.
    #[inline]
    pub const fn decode(word: usize) -> Option<Self> {
        if word == NULL_LINK {
            None
        } else if word & 1 == 1 {
            let bucket = word >> 1;
            if bucket < NUM_CLASSES {
                Some(Self::Sentinel(bucket))
            } else {
                None
            }
        } else {
            Some(Self::Block(word))
        }
    }
}

#[derive(Debug, Clone, Copy)]
struct SentinelNode {
    next: Link,
    prev: Link,
}

/// Table of bucket sentinels.
#[derive(Debug, Clone)]
pub struct FreeIndex {
    sentinels: [SentinelNode; NUM_CLASSES],
    len: usize,
}

impl FreeIndex {
    /// Creates an index with every bucket empty.
    pub fn new() -> Self {
        Self {
            sentinels: std::array::from_fn(|i| SentinelNode {
                next: Link::Sentinel(i),
                prev: Link::Sentinel(i),
            }),
            len: 0,
        }
    }

    pub fn reset(&mut self) {
        *self = Self::new();
    }

    /// Number of indexed blocks across all buckets.
    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn bucket_is_empty(&self, bucket: usize) -> bool {
        self.sentinels[bucket].next == Link::Sentinel(bucket)
    }

    /// Head of `bucket`, or its own sentinel when empty.
    pub fn first(&self, bucket: usize) -> Link {
        self.sentinels[bucket].next
    }

    pub fn next_of(&self, mem: &[u8], link: Link) -> Result<Link> {
        match link {
            Link::Sentinel(bucket) => Ok(self.sentinels[bucket].next),
            Link::Block(bp) => stored_link(mem, bp),
        }
    }

    pub fn prev_of(&self, mem: &[u8], link: Link) -> Result<Link> {
        match link {
            Link::Sentinel(bucket) => Ok(self.sentinels[bucket].prev),
            Link::Block(bp) => stored_link(mem, bp + WORD),
        }
    }

    fn set_next(&mut self, mem: &mut [u8], link: Link, value: Link) -> Result<()> {
        match link {
            Link::Sentinel(bucket) => {
                self.sentinels[bucket].next = value;
                Ok(())
            }
            Link::Block(bp) => block::write_word(mem, bp, value.encode()),
        }
    }

    fn set_prev(&mut self, mem: &mut [u8], link: Link, value: Link) -> Result<()> {
        match link {
            Link::Sentinel(bucket) => {
                self.sentinels[bucket].prev = value;
                Ok(())
            }
            Link::Block(bp) => block::write_word(mem, bp + WORD, value.encode()),
        }
    }

    /// Pushes the free block `bp` at the head of `bucket`.
    pub fn insert(&mut self, mem: &mut [u8], bp: usize, bucket: usize) -> Result<()> {
        let head = self.sentinels[bucket].next;
        block::write_word(mem, bp + WORD, Link::Sentinel(bucket).encode())?;
        block::write_word(mem, bp, head.encode())?;
        self.set_prev(mem, head, Link::Block(bp))?;
        self.sentinels[bucket].next = Link::Block(bp);
        self.len += 1;
        Ok(())
    }

    /// Unlinks `bp` from whatever bucket holds it and clears its links.
    pub fn remove(&mut self, mem: &mut [u8], bp: usize) -> Result<()> {
        let node = Link::Block(bp);
        let next = self.next_of(mem, node)?;
        let prev = self.prev_of(mem, node)?;
        self.set_next(mem, prev, next)?;
        self.set_prev(mem, next, prev)?;
        self.len -= 1;
        block::write_word(mem, bp, NULL_LINK)?;
        block::write_word(mem, bp + WORD, NULL_LINK)
    }

    /// First-fit search starting at the bucket chosen by `policy`.
    ///
    /// Within a bucket the first block whose size is at least `asize` wins.
    pub fn find_fit(
        &self,
        mem: &[u8],
        asize: usize,
        policy: SearchStart,
    ) -> Result<Option<usize>> {
        for bucket in search_start(asize, policy)..NUM_CLASSES {
            let mut cursor = self.first(bucket);
            while let Link::Block(bp) = cursor {
                if block::header(mem, bp)?.size >= asize {
                    return Ok(Some(bp));
                }
                cursor = self.next_of(mem, cursor)?;
            }
        }
        Ok(None)
    }
}

impl Default for FreeIndex {
    fn default() -> Self {
        Self::new()
    }
}

fn stored_link(mem: &[u8], offset: usize) -> Result<Link> {
    let word = block::read_word(mem, offset)?;
    Link::decode(word).ok_or(HeapError::InvalidPointer(offset))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::heap::block::{DWORD, Tag, write_tags};

    fn bucket_contents(index: &FreeIndex, mem: &[u8], bucket: usize) -> Vec<usize> {
        let mut out = Vec::new();
        let mut cursor = index.first(bucket);
        while let Link::Block(bp) = cursor {
            out.push(bp);
            cursor = index.next_of(mem, cursor).unwrap();
        }
        out
    }

    /// Lays out free blocks of the given sizes back to back.
    fn heap_with(sizes: &[usize]) -> (Vec<u8>, Vec<usize>) {
        let total: usize = sizes.iter().sum::<usize>() + DWORD;
        let mut mem = vec![0u8; total];
        let mut bp = DWORD;
        let mut bps = Vec::new();
        for &size in sizes {
            write_tags(&mut mem, bp, Tag::new(size, false)).unwrap();
            bps.push(bp);
            bp += size;
        }
        (mem, bps)
    }

    #[test]
    fn classify_powers_of_two() {
        assert_eq!(classify(0), 0);
        assert_eq!(classify(1), 0);
        assert_eq!(classify(2), 1);
        assert_eq!(classify(3), 1);
        assert_eq!(classify(32), 5);
        assert_eq!(classify(63), 5);
        assert_eq!(classify(64), 6);
        assert_eq!(classify(4096), 12);
        assert_eq!(classify(16383), 13);
        assert_eq!(classify(16384), 14);
        assert_eq!(classify(usize::MAX), NUM_CLASSES - 1);
    }

    #[test]
    fn classify_is_monotonic() {
        let mut last = 0;
        for size in 0..70_000 {
            let class = classify(size);
            assert!(class >= last, "classify({size}) went backwards");
            last = class;
        }
    }

    #[test]
    fn search_start_skips_canonical_except_at_top() {
        assert_eq!(search_start(32, SearchStart::SkipCanonical), 6);
        assert_eq!(search_start(32, SearchStart::Canonical), 5);
        assert_eq!(search_start(1 << 20, SearchStart::SkipCanonical), NUM_CLASSES - 1);
        assert_eq!(search_start(8192, SearchStart::SkipCanonical), NUM_CLASSES - 1);
    }

    #[test]
    fn link_encoding_distinguishes_sentinels() {
        assert_eq!(Link::decode(Link::Sentinel(7).encode()), Some(Link::Sentinel(7)));
        assert_eq!(Link::decode(Link::Block(96).encode()), Some(Link::Block(96)));
        assert_eq!(Link::decode(NULL_LINK), None);
        assert_eq!(Link::decode((NUM_CLASSES << 1) | 1), None);
    }

    #[test]
    fn insert_pushes_at_head() {
        let (mut mem, bps) = heap_with(&[64, 64, 64]);
        let mut index = FreeIndex::new();
        for &bp in &bps {
            index.insert(&mut mem, bp, 6).unwrap();
        }
        assert_eq!(bucket_contents(&index, &mem, 6), vec![bps[2], bps[1], bps[0]]);
        assert_eq!(index.len(), 3);
        assert_eq!(index.prev_of(&mem, Link::Sentinel(6)).unwrap(), Link::Block(bps[0]));
    }

    #[test]
    fn remove_unlinks_and_clears() {
        let (mut mem, bps) = heap_with(&[64, 64, 64]);
        let mut index = FreeIndex::new();
        assert!(index.is_empty());
        for &bp in &bps {
            index.insert(&mut mem, bp, 6).unwrap();
        }
        assert!(!index.is_empty());
        index.remove(&mut mem, bps[1]).unwrap();
        assert_eq!(index.len(), 2);
        assert_eq!(bucket_contents(&index, &mem, 6), vec![bps[2], bps[0]]);
        assert_eq!(block::read_word(&mem, bps[1]).unwrap(), NULL_LINK);
        assert_eq!(block::read_word(&mem, bps[1] + WORD).unwrap(), NULL_LINK);

        index.remove(&mut mem, bps[2]).unwrap();
        index.remove(&mut mem, bps[0]).unwrap();
        assert!(index.bucket_is_empty(6));
        assert!(index.is_empty());
        assert_eq!(index.len(), 0);
        assert_eq!(index.prev_of(&mem, Link::Sentinel(6)).unwrap(), Link::Sentinel(6));
    }

    #[test]
    fn removing_an_unlinked_block_is_an_error() {
        let (mut mem, bps) = heap_with(&[64]);
        let mut index = FreeIndex::new();
        assert!(matches!(
            index.remove(&mut mem, bps[0]),
            Err(HeapError::InvalidPointer(_))
        ));
        assert!(index.is_empty());
    }

    #[test]
    fn find_fit_is_first_fit_and_skips_canonical_bucket() {
        // 48 lands in bucket 5; 96 and 80 share bucket 6.
        let (mut mem, bps) = heap_with(&[48, 96, 80, 4 * DWORD]);
        let mut index = FreeIndex::new();
        index.insert(&mut mem, bps[0], classify(48)).unwrap();
        index.insert(&mut mem, bps[1], classify(96)).unwrap();
        index.insert(&mut mem, bps[2], classify(80)).unwrap();

        // asize 48 is canonical in bucket 5 but the scan starts in bucket 6,
        // where the head (80) is the first adequate block.
        let fit = index.find_fit(&mem, 48, SearchStart::SkipCanonical).unwrap();
        assert_eq!(fit, Some(bps[2]));
        let canonical = index.find_fit(&mem, 48, SearchStart::Canonical).unwrap();
        assert_eq!(canonical, Some(bps[0]));

        // 88 skips the 80-byte head and takes the 96-byte block behind it.
        let fit = index.find_fit(&mem, 88, SearchStart::Canonical).unwrap();
        assert_eq!(fit, Some(bps[1]));

        assert_eq!(index.find_fit(&mem, 4096, SearchStart::SkipCanonical).unwrap(), None);
    }
}
