//! Heap consistency checker.
//!
//! [`Heap::check`] walks the heap in address order and then every bucket of
//! the free-list index, collecting each broken invariant as a [`Violation`].
//! It never mutates the heap and never repairs what it finds.

use std::collections::{HashMap, HashSet};
use std::fmt;

use serde::Serialize;

use super::Heap;
use super::arena::ArenaProvider;
use super::block::{self, DWORD, MIN_BLOCK, Tag};
use super::free_list::{Link, NUM_CLASSES, classify};

/// A broken heap invariant.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Violation {
    #[error("heap is not initialized")]
    Uninitialized,
    #[error("bad prologue at {offset:#x}")]
    BadPrologue { offset: usize },
    #[error("bad epilogue at {offset:#x}")]
    BadEpilogue { offset: usize },
    #[error("block {offset:#x} is not doubleword aligned")]
    Misaligned { offset: usize },
    #[error("block {offset:#x}: header {header:#x} does not match footer {footer:#x}")]
    TagMismatch {
        offset: usize,
        header: usize,
        footer: usize,
    },
    #[error("block {offset:#x} is smaller than the minimum block ({size} bytes)")]
    Undersized { offset: usize, size: usize },
    #[error("block {offset:#x} runs past the end of the heap")]
    OutOfBounds { offset: usize },
    #[error("free block {offset:#x} follows another free block")]
    AdjacentFree { offset: usize },
    #[error("free block {offset:#x} is not in any free list")]
    Untracked { offset: usize },
    #[error("allocated block {offset:#x} is in bucket {bucket}")]
    AllocatedInFreeList { offset: usize, bucket: usize },
    #[error("block {offset:#x} appears more than once in the free lists (bucket {bucket})")]
    DuplicateFreeListEntry { offset: usize, bucket: usize },
    #[error("block {offset:#x} is in bucket {bucket}, expected bucket {expected}")]
    WrongBucket {
        offset: usize,
        bucket: usize,
        expected: usize,
    },
    #[error("broken link at {offset:#x} in bucket {bucket}")]
    BrokenLink { offset: usize, bucket: usize },
    #[error("bucket {bucket} links to {offset:#x}, which is not a heap block")]
    UnknownFreeListEntry { offset: usize, bucket: usize },
    #[error("index counts {indexed} free blocks, heap walk found {walked}")]
    FreeCountMismatch { indexed: usize, walked: usize },
}

/// One block as seen by the heap walk.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct BlockInfo {
    pub offset: usize,
    pub header_size: usize,
    pub header_allocated: bool,
    pub footer_size: usize,
    pub footer_allocated: bool,
}

impl BlockInfo {
    fn new(offset: usize, header: Tag, footer: Tag) -> Self {
        Self {
            offset,
            header_size: header.size,
            header_allocated: header.allocated,
            footer_size: footer.size,
            footer_allocated: footer.allocated,
        }
    }
}

impl fmt::Display for BlockInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let flag = |allocated: bool| if allocated { 'a' } else { 'f' };
        write!(
            f,
            "{:#x}: header: [{}:{}] footer: [{}:{}]",
            self.offset,
            self.header_size,
            flag(self.header_allocated),
            self.footer_size,
            flag(self.footer_allocated)
        )
    }
}

/// Result of [`Heap::check`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct HeapReport {
    /// Blocks between the prologue and the epilogue, in address order.
    pub blocks: Vec<BlockInfo>,
    pub allocated_blocks: usize,
    pub free_blocks: usize,
    pub free_bytes: usize,
    pub heap_size: usize,
    /// Payload offset of the epilogue, when the walk reached it.
    pub end_of_heap: Option<usize>,
    pub violations: Vec<Violation>,
}

impl HeapReport {
    pub fn is_consistent(&self) -> bool {
        self.violations.is_empty()
    }
}

impl fmt::Display for HeapReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "heap ({} bytes):", self.heap_size)?;
        for info in &self.blocks {
            writeln!(f, "{info}")?;
        }
        if let Some(end) = self.end_of_heap {
            writeln!(f, "{end:#x}: end of heap")?;
        }
        for violation in &self.violations {
            writeln!(f, "error: {violation}")?;
        }
        Ok(())
    }
}

impl<A: ArenaProvider> Heap<A> {
    /// Verifies the structural invariants of the heap and its index.
    pub fn check(&self) -> HeapReport {
        let mut report = HeapReport::default();
        let Some(prologue) = self.prologue else {
            report.violations.push(Violation::Uninitialized);
            return report;
        };
        report.heap_size = self.stats().heap_size;

        let mem = self.arena.as_bytes();
        let sentinel = Tag::new(DWORD, true);
        let prologue_ok = block::header(mem, prologue).is_ok_and(|t| t == sentinel)
            && block::footer(mem, prologue).is_ok_and(|t| t == sentinel);
        if !prologue_ok {
            report.violations.push(Violation::BadPrologue { offset: prologue });
        }

        let blocks = self.walk_blocks(mem, prologue + DWORD, &mut report);
        self.walk_buckets(mem, &blocks, &mut report);
        report
    }

    /// Address-order walk. Returns the allocated flag of every block reached.
    fn walk_blocks(
        &self,
        mem: &[u8],
        first: usize,
        report: &mut HeapReport,
    ) -> HashMap<usize, bool> {
        let mut blocks = HashMap::new();
        let mut bp = first;
        let mut prev_free = false;
        loop {
            let Ok(header) = block::header(mem, bp) else {
                report.violations.push(Violation::OutOfBounds { offset: bp });
                break;
            };
            if header.size == 0 {
                if !header.allocated || bp != mem.len() {
                    report.violations.push(Violation::BadEpilogue { offset: bp });
                }
                report.end_of_heap = Some(bp);
                break;
            }
            if bp % DWORD != 0 {
                report.violations.push(Violation::Misaligned { offset: bp });
            }
            if header.size < MIN_BLOCK {
                report.violations.push(Violation::Undersized {
                    offset: bp,
                    size: header.size,
                });
            }
            let end = block::next_block(mem, bp)
                .ok()
                .filter(|&end| end <= mem.len());
            let footer = block::read_tag(mem, block::footer_offset(bp, header.size));
            let (Some(end), Ok(footer)) = (end, footer) else {
                report.violations.push(Violation::OutOfBounds { offset: bp });
                break;
            };

            report.blocks.push(BlockInfo::new(bp, header, footer));
            if header != footer {
                report.violations.push(Violation::TagMismatch {
                    offset: bp,
                    header: header.encode(),
                    footer: footer.encode(),
                });
            }
            if header.allocated {
                report.allocated_blocks += 1;
            } else {
                if prev_free {
                    report.violations.push(Violation::AdjacentFree { offset: bp });
                }
                report.free_blocks += 1;
                report.free_bytes += header.size;
            }
            prev_free = !header.allocated;
            blocks.insert(bp, header.allocated);
            bp = end;
        }
        blocks
    }

    /// Walks every bucket, checking membership and link symmetry.
    fn walk_buckets(&self, mem: &[u8], blocks: &HashMap<usize, bool>, report: &mut HeapReport) {
        let violations = &mut report.violations;
        let mut seen = HashSet::new();
        for bucket in 0..NUM_CLASSES {
            let mut prev = Link::Sentinel(bucket);
            let mut cursor = self.index.first(bucket);
            loop {
                let bp = match cursor {
                    Link::Sentinel(home) if home == bucket => {
                        if self.index.prev_of(mem, cursor).ok() != Some(prev) {
                            violations.push(Violation::BrokenLink {
                                offset: prev.encode(),
                                bucket,
                            });
                        }
                        break;
                    }
                    Link::Sentinel(_) => {
                        violations.push(Violation::BrokenLink {
                            offset: prev.encode(),
                            bucket,
                        });
                        break;
                    }
                    Link::Block(bp) => bp,
                };

                if !seen.insert(bp) {
                    violations.push(Violation::DuplicateFreeListEntry { offset: bp, bucket });
                    break;
                }
                match blocks.get(&bp) {
                    None => {
                        violations.push(Violation::UnknownFreeListEntry { offset: bp, bucket });
                        break;
                    }
                    Some(true) => {
                        violations.push(Violation::AllocatedInFreeList { offset: bp, bucket });
                        break;
                    }
                    Some(false) => {}
                }
                if let Ok(header) = block::header(mem, bp) {
                    let expected = classify(header.size);
                    if expected != bucket {
                        violations.push(Violation::WrongBucket {
                            offset: bp,
                            bucket,
                            expected,
                        });
                    }
                }
                if self.index.prev_of(mem, cursor).ok() != Some(prev) {
                    violations.push(Violation::BrokenLink { offset: bp, bucket });
                }
                let Ok(next) = self.index.next_of(mem, cursor) else {
                    violations.push(Violation::BrokenLink { offset: bp, bucket });
                    break;
                };
                prev = cursor;
                cursor = next;
            }
        }

        let mut untracked: Vec<usize> = blocks
            .iter()
            .filter(|&(bp, &allocated)| !allocated && !seen.contains(bp))
            .map(|(&bp, _)| bp)
            .collect();
        untracked.sort_unstable();
        violations.extend(untracked.into_iter().map(|offset| Violation::Untracked { offset }));

        if self.index.len() != report.free_blocks {
            violations.push(Violation::FreeCountMismatch {
                indexed: self.index.len(),
                walked: report.free_blocks,
            });
        }
    }
}
