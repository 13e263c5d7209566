//! Heap context and public entry points.
//!
//! A [`Heap`] owns its arena, its free-list index and its lifecycle log, so
//! independent heaps can coexist (one per test, one per bench iteration).
//! Pointers are payload offsets into the arena; `NULL` (0) is never a
//! valid payload because offset 0 holds the alignment padding word.
//!
//! ```text
//!   base                                                          break
//!   ┌─────┬───────────────┬──────────┬──────────┬─────┬──────────┐
//!   │ pad │ prologue 16|a │ block    │ block    │ ... │ epi 0|a  │
//!   └─────┴───────────────┴──────────┴──────────┴─────┴──────────┘
//! ```

use super::arena::{ArenaProvider, VecArena};
use super::block::{self, DWORD, MIN_BLOCK, Tag, WORD};
use super::free_list::{self, FreeIndex};
use crate::config::HeapConfig;
use crate::error::{HeapError, Result};
use crate::log::{AllocatorLogLevel, AllocatorLogRecord, Event, LifecycleLog, Snapshot};

/// The null payload offset.
pub const NULL: usize = 0;

/// Bytes taken by the padding word, the prologue and the epilogue header.
const SENTINEL_OVERHEAD: usize = 2 * DWORD;

/// Point-in-time heap counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, serde::Serialize)]
pub struct HeapStats {
    /// Bytes between the heap base and the break.
    pub heap_size: usize,
    /// Bytes held in free blocks (headers and footers included).
    pub free_bytes: usize,
    pub free_blocks: usize,
    pub allocated_blocks: usize,
    /// Successful heap growth calls, including the one made by `init`.
    pub extend_calls: u64,
    /// `resize` calls that had to move the block.
    pub resize_moves: u64,
    /// `resize` calls satisfied by the existing block.
    pub resize_in_place: u64,
}

#[derive(Debug, Clone, Copy, Default)]
pub(crate) struct Counters {
    pub allocated_blocks: usize,
    pub allocated_bytes: usize,
    pub extend_calls: u64,
    pub resize_moves: u64,
    pub resize_in_place: u64,
}

/// Segregated-fit heap over an [`ArenaProvider`].
#[derive(Debug)]
pub struct Heap<A: ArenaProvider = VecArena> {
    pub(crate) arena: A,
    pub(crate) index: FreeIndex,
    pub(crate) config: HeapConfig,
    /// Offset of the padding word that starts the heap.
    pub(crate) base: usize,
    /// Payload offset of the prologue, `None` until `init` succeeds.
    pub(crate) prologue: Option<usize>,
    pub(crate) counters: Counters,
    log: LifecycleLog,
}

impl Heap<VecArena> {
    /// Creates an uninitialized heap over a default [`VecArena`].
    pub fn with_default_arena() -> Self {
        Self::new(VecArena::new(), HeapConfig::default())
    }
}

impl<A: ArenaProvider> Heap<A> {
    /// Creates an uninitialized heap; call [`Heap::init`] before use.
    pub fn new(arena: A, config: HeapConfig) -> Self {
        let config = config.normalized();
        Self {
            arena,
            index: FreeIndex::new(),
            config,
            base: 0,
            prologue: None,
            counters: Counters::default(),
            log: LifecycleLog::new(config.log_level),
        }
    }

    /// Lays down padding, prologue and epilogue at the current break and
    /// grows the heap by one chunk.
    ///
    /// May be called again to start a fresh heap; memory used by the
    /// previous heap stays in the arena unless [`Heap::reset`] ran first.
    pub fn init(&mut self) -> Result<()> {
        self.index.reset();
        self.counters = Counters::default();
        self.prologue = None;

        let brk = self.arena.len();
        let pad = brk.next_multiple_of(DWORD) - brk;
        let start = match self.arena.grow(pad + SENTINEL_OVERHEAD) {
            Ok(start) => start,
            Err(err) => {
                self.emit(
                    Event::new(AllocatorLogLevel::Warn, "init", "init_failed", "oom")
                        .size(pad + SENTINEL_OVERHEAD),
                    err.to_string(),
                );
                return Err(err.into());
            }
        };
        let base = start + pad;
        let mem = self.arena.as_bytes_mut();
        block::write_word(mem, base, 0)?;
        block::write_word(mem, base + WORD, block::pack(DWORD, true))?;
        block::write_word(mem, base + 2 * WORD, block::pack(DWORD, true))?;
        block::write_word(mem, base + 3 * WORD, block::pack(0, true))?;
        self.base = base;
        self.prologue = Some(base + DWORD);

        if let Err(err) = self.extend(self.config.chunk_size / WORD) {
            self.prologue = None;
            return Err(err);
        }
        let HeapConfig {
            chunk_size,
            search_start,
            ..
        } = self.config;
        self.emit_with(
            Event::new(AllocatorLogLevel::Info, "init", "init", "success")
                .ptr(base)
                .size(chunk_size),
            || format!("search_start={search_start:?}"),
        );
        Ok(())
    }

    /// Returns the heap to the uninitialized state and resets the arena.
    pub fn reset(&mut self) {
        self.arena.reset();
        self.index.reset();
        self.counters = Counters::default();
        self.base = 0;
        self.prologue = None;
    }

    /// Allocates at least `size` payload bytes.
    ///
    /// Returns `None` for zero-size requests, before `init`, and when the
    /// arena cannot grow; the heap is unchanged in every failure case.
    pub fn allocate(&mut self, size: usize) -> Option<usize> {
        self.try_allocate(size).ok()
    }

    pub fn try_allocate(&mut self, size: usize) -> Result<usize> {
        self.require_init()?;
        if size == 0 {
            self.emit(
                Event::new(AllocatorLogLevel::Trace, "malloc", "alloc_zero", "null"),
                "zero_size_request",
            );
            return Err(HeapError::InvalidArgument("zero-size allocation"));
        }
        let Some(asize) = block::adjusted_size(size) else {
            self.emit(
                Event::new(AllocatorLogLevel::Warn, "malloc", "alloc_overflow", "denied")
                    .size(size),
                "adjusted_size_overflow",
            );
            return Err(HeapError::SizeOverflow(size));
        };

        let (bp, path) = match self.find_fit(asize)? {
            Some(bp) => (bp, "free_list_hit"),
            None => {
                let extend = asize.max(self.config.chunk_size);
                match self.extend(extend / WORD) {
                    Ok(bp) => (bp, "heap_extended"),
                    Err(err) => {
                        self.emit(
                            Event::new(AllocatorLogLevel::Warn, "malloc", "alloc_oom", "oom")
                                .size(size)
                                .bin(free_list::classify(asize)),
                            err.to_string(),
                        );
                        return Err(err);
                    }
                }
            }
        };
        let placed = self.place(bp, asize)?;
        self.emit_with(
            Event::new(AllocatorLogLevel::Trace, "malloc", "alloc", "success")
                .ptr(bp)
                .size(size)
                .bin(free_list::classify(asize)),
            || format!("path={path} asize={asize} block_size={placed}"),
        );
        Ok(bp)
    }

    /// Frees the block at `ptr`; `NULL` is a no-op.
    ///
    /// Pointers that do not name a live block are logged and ignored.
    pub fn deallocate(&mut self, ptr: usize) {
        let _ = self.try_deallocate(ptr);
    }

    pub fn try_deallocate(&mut self, ptr: usize) -> Result<()> {
        if ptr == NULL {
            self.emit(
                Event::new(AllocatorLogLevel::Trace, "free", "free_null", "noop").ptr(ptr),
                "null_pointer",
            );
            return Ok(());
        }
        let tag = match self.live_block(ptr) {
            Ok(tag) => tag,
            Err(err) => {
                let event = match err {
                    HeapError::DoubleFree(_) => "double_free_detected",
                    _ => "invalid_free_pointer",
                };
                self.emit(
                    Event::new(AllocatorLogLevel::Warn, "free", event, "ignored").ptr(ptr),
                    err.to_string(),
                );
                return Err(err);
            }
        };

        block::write_tags(self.arena.as_bytes_mut(), ptr, Tag::new(tag.size, false))?;
        self.counters.allocated_blocks -= 1;
        self.counters.allocated_bytes -= tag.size;
        let merged = self.coalesce(ptr)?;
        self.emit_with(
            Event::new(AllocatorLogLevel::Trace, "free", "free", "success")
                .ptr(ptr)
                .size(tag.size),
            || format!("coalesced_into={merged:#x}"),
        );
        Ok(())
    }

    /// Resizes the block at `ptr` to hold at least `size` bytes.
    ///
    /// `NULL` behaves as `allocate(size)`; `size == 0` frees `ptr` and returns
    /// `None`. A block that already covers the request is returned unchanged,
    /// even when shrinking. Otherwise the payload moves to a new block sized
    /// for `resize_factor * size` bytes. On failure `ptr` is left untouched.
    pub fn resize(&mut self, ptr: usize, size: usize) -> Option<usize> {
        self.try_resize(ptr, size).ok().flatten()
    }

    /// Like [`Heap::resize`]; `Ok(None)` means the block was freed.
    pub fn try_resize(&mut self, ptr: usize, size: usize) -> Result<Option<usize>> {
        if ptr == NULL {
            return self.try_allocate(size).map(Some);
        }
        if size == 0 {
            self.try_deallocate(ptr)?;
            self.emit(
                Event::new(AllocatorLogLevel::Trace, "realloc", "realloc_zero_as_free", "freed")
                    .ptr(ptr),
                "new_size_was_zero",
            );
            return Ok(None);
        }

        let old = self.live_block(ptr)?;
        let asize = block::adjusted_size(size).ok_or(HeapError::SizeOverflow(size))?;
        if asize <= old.size {
            self.counters.resize_in_place += 1;
            self.emit_with(
                Event::new(AllocatorLogLevel::Trace, "realloc", "realloc_in_place", "success")
                    .ptr(ptr)
                    .size(size),
                || format!("block_size={} asize={asize}", old.size),
            );
            return Ok(Some(ptr));
        }

        let target = size
            .checked_mul(self.config.resize_factor)
            .ok_or(HeapError::SizeOverflow(size))?;
        let new_ptr = match self.try_allocate(target) {
            Ok(new_ptr) => new_ptr,
            Err(err) => {
                self.emit(
                    Event::new(AllocatorLogLevel::Warn, "realloc", "realloc_oom", "oom")
                        .ptr(ptr)
                        .size(target),
                    err.to_string(),
                );
                return Err(err);
            }
        };

        let payload = old.size - DWORD;
        self.arena
            .as_bytes_mut()
            .copy_within(ptr..ptr + payload, new_ptr);
        self.try_deallocate(ptr)?;
        self.counters.resize_moves += 1;
        self.emit_with(
            Event::new(AllocatorLogLevel::Trace, "realloc", "realloc_move", "success")
                .ptr(new_ptr)
                .size(size),
            || format!("old_ptr={ptr:#x} copied={payload} target={target}"),
        );
        Ok(Some(new_ptr))
    }

    /// Payload bytes of the live block at `ptr`.
    pub fn payload(&self, ptr: usize) -> Result<&[u8]> {
        let tag = self.live_block(ptr)?;
        Ok(&self.arena.as_bytes()[ptr..ptr + tag.size - DWORD])
    }

    pub fn payload_mut(&mut self, ptr: usize) -> Result<&mut [u8]> {
        let tag = self.live_block(ptr)?;
        Ok(&mut self.arena.as_bytes_mut()[ptr..ptr + tag.size - DWORD])
    }

    /// Usable payload bytes of the live block at `ptr`.
    pub fn usable_size(&self, ptr: usize) -> Option<usize> {
        self.live_block(ptr).ok().map(|tag| tag.size - DWORD)
    }

    pub fn stats(&self) -> HeapStats {
        let heap_size = self.heap_size();
        HeapStats {
            heap_size,
            free_bytes: self.free_bytes(),
            free_blocks: self.index.len(),
            allocated_blocks: self.counters.allocated_blocks,
            extend_calls: self.counters.extend_calls,
            resize_moves: self.counters.resize_moves,
            resize_in_place: self.counters.resize_in_place,
        }
    }

    pub fn is_initialized(&self) -> bool {
        self.prologue.is_some()
    }

    pub fn config(&self) -> &HeapConfig {
        &self.config
    }

    pub fn arena(&self) -> &A {
        &self.arena
    }

    /// Returns a view of allocator lifecycle log records.
    pub fn lifecycle_logs(&self) -> &[AllocatorLogRecord] {
        self.log.records()
    }

    /// Drains allocator lifecycle log records.
    pub fn drain_lifecycle_logs(&mut self) -> Vec<AllocatorLogRecord> {
        self.log.drain()
    }

    pub(crate) fn require_init(&self) -> Result<usize> {
        self.prologue.ok_or(HeapError::Uninitialized)
    }

    /// Validates that `ptr` names an allocated block and returns its tag.
    pub(crate) fn live_block(&self, ptr: usize) -> Result<Tag> {
        let prologue = self.require_init()?;
        let mem = self.arena.as_bytes();
        if ptr % DWORD != 0 || ptr <= prologue || ptr >= mem.len() {
            return Err(HeapError::InvalidPointer(ptr));
        }
        let header = block::header(mem, ptr)?;
        if header.size < MIN_BLOCK
            || ptr
                .checked_add(header.size)
                .is_none_or(|end| end > mem.len())
        {
            return Err(HeapError::InvalidPointer(ptr));
        }
        let footer = block::read_tag(mem, block::footer_offset(ptr, header.size))?;
        if footer.size != header.size {
            return Err(HeapError::InvalidPointer(ptr));
        }
        if !header.allocated {
            return Err(HeapError::DoubleFree(ptr));
        }
        Ok(header)
    }

    fn heap_size(&self) -> usize {
        if self.prologue.is_some() {
            self.arena.len() - self.base
        } else {
            0
        }
    }

    fn free_bytes(&self) -> usize {
        self.heap_size()
            .saturating_sub(SENTINEL_OVERHEAD)
            .saturating_sub(self.counters.allocated_bytes)
    }

    fn snapshot(&self) -> Snapshot {
        Snapshot {
            heap_size: self.heap_size(),
            free_bytes: self.free_bytes(),
            allocated_blocks: self.counters.allocated_blocks,
        }
    }

    pub(crate) fn emit(&mut self, event: Event, details: impl Into<String>) {
        if self.log.enabled(event.level) {
            let snapshot = self.snapshot();
            self.log.record(event, snapshot, details);
        }
    }

    pub(crate) fn emit_with(&mut self, event: Event, details: impl FnOnce() -> String) {
        if self.log.enabled(event.level) {
            let details = details();
            self.emit(event, details);
        }
    }
}
