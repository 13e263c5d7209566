//! Structured allocator lifecycle records.

use serde::Serialize;

/// Allocator lifecycle log level.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum AllocatorLogLevel {
    Trace,
    Debug,
    Info,
    Warn,
    Error,
}

/// Structured allocator lifecycle record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AllocatorLogRecord {
    /// Monotonic decision/event id.
    pub decision_id: u64,
    /// Correlation id for this lifecycle record.
    pub trace_id: String,
    /// Severity level.
    pub level: AllocatorLogLevel,
    /// API symbol (`init`, `malloc`, `free`, `realloc`).
    pub symbol: &'static str,
    /// Event kind (`alloc`, `free`, `extend`, ...).
    pub event: &'static str,
    /// Payload offset involved in the event.
    pub ptr: Option<usize>,
    /// Size value involved in the event.
    pub size: Option<usize>,
    /// Size-class bucket involved in the event.
    pub bin: Option<usize>,
    /// Machine-readable outcome label.
    pub outcome: &'static str,
    /// Free-form details for debugging.
    pub details: String,
    /// Snapshot: bytes currently managed by the heap.
    pub heap_size: usize,
    /// Snapshot: bytes currently held in free blocks.
    pub free_bytes: usize,
    /// Snapshot: live allocated blocks (sentinels excluded).
    pub allocated_blocks: usize,
}

/// Event fields supplied by the caller of [`LifecycleLog::record`].
#[derive(Debug, Clone, Copy)]
pub(crate) struct Event {
    pub level: AllocatorLogLevel,
    pub symbol: &'static str,
    pub event: &'static str,
    pub ptr: Option<usize>,
    pub size: Option<usize>,
    pub bin: Option<usize>,
    pub outcome: &'static str,
}

impl Event {
    pub(crate) fn new(
        level: AllocatorLogLevel,
        symbol: &'static str,
        event: &'static str,
        outcome: &'static str,
    ) -> Self {
        Self {
            level,
            symbol,
            event,
            ptr: None,
            size: None,
            bin: None,
            outcome,
        }
    }

    pub(crate) fn ptr(mut self, ptr: usize) -> Self {
        self.ptr = Some(ptr);
        self
    }

    pub(crate) fn size(mut self, size: usize) -> Self {
        self.size = Some(size);
        self
    }

    pub(crate) fn bin(mut self, bin: usize) -> Self {
        self.bin = Some(bin);
        self
    }
}

/// Heap-level counters captured alongside every record.
#[derive(Debug, Clone, Copy, Default)]
pub(crate) struct Snapshot {
    pub heap_size: usize,
    pub free_bytes: usize,
    pub allocated_blocks: usize,
}

/// Level-filtered, in-memory buffer of lifecycle records.
#[derive(Debug, Default)]
pub(crate) struct LifecycleLog {
    threshold: Option<AllocatorLogLevel>,
    next_decision_id: u64,
    records: Vec<AllocatorLogRecord>,
}

impl LifecycleLog {
    pub(crate) fn new(threshold: Option<AllocatorLogLevel>) -> Self {
        Self {
            threshold,
            next_decision_id: 1,
            records: Vec::new(),
        }
    }

    /// Returns whether records at `level` are captured.
    pub(crate) fn enabled(&self, level: AllocatorLogLevel) -> bool {
        self.threshold.is_some_and(|min| level >= min)
    }

    pub(crate) fn record(&mut self, event: Event, snapshot: Snapshot, details: impl Into<String>) {
        if !self.enabled(event.level) {
            return;
        }
        let decision_id = self.next_decision_id;
        self.next_decision_id = self.next_decision_id.wrapping_add(1);
        let trace_id = format!("segalloc::heap::{}::{:016x}", event.symbol, decision_id);
        self.records.push(AllocatorLogRecord {
            decision_id,
            trace_id,
            level: event.level,
            symbol: event.symbol,
            event: event.event,
            ptr: event.ptr,
            size: event.size,
            bin: event.bin,
            outcome: event.outcome,
            details: details.into(),
            heap_size: snapshot.heap_size,
            free_bytes: snapshot.free_bytes,
            allocated_blocks: snapshot.allocated_blocks,
        });
    }

    pub(crate) fn records(&self) -> &[AllocatorLogRecord] {
        &self.records
    }

    pub(crate) fn drain(&mut self) -> Vec<AllocatorLogRecord> {
        std::mem::take(&mut self.records)
    }
}
