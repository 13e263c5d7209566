//! Heap tuning knobs.
//!
//! Every knob has a compiled-in default and can be overridden through the
//! environment with [`HeapConfig::from_env`]:
//! - `SEGALLOC_CHUNK_SIZE`: minimum number of bytes requested from the arena
//!   when no free block fits (default 4096).
//! - `SEGALLOC_RESIZE_FACTOR`: multiplier applied to the requested size when
//!   `resize` has to relocate a block (default 2).
//! - `SEGALLOC_SEARCH`: `skip` (default) starts the fit search one size class
//!   above the canonical class, `canonical` starts at the canonical class.
//! - `SEGALLOC_LOG`: minimum captured lifecycle level (`trace`, `debug`,
//!   `info`, `warn`, `error`) or `off`.
//!
//! Unparseable values fall back to the defaults.

use crate::heap::block::{DWORD, MIN_BLOCK};
use crate::log::AllocatorLogLevel;

/// Bytes requested from the arena when the heap has to grow (`CHUNKSIZE`).
pub const DEFAULT_CHUNK_SIZE: usize = 1 << 12;

/// Resize relocation policy: a moved block is allocated for
/// `DEFAULT_RESIZE_FACTOR * n` bytes so that repeated small growth only
/// relocates a logarithmic number of times.
pub const DEFAULT_RESIZE_FACTOR: usize = 2;

/// Where `find_fit` begins scanning the size-class table.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SearchStart {
    /// Start one class above `classify(asize)` unless that is the top class.
    /// Blocks in the canonical bucket are never considered, which keeps scans
    /// short at the cost of extra internal fragmentation.
    #[default]
    SkipCanonical,
    /// Start at `classify(asize)`.
    Canonical,
}

impl SearchStart {
    /// Parse from string (case-insensitive).
    #[must_use]
    pub fn from_str_loose(s: &str) -> Self {
        match s.to_ascii_lowercase().as_str() {
            "canonical" | "exact" | "first" => Self::Canonical,
            _ => Self::SkipCanonical,
        }
    }
}

/// Configuration for one [`Heap`](crate::heap::Heap).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HeapConfig {
    /// Minimum growth request in bytes; a multiple of `DWORD`, at least
    /// `MIN_BLOCK`.
    pub chunk_size: usize,
    /// Multiplier used when `resize` relocates; at least 1.
    pub resize_factor: usize,
    pub search_start: SearchStart,
    /// Minimum level recorded into the lifecycle log, `None` disables capture.
    pub log_level: Option<AllocatorLogLevel>,
}

impl Default for HeapConfig {
    fn default() -> Self {
        Self {
            chunk_size: DEFAULT_CHUNK_SIZE,
            resize_factor: DEFAULT_RESIZE_FACTOR,
            search_start: SearchStart::SkipCanonical,
            log_level: Some(AllocatorLogLevel::Info),
        }
    }
}

impl HeapConfig {
    /// Reads overrides from the process environment.
    #[must_use]
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Builds a config from an arbitrary key lookup (the environment in
    /// production, a map in tests).
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let defaults = Self::default();
        let chunk_size = lookup("SEGALLOC_CHUNK_SIZE")
            .and_then(|v| v.trim().parse::<usize>().ok())
            .unwrap_or(defaults.chunk_size);
        let resize_factor = lookup("SEGALLOC_RESIZE_FACTOR")
            .and_then(|v| v.trim().parse::<usize>().ok())
            .unwrap_or(defaults.resize_factor);
        let search_start = lookup("SEGALLOC_SEARCH")
            .map(|v| SearchStart::from_str_loose(v.trim()))
            .unwrap_or(defaults.search_start);
        let log_level = match lookup("SEGALLOC_LOG") {
            Some(v) => parse_log_level(v.trim()),
            None => defaults.log_level,
        };
        Self {
            chunk_size,
            resize_factor,
            search_start,
            log_level,
        }
        .normalized()
    }

    #[must_use]
    pub fn with_chunk_size(mut self, chunk_size: usize) -> Self {
        self.chunk_size = chunk_size;
        self.normalized()
    }

    #[must_use]
    pub fn with_resize_factor(mut self, resize_factor: usize) -> Self {
        self.resize_factor = resize_factor;
        self.normalized()
    }

    #[must_use]
    pub fn with_search_start(mut self, search_start: SearchStart) -> Self {
        self.search_start = search_start;
        self
    }

    #[must_use]
    pub fn with_log_level(mut self, log_level: Option<AllocatorLogLevel>) -> Self {
        self.log_level = log_level;
        self
    }

    /// Rounds `chunk_size` up to a multiple of `DWORD` no smaller than
    /// `MIN_BLOCK` and clamps `resize_factor` to at least 1.
    #[must_use]
    pub fn normalized(mut self) -> Self {
        let chunk = self.chunk_size.max(MIN_BLOCK);
        self.chunk_size = chunk
            .checked_next_multiple_of(DWORD)
            .unwrap_or(DEFAULT_CHUNK_SIZE);
        self.resize_factor = self.resize_factor.max(1);
        self
    }
}

fn parse_log_level(raw: &str) -> Option<AllocatorLogLevel> {
    match raw.to_ascii_lowercase().as_str() {
        "trace" => Some(AllocatorLogLevel::Trace),
        "debug" => Some(AllocatorLogLevel::Debug),
        "warn" | "warning" => Some(AllocatorLogLevel::Warn),
        "error" => Some(AllocatorLogLevel::Error),
        "off" | "none" | "disabled" => None,
        _ => Some(AllocatorLogLevel::Info),
    }
}
