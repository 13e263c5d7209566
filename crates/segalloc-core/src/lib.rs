//! # segalloc-core
//!
//! A segregated free-list heap allocator over a growable byte arena.
//!
//! Pointers handed out by [`Heap`] are payload offsets into the arena, so the
//! whole allocator is safe Rust; callers read and write allocations through
//! [`Heap::payload`] and [`Heap::payload_mut`].

#![deny(unsafe_code)]

pub mod config;
pub mod error;
pub mod heap;
pub mod log;

pub use config::{HeapConfig, SearchStart};
pub use error::{ArenaError, HeapError};
pub use heap::{ArenaProvider, Heap, HeapReport, HeapStats, NULL, VecArena, Violation};
pub use log::{AllocatorLogLevel, AllocatorLogRecord};
