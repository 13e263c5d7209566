//! Segregated-fit heap.
//!
//! Implements a boundary-tag allocator over a growable byte arena:
//! - Free blocks are indexed in power-of-two size-class buckets
//! - Allocation is first-fit, splitting blocks when the tail can stand alone
//! - Freed blocks are coalesced with free neighbours immediately

pub mod arena;
pub mod block;
pub mod free_list;

mod allocator;
mod check;
mod coalesce;
mod growth;
mod placement;

pub use allocator::{Heap, HeapStats, NULL};
pub use arena::{ArenaProvider, DEFAULT_ARENA_LIMIT, VecArena};
pub use check::{BlockInfo, HeapReport, Violation};
