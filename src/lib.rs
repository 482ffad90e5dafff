//! # tagalloc - An Explicit Free List Heap Allocator
//!
//! This crate implements a general purpose heap manager over a single,
//! growable, linear region of memory. Freed space is reused, and neighbouring
//! free blocks are merged as soon as they appear using **boundary tags**.
//!
//! ## Overview
//!
//! ```text
//!   Heap Layout:
//!
//!   ┌──────────────────────────────────────────────────────────────────────┐
//!   │                            HEAP MEMORY                               │
//!   │                                                                      │
//!   │  ┌───┬───────┬──────┬──────┬──────┬──────┬──────────────────┬─────┐  │
//!   │  │pad│ prol. │  A1  │  F1  │  A2  │  A3  │        F2        │ epi.│  │
//!   │  └───┴───────┴──────┴──────┴──────┴──────┴──────────────────┴─────┘  │
//!   │               ▲      ▲                    ▲                     ▲    │
//!   │               │      │                    │                     │    │
//!   │           allocated  └─── free list ──────┘                   heap   │
//!   │                                                               break  │
//!   └──────────────────────────────────────────────────────────────────────┘
//!
//!   Free blocks are linked through their own payload, most recently freed
//!   first. When nothing fits, the heap grows at the break.
//! ```
//!
//! ## Crate Structure
//!
//! ```text
//!   tagalloc
//!   ├── align      - Alignment macros (align!, align_to!)
//!   ├── backend    - MemoryBackend trait, ArenaBackend, SbrkBackend
//!   ├── block      - Boundary tags and block arithmetic
//!   ├── check      - Heap consistency checker
//!   ├── config     - HeapConfig and SearchMode
//!   ├── error      - HeapError
//!   ├── freelist   - Explicit free list and fit search (internal)
//!   └── heap       - Heap: allocate, free, reallocate
//! ```
//!
//! ## Quick Start
//!
//! ```rust
//! use tagalloc::{ArenaBackend, Heap};
//!
//! let mut heap = Heap::new(ArenaBackend::default()).unwrap();
//!
//! let ptr = heap.allocate(64).unwrap();
//! unsafe {
//!   ptr.as_ptr().write_bytes(0xAB, 64);
//!
//!   let ptr = heap.reallocate(ptr, 256).unwrap();
//!   assert_eq!(*ptr.as_ptr(), 0xAB);
//!
//!   heap.free(ptr);
//! }
//!
//! assert!(heap.check_heap(false).is_ok());
//! ```
//!
//! ## How It Works
//!
//! Every block carries its size and allocated bit twice, in a header and in a
//! footer:
//!
//! ```text
//!   Single Block:
//!   ┌──────────┬──────────────────────────────────────────┬──────────┐
//!   │  header  │               payload                    │  footer  │
//!   │ size | a │  (free blocks: next / prev free links)   │ size | a │
//!   └──────────┴──────────────────────────────────────────┴──────────┘
//!              ▲
//!              └── Pointer returned to user, 8 byte aligned
//! ```
//!
//! The footer of the previous block sits right before a header, so both
//! physical neighbours of any block can be inspected in O(1). Freeing a block
//! merges it with whichever neighbours are free, so two free blocks are never
//! adjacent.
//!
//! ## Limitations
//!
//! - **Single-threaded only**: `Heap` is not `Send` or `Sync`.
//! - **Never shrinks**: memory is not returned to the backend.
//! - **Unchecked frees**: freeing a foreign or already freed pointer is
//!   undefined behaviour, hence `free` and `reallocate` are `unsafe`.
//! - **4 GiB**: tags are 32 bits wide, so a heap cannot grow past that.

pub mod align;
pub mod backend;
mod block;
mod check;
mod config;
mod error;
mod freelist;
mod heap;

pub use backend::{ArenaBackend, MAX_HEAP, MemoryBackend};
#[cfg(unix)]
pub use backend::SbrkBackend;
pub use block::{DSIZE, MAX_BLOCK_SIZE, MIN_BLOCK_SIZE, OVERHEAD, Tag, WSIZE};
pub use check::{BlockInfo, HeapReport, Inconsistency};
pub use config::{CHUNKSIZE, HeapConfig, SearchMode};
pub use error::HeapError;
pub use heap::{Heap, HeapStats};
