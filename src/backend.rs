//! Memory backends: where the bytes of the heap come from.
//!
//! The heap only ever asks for more memory at its end, exactly like `sbrk(2)`
//! moves the program break:
//!
//! ```text
//!   heap_lo                                  heap_hi  break
//!   ▼                                              ▼  ▼
//!   ┌──────────────────────────────────────────────┬─────────────────────┐
//!   │              bytes handed out so far         │   extend(n) grows   │
//!   └──────────────────────────────────────────────┴─────────────────────┘
//! ```

use std::{alloc, ptr::NonNull};

use log::warn;

use crate::block::DSIZE;

/// Default capacity of an [`ArenaBackend`], 20 MiB.
pub const MAX_HEAP: usize = 20 * (1 << 20);

/// Source of heap memory.
///
/// # Safety
///
/// Implementors must guarantee that:
///
/// - Every successful [`MemoryBackend::extend`] returns the previous end of the
///   region, so consecutive extensions are contiguous.
/// - The first extension starts at a [`DSIZE`] aligned address.
/// - All bytes handed out stay valid, readable and writable, and are not used
///   by anything else for as long as the backend is alive.
pub unsafe trait MemoryBackend {
  /// Grows the region by `increment` bytes and returns the old end of the
  /// region, or `None` if no more memory is available.
  fn extend(
    &mut self,
    increment: usize,
  ) -> Option<NonNull<u8>>;

  /// Address of the first byte of the region.
  fn heap_lo(&self) -> *mut u8;

  /// Address of the last byte of the region.
  fn heap_hi(&self) -> *mut u8;

  /// Number of bytes handed out so far.
  fn heap_size(&self) -> usize;
}

/// Fixed capacity region allocated up front, with a movable break. Useful for
/// tests and for running several independent heaps in one process.
pub struct ArenaBackend {
  start: NonNull<u8>,
  capacity: usize,
  brk: usize,
}

impl ArenaBackend {
  /// Reserves `capacity` bytes. Nothing is handed out until the first
  /// [`MemoryBackend::extend`].
  ///
  /// # Panics
  ///
  /// Panics if `capacity` does not fit in a [`Layout`](alloc::Layout) or the
  /// global allocator cannot supply it. Use [`ArenaBackend::try_new`] to get
  /// `None` instead.
  pub fn new(capacity: usize) -> Self {
    Self::try_new(capacity)
      .unwrap_or_else(|| panic!("cannot reserve an arena of {capacity} bytes"))
  }

  /// Same as [`ArenaBackend::new`], but returns `None` when the arena cannot
  /// be reserved.
  pub fn try_new(capacity: usize) -> Option<Self> {
    let layout = Self::layout(capacity)?;
    let start = NonNull::new(unsafe { alloc::alloc_zeroed(layout) })?;

    Some(Self {
      start,
      capacity,
      brk: 0,
    })
  }

  /// Total number of bytes this arena can hand out.
  pub fn capacity(&self) -> usize {
    self.capacity
  }

  fn layout(capacity: usize) -> Option<alloc::Layout> {
    // A zero sized layout cannot be allocated.
    alloc::Layout::from_size_align(capacity.max(DSIZE), DSIZE).ok()
  }
}

/// Panics like [`ArenaBackend::new`] if [`MAX_HEAP`] bytes cannot be reserved.
impl Default for ArenaBackend {
  fn default() -> Self {
    Self::new(MAX_HEAP)
  }
}

unsafe impl MemoryBackend for ArenaBackend {
  fn extend(
    &mut self,
    increment: usize,
  ) -> Option<NonNull<u8>> {
    let Some(new_brk) = self.brk.checked_add(increment).filter(|&brk| brk <= self.capacity) else {
      warn!(
        "arena exhausted: cannot extend by {} bytes ({} of {} in use)",
        increment, self.brk, self.capacity
      );
      return None;
    };

    let old_brk = unsafe { self.start.add(self.brk) };
    self.brk = new_brk;

    Some(old_brk)
  }

  fn heap_lo(&self) -> *mut u8 {
    self.start.as_ptr()
  }

  fn heap_hi(&self) -> *mut u8 {
    self.start.as_ptr().wrapping_add(self.brk).wrapping_sub(1)
  }

  fn heap_size(&self) -> usize {
    self.brk
  }
}

impl Drop for ArenaBackend {
  fn drop(&mut self) {
    // The layout was valid when the arena was reserved.
    if let Some(layout) = Self::layout(self.capacity) {
      unsafe { alloc::dealloc(self.start.as_ptr(), layout) }
    }
  }
}

#[cfg(unix)]
pub use sbrk::SbrkBackend;

#[cfg(unix)]
mod sbrk {
  use std::ptr::NonNull;

  use libc::{c_void, intptr_t, sbrk};
  use log::{debug, warn};

  use super::MemoryBackend;
  use crate::block::DSIZE;

  fn failed(address: *mut c_void) -> bool {
    address == usize::MAX as *mut c_void
  }

  /// Grows the process data segment with `sbrk(2)`.
  ///
  /// The heap assumes it owns everything between the break it first saw and
  /// the current one. If something else in the process moves the break in
  /// between (the system allocator may), further extensions are refused
  /// instead of handing out a non contiguous region.
  pub struct SbrkBackend {
    start: *mut u8,
    end: *mut u8,
  }

  impl SbrkBackend {
    /// Records the current program break, first moving it forward to the
    /// next [`DSIZE`] boundary if needed. `None` if `sbrk` fails.
    pub fn new() -> Option<Self> {
      unsafe {
        let current = sbrk(0);
        if failed(current) {
          return None;
        }

        let padding = (current as *mut u8).align_offset(DSIZE);
        if padding > 0 && failed(sbrk(padding as intptr_t)) {
          return None;
        }

        let start = (current as *mut u8).wrapping_add(padding);
        debug!("sbrk backend starts at {:?}", start);

        Some(Self { start, end: start })
      }
    }
  }

  unsafe impl MemoryBackend for SbrkBackend {
    fn extend(
      &mut self,
      increment: usize,
    ) -> Option<NonNull<u8>> {
      let increment = intptr_t::try_from(increment).ok()?;

      unsafe {
        if sbrk(0) as *mut u8 != self.end {
          warn!("program break moved outside of the heap, refusing to extend");
          return None;
        }

        let old_end = sbrk(increment);
        if failed(old_end) {
          warn!("sbrk({}) failed", increment);
          return None;
        }

        self.end = (old_end as *mut u8).add(increment as usize);

        NonNull::new(old_end.cast())
      }
    }

    fn heap_lo(&self) -> *mut u8 {
      self.start
    }

    fn heap_hi(&self) -> *mut u8 {
      self.end.wrapping_sub(1)
    }

    fn heap_size(&self) -> usize {
      self.end as usize - self.start as usize
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn arena_moves_break() {
    let mut arena = ArenaBackend::new(256);
    let lo = arena.heap_lo();

    assert_eq!(arena.heap_size(), 0);
    assert_eq!(lo as usize % DSIZE, 0);

    let first = arena.extend(16).unwrap();
    assert_eq!(first.as_ptr(), lo);

    let second = arena.extend(100).unwrap();
    assert_eq!(second.as_ptr() as usize, lo as usize + 16);
    assert_eq!(arena.heap_size(), 116);
    assert_eq!(arena.heap_hi() as usize, lo as usize + 115);
  }

  #[test]
  fn arena_runs_out() {
    let mut arena = ArenaBackend::new(64);

    assert!(arena.extend(48).is_some());
    assert!(arena.extend(17).is_none());
    assert!(arena.extend(usize::MAX).is_none());

    // A failed extension leaves the break untouched.
    assert_eq!(arena.heap_size(), 48);
    assert!(arena.extend(16).is_some());
    assert_eq!(arena.heap_size(), arena.capacity());
  }

  #[test]
  fn arena_too_large_for_a_layout() {
    assert!(ArenaBackend::try_new(usize::MAX).is_none());

    let arena = ArenaBackend::try_new(64).unwrap();
    assert_eq!(arena.capacity(), 64);
    assert_eq!(arena.heap_size(), 0);
  }
}
