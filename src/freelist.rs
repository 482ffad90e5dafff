use std::ptr::{self, NonNull};

use crate::{
  SearchMode,
  block::{self, MIN_BLOCK_SIZE},
};

/// Links stored in the payload of a free block. Allocated blocks never carry
/// one, their payload belongs to the caller.
///
/// ```text
///   ┌────────┬──────────────┬──────────────┬─────────────┬────────┐
///   │ header │ next free bp │ prev free bp │   unused    │ footer │
///   └────────┴──────────────┴──────────────┴─────────────┴────────┘
///            ▲
///            └── bp == *mut FreeNode
/// ```
#[repr(C)]
pub(crate) struct FreeNode {
  pub next: *mut FreeNode,
  pub prev: *mut FreeNode,
}

/// Circular doubly linked list of free blocks. The root is a sentinel that
/// lives outside the heap, so inserting and removing never have to special
/// case an empty list or the ends:
///
/// ```text
///        ┌──────────────────────────────────────────────┐
///        ▼                                              │
///   ┌────────┐    ┌────────┐    ┌────────┐    ┌────────┐│
///   │  root  │ ─▶ │  free  │ ─▶ │  free  │ ─▶ │  free  │┘
///   └────────┘ ◀─ └────────┘ ◀─ └────────┘ ◀─ └────────┘
/// ```
///
/// New blocks go right after the root, so the list is in LIFO order.
pub(crate) struct FreeList {
  root: NonNull<FreeNode>,
  len: usize,
}

impl FreeList {
  /// Creates an empty list. The root points to itself.
  pub fn new() -> Self {
    let root = Box::into_raw(Box::new(FreeNode {
      next: ptr::null_mut(),
      prev: ptr::null_mut(),
    }));

    unsafe {
      (*root).next = root;
      (*root).prev = root;

      Self {
        root: NonNull::new_unchecked(root),
        len: 0,
      }
    }
  }

  pub fn len(&self) -> usize {
    self.len
  }

  /// First block in the list, the most recently inserted one.
  pub fn head(&self) -> Option<*mut u8> {
    let root = self.root.as_ptr();
    let first = unsafe { (*root).next };

    (first != root).then_some(first.cast())
  }

  /// Links the free block `bp` at the head of the list.
  ///
  /// # Safety
  ///
  /// `bp` must be a free block that is not already in the list.
  pub unsafe fn insert(
    &mut self,
    bp: *mut u8,
  ) {
    let root = self.root.as_ptr();
    let node = bp.cast::<FreeNode>();

    unsafe {
      (*node).next = (*root).next;
      (*node).prev = root;

      (*(*root).next).prev = node;
      (*root).next = node;
    }

    self.len += 1;
  }

  /// Unlinks `bp` from the list.
  ///
  /// # Safety
  ///
  /// `bp` must currently be in the list.
  pub unsafe fn remove(
    &mut self,
    bp: *mut u8,
  ) {
    let node = bp.cast::<FreeNode>();

    unsafe {
      (*(*node).prev).next = (*node).next;
      (*(*node).next).prev = (*node).prev;

      (*node).next = ptr::null_mut();
      (*node).prev = ptr::null_mut();
    }

    self.len -= 1;
  }

  /// Walks the list from the head, yielding block pointers.
  pub fn iter(&self) -> impl Iterator<Item = *mut u8> + '_ {
    let root = self.root.as_ptr();
    let mut current = unsafe { (*root).next };

    std::iter::from_fn(move || {
      if current == root {
        return None;
      }

      let bp = current;
      current = unsafe { (*current).next };

      Some(bp.cast())
    })
  }

  /// Searches the list for a block that can hold `asize` bytes.
  ///
  /// With [`SearchMode::GoodFit`] a block whose slack is at most
  /// [`MIN_BLOCK_SIZE`] is taken right away, since splitting it would not
  /// leave a usable remainder anyway. Otherwise the whole list is scanned and
  /// the block with the smallest slack wins; on ties the one closer to the
  /// head is kept.
  ///
  /// With [`SearchMode::FirstFit`] the first block that is big enough wins.
  pub fn find_fit(
    &self,
    asize: usize,
    mode: SearchMode,
  ) -> Option<*mut u8> {
    let mut best: Option<(usize, *mut u8)> = None;

    for bp in self.iter() {
      let size = unsafe { block::block_size(bp) };

      let Some(delta) = size.checked_sub(asize) else {
        continue;
      };

      if mode == SearchMode::FirstFit || delta <= MIN_BLOCK_SIZE {
        return Some(bp);
      }

      if best.is_none_or(|(best_delta, _)| delta < best_delta) {
        best = Some((delta, bp));
      }
    }

    best.map(|(_, bp)| bp)
  }
}

impl Drop for FreeList {
  fn drop(&mut self) {
    unsafe { drop(Box::from_raw(self.root.as_ptr())) }
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::block::{DSIZE, write_tags};

  /// Lays out free blocks of the given sizes back to back in `buffer`, with
  /// an allocated spacer block between each pair so nothing is adjacent.
  /// Returns the block pointers in physical order.
  fn lay_out(
    buffer: &mut [u64],
    sizes: &[usize],
  ) -> Vec<*mut u8> {
    let mut bp = unsafe { buffer.as_mut_ptr().cast::<u8>().add(DSIZE) };
    let mut blocks = Vec::new();

    for &size in sizes {
      unsafe {
        write_tags(bp, size, false);
        blocks.push(bp);
        bp = block::next_block(bp);
        write_tags(bp, MIN_BLOCK_SIZE, true);
        bp = block::next_block(bp);
      }
    }

    blocks
  }

  #[test]
  fn insert_remove_lifo() {
    let mut buffer = vec![0u64; 128];
    let blocks = lay_out(&mut buffer, &[32, 32, 32]);
    let mut list = FreeList::new();

    assert_eq!(list.len(), 0);
    assert_eq!(list.head(), None);

    unsafe {
      for &bp in &blocks {
        list.insert(bp);
      }

      assert_eq!(list.len(), 3);
      assert_eq!(list.head(), Some(blocks[2]));
      assert_eq!(list.iter().collect::<Vec<_>>(), vec![blocks[2], blocks[1], blocks[0]]);

      list.remove(blocks[1]);
      assert_eq!(list.iter().collect::<Vec<_>>(), vec![blocks[2], blocks[0]]);

      list.remove(blocks[2]);
      list.remove(blocks[0]);
    }

    assert_eq!(list.len(), 0);
    assert_eq!(list.iter().count(), 0);
  }

  #[test]
  fn good_fit_takes_small_slack_immediately() {
    let mut buffer = vec![0u64; 256];
    let blocks = lay_out(&mut buffer, &[48, 200, 64]);
    let mut list = FreeList::new();

    unsafe {
      for &bp in &blocks {
        list.insert(bp);
      }
    }

    // Head is the 64 byte block and its slack is exactly the minimum block
    // size, small enough to stop there.
    assert_eq!(list.find_fit(64 - MIN_BLOCK_SIZE, SearchMode::GoodFit), Some(blocks[2]));
  }

  #[test]
  fn good_fit_falls_back_to_best_fit() {
    let mut buffer = vec![0u64; 256];
    let blocks = lay_out(&mut buffer, &[400, 96, 200]);
    let mut list = FreeList::new();

    unsafe {
      for &bp in &blocks {
        list.insert(bp);
      }
    }

    // No slack is small enough, so the smallest positive one wins: 96 - 48.
    assert_eq!(list.find_fit(48, SearchMode::GoodFit), Some(blocks[1]));
    assert_eq!(list.find_fit(96, SearchMode::GoodFit), Some(blocks[1]));
    assert_eq!(list.find_fit(401, SearchMode::GoodFit), None);
  }

  #[test]
  fn first_fit_takes_the_head() {
    let mut buffer = vec![0u64; 256];
    let blocks = lay_out(&mut buffer, &[96, 400]);
    let mut list = FreeList::new();

    unsafe {
      for &bp in &blocks {
        list.insert(bp);
      }
    }

    assert_eq!(list.find_fit(48, SearchMode::FirstFit), Some(blocks[1]));
    assert_eq!(list.find_fit(48, SearchMode::GoodFit), Some(blocks[0]));
  }
}
