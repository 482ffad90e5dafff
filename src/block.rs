use std::{fmt, mem, ptr};

use crate::{align, freelist::FreeNode};

/// Word size in bytes. Boundary tags are one word each.
pub const WSIZE: usize = mem::size_of::<u32>();

/// Double word size in bytes. Payload addresses and block sizes are always a
/// multiple of this.
pub const DSIZE: usize = 2 * WSIZE;

/// Header plus footer.
pub const OVERHEAD: usize = 2 * WSIZE;

/// A free block has to hold a [`FreeNode`] in its payload, so the payload can
/// never be smaller than this.
pub(crate) const MIN_PAYLOAD: usize = mem::size_of::<FreeNode>();

/// Smallest block that can exist in the heap. Splitting never leaves a
/// remainder smaller than this.
pub const MIN_BLOCK_SIZE: usize = {
  let block = align!(MIN_PAYLOAD) + OVERHEAD;
  if block > 2 * DSIZE { block } else { 2 * DSIZE }
};

/// Largest block size a tag can describe.
pub const MAX_BLOCK_SIZE: usize = u32::MAX as usize & !(DSIZE - 1);

/// A boundary tag. Headers and footers store the same value:
///
/// ```text
///   31                              3   2   1   0
///  ┌───────────────────────────────┬───┬───┬───┐
///  │ s  s  s  s  ...  s  s  s  s  s │ 0 │ 0 │a/f│
///  └───────────────────────────────┴───┴───┴───┘
/// ```
///
/// Sizes are multiples of [`DSIZE`], so the three low bits are free and the
/// lowest one records whether the block is allocated.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub struct Tag(u32);

impl Tag {
  /// Packs a size and an allocated bit into a tag. `size` must be a multiple
  /// of [`DSIZE`] no larger than [`MAX_BLOCK_SIZE`].
  #[inline]
  pub const fn new(
    size: usize,
    allocated: bool,
  ) -> Self {
    Self(size as u32 | allocated as u32)
  }

  #[inline]
  pub const fn from_raw(raw: u32) -> Self {
    Self(raw)
  }

  #[inline]
  pub const fn raw(self) -> u32 {
    self.0
  }

  /// Block size in bytes, overhead included.
  #[inline]
  pub const fn size(self) -> usize {
    (self.0 & !0x7) as usize
  }

  #[inline]
  pub const fn is_allocated(self) -> bool {
    self.0 & 0x1 == 1
  }
}

impl fmt::Display for Tag {
  fn fmt(
    &self,
    f: &mut fmt::Formatter<'_>,
  ) -> fmt::Result {
    write!(f, "[{}:{}]", self.size(), if self.is_allocated() { 'a' } else { 'f' })
  }
}

// All functions below take a block pointer `bp`, which points to the first
// payload byte of a block (one word past its header):
//
//   ┌────────┬─────────────────────────────┬────────┐
//   │ header │           payload           │ footer │
//   └────────┴─────────────────────────────┴────────┘
//            ▲
//            └── bp
//
// The word right before a header is the footer of the previous block, and the
// word right after a footer is the header of the next one.

/// Reads the tag stored at `p`.
///
/// # Safety
///
/// `p` must point to a tag inside the heap.
#[inline]
pub(crate) unsafe fn read_tag(p: *const u8) -> Tag {
  unsafe { Tag(ptr::read(p.cast::<u32>())) }
}

/// Writes `tag` at `p`.
///
/// # Safety
///
/// `p` must point to a word inside the heap.
#[inline]
pub(crate) unsafe fn write_tag(
  p: *mut u8,
  tag: Tag,
) {
  unsafe { ptr::write(p.cast::<u32>(), tag.0) }
}

/// Address of the header of `bp`.
#[inline]
pub(crate) fn header(bp: *mut u8) -> *mut u8 {
  bp.wrapping_sub(WSIZE)
}

/// Address of the footer of `bp`. Depends on the size stored in the header,
/// so the header has to be written first.
///
/// # Safety
///
/// `bp` must be a valid block pointer.
#[inline]
pub(crate) unsafe fn footer(bp: *mut u8) -> *mut u8 {
  unsafe { bp.add(block_size(bp)).sub(DSIZE) }
}

/// Size of the block at `bp`, read from its header.
///
/// # Safety
///
/// `bp` must be a valid block pointer.
#[inline]
pub(crate) unsafe fn block_size(bp: *mut u8) -> usize {
  unsafe { read_tag(header(bp)).size() }
}

/// # Safety
///
/// `bp` must be a valid block pointer.
#[inline]
pub(crate) unsafe fn is_allocated(bp: *mut u8) -> bool {
  unsafe { read_tag(header(bp)).is_allocated() }
}

/// Block pointer of the block physically after `bp`.
///
/// # Safety
///
/// `bp` must be a valid block pointer other than the epilogue.
#[inline]
pub(crate) unsafe fn next_block(bp: *mut u8) -> *mut u8 {
  unsafe { bp.add(block_size(bp)) }
}

/// Block pointer of the block physically before `bp`, found through the
/// previous block's footer.
///
/// # Safety
///
/// `bp` must be a valid block pointer located after the prologue.
#[inline]
pub(crate) unsafe fn prev_block(bp: *mut u8) -> *mut u8 {
  unsafe {
    let prev_size = read_tag(bp.sub(DSIZE)).size();
    bp.sub(prev_size)
  }
}

/// Writes identical header and footer tags for a block of `size` bytes.
///
/// # Safety
///
/// `bp` must be a block pointer and `size` bytes starting at its header must
/// lie inside the heap.
#[inline]
pub(crate) unsafe fn write_tags(
  bp: *mut u8,
  size: usize,
  allocated: bool,
) {
  unsafe {
    write_tag(header(bp), Tag::new(size, allocated));
    write_tag(footer(bp), Tag::new(size, allocated));
  }
}

/// Rounds a requested payload size up to a block size: room for a free list
/// node, plus overhead, double-word aligned. `None` if the result cannot be
/// described by a tag.
pub(crate) fn adjusted_size(size: usize) -> Option<usize> {
  let size = size.max(MIN_PAYLOAD);

  // Only reachable when a free node fits in DSIZE bytes, i.e. 32-bit targets.
  if size <= DSIZE {
    return Some(2 * DSIZE);
  }

  let asize = size.checked_add(OVERHEAD + DSIZE - 1)? & !(DSIZE - 1);

  (asize <= MAX_BLOCK_SIZE).then_some(asize)
}
