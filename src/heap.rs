use std::{
  marker::PhantomData,
  ptr::{self, NonNull},
};

use log::{debug, trace, warn};

use crate::{
  HeapConfig, HeapError, MemoryBackend,
  block::{
    self, DSIZE, MAX_BLOCK_SIZE, MIN_BLOCK_SIZE, OVERHEAD, Tag, WSIZE, adjusted_size,
    write_tag, write_tags,
  },
  freelist::FreeList,
};

/// Snapshot of how much of the heap is in use.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub struct HeapStats {
  /// Bytes obtained from the backend so far, sentinels included.
  pub heap_size: usize,
  /// Number of blocks in the free list.
  pub free_blocks: usize,
  /// Sum of the sizes of all free blocks, overhead included.
  pub free_bytes: usize,
}

/// Explicit free list allocator with boundary tag coalescing over a single
/// region provided by a [`MemoryBackend`].
///
/// ```text
///   ┌─────┬──────────┬──────────┬───────────────────────────┬──────────┐
///   │ pad │ hdr(8:a) │ ftr(8:a) │ zero or more user blocks  │ hdr(0:a) │
///   └─────┴──────────┴──────────┴───────────────────────────┴──────────┘
///         │       prologue      │                           │ epilogue │
/// ```
///
/// The allocated prologue and epilogue mean every user block has a neighbour
/// on both sides, so coalescing never needs a bounds check.
///
/// A `Heap` is neither `Send` nor `Sync`, whatever the backend:
///
/// ```compile_fail
/// fn share<T: Send + Sync>(_: T) {}
///
/// share(tagalloc::Heap::new(tagalloc::ArenaBackend::default()).unwrap());
/// ```
pub struct Heap<B: MemoryBackend> {
  pub(crate) backend: B,
  config: HeapConfig,
  /// Block pointer of the prologue.
  pub(crate) prologue: *mut u8,
  pub(crate) free_list: FreeList,
  _not_send: PhantomData<*mut u8>,
}

impl<B: MemoryBackend> Heap<B> {
  /// Builds a heap with the default [`HeapConfig`].
  pub fn new(backend: B) -> Result<Self, HeapError> {
    Self::with_config(backend, HeapConfig::default())
  }

  /// Writes the sentinel blocks and grows the heap by one chunk.
  pub fn with_config(
    mut backend: B,
    config: HeapConfig,
  ) -> Result<Self, HeapError> {
    config.validate()?;

    let Some(start) = backend.extend(4 * WSIZE) else {
      warn!("backend cannot supply the heap sentinels");
      return Err(HeapError::OutOfMemory { requested: 4 * WSIZE });
    };

    let start = start.as_ptr();
    if start as usize % DSIZE != 0 {
      return Err(HeapError::Misaligned { address: start as usize });
    }

    let prologue = unsafe {
      write_tag(start, Tag::from_raw(0));
      write_tag(start.add(WSIZE), Tag::new(DSIZE, true));
      write_tag(start.add(2 * WSIZE), Tag::new(DSIZE, true));
      write_tag(start.add(3 * WSIZE), Tag::new(0, true));

      start.add(2 * WSIZE)
    };

    let mut heap = Self {
      backend,
      config,
      prologue,
      free_list: FreeList::new(),
      _not_send: PhantomData,
    };

    heap.extend_heap(config.chunk_size / WSIZE)?;

    Ok(heap)
  }

  pub fn config(&self) -> &HeapConfig {
    &self.config
  }

  pub fn backend(&self) -> &B {
    &self.backend
  }

  /// Grows the heap by `words` words (rounded up to an even count) and turns
  /// the new space into a free block, merged with a free block that may have
  /// been sitting right before the old epilogue. The result is in the free
  /// list when this returns.
  fn extend_heap(
    &mut self,
    words: usize,
  ) -> Result<*mut u8, HeapError> {
    let size = if words % 2 == 1 { (words + 1) * WSIZE } else { words * WSIZE };

    // The whole heap has to stay describable by one tag, otherwise merging
    // everything into a single free block could overflow it.
    let total = self.backend.heap_size().checked_add(size);
    if total.is_none_or(|total| total > MAX_BLOCK_SIZE) {
      warn!("heap cannot grow past {} bytes", MAX_BLOCK_SIZE);
      return Err(HeapError::OutOfMemory { requested: size });
    }

    let Some(bp) = self.backend.extend(size) else {
      warn!("backend exhausted, cannot extend heap by {} bytes", size);
      return Err(HeapError::OutOfMemory { requested: size });
    };

    debug!("extended heap by {} bytes at {:?}", size, bp);

    unsafe {
      // The new header overwrites the old epilogue.
      let bp = bp.as_ptr();
      write_tags(bp, size, false);
      write_tag(block::header(block::next_block(bp)), Tag::new(0, true));

      let bp = self.coalesce(bp);
      self.free_list.insert(bp);

      Ok(bp)
    }
  }

  /// Allocates a block with at least `size` bytes of payload. The returned
  /// pointer is aligned to [`DSIZE`].
  pub fn allocate(
    &mut self,
    size: usize,
  ) -> Result<NonNull<u8>, HeapError> {
    if size == 0 {
      return Err(HeapError::InvalidSize(size));
    }

    let asize = adjusted_size(size).ok_or(HeapError::InvalidSize(size))?;

    let bp = match self.free_list.find_fit(asize, self.config.search) {
      Some(bp) => bp,
      None => self.extend_heap(asize.max(self.config.chunk_size) / WSIZE)?,
    };

    unsafe {
      self.free_list.remove(bp);
      self.place(bp, asize);
    }

    trace!("allocate({}) -> {:?}", size, bp);

    Ok(unsafe { NonNull::new_unchecked(bp) })
  }

  /// Marks the block at `bp` as allocated with `asize` bytes. If what's left
  /// can form a block of its own it is split off, merged with a free block
  /// right after it (only possible when shrinking an allocated block) and put
  /// in the free list. Otherwise the whole block stays allocated.
  ///
  /// # Safety
  ///
  /// `bp` must be a block of at least `asize` bytes that is not in the free
  /// list.
  unsafe fn place(
    &mut self,
    bp: *mut u8,
    asize: usize,
  ) {
    unsafe {
      let csize = block::block_size(bp);

      if csize - asize >= MIN_BLOCK_SIZE {
        write_tags(bp, asize, true);

        let rest = block::next_block(bp);
        write_tags(rest, csize - asize, false);

        let rest = self.coalesce(rest);
        self.free_list.insert(rest);
      } else {
        write_tags(bp, csize, true);
      }
    }
  }

  /// Releases the block at `ptr`.
  ///
  /// # Safety
  ///
  /// `ptr` must have been returned by [`Heap::allocate`] or
  /// [`Heap::reallocate`] on this heap and not freed since. Neither condition
  /// is checked.
  pub unsafe fn free(
    &mut self,
    ptr: NonNull<u8>,
  ) {
    let bp = ptr.as_ptr();

    unsafe {
      let size = block::block_size(bp);
      write_tags(bp, size, false);

      let bp = self.coalesce(bp);
      self.free_list.insert(bp);
    }

    trace!("free({:?})", ptr);
  }

  /// Merges the free block `bp` with its physical neighbours if they are free
  /// too. Neighbours are removed from the free list; the resulting block is
  /// returned and is not in the free list.
  ///
  /// ```text
  ///   prev      bp       next              result
  ///   ┌───┬─────────┬───┐
  ///   │ a │    f    │ a │   nothing         bp
  ///   │ a │    f    │ f │   bp + next       bp
  ///   │ f │    f    │ a │   prev + bp       prev
  ///   │ f │    f    │ f │   all three       prev
  ///   └───┴─────────┴───┘
  /// ```
  ///
  /// # Safety
  ///
  /// `bp` must be a free block, not in the free list.
  unsafe fn coalesce(
    &mut self,
    bp: *mut u8,
  ) -> *mut u8 {
    unsafe {
      let prev_allocated = block::read_tag(bp.sub(DSIZE)).is_allocated();
      let next_allocated = block::is_allocated(block::next_block(bp));
      let mut size = block::block_size(bp);

      match (prev_allocated, next_allocated) {
        (true, true) => bp,

        (true, false) => {
          let next = block::next_block(bp);
          self.free_list.remove(next);

          size += block::block_size(next);
          write_tags(bp, size, false);

          bp
        }

        (false, true) => {
          let prev = block::prev_block(bp);
          self.free_list.remove(prev);

          size += block::block_size(prev);
          write_tags(prev, size, false);

          prev
        }

        (false, false) => {
          let prev = block::prev_block(bp);
          let next = block::next_block(bp);
          self.free_list.remove(prev);
          self.free_list.remove(next);

          size += block::block_size(prev) + block::block_size(next);
          write_tags(prev, size, false);

          prev
        }
      }
    }
  }

  /// Resizes the allocation at `ptr` to hold at least `size` bytes.
  ///
  /// Shrinking, or asking for the size the block already has, keeps the same
  /// pointer; the tail is returned to the free list when it's large enough to
  /// be a block. Growing moves the contents to a new block and frees the old
  /// one. If that new block cannot be allocated the error is returned and
  /// `ptr` is left untouched and still valid.
  ///
  /// A `size` of zero shrinks the block to the minimum block size.
  ///
  /// # Safety
  ///
  /// Same contract as [`Heap::free`]: `ptr` must be a live allocation from
  /// this heap.
  pub unsafe fn reallocate(
    &mut self,
    ptr: NonNull<u8>,
    size: usize,
  ) -> Result<NonNull<u8>, HeapError> {
    let bp = ptr.as_ptr();
    let asize = adjusted_size(size).ok_or(HeapError::InvalidSize(size))?;
    let csize = unsafe { block::block_size(bp) };

    if csize >= asize {
      if csize > asize {
        unsafe { self.place(bp, asize) };
      }

      trace!("reallocate({:?}, {}) -> in place", ptr, size);

      return Ok(ptr);
    }

    let new = self.allocate(size)?;

    unsafe {
      ptr::copy_nonoverlapping(bp, new.as_ptr(), (csize - OVERHEAD).min(size));
      self.free(ptr);
    }

    trace!("reallocate({:?}, {}) -> {:?}", ptr, size, new);

    Ok(new)
  }

  /// Number of payload bytes the block at `ptr` can hold. At least the size
  /// it was allocated with.
  ///
  /// # Safety
  ///
  /// `ptr` must be a live allocation from this heap.
  pub unsafe fn usable_size(
    &self,
    ptr: NonNull<u8>,
  ) -> usize {
    unsafe { block::block_size(ptr.as_ptr()) - OVERHEAD }
  }

  pub fn stats(&self) -> HeapStats {
    HeapStats {
      heap_size: self.backend.heap_size(),
      free_blocks: self.free_list.len(),
      free_bytes: self
        .free_list
        .iter()
        .map(|bp| unsafe { block::block_size(bp) })
        .sum(),
    }
  }
}
