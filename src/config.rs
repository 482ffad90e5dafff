use crate::{
  HeapError,
  block::{MAX_BLOCK_SIZE, MIN_BLOCK_SIZE},
};

/// Default number of bytes the heap grows by when no free block fits, and the
/// size of the first free block created at initialization.
pub const CHUNKSIZE: usize = 1 << 12;

/// How the free list is searched on allocation.
#[derive(Clone, Copy, PartialEq, Eq, Debug, Default)]
pub enum SearchMode {
  /// Stop at the first block whose slack is too small to split, otherwise
  /// take the block with the least slack.
  #[default]
  GoodFit,
  /// Stop at the first block that is big enough.
  FirstFit,
}

/// Tunables for a [`crate::Heap`].
///
/// ```rust
/// use tagalloc::{HeapConfig, SearchMode};
///
/// let config = HeapConfig::default()
///   .with_chunk_size(8192)
///   .with_search(SearchMode::FirstFit);
///
/// assert_eq!(config.chunk_size, 8192);
/// ```
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub struct HeapConfig {
  /// Minimum number of bytes requested from the backend per extension.
  pub chunk_size: usize,
  pub search: SearchMode,
}

impl Default for HeapConfig {
  fn default() -> Self {
    Self {
      chunk_size: CHUNKSIZE,
      search: SearchMode::default(),
    }
  }
}

impl HeapConfig {
  pub fn with_chunk_size(
    mut self,
    chunk_size: usize,
  ) -> Self {
    self.chunk_size = chunk_size;
    self
  }

  pub fn with_search(
    mut self,
    search: SearchMode,
  ) -> Self {
    self.search = search;
    self
  }

  /// A chunk has to fit at least one minimum block and still be describable
  /// by a tag once rounded up.
  pub(crate) fn validate(&self) -> Result<(), HeapError> {
    if self.chunk_size < MIN_BLOCK_SIZE || self.chunk_size > MAX_BLOCK_SIZE {
      return Err(HeapError::InvalidChunkSize(self.chunk_size));
    }

    Ok(())
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn defaults() {
    let config = HeapConfig::default();
    assert_eq!(config.chunk_size, 4096);
    assert_eq!(config.search, SearchMode::GoodFit);
    assert!(config.validate().is_ok());
  }

  #[test]
  fn rejects_unusable_chunks() {
    let tiny = HeapConfig::default().with_chunk_size(MIN_BLOCK_SIZE - 1);
    assert_eq!(tiny.validate(), Err(HeapError::InvalidChunkSize(MIN_BLOCK_SIZE - 1)));

    let huge = HeapConfig::default().with_chunk_size(usize::MAX);
    assert_eq!(huge.validate(), Err(HeapError::InvalidChunkSize(usize::MAX)));

    let smallest = HeapConfig::default().with_chunk_size(MIN_BLOCK_SIZE);
    assert!(smallest.validate().is_ok());
  }
}
