//! Errors returned by [`crate::Heap`].
//!
//! Only conditions the caller can do something about are reported. Handing the
//! heap a pointer it never gave out, or freeing one twice, is not detected;
//! those operations are `unsafe` and their contracts say so.

use std::{error, fmt};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HeapError {
  /// The memory backend could not extend the heap by `requested` bytes.
  OutOfMemory { requested: usize },

  /// Zero sized allocation, or a size too large for a block to describe.
  InvalidSize(usize),

  /// Heap extension chunk outside of the range a block can describe.
  InvalidChunkSize(usize),

  /// The backend returned a heap start that is not double-word aligned.
  Misaligned { address: usize },
}

impl fmt::Display for HeapError {
  fn fmt(
    &self,
    f: &mut fmt::Formatter<'_>,
  ) -> fmt::Result {
    match self {
      HeapError::OutOfMemory { requested } => {
        write!(f, "out of memory: backend could not extend the heap by {requested} bytes")
      }
      HeapError::InvalidSize(size) => write!(f, "invalid allocation size: {size}"),
      HeapError::InvalidChunkSize(size) => write!(f, "invalid heap chunk size: {size}"),
      HeapError::Misaligned { address } => {
        write!(f, "heap start {address:#x} is not double-word aligned")
      }
    }
  }
}

impl error::Error for HeapError {}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn messages() {
    assert_eq!(
      HeapError::OutOfMemory { requested: 4096 }.to_string(),
      "out of memory: backend could not extend the heap by 4096 bytes"
    );
    assert_eq!(HeapError::InvalidSize(0).to_string(), "invalid allocation size: 0");
    assert_eq!(
      HeapError::Misaligned { address: 0x1004 }.to_string(),
      "heap start 0x1004 is not double-word aligned"
    );
  }
}
