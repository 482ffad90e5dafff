//! Heap consistency checker.
//!
//! Walks every block from the prologue to the epilogue and then the free list,
//! collecting whatever looks wrong. Nothing is repaired and nothing here runs
//! on the allocation paths; call [`Heap::check_heap`] from tests or while
//! debugging.

use std::fmt;

use log::{debug, warn};

use crate::{
  Heap, MemoryBackend,
  block::{self, DSIZE, Tag, WSIZE},
};

/// One thing wrong with the heap. Addresses are block pointers.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Inconsistency {
  /// Prologue header is not an allocated block of [`DSIZE`] bytes.
  BadPrologue { tag: Tag },
  /// The block list does not end in an allocated zero sized header at the end
  /// of the heap.
  BadEpilogue { address: usize, tag: Tag },
  /// Payload address not double-word aligned.
  Misaligned { address: usize },
  /// Header and footer disagree.
  TagMismatch { address: usize, header: Tag, footer: Tag },
  /// A block runs past the end of the heap. The walk stops here.
  OutOfBounds { address: usize, size: usize },
  /// Two physically adjacent blocks are both free.
  Uncoalesced { address: usize, next: usize },
  /// A block in the free list is marked allocated.
  AllocatedInFreeList { address: usize },
  /// Number of free blocks in the heap differs from the free list length.
  FreeCountMismatch { walked: usize, listed: usize },
}

impl fmt::Display for Inconsistency {
  fn fmt(
    &self,
    f: &mut fmt::Formatter<'_>,
  ) -> fmt::Result {
    match self {
      Inconsistency::BadPrologue { tag } => write!(f, "bad prologue header {tag}"),
      Inconsistency::BadEpilogue { address, tag } => {
        write!(f, "bad epilogue header {tag} at {address:#x}")
      }
      Inconsistency::Misaligned { address } => {
        write!(f, "{address:#x} is not doubleword aligned")
      }
      Inconsistency::TagMismatch { address, header, footer } => {
        write!(f, "{address:#x}: header {header} does not match footer {footer}")
      }
      Inconsistency::OutOfBounds { address, size } => {
        write!(f, "{address:#x}: block of {size} bytes runs past the end of the heap")
      }
      Inconsistency::Uncoalesced { address, next } => {
        write!(f, "free blocks {address:#x} and {next:#x} were not coalesced")
      }
      Inconsistency::AllocatedInFreeList { address } => {
        write!(f, "{address:#x} is in the free list but marked allocated")
      }
      Inconsistency::FreeCountMismatch { walked, listed } => {
        write!(f, "{walked} free blocks in the heap but {listed} in the free list")
      }
    }
  }
}

/// Header and footer of one block, as found by the checker.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct BlockInfo {
  pub address: usize,
  pub header: Tag,
  /// `None` for the epilogue, which has no footer.
  pub footer: Option<Tag>,
}

impl fmt::Display for BlockInfo {
  fn fmt(
    &self,
    f: &mut fmt::Formatter<'_>,
  ) -> fmt::Result {
    match self.footer {
      Some(footer) => {
        write!(f, "{:#x}: header: {} footer: {}", self.address, self.header, footer)
      }
      None => write!(f, "{:#x}: EOL", self.address),
    }
  }
}

/// Result of [`Heap::check_heap`]. `blocks` is only filled in verbose mode.
#[derive(Clone, Debug, Default)]
pub struct HeapReport {
  pub heap_lo: usize,
  pub blocks: Vec<BlockInfo>,
  pub issues: Vec<Inconsistency>,
}

impl HeapReport {
  pub fn is_ok(&self) -> bool {
    self.issues.is_empty()
  }

  fn flag(
    &mut self,
    issue: Inconsistency,
  ) {
    warn!("heap check: {}", issue);
    self.issues.push(issue);
  }
}

impl fmt::Display for HeapReport {
  fn fmt(
    &self,
    f: &mut fmt::Formatter<'_>,
  ) -> fmt::Result {
    writeln!(f, "Heap ({:#x}):", self.heap_lo)?;

    for block in &self.blocks {
      writeln!(f, "{block}")?;
    }

    for issue in &self.issues {
      writeln!(f, "Error: {issue}")?;
    }

    Ok(())
  }
}

impl<B: MemoryBackend> Heap<B> {
  /// Checks the structure of the whole heap. With `verbose` every block is
  /// recorded in the report and logged at debug level.
  pub fn check_heap(
    &self,
    verbose: bool,
  ) -> HeapReport {
    let lo = self.backend.heap_lo() as usize;
    let end = lo + self.backend.heap_size();

    let mut report = HeapReport {
      heap_lo: lo,
      ..HeapReport::default()
    };

    let record = |report: &mut HeapReport, info: BlockInfo| {
      if verbose {
        debug!("{}", info);
        report.blocks.push(info);
      }
    };

    unsafe {
      let prologue = self.prologue;
      let tag = block::read_tag(block::header(prologue));
      if tag.size() != DSIZE || !tag.is_allocated() {
        report.flag(Inconsistency::BadPrologue { tag });
      }
      let info = check_block(prologue, &mut report);
      record(&mut report, info);

      let mut walked_free = 0;
      let mut prev_free: Option<usize> = None;
      let mut bp = block::next_block(prologue);

      loop {
        let address = bp as usize;

        if address > end {
          report.flag(Inconsistency::OutOfBounds { address, size: 0 });
          break;
        }

        let tag = block::read_tag(block::header(bp));

        if tag.size() == 0 {
          record(&mut report, BlockInfo {
            address,
            header: tag,
            footer: None,
          });

          if !tag.is_allocated() || address != end {
            report.flag(Inconsistency::BadEpilogue { address, tag });
          }
          break;
        }

        // Footer is the last word of the block and the epilogue must still
        // fit after it.
        if address + tag.size() > end {
          report.flag(Inconsistency::OutOfBounds {
            address,
            size: tag.size(),
          });
          break;
        }

        let info = check_block(bp, &mut report);
        record(&mut report, info);

        if tag.is_allocated() {
          prev_free = None;
        } else {
          walked_free += 1;
          if let Some(prev) = prev_free {
            report.flag(Inconsistency::Uncoalesced { address: prev, next: address });
          }
          prev_free = Some(address);
        }

        bp = block::next_block(bp);
      }

      // A broken list could be circular without passing through the root, so
      // never walk more entries than it claims to have plus one.
      let mut listed = 0;
      for bp in self.free_list.iter().take(self.free_list.len() + 1) {
        listed += 1;
        if block::is_allocated(bp) {
          report.flag(Inconsistency::AllocatedInFreeList { address: bp as usize });
        }
      }

      if listed != walked_free {
        report.flag(Inconsistency::FreeCountMismatch { walked: walked_free, listed });
      }
    }

    report
  }
}

/// Alignment and header/footer agreement for a single block.
///
/// # Safety
///
/// The whole block at `bp` must lie inside the heap.
unsafe fn check_block(
  bp: *mut u8,
  report: &mut HeapReport,
) -> BlockInfo {
  let address = bp as usize;

  if address % DSIZE != 0 {
    report.flag(Inconsistency::Misaligned { address });
  }

  let header = unsafe { block::read_tag(block::header(bp)) };
  let footer = unsafe { block::read_tag(block::footer(bp)) };

  if header != footer {
    report.flag(Inconsistency::TagMismatch { address, header, footer });
  }

  BlockInfo {
    address,
    header,
    footer: Some(footer),
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::{ArenaBackend, CHUNKSIZE, block::write_tag};

  fn heap() -> Heap<ArenaBackend> {
    Heap::new(ArenaBackend::default()).unwrap()
  }

  #[test]
  fn fresh_heap_is_consistent() {
    let heap = heap();
    let report = heap.check_heap(true);

    assert!(report.is_ok(), "{report}");

    // Prologue, the initial free chunk, epilogue.
    assert_eq!(report.blocks.len(), 3);
    assert_eq!(report.blocks[0].header, Tag::new(DSIZE, true));
    assert_eq!(report.blocks[1].header, Tag::new(CHUNKSIZE, false));
    assert_eq!(report.blocks[2].footer, None);
  }

  #[test]
  fn quiet_mode_skips_the_dump() {
    let mut heap = heap();
    heap.allocate(10).unwrap();

    let report = heap.check_heap(false);
    assert!(report.is_ok());
    assert!(report.blocks.is_empty());
  }

  #[test]
  fn dump_format() {
    let mut heap = heap();
    let ptr = heap.allocate(16).unwrap();
    let report = heap.check_heap(true);
    let text = report.to_string();

    let size = unsafe { heap.usable_size(ptr) } + crate::OVERHEAD;
    let line = format!("{:#x}: header: [{size}:a] footer: [{size}:a]", ptr.as_ptr() as usize);

    assert!(text.starts_with(&format!("Heap ({:#x}):", report.heap_lo)));
    assert!(text.contains(&line), "{text}");
    assert!(text.trim_end().ends_with("EOL"), "{text}");
  }

  #[test]
  fn detects_footer_corruption() {
    let mut heap = heap();
    let ptr = heap.allocate(40).unwrap();

    unsafe {
      let footer = block::footer(ptr.as_ptr());
      write_tag(footer, Tag::new(8, true));
    }

    let report = heap.check_heap(false);
    assert!(matches!(
      report.issues.as_slice(),
      [Inconsistency::TagMismatch { address, .. }] if *address == ptr.as_ptr() as usize
    ));
  }

  #[test]
  fn detects_free_block_missing_from_list() {
    let mut heap = heap();
    let a = heap.allocate(40).unwrap();
    let _b = heap.allocate(40).unwrap();

    // Mark `a` free behind the allocator's back.
    unsafe {
      let size = block::block_size(a.as_ptr());
      block::write_tags(a.as_ptr(), size, false);
    }

    let report = heap.check_heap(false);
    assert_eq!(report.issues, vec![Inconsistency::FreeCountMismatch {
      walked: 2,
      listed: 1
    }]);
  }

  #[test]
  fn detects_uncoalesced_neighbours() {
    let mut heap = heap();
    let a = heap.allocate(40).unwrap();
    let b = heap.allocate(40).unwrap();
    let _guard = heap.allocate(40).unwrap();

    unsafe {
      heap.free(a);
      // Flip `b` to free without coalescing it.
      let size = block::block_size(b.as_ptr());
      block::write_tags(b.as_ptr(), size, false);
    }

    let report = heap.check_heap(false);
    assert!(report.issues.contains(&Inconsistency::Uncoalesced {
      address: a.as_ptr() as usize,
      next: b.as_ptr() as usize,
    }));
  }

  #[test]
  fn detects_bad_prologue_and_epilogue() {
    let heap = heap();

    unsafe {
      write_tag(block::header(heap.prologue), Tag::new(DSIZE, false));
      write_tag(block::footer(heap.prologue), Tag::new(DSIZE, false));

      let epilogue = heap.backend.heap_hi().sub(WSIZE - 1);
      write_tag(epilogue, Tag::new(0, false));
    }

    let report = heap.check_heap(false);
    assert!(matches!(report.issues[0], Inconsistency::BadPrologue { .. }));
    assert!(
      report
        .issues
        .iter()
        .any(|issue| matches!(issue, Inconsistency::BadEpilogue { .. }))
    );
  }
}
