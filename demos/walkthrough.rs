use std::ptr;

use libc::sbrk;
use tagalloc::{Heap, SbrkBackend};

/// Prints the current program break using `sbrk(0)`.
/// The program break is the upper boundary of the heap managed via brk/sbrk.
fn print_program_break(label: &str) {
  println!(
    "[{}] PID = {}, program break (sbrk(0)) = {:?}",
    label,
    std::process::id(),
    unsafe { sbrk(0) },
  );
}

fn main() {
  print_program_break("start");

  let Some(backend) = SbrkBackend::new() else {
    eprintln!("sbrk is not available");
    return;
  };

  let mut heap = match Heap::new(backend) {
    Ok(heap) => heap,
    Err(err) => {
      eprintln!("cannot initialize heap: {err}");
      return;
    }
  };

  print_program_break("after init");

  unsafe {
    // --------------------------------------------------------------------
    // 1) Two small allocations, carved out of the initial chunk.
    // --------------------------------------------------------------------
    let first = heap.allocate(16).expect("initial chunk has room");
    let second = heap.allocate(16).expect("initial chunk has room");
    println!("\n[1] first = {:?}, second = {:?}", first, second);

    first.cast::<u32>().write(0xDEADBEEF);
    println!("[1] Value written to first = 0x{:X}", first.cast::<u32>().read());

    // --------------------------------------------------------------------
    // 2) Free the first block and allocate something that fits in it.
    // --------------------------------------------------------------------
    heap.free(first);
    let third = heap.allocate(8).expect("freed block fits");
    println!(
      "\n[2] third = {:?}, reused first block? {}",
      third,
      if third == first { "Yes" } else { "No" }
    );

    // --------------------------------------------------------------------
    // 3) Grow the second block. Its contents move to a new block.
    // --------------------------------------------------------------------
    ptr::write_bytes(second.as_ptr(), 0xAB, 16);
    let grown = heap.reallocate(second, 512).expect("heap can grow");
    println!("\n[3] grown {:?} -> {:?}, first byte = 0x{:X}", second, grown, grown.read());

    // --------------------------------------------------------------------
    // 4) A large request extends the heap.
    // --------------------------------------------------------------------
    print_program_break("before large alloc");
    let big = heap.allocate(64 * 1024).expect("heap can grow");
    println!("\n[4] Allocated 64 KiB at {:?}", big);
    print_program_break("after large alloc");

    heap.free(big);
    heap.free(grown);
    heap.free(third);
  }

  // --------------------------------------------------------------------
  // 5) Everything is free again: one block spanning the whole heap.
  // --------------------------------------------------------------------
  println!("\n[5] {:?}", heap.stats());
  print!("{}", heap.check_heap(true));
}
