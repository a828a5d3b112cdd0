//! The kernel heap: `linked_list_allocator` provides the size-aware,
//! coalescing allocator itself (its free list already carries a header per
//! block and merges adjacent free blocks in both directions on free), and
//! this module's only job is to map the backing pages through the kernel
//! directory before handing the range to it.
//!
//! Unlike a long-mode heap (mapped through the `x86_64` crate's typed
//! `Mapper`/`FrameAllocator` traits against a `BootInfo`-provided physical
//! memory offset), this kernel has no such offset to thread
//! through: [`crate::memory::vmm::map`] already knows how to reach any
//! directory via the direct map, so initialization here is a page-aligned
//! loop over [`crate::config::HEAP_START`]..`+HEAP_SIZE`.

use linked_list_allocator::LockedHeap;

pub use crate::config::HEAP_SIZE;
use crate::config::{FRAME_SIZE, HEAP_START};
use crate::memory::pmm;
use crate::memory::vmm::{self, PteFlags};

#[global_allocator]
static ALLOCATOR: LockedHeap = LockedHeap::empty();

/// Maps [`HEAP_SIZE`] bytes starting at [`HEAP_START`] into `kernel_dir_phys`
/// (present, writable, kernel-only) and hands the range to the global
/// allocator.
///
/// # Safety
/// Must run exactly once, after [`crate::memory::init`], and before any
/// `alloc`-backed type (a `Box`, `Vec`, ...) is ever constructed.
pub unsafe fn init_heap(kernel_dir_phys: u32) {
    let flags = PteFlags::PRESENT | PteFlags::WRITABLE;
    let mut virt = HEAP_START;
    let end = HEAP_START + HEAP_SIZE as u32;
    while virt < end {
        let phys = pmm::alloc_frame().expect("no free frames left to grow the kernel heap");
        vmm::map(kernel_dir_phys, virt, phys, flags).expect("mapping a heap page cannot run OOM twice");
        virt += FRAME_SIZE as u32;
    }

    // SAFETY: delegated to caller; the range just mapped above is present,
    // writable, and not yet claimed by anything else.
    unsafe { ALLOCATOR.lock().init(HEAP_START as usize, HEAP_SIZE) };
}
