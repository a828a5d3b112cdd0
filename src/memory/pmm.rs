//! Physical frame allocator: a bitmap of allocated frames plus a per-frame
//! reference count.
//!
//! Only frames inside the direct-mapped window (the low 128 MiB, see
//! `config::DIRECT_MAP_SIZE`) are tracked. The bitmap and refcount table are
//! themselves static kernel BSS, reachable before any dynamic allocation
//! exists -- mirroring the way `boot.rs`'s trampoline reserves its own page
//! tables in BSS rather than allocating them.

use crate::config::{DIRECT_MAP_SIZE, FRAME_SIZE, REFCOUNT_MAX};
use crate::sync::IrqLock;

/// Number of 4 KiB frames in the directly-mapped window.
const MAX_FRAMES: usize = DIRECT_MAP_SIZE / FRAME_SIZE;
const BITMAP_WORDS: usize = MAX_FRAMES.div_ceil(8);

/// Raised when no free frame remains. Callers propagate this up as a syscall
/// failure (`fork`/`clone`/`execve` return -1); the kernel never swaps.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OutOfMemory;

struct PmmState {
    /// One bit per frame; 1 = allocated.
    used: [u8; BITMAP_WORDS],
    /// One byte per frame; saturates at `REFCOUNT_MAX` (pinned).
    refcount: [u8; MAX_FRAMES],
}

impl PmmState {
    const fn new() -> Self {
        Self {
            used: [0xFF; BITMAP_WORDS],
            refcount: [0; MAX_FRAMES],
        }
    }

    fn frame_index(phys: u32) -> usize {
        (phys / FRAME_SIZE as u32) as usize
    }

    fn is_used(&self, idx: usize) -> bool {
        self.used[idx / 8] & (1 << (idx % 8)) != 0
    }

    fn set_used(&mut self, idx: usize, used: bool) {
        if used {
            self.used[idx / 8] |= 1 << (idx % 8);
        } else {
            self.used[idx / 8] &= !(1 << (idx % 8));
        }
    }

    /// First-free scan at byte granularity: skip fully-used bytes, then
    /// bit-scan the first byte with a free bit.
    fn find_free(&self) -> Option<usize> {
        for (byte_idx, &byte) in self.used.iter().enumerate() {
            if byte == 0xFF {
                continue;
            }
            for bit in 0..8 {
                let idx = byte_idx * 8 + bit;
                if idx >= MAX_FRAMES {
                    return None;
                }
                if byte & (1 << bit) == 0 {
                    return Some(idx);
                }
            }
        }
        None
    }

    fn reserve_range(&mut self, start_phys: u32, end_phys: u32) {
        let start = Self::frame_index(start_phys.div_ceil(FRAME_SIZE as u32) * FRAME_SIZE as u32);
        let end_frame = end_phys / FRAME_SIZE as u32;
        let end = end_frame as usize;
        for idx in start..end.min(MAX_FRAMES) {
            self.set_used(idx, true);
        }
    }

    fn free_usable_range(&mut self, start_phys: u64, end_phys: u64) {
        // Round start up and end down to frame boundaries: partial frames at
        // region edges stay reserved.
        let start = start_phys.div_ceil(FRAME_SIZE as u64) * FRAME_SIZE as u64;
        let end = (end_phys / FRAME_SIZE as u64) * FRAME_SIZE as u64;
        if start >= end || start > u64::from(u32::MAX) {
            return;
        }
        let start_idx = Self::frame_index(start as u32);
        let end_idx = ((end.min(u64::from(u32::MAX)) / FRAME_SIZE as u64) as usize).min(MAX_FRAMES);
        for idx in start_idx..end_idx {
            self.set_used(idx, false);
        }
    }
}

static PMM: IrqLock<PmmState> = IrqLock::new(PmmState::new());

/// One BIOS E820 entry, as deposited at physical 0x8000 by `boot/stage2.s`.
#[repr(C)]
struct E820Entry {
    base: u64,
    length: u64,
    region_type: u32,
    acpi_attrs: u32,
}

const E820_TYPE_USABLE: u32 = 1;

/// Initializes the allocator from the BIOS E820 map left at `e820_ptr`
/// (physical 0x8000) and reserves the kernel image and boot stack.
///
/// `kernel_end_phys` and `boot_stack_phys` come from linker-provided symbols
/// and the boot trampoline's own BSS stack, respectively.
///
/// # Safety
/// `e820_ptr` must point (through the direct map) at a valid E820 table in
/// the exact layout `boot/stage2.s` writes, and this must run exactly once,
/// before any other code calls [`alloc_frame`].
pub unsafe fn init(e820_ptr: u32, kernel_end_phys: u32, boot_stack_phys: (u32, u32)) {
    let mut pmm = PMM.lock();

    let count_ptr = super::vmm::p2v(e820_ptr) as *const u16;
    // SAFETY: stage2.s always writes a valid u16 entry count at this offset.
    let count = unsafe { count_ptr.read_unaligned() };
    let entries_ptr = super::vmm::p2v(e820_ptr + 4) as *const E820Entry;

    for i in 0..count {
        // SAFETY: `i < count`, and each entry is 24 bytes as stage2.s lays
        // them out; the pointer is read unaligned since the table is packed.
        let entry = unsafe { entries_ptr.add(usize::from(i)).read_unaligned() };
        if entry.region_type != E820_TYPE_USABLE {
            continue;
        }
        pmm.free_usable_range(entry.base, entry.base + entry.length);
    }

    pmm.reserve_range(0, kernel_end_phys);
    pmm.reserve_range(boot_stack_phys.0, boot_stack_phys.1);
}

/// Allocates a fresh frame with refcount 1. Content is not zeroed; callers
/// zero through the direct map when semantics require it.
pub fn alloc_frame() -> Result<u32, OutOfMemory> {
    let mut pmm = PMM.lock();
    let idx = pmm.find_free().ok_or(OutOfMemory)?;
    pmm.set_used(idx, true);
    pmm.refcount[idx] = 1;
    Ok(idx as u32 * FRAME_SIZE as u32)
}

/// Decrements `phys`'s refcount; clears the allocated bit only when it
/// reaches zero.
pub fn free_frame(phys: u32) {
    let mut pmm = PMM.lock();
    let idx = PmmState::frame_index(phys);
    if pmm.refcount[idx] > 1 {
        pmm.refcount[idx] -= 1;
    } else {
        pmm.refcount[idx] = 0;
        pmm.set_used(idx, false);
    }
}

/// Increments `phys`'s refcount, saturating at [`REFCOUNT_MAX`] (pinned).
pub fn inc_ref(phys: u32) {
    let mut pmm = PMM.lock();
    let idx = PmmState::frame_index(phys);
    if pmm.refcount[idx] < REFCOUNT_MAX {
        pmm.refcount[idx] += 1;
    }
}

/// Returns the current reference count of `phys`.
#[must_use]
pub fn get_ref(phys: u32) -> u8 {
    let pmm = PMM.lock();
    pmm.refcount[PmmState::frame_index(phys)]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test_case]
    fn alloc_then_free_clears_allocated_bit() {
        let phys = alloc_frame().expect("pool should have free frames in test environment");
        assert_eq!(get_ref(phys), 1);
        free_frame(phys);
        assert_eq!(get_ref(phys), 0);
    }

    #[test_case]
    fn freeing_a_shared_frame_only_decrements() {
        let phys = alloc_frame().expect("pool should have free frames in test environment");
        inc_ref(phys);
        assert_eq!(get_ref(phys), 2);
        free_frame(phys);
        assert_eq!(get_ref(phys), 1, "refcount 2 must decrement to 1, not free the frame");
    }
}
