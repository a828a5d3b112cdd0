//! Virtual memory manager: two-level i686 paging, the higher-half direct
//! map, page (un)mapping, address-space cloning, and copy-on-write fault
//! resolution.
//!
//! A page directory/table is represented here as a bare `[u32; 1024]`
//! reached through the direct map rather than a typed `&mut` reference,
//! because the same physical table is addressable from many address
//! spaces at once (the kernel PDEs) and through many virtual aliases
//! (direct map vs. whatever address space happens to be active) -- a
//! single owning reference cannot model that, so the boundary is raw
//! pointers validated by the invariants this module enforces instead.

use bitflags::bitflags;

use crate::config::{DIRECT_MAP_BASE, DIRECT_MAP_SIZE, FRAME_SIZE, KERNEL_PDE_START};
use crate::cpu;
use crate::memory::pmm::{self, OutOfMemory};

const ENTRIES_PER_TABLE: usize = 1024;
const DIRECT_MAP_TABLE_COUNT: usize = DIRECT_MAP_SIZE / (FRAME_SIZE * ENTRIES_PER_TABLE);

bitflags! {
    /// Page-directory-entry flag bits.
    #[derive(Clone, Copy, PartialEq, Eq)]
    pub struct PdeFlags: u32 {
        const PRESENT  = 1 << 0;
        const WRITABLE = 1 << 1;
        const USER     = 1 << 2;
    }
}

bitflags! {
    /// Page-table-entry flag bits. `COW` reuses bit 9, one of the three
    /// "available to OS" bits i686 leaves unused.
    #[derive(Clone, Copy, PartialEq, Eq)]
    pub struct PteFlags: u32 {
        const PRESENT  = 1 << 0;
        const WRITABLE = 1 << 1;
        const USER     = 1 << 2;
        const ACCESSED = 1 << 5;
        const DIRTY    = 1 << 6;
        const COW      = 1 << 9;
    }
}

const ADDR_MASK: u32 = !0xFFF;

#[repr(C, align(4096))]
struct Table([u32; ENTRIES_PER_TABLE]);

/// Converts a physical address within the direct-mapped window to its
/// kernel virtual alias. Never valid for user virtual addresses.
#[must_use]
pub const fn p2v(phys: u32) -> u32 {
    phys + DIRECT_MAP_BASE
}

/// Inverse of [`p2v`].
#[must_use]
pub const fn v2p(virt: u32) -> u32 {
    virt - DIRECT_MAP_BASE
}

fn table_at(phys: u32) -> &'static mut [u32; ENTRIES_PER_TABLE] {
    // SAFETY: `phys` is always a frame handed out by the PMM or one of the
    // static direct-map tables below; both live inside the direct-mapped
    // window and are 4 KiB-aligned.
    unsafe { &mut *(p2v(phys) as *mut [u32; ENTRIES_PER_TABLE]) }
}

fn pde_index(virt: u32) -> usize {
    (virt >> 22) as usize
}

fn pte_index(virt: u32) -> usize {
    ((virt >> 12) & 0x3FF) as usize
}

static mut DIRECT_MAP_TABLES: [Table; DIRECT_MAP_TABLE_COUNT] =
    [const { Table([0; ENTRIES_PER_TABLE]) }; DIRECT_MAP_TABLE_COUNT];

static mut KERNEL_DIRECTORY: Table = Table([0; ENTRIES_PER_TABLE]);

fn static_phys(virt: u32) -> u32 {
    v2p(virt)
}

/// Builds the permanent kernel page directory: the 32-table direct map at
/// PDE 768..800 (identity-aliasing low physical RAM), installed one table
/// at a time following the commit-reveal rule (fill entries, publish the
/// PDE, only then is the table itself reachable through an empty PDE
/// window). Switches CR3 to it when done.
///
/// # Safety
/// Must run exactly once, early in boot, while still running off the
/// trampoline's minimal identity/higher-half map from `boot.rs`.
pub unsafe fn init() -> u32 {
    // SAFETY: single-threaded boot-time initialization; no other code has
    // observed these statics yet.
    let tables = unsafe { &mut *core::ptr::addr_of_mut!(DIRECT_MAP_TABLES) };
    let directory = unsafe { &mut *core::ptr::addr_of_mut!(KERNEL_DIRECTORY) };

    for (i, table) in tables.iter_mut().enumerate() {
        for (j, entry) in table.0.iter_mut().enumerate() {
            let phys = (i * ENTRIES_PER_TABLE + j) as u32 * FRAME_SIZE as u32;
            *entry = phys | (PteFlags::PRESENT | PteFlags::WRITABLE).bits();
        }
        let table_phys = static_phys(table as *const Table as u32);
        directory.0[KERNEL_PDE_START + i] = table_phys | (PdeFlags::PRESENT | PdeFlags::WRITABLE).bits();
    }

    let directory_phys = static_phys(directory as *const Table as u32);
    // SAFETY: `directory_phys` carries a faithful copy of the identity
    // mapping of low RAM the boot trampoline relied on, so control flow
    // through this instruction and beyond remains mapped.
    unsafe { cpu::cr3_write(directory_phys) };
    directory_phys
}

/// Maps one page in the address space rooted at `dir_phys`. Allocates and
/// zeroes a new page table on demand when the covering PDE is absent.
///
/// If `dir_phys` is the currently-installed address space, flushes the
/// single stale TLB entry for `virt`.
pub fn map(dir_phys: u32, virt: u32, phys: u32, flags: PteFlags) -> Result<(), OutOfMemory> {
    let directory = table_at(dir_phys);
    let pde_idx = pde_index(virt);

    if directory[pde_idx] & PdeFlags::PRESENT.bits() == 0 {
        let table_phys = pmm::alloc_frame()?;
        table_at(table_phys).fill(0);
        let mut pde_flags = PdeFlags::PRESENT | PdeFlags::WRITABLE;
        if flags.contains(PteFlags::USER) {
            pde_flags |= PdeFlags::USER;
        }
        directory[pde_idx] = table_phys | pde_flags.bits();
    } else if flags.contains(PteFlags::USER) && directory[pde_idx] & PdeFlags::USER.bits() == 0 {
        directory[pde_idx] |= PdeFlags::USER.bits();
    }

    let table_phys = directory[pde_idx] & ADDR_MASK;
    let table = table_at(table_phys);
    table[pte_index(virt)] = phys | flags.bits();

    if dir_phys == cpu::cr3() {
        // SAFETY: `virt` was just (re)mapped above.
        unsafe { cpu::invlpg(virt) };
    }
    Ok(())
}

/// Whether `virt` already has a present page-table entry in `dir_phys`.
/// Used by the ELF loader to avoid re-allocating and re-zeroing a page two
/// overlapping `PT_LOAD` segments both cover.
#[must_use]
pub fn is_mapped(dir_phys: u32, virt: u32) -> bool {
    let directory = table_at(dir_phys);
    let pde_idx = pde_index(virt);
    if directory[pde_idx] & PdeFlags::PRESENT.bits() == 0 {
        return false;
    }
    let table_phys = directory[pde_idx] & ADDR_MASK;
    let table = table_at(table_phys);
    table[pte_index(virt)] & PteFlags::PRESENT.bits() != 0
}

/// Removes every user-space mapping (PDE indices 0..768) from `dir_phys`,
/// freeing the backing frames and page tables but leaving the directory
/// itself intact. Used by `execve` to tear down the previous image before
/// mapping the new one, so `execve` no longer leaks the previous image's
/// user frames.
pub fn clear_user_mappings(dir_phys: u32) {
    let directory = table_at(dir_phys);
    for pde_idx in 0..KERNEL_PDE_START {
        if directory[pde_idx] & PdeFlags::PRESENT.bits() == 0 {
            continue;
        }
        let table_phys = directory[pde_idx] & ADDR_MASK;
        let table = table_at(table_phys);
        for entry in table.iter() {
            if entry & PteFlags::PRESENT.bits() != 0 {
                pmm::free_frame(entry & ADDR_MASK);
            }
        }
        pmm::free_frame(table_phys);
        directory[pde_idx] = 0;
    }
    if dir_phys == cpu::cr3() {
        // SAFETY: reloading CR3 with the address already installed just
        // flushes every now-stale TLB entry for the cleared range.
        unsafe { cpu::cr3_write(dir_phys) };
    }
}

/// Frees every frame owned by the address space rooted at `dir_phys`: all
/// present user PTEs, their page tables, and the directory itself. Kernel
/// PDEs (768..1023) are shared and never freed. If the directory is shared
/// by a thread group (refcount > 1), only decrements its refcount.
pub fn destroy(dir_phys: u32) {
    if pmm::get_ref(dir_phys) > 1 {
        pmm::free_frame(dir_phys);
        return;
    }
    clear_user_mappings(dir_phys);
    pmm::free_frame(dir_phys);
}

/// Clones the address space rooted at `src_dir_phys` for `fork`: kernel
/// PDEs are linked by value, user PDEs are deep-copied table-by-table, and
/// every currently-writable user PTE is converted to COW in *both* the
/// parent and the child.
///
/// If the source is the currently-installed address space, reloads CR3 to
/// flush the writable-TLB entries this just invalidated in the parent.
pub fn clone_address_space(src_dir_phys: u32) -> Result<u32, OutOfMemory> {
    let new_dir_phys = pmm::alloc_frame()?;
    table_at(new_dir_phys).fill(0);

    {
        let src = table_at(src_dir_phys);
        let new = table_at(new_dir_phys);
        new[KERNEL_PDE_START..].copy_from_slice(&src[KERNEL_PDE_START..]);
    }

    for pde_idx in 0..KERNEL_PDE_START {
        let src_pde = table_at(src_dir_phys)[pde_idx];
        if src_pde & PdeFlags::PRESENT.bits() == 0 {
            continue;
        }

        let new_table_phys = match pmm::alloc_frame() {
            Ok(phys) => phys,
            Err(e) => {
                destroy(new_dir_phys);
                return Err(e);
            }
        };
        table_at(new_table_phys).fill(0);

        let src_table_phys = src_pde & ADDR_MASK;
        for pte_idx in 0..ENTRIES_PER_TABLE {
            let mut pte = table_at(src_table_phys)[pte_idx];
            if pte & PteFlags::PRESENT.bits() == 0 {
                continue;
            }
            if pte & PteFlags::WRITABLE.bits() != 0 {
                pte = (pte & !PteFlags::WRITABLE.bits()) | PteFlags::COW.bits();
                table_at(src_table_phys)[pte_idx] = pte;
            }
            pmm::inc_ref(pte & ADDR_MASK);
            table_at(new_table_phys)[pte_idx] = pte;
        }

        table_at(new_dir_phys)[pde_idx] = new_table_phys | (src_pde & 0xFFF);
    }

    if src_dir_phys == cpu::cr3() {
        // SAFETY: flushes the writable->COW transitions just made above in
        // the still-running parent's own mappings.
        unsafe { cpu::cr3_write(src_dir_phys) };
    }
    Ok(new_dir_phys)
}

/// CPU page-fault error-code bits, as pushed by the processor.
pub struct FaultError(pub u32);

impl FaultError {
    #[must_use]
    pub fn present(&self) -> bool {
        self.0 & 1 != 0
    }
    #[must_use]
    pub fn write(&self) -> bool {
        self.0 & 2 != 0
    }
    #[must_use]
    pub fn user(&self) -> bool {
        self.0 & 4 != 0
    }
}

/// Resolves a page fault if (and only if) it is a write to a COW page.
/// Returns `Err(())` for any other fault, which the caller treats as fatal.
pub fn handle_page_fault(fault_addr: u32, error: &FaultError) -> Result<(), ()> {
    if !(error.present() && error.write()) {
        return Err(());
    }

    let dir_phys = cpu::cr3();
    let directory = table_at(dir_phys);
    let pde_idx = pde_index(fault_addr);
    if directory[pde_idx] & PdeFlags::PRESENT.bits() == 0 {
        return Err(());
    }
    let table_phys = directory[pde_idx] & ADDR_MASK;
    let table = table_at(table_phys);
    let pte_idx = pte_index(fault_addr);
    let pte = table[pte_idx];
    if pte & PteFlags::COW.bits() == 0 {
        return Err(());
    }

    let frame = pte & ADDR_MASK;
    let flags = (pte & 0xFFF) & !PteFlags::COW.bits();

    if pmm::get_ref(frame) == 1 {
        table[pte_idx] = frame | flags | PteFlags::WRITABLE.bits();
    } else {
        let new_frame = pmm::alloc_frame().map_err(|OutOfMemory| ())?;
        // SAFETY: both frames are direct-mapped and 4 KiB, source is not
        // being concurrently written (COW reader only, interrupts off
        // around this handler's compound update is not required since we
        // are uniprocessor and the fault itself cannot re-enter here).
        unsafe {
            core::ptr::copy_nonoverlapping(
                p2v(frame) as *const u8,
                p2v(new_frame) as *mut u8,
                FRAME_SIZE,
            );
        }
        table[pte_idx] = new_frame | flags | PteFlags::WRITABLE.bits();
        pmm::free_frame(frame);
    }

    // SAFETY: the PTE for `fault_addr` was just rewritten above.
    unsafe { cpu::invlpg(fault_addr) };
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test_case]
    fn p2v_v2p_round_trip() {
        let phys = 0x0020_0000;
        assert_eq!(v2p(p2v(phys)), phys);
    }
}
