//! Physical and virtual memory management.

pub mod pmm;
pub mod vmm;

/// Linker-provided symbols marking the end of the kernel image (see
/// `linker.ld`). Only the address is meaningful; these are never read as
/// data.
unsafe extern "C" {
    static _kernel_end_phys: u8;
}

/// Physical address one past the last byte of the kernel's loaded image
/// (text + rodata + data + bss), as placed by `linker.ld`.
#[must_use]
pub fn kernel_end_phys() -> u32 {
    // SAFETY: only the address of this symbol is ever taken.
    unsafe { core::ptr::addr_of!(_kernel_end_phys) as u32 }
}

/// Brings up the physical and virtual memory managers in the order spec
/// section 4 requires: the direct map must exist before the PMM can reach
/// the E820 table through it, and the PMM must be seeded before anything
/// calls [`pmm::alloc_frame`].
///
/// `e820_ptr` is the physical address of the BIOS E820 table (0x8000).
/// `boot_stack_phys` is the trampoline's own BSS stack range, reserved so
/// nothing ever hands it out as a free frame.
///
/// # Safety
/// Must run exactly once, immediately after entering `kernel_main`, before
/// any other subsystem touches paging or allocates a frame.
pub unsafe fn init(e820_ptr: u32, boot_stack_phys: (u32, u32)) -> u32 {
    // SAFETY: runs once at boot, before any other CR3 user exists.
    let kernel_dir_phys = unsafe { vmm::init() };
    // SAFETY: runs once at boot, before any caller of `pmm::alloc_frame`.
    unsafe { pmm::init(e820_ptr, kernel_end_phys(), boot_stack_phys) };
    kernel_dir_phys
}
