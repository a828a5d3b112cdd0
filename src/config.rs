//! Compile-time constants shared across the kernel, collected in one place
//! rather than scattered as magic numbers through `memory`, `task`, and
//! `userspace`.

/// Size of a physical frame / page, in bytes.
pub const FRAME_SIZE: usize = 4096;

/// Virtual base of the direct map of low physical RAM.
pub const DIRECT_MAP_BASE: u32 = 0xC000_0000;

/// Size of the directly-mapped window (128 MiB).
pub const DIRECT_MAP_SIZE: usize = 128 * 1024 * 1024;

/// First page-directory index that is shared kernel space (PDE 768..1023).
pub const KERNEL_PDE_START: usize = 768;

/// Virtual address of the kernel's own load address.
pub const KERNEL_LOAD_VIRT: u32 = 0xC010_0000;

/// Conventional start of user program text.
pub const USER_CODE_START: u32 = 0x0040_0000;

/// Fixed one-page user stack window.
pub const USER_STACK_PAGE: u32 = 0x00F0_0000;
/// Top of the user stack page.
pub const USER_STACK_TOP: u32 = USER_STACK_PAGE + FRAME_SIZE as u32;
/// Initial ESP handed to a freshly `execve`d program: one word below the
/// page top, so a 4-byte read of the forged return slot never crosses into
/// the unmapped page above it.
pub const USER_INITIAL_ESP: u32 = USER_STACK_TOP - 4;

/// Size of a PCB's exclusively-owned kernel stack.
pub const KERNEL_STACK_SIZE: usize = 16 * 1024;

/// Syscall interrupt vector (`int 0x80`).
pub const SYSCALL_VECTOR: u8 = 0x80;

/// PIC remap offsets.
pub const PIC_1_OFFSET: u8 = 32;
pub const PIC_2_OFFSET: u8 = PIC_1_OFFSET + 8;

/// Timer frequency.
pub const TIMER_HZ: u32 = 50;

/// Maximum PMM reference count before a frame is considered pinned/saturated.
pub const REFCOUNT_MAX: u8 = 255;

/// Disk sector size.
pub const SECTOR_SIZE: usize = 512;

/// Superblock location.
pub const SUPERBLOCK_SECTOR: u64 = 17;
/// Magic value stamped into the on-disk superblock.
pub const SUPERBLOCK_MAGIC: u32 = 0x1234_5678;

/// On-disk inode record size.
pub const INODE_SIZE: usize = 256;
/// Number of direct block pointers carried by each inode.
pub const INODE_DIRECT_BLOCKS: usize = 48;

/// Keyboard ring buffer capacity.
pub const KEYBOARD_RING_SIZE: usize = 256;

/// Name of the file PID 0's first child execs into at boot. Built by
/// `xtask` from `user_programs/shell`.
pub const INIT_PROGRAM: &str = "shell.elf";

/// Virtual base of the kernel heap: just past the 128 MiB direct map, so it
/// never collides with a direct-map alias of physical RAM.
pub const HEAP_START: u32 = DIRECT_MAP_BASE + DIRECT_MAP_SIZE as u32;
/// Kernel heap size. Generous for a kernel whose only dynamic allocations
/// are PCBs, page tables' shadow bookkeeping, and small IPC structures.
pub const HEAP_SIZE: usize = 1024 * 1024;
