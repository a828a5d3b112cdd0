//! The flat GDT and the single i386 TSS.
//!
//! Unlike a long-mode GDT (built with the `x86_64` crate's typed
//! `GlobalDescriptorTable`/`Descriptor` helpers and an IST-switched
//! double-fault stack), i686 has no IST: there is exactly one ring-0 stack
//! pointer in the TSS (`esp0`), and the scheduler rewrites it on every
//! context switch to point at the incoming thread's kernel stack (see
//! `task::scheduler`). Selectors, flags, and the TSS byte layout are
//! hand-rolled raw structs rather than routed through an external crate,
//! since i686 segmentation has no safe typed equivalent in the `x86` crate
//! worth trusting without a compiler to check it against.

use core::arch::asm;
use core::mem::size_of;

use crate::sync::IrqLock;

/// Ring-0 code selector.
pub const KERNEL_CODE_SELECTOR: u16 = 0x08;
/// Ring-0 data selector.
pub const KERNEL_DATA_SELECTOR: u16 = 0x10;
/// Ring-3 code selector (RPL 3 baked into the low bits).
pub const USER_CODE_SELECTOR: u16 = 0x1B;
/// Ring-3 data selector.
pub const USER_DATA_SELECTOR: u16 = 0x23;
const TSS_SELECTOR: u16 = 0x28;

#[repr(C, packed)]
#[derive(Clone, Copy)]
struct GdtEntry {
    limit_low: u16,
    base_low: u16,
    base_mid: u8,
    access: u8,
    flags_limit_high: u8,
    base_high: u8,
}

impl GdtEntry {
    const fn null() -> Self {
        Self {
            limit_low: 0,
            base_low: 0,
            base_mid: 0,
            access: 0,
            flags_limit_high: 0,
            base_high: 0,
        }
    }

    const fn flat(access: u8, flags: u8) -> Self {
        Self {
            limit_low: 0xFFFF,
            base_low: 0,
            base_mid: 0,
            access,
            flags_limit_high: 0xF | (flags << 4),
            base_high: 0,
        }
    }

    fn tss(base: u32, limit: u32) -> Self {
        Self {
            limit_low: (limit & 0xFFFF) as u16,
            base_low: (base & 0xFFFF) as u16,
            base_mid: ((base >> 16) & 0xFF) as u8,
            access: 0x89, // present, ring0, 32-bit TSS (available)
            flags_limit_high: ((limit >> 16) & 0xF) as u8,
            base_high: ((base >> 24) & 0xFF) as u8,
        }
    }
}

// Access byte bits: present(0x80) | dpl<<5 | type(0x10=code/data) | executable
// | direction/conforming | readable/writable | accessed.
const KERNEL_CODE_ACCESS: u8 = 0x9A;
const KERNEL_DATA_ACCESS: u8 = 0x92;
const USER_CODE_ACCESS: u8 = 0xFA; // present, dpl=3, code, readable
const USER_DATA_ACCESS: u8 = 0xF2; // present, dpl=3, data, writable
const FLAGS_4K_32BIT: u8 = 0xC; // granularity=4K, size=32-bit

/// The i386 task-state segment. Only `esp0`/`ss0` are used by this kernel --
/// every ring transition goes through the software trap/IRET path, never a
/// hardware task switch -- but the CPU requires the full 104-byte structure
/// to be present for `ltr` to accept it.
#[repr(C, packed)]
struct Tss {
    link: u32,
    esp0: u32,
    ss0: u32,
    esp1: u32,
    ss1: u32,
    esp2: u32,
    ss2: u32,
    cr3: u32,
    eip: u32,
    eflags: u32,
    eax: u32,
    ecx: u32,
    edx: u32,
    ebx: u32,
    esp: u32,
    ebp: u32,
    esi: u32,
    edi: u32,
    es: u32,
    cs: u32,
    ss: u32,
    ds: u32,
    fs: u32,
    gs: u32,
    ldt: u32,
    trap: u16,
    iomap_base: u16,
}

impl Tss {
    const fn new() -> Self {
        Self {
            link: 0,
            esp0: 0,
            ss0: KERNEL_DATA_SELECTOR as u32,
            esp1: 0,
            ss1: 0,
            esp2: 0,
            ss2: 0,
            cr3: 0,
            eip: 0,
            eflags: 0,
            eax: 0,
            ecx: 0,
            edx: 0,
            ebx: 0,
            esp: 0,
            ebp: 0,
            esi: 0,
            edi: 0,
            es: 0,
            cs: 0,
            ss: 0,
            ds: 0,
            fs: 0,
            gs: 0,
            ldt: 0,
            trap: 0,
            iomap_base: size_of::<Tss>() as u16,
        }
    }
}

const GDT_ENTRIES: usize = 6;

struct Gdt {
    entries: [GdtEntry; GDT_ENTRIES],
    tss: Tss,
}

static GDT: IrqLock<Gdt> = IrqLock::new(Gdt {
    entries: [GdtEntry::null(); GDT_ENTRIES],
    tss: Tss::new(),
});

#[repr(C, packed)]
struct DescriptorTablePointer {
    limit: u16,
    base: u32,
}

/// Builds the flat GDT and TSS and loads them. Must run once, before
/// interrupts are enabled -- an interrupt arriving before `ltr` has run
/// would have no valid ring-0 stack to switch to.
pub fn init() {
    let mut gdt = GDT.lock();
    gdt.entries[0] = GdtEntry::null();
    gdt.entries[1] = GdtEntry::flat(KERNEL_CODE_ACCESS, FLAGS_4K_32BIT);
    gdt.entries[2] = GdtEntry::flat(KERNEL_DATA_ACCESS, FLAGS_4K_32BIT);
    gdt.entries[3] = GdtEntry::flat(USER_CODE_ACCESS, FLAGS_4K_32BIT);
    gdt.entries[4] = GdtEntry::flat(USER_DATA_ACCESS, FLAGS_4K_32BIT);

    let tss_base = core::ptr::addr_of!(gdt.tss) as u32;
    let tss_limit = (size_of::<Tss>() - 1) as u32;
    gdt.entries[5] = GdtEntry::tss(tss_base, tss_limit);

    let pointer = DescriptorTablePointer {
        limit: (size_of::<[GdtEntry; GDT_ENTRIES]>() - 1) as u16,
        base: core::ptr::addr_of!(gdt.entries) as u32,
    };

    // SAFETY: `pointer` references the just-initialized, 'static GDT; the
    // far return and segment reloads that follow reload every segment
    // register from the new table before any code relies on the old one.
    // `retfd` is the standard way to reload CS from inline asm: there is no
    // Intel-syntax immediate far jump LLVM's assembler accepts here, so the
    // target CS and return address are pushed and popped via a far return
    // instead, the same trick `sunsided-os`'s `gdt.rs` uses for its own
    // (long-mode) CS reload.
    unsafe {
        asm!(
            "lgdt [{0}]",
            "mov ax, {ds_sel}",
            "mov ds, ax",
            "mov es, ax",
            "mov fs, ax",
            "mov gs, ax",
            "mov ss, ax",
            "push {cs_sel}",
            "lea eax, [2f]",
            "push eax",
            "retfd",
            "2:",
            in(reg) &pointer,
            ds_sel = const KERNEL_DATA_SELECTOR,
            cs_sel = const u32::from(KERNEL_CODE_SELECTOR),
            out("ax") _,
            out("eax") _,
        );
        asm!("ltr ax", in("ax") TSS_SELECTOR, options(nomem, nostack));
    }
}

/// Updates the TSS's `esp0`, the ring-0 stack the CPU loads on the next
/// ring3->ring0 transition. Called by the scheduler on every context switch.
pub fn set_kernel_stack(esp0: u32) {
    let mut gdt = GDT.lock();
    gdt.tss.esp0 = esp0;
}
