//! The i686 IDT, hand-rolled PIC remap/EOI, and the non-syscall interrupt
//! handlers, including the page-fault dispatch to copy-on-write resolution.
//!
//! A long-mode kernel can build its IDT with the `x86_64` crate's typed
//! `InterruptDescriptorTable` and `extern "x86-interrupt"` handlers, and its
//! PIC remap with the `pic8259` crate. Neither applies to a 32-bit target:
//! i686 IDT gate descriptors are hand-rolled packed structs here, and the
//! 8259 PIC is reprogrammed directly over `cpu::{inb, outb}` (the same
//! pattern `serial.rs` already uses for the 16550 UART).
//!
//! The syscall gate (vector 0x80) is installed here but its entry stub and
//! `TrapFrame` live in [`crate::userspace::syscall`]: unlike every other
//! vector, a syscall is always entered from ring 3, so it alone needs the
//! full cross-ring frame (`useresp`/`ss`) exposed to Rust for `execve` to
//! rewrite. Every other interrupt here resumes transparently and never
//! needs to see those fields -- `iretd` pops however many words the CPU
//! pushed on entry, whether or not our code inspected them.

use core::mem::size_of;

use crate::config::{PIC_1_OFFSET, PIC_2_OFFSET, SYSCALL_VECTOR};
use crate::cpu::{self, inb, outb};
use crate::memory::vmm::{self, FaultError};
use crate::{serial_println, task};

/// Re-exported so call sites can write `interrupts::without_interrupts`,
/// mirroring the `x86_64::instructions::interrupts::without_interrupts`
/// import path even though the implementation lives in [`crate::cpu`].
pub use crate::cpu::without_interrupts;

const PIC1_COMMAND: u16 = 0x20;
const PIC1_DATA: u16 = 0x21;
const PIC2_COMMAND: u16 = 0xA0;
const PIC2_DATA: u16 = 0xA1;
const PIC_EOI: u8 = 0x20;

const TIMER_VECTOR: u8 = PIC_1_OFFSET;
const KEYBOARD_VECTOR: u8 = PIC_1_OFFSET + 1;

/// Remaps the PIC so hardware interrupts land at `PIC_1_OFFSET..+16`
/// instead of the BIOS default 0x08..0x10 and 0x70..0x78 (which collide
/// with CPU exception vectors), then masks every IRQ except the timer and
/// keyboard.
pub fn init_pic() {
    // SAFETY: standard 8259 remap sequence (ICW1..ICW4 on both PICs),
    // identical in shape to the one `pic8259::ChainedPics::initialize`
    // performs.
    unsafe {
        let mask1 = inb(PIC1_DATA);
        let mask2 = inb(PIC2_DATA);

        outb(PIC1_COMMAND, 0x11);
        outb(PIC2_COMMAND, 0x11);
        outb(PIC1_DATA, PIC_1_OFFSET);
        outb(PIC2_DATA, PIC_2_OFFSET);
        outb(PIC1_DATA, 4); // PIC1 has a slave on IRQ2
        outb(PIC2_DATA, 2); // PIC2's cascade identity
        outb(PIC1_DATA, 0x01);
        outb(PIC2_DATA, 0x01);

        outb(PIC1_DATA, mask1);
        outb(PIC2_DATA, mask2);

        // Unmask only the timer (IRQ0) and keyboard (IRQ1).
        outb(PIC1_DATA, !0b0000_0011u8);
        outb(PIC2_DATA, 0xFF);
    }
}

fn pic_eoi(vector: u8) {
    // SAFETY: EOI is always safe to send; the slave must be acknowledged
    // before the master when the IRQ came from it.
    unsafe {
        if vector >= PIC_2_OFFSET {
            outb(PIC2_COMMAND, PIC_EOI);
        }
        outb(PIC1_COMMAND, PIC_EOI);
    }
}

#[repr(C, packed)]
#[derive(Clone, Copy)]
struct IdtEntry {
    offset_low: u16,
    selector: u16,
    zero: u8,
    type_attr: u8,
    offset_high: u16,
}

impl IdtEntry {
    const fn missing() -> Self {
        Self {
            offset_low: 0,
            selector: 0,
            zero: 0,
            type_attr: 0,
            offset_high: 0,
        }
    }

    fn new(handler: u32, selector: u16, type_attr: u8) -> Self {
        Self {
            offset_low: (handler & 0xFFFF) as u16,
            selector,
            zero: 0,
            type_attr,
            offset_high: ((handler >> 16) & 0xFFFF) as u16,
        }
    }
}

const INTERRUPT_GATE_RING0: u8 = 0x8E; // present, dpl0, 32-bit interrupt gate
const TRAP_GATE_RING3: u8 = 0xEF; // present, dpl3, 32-bit trap gate

const IDT_ENTRIES: usize = 256;

static mut IDT: [IdtEntry; IDT_ENTRIES] = [IdtEntry::missing(); IDT_ENTRIES];

#[repr(C, packed)]
struct DescriptorTablePointer {
    limit: u16,
    base: u32,
}

/// The register save record built by [`isr_common_stub`] for every vector
/// except the syscall gate. `eip`/`cs`/`eflags` are the CPU-pushed fields
/// for same-ring re-entry; nothing here reads past them, so it does not
/// matter that a cross-ring fault would have left two more words below.
#[repr(C)]
pub struct IsrFrame {
    pub gs: u32,
    pub fs: u32,
    pub es: u32,
    pub ds: u32,
    pub edi: u32,
    pub esi: u32,
    pub ebp: u32,
    _esp_dummy: u32,
    pub ebx: u32,
    pub edx: u32,
    pub ecx: u32,
    pub eax: u32,
    pub vector: u32,
    pub err_code: u32,
    pub eip: u32,
    pub cs: u32,
    pub eflags: u32,
}

macro_rules! isr_no_error {
    ($name:ident, $vector:literal) => {
        core::arch::global_asm!(
            concat!(".global ", stringify!($name)),
            concat!(stringify!($name), ":"),
            "push dword 0", // dummy error code
            concat!("push dword ", $vector),
            "jmp isr_common_stub",
        );
    };
}

macro_rules! isr_with_error {
    ($name:ident, $vector:literal) => {
        core::arch::global_asm!(
            concat!(".global ", stringify!($name)),
            concat!(stringify!($name), ":"),
            concat!("push dword ", $vector),
            "jmp isr_common_stub",
        );
    };
}

isr_no_error!(isr_divide_by_zero, 0);
isr_no_error!(isr_breakpoint, 3);
isr_no_error!(isr_invalid_opcode, 6);
isr_with_error!(isr_double_fault, 8);
isr_with_error!(isr_general_protection, 13);
isr_with_error!(isr_page_fault, 14);
isr_no_error!(isr_timer, 32);
isr_no_error!(isr_keyboard, 33);

core::arch::global_asm!(
    r#"
.section .text
.global isr_common_stub
isr_common_stub:
    push gs
    push fs
    push es
    push ds
    pushad
    mov ax, {kernel_data}
    mov ds, ax
    mov es, ax
    mov fs, ax
    mov gs, ax
    push esp
    call isr_dispatch
    add esp, 4
    popad
    pop ds
    pop es
    pop fs
    pop gs
    add esp, 8
    iretd
"#,
    kernel_data = const crate::gdt::KERNEL_DATA_SELECTOR,
);

unsafe extern "C" {
    fn isr_divide_by_zero();
    fn isr_breakpoint();
    fn isr_invalid_opcode();
    fn isr_double_fault();
    fn isr_general_protection();
    fn isr_page_fault();
    fn isr_timer();
    fn isr_keyboard();
}

/// Builds and loads the IDT: exception vectors, the PIC-remapped timer and
/// keyboard IRQs, and the syscall trap gate. Must run after [`crate::gdt`]
/// so `KERNEL_CODE_SELECTOR` is a valid, loaded selector.
pub fn init() {
    // SAFETY: single-threaded boot-time initialization.
    let idt = unsafe { &mut *core::ptr::addr_of_mut!(IDT) };
    let cs = crate::gdt::KERNEL_CODE_SELECTOR;

    idt[0] = IdtEntry::new(isr_divide_by_zero as u32, cs, INTERRUPT_GATE_RING0);
    idt[3] = IdtEntry::new(isr_breakpoint as u32, cs, INTERRUPT_GATE_RING0);
    idt[6] = IdtEntry::new(isr_invalid_opcode as u32, cs, INTERRUPT_GATE_RING0);
    idt[8] = IdtEntry::new(isr_double_fault as u32, cs, INTERRUPT_GATE_RING0);
    idt[13] = IdtEntry::new(isr_general_protection as u32, cs, INTERRUPT_GATE_RING0);
    idt[14] = IdtEntry::new(isr_page_fault as u32, cs, INTERRUPT_GATE_RING0);
    idt[usize::from(TIMER_VECTOR)] = IdtEntry::new(isr_timer as u32, cs, INTERRUPT_GATE_RING0);
    idt[usize::from(KEYBOARD_VECTOR)] =
        IdtEntry::new(isr_keyboard as u32, cs, INTERRUPT_GATE_RING0);
    idt[usize::from(SYSCALL_VECTOR)] = IdtEntry::new(
        crate::userspace::syscall::syscall_entry as u32,
        cs,
        TRAP_GATE_RING3,
    );

    let pointer = DescriptorTablePointer {
        limit: (size_of::<[IdtEntry; IDT_ENTRIES]>() - 1) as u16,
        base: idt.as_ptr() as u32,
    };
    // SAFETY: `pointer` references the just-populated, 'static IDT.
    unsafe { core::arch::asm!("lidt [{0}]", in(reg) &pointer) };
}

fn fatal(frame: &IsrFrame) -> ! {
    let eip = frame.eip;
    let cs = frame.cs;
    let err = frame.err_code;
    let vector = frame.vector;
    let cr2 = cpu::cr2();
    serial_println!(
        "FATAL: vector={} err={:#x} eip={:#x} cs={:#x} cr2={:#x}",
        vector,
        err,
        eip,
        cs,
        cr2
    );
    crate::println!(
        "FATAL: vector={} err={:#x} eip={:#x} cr2={:#x}",
        vector,
        err,
        eip,
        cr2
    );
    loop {
        cpu::hlt();
    }
}

/// The dispatcher every non-syscall ISR stub funnels into.
///
/// # Safety
/// Must only be called by `isr_common_stub` with a frame it just built.
#[unsafe(no_mangle)]
extern "C" fn isr_dispatch(frame: &mut IsrFrame) {
    match frame.vector {
        14 => {
            let error = FaultError(frame.err_code);
            if vmm::handle_page_fault(cpu::cr2(), &error).is_err() {
                fatal(frame);
            }
        }
        v if v == u32::from(TIMER_VECTOR) => {
            pic_eoi(TIMER_VECTOR);
            task::scheduler::on_timer_tick();
        }
        v if v == u32::from(KEYBOARD_VECTOR) => {
            // SAFETY: reading the keyboard controller's data port is always
            // defined once an IRQ1 has been delivered.
            let scancode = unsafe { inb(0x60) };
            crate::keyboard::on_scancode(scancode);
            pic_eoi(KEYBOARD_VECTOR);
        }
        3 => serial_println!("breakpoint at eip={:#x}", { frame.eip }),
        _ => fatal(frame),
    }
}

#[cfg(test)]
mod tests {
    #[test_case]
    fn pic_offsets_do_not_collide_with_cpu_exceptions() {
        assert!(super::TIMER_VECTOR >= 32);
        assert!(super::KEYBOARD_VECTOR >= 32);
    }
}
