//! The assembly context-switch routine and the two stack-forging schemes
//! that feed into it: a PCB that has never run yet needs a stack shaped
//! exactly like one `switch` itself would have produced, forged in advance.
//!
//! Every runnable PCB's saved kernel stack looks, at the moment it is about
//! to be switched to, like one of two things:
//! - A callee-saved register block left by a previous call to [`switch`]
//!   (a thread that was preempted mid-execution).
//! - A forged block built by [`forge_kernel_thread`] or
//!   [`forge_trap_return`] (a thread that has never run yet, or a `fork`
//!   child resuming for the first time).
//!
//! `switch` cannot tell these apart and does not need to: both end in a
//! `ret` into a plausible return address, because the forging functions
//! build exactly the frame `switch`'s own prologue would have produced.

use core::arch::{asm, naked_asm};

/// Saves the four callee-saved registers on the current stack, records the
/// resulting ESP into `*prev_esp_slot`, switches ESP to `next_esp`, and
/// returns -- which, for a freshly forged stack, lands execution somewhere
/// other than the call site that invoked `switch` in the first place.
///
/// # Safety
/// `next_esp` must be a valid kernel stack pointer built by `switch` itself,
/// [`forge_kernel_thread`], or [`forge_trap_return`]. `prev_esp_slot` must be
/// a valid, writable location (normally a field of the outgoing PCB).
#[unsafe(naked)]
pub unsafe extern "C" fn switch(next_esp: u32, prev_esp_slot: *mut u32) {
    naked_asm!(
        "push ebp",
        "push ebx",
        "push esi",
        "push edi",
        "mov eax, [esp + 24]", // prev_esp_slot
        "mov ecx, [esp + 20]", // next_esp
        "mov [eax], esp",
        "mov esp, ecx",
        "pop edi",
        "pop esi",
        "pop ebx",
        "pop ebp",
        "ret",
    );
}

/// A fresh kernel thread's trampoline: runs with the entry function pointer
/// still sitting in EBX (restored by `switch`'s own `pop ebx`, see
/// [`forge_kernel_thread`]), enables interrupts -- new threads are always
/// created with IF clear in the forged frame until this point, since
/// re-enabling interrupts is always the incoming thread's own job -- and
/// calls it.
#[unsafe(naked)]
extern "C" fn kernel_thread_trampoline() -> ! {
    naked_asm!("sti", "call ebx", "2:", "hlt", "jmp 2b",);
}

/// Writes a forged callee-saved register block, ending in a return address
/// of [`kernel_thread_trampoline`], onto the top of `stack_top` (the
/// highest, exclusive, address of a kernel stack). The trampoline calls
/// `entry` once switched to. Returns the resulting saved ESP.
///
/// # Safety
/// `stack_top` must be 4-byte aligned and back at least 20 live bytes of
/// writable kernel-stack memory.
pub unsafe fn forge_kernel_thread(stack_top: u32, entry: extern "C" fn() -> !) -> u32 {
    let mut sp = stack_top;
    let mut push = |value: u32| {
        sp -= 4;
        // SAFETY: delegated to caller; `sp` stays within the stack region
        // for the five words written here.
        unsafe { (sp as *mut u32).write(value) };
    };
    push(kernel_thread_trampoline as usize as u32); // return address
    push(0); // ebp
    push(entry as usize as u32); // ebx (trampoline reads it back after pop)
    push(0); // esi
    push(0); // edi
    sp
}

/// Writes a forged callee-saved register block, ending in a return address
/// of `trap_epilogue` (the shared trap-return stub in
/// [`crate::userspace::syscall`]), directly below an already-written
/// `TrapFrame` at `frame_addr`. Used by `fork` and `clone` to make a child
/// resume as if returning from the same trap its parent is in. Returns the
/// resulting saved ESP.
///
/// # Safety
/// `frame_addr` must be the address of a fully-initialized `TrapFrame`
/// sitting on the child's kernel stack, with at least 20 bytes of writable
/// stack below it.
pub unsafe fn forge_trap_return(frame_addr: u32, trap_epilogue: extern "C" fn() -> !) -> u32 {
    let mut sp = frame_addr;
    let mut push = |value: u32| {
        sp -= 4;
        // SAFETY: delegated to caller.
        unsafe { (sp as *mut u32).write(value) };
    };
    push(trap_epilogue as usize as u32); // return address
    push(0); // ebp
    push(0); // ebx
    push(0); // esi
    push(0); // edi
    sp
}

/// Reads the current value of ESP. Used only for diagnostics.
#[must_use]
pub fn current_esp() -> u32 {
    let esp: u32;
    // SAFETY: reading ESP has no side effects.
    unsafe { asm!("mov {}, esp", out(reg) esp, options(nomem, nostack, preserves_flags)) };
    esp
}
