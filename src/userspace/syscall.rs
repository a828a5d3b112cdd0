//! The syscall trap gate, the register-save `TrapFrame`, and the dispatcher
//! for the ten syscalls user programs can make.
//!
//! Unlike every other interrupt (`interrupts::isr_common_stub`), a syscall is
//! always entered from ring 3, so `syscall_entry` must also save and later
//! restore `useresp`/`ss`. It otherwise follows the exact same
//! segments-then-`pushad` shape. `trap_epilogue`, the shared tail of
//! `syscall_entry`, is also the landing pad [`crate::task::switch::forge_trap_return`]
//! points a forged child stack at: resuming a `fork`/`clone` child is
//! "return from the syscall that created it" with a rewritten `TrapFrame`,
//! nothing more.

use alloc::boxed::Box;
use alloc::string::String;
use core::mem::size_of;

use crate::config::{self, KERNEL_STACK_SIZE};
use crate::cpu;
use crate::fs;
use crate::gdt;
use crate::keyboard;
use crate::memory::{pmm, vmm};
use crate::task::{self, scheduler, BlockReason, State};
use crate::{print, println, serial_println};

use super::process;

const SYS_READ: u32 = 0;
const SYS_WRITE: u32 = 1;
const SYS_EXIT: u32 = 2;
const SYS_EXECVE: u32 = 3;
const SYS_FORK: u32 = 4;
const SYS_WAIT: u32 = 5;
const SYS_CLONE: u32 = 10;
const SYS_FUTEX_WAIT: u32 = 11;
const SYS_FUTEX_WAKE: u32 = 12;
const SYS_LS: u32 = 13;

/// The register-save record a syscall trap leaves on the kernel stack.
///
/// Declared in the order `syscall_entry` actually writes it: `pushad` pushes
/// `eax,ecx,edx,ebx,esp,ebp,esi,edi` in that order, so `edi` (pushed last)
/// ends up at the lowest address -- the pointer `push esp; call` hands to
/// [`syscall_dispatch`] -- and the four segment registers pushed *before*
/// `pushad` land just above it in reverse push order (`ds,es,fs,gs`). The
/// CPU's own cross-ring push (`ss,esp,eflags,cs,eip`, in that order) sits
/// above all of it.
#[repr(C)]
#[derive(Clone, Copy)]
pub struct TrapFrame {
    pub edi: u32,
    pub esi: u32,
    pub ebp: u32,
    _esp_dummy: u32,
    pub ebx: u32,
    pub edx: u32,
    pub ecx: u32,
    pub eax: u32,
    pub ds: u32,
    pub es: u32,
    pub fs: u32,
    pub gs: u32,
    pub eip: u32,
    pub cs: u32,
    pub eflags: u32,
    pub useresp: u32,
    pub ss: u32,
}

impl TrapFrame {
    /// A frame that, once resumed through [`trap_epilogue`], lands at
    /// `entry` in ring 3 with stack pointer `esp` and every general-purpose
    /// register zeroed -- the reset `execve` performs on both the fresh
    /// bootstrap process and any later re-exec.
    pub(crate) fn user_entry(entry: u32, esp: u32) -> Self {
        let user_data = u32::from(gdt::USER_DATA_SELECTOR);
        Self {
            edi: 0,
            esi: 0,
            ebp: 0,
            _esp_dummy: 0,
            ebx: 0,
            edx: 0,
            ecx: 0,
            eax: 0,
            ds: user_data,
            es: user_data,
            fs: user_data,
            gs: user_data,
            eip: entry,
            cs: u32::from(gdt::USER_CODE_SELECTOR),
            eflags: 0x202, // IF set, bit 1 reserved-as-1
            useresp: esp,
            ss: user_data,
        }
    }
}

core::arch::global_asm!(
    r#"
.section .text
.global syscall_entry
syscall_entry:
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
    call {dispatch}
    add esp, 4
.global trap_epilogue
trap_epilogue:
    popad
    pop ds
    pop es
    pop fs
    pop gs
    iretd
"#,
    kernel_data = const crate::gdt::KERNEL_DATA_SELECTOR,
    dispatch = sym syscall_dispatch,
);

unsafe extern "C" {
    /// The `int 0x80` trap gate target, registered by `interrupts::init`.
    pub fn syscall_entry();
    /// The shared trap-return stub: restores a `TrapFrame` sitting at the
    /// current stack pointer and `iretd`s into whatever ring/CS it names.
    pub(crate) fn trap_epilogue() -> !;
}

fn user_range_ok(ptr: u32, len: u32) -> bool {
    match ptr.checked_add(len) {
        Some(end) => end <= config::DIRECT_MAP_BASE,
        None => false,
    }
}

/// Reads a NUL-terminated string out of user memory, bounded to a small
/// fixed maximum (every filename this filesystem can hold fits in the
/// inode's 32-byte name field).
fn read_user_cstr(ptr: u32) -> Option<String> {
    const MAX_LEN: u32 = 64;
    if !user_range_ok(ptr, MAX_LEN) {
        return None;
    }
    // SAFETY: `user_range_ok` just confirmed `[ptr, ptr + MAX_LEN)` lies
    // below the direct map; user pointers are otherwise trusted (spec
    // section 9's open question on pointer validation).
    let bytes = unsafe { core::slice::from_raw_parts(ptr as *const u8, MAX_LEN as usize) };
    let len = bytes.iter().position(|&b| b == 0)?;
    core::str::from_utf8(&bytes[..len]).ok().map(String::from)
}

/// The dispatcher every syscall trap funnels into. Called by `syscall_entry`
/// with a pointer to the frame it just built.
///
/// # Safety
/// Must only be called by `syscall_entry` with a frame it just built.
#[unsafe(no_mangle)]
extern "C" fn syscall_dispatch(frame: &mut TrapFrame) {
    match frame.eax {
        SYS_READ => frame.eax = sys_read(frame.ebx, frame.ecx) as u32,
        SYS_WRITE => frame.eax = sys_write(frame.ebx, frame.ecx, frame.edx) as u32,
        SYS_EXIT => sys_exit(frame.ebx as i32),
        SYS_EXECVE => {
            let name_ptr = frame.ebx;
            frame.eax = sys_execve(frame, name_ptr) as u32;
        }
        SYS_FORK => frame.eax = sys_fork(frame) as u32,
        SYS_WAIT => frame.eax = sys_wait(frame.ebx) as u32,
        SYS_CLONE => frame.eax = sys_clone(frame, frame.ebx, frame.ecx) as u32,
        SYS_FUTEX_WAIT => frame.eax = sys_futex_wait(frame.ebx, frame.ecx) as u32,
        SYS_FUTEX_WAKE => frame.eax = sys_futex_wake(frame.ebx) as u32,
        SYS_LS => frame.eax = sys_ls() as u32,
        other => serial_println!("[kernel] unknown syscall number: {}", other),
    }
}

/// Blocks on the keyboard ring until at least one byte is available.
fn sys_read(buf_ptr: u32, count: u32) -> i32 {
    if !user_range_ok(buf_ptr, count) {
        return -1;
    }
    loop {
        // SAFETY: bounds checked above; `read` is the sole writer into this
        // user buffer for the duration of the syscall.
        let buf = unsafe { core::slice::from_raw_parts_mut(buf_ptr as *mut u8, count as usize) };
        let n = keyboard::drain(buf);
        if n > 0 {
            return n as i32;
        }
        scheduler::block_current(BlockReason::Stdin);
    }
}

/// Writes to the kernel console if `fd == 1`; any other `fd` is logged and
/// ignored rather than terminating the caller.
fn sys_write(fd: u32, buf_ptr: u32, count: u32) -> i32 {
    if fd != 1 {
        serial_println!("[kernel] write to non-stdout fd {} ignored", fd);
        return 0;
    }
    if !user_range_ok(buf_ptr, count) {
        return -1;
    }
    // SAFETY: bounds checked above.
    let buf = unsafe { core::slice::from_raw_parts(buf_ptr as *const u8, count as usize) };
    match core::str::from_utf8(buf) {
        Ok(s) => print!("{s}"),
        Err(_) => {
            for &byte in buf {
                let c = if byte.is_ascii_graphic() || byte == b' ' || byte == b'\n' {
                    byte as char
                } else {
                    '.'
                };
                print!("{c}");
            }
        }
    }
    count as i32
}

/// Marks the caller `Terminated`, wakes a waiting parent, and switches away
/// for good. `exit` is terminal; the PCB is only cleaned up once `wait`
/// reaps it.
fn sys_exit(code: i32) -> ! {
    let pid = task::current_pid();
    let parent_id = task::with_current(|pcb| {
        pcb.state = State::Terminated;
        pcb.exit_code = code;
        pcb.parent_id
    });
    task::reparent_orphans(pid);
    serial_println!("[kernel] pid {} exited with code {}", pid, code);
    task::wake(parent_id);
    scheduler::exit_reschedule()
}

/// Tears down the current image, loads `filename` in its place, and rewrites
/// `frame` to resume at the new entry point. Returns `0` on success, `-1` on
/// any failure, leaving `frame` untouched.
fn sys_execve(frame: &mut TrapFrame, name_ptr: u32) -> i32 {
    let Some(name) = read_user_cstr(name_ptr) else {
        return -1;
    };
    cpu::disable_interrupts();
    let dir = task::current_directory_phys();
    let result = process::exec_into(dir, &name);
    let outcome = match result {
        Ok(entry) => {
            *frame = TrapFrame::user_entry(entry, config::USER_INITIAL_ESP);
            0
        }
        Err(msg) => {
            serial_println!("[kernel] execve {}: {}", name, msg);
            -1
        }
    };
    cpu::enable_interrupts();
    outcome
}

/// Clones the caller's address space copy-on-write and forges the child to
/// resume from this same trap with `eax == 0`. Returns the child's PID to
/// the parent, `-1` on allocation failure.
fn sys_fork(frame: &TrapFrame) -> i32 {
    let parent_dir = task::current_directory_phys();
    let child_dir = match vmm::clone_address_space(parent_dir) {
        Ok(dir) => dir,
        Err(_) => return -1,
    };

    let stack = Box::new([0u8; KERNEL_STACK_SIZE]);
    let stack_top = stack.as_ptr() as u32 + KERNEL_STACK_SIZE as u32;
    let frame_addr = stack_top - size_of::<TrapFrame>() as u32;
    let mut child_frame = *frame;
    child_frame.eax = 0;
    // SAFETY: `frame_addr` lies within the just-allocated, exclusively-owned
    // `stack` buffer, room for exactly one `TrapFrame`.
    unsafe { (frame_addr as *mut TrapFrame).write(child_frame) };

    // SAFETY: the `TrapFrame` just written above sits at `frame_addr`, with
    // at least 20 bytes of the same owned stack free below it.
    let saved_esp = unsafe { task::switch::forge_trap_return(frame_addr, trap_epilogue) };

    let parent_id = task::current_pid();
    task::spawn_from_trap(parent_id, child_dir, saved_esp, stack) as i32
}

/// Spawns a new thread sharing the caller's address space (refcounted), with
/// its own kernel stack, resuming at `entry` with stack pointer `new_esp`.
/// Returns the new thread's PID.
fn sys_clone(frame: &TrapFrame, new_esp: u32, entry: u32) -> i32 {
    let dir = task::current_directory_phys();
    pmm::inc_ref(dir);

    let stack = Box::new([0u8; KERNEL_STACK_SIZE]);
    let stack_top = stack.as_ptr() as u32 + KERNEL_STACK_SIZE as u32;
    let frame_addr = stack_top - size_of::<TrapFrame>() as u32;
    let mut child_frame = *frame;
    child_frame.eax = 0;
    child_frame.ebp = 0;
    child_frame.useresp = new_esp;
    child_frame.eip = entry;
    // SAFETY: as in `sys_fork`.
    unsafe { (frame_addr as *mut TrapFrame).write(child_frame) };

    // SAFETY: as in `sys_fork`.
    let saved_esp = unsafe { task::switch::forge_trap_return(frame_addr, trap_epilogue) };

    let parent_id = task::current_pid();
    task::spawn_from_trap(parent_id, dir, saved_esp, stack) as i32
}

/// Reaps a terminated child if one exists, blocking on `ChildWait` while a
/// running (not yet terminated) child remains. Returns `-1` if the caller
/// has no children at all.
fn sys_wait(status_ptr: u32) -> i32 {
    let parent_id = task::current_pid();
    loop {
        if let Some((pid, code, dir_phys)) = task::reap_child(parent_id) {
            vmm::destroy(dir_phys);
            if status_ptr != 0 && user_range_ok(status_ptr, 4) {
                // SAFETY: bounds checked above; trusted user pointer.
                unsafe { (status_ptr as *mut i32).write(code) };
            }
            return pid as i32;
        }
        if !task::has_running_child(parent_id) {
            return -1;
        }
        scheduler::block_current(BlockReason::ChildWait);
    }
}

/// Blocks if `*addr == expected`: a single check-then-block, since the
/// caller is responsible for re-checking the condition itself on every wake
/// (Mesa semantics, the same ones [`crate::sync::Semaphore`] uses on the
/// kernel side). The read and the transition to `Blocked` run with
/// interrupts disabled as one atomic step -- a timer preemption landing
/// between them would let a concurrent `futex_wake` find this thread still
/// `Running`/`Ready`, not yet `Blocked`, and lose the wakeup.
fn sys_futex_wait(addr: u32, expected: u32) -> i32 {
    if !user_range_ok(addr, 4) {
        return -1;
    }
    cpu::without_interrupts(|| {
        // SAFETY: bounds checked above.
        let current = unsafe { core::ptr::read_volatile(addr as *const u32) };
        if current != expected {
            return 0;
        }
        scheduler::block_current(BlockReason::Futex(addr));
        0
    })
}

/// Wakes one thread blocked in `futex_wait` on `addr`, if any.
fn sys_futex_wake(addr: u32) -> i32 {
    match task::wake_one_matching(BlockReason::Futex(addr)) {
        Some(_) => 1,
        None => 0,
    }
}

/// Prints every mounted file's name and size to the console (the `ls`
/// syscall).
fn sys_ls() -> i32 {
    for (name, size) in fs::list() {
        let len = name.iter().position(|&b| b == 0).unwrap_or(name.len());
        let name = core::str::from_utf8(&name[..len]).unwrap_or("?");
        println!("{name:<32} {size}");
    }
    0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test_case]
    fn trap_frame_has_cpu_pushed_tail_at_expected_offset() {
        // eip/cs/eflags/useresp/ss must sit after exactly 12 preceding u32
        // fields, regardless of how the first 12 are individually named.
        assert_eq!(core::mem::offset_of!(TrapFrame, eip), 12 * 4);
    }

    #[test_case]
    fn user_range_rejects_overflow_and_kernel_addresses() {
        assert!(!user_range_ok(u32::MAX - 3, 8));
        assert!(!user_range_ok(config::DIRECT_MAP_BASE, 1));
        assert!(user_range_ok(config::USER_CODE_START, 4096));
    }
}
