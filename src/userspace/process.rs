//! Loading a flat-filesystem file as the running process's new image, and
//! the two ways execution ever lands in ring 3: a rewritten `TrapFrame` for
//! an already-trapped process (`execve`) and a fresh one for the very first
//! process this kernel ever runs.

use core::arch::naked_asm;

use crate::config;
use crate::elf;
use crate::fs;
use crate::memory::pmm;
use crate::memory::vmm::{self, PteFlags};
use crate::serial_println;
use crate::task;

use super::syscall::{self, TrapFrame};

/// Looks `filename` up in the mounted filesystem, tears down every
/// user-space mapping `dir_phys` currently holds, loads the file's
/// `PT_LOAD` segments in their place, and maps a fresh user stack page.
/// Returns the new entry point.
///
/// `dir_phys` must be the currently-active address space: both
/// [`elf::load`] and the stack mapping below dereference user virtual
/// addresses directly rather than through the direct map.
///
/// Per `elf::load`'s own contract, a failure here (bad ELF, out of memory)
/// has nothing left to roll back to -- `dir_phys`'s previous image is
/// already gone by the time loading starts. The caller only has a dead
/// process left to report `Err` for; an `execve` failure at this point
/// leaves the process defunct rather than resumable.
pub fn exec_into(dir_phys: u32, filename: &str) -> Result<u32, &'static str> {
    let info = fs::lookup(filename).ok_or("no such file")?;
    let mut buf = alloc::vec![0u8; info.buffer_len()];
    fs::read(&info, &mut buf).map_err(|()| "disk read failed")?;

    vmm::clear_user_mappings(dir_phys);

    let entry = elf::load(dir_phys, &buf[..info.size as usize]).ok_or("malformed ELF image")?;

    let stack_frame = pmm::alloc_frame().map_err(|_| "out of memory mapping user stack")?;
    // SAFETY: `stack_frame` was just allocated and is reachable through the
    // direct map before `map` installs it into `dir_phys`.
    unsafe { core::ptr::write_bytes(vmm::p2v(stack_frame) as *mut u8, 0, config::FRAME_SIZE) };
    let stack_flags = PteFlags::PRESENT | PteFlags::WRITABLE | PteFlags::USER;
    vmm::map(dir_phys, config::USER_STACK_PAGE, stack_frame, stack_flags).map_err(|_| "out of memory mapping user stack")?;

    Ok(entry)
}

/// The entry point of PID 0's first child: loads [`config::INIT_PROGRAM`]
/// and jumps straight into ring 3. Run as a kernel thread
/// ([`crate::task::create_task`]) so it gets its own address space (cloned
/// from the kernel's) and kernel stack before it ever touches user memory.
pub extern "C" fn bootstrap_entry() -> ! {
    let dir_phys = task::current_directory_phys();
    match exec_into(dir_phys, config::INIT_PROGRAM) {
        Ok(entry) => {
            let frame = TrapFrame::user_entry(entry, config::USER_INITIAL_ESP);
            // SAFETY: `frame` is a fully-initialized `TrapFrame` living in
            // this function's own stack frame, which `enter_user` never
            // returns into -- it is abandoned the moment ESP is repointed.
            unsafe { enter_user(core::ptr::addr_of!(frame) as u32) }
        }
        Err(msg) => {
            serial_println!("bootstrap: exec {} failed: {}", config::INIT_PROGRAM, msg);
            crate::hlt_loop()
        }
    }
}

/// Repoints ESP at a `TrapFrame` living anywhere in (kernel) memory and
/// falls straight into [`syscall::trap_epilogue`], the same `popad`/`iretd`
/// tail every syscall return and every forged `fork`/`clone` child uses to
/// reach ring 3. This is the only other way into user mode, so there is
/// exactly one place in the whole kernel that assembles an `iretd`.
///
/// # Safety
/// `frame_addr` must point to a fully-initialized `TrapFrame`, and this
/// function must never be called anywhere its caller expects to resume --
/// execution does not return here; it continues in ring 3.
#[unsafe(naked)]
unsafe extern "C" fn enter_user(frame_addr: u32) -> ! {
    naked_asm!(
        "mov eax, [esp + 4]",
        "mov esp, eax",
        "jmp {trap_epilogue}",
        trap_epilogue = sym syscall::trap_epilogue,
    );
}
