//! Integration test for spawning the first user process.
//!
//! Boots the kernel through the real `kernel_init` sequence, spawns
//! [`process::bootstrap_entry`] as a kernel thread the way `entry_point.rs`
//! does for PID 0's child, and checks that the scheduler's process table and
//! the user-space layout constants it relies on agree with each other.

#![no_std]
#![no_main]
#![feature(custom_test_frameworks)]
#![test_runner(self_rust_os::test_runner)]
#![reexport_test_harness_main = "test_main"]
#![allow(missing_docs)]

use core::panic::PanicInfo;

use self_rust_os::config;
use self_rust_os::{serial_println, task, userspace::process};

#[unsafe(no_mangle)]
pub extern "C" fn kernel_main(_page_directory_phys: u32, e820_info: u32) -> ! {
    // SAFETY: first thing this binary does, with the pointer `boot.rs`'s
    // trampoline handed it.
    unsafe { self_rust_os::kernel_init(e820_info) };

    test_main();
    self_rust_os::hlt_loop();
}

#[panic_handler]
fn panic(info: &PanicInfo) -> ! {
    self_rust_os::test_panic_handler(info)
}

/// The user stack window and the conventional code start must not overlap,
/// and every boundary between them must be page-aligned -- `vmm::map`
/// silently truncates a misaligned address to its containing frame, so a
/// drift here would show up as a wrong mapping rather than a loud error.
#[test_case]
fn user_layout_constants_are_consistent() {
    assert_eq!(config::USER_STACK_PAGE % config::FRAME_SIZE as u32, 0);
    assert_eq!(config::USER_STACK_TOP % config::FRAME_SIZE as u32, 0);
    assert_eq!(config::USER_CODE_START % config::FRAME_SIZE as u32, 0);
    assert!(config::USER_CODE_START < config::USER_STACK_PAGE);
    assert_eq!(
        config::USER_STACK_TOP,
        config::USER_STACK_PAGE + config::FRAME_SIZE as u32
    );
    assert!(config::USER_INITIAL_ESP < config::USER_STACK_TOP);

    serial_println!("[ok] user layout constants are consistent");
}

#[test_case]
fn syscall_vector_is_0x80() {
    assert_eq!(config::SYSCALL_VECTOR, 0x80);
}

/// Spawning the init bootstrap thread must link a new, distinct PCB into the
/// process table with the parent recorded as the caller (PID 0 in this
/// test, since nothing else has been spawned yet).
#[test_case]
fn spawning_bootstrap_task_adds_a_runnable_pcb() {
    let caller = task::current_pid();
    let pid = task::create_task(process::bootstrap_entry)
        .expect("spawn should not run out of memory this early in boot");

    assert_ne!(pid, caller);
    let parent = task::with_pcb(pid, |pcb| pcb.parent_id)
        .expect("freshly spawned pcb must be present in the table");
    assert_eq!(parent, caller);
}
