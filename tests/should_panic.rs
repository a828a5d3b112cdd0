//! A test that is expected to panic: proves the panic path itself reports
//! success instead of hanging or tripping a real kernel panic.

#![no_std]
#![no_main]
#![feature(custom_test_frameworks)]
#![test_runner(test_runner)]
#![reexport_test_harness_main = "test_main"]

use core::panic::PanicInfo;
use self_rust_os::{exit_qemu, serial_println, QemuExitCode};

#[unsafe(no_mangle)]
pub extern "C" fn kernel_main(_page_directory_phys: u32, e820_info: u32) -> ! {
    // SAFETY: first thing this binary does, with the pointer `boot.rs`'s
    // trampoline handed it.
    unsafe { self_rust_os::kernel_init(e820_info) };

    test_main();

    #[expect(
        clippy::empty_loop,
        reason = "Infinite loop after the test main function is done."
    )]
    loop {}
}

/// This file's own test runner, not the shared `Testable`-based one: a test
/// here that *doesn't* panic is the failure.
pub fn test_runner(tests: &[&dyn Fn()]) {
    serial_println!("Running {} tests", tests.len());
    for test in tests {
        test();
        serial_println!("[test did not panic]");
        exit_qemu(QemuExitCode::Failure);
    }
    exit_qemu(QemuExitCode::Success);
}

#[panic_handler]
fn panic(_info: &PanicInfo) -> ! {
    serial_println!("[ok]");
    exit_qemu(QemuExitCode::Success);
    loop {}
}

/// # Panics
/// Fails (by not panicking) if `should_fail` does not panic.
#[test_case]
fn should_fail() {
    serial_println!("should_panic::should_fail...\t");
    assert_eq!(0, 1, "This test should panic.");
}
