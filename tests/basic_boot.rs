//! Simple boot test for the kernel: brings every subsystem up through
//! `kernel_init` and checks the console is usable.

#![no_std]
#![no_main]
#![feature(custom_test_frameworks)]
#![test_runner(self_rust_os::test_runner)]
#![reexport_test_harness_main = "test_main"]

use core::panic::PanicInfo;

use self_rust_os::println;

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

/// Test that we can print a line.
#[test_case]
fn test_println() {
    println!("test_println output");
}
