//! The kernel binary's own entry point: implements the `kernel_main`
//! contract `boot.rs`'s trampoline calls into, brings up every subsystem,
//! spawns the first user process, and idles as PID 0.

#![no_std]
#![no_main]
#![feature(custom_test_frameworks)]
#![test_runner(self_rust_os::test_runner)]
#![reexport_test_harness_main = "test_main"]

use core::panic::PanicInfo;

use self_rust_os::{cpu, hlt_loop, serial_println, task, userspace::process};

/// Called by `boot.rs`'s trampoline with the physical address of the page
/// directory it built and the physical address of the E820 table stage2
/// deposited. Never returns: once bring-up is done, this thread becomes
/// PID 0, the scheduler's permanent idle/fallback thread.
#[unsafe(no_mangle)]
pub extern "C" fn kernel_main(_page_directory_phys: u32, e820_info: u32) -> ! {
    // SAFETY: called exactly once, as the very first thing this function
    // does, with the E820 pointer `boot.rs`'s trampoline just handed us.
    unsafe { self_rust_os::kernel_init(e820_info) };

    #[cfg(test)]
    test_main();

    serial_println!("self_rust_os: spawning init");
    match task::create_task(process::bootstrap_entry) {
        Ok(pid) => serial_println!("self_rust_os: init is pid {}", pid),
        Err(_) => serial_println!("self_rust_os: out of memory spawning init"),
    }

    cpu::enable_interrupts();
    hlt_loop();
}

#[cfg(not(test))]
#[panic_handler]
fn panic(info: &PanicInfo) -> ! {
    serial_println!("KERNEL PANIC: {}", info);
    hlt_loop();
}

#[cfg(test)]
#[panic_handler]
fn panic(info: &PanicInfo) -> ! {
    self_rust_os::test_panic_handler(info)
}
