//! Self made OS in Rust.
//! This project is a learning project to understand how an OS works.
//! It is not intended to be a production ready OS.
//! I wanted to combine my love for Rust and my curiosity for OS development.
//! Feel free to ask me any question about this project, this is one of my favorite project.
//! Refer to the README.md file for more information about the features supported.

#![no_std]
#![cfg_attr(test, no_main)]
#![feature(custom_test_frameworks)]
#![test_runner(crate::test_runner)]
#![reexport_test_harness_main = "test_main"]

extern crate alloc;

use core::panic::PanicInfo;

pub mod allocator;
pub mod boot;
pub mod config;
pub mod cpu;
pub mod elf;
pub mod fs;
pub mod gdt;
pub mod interrupts;
pub mod keyboard;
pub mod memory;
pub mod serial;
pub mod sync;
pub mod task;
pub mod userspace;
pub mod vga_buffer;

const QEMU_EXIT_PORT: u16 = 0xf4;

/// Define possible exit code for qemu.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum QemuExitCode {
    /// Define a successfull exit status
    Success = 0x10,
    /// Define a failure exit status
    Failure = 0x11,
}

/// Exit qemu with a specific exit code.
/// Connect to an IO Port to exit qemu.
/// Configuration for the exit port is in the config.toml file.
pub fn exit_qemu(exit_code: QemuExitCode) {
    // SAFETY: the isa-debug-exit device is wired up at this fixed port by
    // `xtask`'s QEMU invocation for every test run; writing to it never
    // returns when QEMU is attached.
    unsafe { cpu::outw(QEMU_EXIT_PORT, u32::from(exit_code as u16) as u16) };
}

/// Halts forever, acknowledging interrupts so the CPU stays responsive to
/// the timer/keyboard between halts instead of spinning hot.
pub fn hlt_loop() -> ! {
    loop {
        cpu::hlt();
    }
}

/// Panic handler for external (functional) tests.
pub fn test_panic_handler(info: &PanicInfo) -> ! {
    serial_println!("[failed]\n");
    serial_println!("Error: {}\n", info);
    exit_qemu(QemuExitCode::Failure);
    hlt_loop();
}

/// Custom test runner for `no_std` testing.
pub fn test_runner(tests: &[&dyn Testable]) {
    println!("Running {} tests", tests.len());
    for test in tests {
        test.run();
    }

    exit_qemu(QemuExitCode::Success);
}

/// Panic handler for unit tests.
#[cfg(test)]
#[panic_handler]
fn panic(info: &PanicInfo) -> ! {
    serial_println!("[failed]\n");
    serial_println!("Error: {}\n", info);
    exit_qemu(QemuExitCode::Failure);
    hlt_loop();
}

/// Panic handler for the real kernel binary and any non-test build of this
/// crate: prints a register dump to both VGA and serial, the same diagnostic
/// a fatal processor fault gets, since a Rust panic is the same kind of
/// unrecoverable event, then halts.
#[cfg(not(test))]
#[panic_handler]
fn panic(info: &PanicInfo) -> ! {
    serial_println!("KERNEL PANIC: {}", info);
    println!("KERNEL PANIC: {info}");
    hlt_loop();
}

/// Trait to generalize tests cases.
/// Encapsulate the prints
pub trait Testable {
    /// Function that encapsulate the test run function.
    fn run(&self);
}

impl<T> Testable for T
where
    T: Fn(),
{
    fn run(&self) {
        use core::any::type_name;

        serial_print!("{}...\t", type_name::<T>());
        self();
        serial_println!("[ok]");
    }
}

/// Brings up every kernel subsystem in dependency order -- memory, GDT,
/// interrupts, heap, task table, filesystem -- given the physical E820 table
/// pointer and the boot trampoline's own stack range. Shared by the real
/// kernel binary (`entry_point.rs`) and every `tests/*.rs` integration test,
/// since both implement the same `kernel_main` contract and need the
/// identical bring-up sequence.
///
/// # Safety
/// Must be called exactly once, as the very first thing `kernel_main` does.
pub unsafe fn kernel_init(e820_ptr: u32) -> u32 {
    let boot_stack_phys = boot::boot_stack_phys_range();
    // SAFETY: delegated to caller; runs once at boot, before any other CR3
    // user or frame allocation exists.
    let kernel_dir_phys = unsafe { memory::init(e820_ptr, boot_stack_phys) };

    gdt::init();
    interrupts::init();
    interrupts::init_pic();

    // SAFETY: the direct map and PMM are up, so a heap region can now be
    // mapped and handed to the global allocator.
    unsafe { allocator::init_heap(kernel_dir_phys) };

    let boot_stack_top_virt = memory::vmm::p2v(boot_stack_phys.1);
    task::init(kernel_dir_phys, boot_stack_top_virt);
    fs::mount();

    kernel_dir_phys
}
