//! Minimal user-space program for `self_rust_os`: prints a greeting through
//! `sys_write` and exits. The shell's `exec hello` (or a manual run) is the
//! simplest possible syscall smoke test.

#![no_std]
#![no_main]

use core::panic::PanicInfo;

liblite::entry_point!(main);

fn main() -> i32 {
    liblite::write_str("Hello from user space!\n");
    liblite::write_str("This message was printed via sys_write (int 0x80).\n");
    liblite::write_str("Goodbye! Exiting with code 0.\n");
    0
}

#[panic_handler]
fn panic(info: &PanicInfo) -> ! {
    liblite::handle_panic(info)
}
