//! Tiny runtime shared by every `user_programs/*` binary: raw syscall stubs
//! matching `src/userspace/syscall.rs`'s `TrapFrame`/dispatch convention, an
//! `_start` shim, a panic handler, and futex-backed `Mutex`/`Semaphore`
//! primitives.
//!
//! There is no libc here -- this crate exists only because five tiny
//! freestanding programs would otherwise duplicate the same `int 0x80`
//! wrappers and the same hand-rolled synchronization primitives five times.

#![no_std]

pub mod sync;
pub mod syscall;

pub use syscall::*;

/// Defines `_start`: calls `$main`, then exits with its return value as the
/// process status. `$main` never returns in practice (it always ends by
/// calling `exit` itself or panicking), but this makes the contract explicit
/// for every program without repeating the boilerplate.
#[macro_export]
macro_rules! entry_point {
    ($main:path) => {
        #[no_mangle]
        #[link_section = ".text.start"]
        pub extern "C" fn _start() -> ! {
            let main: fn() -> i32 = $main;
            let code = main();
            $crate::exit(code)
        }
    };
}

/// Shared `#[panic_handler]` body: writes the panic message to stdout (fd 1,
/// the only console this kernel gives user programs) and exits with status
/// 101, the same convention `std` test harnesses use for a panicking test.
pub fn handle_panic(info: &core::panic::PanicInfo) -> ! {
    write_str("program panicked: ");
    if let Some(msg) = info.message().as_str() {
        write_str(msg);
    } else {
        write_str("(no message)");
    }
    write_str("\n");
    exit(101)
}

/// Writes `s` to stdout, ignoring short writes -- every program here prints
/// short fixed strings, so partial writes are not a condition worth handling.
pub fn write_str(s: &str) {
    let _ = syscall::write(s.as_bytes());
}
