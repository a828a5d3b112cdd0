//! Exercises copy-on-write fork: a global counter starts at 100, the child
//! sets it to 200 and exits, the parent waits and then re-reads it. If the
//! page tables really are copy-on-write, the parent's write-protected copy
//! never saw the child's store and still reads 100.

#![no_std]
#![no_main]

use core::panic::PanicInfo;
use core::sync::atomic::{AtomicI32, Ordering};
use liblite::syscall;

liblite::entry_point!(main);

static COUNTER: AtomicI32 = AtomicI32::new(100);

fn main() -> i32 {
    match syscall::fork() {
        -1 => {
            liblite::write_str("fork failed\n");
            1
        }
        0 => {
            COUNTER.store(200, Ordering::SeqCst);
            liblite::write_str("child: set counter to 200, exiting\n");
            syscall::exit(0);
        }
        _child_pid => {
            let mut status = 0;
            syscall::wait(Some(&mut status));
            let value = COUNTER.load(Ordering::SeqCst);
            if value == 100 {
                liblite::write_str("parent: counter still 100 -- copy-on-write fork OK\n");
                0
            } else {
                liblite::write_str("parent: counter was overwritten -- copy-on-write fork FAILED\n");
                1
            }
        }
    }
}

#[panic_handler]
fn panic(info: &PanicInfo) -> ! {
    liblite::handle_panic(info)
}
