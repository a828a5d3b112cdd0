//! Spawns three threads (`clone`, sharing this process's address space) that
//! each increment a shared counter 10,000 times under a futex [`Mutex`],
//! then waits for all three and checks the final total. Without the lock
//! this would race and undercount; with it, the total must land exactly on
//! 30,000.

#![no_std]
#![no_main]

use core::panic::PanicInfo;
use liblite::sync::Mutex;
use liblite::syscall;

liblite::entry_point!(main);

const ITERS: i32 = 10_000;
const NUM_THREADS: usize = 3;
const STACK_SIZE: usize = 4096;

static COUNTER: Mutex<i32> = Mutex::new(0);
static mut STACKS: [[u8; STACK_SIZE]; NUM_THREADS] = [[0; STACK_SIZE]; NUM_THREADS];

extern "C" fn worker() -> ! {
    for _ in 0..ITERS {
        let mut count = COUNTER.lock();
        *count += 1;
    }
    syscall::exit(0);
}

fn main() -> i32 {
    for i in 0..NUM_THREADS {
        // SAFETY: each slot is handed to exactly one thread and never
        // touched by this loop again; only the address is taken here.
        let stack_top = unsafe { STACKS[i].as_ptr() as u32 } + STACK_SIZE as u32;
        if syscall::clone(stack_top, worker) < 0 {
            liblite::write_str("clone failed\n");
            return 1;
        }
    }

    for _ in 0..NUM_THREADS {
        syscall::wait(None);
    }

    let total = *COUNTER.lock();
    if total == ITERS * NUM_THREADS as i32 {
        liblite::write_str("mutex_threads: counter correct\n");
        0
    } else {
        liblite::write_str("mutex_threads: counter MISMATCH\n");
        1
    }
}

#[panic_handler]
fn panic(info: &PanicInfo) -> ! {
    liblite::handle_panic(info)
}
