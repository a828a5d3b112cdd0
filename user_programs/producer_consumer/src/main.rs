//! Bounded-buffer producer/consumer: two producer threads each generate 10
//! items, four consumer threads each take
//! 5, through a 5-slot ring buffer guarded by a [`Mutex`] for the indices
//! and a pair of [`Semaphore`]s (`EMPTY`/`FULL`) for backpressure in both
//! directions -- the classic bounded-buffer solution, just with every
//! primitive backed by `futex_wait`/`futex_wake` instead of a kernel thread
//! block.

#![no_std]
#![no_main]

use core::panic::PanicInfo;
use core::sync::atomic::{AtomicI32, Ordering};
use liblite::sync::{Mutex, Semaphore};
use liblite::syscall;

liblite::entry_point!(main);

const BUFFER_SIZE: usize = 5;
const NUM_PRODUCERS: usize = 2;
const NUM_CONSUMERS: usize = 4;
const ITEMS_PER_PRODUCER: i32 = 10;
const ITEMS_PER_CONSUMER: i32 = 5;
const NUM_THREADS: usize = NUM_PRODUCERS + NUM_CONSUMERS;
const STACK_SIZE: usize = 4096;

struct RingBuffer {
    slots: [i32; BUFFER_SIZE],
    head: usize,
    tail: usize,
}

static BUFFER: Mutex<RingBuffer> = Mutex::new(RingBuffer { slots: [0; BUFFER_SIZE], head: 0, tail: 0 });
static EMPTY_SLOTS: Semaphore = Semaphore::new(BUFFER_SIZE as i32);
static FULL_SLOTS: Semaphore = Semaphore::new(0);
static CONSUMED: AtomicI32 = AtomicI32::new(0);
static mut STACKS: [[u8; STACK_SIZE]; NUM_THREADS] = [[0; STACK_SIZE]; NUM_THREADS];

fn produce(item: i32) {
    EMPTY_SLOTS.wait();
    {
        let mut buf = BUFFER.lock();
        buf.slots[buf.head] = item;
        buf.head = (buf.head + 1) % BUFFER_SIZE;
    }
    FULL_SLOTS.signal();
}

fn consume() -> i32 {
    FULL_SLOTS.wait();
    let item = {
        let mut buf = BUFFER.lock();
        let item = buf.slots[buf.tail];
        buf.tail = (buf.tail + 1) % BUFFER_SIZE;
        item
    };
    EMPTY_SLOTS.signal();
    item
}

extern "C" fn producer_thread() -> ! {
    for i in 0..ITEMS_PER_PRODUCER {
        produce(i);
    }
    syscall::exit(0);
}

extern "C" fn consumer_thread() -> ! {
    for _ in 0..ITEMS_PER_CONSUMER {
        consume();
        CONSUMED.fetch_add(1, Ordering::SeqCst);
    }
    syscall::exit(0);
}

fn spawn(slot: usize, entry: extern "C" fn() -> !) -> i32 {
    // SAFETY: each slot is handed to exactly one thread; only the address
    // is taken here, never a reference held across a call.
    let stack_top = unsafe { STACKS[slot].as_ptr() as u32 } + STACK_SIZE as u32;
    syscall::clone(stack_top, entry)
}

fn main() -> i32 {
    let mut slot = 0;
    for _ in 0..NUM_PRODUCERS {
        if spawn(slot, producer_thread) < 0 {
            liblite::write_str("clone (producer) failed\n");
            return 1;
        }
        slot += 1;
    }
    for _ in 0..NUM_CONSUMERS {
        if spawn(slot, consumer_thread) < 0 {
            liblite::write_str("clone (consumer) failed\n");
            return 1;
        }
        slot += 1;
    }

    for _ in 0..NUM_THREADS {
        syscall::wait(None);
    }

    let expected = NUM_PRODUCERS as i32 * ITEMS_PER_PRODUCER;
    if CONSUMED.load(Ordering::SeqCst) == expected {
        liblite::write_str("producer_consumer: all items accounted for\n");
        0
    } else {
        liblite::write_str("producer_consumer: item count MISMATCH\n");
        1
    }
}

#[panic_handler]
fn panic(info: &PanicInfo) -> ! {
    liblite::handle_panic(info)
}
