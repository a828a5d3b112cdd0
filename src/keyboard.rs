//! The keyboard ring buffer.
//!
//! Single-producer/single-consumer by construction: only the keyboard ISR
//! ever advances `head`, only the `read` syscall ever advances `tail`. The
//! fullness test `(head + 1) % CAPACITY == tail` sacrifices one slot of
//! capacity to distinguish full from empty without a separate counter.

use pc_keyboard::{layouts, DecodedKey, HandleControl, Keyboard, ScancodeSet1};

use crate::config::KEYBOARD_RING_SIZE;
use crate::sync::IrqLock;

struct Ring {
    buf: [u8; KEYBOARD_RING_SIZE],
    head: usize,
    tail: usize,
}

impl Ring {
    const fn new() -> Self {
        Self {
            buf: [0; KEYBOARD_RING_SIZE],
            head: 0,
            tail: 0,
        }
    }

    fn push(&mut self, byte: u8) {
        let next = (self.head + 1) % KEYBOARD_RING_SIZE;
        if next == self.tail {
            return; // full: drop silently.
        }
        self.buf[self.head] = byte;
        self.head = next;
    }

    fn pop(&mut self) -> Option<u8> {
        if self.head == self.tail {
            return None;
        }
        let byte = self.buf[self.tail];
        self.tail = (self.tail + 1) % KEYBOARD_RING_SIZE;
        Some(byte)
    }
}

static RING: IrqLock<Ring> = IrqLock::new(Ring::new());
static DECODER: IrqLock<Keyboard<layouts::Us104Key, ScancodeSet1>> = IrqLock::new(Keyboard::new(
    ScancodeSet1::new(),
    layouts::Us104Key,
    HandleControl::Ignore,
));

/// Decodes one PS/2 scancode byte and, if it completes a printable key
/// press, pushes its ASCII value into the ring. Called directly from the
/// keyboard ISR.
pub fn on_scancode(scancode: u8) {
    let mut decoder = DECODER.lock();
    let Ok(Some(event)) = decoder.add_byte(scancode) else {
        return;
    };
    let Some(key) = decoder.process_keyevent(event) else {
        return;
    };
    match key {
        DecodedKey::Unicode(c) if c.is_ascii() => {
            RING.lock().push(c as u8);
            crate::task::wake_one_matching(crate::task::BlockReason::Stdin);
        }
        DecodedKey::Unicode(_) | DecodedKey::RawKey(_) => {}
    }
}

/// Drains up to `buf.len()` bytes into `buf`, returning the count actually
/// read. Returns 0 if the ring is currently empty -- the `read` syscall is
/// responsible for blocking and retrying, this function never blocks.
pub fn drain(buf: &mut [u8]) -> usize {
    let mut ring = RING.lock();
    let mut n = 0;
    while n < buf.len() {
        match ring.pop() {
            Some(byte) => {
                buf[n] = byte;
                n += 1;
            }
            None => break,
        }
    }
    n
}

/// Whether at least one byte is currently available without blocking.
#[must_use]
pub fn has_data() -> bool {
    let ring = RING.lock();
    ring.head != ring.tail
}
