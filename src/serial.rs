//! Serial console mirror.
//!
//! Hand-rolled 16550 UART driver: `uart_16550` is built on
//! `x86_64::instructions::port::Port` and doesn't target `i686`, so this
//! talks to the COM1 ports directly through the `x86` crate's `io` module,
//! the way the rest of this kernel's low-level glue does.

use lazy_static::lazy_static;
use spin::Mutex;
use x86::io::{inb, outb};

const COM1: u16 = 0x3F8;

/// Minimal polling 16550 UART driver for the first serial port.
pub struct SerialPort {
    base: u16,
}

impl SerialPort {
    /// # Safety
    /// The caller must guarantee `base` is a valid, unshared UART I/O port.
    const unsafe fn new(base: u16) -> Self {
        Self { base }
    }

    fn init(&mut self) {
        // SAFETY: `self.base` is a fixed, kernel-owned UART port range.
        unsafe {
            outb(self.base + 1, 0x00); // disable interrupts
            outb(self.base + 3, 0x80); // enable DLAB
            outb(self.base, 0x03); // divisor low byte: 38400 baud
            outb(self.base + 1, 0x00); // divisor high byte
            outb(self.base + 3, 0x03); // 8 bits, no parity, one stop bit
            outb(self.base + 2, 0xC7); // enable + clear FIFO, 14-byte threshold
            outb(self.base + 4, 0x0B); // IRQs enabled, RTS/DSR set
        }
    }

    fn line_is_empty(&self) -> bool {
        // SAFETY: reading the line status register is always safe.
        unsafe { inb(self.base + 5) & 0x20 != 0 }
    }

    fn send(&mut self, byte: u8) {
        while !self.line_is_empty() {
            core::hint::spin_loop();
        }
        // SAFETY: the transmit holding register is empty (checked above).
        unsafe { outb(self.base, byte) };
    }
}

impl core::fmt::Write for SerialPort {
    fn write_str(&mut self, s: &str) -> core::fmt::Result {
        for byte in s.bytes() {
            self.send(byte);
        }
        Ok(())
    }
}

lazy_static! {
    pub static ref SERIAL1: Mutex<SerialPort> = {
        // SAFETY: COM1 is the standard first serial port.
        let mut serial_port = unsafe { SerialPort::new(COM1) };
        serial_port.init();
        Mutex::new(serial_port)
    };
}

#[doc(hidden)]
pub fn _print(args: ::core::fmt::Arguments) {
    use core::fmt::Write;

    #[expect(
        clippy::expect_used,
        reason = "Serial port should be correctly initialized."
    )]
    SERIAL1
        .lock()
        .write_fmt(args)
        .expect("Failed to print on serial port.");
}

/// Print to host machine through serial port interface.
#[macro_export]
macro_rules! serial_print {
    ($($args:tt)*) => {
        $crate::serial::_print(format_args!($($args)*));
    };
}

/// Print to host machine through serial port interface a line.
#[macro_export]
macro_rules! serial_println {
    () => ($crate::serial_print!("\n"));
    ($fmt:expr) => ($crate::serial_print!(concat!($fmt, "\n")));
    ($fmt:expr, $($arg:tt)*) => ($crate::serial_print!(
        concat!($fmt, "\n"), $($arg)*));
}
