//! Macros for printing to the screen.
//! Provides a safe interface to write on the VGA text buffer with println macro.
//!
//! Console output disables interrupts across the call and mirrors to the
//! serial console, so output from multiple threads (or a thread and an ISR)
//! is serialized and never lost to the other side.

use core::fmt;

use crate::{interrupts, vga_buffer::writer::WRITER};

////////////////////////
//    Print macros    //
////////////////////////

/// Copy of the std print! macro that redirect our internal _print function.
#[macro_export]
macro_rules! print {
    ($($arg:tt)*) => ($crate::vga_buffer::macros::_print(format_args!($($arg)*)));
}

/// Copy of the std println! macro that redirect our internal _print function.
#[macro_export]
macro_rules! println {
    () => ($crate::print!("\n"));
    ($($arg:tt)*) => ($crate::print!("{}\n", format_args!($($arg)*)));
}

/// Write to both the VGA text buffer and the serial mirror, with interrupts
/// disabled for the duration so concurrent printers don't interleave.
#[doc(hidden)]
pub fn _print(args: fmt::Arguments) {
    use core::fmt::Write;

    interrupts::without_interrupts(|| {
        #[expect(
            clippy::unwrap_used,
            reason = "We should be able to write inside the vga frame buffer"
        )]
        WRITER.lock().write_fmt(args).unwrap();
        let _ = crate::serial::SERIAL1.lock().write_fmt(args);
    });
}
