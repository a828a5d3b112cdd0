//! The program PID 0's first child execs into (`config::INIT_PROGRAM`):
//! a line-oriented shell with `help`, `ls`, and `exec <name>`.
//!
//! `exec` runs its argument as a *child* process (`fork` then `execve` in
//! the child, `wait` in the parent) rather than calling `execve` directly,
//! so the shell itself survives running other programs -- `execve`ing over
//! itself would end the shell the moment the child program exited.

#![no_std]
#![no_main]

use core::panic::PanicInfo;
use liblite::syscall;

liblite::entry_point!(main);

const LINE_MAX: usize = 64;

fn main() -> i32 {
    liblite::write_str("self_rust_os shell\ntype 'help' for a list of commands\n");
    let mut buf = [0u8; LINE_MAX];
    loop {
        liblite::write_str("> ");
        let len = read_line(&mut buf);
        let line = core::str::from_utf8(&buf[..len]).unwrap_or("").trim();
        if line.is_empty() {
            continue;
        }
        let mut parts = line.splitn(2, ' ');
        let cmd = parts.next().unwrap_or("");
        let arg = parts.next().unwrap_or("").trim();
        match cmd {
            "help" => liblite::write_str("commands: help, ls, exec <name>\n"),
            "ls" => {
                syscall::ls();
            }
            "exec" => {
                if arg.is_empty() {
                    liblite::write_str("usage: exec <name>\n");
                } else {
                    run_child(arg);
                }
            }
            _ => liblite::write_str("unknown command (try 'help')\n"),
        }
    }
}

/// Reads one line from stdin, echoing each byte back as it is read (there is
/// no kernel-side line discipline -- the keyboard ring is raw, per
/// `src/keyboard.rs`) and handling backspace. Returns the line length,
/// excluding the terminating newline.
fn read_line(buf: &mut [u8; LINE_MAX]) -> usize {
    let mut len = 0;
    let mut byte = [0u8; 1];
    loop {
        if syscall::read(&mut byte) <= 0 {
            continue;
        }
        match byte[0] {
            b'\r' | b'\n' => {
                liblite::write_str("\n");
                return len;
            }
            0x08 | 0x7f if len > 0 => {
                len -= 1;
                liblite::write_str("\u{8} \u{8}");
            }
            0x08 | 0x7f => {}
            c if len < LINE_MAX - 1 => {
                buf[len] = c;
                len += 1;
                liblite::write(&buf[len - 1..len]);
            }
            _ => {}
        }
    }
}

/// Runs `name` as a child process and waits for it to finish, keeping this
/// shell's own image intact.
fn run_child(name: &str) {
    match syscall::fork() {
        -1 => liblite::write_str("fork failed\n"),
        0 => {
            syscall::execve(name);
            liblite::write_str("exec failed: no such program\n");
            syscall::exit(1);
        }
        _child_pid => {
            let mut status = 0;
            syscall::wait(Some(&mut status));
        }
    }
}

#[panic_handler]
fn panic(info: &PanicInfo) -> ! {
    liblite::handle_panic(info)
}
