//! ATA PIO disk access.
//!
//! Read-only, primary bus, master drive, 28-bit LBA. Polling, not
//! interrupt-driven: the filesystem never blocks a thread on disk I/O, it
//! just spins the calling thread until the busy/ready bits settle, the same
//! register-polling style `serial.rs` uses for the UART.

use x86::io::{inb, inw, outb};

use crate::config::SECTOR_SIZE;
use crate::sync::Mutex;

const DATA: u16 = 0x1F0;
const ERROR: u16 = 0x1F1;
const SECTOR_COUNT: u16 = 0x1F2;
const LBA_LOW: u16 = 0x1F3;
const LBA_MID: u16 = 0x1F4;
const LBA_HIGH: u16 = 0x1F5;
const DRIVE_HEAD: u16 = 0x1F6;
const COMMAND: u16 = 0x1F7;
const STATUS: u16 = 0x1F7;

const CMD_READ_SECTORS: u8 = 0x20;

const STATUS_ERR: u8 = 1 << 0;
const STATUS_DRQ: u8 = 1 << 3;
const STATUS_BSY: u8 = 1 << 7;

fn wait_while_busy() {
    // SAFETY: polling the status register has no side effects.
    while unsafe { inb(STATUS) } & STATUS_BSY != 0 {
        core::hint::spin_loop();
    }
}

fn wait_until_ready() -> Result<(), ()> {
    loop {
        // SAFETY: polling the status register has no side effects.
        let status = unsafe { inb(STATUS) };
        if status & STATUS_ERR != 0 {
            return Err(());
        }
        if status & STATUS_BSY == 0 && status & STATUS_DRQ != 0 {
            return Ok(());
        }
        core::hint::spin_loop();
    }
}

/// There is exactly one ATA controller behind these ports; two kernel
/// threads issuing overlapping register sequences (e.g. two concurrent
/// `execve`s both reading their program image in) would interleave busy
/// polls and data reads on the same drive. Every `read_sector` call holds
/// this for its whole register sequence, not just the command issue.
static DISK_LOCK: Mutex = Mutex::new();

/// Reads one 512-byte sector at `lba` into `buf`.
///
/// # Panics
/// Panics if `buf` is not exactly [`SECTOR_SIZE`] bytes -- a programmer
/// error, since every call site already rounds its buffer up to a sector
/// boundary before calling in.
pub fn read_sector(lba: u32, buf: &mut [u8]) -> Result<(), ()> {
    assert_eq!(buf.len(), SECTOR_SIZE);
    DISK_LOCK.lock();
    let result = read_sector_locked(lba, buf);
    DISK_LOCK.unlock();
    result
}

fn read_sector_locked(lba: u32, buf: &mut [u8]) -> Result<(), ()> {
    // SAFETY: standard ATA PIO LBA28 read-sector register sequence on the
    // primary bus's master drive.
    unsafe {
        wait_while_busy();
        outb(DRIVE_HEAD, 0xE0 | ((lba >> 24) & 0x0F) as u8);
        outb(ERROR, 0); // unused "features" port, cleared for good measure
        outb(SECTOR_COUNT, 1);
        outb(LBA_LOW, (lba & 0xFF) as u8);
        outb(LBA_MID, ((lba >> 8) & 0xFF) as u8);
        outb(LBA_HIGH, ((lba >> 16) & 0xFF) as u8);
        outb(COMMAND, CMD_READ_SECTORS);
    }

    wait_until_ready()?;

    for word in buf.chunks_exact_mut(2) {
        // SAFETY: the drive has signaled DRQ (checked above); each of the
        // 256 reads below drains one of the 512 bytes it has ready.
        let value = unsafe { inw(DATA) };
        word[0] = (value & 0xFF) as u8;
        word[1] = (value >> 8) as u8;
    }
    Ok(())
}
