//! The flat, read-only filesystem mounted from the ATA disk.
//!
//! There is no mutation path: every inode the builder ever creates is laid
//! down once, offline, before the disk image is ever booted. Mounting here
//! only has to find the superblock and remember where the inode table is;
//! everything else is a linear scan performed fresh on every lookup, which
//! is fine at the file counts this kernel ever deals with.

use alloc::vec::Vec;

use crate::ata;
use crate::config::{INODE_DIRECT_BLOCKS, INODE_SIZE, SECTOR_SIZE, SUPERBLOCK_MAGIC, SUPERBLOCK_SECTOR};
use crate::sync::IrqLock;

/// On-disk superblock. Read once at mount time.
#[repr(C)]
#[derive(Clone, Copy)]
struct Superblock {
    magic: u32,
    total_blocks: u32,
    inode_bitmap_block: u32,
    inode_table_block: u32,
    data_start_block: u32,
    inode_count: u32,
}

/// One 256-byte on-disk inode record. Read byte-wise: the compiler must
/// never be allowed to materialize a wide/unaligned copy of this packed
/// layout, a miscompile this freestanding environment cannot recover from.
#[repr(C, packed)]
#[derive(Clone, Copy)]
struct DiskInode {
    used: u8,
    name: [u8; 32],
    size: u32,
    blocks: [u32; INODE_DIRECT_BLOCKS],
    _padding: [u8; 27],
}

const _: () = assert!(core::mem::size_of::<DiskInode>() == INODE_SIZE);

/// In-memory handle to a located file: enough to read it back without
/// repeating the lookup scan.
#[derive(Clone, Copy)]
pub struct FileInfo {
    pub size: u32,
    blocks: [u32; INODE_DIRECT_BLOCKS],
    block_count: usize,
}

impl FileInfo {
    /// The buffer size `read` requires: `block_count` sectors, rounded up
    /// from `size` so every ATA read lands on a full-sector boundary.
    #[must_use]
    pub fn buffer_len(&self) -> usize {
        self.block_count * SECTOR_SIZE
    }
}

struct Mount {
    inode_table_block: u32,
    inode_count: u32,
}

static MOUNT: IrqLock<Option<Mount>> = IrqLock::new(None);

fn read_sector_inode(sector: u32, slot: usize) -> Option<DiskInode> {
    let mut buf = [0u8; SECTOR_SIZE];
    ata::read_sector(sector, &mut buf).ok()?;
    let offset = slot * INODE_SIZE;
    let mut inode = core::mem::MaybeUninit::<DiskInode>::uninit();
    // SAFETY: `offset + INODE_SIZE <= SECTOR_SIZE` for `slot` in {0, 1}, and
    // `DiskInode` has no padding bytes the byte-copy would leave
    // uninitialized (it is `#[repr(C, packed)]` with explicit trailing pad).
    unsafe {
        core::ptr::copy_nonoverlapping(buf.as_ptr().add(offset), inode.as_mut_ptr().cast::<u8>(), INODE_SIZE);
        Some(inode.assume_init())
    }
}

/// Reads the superblock at sector 17 and checks its magic. On a mismatch,
/// logs and leaves the filesystem unmounted rather than panicking.
pub fn mount() {
    let mut buf = [0u8; SECTOR_SIZE];
    if ata::read_sector(SUPERBLOCK_SECTOR as u32, &mut buf).is_err() {
        crate::serial_println!("fs: superblock read failed, staying unmounted");
        return;
    }

    let mut sb = core::mem::MaybeUninit::<Superblock>::uninit();
    // SAFETY: `buf` holds at least `size_of::<Superblock>()` bytes.
    let sb = unsafe {
        core::ptr::copy_nonoverlapping(
            buf.as_ptr(),
            sb.as_mut_ptr().cast::<u8>(),
            core::mem::size_of::<Superblock>(),
        );
        sb.assume_init()
    };

    if sb.magic != SUPERBLOCK_MAGIC {
        crate::serial_println!("fs: bad superblock magic {:#x}, staying unmounted", { sb.magic });
        return;
    }

    crate::serial_println!("fs: mounted, {} inodes", { sb.inode_count });
    *MOUNT.lock() = Some(Mount {
        inode_table_block: sb.inode_table_block,
        inode_count: sb.inode_count,
    });
}

const INODES_PER_SECTOR: u32 = (SECTOR_SIZE / INODE_SIZE) as u32;

fn for_each_inode(mut f: impl FnMut(&DiskInode) -> bool) {
    let Some(mount) = MOUNT.lock().as_ref().map(|m| (m.inode_table_block, m.inode_count)) else {
        return;
    };
    let (table_block, inode_count) = mount;

    let mut seen = 0u32;
    let mut sector = table_block;
    while seen < inode_count {
        for slot in 0..INODES_PER_SECTOR as usize {
            if seen >= inode_count {
                break;
            }
            seen += 1;
            let Some(inode) = read_sector_inode(sector, slot) else {
                return;
            };
            if !f(&inode) {
                return;
            }
        }
        sector += 1;
    }
}

fn name_matches(inode: &DiskInode, query: &str) -> bool {
    let name = inode.name;
    let len = name.iter().position(|&b| b == 0).unwrap_or(name.len());
    name[..len] == *query.as_bytes()
}

/// Linear scan of the inode table for a `used` record whose name matches
/// `query`.
#[must_use]
pub fn lookup(query: &str) -> Option<FileInfo> {
    let mut found = None;
    for_each_inode(|inode| {
        if inode.used == 1 && name_matches(inode, query) {
            let size = inode.size;
            let blocks = inode.blocks;
            let block_count = (size as usize).div_ceil(SECTOR_SIZE);
            found = Some(FileInfo {
                size,
                blocks,
                block_count,
            });
            false
        } else {
            true
        }
    });
    found
}

/// Returns `(name, size)` for every used inode, for the `ls` syscall.
#[must_use]
pub fn list() -> Vec<([u8; 32], u32)> {
    let mut out = Vec::new();
    for_each_inode(|inode| {
        if inode.used == 1 {
            out.push((inode.name, inode.size));
        }
        true
    });
    out
}

/// Reads the whole file described by `info` into `buf`. `buf.len()` must
/// already be rounded up to a 512-byte boundary covering at least
/// `info.size` bytes -- the ATA driver always writes full sectors, and an
/// under-sized buffer here corrupts whatever heap allocation follows it.
pub fn read(info: &FileInfo, buf: &mut [u8]) -> Result<(), ()> {
    assert!(buf.len() >= info.block_count * SECTOR_SIZE);
    for (i, &block) in info.blocks[..info.block_count].iter().enumerate() {
        let dest = &mut buf[i * SECTOR_SIZE..(i + 1) * SECTOR_SIZE];
        ata::read_sector(block, dest)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test_case]
    fn disk_inode_is_exactly_256_bytes() {
        assert_eq!(core::mem::size_of::<DiskInode>(), INODE_SIZE);
    }
}
