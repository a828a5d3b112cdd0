//! Builds the bootable `disk.img` for `self_rust_os`.
//!
//! Lays out the disk image as:
//!
//! ```text
//! sector 0       MBR (boot/stage1.s, signed 0x55AA at offset 510)
//! sectors 1..16  stage2 (boot/stage2.s), 16 sectors reserved
//! sector 17      superblock
//! sector 18      inode bitmap
//! sectors 19..26 inode table, 2 inodes/sector, 256 B each (16 inodes)
//! sector 27+     kernel raw image, then data blocks for each mounted file
//! ```
//!
//! This binary is an ordinary host-targeted `std` program; it never runs on
//! the kernel's own i686 target. It shells out to `nasm` to assemble the two
//! boot stages and to `llvm-objcopy` (from `cargo-binutils`) to turn the
//! built kernel ELF into a flat binary, the way `rust-osdev/bootloader`'s
//! own packaging step does.

use std::{
    env, fs,
    path::{Path, PathBuf},
    process::Command,
};

use anyhow::{bail, Context, Result};

const SECTOR_SIZE: usize = 512;
const SUPERBLOCK_SECTOR: usize = 17;
const INODE_BITMAP_SECTOR: usize = 18;
const INODE_TABLE_SECTOR: usize = 19;
const INODE_TABLE_SECTORS: usize = 8;
const INODE_COUNT: usize = INODE_TABLE_SECTORS * 2;
const DATA_START_SECTOR: usize = INODE_TABLE_SECTOR + INODE_TABLE_SECTORS;
const SUPERBLOCK_MAGIC: u32 = 0x1234_5678;
const KERNEL_MAX_SECTORS: usize = 2048; // must match boot/stage2.s's KERNEL_SECTORS

fn main() -> Result<()> {
    let mut args = env::args().skip(1);
    match args.next().as_deref() {
        // Invoked by `xtask/qemu-run.sh`, which `.cargo/config.toml` wires up
        // as `cargo test`'s runner: the path cargo hands us is a *test*
        // binary (one of `tests/*.rs`) rather than `self_rust_os` itself, so
        // it is already built -- only boot sectors and the disk layout
        // around it still need assembling.
        Some("test-image") => {
            let elf = args.next().context("test-image requires a path to the built test ELF")?;
            let image = build_disk_image(Some(PathBuf::from(elf)))?;
            println!("{}", image.display());
            Ok(())
        }
        _ => {
            build_disk_image(None)?;
            Ok(())
        }
    }
}

/// Builds the real kernel (unless `test_kernel_elf` names an already-built
/// ELF to use instead, for a `tests/*.rs` integration test) and lays out a
/// bootable disk image around it. Returns the image's path.
fn build_disk_image(test_kernel_elf: Option<PathBuf>) -> Result<PathBuf> {
    let root = workspace_root()?;
    let out_dir = root.join("target").join("xtask");
    fs::create_dir_all(&out_dir)?;

    let stage1_bin = assemble(&root.join("boot/stage1.s"), &out_dir.join("stage1.bin"))?;
    let stage2_bin = assemble(&root.join("boot/stage2.s"), &out_dir.join("stage2.bin"))?;

    let (kernel_elf, image_name) = match test_kernel_elf {
        Some(path) => (path, "test-disk.img"),
        None => (build_kernel(&root)?, "disk.img"),
    };
    let kernel_flat = objcopy_flat(&kernel_elf, &out_dir.join("kernel.bin"))?;

    let user_programs_dir = root.join("user_programs");
    if image_name == "disk.img" {
        build_user_programs(&user_programs_dir)?;
    }
    let files = collect_mounted_files(&user_programs_dir)?;

    let image_path = root.join("target").join(image_name);
    write_disk_image(&image_path, &stage1_bin, &stage2_bin, &kernel_flat, &files)?;

    println!("wrote {}", image_path.display());
    Ok(image_path)
}

fn workspace_root() -> Result<PathBuf> {
    Ok(env::current_dir()?)
}

fn assemble(src: &Path, dst: &Path) -> Result<Vec<u8>> {
    let status = Command::new("nasm")
        .args(["-f", "bin", "-o"])
        .arg(dst)
        .arg(src)
        .status()
        .with_context(|| format!("failed to run nasm on {}", src.display()))?;
    if !status.success() {
        bail!("nasm failed for {}", src.display());
    }
    Ok(fs::read(dst)?)
}

fn build_kernel(root: &Path) -> Result<PathBuf> {
    let status = Command::new("cargo")
        .current_dir(root)
        .args([
            "build",
            "--release",
            "--target",
            "i686-self_os.json",
            "--bin",
            "self_rust_os",
        ])
        .status()
        .context("failed to invoke cargo to build the kernel")?;
    if !status.success() {
        bail!("kernel build failed");
    }
    Ok(root
        .join("target/i686-self_os/release/self_rust_os"))
}

fn objcopy_flat(elf: &Path, dst: &Path) -> Result<Vec<u8>> {
    let status = Command::new("llvm-objcopy")
        .args(["-O", "binary"])
        .arg(elf)
        .arg(dst)
        .status()
        .context("failed to run llvm-objcopy")?;
    if !status.success() {
        bail!("llvm-objcopy failed for {}", elf.display());
    }
    let bytes = fs::read(dst)?;
    if bytes.len() > KERNEL_MAX_SECTORS * SECTOR_SIZE {
        bail!(
            "kernel image is {} bytes, exceeds the {} sectors stage2.s reads",
            bytes.len(),
            KERNEL_MAX_SECTORS
        );
    }
    Ok(bytes)
}

struct MountedFile {
    name: String,
    data: Vec<u8>,
}

/// `user_programs` is not a cargo workspace (each program needs its own
/// linker script relative to its own manifest, per its `.cargo/config.toml`),
/// so every crate under it has to be built with its own `--manifest-path`
/// rather than one `cargo build` at the directory root.
fn build_user_programs(user_programs_dir: &Path) -> Result<()> {
    if !user_programs_dir.is_dir() {
        return Ok(());
    }
    for name in list_program_dirs(user_programs_dir)? {
        let manifest = user_programs_dir.join(&name).join("Cargo.toml");
        let status = Command::new("cargo")
            .current_dir(user_programs_dir)
            .args(["build", "--release", "--manifest-path"])
            .arg(&manifest)
            .status()
            .with_context(|| format!("failed to invoke cargo to build user_programs/{name}"))?;
        if !status.success() {
            bail!("build failed for user_programs/{name}");
        }
    }
    Ok(())
}

fn list_program_dirs(user_programs_dir: &Path) -> Result<Vec<String>> {
    let mut names = Vec::new();
    for entry in fs::read_dir(user_programs_dir)? {
        let entry = entry?;
        if !entry.path().is_dir() {
            continue;
        }
        let name = entry.file_name().to_string_lossy().into_owned();
        if name != "liblite" {
            names.push(name);
        }
    }
    names.sort();
    Ok(names)
}

/// Picks up every built user-program ELF under
/// `user_programs/*/target/i686-self_os-user/release/<name>` so the flat
/// filesystem's `ls`/`exec` syscalls have something to mount.
fn collect_mounted_files(user_programs_dir: &Path) -> Result<Vec<MountedFile>> {
    let mut files = Vec::new();
    if !user_programs_dir.is_dir() {
        return Ok(files);
    }
    for name in list_program_dirs(user_programs_dir)? {
        let bin_path = user_programs_dir
            .join(&name)
            .join("target/i686-self_os-user/release")
            .join(&name);
        if let Ok(data) = fs::read(&bin_path) {
            files.push(MountedFile {
                name: format!("{name}.elf"),
                data,
            });
        }
    }
    files.sort_by(|a, b| a.name.cmp(&b.name));
    Ok(files)
}

fn write_disk_image(
    path: &Path,
    stage1: &[u8],
    stage2: &[u8],
    kernel: &[u8],
    files: &[MountedFile],
) -> Result<()> {
    let kernel_sectors = kernel.len().div_ceil(SECTOR_SIZE);
    let mut data_sector = DATA_START_SECTOR + kernel_sectors;

    let mut image = Vec::new();

    // Sector 0: MBR.
    let mut sector0 = vec![0u8; SECTOR_SIZE];
    sector0[..stage1.len().min(SECTOR_SIZE)]
        .copy_from_slice(&stage1[..stage1.len().min(SECTOR_SIZE)]);
    sector0[510] = 0x55;
    sector0[511] = 0xAA;
    image.extend_from_slice(&sector0);

    // Sectors 1..16: stage2, padded to 16 sectors.
    let mut stage2_region = vec![0u8; 16 * SECTOR_SIZE];
    stage2_region[..stage2.len()].copy_from_slice(stage2);
    image.extend_from_slice(&stage2_region);

    // Sector 17: superblock.
    let mut superblock = vec![0u8; SECTOR_SIZE];
    superblock[0..4].copy_from_slice(&SUPERBLOCK_MAGIC.to_le_bytes());
    let total_blocks = data_sector as u32
        + files
            .iter()
            .map(|f| f.data.len().div_ceil(SECTOR_SIZE) as u32)
            .sum::<u32>();
    superblock[4..8].copy_from_slice(&total_blocks.to_le_bytes());
    superblock[8..12].copy_from_slice(&(INODE_BITMAP_SECTOR as u32).to_le_bytes());
    superblock[12..16].copy_from_slice(&(INODE_TABLE_SECTOR as u32).to_le_bytes());
    superblock[16..20].copy_from_slice(&(DATA_START_SECTOR as u32 + kernel_sectors as u32).to_le_bytes());
    superblock[20..24].copy_from_slice(&(INODE_COUNT as u32).to_le_bytes());
    image.extend_from_slice(&superblock);

    if files.len() > INODE_COUNT {
        bail!("too many files for a {INODE_COUNT}-inode filesystem");
    }

    // Sector 18: inode bitmap, one bit per inode.
    let mut bitmap = vec![0u8; SECTOR_SIZE];
    for i in 0..files.len() {
        bitmap[i / 8] |= 1 << (i % 8);
    }
    image.extend_from_slice(&bitmap);

    // Sectors 19..26: inode table, 256-byte records, 2 per sector.
    let mut inode_table = vec![0u8; INODE_TABLE_SECTORS * SECTOR_SIZE];
    data_sector = DATA_START_SECTOR + kernel_sectors;
    for (i, file) in files.iter().enumerate() {
        let record = &mut inode_table[i * 256..i * 256 + 256];
        record[0] = 1; // used
        let name_bytes = file.name.as_bytes();
        let name_len = name_bytes.len().min(32);
        record[1..1 + name_len].copy_from_slice(&name_bytes[..name_len]);
        record[33..37].copy_from_slice(&(file.data.len() as u32).to_le_bytes());

        let blocks = file.data.len().div_ceil(SECTOR_SIZE);
        for b in 0..blocks.min(48) {
            let off = 37 + b * 4;
            record[off..off + 4].copy_from_slice(&((data_sector + b) as u32).to_le_bytes());
        }
        data_sector += blocks;
    }
    image.extend_from_slice(&inode_table);

    // Sector 27+: the kernel's own raw image, then each file's data blocks.
    let mut kernel_region = kernel.to_vec();
    kernel_region.resize(kernel_sectors * SECTOR_SIZE, 0);
    image.extend_from_slice(&kernel_region);

    for file in files {
        let mut region = file.data.clone();
        region.resize(region.len().div_ceil(SECTOR_SIZE) * SECTOR_SIZE, 0);
        image.extend_from_slice(&region);
    }

    fs::write(path, image)?;
    Ok(())
}
