//! Build script for the kernel crate itself.
//!
//! The kernel's own compilation needs nothing beyond re-running when the
//! linker script changes. Assembling `boot/stage1.s`/`boot/stage2.s` and
//! laying out the bootable disk image is a separate, host-targeted concern
//! handled by the `xtask` binary (see `xtask/src/main.rs`), which runs as an
//! ordinary `std` program after the kernel ELF has been built.

fn main() {
    println!("cargo:rerun-if-changed=linker.ld");
    println!("cargo:rerun-if-changed=i686-self_os.json");
}
