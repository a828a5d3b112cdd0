//! User-mode program support: the syscall trap gate and dispatcher
//! ([`syscall`]) and the ELF `execve` path ([`process`]).
//!
//! Every address and selector a user program can observe already lives in
//! [`crate::config`] and [`crate::gdt`] (`USER_CODE_START`,
//! `USER_STACK_PAGE`, `USER_INITIAL_ESP`, `SYSCALL_VECTOR`,
//! `USER_CODE_SELECTOR`, `USER_DATA_SELECTOR`); this module only wires those
//! constants to an actual ring transition.

pub mod process;
pub mod syscall;
