//! Tests for heap allocation in a `no_std` environment using the kernel's
//! own linked-list allocator, brought up through the real `kernel_init`
//! sequence rather than a faked-up heap.
#![no_std]
#![no_main]
#![feature(custom_test_frameworks)]
#![test_runner(self_rust_os::test_runner)]
#![reexport_test_harness_main = "test_main"]
#![allow(missing_docs)]
#![allow(clippy::missing_panics_doc)]
#![allow(clippy::missing_assert_message)]

extern crate alloc;

use alloc::boxed::Box;
use alloc::vec::Vec;
use core::panic::PanicInfo;

use self_rust_os::allocator::HEAP_SIZE;

#[unsafe(no_mangle)]
pub extern "C" fn kernel_main(_page_directory_phys: u32, e820_info: u32) -> ! {
    // SAFETY: first thing this binary does, with the pointer `boot.rs`'s
    // trampoline handed it.
    unsafe { self_rust_os::kernel_init(e820_info) };

    test_main();
    self_rust_os::hlt_loop();
}

#[panic_handler]
fn panic(info: &PanicInfo) -> ! {
    self_rust_os::test_panic_handler(info)
}

#[test_case]
fn when_creating_simple_allocation_then_memory_is_allocated() {
    let heap_value_1 = Box::new(41);
    let heap_value_2 = Box::new(42);

    assert_eq!(*heap_value_1, 41);
    assert_eq!(*heap_value_2, 42);
}

#[test_case]
fn when_creating_large_vec_then_memory_is_allocated() {
    let mut vec = Vec::new();
    for i in 0u64..1000 {
        vec.push(i);
    }
    assert_eq!(vec.iter().sum::<u64>(), (0..1000).sum());
}

#[test_case]
fn when_many_boxes_are_allocated_then_memory_is_allocated() {
    for i in 0..HEAP_SIZE {
        let x = Box::new(i);
        assert_eq!(*x, i);
    }
}
