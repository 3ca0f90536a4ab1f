// Copyright 2026 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

#![cfg_attr(not(test), no_std)]
#![deny(clippy::all)]

//! CONTEXT: HIK — the Core-0 arbiter of a hierarchical-isolation system
//! OWNERS: @kernel-team
//! PUBLIC API: kmain::KernelState plus the subsystem modules it aggregates
//! DEPENDS_ON: hik-abi, bitflags, spin, linked_list_allocator, static_assertions
//! INVARIANTS: Fixed-capacity tables sized at init; no hidden global state; host builds
//!             compile the full kernel logic for unit testing

extern crate alloc;

#[macro_use]
pub mod diag;

pub mod arch;
pub mod boot;
pub mod cap;
pub mod config;
pub mod domain;
pub mod exec;
pub mod hal;
pub mod ipc;
pub mod irq;
pub mod kmain;
pub mod monitor;
pub mod pmm;
pub mod sync;
pub mod syscall;
pub mod types;
pub mod uart;

#[cfg(all(feature = "panic_handler", not(test)))]
mod panic;

#[cfg(all(target_arch = "riscv64", target_os = "none"))]
mod heap {
    use linked_list_allocator::LockedHeap;

    #[global_allocator]
    static ALLOCATOR: LockedHeap = LockedHeap::empty();

    // Backs the fixed-capacity tables (capability table, frame descriptors);
    // nothing grows after boot.
    const HEAP_SIZE: usize = 16 * 1024 * 1024;
    static mut HEAP: [u8; HEAP_SIZE] = [0; HEAP_SIZE];

    /// # Safety
    ///
    /// Must run exactly once, before the first allocation.
    pub unsafe fn init() {
        unsafe {
            ALLOCATOR.lock().init(core::ptr::addr_of_mut!(HEAP) as *mut u8, HEAP_SIZE);
        }
    }
}

/// Initialises the kernel heap on the bare-metal target; a no-op on hosts,
/// where the platform allocator backs the tables.
pub fn init_heap() {
    #[cfg(all(target_arch = "riscv64", target_os = "none"))]
    // SAFETY: called once from the boot path before any allocation.
    unsafe {
        heap::init();
    }
}
