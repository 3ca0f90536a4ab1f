// Copyright 2026 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! Bare-metal entry for the HIK kernel image.

#![cfg_attr(all(target_arch = "riscv64", target_os = "none"), no_std)]
#![cfg_attr(all(target_arch = "riscv64", target_os = "none"), no_main)]

#[cfg(all(target_arch = "riscv64", target_os = "none"))]
mod entry {
    use core::panic::PanicInfo;

    use hik::boot::{BootInfo, RawBootInfo, RawMemoryRegion};
    use hik::hal::virt::VirtMachine;
    use hik::kmain::KernelState;
    use hik::uart;

    /// Entry point reached from the bootloader with the hand-over block in
    /// the first argument register.
    ///
    /// # Safety
    ///
    /// The bootloader guarantees a valid stack, masked interrupts, and a
    /// readable boot-info block.
    #[no_mangle]
    pub unsafe extern "C" fn _start(boot_info: *const RawBootInfo) -> ! {
        uart::write_line("hik: entering _start");
        hik::init_heap();

        if boot_info.is_null() {
            fail("null boot-info pointer");
        }
        let raw = unsafe { &*boot_info };
        let memory_map = unsafe {
            core::slice::from_raw_parts(
                raw.memory_map as *const RawMemoryRegion,
                raw.memory_map_entries as usize,
            )
        };
        let info = match BootInfo::validate(raw, memory_map) {
            Ok(info) => info,
            Err(_) => fail("boot-info validation failed"),
        };
        let mut kernel = match KernelState::new(VirtMachine::new(), &info) {
            Ok(kernel) => kernel,
            Err(_) => fail("kernel bring-up failed"),
        };
        kernel.run()
    }

    fn fail(reason: &str) -> ! {
        uart::write_line(reason);
        loop {
            hik::arch::riscv::wait_for_interrupt();
        }
    }

    #[panic_handler]
    fn panic(info: &PanicInfo) -> ! {
        use core::fmt::Write as _;
        let mut w = uart::raw_writer();
        let _ = writeln!(w, "panic: {}", info);
        loop {
            hik::arch::riscv::wait_for_interrupt();
        }
    }
}

#[cfg(not(all(target_arch = "riscv64", target_os = "none")))]
fn main() {
    eprintln!("hik is a kernel image; build for a riscv64 bare-metal target");
}
