// Copyright 2026 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! HAL implementation targeting QEMU's `virt` machine.

use crate::arch::riscv;

use super::{Cpu, IrqCtl, Mmio, PhysMap, PortIo, SyscallRet, Timer};

// Interrupt-controller window used for MMIO EOI writes on high vectors.
#[allow(dead_code)]
const INTC_BASE: usize = 0x0c00_0000;

/// Collection of HAL devices for the virt machine.
pub struct VirtMachine;

impl VirtMachine {
    /// Constructs the HAL facade.
    pub const fn new() -> Self {
        Self
    }
}

impl Cpu for VirtMachine {
    fn halt(&self) {
        #[cfg(all(target_arch = "riscv64", target_os = "none"))]
        {
            sbi_rt::system_reset(sbi_rt::Shutdown, sbi_rt::SystemFailure);
        }
        loop {
            riscv::wait_for_interrupt();
        }
    }

    fn idle(&self) {
        riscv::wait_for_interrupt();
    }
}

impl Timer for VirtMachine {
    fn now_ns(&self) -> u64 {
        // QEMU models a 10 MHz clock. Convert ticks to nanoseconds.
        const TICK_NS: u64 = 100;
        riscv::read_time() * TICK_NS
    }
}

impl PortIo for VirtMachine {
    // No ISA bridge on virt; legacy PIC traffic is discarded.
    fn outb(&self, _port: u16, _value: u8) {}

    fn inb(&self, _port: u16) -> u8 {
        0xFF
    }
}

impl Mmio for VirtMachine {
    fn write32(&self, offset: usize, value: u32) {
        #[cfg(all(target_arch = "riscv64", target_os = "none"))]
        unsafe {
            core::ptr::write_volatile((INTC_BASE + offset) as *mut u32, value);
        }
        #[cfg(not(all(target_arch = "riscv64", target_os = "none")))]
        {
            let _ = (offset, value);
        }
    }

    fn read32(&self, offset: usize) -> u32 {
        #[cfg(all(target_arch = "riscv64", target_os = "none"))]
        unsafe {
            core::ptr::read_volatile((INTC_BASE + offset) as *const u32)
        }
        #[cfg(not(all(target_arch = "riscv64", target_os = "none")))]
        {
            let _ = offset;
            0
        }
    }
}

impl IrqCtl for VirtMachine {
    fn enable_line(&self, _vector: u8) {}
    fn disable_line(&self, _vector: u8) {}
}

impl PhysMap for VirtMachine {
    // The kernel window identity-maps RAM on virt.
    fn phys_to_virt(&self, phys: u64) -> usize {
        phys as usize
    }
}

impl SyscallRet for VirtMachine {
    // The trap stub copies the status into a0 when it restores the frame.
    fn syscall_return(&self, _status: u32) {}
}
