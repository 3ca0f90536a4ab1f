// Copyright 2026 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! Minimal UART support for boot diagnostics.
//!
//! On the bare-metal target this drives the platform NS16550; host builds
//! keep the same interface but discard the bytes so unit tests stay quiet.

use core::fmt::{self, Write};
use spin::Mutex;

/// Address of the first UART on the `virt` machine.
#[cfg(all(target_arch = "riscv64", target_os = "none"))]
const UART0_BASE: usize = 0x1000_0000;
#[cfg(all(target_arch = "riscv64", target_os = "none"))]
const UART_TX: usize = 0x0;
#[cfg(all(target_arch = "riscv64", target_os = "none"))]
const UART_LSR: usize = 0x5;
#[cfg(all(target_arch = "riscv64", target_os = "none"))]
const LSR_TX_IDLE: u8 = 1 << 5;

/// Global UART writer used for boot logs.
static UART0: Mutex<KernelUart> = Mutex::new(KernelUart::new());

/// UART implementation capable of formatted writes.
#[derive(Clone, Copy)]
pub struct KernelUart {
    _private: (),
}

impl KernelUart {
    /// Creates the UART abstraction.
    pub const fn new() -> Self {
        Self { _private: () }
    }

    /// Returns a guard for the boot UART singleton.
    pub fn lock() -> spin::MutexGuard<'static, KernelUart> {
        UART0.lock()
    }
}

#[cfg(all(target_arch = "riscv64", target_os = "none"))]
#[inline]
fn write_raw_mmio(value: u8) {
    let addr = (UART0_BASE + UART_TX) as *mut u8;
    unsafe {
        while core::ptr::read_volatile((UART0_BASE + UART_LSR) as *const u8) & LSR_TX_IDLE == 0 {}
        core::ptr::write_volatile(addr, value);
    }
}

#[cfg(not(all(target_arch = "riscv64", target_os = "none")))]
#[inline]
fn write_raw_mmio(value: u8) {
    let _ = value;
}

/// Lock-free UART emission for trap/panic contexts where the mutex may already be held.
pub struct RawUart;

impl Write for RawUart {
    fn write_str(&mut self, s: &str) -> fmt::Result {
        for &byte in s.as_bytes() {
            if byte == b'\n' {
                write_raw_mmio(b'\r');
            }
            write_raw_mmio(byte);
        }
        Ok(())
    }
}

/// Returns the raw, unlocked writer.
pub fn raw_writer() -> RawUart {
    RawUart
}

impl Write for KernelUart {
    fn write_str(&mut self, s: &str) -> fmt::Result {
        for &byte in s.as_bytes() {
            if byte == b'\n' {
                write_raw_mmio(b'\r');
            }
            write_raw_mmio(byte);
        }
        Ok(())
    }
}

/// Writes the provided string via the global UART.
pub fn write_str(message: &str) {
    let mut uart = KernelUart::lock();
    let _ = uart.write_str(message);
}

/// Writes a line terminated by `\n` to the UART.
pub fn write_line(message: &str) {
    write_str(message);
    write_str("\n");
}
