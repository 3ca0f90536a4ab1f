// Copyright 2026 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! CONTEXT: Recording HAL used by host builds and unit tests
//! OWNERS: @kernel-team
//! PUBLIC API: MockMachine (recorded port/MMIO writes, halt count, settable clock)
//! DEPENDS_ON: hal traits, spin::Mutex
//! INVARIANTS: Records are append-only within a test; no real hardware access

extern crate alloc;

use alloc::vec::Vec;
use core::sync::atomic::{AtomicU32, AtomicU64, Ordering};

use spin::Mutex;

use super::{Cpu, IrqCtl, Mmio, PhysMap, PortIo, SyscallRet, Timer};

/// HAL double that records every side effect instead of touching hardware.
pub struct MockMachine {
    now_ns: AtomicU64,
    halts: AtomicU32,
    port_writes: Mutex<Vec<(u16, u8)>>,
    mmio_writes: Mutex<Vec<(usize, u32)>>,
    line_events: Mutex<Vec<(u8, bool)>>,
    syscall_returns: Mutex<Vec<u32>>,
}

impl MockMachine {
    /// Creates a machine with the clock at zero.
    pub fn new() -> Self {
        Self {
            now_ns: AtomicU64::new(0),
            halts: AtomicU32::new(0),
            port_writes: Mutex::new(Vec::new()),
            mmio_writes: Mutex::new(Vec::new()),
            line_events: Mutex::new(Vec::new()),
            syscall_returns: Mutex::new(Vec::new()),
        }
    }

    /// Advances the mock clock.
    pub fn advance_ns(&self, delta: u64) {
        self.now_ns.fetch_add(delta, Ordering::Relaxed);
    }

    /// Number of times the kernel requested a permanent halt.
    pub fn halt_requests(&self) -> u32 {
        self.halts.load(Ordering::Relaxed)
    }

    /// Snapshot of recorded port writes, oldest first.
    pub fn recorded_port_writes(&self) -> Vec<(u16, u8)> {
        self.port_writes.lock().clone()
    }

    /// Snapshot of recorded MMIO writes, oldest first.
    pub fn recorded_mmio_writes(&self) -> Vec<(usize, u32)> {
        self.mmio_writes.lock().clone()
    }

    /// Snapshot of interrupt-line mask changes as (vector, enabled).
    pub fn recorded_line_events(&self) -> Vec<(u8, bool)> {
        self.line_events.lock().clone()
    }

    /// Snapshot of statuses handed to the return mechanism.
    pub fn recorded_syscall_returns(&self) -> Vec<u32> {
        self.syscall_returns.lock().clone()
    }
}

impl Default for MockMachine {
    fn default() -> Self {
        Self::new()
    }
}

impl Cpu for MockMachine {
    fn halt(&self) {
        self.halts.fetch_add(1, Ordering::Relaxed);
    }

    fn idle(&self) {}
}

impl Timer for MockMachine {
    fn now_ns(&self) -> u64 {
        self.now_ns.load(Ordering::Relaxed)
    }
}

impl PortIo for MockMachine {
    fn outb(&self, port: u16, value: u8) {
        self.port_writes.lock().push((port, value));
    }

    fn inb(&self, _port: u16) -> u8 {
        0
    }
}

impl Mmio for MockMachine {
    fn write32(&self, offset: usize, value: u32) {
        self.mmio_writes.lock().push((offset, value));
    }

    fn read32(&self, _offset: usize) -> u32 {
        0
    }
}

impl IrqCtl for MockMachine {
    fn enable_line(&self, vector: u8) {
        self.line_events.lock().push((vector, true));
    }

    fn disable_line(&self, vector: u8) {
        self.line_events.lock().push((vector, false));
    }
}

impl PhysMap for MockMachine {
    fn phys_to_virt(&self, phys: u64) -> usize {
        phys as usize
    }
}

impl SyscallRet for MockMachine {
    fn syscall_return(&self, status: u32) {
        self.syscall_returns.lock().push(status);
    }
}
