// Copyright 2026 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! CONTEXT: Unified panic handler emitting deterministic diagnostics over UART
//! OWNERS: @kernel-team
//! PUBLIC API: panic handler (no_std, feature-gated)
//! DEPENDS_ON: uart::raw_writer, arch wait_for_interrupt
//! INVARIANTS: Minimal formatting; no allocations; never returns

use core::fmt::Write;
use core::panic::PanicInfo;

use crate::uart;

/// Emits the panic message and parks the CPU forever.
#[panic_handler]
fn panic(info: &PanicInfo) -> ! {
    let mut w = uart::raw_writer();
    if let Some(location) = info.location() {
        let _ = writeln!(w, "PANIC {}:{}: {}", location.file(), location.line(), info.message());
    } else {
        let _ = writeln!(w, "PANIC: {}", info.message());
    }
    loop {
        crate::arch::riscv::wait_for_interrupt();
    }
}
