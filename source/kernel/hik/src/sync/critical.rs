// Copyright 2026 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! CONTEXT: Interrupt-masked critical sections
//! OWNERS: @kernel-sync-team
//! PUBLIC API: with_interrupts_disabled(f)
//! DEPENDS_ON: arch::riscv interrupt mask save/restore
//! INVARIANTS: Restores the prior interrupt-enable flag even on early return

use crate::arch::riscv;

/// Runs `f` with interrupts masked on the current CPU.
///
/// Table mutations (capability table, domain table, IRQ route publication)
/// go through here; `check_access` and `dispatch` stay outside and rely on
/// acquire/release ordering instead.
#[inline]
pub fn with_interrupts_disabled<T>(f: impl FnOnce() -> T) -> T {
    let saved = riscv::disable_interrupts();
    let result = f();
    riscv::restore_interrupts(saved);
    result
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn passes_through_the_closure_result() {
        let value = with_interrupts_disabled(|| 7);
        assert_eq!(value, 7);
    }

    #[test]
    fn sections_nest() {
        let value = with_interrupts_disabled(|| with_interrupts_disabled(|| 1) + 1);
        assert_eq!(value, 2);
    }
}
