// Copyright 2026 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! RISC-V specific helpers used across the HIK kernel.
//!
//! Written such that host builds can still exercise high level logic via the
//! lightweight `#[cfg(not(all(target_arch = "riscv64", target_os = "none")))]`
//! stubs.

/// Saved interrupt-enable state returned by [`disable_interrupts`].
#[derive(Clone, Copy, Debug)]
pub struct IrqGuardState {
    enabled: bool,
}

/// Disables interrupts on the current CPU and returns the prior state.
#[inline]
pub fn disable_interrupts() -> IrqGuardState {
    #[cfg(all(target_arch = "riscv64", target_os = "none"))]
    {
        let enabled = riscv::register::sstatus::read().sie();
        unsafe {
            riscv::register::sstatus::clear_sie();
        }
        IrqGuardState { enabled }
    }
    #[cfg(not(all(target_arch = "riscv64", target_os = "none")))]
    {
        IrqGuardState { enabled: false }
    }
}

/// Restores a previously saved interrupt-enable state.
#[inline]
pub fn restore_interrupts(state: IrqGuardState) {
    #[cfg(all(target_arch = "riscv64", target_os = "none"))]
    {
        if state.enabled {
            unsafe {
                riscv::register::sstatus::set_sie();
            }
        }
    }
    #[cfg(not(all(target_arch = "riscv64", target_os = "none")))]
    {
        let _ = state;
    }
}

/// Unconditionally enables interrupts on the current CPU.
#[inline]
pub fn enable_interrupts() {
    #[cfg(all(target_arch = "riscv64", target_os = "none"))]
    unsafe {
        riscv::register::sstatus::set_sie();
    }
}

/// Reads the timer CSR (nsec on virt is based on a 10 MHz counter).
#[inline]
pub fn read_time() -> u64 {
    #[cfg(all(target_arch = "riscv64", target_os = "none"))]
    {
        riscv::register::time::read() as u64
    }
    #[cfg(not(all(target_arch = "riscv64", target_os = "none")))]
    {
        0
    }
}

/// Issues a WFI instruction or yields on the host.
#[inline]
pub fn wait_for_interrupt() {
    #[cfg(all(target_arch = "riscv64", target_os = "none"))]
    unsafe {
        core::arch::asm!("wfi", options(nomem, nostack, preserves_flags));
    }
    #[cfg(not(all(target_arch = "riscv64", target_os = "none")))]
    {
        core::hint::spin_loop();
    }
}

/// Full memory barrier ordering all prior accesses before all later ones.
#[inline]
pub fn barrier_full() {
    core::sync::atomic::fence(core::sync::atomic::Ordering::SeqCst);
}

/// Acquire barrier paired with a publishing release store.
#[inline]
pub fn barrier_acquire() {
    core::sync::atomic::fence(core::sync::atomic::Ordering::Acquire);
}

/// Release barrier ordering prior writes before the publishing store.
#[inline]
pub fn barrier_release() {
    core::sync::atomic::fence(core::sync::atomic::Ordering::Release);
}
