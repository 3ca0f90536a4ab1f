// Copyright 2026 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

#![cfg_attr(not(test), no_std)]
#![deny(clippy::all, missing_docs)]

//! CONTEXT: Shared ABI definitions between the HIK arbiter and lesser-privileged domains
//! OWNERS: @kernel-team
//! PUBLIC API: Status, Rights, BootFlags, SYSCALL_* IDs, BOOT_MAGIC
//! DEPENDS_ON: no_std, bitflags
//! INVARIANTS: Scalar status codes are stable; syscall IDs are stable; rights bits are stable

use bitflags::bitflags;

/// Magic value the bootloader places at the head of the boot-info structure ("HIK!").
pub const BOOT_MAGIC: u32 = 0x4849_4B21;

/// Boot-info structure version understood by this kernel.
pub const BOOT_VERSION: u32 = 1;

/// Synchronous cross-domain call through an endpoint capability.
pub const SYSCALL_IPC_CALL: usize = 0;
/// Moves a capability handle from the caller's space into another domain's space.
pub const SYSCALL_CAP_TRANSFER: usize = 1;
/// Mints a rights-subset child of a capability held by the caller.
pub const SYSCALL_CAP_DERIVE: usize = 2;
/// Revokes a capability held by the caller, transitively with all derivatives.
pub const SYSCALL_CAP_REVOKE: usize = 3;

/// Scalar status codes returned in the architecture's return register.
///
/// These values cross the privilege boundary and must never be renumbered.
#[repr(u32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Status {
    /// Operation completed.
    Success = 0,
    /// An argument failed validation (null out-pointer, zero size, bad vector).
    InvalidParam = 1,
    /// Caller lacks a required right or does not own the capability.
    Permission = 2,
    /// A table, quota-independent pool, or physical memory run is exhausted.
    NoResource = 3,
    /// Referenced domain slot does not exist or is terminated.
    InvalidDomain = 4,
    /// Operation is not legal in the subject's current lifecycle state.
    InvalidState = 5,
    /// A per-domain quota (handles, memory, threads) would be exceeded.
    QuotaExceeded = 6,
    /// Capability slot is empty, revoked, or fails the tag check.
    CapInvalid = 7,
    /// Syscall number is outside the dispatch window.
    NotSupported = 8,
}

impl Status {
    /// Returns the raw scalar carried in the return register.
    #[inline]
    pub const fn as_raw(self) -> u32 {
        self as u32
    }

    /// Decodes a raw scalar, mapping unknown values to `NotSupported`.
    pub const fn from_raw(raw: u32) -> Self {
        match raw {
            0 => Self::Success,
            1 => Self::InvalidParam,
            2 => Self::Permission,
            3 => Self::NoResource,
            4 => Self::InvalidDomain,
            5 => Self::InvalidState,
            6 => Self::QuotaExceeded,
            7 => Self::CapInvalid,
            _ => Self::NotSupported,
        }
    }

    /// True for `Success` only.
    #[inline]
    pub const fn is_success(self) -> bool {
        matches!(self, Self::Success)
    }
}

bitflags! {
    /// Rights carried by a capability.
    #[derive(Clone, Copy, PartialEq, Eq, Debug)]
    pub struct Rights: u32 {
        /// Read the referenced object.
        const READ = 1 << 0;
        /// Write the referenced object.
        const WRITE = 1 << 1;
        /// Execute from the referenced memory.
        const EXEC = 1 << 2;
        /// Pass the capability to another domain.
        const GRANT = 1 << 3;
        /// Revoke the capability and its derivatives.
        const REVOKE = 1 << 4;
        /// Access device registers behind the capability.
        const DEVICE = 1 << 5;
    }
}

bitflags! {
    /// Flag bits in the boot-info header.
    #[derive(Clone, Copy, PartialEq, Eq, Debug)]
    pub struct BootFlags: u32 {
        /// Firmware verified the kernel image.
        const SECURE_BOOT = 1 << 0;
        /// ACPI tables were discovered and handed over.
        const ACPI_ENABLED = 1 << 1;
        /// A linear framebuffer is available.
        const VIDEO_ENABLED = 1 << 2;
        /// Verbose diagnostics requested by firmware.
        const DEBUG_ENABLED = 1 << 3;
        /// Boot into the minimal recovery environment.
        const RECOVERY_MODE = 1 << 4;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_roundtrip() {
        for raw in 0..=8 {
            assert_eq!(Status::from_raw(raw).as_raw(), raw);
        }
    }

    #[test]
    fn unknown_status_maps_to_not_supported() {
        assert_eq!(Status::from_raw(99), Status::NotSupported);
    }

    #[test]
    fn rights_are_disjoint_bits() {
        let all = Rights::all();
        assert_eq!(all.bits().count_ones(), 6);
        assert!(all.contains(Rights::GRANT | Rights::REVOKE));
    }
}
