// Copyright 2026 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! CONTEXT: Parsed platform configuration consumed by the invariant monitor
//! OWNERS: @kernel-team
//! PUBLIC API: PlatformConfig, ConfigRegion, ConfigError
//! DEPENDS_ON: domain::MAX_DOMAINS
//! INVARIANTS: Validity and disjointness are pure predicates over an immutable record
//!
//! The YAML parser lives outside the arbiter; it hands over this record
//! fully decoded. The kernel only judges it: invariant 7 wants the record
//! valid and bounded, invariant 8 wants no two config-derived resources to
//! collide.

extern crate alloc;

use alloc::vec::Vec;

use crate::domain::MAX_DOMAINS;

/// Most regions any platform description may carry.
pub const MAX_CONFIG_REGIONS: usize = 32;

/// One platform memory region from the configuration blob.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConfigRegion {
    /// First byte of the region.
    pub base: u64,
    /// Region length in bytes.
    pub len: u64,
}

impl ConfigRegion {
    fn end(&self) -> Option<u64> {
        self.base.checked_add(self.len)
    }

    fn overlaps(&self, other: &ConfigRegion) -> bool {
        match (self.end(), other.end()) {
            (Some(self_end), Some(other_end)) => {
                self.base < other_end && other.base < self_end
            }
            // Wrapping regions collide with everything by definition.
            _ => true,
        }
    }
}

/// Why a configuration record was rejected.
#[must_use = "config errors must be handled explicitly"]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigError {
    /// Zero-length console window or region, or an address range that wraps.
    MalformedRegion,
    /// More regions than the fixed bound allows.
    TooManyRegions,
    /// Domain limit of zero or beyond the table size.
    BadDomainLimit,
    /// Two config-derived resources occupy overlapping addresses.
    Collision,
}

/// The decoded platform description.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlatformConfig {
    /// Console UART window base.
    pub console_base: u64,
    /// Console UART window length.
    pub console_len: u64,
    /// Platform RAM regions.
    pub regions: Vec<ConfigRegion>,
    /// Domain limit requested by the platform.
    pub max_domains: u32,
}

impl PlatformConfig {
    /// Invariant 7: the record is well-formed and bounded.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.console_len == 0 || self.console_base.checked_add(self.console_len).is_none() {
            return Err(ConfigError::MalformedRegion);
        }
        if self.regions.len() > MAX_CONFIG_REGIONS {
            return Err(ConfigError::TooManyRegions);
        }
        for region in &self.regions {
            if region.len == 0 || region.end().is_none() {
                return Err(ConfigError::MalformedRegion);
            }
        }
        if self.max_domains == 0 || self.max_domains as usize > MAX_DOMAINS {
            return Err(ConfigError::BadDomainLimit);
        }
        Ok(())
    }

    /// Invariant 8: no two config-derived resources collide.
    pub fn check_disjoint(&self) -> Result<(), ConfigError> {
        let console = ConfigRegion { base: self.console_base, len: self.console_len };
        for (index, region) in self.regions.iter().enumerate() {
            if console.overlaps(region) {
                return Err(ConfigError::Collision);
            }
            for other in &self.regions[index + 1..] {
                if region.overlaps(other) {
                    return Err(ConfigError::Collision);
                }
            }
        }
        Ok(())
    }
}
