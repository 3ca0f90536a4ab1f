// Copyright 2026 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

#![cfg(test)]
//! CONTEXT: Property-based tests for the global capability table
//! OWNERS: @kernel-cap-team
//! NOTE: Tests only; no kernel logic.
//!
//! TEST_SCOPE:
//!   - Rights derivation: subset-only, no escalation through any chain
//!   - Revocation: a revoked root leaves zero live descendants
//!   - Handle tokens: resolution survives unrelated table churn

use proptest::prelude::*;

use super::{CapError, CapSpace, CapTable, Rights};
use crate::types::{DomainId, PhysAddr};

const OWNER: DomainId = DomainId::from_raw(1);

fn arb_rights() -> impl Strategy<Value = Rights> {
    (0u32..64).prop_map(Rights::from_bits_truncate)
}

proptest! {
    #[test]
    fn derived_chains_never_escalate(
        root_rights in arb_rights(),
        masks in proptest::collection::vec(arb_rights(), 1..6),
    ) {
        let mut caps = CapTable::with_capacity(64);
        let root = caps
            .create_memory(OWNER, PhysAddr::new(0x1000), 0x1000, root_rights)
            .unwrap();
        let mut current = root;
        let mut current_rights = root_rights;
        for mask in masks {
            let sub = current_rights & mask;
            match caps.derive(OWNER, current, sub) {
                Ok(child) => {
                    let info = caps.get_info(child).unwrap();
                    prop_assert!(current_rights.contains(info.rights));
                    current = child;
                    current_rights = info.rights;
                }
                Err(err) => prop_assert_eq!(err, CapError::Permission),
            }
            // Requesting anything beyond the current rights must fail.
            let beyond = !current_rights & Rights::all();
            if !beyond.is_empty() {
                prop_assert_eq!(
                    caps.derive(OWNER, current, current_rights | beyond),
                    Err(CapError::Permission)
                );
            }
        }
    }

    #[test]
    fn revoking_the_root_kills_every_descendant(
        fanout in proptest::collection::vec(0usize..4, 1..12),
    ) {
        let mut caps = CapTable::with_capacity(256);
        let root = caps
            .create_memory(OWNER, PhysAddr::new(0x1000), 0x1000, Rights::READ | Rights::WRITE)
            .unwrap();
        let mut nodes = vec![root];
        for parent_pick in fanout {
            let parent = nodes[parent_pick % nodes.len()];
            if let Ok(child) = caps.derive(OWNER, parent, Rights::READ) {
                nodes.push(child);
            }
        }
        let revoked = caps.revoke(root).unwrap();
        prop_assert_eq!(revoked as usize, nodes.len());
        for node in nodes {
            prop_assert!(!caps.is_live(node));
            prop_assert!(caps.get_info(node).unwrap().revoked);
        }
    }

    #[test]
    fn handle_resolution_survives_unrelated_churn(churn in 1usize..16) {
        let mut caps = CapTable::with_capacity(128);
        let mut space = CapSpace::with_capacity(8);
        let kept = caps
            .create_memory(OWNER, PhysAddr::new(0x1000), 0x1000, Rights::READ)
            .unwrap();
        let slot = space.insert(&caps, kept).unwrap();
        for index in 0..churn {
            let other = caps
                .create_memory(
                    OWNER,
                    PhysAddr::new(0x10_0000 + index as u64 * 0x1000),
                    0x1000,
                    Rights::READ,
                )
                .unwrap();
            caps.revoke(other).unwrap();
        }
        prop_assert_eq!(space.resolve(&caps, slot), Ok(kept));
    }
}
