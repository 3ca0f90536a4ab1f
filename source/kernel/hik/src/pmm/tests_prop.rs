// Copyright 2026 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

#![cfg(test)]
//! CONTEXT: Property-based tests for the physical memory manager
//! OWNERS: @kernel-mm-team
//! NOTE: Tests only; no kernel logic.
//!
//! TEST_SCOPE:
//!   - alloc/free round trips restore stats bit-for-bit
//!   - allocations never overlap while live
//!   - free-list order independence: interleaved frees keep first-fit at the lowest address

use proptest::prelude::*;

use super::{FrameType, PhysicalMemory, PmmError, PmmStats, PAGE_SIZE};
use crate::types::{DomainId, PhysAddr};

const BASE: u64 = 0x10_0000;
const REGION_PAGES: u64 = 256;

fn fresh() -> (PhysicalMemory, PmmStats) {
    let mut pmm = PhysicalMemory::new();
    pmm.add_region(PhysAddr::new(BASE), REGION_PAGES * PAGE_SIZE as u64).expect("region");
    let stats = pmm.stats();
    (pmm, stats)
}

proptest! {
    #[test]
    fn alloc_then_free_is_identity(counts in proptest::collection::vec(1usize..32, 1..8)) {
        let (mut pmm, baseline) = fresh();
        let mut live = Vec::new();
        for count in counts {
            match pmm.alloc_frames(DomainId::from_raw(1), count, FrameType::Application) {
                Ok(base) => live.push((base, count)),
                Err(PmmError::NoResource) => {}
                Err(other) => prop_assert!(false, "unexpected error {:?}", other),
            }
        }
        for (base, count) in live.drain(..) {
            pmm.free_frames(base, count).unwrap();
        }
        prop_assert_eq!(pmm.stats(), baseline);
        prop_assert_eq!(pmm.owned_page_count(), 0);
    }

    #[test]
    fn live_allocations_never_overlap(counts in proptest::collection::vec(1usize..16, 2..10)) {
        let (mut pmm, _) = fresh();
        let mut live: Vec<(u64, u64)> = Vec::new();
        for count in counts {
            if let Ok(base) = pmm.alloc_frames(DomainId::from_raw(2), count, FrameType::Shared) {
                let start = base.raw();
                let end = start + (count * PAGE_SIZE) as u64;
                for &(s, e) in &live {
                    prop_assert!(end <= s || start >= e, "overlap [{start:#x},{end:#x}) with [{s:#x},{e:#x})");
                }
                live.push((start, end));
            }
        }
    }

    #[test]
    fn first_fit_reuses_the_lowest_hole(hole in 0usize..4) {
        let (mut pmm, _) = fresh();
        let mut runs = Vec::new();
        for _ in 0..4 {
            runs.push(pmm.alloc_frames(DomainId::from_raw(1), 4, FrameType::Core).unwrap());
        }
        pmm.free_frames(runs[hole], 4).unwrap();
        let again = pmm.alloc_frames(DomainId::from_raw(1), 4, FrameType::Core).unwrap();
        prop_assert_eq!(again, runs[hole]);
    }
}
