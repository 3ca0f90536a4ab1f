// Copyright 2026 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! CONTEXT: Synchronisation primitives for the single-context kernel
//! OWNERS: @kernel-sync-team
//! PUBLIC API: critical::with_interrupts_disabled
//! DEPENDS_ON: arch interrupt mask primitives
//! INVARIANTS: Critical sections nest; prior interrupt state always restored

pub mod critical;
