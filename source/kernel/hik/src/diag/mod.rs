// Copyright 2026 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! CONTEXT: Diagnostics facilities shared across the kernel
//! OWNERS: @kernel-team
//! PUBLIC API: log (macros + emit), audit (event ring)
//! DEPENDS_ON: uart
//! INVARIANTS: No allocation on emission paths; bounded audit storage

pub mod audit;
#[macro_use]
pub mod log;
