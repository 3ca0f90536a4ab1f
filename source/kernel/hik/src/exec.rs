// Copyright 2026 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! CONTEXT: Current-domain execution state and domain switching
//! OWNERS: @kernel-team
//! PUBLIC API: ExecState (current/switch_to)
//! DEPENDS_ON: domain::DomainTable
//! INVARIANTS: Exactly one domain is current; switches only target active, unsuspended domains
//!
//! The application thread scheduler lives outside the arbiter; this module
//! only tracks which domain the single kernel execution context is acting
//! for, which is what syscall attribution and `IPC_CALL` switching need.

use crate::domain::{DomainError, DomainTable};
use crate::types::DomainId;

/// Execution state of the single kernel context on this CPU.
pub struct ExecState {
    current: DomainId,
}

impl ExecState {
    /// Boots with Core-0 current.
    pub const fn new() -> Self {
        Self { current: DomainId::CORE }
    }

    /// The domain the kernel is currently acting for.
    pub fn current(&self) -> DomainId {
        self.current
    }

    /// Transfers execution to `target`.
    ///
    /// The previous domain drops back to Ready; a suspended or terminated
    /// target fails the switch without touching either side.
    pub fn switch_to(
        &mut self,
        domains: &mut DomainTable,
        target: DomainId,
    ) -> Result<(), DomainError> {
        if !domains.is_active(target) {
            return Err(DomainError::InvalidDomain);
        }
        // mark_running refuses suspended targets.
        domains.mark_running(target)?;
        if self.current != target && domains.is_active(self.current) {
            let _ = domains.mark_ready(self.current);
        }
        self.current = target;
        Ok(())
    }
}

impl Default for ExecState {
    fn default() -> Self {
        Self::new()
    }
}
