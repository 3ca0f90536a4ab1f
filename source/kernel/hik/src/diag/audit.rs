// Copyright 2026 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! CONTEXT: Bounded audit-event ring consumed by the external log drain
//! OWNERS: @kernel-team
//! PUBLIC API: AuditLog, AuditEvent, AuditKind
//! DEPENDS_ON: types::DomainId, hik_abi::Status
//! INVARIANTS: Fixed power-of-two ring; recording never allocates; events carry a 4-word payload

extern crate alloc;

use alloc::vec::Vec;

use hik_abi::Status;

use crate::types::DomainId;

/// Event categories surfaced at the audit boundary.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuditKind {
    /// A domain slot transitioned Init -> Ready.
    DomainCreate,
    /// A syscall completed (payload word 0 carries the number).
    Syscall,
    /// The PMM handed out a contiguous run of frames.
    PmmAlloc,
    /// An architecture fault reached the kernel.
    Exception,
    /// The invariant monitor or a capability check flagged a violation.
    SecurityViolation,
}

/// One audit record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AuditEvent {
    /// Monotonic sequence number (wraps with the ring).
    pub seq: u64,
    /// Timestamp in nanoseconds from the HAL timer.
    pub timestamp_ns: u64,
    /// Domain the event is attributed to.
    pub domain: DomainId,
    /// Event category.
    pub kind: AuditKind,
    /// Status code the operation resolved to.
    pub status: Status,
    /// True when the operation succeeded.
    pub success: bool,
    /// Four free-form words, meaning fixed per kind.
    pub payload: [u64; 4],
}

impl AuditEvent {
    const fn empty() -> Self {
        Self {
            seq: 0,
            timestamp_ns: 0,
            domain: DomainId::INVALID,
            kind: AuditKind::Exception,
            status: Status::Success,
            success: false,
            payload: [0; 4],
        }
    }
}

// Power-of-two ring size for cheap masking. Large enough to span a full
// boot-to-failure window without overwriting the interesting tail.
const RING_SIZE: usize = 1024;
const RING_MASK: u64 = (RING_SIZE as u64) - 1;

/// In-memory audit ring. The external drain copies records out; the kernel
/// only ever appends.
pub struct AuditLog {
    ring: Vec<AuditEvent>,
    write_seq: u64,
}

impl AuditLog {
    /// Creates an empty ring.
    pub fn new() -> Self {
        let mut ring = Vec::with_capacity(RING_SIZE);
        for _ in 0..RING_SIZE {
            ring.push(AuditEvent::empty());
        }
        Self { ring, write_seq: 0 }
    }

    /// Appends one event, overwriting the oldest slot once the ring wraps.
    pub fn record(
        &mut self,
        timestamp_ns: u64,
        domain: DomainId,
        kind: AuditKind,
        status: Status,
        payload: [u64; 4],
    ) {
        let seq = self.write_seq;
        self.write_seq = self.write_seq.wrapping_add(1);
        let idx = (seq & RING_MASK) as usize;
        self.ring[idx] = AuditEvent {
            seq,
            timestamp_ns,
            domain,
            kind,
            status,
            success: status.is_success(),
            payload,
        };
    }

    /// Number of events recorded since boot (monotonic, not ring-bounded).
    pub fn recorded(&self) -> u64 {
        self.write_seq
    }

    /// Returns the most recent event, if any.
    pub fn last(&self) -> Option<&AuditEvent> {
        if self.write_seq == 0 {
            return None;
        }
        let idx = ((self.write_seq - 1) & RING_MASK) as usize;
        Some(&self.ring[idx])
    }

    /// Iterates over the retained window, oldest first.
    pub fn iter(&self) -> impl Iterator<Item = &AuditEvent> {
        let end = self.write_seq;
        let start = end.saturating_sub(RING_SIZE as u64);
        (start..end).map(move |seq| &self.ring[(seq & RING_MASK) as usize])
    }
}

impl Default for AuditLog {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn records_are_retained_in_order() {
        let mut log = AuditLog::new();
        log.record(10, DomainId::CORE, AuditKind::DomainCreate, Status::Success, [0; 4]);
        log.record(
            20,
            DomainId::from_raw(1),
            AuditKind::Syscall,
            Status::Permission,
            [2, 0, 0, 0],
        );
        assert_eq!(log.recorded(), 2);
        let last = log.last().unwrap();
        assert_eq!(last.kind, AuditKind::Syscall);
        assert!(!last.success);
        assert_eq!(last.payload[0], 2);
    }

    #[test]
    fn ring_wraps_without_growing() {
        let mut log = AuditLog::new();
        for i in 0..(RING_SIZE as u64 + 10) {
            log.record(i, DomainId::CORE, AuditKind::PmmAlloc, Status::Success, [i, 0, 0, 0]);
        }
        assert_eq!(log.recorded(), RING_SIZE as u64 + 10);
        assert_eq!(log.iter().count(), RING_SIZE);
        // Oldest retained record is the one that displaced slot 10.
        assert_eq!(log.iter().next().unwrap().payload[0], 10);
    }
}
