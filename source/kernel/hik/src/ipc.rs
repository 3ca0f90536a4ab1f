// Copyright 2026 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! CONTEXT: Synchronous call bookkeeping behind IPC_CALL
//! OWNERS: @kernel-ipc-team
//! PUBLIC API: CallBroker (begin_call/complete_call/cancel_endpoint), PendingCall, IpcError
//! DEPENDS_ON: monitor::graph::WaitGraph, types::{CapId, DomainId, ThreadId}
//! INVARIANTS: One pending call per caller; every pending call has a matching wait edge;
//!             buffers are opaque addresses, never dereferenced here

extern crate alloc;

use alloc::vec::Vec;

use crate::domain::MAX_DOMAINS;
use crate::monitor::graph::WaitGraph;
use crate::types::{CapId, DomainId, ThreadId};

/// Errors produced by call bookkeeping.
#[must_use = "IPC errors must be handled explicitly"]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IpcError {
    /// The caller already has a call in flight.
    AlreadyWaiting,
    /// No call is pending for the domain.
    NoPendingCall,
}

/// One synchronous call in flight.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PendingCall {
    /// Blocked caller.
    pub caller: DomainId,
    /// Domain servicing the call.
    pub callee: DomainId,
    /// Endpoint capability the call went through.
    pub endpoint: CapId,
    /// Caller-supplied message buffer address (opaque to the kernel core).
    pub msg_buffer: usize,
    /// Caller-supplied reply buffer address (opaque to the kernel core).
    pub reply_buffer: usize,
    /// Timestamp the call was staged.
    pub since_ns: u64,
}

/// Tracks blocked callers and feeds the deadlock graph.
pub struct CallBroker {
    calls: Vec<Option<PendingCall>>,
    graph: WaitGraph,
}

impl CallBroker {
    /// Creates a broker with one call slot per domain.
    pub fn new() -> Self {
        let mut calls = Vec::with_capacity(MAX_DOMAINS);
        for _ in 0..MAX_DOMAINS {
            calls.push(None);
        }
        Self { calls, graph: WaitGraph::new() }
    }

    /// Stages a call and blocks the caller on the callee.
    ///
    /// Cancellation is not supported: the edge stays until the callee
    /// replies or the endpoint is revoked.
    pub fn begin_call(&mut self, call: PendingCall) -> Result<(), IpcError> {
        let slot = call.caller.as_index();
        if self.calls[slot].is_some() {
            return Err(IpcError::AlreadyWaiting);
        }
        self.graph.add_edge(
            ThreadId::representative(call.caller),
            ThreadId::representative(call.callee),
            call.since_ns,
        );
        self.calls[slot] = Some(call);
        Ok(())
    }

    /// Completes the pending call of `caller`, unblocking it.
    pub fn complete_call(&mut self, caller: DomainId) -> Result<PendingCall, IpcError> {
        let slot = caller.as_index();
        let call = self.calls[slot].take().ok_or(IpcError::NoPendingCall)?;
        self.graph.clear_waiter(ThreadId::representative(caller));
        Ok(call)
    }

    /// Drops every call staged through `endpoint`. Returns how many callers
    /// were unblocked; this is the revocation unblock path.
    pub fn cancel_endpoint(&mut self, endpoint: CapId) -> u32 {
        let mut cancelled = 0;
        for slot in 0..self.calls.len() {
            let matches = self.calls[slot].is_some_and(|call| call.endpoint == endpoint);
            if matches {
                if let Some(call) = self.calls[slot].take() {
                    self.graph.clear_waiter(ThreadId::representative(call.caller));
                    cancelled += 1;
                }
            }
        }
        cancelled
    }

    /// Returns the call currently blocking `caller`, if any.
    pub fn pending(&self, caller: DomainId) -> Option<&PendingCall> {
        self.calls.get(caller.as_index()).and_then(|slot| slot.as_ref())
    }

    /// Read access for the invariant monitor.
    pub fn graph(&self) -> &WaitGraph {
        &self.graph
    }
}

impl Default for CallBroker {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn call(caller: u16, callee: u16, endpoint: u32) -> PendingCall {
        PendingCall {
            caller: DomainId::from_raw(caller),
            callee: DomainId::from_raw(callee),
            endpoint: CapId::from_raw(endpoint),
            msg_buffer: 0x1000,
            reply_buffer: 0x2000,
            since_ns: 0,
        }
    }

    #[test]
    fn one_call_in_flight_per_caller() {
        let mut broker = CallBroker::new();
        broker.begin_call(call(1, 2, 7)).unwrap();
        assert_eq!(broker.begin_call(call(1, 3, 8)), Err(IpcError::AlreadyWaiting));
    }

    #[test]
    fn complete_clears_the_wait_edge() {
        let mut broker = CallBroker::new();
        broker.begin_call(call(1, 2, 7)).unwrap();
        assert!(broker.graph().edge(ThreadId::from_raw(1)).is_some());
        let done = broker.complete_call(DomainId::from_raw(1)).unwrap();
        assert_eq!(done.endpoint, CapId::from_raw(7));
        assert!(broker.graph().edge(ThreadId::from_raw(1)).is_none());
        assert_eq!(
            broker.complete_call(DomainId::from_raw(1)),
            Err(IpcError::NoPendingCall)
        );
    }

    #[test]
    fn endpoint_revocation_unblocks_every_caller() {
        let mut broker = CallBroker::new();
        broker.begin_call(call(1, 5, 7)).unwrap();
        broker.begin_call(call(2, 5, 7)).unwrap();
        broker.begin_call(call(3, 5, 9)).unwrap();
        assert_eq!(broker.cancel_endpoint(CapId::from_raw(7)), 2);
        assert!(broker.pending(DomainId::from_raw(1)).is_none());
        assert!(broker.pending(DomainId::from_raw(3)).is_some());
    }
}
