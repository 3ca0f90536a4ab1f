// Copyright 2026 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! CONTEXT: Syscall handlers exposed to the dispatcher
//! OWNERS: @kernel-team
//! PUBLIC API: install_handlers(table), Context
//! DEPENDS_ON: cap, domain, exec, ipc, hal::Timer
//! INVARIANTS: Decode -> Check -> Execute discipline; out-parameters written only on the
//!             success path; handle slots are resolved through token-checked lookups

extern crate alloc;

use alloc::vec::Vec;

use crate::cap::{CapKind, CapTable, Rights};
use crate::domain::DomainTable;
use crate::exec::ExecState;
use crate::hal::Timer;
use crate::ipc::{CallBroker, PendingCall};
use crate::irq::IrqRouter;
use crate::types::{CapId, DomainId};

use super::{
    Args, Error, SysResult, SyscallTable, SYSCALL_CAP_DERIVE, SYSCALL_CAP_REVOKE,
    SYSCALL_CAP_TRANSFER, SYSCALL_IPC_CALL,
};

/// Borrowed kernel subsystems a handler may touch.
pub struct Context<'a> {
    /// Global capability table.
    pub caps: &'a mut CapTable,
    /// Domain table.
    pub domains: &'a mut DomainTable,
    /// Synchronous-call bookkeeping.
    pub calls: &'a mut CallBroker,
    /// Interrupt routing table (read-mostly; revocation tears routes down).
    pub irq: &'a IrqRouter,
    /// Current-domain tracking.
    pub exec: &'a mut ExecState,
    /// HAL timer for timestamps.
    pub timer: &'a dyn Timer,
}

/// Registers every syscall handler.
pub fn install_handlers(table: &mut SyscallTable) {
    table.register(SYSCALL_IPC_CALL, sys_ipc_call);
    table.register(SYSCALL_CAP_TRANSFER, sys_cap_transfer);
    table.register(SYSCALL_CAP_DERIVE, sys_cap_derive);
    table.register(SYSCALL_CAP_REVOKE, sys_cap_revoke);
}

// Writes a success out-parameter. Never called before the last fallible step.
fn write_user_usize(ptr: usize, value: usize) -> SysResult<()> {
    if ptr == 0 || ptr % core::mem::align_of::<usize>() != 0 {
        return Err(Error::InvalidParam);
    }
    // SAFETY: alignment and null checked above; the pointer was supplied by
    // the caller as a writable out-parameter in its own region.
    unsafe {
        core::ptr::write_volatile(ptr as *mut usize, value);
    }
    Ok(())
}

#[derive(Copy, Clone)]
struct IpcCallTyped {
    slot: usize,
    msg_buffer: usize,
    reply_buffer: usize,
}

impl IpcCallTyped {
    #[inline]
    fn decode(args: &Args) -> Self {
        Self { slot: args.get(0), msg_buffer: args.get(1), reply_buffer: args.get(2) }
    }

    #[inline]
    fn check(&self) -> SysResult<()> {
        if self.msg_buffer == 0 || self.reply_buffer == 0 {
            return Err(Error::InvalidParam);
        }
        Ok(())
    }
}

// IPC_CALL: verify the endpoint cap, stage the blocked call, switch to the
// callee. Synchronous from the caller's view; control returns when the
// callee replies or the endpoint is revoked.
fn sys_ipc_call(ctx: &mut Context<'_>, args: &Args) -> SysResult<usize> {
    let typed = IpcCallTyped::decode(args);
    typed.check()?;

    let caller = ctx.exec.current();
    let cap = ctx.domains.resolve_handle(ctx.caps, caller, typed.slot)?;
    ctx.caps.check_access(caller, cap, Rights::empty())?;
    let target = match ctx.caps.get_info(cap)?.kind {
        CapKind::Endpoint { target, .. } => target,
        _ => return Err(Error::InvalidParam),
    };
    if target == caller {
        return Err(Error::InvalidParam);
    }

    ctx.calls.begin_call(PendingCall {
        caller,
        callee: target,
        endpoint: cap,
        msg_buffer: typed.msg_buffer,
        reply_buffer: typed.reply_buffer,
        since_ns: ctx.timer.now_ns(),
    })?;
    if let Err(err) = ctx.exec.switch_to(ctx.domains, target) {
        // The switch failed; the caller must not stay blocked.
        let _ = ctx.calls.complete_call(caller);
        return Err(err.into());
    }
    Ok(0)
}

#[derive(Copy, Clone)]
struct CapTransferTyped {
    dest: DomainId,
    slot: usize,
}

impl CapTransferTyped {
    #[inline]
    fn decode(args: &Args) -> Self {
        Self { dest: DomainId::from_raw(args.get(0) as u16), slot: args.get(1) }
    }
}

fn sys_cap_transfer(ctx: &mut Context<'_>, args: &Args) -> SysResult<usize> {
    let typed = CapTransferTyped::decode(args);
    let caller = ctx.exec.current();
    let cap = ctx.domains.resolve_handle(ctx.caps, caller, typed.slot)?;
    let slot = ctx.domains.transfer_cap(ctx.caps, caller, typed.dest, cap)?;
    Ok(slot)
}

#[derive(Copy, Clone)]
struct CapDeriveTyped {
    slot: usize,
    sub: Rights,
    out_slot: usize,
}

impl CapDeriveTyped {
    #[inline]
    fn decode(args: &Args) -> SysResult<Self> {
        let sub = Rights::from_bits(args.get(1) as u32).ok_or(Error::InvalidParam)?;
        Ok(Self { slot: args.get(0), sub, out_slot: args.get(2) })
    }

    #[inline]
    fn check(&self) -> SysResult<()> {
        if self.out_slot == 0 {
            return Err(Error::InvalidParam);
        }
        Ok(())
    }
}

fn sys_cap_derive(ctx: &mut Context<'_>, args: &Args) -> SysResult<usize> {
    let typed = CapDeriveTyped::decode(args)?;
    typed.check()?;

    let caller = ctx.exec.current();
    let parent = ctx.domains.resolve_handle(ctx.caps, caller, typed.slot)?;
    // The handle array must have room before the child entry exists, so a
    // quota failure never leaves an orphaned entry behind.
    if ctx.domains.count_free_handles(caller) == 0 {
        return Err(Error::Domain(crate::domain::DomainError::QuotaExceeded));
    }
    let child = ctx.caps.derive(caller, parent, typed.sub)?;
    let slot = ctx.domains.adopt_cap(ctx.caps, caller, child)?;
    write_user_usize(typed.out_slot, slot)?;
    Ok(slot)
}

fn sys_cap_revoke(ctx: &mut Context<'_>, args: &Args) -> SysResult<usize> {
    let caller = ctx.exec.current();
    let cap = ctx.domains.resolve_handle(ctx.caps, caller, args.get(0))?;
    ctx.caps.check_access(caller, cap, Rights::REVOKE)?;

    let mut touched: Vec<(CapId, DomainId)> = Vec::new();
    let count = ctx.caps.revoke_with(cap, |id, owner| touched.push((id, owner)))?;
    for (id, owner) in touched {
        ctx.domains.note_revoked(owner, id);
        // Revoking an endpoint is the only path that unblocks its callers,
        // and a dead endpoint must not keep an interrupt route initialized.
        if let Ok(info) = ctx.caps.get_info(id) {
            if matches!(info.kind, CapKind::Endpoint { .. }) {
                ctx.calls.cancel_endpoint(id);
            }
        }
        ctx.irq.drop_routes_for(id);
    }
    Ok(count as usize)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::diag::audit::{AuditKind, AuditLog};
    use crate::domain::{DomainError, DomainType, Quota};
    use crate::hal::mock::MockMachine;
    use crate::pmm::PhysicalMemory;
    use crate::syscall::{syscall_handler, Status};
    use crate::types::PhysAddr;

    struct Fixture {
        caps: CapTable,
        domains: DomainTable,
        calls: CallBroker,
        irq: IrqRouter,
        exec: ExecState,
        hal: MockMachine,
        table: SyscallTable,
        audit: AuditLog,
    }

    fn quota() -> Quota {
        Quota { max_memory: 0x2_0000, max_threads: 4, max_caps: 16, cpu_quota_percent: 10 }
    }

    fn fixture() -> (Fixture, DomainId, DomainId) {
        let mut pmm = PhysicalMemory::new();
        pmm.add_region(PhysAddr::new(0x10_0000), 0x100_0000).expect("region");
        let mut domains = DomainTable::new();
        let core = domains
            .create(&mut pmm, DomainType::Core, DomainId::INVALID, &quota())
            .expect("core");
        let service = domains
            .create(&mut pmm, DomainType::Privileged, core, &quota())
            .expect("service");
        let mut table = SyscallTable::new();
        install_handlers(&mut table);
        let fixture = Fixture {
            caps: CapTable::with_capacity(64),
            domains,
            calls: CallBroker::new(),
            irq: IrqRouter::new(),
            exec: ExecState::new(),
            hal: MockMachine::new(),
            table,
            audit: AuditLog::new(),
        };
        (fixture, core, service)
    }

    fn run(fixture: &mut Fixture, number: usize, args: [usize; 4]) -> Status {
        let Fixture { caps, domains, calls, irq, exec, hal, table, audit } = fixture;
        let mut ctx = Context { caps, domains, calls, irq, exec, timer: &*hal };
        syscall_handler(table, &mut ctx, audit, number, &Args::new(args))
    }

    #[test]
    fn unknown_numbers_return_not_supported_and_audit() {
        let (mut fx, core, _) = fixture();
        let status = run(&mut fx, 7, [0; 4]);
        assert_eq!(status, Status::NotSupported);
        let event = *fx.audit.last().unwrap();
        assert_eq!(event.kind, AuditKind::Syscall);
        assert_eq!(event.domain, core);
        assert_eq!(event.payload[0], 7);
        assert!(!event.success);
    }

    #[test]
    fn ipc_call_switches_to_the_endpoint_target() {
        let (mut fx, core, service) = fixture();
        let endpoint = fx.caps.create_endpoint(core, service, 1, Rights::READ | Rights::WRITE).unwrap();
        let slot = fx.domains.adopt_cap(&fx.caps, core, endpoint).unwrap();

        let mut msg = 0u64;
        let mut reply = 0u64;
        let status = run(
            &mut fx,
            SYSCALL_IPC_CALL,
            [slot, &mut msg as *mut u64 as usize, &mut reply as *mut u64 as usize, 0],
        );
        assert_eq!(status, Status::Success);
        assert_eq!(fx.exec.current(), service);
        let pending = fx.calls.pending(core).unwrap();
        assert_eq!(pending.callee, service);
        assert_eq!(pending.endpoint, endpoint);
    }

    #[test]
    fn ipc_call_with_null_buffers_is_invalid() {
        let (mut fx, core, service) = fixture();
        let endpoint = fx.caps.create_endpoint(core, service, 1, Rights::READ | Rights::WRITE).unwrap();
        let slot = fx.domains.adopt_cap(&fx.caps, core, endpoint).unwrap();
        assert_eq!(run(&mut fx, SYSCALL_IPC_CALL, [slot, 0, 0, 0]), Status::InvalidParam);
        assert!(fx.calls.pending(core).is_none());
    }

    #[test]
    fn ipc_call_through_a_revoked_endpoint_is_cap_invalid() {
        let (mut fx, core, service) = fixture();
        let endpoint = fx.caps.create_endpoint(core, service, 1, Rights::READ | Rights::WRITE).unwrap();
        let slot = fx.domains.adopt_cap(&fx.caps, core, endpoint).unwrap();
        fx.caps.revoke(endpoint).unwrap();
        let mut buf = 0u64;
        let status = run(
            &mut fx,
            SYSCALL_IPC_CALL,
            [slot, &mut buf as *mut u64 as usize, &mut buf as *mut u64 as usize, 0],
        );
        assert_eq!(status, Status::CapInvalid);
        assert_eq!(fx.exec.current(), core);
    }

    #[test]
    fn ipc_call_to_a_suspended_target_unwinds_the_block() {
        let (mut fx, core, service) = fixture();
        let endpoint = fx.caps.create_endpoint(core, service, 1, Rights::READ | Rights::WRITE).unwrap();
        let slot = fx.domains.adopt_cap(&fx.caps, core, endpoint).unwrap();
        fx.domains.mark_running(service).unwrap();
        fx.domains.suspend(service).unwrap();

        let mut buf = 0u64;
        let status = run(
            &mut fx,
            SYSCALL_IPC_CALL,
            [slot, &mut buf as *mut u64 as usize, &mut buf as *mut u64 as usize, 0],
        );
        assert_eq!(status, Status::InvalidState);
        assert!(fx.calls.pending(core).is_none());
        assert_eq!(fx.exec.current(), core);
    }

    #[test]
    fn cap_transfer_moves_the_handle() {
        let (mut fx, core, service) = fixture();
        let cap = fx
            .caps
            .create_memory(core, PhysAddr::new(0x9000_0000), 0x1000, Rights::READ | Rights::GRANT)
            .unwrap();
        let slot = fx.domains.adopt_cap(&fx.caps, core, cap).unwrap();

        let status = run(&mut fx, SYSCALL_CAP_TRANSFER, [service.raw() as usize, slot, 0, 0]);
        assert_eq!(status, Status::Success);
        assert_eq!(fx.caps.get_info(cap).unwrap().owner, service);
        assert_eq!(fx.domains.count_capabilities(&fx.caps, core), 0);
        assert_eq!(fx.domains.count_capabilities(&fx.caps, service), 1);
    }

    #[test]
    fn cap_derive_returns_the_new_slot_through_the_out_pointer() {
        let (mut fx, core, _) = fixture();
        let cap = fx
            .caps
            .create_memory(core, PhysAddr::new(0x9000_0000), 0x1000, Rights::READ | Rights::WRITE)
            .unwrap();
        let slot = fx.domains.adopt_cap(&fx.caps, core, cap).unwrap();

        let mut out: usize = usize::MAX;
        let status = run(
            &mut fx,
            SYSCALL_CAP_DERIVE,
            [slot, Rights::READ.bits() as usize, &mut out as *mut usize as usize, 0],
        );
        assert_eq!(status, Status::Success);
        let child = fx.domains.resolve_handle(&fx.caps, core, out).unwrap();
        let info = fx.caps.get_info(child).unwrap();
        assert_eq!(info.rights, Rights::READ);
        assert_eq!(info.parent, Some(cap));
    }

    #[test]
    fn cap_derive_escalation_is_permission_denied() {
        let (mut fx, core, _) = fixture();
        let cap = fx
            .caps
            .create_memory(core, PhysAddr::new(0x9000_0000), 0x1000, Rights::READ)
            .unwrap();
        let slot = fx.domains.adopt_cap(&fx.caps, core, cap).unwrap();
        let mut out: usize = 0;
        let status = run(
            &mut fx,
            SYSCALL_CAP_DERIVE,
            [
                slot,
                (Rights::READ | Rights::WRITE).bits() as usize,
                &mut out as *mut usize as usize,
                0,
            ],
        );
        assert_eq!(status, Status::Permission);
        // The out-parameter stays untouched on failure.
        assert_eq!(out, 0);
    }

    #[test]
    fn cap_revoke_cascades_and_counts_held_handles_only() {
        let (mut fx, core, _) = fixture();
        let parent = fx
            .caps
            .create_memory(core, PhysAddr::new(0x9000_0000), 0x1000, Rights::READ | Rights::REVOKE)
            .unwrap();
        let parent_slot = fx.domains.adopt_cap(&fx.caps, core, parent).unwrap();
        let child = fx.caps.derive(core, parent, Rights::READ).unwrap();

        let status = run(&mut fx, SYSCALL_CAP_REVOKE, [parent_slot, 0, 0, 0]);
        assert_eq!(status, Status::Success);
        assert!(!fx.caps.is_live(parent));
        assert!(!fx.caps.is_live(child));
        // Only the handle actually held in the space counts as revoked.
        assert_eq!(fx.domains.revoked(core), 1);
    }

    #[test]
    fn revoking_an_endpoint_unblocks_callers_and_drops_routes() {
        let (mut fx, core, service) = fixture();
        let endpoint = fx
            .caps
            .create_endpoint(core, service, 1, Rights::READ | Rights::WRITE | Rights::REVOKE)
            .unwrap();
        let slot = fx.domains.adopt_cap(&fx.caps, core, endpoint).unwrap();

        // Another domain is parked on a call through this endpoint.
        fx.calls
            .begin_call(crate::ipc::PendingCall {
                caller: service,
                callee: core,
                endpoint,
                msg_buffer: 0x1000,
                reply_buffer: 0x2000,
                since_ns: 0,
            })
            .unwrap();
        // And an interrupt route claims the same endpoint.
        extern "C" fn noop(_vector: u8) {}
        fx.irq
            .register_handler(
                &fx.caps,
                crate::types::IrqVector::from_raw(40),
                core,
                noop as usize,
                endpoint,
                crate::irq::RouteFlags::EDGE,
            )
            .unwrap();

        let status = run(&mut fx, SYSCALL_CAP_REVOKE, [slot, 0, 0, 0]);
        assert_eq!(status, Status::Success);
        assert!(fx.calls.pending(service).is_none());
        assert!(!fx.irq.route_info(crate::types::IrqVector::from_raw(40)).initialized);
    }

    #[test]
    fn revoking_without_the_revoke_right_is_refused() {
        let (mut fx, core, _) = fixture();
        let cap = fx
            .caps
            .create_memory(core, PhysAddr::new(0x9000_0000), 0x1000, Rights::READ)
            .unwrap();
        let slot = fx.domains.adopt_cap(&fx.caps, core, cap).unwrap();
        assert_eq!(run(&mut fx, SYSCALL_CAP_REVOKE, [slot, 0, 0, 0]), Status::Permission);
        assert!(fx.caps.is_live(cap));
    }

    #[test]
    fn stale_handle_slots_resolve_to_cap_invalid() {
        let (mut fx, core, _) = fixture();
        let cap = fx
            .caps
            .create_memory(core, PhysAddr::new(0x9000_0000), 0x1000, Rights::READ | Rights::REVOKE)
            .unwrap();
        let slot = fx.domains.adopt_cap(&fx.caps, core, cap).unwrap();
        fx.caps.revoke(cap).unwrap();
        assert_eq!(run(&mut fx, SYSCALL_CAP_REVOKE, [slot, 0, 0, 0]), Status::CapInvalid);
    }

    #[test]
    fn quota_exhaustion_blocks_derivation_before_minting() {
        let (mut fx, core, _) = fixture();
        let first = fx
            .caps
            .create_memory(core, PhysAddr::new(0x9000_0000), 0x1000, Rights::READ | Rights::WRITE)
            .unwrap();
        let slot = fx.domains.adopt_cap(&fx.caps, core, first).unwrap();
        // Exhaust the 16-slot handle array.
        for index in 1..16u64 {
            let cap = fx
                .caps
                .create_memory(core, PhysAddr::new(0x9000_0000 + index * 0x1000), 0x1000, Rights::READ)
                .unwrap();
            fx.domains.adopt_cap(&fx.caps, core, cap).unwrap();
        }
        assert_eq!(
            fx.domains.adopt_cap(&fx.caps, core, first).unwrap_err(),
            DomainError::QuotaExceeded
        );
        let mut out: usize = 0;
        let status = run(
            &mut fx,
            SYSCALL_CAP_DERIVE,
            [slot, Rights::READ.bits() as usize, &mut out as *mut usize as usize, 0],
        );
        assert_eq!(status, Status::QuotaExceeded);
    }
}
