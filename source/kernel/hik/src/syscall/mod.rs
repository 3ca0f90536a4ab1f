// Copyright 2026 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! CONTEXT: Syscall dispatcher and error handling
//! OWNERS: @kernel-team
//! PUBLIC API: SyscallTable, Args, Error, Handler, syscall_handler
//! DEPENDS_ON: cap, domain, ipc, irq, syscall::api, diag::audit
//! INVARIANTS: Fixed MAX_SYSCALL window; stable IDs; scalar status is the only result register;
//!             every call leaves exactly one audit record

pub mod api;

use core::fmt;

use crate::cap::CapError;
use crate::diag::audit::{AuditKind, AuditLog};
use crate::domain::DomainError;
use crate::hal::Timer as _;
use crate::ipc::IpcError;
use crate::irq::IrqError;
use crate::pmm::PmmError;

pub use hik_abi::{
    Status, SYSCALL_CAP_DERIVE, SYSCALL_CAP_REVOKE, SYSCALL_CAP_TRANSFER, SYSCALL_IPC_CALL,
};

/// Maximum number of syscalls supported by this increment.
const MAX_SYSCALL: usize = 8;

/// Result type used by syscall handlers.
pub type SysResult<T> = Result<T, Error>;

/// Syscall arguments passed in registers a1-a4.
#[derive(Default, Clone, Copy)]
pub struct Args {
    regs: [usize; 4],
}

impl Args {
    /// Creates a new argument pack from the provided registers.
    pub const fn new(regs: [usize; 4]) -> Self {
        Self { regs }
    }

    /// Returns the raw register at `index`.
    pub fn get(&self, index: usize) -> usize {
        self.regs[index]
    }
}

/// Error returned by the dispatcher and handler stack.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Error {
    /// Syscall number not present in the dispatch table.
    InvalidSyscall,
    /// Argument failed validation before reaching a subsystem.
    InvalidParam,
    /// Capability operation failed.
    Cap(CapError),
    /// Domain-table operation failed.
    Domain(DomainError),
    /// Call bookkeeping failed.
    Ipc(IpcError),
    /// Interrupt routing failed.
    Irq(IrqError),
}

impl From<CapError> for Error {
    fn from(value: CapError) -> Self {
        Self::Cap(value)
    }
}

impl From<DomainError> for Error {
    fn from(value: DomainError) -> Self {
        Self::Domain(value)
    }
}

impl From<IpcError> for Error {
    fn from(value: IpcError) -> Self {
        Self::Ipc(value)
    }
}

impl From<IrqError> for Error {
    fn from(value: IrqError) -> Self {
        Self::Irq(value)
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self)
    }
}

fn cap_status(err: CapError) -> Status {
    match err {
        CapError::InvalidParam => Status::InvalidParam,
        CapError::Permission => Status::Permission,
        CapError::CapInvalid => Status::CapInvalid,
        CapError::NoResource => Status::NoResource,
    }
}

fn domain_status(err: DomainError) -> Status {
    match err {
        DomainError::InvalidParam => Status::InvalidParam,
        DomainError::InvalidDomain => Status::InvalidDomain,
        DomainError::InvalidState => Status::InvalidState,
        DomainError::QuotaExceeded => Status::QuotaExceeded,
        DomainError::NoResource => Status::NoResource,
        DomainError::Cap(err) => cap_status(err),
        DomainError::Pmm(PmmError::InvalidParam) => Status::InvalidParam,
        DomainError::Pmm(_) => Status::NoResource,
    }
}

impl Error {
    /// Collapses the error tree onto the scalar boundary code.
    pub fn status(&self) -> Status {
        match self {
            Error::InvalidSyscall => Status::NotSupported,
            Error::InvalidParam => Status::InvalidParam,
            Error::Cap(err) => cap_status(*err),
            Error::Domain(err) => domain_status(*err),
            Error::Ipc(_) => Status::InvalidState,
            Error::Irq(IrqError::InvalidParam) => Status::InvalidParam,
            Error::Irq(IrqError::NotRouted) => Status::InvalidParam,
            Error::Irq(IrqError::Permission) => Status::Permission,
            Error::Irq(IrqError::CapInvalid) => Status::CapInvalid,
        }
    }
}

/// Type alias for a syscall handler.
pub type Handler = fn(&mut api::Context<'_>, &Args) -> SysResult<usize>;

/// Dispatch table storing handlers by syscall number.
pub struct SyscallTable {
    handlers: [Option<Handler>; MAX_SYSCALL],
}

impl SyscallTable {
    /// Creates an empty dispatch table.
    pub const fn new() -> Self {
        const NONE: Option<Handler> = None;
        Self { handlers: [NONE; MAX_SYSCALL] }
    }

    /// Registers a handler.
    pub fn register(&mut self, number: usize, handler: Handler) {
        if number < MAX_SYSCALL {
            self.handlers[number] = Some(handler);
        }
    }

    /// Executes the handler referenced by `number`.
    #[must_use]
    pub fn dispatch(
        &self,
        number: usize,
        ctx: &mut api::Context<'_>,
        args: &Args,
    ) -> SysResult<usize> {
        self.handlers
            .get(number)
            .and_then(|entry| *entry)
            .ok_or(Error::InvalidSyscall)
            .and_then(|handler| handler(ctx, args))
    }
}

impl Default for SyscallTable {
    fn default() -> Self {
        Self::new()
    }
}

/// The sole entry point from lesser-privileged domains.
///
/// Derives the caller before dispatch (the handler may switch domains),
/// returns the scalar status for the architecture return register, and
/// leaves one audit record per call. Unknown numbers audit the attempted
/// number with `NotSupported`.
pub fn syscall_handler(
    table: &SyscallTable,
    ctx: &mut api::Context<'_>,
    audit: &mut AuditLog,
    number: usize,
    args: &Args,
) -> Status {
    let caller = ctx.exec.current();
    let now = ctx.timer.now_ns();

    // Handlers mutate the shared tables; interrupts stay masked for the
    // duration so dispatchers on this CPU never observe a half-applied op.
    let result =
        crate::sync::critical::with_interrupts_disabled(|| table.dispatch(number, ctx, args));
    let status = match result {
        Ok(_) => Status::Success,
        Err(err) => {
            log_debug!(target: "syscall", "num={} from domain {} failed: {}", number, caller.raw(), err);
            err.status()
        }
    };

    audit.record(
        now,
        caller,
        AuditKind::Syscall,
        status,
        [number as u64, args.get(0) as u64, args.get(1) as u64, status.as_raw() as u64],
    );
    status
}
