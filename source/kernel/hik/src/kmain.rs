// Copyright 2026 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! CONTEXT: Kernel state aggregation and boot sequence
//! OWNERS: @kernel-team
//! PUBLIC API: KernelState (new/syscall/create_domain/destroy_domain/dispatch_irq/run), CORE_QUOTA
//! DEPENDS_ON: every subsystem; hal::Platform
//! INVARIANTS: The monitor runs after domain_create, domain_destroy, and every syscall return;
//!             every violation path halts, uniformly

extern crate alloc;

use hik_abi::Status;

use crate::boot::cmdline::{CmdlineOptions, ConsoleTarget};
use crate::boot::{BootError, BootInfo};
use crate::cap::CapTable;
use crate::config::PlatformConfig;
use crate::diag::audit::{AuditKind, AuditLog};
use crate::domain::{DomainError, DomainTable, DomainType, Quota};
use crate::exec::ExecState;
use crate::hal::Platform;
use crate::ipc::CallBroker;
use crate::irq::{DispatchOutcome, IrqRouter};
use crate::monitor::{KernelView, Monitor, MonitorState};
use crate::pmm::{FrameType, PhysicalMemory, PmmError, PAGE_SIZE};
use crate::syscall::{api, syscall_handler, Args, SyscallTable};
use crate::types::{DomainId, IrqVector, PhysAddr};

/// Quota of the Core-0 domain created at boot.
pub const CORE_QUOTA: Quota =
    Quota { max_memory: 0x10_0000, max_threads: 16, max_caps: 1024, cpu_quota_percent: 100 };

/// Errors surfaced while bringing the kernel up. All of them are terminal;
/// the entry stub logs and halts.
#[must_use = "boot failures are terminal and must be acted on"]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KernelError {
    /// The hand-over block failed validation.
    Boot(BootError),
    /// The memory map yielded no usable RAM.
    Pmm(PmmError),
    /// Core-0 could not be created.
    Domain(DomainError),
}

impl From<BootError> for KernelError {
    fn from(value: BootError) -> Self {
        Self::Boot(value)
    }
}

impl From<PmmError> for KernelError {
    fn from(value: PmmError) -> Self {
        Self::Pmm(value)
    }
}

impl From<DomainError> for KernelError {
    fn from(value: DomainError) -> Self {
        Self::Domain(value)
    }
}

/// Aggregated kernel state initialised during boot.
///
/// The four singletons plus the monitor live here as plain fields and are
/// passed by reference into every subsystem call; nothing hides behind a
/// global.
pub struct KernelState<M: Platform> {
    hal: M,
    pmm: PhysicalMemory,
    caps: CapTable,
    domains: DomainTable,
    irq: IrqRouter,
    calls: CallBroker,
    exec: ExecState,
    syscalls: SyscallTable,
    monitor: Monitor,
    audit: AuditLog,
    options: CmdlineOptions,
    config: Option<PlatformConfig>,
}

impl<M: Platform> KernelState<M> {
    /// Brings the kernel up from the validated hand-over block.
    ///
    /// Seeds the PMM from the usable memory map (clamped by `mem=`),
    /// withdraws the kernel image and modules, creates Core-0, and runs the
    /// first invariant sweep.
    pub fn new(hal: M, boot: &BootInfo<'_>) -> Result<Self, KernelError> {
        let options = CmdlineOptions::parse(boot.cmdline);
        if options.quiet {
            crate::diag::log::set_max_level(crate::diag::log::Level::Error);
        } else if options.debug {
            crate::diag::log::set_max_level(crate::diag::log::Level::Trace);
        }
        if let ConsoleTarget::Serial { port, baud } = options.console {
            log_info!(target: "boot", "console on serial port {:#x} at {} baud", port, baud);
        }

        let mut pmm = PhysicalMemory::new();
        let mut budget = options.mem_limit.unwrap_or(u64::MAX);
        for region in boot.usable_regions() {
            if budget == 0 {
                log_info!(target: "boot", "mem= clamp reached, ignoring {:#x}", region.base);
                continue;
            }
            let take = region.length.min(budget);
            pmm.add_region(PhysAddr::new(region.base), take)?;
            budget = budget.saturating_sub(take);
        }
        if boot.kernel.size > 0 {
            pmm.mark_used(PhysAddr::new(boot.kernel.base), boot.kernel.size)?;
        }
        for module in boot.modules {
            if module.size > 0 {
                pmm.mark_used(PhysAddr::new(module.base), module.size)?;
            }
        }

        let mut domains = DomainTable::new();
        let core = domains.create(&mut pmm, DomainType::Core, DomainId::INVALID, &CORE_QUOTA)?;

        let mut syscalls = SyscallTable::new();
        api::install_handlers(&mut syscalls);

        let irq = IrqRouter::new();
        irq.controller_init(&hal);

        let mut state = Self {
            hal,
            pmm,
            caps: CapTable::new(),
            domains,
            irq,
            calls: CallBroker::new(),
            exec: ExecState::new(),
            syscalls,
            monitor: Monitor::new(),
            audit: AuditLog::new(),
            options,
            config: None,
        };
        state.audit_domain_create(core, &CORE_QUOTA);
        state.run_invariants();
        Ok(state)
    }

    /// Installs the externally parsed platform configuration. The next
    /// sweep judges it through invariants 7 and 8.
    pub fn set_config(&mut self, config: PlatformConfig) {
        self.config = Some(config);
        self.run_invariants();
    }

    /// Handles one syscall and re-verifies the safety invariants before
    /// returning to the caller.
    pub fn syscall(&mut self, number: usize, args: Args) -> Status {
        let status = {
            let mut ctx = api::Context {
                caps: &mut self.caps,
                domains: &mut self.domains,
                calls: &mut self.calls,
                irq: &self.irq,
                exec: &mut self.exec,
                timer: &self.hal,
            };
            syscall_handler(&self.syscalls, &mut ctx, &mut self.audit, number, &args)
        };
        self.run_invariants();
        self.hal.syscall_return(status.as_raw());
        status
    }

    /// Creates a domain, audits it, and re-verifies the invariants.
    pub fn create_domain(
        &mut self,
        ty: DomainType,
        parent: DomainId,
        quota: &Quota,
    ) -> Result<DomainId, DomainError> {
        let id = crate::sync::critical::with_interrupts_disabled(|| {
            self.domains.create(&mut self.pmm, ty, parent, quota)
        })?;
        self.audit_domain_create(id, quota);
        self.run_invariants();
        Ok(id)
    }

    /// Destroys a domain, tears down everything referencing its revoked
    /// capabilities, and re-verifies the invariants.
    pub fn destroy_domain(&mut self, id: DomainId) -> Result<(), DomainError> {
        let revoked = crate::sync::critical::with_interrupts_disabled(|| {
            self.domains.destroy(&mut self.caps, &mut self.pmm, id)
        })?;
        for cap in revoked {
            self.calls.cancel_endpoint(cap);
            self.irq.drop_routes_for(cap);
        }
        self.run_invariants();
        Ok(())
    }

    /// Allocates frames on behalf of a domain, leaving an audit record.
    pub fn allocate_frames(
        &mut self,
        owner: DomainId,
        count: usize,
        ty: FrameType,
    ) -> Result<PhysAddr, PmmError> {
        let result = crate::sync::critical::with_interrupts_disabled(|| {
            self.pmm.alloc_frames(owner, count, ty)
        });
        // Frames are zeroed before they leave the allocator so no stale
        // bytes cross a domain boundary.
        #[cfg(all(target_arch = "riscv64", target_os = "none"))]
        if let Ok(base) = &result {
            use crate::hal::PhysMap as _;
            // SAFETY: the run was just allocated and the kernel window
            // identity-maps RAM.
            unsafe {
                core::ptr::write_bytes(
                    self.hal.phys_to_virt(base.raw()) as *mut u8,
                    0,
                    count * PAGE_SIZE,
                );
            }
        }
        let (status, base) = match &result {
            Ok(base) => (Status::Success, base.raw()),
            Err(PmmError::InvalidParam) => (Status::InvalidParam, 0),
            Err(_) => (Status::NoResource, 0),
        };
        self.audit.record(
            self.hal.now_ns(),
            owner,
            AuditKind::PmmAlloc,
            status,
            [base, count as u64, frame_type_tag(ty), 0],
        );
        result
    }

    /// Delivers one hardware interrupt on the current CPU.
    pub fn dispatch_irq(&mut self, vector: IrqVector) -> DispatchOutcome {
        self.irq.dispatch(vector, &self.caps, &self.hal)
    }

    /// Completes the pending call of `caller` after its callee replied,
    /// returning execution to the caller. Driven by the external thread
    /// scheduler when the callee's reply arrives.
    pub fn complete_call(&mut self, caller: DomainId) -> Result<(), DomainError> {
        if self.calls.complete_call(caller).is_err() {
            return Err(DomainError::InvalidState);
        }
        self.exec.switch_to(&mut self.domains, caller)?;
        self.run_invariants();
        Ok(())
    }

    /// Records an architecture fault and halts. Faults inside Core-0 are
    /// not recoverable.
    pub fn handle_exception(&mut self, code: u64, address: u64) {
        log_error!(target: "kernel", "exception {:#x} at {:#x}", code, address);
        self.audit.record(
            self.hal.now_ns(),
            self.exec.current(),
            AuditKind::Exception,
            Status::InvalidState,
            [code, address, 0, 0],
        );
        self.hal.halt();
    }

    /// Idle loop for the boot CPU: park until the next interrupt.
    pub fn run(&mut self) -> ! {
        #[cfg(feature = "boot_banner")]
        crate::uart::write_line("hik vers. 0.1.0 - hierarchical isolation kernel");
        loop {
            self.hal.idle();
        }
    }

    // ——— observers used by tests and the diagnostics channel ———

    /// Parsed command-line options.
    pub fn options(&self) -> &CmdlineOptions {
        &self.options
    }

    /// Borrow of the HAL facade.
    pub fn hal(&self) -> &M {
        &self.hal
    }

    /// Borrow of the allocator.
    pub fn pmm(&self) -> &PhysicalMemory {
        &self.pmm
    }

    /// Mutable borrow of the capability table (boot-time seeding).
    pub fn caps_mut(&mut self) -> &mut CapTable {
        &mut self.caps
    }

    /// Borrow of the capability table.
    pub fn caps(&self) -> &CapTable {
        &self.caps
    }

    /// Mutable borrow of the domain table (boot-time seeding).
    pub fn domains_mut(&mut self) -> &mut DomainTable {
        &mut self.domains
    }

    /// Borrow of the domain table.
    pub fn domains(&self) -> &DomainTable {
        &self.domains
    }

    /// Borrow of the routing table.
    pub fn irq(&self) -> &IrqRouter {
        &self.irq
    }

    /// Borrow of the monitor.
    pub fn monitor(&self) -> &Monitor {
        &self.monitor
    }

    /// Borrow of the audit ring.
    pub fn audit(&self) -> &AuditLog {
        &self.audit
    }

    fn audit_domain_create(&mut self, id: DomainId, quota: &Quota) {
        self.audit.record(
            self.hal.now_ns(),
            id,
            AuditKind::DomainCreate,
            Status::Success,
            [
                quota.max_memory / PAGE_SIZE as u64,
                quota.max_caps as u64,
                quota.max_threads as u64,
                quota.cpu_quota_percent as u64,
            ],
        );
    }

    // Sweeps every invariant; a violation logs, audits, and halts the
    // machine. This is the single failure policy for all monitor hooks.
    fn run_invariants(&mut self) {
        let now = self.hal.now_ns();
        let result = {
            let view = KernelView {
                pmm: &self.pmm,
                caps: &self.caps,
                domains: &self.domains,
                irq: &self.irq,
                calls: &self.calls,
                config: self.config.as_ref(),
                now_ns: now,
            };
            self.monitor.check_all(&view)
        };
        if let Err(violation) = result {
            self.audit.record(
                now,
                self.exec.current(),
                AuditKind::SecurityViolation,
                Status::InvalidState,
                [violation.invariant as u64, 0, 0, 0],
            );
            debug_assert_eq!(self.monitor.get_state(), MonitorState::Violated);
            self.hal.halt();
        }
    }
}

fn frame_type_tag(ty: FrameType) -> u64 {
    match ty {
        FrameType::Free => 0,
        FrameType::Reserved => 1,
        FrameType::Core => 2,
        FrameType::Privileged => 3,
        FrameType::Application => 4,
        FrameType::Shared => 5,
    }
}
