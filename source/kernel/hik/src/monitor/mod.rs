// Copyright 2026 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! CONTEXT: Runtime invariant monitor guarding the other four subsystems
//! OWNERS: @kernel-team
//! PUBLIC API: Monitor (check_all/get_state/get_stats/report), KernelView, Violation,
//!             deadlock_threshold_ns
//! DEPENDS_ON: pmm, cap, domain, irq, ipc (read-only snapshots), config
//! INVARIANTS: Checks are pure predicates over borrowed state; a sweep allocates nothing;
//!             invariants run in dependency order and the sweep stops at the first failure

pub mod graph;

use core::fmt;
use core::sync::atomic::{AtomicU64, Ordering};

use crate::cap::{CapEntryInfo, CapKind, CapTable};
use crate::config::PlatformConfig;
use crate::domain::DomainTable;
use crate::ipc::CallBroker;
use crate::irq::IrqRouter;
use crate::pmm::{FrameType, PhysicalMemory, PAGE_SIZE};
use crate::types::{IrqVector, PhysAddr};

const DEFAULT_DEADLOCK_THRESHOLD_NS: u64 = 5_000_000_000; // 5 s

static DEADLOCK_THRESHOLD_NS: AtomicU64 = AtomicU64::new(DEFAULT_DEADLOCK_THRESHOLD_NS);

/// Wait time after which invariant 5 warns about a possible deadlock.
#[inline]
pub fn deadlock_threshold_ns() -> u64 {
    DEADLOCK_THRESHOLD_NS.load(Ordering::Relaxed)
}

/// Overrides the deadlock warning threshold in nanoseconds.
#[inline]
pub fn set_deadlock_threshold_ns(value: u64) {
    DEADLOCK_THRESHOLD_NS.store(value, Ordering::Relaxed);
}

/// Observable monitor state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MonitorState {
    /// Between sweeps.
    Idle,
    /// A sweep is running.
    Checking,
    /// A sweep found a violation; the machine is expected to halt.
    Violated,
    /// An external operator acknowledged the violation.
    Recovering,
}

/// A failed invariant.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Violation {
    /// Invariant number (1-8).
    pub invariant: u8,
    /// Short human-readable cause.
    pub detail: &'static str,
}

/// Monitor counters surfaced at the diagnostics boundary.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MonitorStats {
    /// Completed and aborted sweeps.
    pub total_checks: u64,
    /// Sweeps that found a violation.
    pub violations: u64,
    /// Invariant number of the most recent violation, 0 if none.
    pub last_violation_id: u8,
}

/// Read-only snapshot of the subsystems a sweep inspects.
pub struct KernelView<'a> {
    /// Physical memory manager.
    pub pmm: &'a PhysicalMemory,
    /// Global capability table.
    pub caps: &'a CapTable,
    /// Domain table.
    pub domains: &'a DomainTable,
    /// Interrupt routing table.
    pub irq: &'a IrqRouter,
    /// Synchronous-call bookkeeping (waits-for graph).
    pub calls: &'a CallBroker,
    /// Parsed platform configuration, if one was handed over at boot.
    pub config: Option<&'a PlatformConfig>,
    /// Current HAL timestamp.
    pub now_ns: u64,
}

/// Theorem record tying an identifier to its check and formal statement.
pub struct InvariantSpec {
    /// Invariant number (1-8).
    pub id: u8,
    /// Short name.
    pub name: &'static str,
    /// Natural-language formal expression.
    pub statement: &'static str,
    /// Invariants that must hold for this check to be meaningful.
    pub depends: &'static [u8],
}

type CheckFn = fn(&KernelView<'_>) -> Result<(), &'static str>;

struct Record {
    spec: InvariantSpec,
    check: CheckFn,
    verified: bool,
}

const fn record(
    id: u8,
    name: &'static str,
    statement: &'static str,
    depends: &'static [u8],
    check: CheckFn,
) -> Record {
    Record { spec: InvariantSpec { id, name, statement, depends }, check, verified: false }
}

/// Stateless observer of the other subsystems; owns only its bookkeeping.
pub struct Monitor {
    state: MonitorState,
    total_checks: u64,
    violations: u64,
    last_violation: u8,
    records: [Record; 8],
}

impl Monitor {
    /// Creates the monitor with the fixed invariant list in dependency order.
    pub fn new() -> Self {
        Self {
            state: MonitorState::Idle,
            total_checks: 0,
            violations: 0,
            last_violation: 0,
            records: [
                record(
                    1,
                    "capability conservation",
                    "for every active domain d: live_caps(d) = initial(d) + granted(d) - revoked(d)",
                    &[],
                    inv_cap_conservation,
                ),
                record(
                    2,
                    "memory isolation",
                    "for all active d1 != d2: region(d1) and region(d2) are disjoint",
                    &[1],
                    inv_memory_isolation,
                ),
                record(
                    3,
                    "derivation monotonicity",
                    "every derived capability's rights are a subset of its parent's",
                    &[1],
                    inv_derivation_monotonicity,
                ),
                record(
                    4,
                    "quota conservation",
                    "sum of allocated memory fits in physical memory; cpu shares sum to at most 100",
                    &[1, 2],
                    inv_quota_conservation,
                ),
                record(
                    5,
                    "deadlock freedom",
                    "the thread waits-for graph is acyclic",
                    &[4],
                    inv_deadlock_freedom,
                ),
                record(
                    6,
                    "type safety",
                    "every live capability's (type, object) pair lies in the compatibility matrix",
                    &[1, 3],
                    inv_type_safety,
                ),
                record(
                    7,
                    "config integrity",
                    "the parsed platform config is valid and bounded",
                    &[],
                    inv_config_integrity,
                ),
                record(
                    8,
                    "config disjointness",
                    "no two config-derived resources collide",
                    &[],
                    inv_config_disjointness,
                ),
            ],
        }
    }

    /// Runs every invariant in topological order.
    ///
    /// Stops at the first failure: later invariants depend on earlier ones
    /// and would only produce noise once a dependency has fallen. The caller
    /// is expected to halt the machine on `Err` — uniformly, on every path.
    pub fn check_all(&mut self, view: &KernelView<'_>) -> Result<(), Violation> {
        self.state = MonitorState::Checking;
        self.total_checks += 1;
        for record in &mut self.records {
            record.verified = false;
        }

        for index in 0..self.records.len() {
            let deps_ok = self.records[index]
                .spec
                .depends
                .iter()
                .all(|dep| self.records[*dep as usize - 1].verified);
            if !deps_ok {
                continue;
            }
            let id = self.records[index].spec.id;
            match (self.records[index].check)(view) {
                Ok(()) => self.records[index].verified = true,
                Err(detail) => {
                    self.violations += 1;
                    self.last_violation = id;
                    self.state = MonitorState::Violated;
                    log_error!(
                        target: "monitor",
                        "invariant {} ({}) violated: {}",
                        id,
                        self.records[index].spec.name,
                        detail
                    );
                    return Err(Violation { invariant: id, detail });
                }
            }
        }
        self.state = MonitorState::Idle;
        Ok(())
    }

    /// Current state-machine position.
    pub fn get_state(&self) -> MonitorState {
        self.state
    }

    /// Counter snapshot.
    pub fn get_stats(&self) -> MonitorStats {
        MonitorStats {
            total_checks: self.total_checks,
            violations: self.violations,
            last_violation_id: self.last_violation,
        }
    }

    /// Acknowledges a violation; only legal from `Violated`.
    pub fn begin_recovery(&mut self) -> bool {
        if self.state == MonitorState::Violated {
            self.state = MonitorState::Recovering;
            true
        } else {
            false
        }
    }

    /// Finishes recovery; only legal from `Recovering`.
    pub fn complete_recovery(&mut self) -> bool {
        if self.state == MonitorState::Recovering {
            self.state = MonitorState::Idle;
            true
        } else {
            false
        }
    }

    /// Writes the text report consumed by the diagnostics channel.
    pub fn report(&self, w: &mut dyn fmt::Write) -> fmt::Result {
        writeln!(
            w,
            "monitor: state={:?} checks={} violations={} last={}",
            self.state, self.total_checks, self.violations, self.last_violation
        )?;
        for record in &self.records {
            writeln!(
                w,
                "  [{}] {} {}: {}",
                record.spec.id,
                if record.verified { "ok  " } else { "----" },
                record.spec.name,
                record.spec.statement
            )?;
        }
        Ok(())
    }
}

impl Default for Monitor {
    fn default() -> Self {
        Self::new()
    }
}

// ——— invariant 1 ———

fn inv_cap_conservation(view: &KernelView<'_>) -> Result<(), &'static str> {
    for id in view.domains.active_ids() {
        let live = view.domains.count_capabilities(view.caps, id) as i64;
        let expected = view.domains.initial_caps(id) as i64 + view.domains.granted(id)
            - view.domains.revoked(id) as i64;
        if live != expected {
            return Err("live handle count diverged from the conservation counters");
        }
    }
    Ok(())
}

// ——— invariant 2 ———

fn inv_memory_isolation(view: &KernelView<'_>) -> Result<(), &'static str> {
    let mut regions: [(u64, u64); crate::domain::MAX_DOMAINS] =
        [(0, 0); crate::domain::MAX_DOMAINS];
    let mut count = 0usize;
    for id in view.domains.active_ids() {
        if let Some((base, len)) = view.domains.memory_region(id) {
            if len == 0 {
                continue;
            }
            regions[count] = (base.raw(), len);
            count += 1;
        }
    }
    for a in 0..count {
        for b in a + 1..count {
            let (base_a, len_a) = regions[a];
            let (base_b, len_b) = regions[b];
            if base_a < base_b + len_b && base_b < base_a + len_a {
                return Err("two active domains own overlapping regions");
            }
        }
    }
    Ok(())
}

// ——— invariant 3 ———

fn inv_derivation_monotonicity(view: &KernelView<'_>) -> Result<(), &'static str> {
    for info in view.caps.iter_info() {
        if info.revoked {
            continue;
        }
        if let Some(parent) = info.parent {
            let parent_info = match view.caps.get_info(parent) {
                Ok(parent_info) => parent_info,
                Err(_) => return Err("derived capability points at a missing parent"),
            };
            if parent_info.revoked {
                return Err("live derivative of a revoked parent");
            }
            if !parent_info.rights.contains(info.rights) {
                return Err("derived rights exceed the parent's");
            }
        }
    }
    Ok(())
}

// ——— invariant 4 ———

fn inv_quota_conservation(view: &KernelView<'_>) -> Result<(), &'static str> {
    let mut memory_total: u64 = 0;
    let mut cpu_total: u32 = 0;
    for id in view.domains.active_ids() {
        memory_total = memory_total.saturating_add(view.domains.allocated_memory(id));
        // Trusted Core-0 does not count against the 100 percent pool.
        if !view.domains.is_trusted(id) {
            cpu_total += view.domains.cpu_quota(id) as u32;
        }
    }
    if memory_total > view.pmm.total_bytes() {
        return Err("domains are charged more memory than physically exists");
    }
    if cpu_total > 100 {
        return Err("cpu shares of active domains exceed 100 percent");
    }
    let stats = view.pmm.stats();
    let accounted = stats.total_pages - stats.free_pages - stats.reserved_pages;
    if view.pmm.owned_page_count() != accounted {
        return Err("owner-tagged frames diverged from the allocator counters");
    }
    Ok(())
}

// ——— invariant 5 ———

fn inv_deadlock_freedom(view: &KernelView<'_>) -> Result<(), &'static str> {
    if let Some((waiter, waited)) = view.calls.graph().longest_wait(view.now_ns) {
        if waited > deadlock_threshold_ns() {
            log_warn!(
                target: "monitor",
                "thread {} has waited {} ns, past the deadlock threshold",
                waiter.raw(),
                waited
            );
        }
    }
    if view.calls.graph().find_cycle().is_some() {
        return Err("the waits-for graph contains a cycle");
    }
    Ok(())
}

// ——— invariant 6 ———

const CAP_TYPES: usize = 6;
const OBJECT_CLASSES: usize = 6;

#[derive(Clone, Copy, PartialEq, Eq)]
enum ObjectClass {
    OwnedRam = 0,
    DeviceWindow = 1,
    Vector = 2,
    ActiveDomain = 3,
    LiveParent = 4,
    NamedService = 5,
}

// Fixed compatibility matrix: rows are capability types in declaration
// order, columns are object classes.
const COMPAT: [[bool; OBJECT_CLASSES]; CAP_TYPES] = [
    [true, false, false, false, false, false],  // Memory
    [false, true, false, false, false, false],  // Mmio
    [false, false, true, false, false, false],  // Irq
    [false, false, false, true, false, false],  // Endpoint
    [false, false, false, false, true, false],  // Derived
    [false, false, false, false, false, true],  // Service
];

fn cap_type_index(kind: &CapKind) -> usize {
    match kind {
        CapKind::Memory { .. } => 0,
        CapKind::Mmio { .. } => 1,
        CapKind::Irq(_) => 2,
        CapKind::Endpoint { .. } => 3,
        CapKind::Derived { .. } => 4,
        CapKind::Service { .. } => 5,
    }
}

fn ram_window_class(view: &KernelView<'_>, base: PhysAddr, len: u64) -> Option<ObjectClass> {
    let first = base.page();
    let last = base.raw().checked_add(len)?.div_ceil(PAGE_SIZE as u64);
    let mut tracked = 0u64;
    for page in first..last {
        match view.pmm.get_frame_info(PhysAddr::new(page * PAGE_SIZE as u64)) {
            Ok(info) if info.ty.is_owned() => tracked += 1,
            Ok(info) if info.ty == FrameType::Free => return None,
            // Reserved frames and untracked addresses read as device space.
            _ => {}
        }
    }
    if tracked == last - first {
        Some(ObjectClass::OwnedRam)
    } else if tracked == 0 {
        Some(ObjectClass::DeviceWindow)
    } else {
        None
    }
}

fn classify(view: &KernelView<'_>, info: &CapEntryInfo) -> Option<ObjectClass> {
    match info.kind {
        CapKind::Memory { base, len } => match ram_window_class(view, base, len) {
            Some(ObjectClass::OwnedRam) => Some(ObjectClass::OwnedRam),
            _ => None,
        },
        CapKind::Mmio { base, len } => match ram_window_class(view, base, len) {
            Some(ObjectClass::DeviceWindow) => Some(ObjectClass::DeviceWindow),
            _ => None,
        },
        CapKind::Irq(_) => Some(ObjectClass::Vector),
        CapKind::Endpoint { target, .. } => {
            if view.domains.is_active(target) {
                Some(ObjectClass::ActiveDomain)
            } else {
                None
            }
        }
        CapKind::Derived { parent } => {
            if view.caps.is_live(parent) {
                Some(ObjectClass::LiveParent)
            } else {
                None
            }
        }
        CapKind::Service { uuid } => {
            if uuid != [0; 16] {
                Some(ObjectClass::NamedService)
            } else {
                None
            }
        }
    }
}

fn inv_type_safety(view: &KernelView<'_>) -> Result<(), &'static str> {
    for info in view.caps.iter_info() {
        if info.revoked {
            continue;
        }
        let class = match classify(view, &info) {
            Some(class) => class,
            None => return Err("capability references an object of the wrong class"),
        };
        if !COMPAT[cap_type_index(&info.kind)][class as usize] {
            return Err("capability type and object class fall outside the matrix");
        }
    }
    // Routing-table side of the same property: an initialized vector must
    // carry a handler and a live endpoint capability.
    for raw in 0..crate::irq::VECTOR_COUNT {
        let route = view.irq.route_info(IrqVector::from_raw(raw as u8));
        if !route.initialized {
            continue;
        }
        if route.handler == 0 {
            return Err("initialized route with a null handler");
        }
        if !view.caps.is_live(route.endpoint) {
            return Err("initialized route holds a dead endpoint capability");
        }
    }
    Ok(())
}

// ——— invariants 7 and 8 ———

fn inv_config_integrity(view: &KernelView<'_>) -> Result<(), &'static str> {
    match view.config {
        Some(config) => config.validate().map_err(|_| "platform config failed validation"),
        None => Ok(()),
    }
}

fn inv_config_disjointness(view: &KernelView<'_>) -> Result<(), &'static str> {
    match view.config {
        Some(config) => {
            config.check_disjoint().map_err(|_| "config-derived resources collide")
        }
        None => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cap::Rights;
    use crate::config::ConfigRegion;
    use crate::domain::{DomainType, Quota};
    use crate::ipc::PendingCall;
    use crate::types::{CapId, DomainId};

    struct World {
        pmm: PhysicalMemory,
        caps: CapTable,
        domains: DomainTable,
        irq: IrqRouter,
        calls: CallBroker,
        config: Option<PlatformConfig>,
    }

    impl World {
        fn new() -> Self {
            let mut pmm = PhysicalMemory::new();
            pmm.add_region(PhysAddr::new(0x10_0000), 0x100_0000).expect("region");
            Self {
                pmm,
                caps: CapTable::with_capacity(64),
                domains: DomainTable::new(),
                irq: IrqRouter::new(),
                calls: CallBroker::new(),
                config: None,
            }
        }

        fn view(&self) -> KernelView<'_> {
            KernelView {
                pmm: &self.pmm,
                caps: &self.caps,
                domains: &self.domains,
                irq: &self.irq,
                calls: &self.calls,
                config: self.config.as_ref(),
                now_ns: 0,
            }
        }

        fn spawn(&mut self, cpu: u8) -> DomainId {
            let quota =
                Quota { max_memory: 0x2_0000, max_threads: 4, max_caps: 16, cpu_quota_percent: cpu };
            self.domains
                .create(&mut self.pmm, DomainType::Application, DomainId::INVALID, &quota)
                .expect("domain")
        }
    }

    #[test]
    fn consistent_state_passes_every_invariant() {
        let mut world = World::new();
        let a = world.spawn(30);
        let (region, _) = world.domains.memory_region(a).unwrap();
        let cap = world
            .caps
            .create_memory(a, region, 0x1000, Rights::READ | Rights::WRITE)
            .unwrap();
        world.domains.adopt_cap(&world.caps, a, cap).unwrap();

        let mut monitor = Monitor::new();
        assert_eq!(monitor.check_all(&world.view()), Ok(()));
        assert_eq!(monitor.get_state(), MonitorState::Idle);
        let stats = monitor.get_stats();
        assert_eq!(stats.total_checks, 1);
        assert_eq!(stats.violations, 0);
        assert_eq!(stats.last_violation_id, 0);
    }

    #[test]
    fn scenario_cpu_overcommit_reports_invariant_four() {
        let mut world = World::new();
        world.spawn(60);
        world.spawn(60);

        let mut monitor = Monitor::new();
        let violation = monitor.check_all(&world.view()).unwrap_err();
        assert_eq!(violation.invariant, 4);
        assert_eq!(monitor.get_state(), MonitorState::Violated);
        assert_eq!(monitor.get_stats().last_violation_id, 4);
    }

    #[test]
    fn waits_for_cycle_reports_invariant_five() {
        let mut world = World::new();
        let a = world.spawn(10);
        let b = world.spawn(10);
        for (caller, callee) in [(a, b), (b, a)] {
            world
                .calls
                .begin_call(PendingCall {
                    caller,
                    callee,
                    endpoint: CapId::from_raw(0),
                    msg_buffer: 0x1000,
                    reply_buffer: 0x2000,
                    since_ns: 0,
                })
                .unwrap();
        }
        let mut monitor = Monitor::new();
        let violation = monitor.check_all(&world.view()).unwrap_err();
        assert_eq!(violation.invariant, 5);
    }

    #[test]
    fn memory_cap_over_free_frames_reports_invariant_six() {
        let mut world = World::new();
        let a = world.spawn(10);
        // Window over RAM the allocator still considers free.
        let cap = world
            .caps
            .create_memory(a, PhysAddr::new(0x80_0000), 0x2000, Rights::READ)
            .unwrap();
        world.domains.adopt_cap(&world.caps, a, cap).unwrap();

        let mut monitor = Monitor::new();
        let violation = monitor.check_all(&world.view()).unwrap_err();
        assert_eq!(violation.invariant, 6);
    }

    #[test]
    fn mmio_caps_outside_ram_are_compatible() {
        let mut world = World::new();
        let a = world.spawn(10);
        let cap = world
            .caps
            .create_mmio(a, PhysAddr::new(0x4000_0000), 0x1000, Rights::READ | Rights::WRITE)
            .unwrap();
        world.domains.adopt_cap(&world.caps, a, cap).unwrap();
        let mut monitor = Monitor::new();
        assert_eq!(monitor.check_all(&world.view()), Ok(()));
    }

    #[test]
    fn dead_route_endpoint_reports_invariant_six() {
        let mut world = World::new();
        let a = world.spawn(10);
        let endpoint = world
            .caps
            .create_endpoint(a, DomainId::from_raw(0), 1, Rights::READ | Rights::WRITE)
            .unwrap();
        world.domains.adopt_cap(&world.caps, a, endpoint).unwrap();
        extern "C" fn noop(_vector: u8) {}
        world
            .irq
            .register_handler(
                &world.caps,
                IrqVector::from_raw(40),
                a,
                noop as usize,
                endpoint,
                crate::irq::RouteFlags::EDGE,
            )
            .unwrap();
        // Revocation behind the router's back leaves a dead claim installed.
        world
            .caps
            .revoke_with(endpoint, |id, owner| world.domains.note_revoked(owner, id))
            .unwrap();

        let mut monitor = Monitor::new();
        let violation = monitor.check_all(&world.view()).unwrap_err();
        assert_eq!(violation.invariant, 6);
    }

    #[test]
    fn invalid_config_reports_invariant_seven() {
        let mut world = World::new();
        world.config = Some(PlatformConfig {
            console_base: 0x1000_0000,
            console_len: 0,
            regions: vec![],
            max_domains: 8,
        });
        let mut monitor = Monitor::new();
        let violation = monitor.check_all(&world.view()).unwrap_err();
        assert_eq!(violation.invariant, 7);
    }

    #[test]
    fn colliding_config_reports_invariant_eight() {
        let mut world = World::new();
        world.config = Some(PlatformConfig {
            console_base: 0x8000_0000,
            console_len: 0x1000,
            regions: vec![ConfigRegion { base: 0x8000_0000, len: 0x10_0000 }],
            max_domains: 8,
        });
        let mut monitor = Monitor::new();
        let violation = monitor.check_all(&world.view()).unwrap_err();
        assert_eq!(violation.invariant, 8);
    }

    #[test]
    fn deadlock_threshold_is_adjustable() {
        let initial = deadlock_threshold_ns();
        set_deadlock_threshold_ns(1234);
        assert_eq!(deadlock_threshold_ns(), 1234);
        set_deadlock_threshold_ns(initial);
    }

    #[test]
    fn recovery_walks_violated_to_idle() {
        let mut world = World::new();
        world.spawn(60);
        world.spawn(60);
        let mut monitor = Monitor::new();
        let _ = monitor.check_all(&world.view());
        assert!(!monitor.complete_recovery());
        assert!(monitor.begin_recovery());
        assert_eq!(monitor.get_state(), MonitorState::Recovering);
        assert!(monitor.complete_recovery());
        assert_eq!(monitor.get_state(), MonitorState::Idle);
    }

    #[test]
    fn report_lists_every_invariant() {
        let monitor = Monitor::new();
        let mut out = String::new();
        monitor.report(&mut out).unwrap();
        for name in [
            "capability conservation",
            "memory isolation",
            "derivation monotonicity",
            "quota conservation",
            "deadlock freedom",
            "type safety",
            "config integrity",
            "config disjointness",
        ] {
            assert!(out.contains(name), "missing {name}");
        }
    }
}
