// Copyright 2026 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! CONTEXT: Domain table — the unit of isolation
//! OWNERS: @kernel-team
//! PUBLIC API: DomainTable (create/destroy/suspend/resume), Quota, DomainState, DomainInfo
//! DEPENDS_ON: cap::{CapTable, CapSpace}, pmm::PhysicalMemory, types::{DomainId, PhysAddr}
//! INVARIANTS: Slots are never recycled within a boot session; regions of active domains are
//!             disjoint by construction; conservation counters track every handle movement

extern crate alloc;

use alloc::vec::Vec;
use bitflags::bitflags;

use crate::cap::{CapError, CapHandle, CapSpace, CapTable};
use crate::pmm::{FrameType, PhysicalMemory, PmmError, PAGE_SIZE};
use crate::types::{CapId, DomainId, PhysAddr};

/// Number of domain slots available per boot session.
pub const MAX_DOMAINS: usize = 128;

/// Lifecycle state of a domain slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DomainState {
    /// Slot has never been used.
    Init,
    /// Created, not currently scheduled.
    Ready,
    /// Currently executing.
    Running,
    /// Withheld from execution.
    Suspended,
    /// Destroyed. Terminal; the slot is not reusable.
    Terminated,
}

/// Privilege class requested at creation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DomainType {
    /// Core-0 itself.
    Core,
    /// Service domain running at kernel privilege, isolated by capabilities.
    Privileged,
    /// Ordinary application domain.
    Application,
}

impl DomainType {
    fn frame_type(self) -> FrameType {
        match self {
            DomainType::Core => FrameType::Core,
            DomainType::Privileged => FrameType::Privileged,
            DomainType::Application => FrameType::Application,
        }
    }

    fn flags(self) -> DomainFlags {
        match self {
            DomainType::Core => DomainFlags::TRUSTED,
            DomainType::Privileged => DomainFlags::PRIVILEGED,
            DomainType::Application => DomainFlags::empty(),
        }
    }
}

bitflags! {
    /// Domain attribute flags.
    #[derive(Clone, Copy, PartialEq, Eq, Debug)]
    pub struct DomainFlags: u8 {
        /// Core-0 only.
        const TRUSTED = 1 << 0;
        /// Privileged-1 service domain.
        const PRIVILEGED = 1 << 1;
    }
}

/// Resource limits fixed at creation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Quota {
    /// Memory budget in bytes, covering the region and the handle array.
    pub max_memory: u64,
    /// Thread ceiling.
    pub max_threads: u16,
    /// Capability-handle array capacity.
    pub max_caps: u32,
    /// Share of CPU time in percent.
    pub cpu_quota_percent: u8,
}

/// Live resource usage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Usage {
    /// Bytes of physical memory charged to the domain.
    pub memory_bytes: u64,
    /// Threads currently alive.
    pub threads: u16,
}

/// Errors returned by domain-table operations.
#[must_use = "domain errors must be handled explicitly"]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DomainError {
    /// Quota malformed (zero caps, memory too small, cpu share over 100).
    InvalidParam,
    /// Referenced domain slot does not exist or was never created.
    InvalidDomain,
    /// Operation illegal in the domain's current state.
    InvalidState,
    /// A per-domain quota would be exceeded.
    QuotaExceeded,
    /// No free slot or physical memory available.
    NoResource,
    /// Capability layer rejected the operation.
    Cap(CapError),
    /// Allocator rejected the operation.
    Pmm(PmmError),
}

impl From<PmmError> for DomainError {
    fn from(value: PmmError) -> Self {
        match value {
            PmmError::NoResource => Self::NoResource,
            other => Self::Pmm(other),
        }
    }
}

impl From<CapError> for DomainError {
    fn from(value: CapError) -> Self {
        match value {
            // A full handle array surfaces as a quota failure at this layer.
            CapError::NoResource => Self::QuotaExceeded,
            other => Self::Cap(other),
        }
    }
}

struct Domain {
    state: DomainState,
    flags: DomainFlags,
    parent: DomainId,
    region_base: PhysAddr,
    region_size: u64,
    handles_base: PhysAddr,
    handle_pages: u64,
    quota: Quota,
    usage: Usage,
    space: CapSpace,
    // Conservation counters: live = initial + granted - revoked.
    initial_caps: u32,
    granted: i64,
    revoked: u32,
}

/// Read-only view of one domain, returned by [`DomainTable::get_info`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DomainInfo {
    /// Slot id.
    pub id: DomainId,
    /// Lifecycle state.
    pub state: DomainState,
    /// Attribute flags.
    pub flags: DomainFlags,
    /// Parent domain, `DomainId::INVALID` for roots.
    pub parent: DomainId,
    /// First byte of the contiguous physical region.
    pub region_base: PhysAddr,
    /// Region length in bytes.
    pub region_size: u64,
    /// Limits fixed at creation.
    pub quota: Quota,
    /// Live usage.
    pub usage: Usage,
}

/// Table of all isolation domains.
pub struct DomainTable {
    slots: Vec<Option<Domain>>,
}

impl DomainTable {
    /// Creates an empty table with `MAX_DOMAINS` slots.
    pub fn new() -> Self {
        let mut slots = Vec::with_capacity(MAX_DOMAINS);
        for _ in 0..MAX_DOMAINS {
            slots.push(None);
        }
        Self { slots }
    }

    /// Creates a domain in the lowest-indexed fresh slot.
    ///
    /// Allocates the handle-array backing store and the memory region from
    /// the PMM; both allocations are charged against `quota.max_memory`. A
    /// failure in the second allocation rolls the first one back.
    pub fn create(
        &mut self,
        pmm: &mut PhysicalMemory,
        ty: DomainType,
        parent: DomainId,
        quota: &Quota,
    ) -> Result<DomainId, DomainError> {
        if quota.max_caps == 0
            || quota.max_memory == 0
            || quota.max_threads == 0
            || quota.cpu_quota_percent > 100
        {
            return Err(DomainError::InvalidParam);
        }
        if parent != DomainId::INVALID && !self.is_active(parent) {
            return Err(DomainError::InvalidDomain);
        }

        let page_sz = PAGE_SIZE as u64;
        let handle_bytes = quota.max_caps as u64 * core::mem::size_of::<CapHandle>() as u64;
        let handle_pages = handle_bytes.div_ceil(page_sz);
        let budget_pages = quota.max_memory.div_ceil(page_sz);
        if budget_pages <= handle_pages {
            return Err(DomainError::InvalidParam);
        }
        let region_pages = budget_pages - handle_pages;

        let index = self
            .slots
            .iter()
            .position(|slot| slot.is_none())
            .ok_or(DomainError::NoResource)?;
        let id = DomainId::from_raw(index as u16);
        let frame_type = ty.frame_type();

        let handles_base = pmm.alloc_frames(id, handle_pages as usize, frame_type)?;
        let region_base = match pmm.alloc_frames(id, region_pages as usize, frame_type) {
            Ok(base) => base,
            Err(err) => {
                // Roll the handle-array pages back before surfacing the error.
                let _ = pmm.free_frames(handles_base, handle_pages as usize);
                return Err(err.into());
            }
        };

        self.slots[index] = Some(Domain {
            state: DomainState::Ready,
            flags: ty.flags(),
            parent,
            region_base,
            region_size: region_pages * page_sz,
            handles_base,
            handle_pages,
            quota: *quota,
            usage: Usage { memory_bytes: budget_pages * page_sz, threads: 0 },
            space: CapSpace::with_capacity(quota.max_caps as usize),
            initial_caps: 0,
            granted: 0,
            revoked: 0,
        });
        Ok(id)
    }

    /// Destroys a domain: revokes every capability it owns, returns its
    /// frames to the PMM, and marks the slot Terminated.
    ///
    /// Returns the revoked entry ids so the caller can tear down anything
    /// still referencing them (pending calls, interrupt routes).
    pub fn destroy(
        &mut self,
        caps: &mut CapTable,
        pmm: &mut PhysicalMemory,
        id: DomainId,
    ) -> Result<Vec<CapId>, DomainError> {
        if !self.is_active(id) {
            return Err(DomainError::InvalidState);
        }

        // Gather the entries this domain still owns; revoking them may fan
        // out into other domains' counters, so collect first, then apply.
        let owned: Vec<CapId> = {
            let domain = self.domain(id)?;
            domain
                .space
                .iter()
                .filter(|handle| {
                    caps.get_info(handle.cap_id)
                        .is_ok_and(|info| !info.revoked && info.owner == id)
                })
                .map(|handle| handle.cap_id)
                .collect()
        };
        let mut hits: Vec<(CapId, DomainId)> = Vec::new();
        for cap in owned {
            if caps.is_live(cap) {
                let _ = caps.revoke_with(cap, |id, owner| hits.push((id, owner)));
            }
        }
        let mut revoked_ids: Vec<CapId> = Vec::with_capacity(hits.len());
        for (cap, owner) in hits {
            self.note_revoked(owner, cap);
            revoked_ids.push(cap);
        }

        let (handles_base, handle_pages, region_base, region_pages) = {
            let domain = self.domain(id)?;
            (
                domain.handles_base,
                domain.handle_pages,
                domain.region_base,
                domain.region_size / PAGE_SIZE as u64,
            )
        };
        pmm.free_frames(handles_base, handle_pages as usize)?;
        pmm.free_frames(region_base, region_pages as usize)?;

        let domain = self.domain_mut(id)?;
        domain.state = DomainState::Terminated;
        domain.usage = Usage::default();
        domain.region_size = 0;
        Ok(revoked_ids)
    }

    /// True for Core-0.
    pub fn is_trusted(&self, id: DomainId) -> bool {
        self.domain(id).is_ok_and(|d| d.flags.contains(DomainFlags::TRUSTED))
    }

    /// Withholds a running domain from execution.
    pub fn suspend(&mut self, id: DomainId) -> Result<(), DomainError> {
        let domain = self.domain_mut(id)?;
        match domain.state {
            DomainState::Running => {
                domain.state = DomainState::Suspended;
                Ok(())
            }
            _ => Err(DomainError::InvalidState),
        }
    }

    /// Returns a suspended domain to execution.
    pub fn resume(&mut self, id: DomainId) -> Result<(), DomainError> {
        let domain = self.domain_mut(id)?;
        match domain.state {
            DomainState::Suspended => {
                domain.state = DomainState::Running;
                Ok(())
            }
            _ => Err(DomainError::InvalidState),
        }
    }

    /// Marks a ready domain as the one executing.
    pub fn mark_running(&mut self, id: DomainId) -> Result<(), DomainError> {
        let domain = self.domain_mut(id)?;
        match domain.state {
            DomainState::Ready | DomainState::Running => {
                domain.state = DomainState::Running;
                Ok(())
            }
            _ => Err(DomainError::InvalidState),
        }
    }

    /// Returns a running domain to the ready state.
    pub fn mark_ready(&mut self, id: DomainId) -> Result<(), DomainError> {
        let domain = self.domain_mut(id)?;
        match domain.state {
            DomainState::Running | DomainState::Ready => {
                domain.state = DomainState::Ready;
                Ok(())
            }
            _ => Err(DomainError::InvalidState),
        }
    }

    /// Read-only view of one slot.
    pub fn get_info(&self, id: DomainId) -> Result<DomainInfo, DomainError> {
        let domain = self.domain(id)?;
        Ok(DomainInfo {
            id,
            state: domain.state,
            flags: domain.flags,
            parent: domain.parent,
            region_base: domain.region_base,
            region_size: domain.region_size,
            quota: domain.quota,
            usage: domain.usage,
        })
    }

    /// Verifies that charging `size` more bytes stays inside the budget.
    /// Saturating against overflow: a request near `u64::MAX` must not wrap.
    pub fn check_memory_quota(&self, id: DomainId, size: u64) -> Result<(), DomainError> {
        let domain = self.domain(id)?;
        match domain.usage.memory_bytes.checked_add(size) {
            Some(total) if total <= domain.quota.max_memory => Ok(()),
            _ => Err(DomainError::QuotaExceeded),
        }
    }

    /// Verifies that one more thread fits.
    pub fn check_thread_quota(&self, id: DomainId) -> Result<(), DomainError> {
        let domain = self.domain(id)?;
        if domain.usage.threads < domain.quota.max_threads {
            Ok(())
        } else {
            Err(DomainError::QuotaExceeded)
        }
    }

    /// Records a thread start after a successful quota check.
    pub fn thread_started(&mut self, id: DomainId) -> Result<(), DomainError> {
        self.check_thread_quota(id)?;
        self.domain_mut(id)?.usage.threads += 1;
        Ok(())
    }

    /// Records a thread exit.
    pub fn thread_exited(&mut self, id: DomainId) -> Result<(), DomainError> {
        let domain = self.domain_mut(id)?;
        if domain.usage.threads == 0 {
            return Err(DomainError::InvalidState);
        }
        domain.usage.threads -= 1;
        Ok(())
    }

    // ——— capability-space plumbing ———

    /// Stores a handle for a freshly minted capability in the domain's
    /// space, counting it as granted.
    pub fn adopt_cap(
        &mut self,
        caps: &CapTable,
        id: DomainId,
        cap: CapId,
    ) -> Result<usize, DomainError> {
        if !self.is_active(id) {
            return Err(DomainError::InvalidDomain);
        }
        let domain = self.domain_mut(id)?;
        let slot = domain.space.insert(caps, cap)?;
        domain.granted += 1;
        Ok(slot)
    }

    /// Resolves a handle slot of `id` to its entry id (token-checked).
    pub fn resolve_handle(
        &self,
        caps: &CapTable,
        id: DomainId,
        slot: usize,
    ) -> Result<CapId, DomainError> {
        let domain = self.domain(id)?;
        Ok(domain.space.resolve(caps, slot)?)
    }

    /// Moves a capability between two domains' spaces.
    ///
    /// Two-phase: every failure mode is checked before either side is
    /// touched, so the operation commits completely or not at all.
    pub fn transfer_cap(
        &mut self,
        caps: &mut CapTable,
        from: DomainId,
        to: DomainId,
        cap: CapId,
    ) -> Result<usize, DomainError> {
        if from == to {
            return Err(DomainError::InvalidParam);
        }
        if !self.is_active(from) || !self.is_active(to) {
            return Err(DomainError::InvalidDomain);
        }

        // Phase one: validate without mutating.
        caps.check_access(from, cap, crate::cap::Rights::GRANT)?;
        let info = caps.get_info(cap)?;
        if info.immutable {
            return Err(DomainError::Cap(CapError::Permission));
        }
        {
            let source = self.domain(from)?;
            if source.space.find(cap).is_none() {
                return Err(DomainError::Cap(CapError::CapInvalid));
            }
            let dest = self.domain(to)?;
            if dest.space.is_full() {
                return Err(DomainError::QuotaExceeded);
            }
        }

        // Phase two: commit. None of these steps can fail after phase one.
        let source = self.domain_mut(from)?;
        source.space.remove_cap(cap);
        source.granted -= 1;
        caps.set_owner(cap, to)?;
        let dest = self.domain_mut(to)?;
        let slot = dest.space.insert(caps, cap)?;
        dest.granted += 1;
        Ok(slot)
    }

    /// Bumps the revocation counter of `id` if its space holds a handle for
    /// `cap`. Entries revoked before a handle was ever stored do not count
    /// against the conservation identity.
    pub fn note_revoked(&mut self, id: DomainId, cap: CapId) {
        if let Ok(domain) = self.domain_mut(id) {
            if domain.space.find(cap).is_some() {
                domain.revoked += 1;
            }
        }
    }

    /// Free handle slots remaining in the domain's space.
    pub fn count_free_handles(&self, id: DomainId) -> usize {
        self.domain(id)
            .map(|d| d.space.capacity() - d.space.occupied())
            .unwrap_or(0)
    }

    // ——— observer accessors used by the invariant monitor ———

    /// True for Ready, Running, and Suspended slots.
    pub fn is_active(&self, id: DomainId) -> bool {
        self.domain(id).is_ok_and(|d| {
            matches!(d.state, DomainState::Ready | DomainState::Running | DomainState::Suspended)
        })
    }

    /// Counts handles whose entries are still live.
    pub fn count_capabilities(&self, caps: &CapTable, id: DomainId) -> u32 {
        self.domain(id).map(|d| d.space.live_count(caps)).unwrap_or(0)
    }

    /// Handles seeded at creation.
    pub fn initial_caps(&self, id: DomainId) -> u32 {
        self.domain(id).map(|d| d.initial_caps).unwrap_or(0)
    }

    /// Net handles added after creation (mint + transfer-in − transfer-out).
    pub fn granted(&self, id: DomainId) -> i64 {
        self.domain(id).map(|d| d.granted).unwrap_or(0)
    }

    /// Live handles lost to revocation.
    pub fn revoked(&self, id: DomainId) -> u32 {
        self.domain(id).map(|d| d.revoked).unwrap_or(0)
    }

    /// The domain's contiguous physical region.
    pub fn memory_region(&self, id: DomainId) -> Option<(PhysAddr, u64)> {
        self.domain(id).ok().map(|d| (d.region_base, d.region_size))
    }

    /// Bytes of physical memory charged to the domain.
    pub fn allocated_memory(&self, id: DomainId) -> u64 {
        self.domain(id).map(|d| d.usage.memory_bytes).unwrap_or(0)
    }

    /// CPU share in percent.
    pub fn cpu_quota(&self, id: DomainId) -> u8 {
        self.domain(id).map(|d| d.quota.cpu_quota_percent).unwrap_or(0)
    }

    /// Iterates over the ids of all active domains.
    pub fn active_ids(&self) -> impl Iterator<Item = DomainId> + '_ {
        self.slots.iter().enumerate().filter_map(|(index, slot)| {
            slot.as_ref()
                .filter(|d| {
                    matches!(
                        d.state,
                        DomainState::Ready | DomainState::Running | DomainState::Suspended
                    )
                })
                .map(|_| DomainId::from_raw(index as u16))
        })
    }

    fn domain(&self, id: DomainId) -> Result<&Domain, DomainError> {
        self.slots
            .get(id.as_index())
            .and_then(|slot| slot.as_ref())
            .ok_or(DomainError::InvalidDomain)
    }

    fn domain_mut(&mut self, id: DomainId) -> Result<&mut Domain, DomainError> {
        self.slots
            .get_mut(id.as_index())
            .and_then(|slot| slot.as_mut())
            .ok_or(DomainError::InvalidDomain)
    }
}

impl Default for DomainTable {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cap::Rights;

    fn pmm() -> PhysicalMemory {
        let mut pmm = PhysicalMemory::new();
        pmm.add_region(PhysAddr::new(0x10_0000), 0x3FF0_0000).expect("region");
        pmm
    }

    fn core_quota() -> Quota {
        Quota { max_memory: 0x10_0000, max_threads: 16, max_caps: 1024, cpu_quota_percent: 100 }
    }

    fn small_quota() -> Quota {
        Quota { max_memory: 0x2_0000, max_threads: 4, max_caps: 16, cpu_quota_percent: 10 }
    }

    #[test]
    fn scenario_core_domain_creation() {
        let mut pmm = pmm();
        let mut domains = DomainTable::new();
        let id = domains
            .create(&mut pmm, DomainType::Core, DomainId::INVALID, &core_quota())
            .expect("core domain");
        assert_eq!(id, DomainId::CORE);

        let info = domains.get_info(id).unwrap();
        assert_eq!(info.state, DomainState::Ready);
        assert!(info.flags.contains(DomainFlags::TRUSTED));
        assert_eq!(info.quota, core_quota());

        // Capability array + core region together consume the full budget.
        let stats = pmm.stats();
        assert_eq!(stats.total_pages, 0x3FF00);
        assert_eq!(stats.used_pages, 0x100);
        assert_eq!(stats.free_pages, 0x3FE00);
    }

    #[test]
    fn create_picks_lowest_free_slot_and_never_recycles() {
        let mut pmm = pmm();
        let mut caps = CapTable::with_capacity(64);
        let mut domains = DomainTable::new();
        let a = domains
            .create(&mut pmm, DomainType::Application, DomainId::INVALID, &small_quota())
            .unwrap();
        let b = domains
            .create(&mut pmm, DomainType::Application, DomainId::INVALID, &small_quota())
            .unwrap();
        assert_eq!(a.raw(), 0);
        assert_eq!(b.raw(), 1);

        domains.destroy(&mut caps, &mut pmm, a).unwrap();
        let c = domains
            .create(&mut pmm, DomainType::Application, DomainId::INVALID, &small_quota())
            .unwrap();
        // Slot 0 is terminated, not reusable.
        assert_eq!(c.raw(), 2);
        assert_eq!(domains.get_info(a).unwrap().state, DomainState::Terminated);
    }

    #[test]
    fn destroy_returns_all_frames() {
        let mut pmm = pmm();
        let mut caps = CapTable::with_capacity(64);
        let mut domains = DomainTable::new();
        let before = pmm.stats();
        let id = domains
            .create(&mut pmm, DomainType::Application, DomainId::INVALID, &small_quota())
            .unwrap();
        assert_ne!(pmm.stats(), before);
        domains.destroy(&mut caps, &mut pmm, id).unwrap();
        assert_eq!(pmm.stats().free_pages, before.free_pages);
        assert_eq!(pmm.owned_pages_of(id), 0);
    }

    #[test]
    fn destroy_revokes_owned_capabilities() {
        let mut pmm = pmm();
        let mut caps = CapTable::with_capacity(64);
        let mut domains = DomainTable::new();
        let id = domains
            .create(&mut pmm, DomainType::Application, DomainId::INVALID, &small_quota())
            .unwrap();
        let cap = caps
            .create_memory(id, PhysAddr::new(0x9000_0000), 0x1000, Rights::READ)
            .unwrap();
        domains.adopt_cap(&caps, id, cap).unwrap();
        domains.destroy(&mut caps, &mut pmm, id).unwrap();
        assert!(!caps.is_live(cap));
        assert_eq!(domains.revoked(id), 1);
    }

    #[test]
    fn lifecycle_transitions_are_guarded() {
        let mut pmm = pmm();
        let mut domains = DomainTable::new();
        let id = domains
            .create(&mut pmm, DomainType::Application, DomainId::INVALID, &small_quota())
            .unwrap();
        // Ready -> Suspended is not a legal edge.
        assert_eq!(domains.suspend(id), Err(DomainError::InvalidState));
        domains.mark_running(id).unwrap();
        domains.suspend(id).unwrap();
        assert_eq!(domains.resume(id), Ok(()));
        assert_eq!(domains.resume(id), Err(DomainError::InvalidState));
    }

    #[test]
    fn memory_quota_check_does_not_wrap() {
        let mut pmm = pmm();
        let mut domains = DomainTable::new();
        let id = domains
            .create(&mut pmm, DomainType::Application, DomainId::INVALID, &small_quota())
            .unwrap();
        assert_eq!(
            domains.check_memory_quota(id, u64::MAX - 1),
            Err(DomainError::QuotaExceeded)
        );
    }

    #[test]
    fn thread_quota_is_enforced() {
        let mut pmm = pmm();
        let mut domains = DomainTable::new();
        let id = domains
            .create(&mut pmm, DomainType::Application, DomainId::INVALID, &small_quota())
            .unwrap();
        for _ in 0..4 {
            domains.thread_started(id).unwrap();
        }
        assert_eq!(domains.thread_started(id), Err(DomainError::QuotaExceeded));
        domains.thread_exited(id).unwrap();
        assert_eq!(domains.thread_started(id), Ok(()));
    }

    #[test]
    fn scenario_transfer_respects_quota_and_restores_on_failure() {
        let mut pmm = pmm();
        let mut caps = CapTable::with_capacity(4096);
        let mut domains = DomainTable::new();
        let quota_a = Quota { max_memory: 0x10_0000, max_threads: 4, max_caps: 1024, cpu_quota_percent: 10 };
        let a = domains.create(&mut pmm, DomainType::Application, DomainId::INVALID, &quota_a).unwrap();
        let b = domains.create(&mut pmm, DomainType::Application, DomainId::INVALID, &quota_a).unwrap();

        // Fill A to 1023 handles, the last of which is transferable.
        for index in 0..1022u64 {
            let cap = caps
                .create_memory(a, PhysAddr::new(0x8000_0000 + index * 0x1000), 0x1000, Rights::READ)
                .unwrap();
            domains.adopt_cap(&caps, a, cap).unwrap();
        }
        let movable = caps
            .create_memory(a, PhysAddr::new(0x9000_0000), 0x1000, Rights::READ | Rights::GRANT)
            .unwrap();
        domains.adopt_cap(&caps, a, movable).unwrap();
        assert_eq!(domains.count_capabilities(&caps, a), 1023);

        domains.transfer_cap(&mut caps, a, b, movable).unwrap();
        assert_eq!(domains.count_capabilities(&caps, a), 1022);
        assert_eq!(domains.count_capabilities(&caps, b), 1);
        assert_eq!(caps.get_info(movable).unwrap().owner, b);

        // Refill A to capacity, then push the cap back: quota refuses.
        for index in 0..2u64 {
            let cap = caps
                .create_memory(a, PhysAddr::new(0xA000_0000 + index * 0x1000), 0x1000, Rights::READ)
                .unwrap();
            domains.adopt_cap(&caps, a, cap).unwrap();
        }
        assert_eq!(domains.count_capabilities(&caps, a), 1024);
        assert_eq!(
            domains.transfer_cap(&mut caps, b, a, movable),
            Err(DomainError::QuotaExceeded)
        );
        // Both sides unchanged.
        assert_eq!(domains.count_capabilities(&caps, a), 1024);
        assert_eq!(domains.count_capabilities(&caps, b), 1);
        assert_eq!(caps.get_info(movable).unwrap().owner, b);
    }

    #[test]
    fn transfer_roundtrip_restores_ownership_exactly() {
        let mut pmm = pmm();
        let mut caps = CapTable::with_capacity(64);
        let mut domains = DomainTable::new();
        let a = domains.create(&mut pmm, DomainType::Application, DomainId::INVALID, &small_quota()).unwrap();
        let b = domains.create(&mut pmm, DomainType::Application, DomainId::INVALID, &small_quota()).unwrap();
        let cap = caps
            .create_memory(a, PhysAddr::new(0x9000_0000), 0x1000, Rights::READ | Rights::GRANT)
            .unwrap();
        domains.adopt_cap(&caps, a, cap).unwrap();
        let rights_before = caps.get_info(cap).unwrap().rights;

        domains.transfer_cap(&mut caps, a, b, cap).unwrap();
        domains.transfer_cap(&mut caps, b, a, cap).unwrap();

        let info = caps.get_info(cap).unwrap();
        assert_eq!(info.owner, a);
        assert_eq!(info.rights, rights_before);
        assert_eq!(domains.count_capabilities(&caps, a), 1);
        assert_eq!(domains.count_capabilities(&caps, b), 0);
    }

    #[test]
    fn transfer_without_grant_right_is_refused() {
        let mut pmm = pmm();
        let mut caps = CapTable::with_capacity(64);
        let mut domains = DomainTable::new();
        let a = domains.create(&mut pmm, DomainType::Application, DomainId::INVALID, &small_quota()).unwrap();
        let b = domains.create(&mut pmm, DomainType::Application, DomainId::INVALID, &small_quota()).unwrap();
        let cap = caps
            .create_memory(a, PhysAddr::new(0x9000_0000), 0x1000, Rights::READ)
            .unwrap();
        domains.adopt_cap(&caps, a, cap).unwrap();
        assert_eq!(
            domains.transfer_cap(&mut caps, a, b, cap),
            Err(DomainError::Cap(CapError::Permission))
        );
    }

    #[test]
    fn conservation_identity_holds_through_mint_transfer_revoke() {
        let mut pmm = pmm();
        let mut caps = CapTable::with_capacity(64);
        let mut domains = DomainTable::new();
        let a = domains.create(&mut pmm, DomainType::Application, DomainId::INVALID, &small_quota()).unwrap();
        let b = domains.create(&mut pmm, DomainType::Application, DomainId::INVALID, &small_quota()).unwrap();

        let kept = caps.create_memory(a, PhysAddr::new(0x9000_0000), 0x1000, Rights::READ).unwrap();
        let moved = caps
            .create_memory(a, PhysAddr::new(0x9000_1000), 0x1000, Rights::READ | Rights::GRANT)
            .unwrap();
        domains.adopt_cap(&caps, a, kept).unwrap();
        domains.adopt_cap(&caps, a, moved).unwrap();
        domains.transfer_cap(&mut caps, a, b, moved).unwrap();
        caps.revoke_with(kept, |id, owner| domains.note_revoked(owner, id)).unwrap();

        for id in [a, b] {
            let live = domains.count_capabilities(&caps, id) as i64;
            let expected = domains.initial_caps(id) as i64 + domains.granted(id)
                - domains.revoked(id) as i64;
            assert_eq!(live, expected, "conservation broke for domain {}", id.raw());
        }
    }

    #[test]
    fn regions_of_live_domains_never_overlap() {
        let mut pmm = pmm();
        let mut domains = DomainTable::new();
        let a = domains.create(&mut pmm, DomainType::Application, DomainId::INVALID, &small_quota()).unwrap();
        let b = domains.create(&mut pmm, DomainType::Application, DomainId::INVALID, &small_quota()).unwrap();
        let (base_a, len_a) = domains.memory_region(a).unwrap();
        let (base_b, len_b) = domains.memory_region(b).unwrap();
        let end_a = base_a.raw() + len_a;
        let end_b = base_b.raw() + len_b;
        assert!(end_a <= base_b.raw() || end_b <= base_a.raw());
    }
}
