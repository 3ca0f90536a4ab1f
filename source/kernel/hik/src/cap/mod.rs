// Copyright 2026 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! CONTEXT: Global capability table and per-domain capability spaces
//! OWNERS: @kernel-cap-team
//! PUBLIC API: CapTable, CapSpace, CapKind, CapEntryInfo, CapError, Rights
//! DEPENDS_ON: types::{CapId, DomainId, IrqVector, PhysAddr}
//! INVARIANTS: cap_id equals table index; live iff tagged and not revoked; derived rights are a
//!             subset of the parent's; revocation walks the child DAG, never the whole table;
//!             the token seed never changes while handles are live

extern crate alloc;

use alloc::vec::Vec;
use bitflags::bitflags;
use core::fmt;

use crate::types::{CapId, DomainId, IrqVector, PhysAddr};

pub use hik_abi::Rights;

/// Default size of the flat global table.
pub const CAP_TABLE_SIZE: usize = 65536;

/// Children tracked inline in each entry before spilling to the excess slab.
const INLINE_CHILDREN: usize = 4;
/// Child ids per excess-slab node.
const EXCESS_NODE_IDS: usize = 8;
const NO_NODE: u32 = u32::MAX;

bitflags! {
    /// Entry state flags.
    #[derive(Clone, Copy, PartialEq, Eq, Debug)]
    pub struct CapFlags: u8 {
        /// Entry has been revoked; handles referring to it are dead.
        const REVOKED = 1 << 0;
        /// Entry may not be transferred, derived from, or revoked.
        const IMMUTABLE = 1 << 1;
    }
}

/// Type-discriminated payload of a capability entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CapKind {
    /// Plain RAM window owned by the holder.
    Memory {
        /// First byte of the window.
        base: PhysAddr,
        /// Window length in bytes.
        len: u64,
    },
    /// Device register window outside RAM.
    Mmio {
        /// First byte of the window.
        base: PhysAddr,
        /// Window length in bytes.
        len: u64,
    },
    /// Right to bind a handler to one interrupt vector.
    Irq(IrqVector),
    /// Cross-domain call target.
    Endpoint {
        /// Domain servicing calls through this endpoint.
        target: DomainId,
        /// Endpoint cookie chosen by the creator.
        id: u32,
    },
    /// Delegation record pointing at the capability it attenuates.
    Derived {
        /// The parent entry this one was derived from.
        parent: CapId,
    },
    /// Named kernel service.
    Service {
        /// Service UUID.
        uuid: [u8; 16],
    },
}

/// Errors produced when manipulating capabilities.
#[must_use = "capability errors must be handled explicitly"]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CapError {
    /// Zero-sized payload, nil UUID, or similar argument defect.
    InvalidParam,
    /// Caller does not own the entry or lacks a required right.
    Permission,
    /// Slot empty, tag mismatch, or entry revoked.
    CapInvalid,
    /// Table or excess slab exhausted.
    NoResource,
}

impl fmt::Display for CapError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self)
    }
}

struct CapEntry {
    cap_id: CapId,
    kind: CapKind,
    rights: Rights,
    owner: DomainId,
    ref_count: u16,
    flags: CapFlags,
    generation: u32,
    children: [CapId; INLINE_CHILDREN],
    child_count: u8,
    overflow: u32,
}

/// Read-only view of one entry, returned by [`CapTable::get_info`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CapEntryInfo {
    /// The entry's id (equal to its index).
    pub id: CapId,
    /// Payload.
    pub kind: CapKind,
    /// Rights mask.
    pub rights: Rights,
    /// Owning domain.
    pub owner: DomainId,
    /// Sharing reference count.
    pub ref_count: u16,
    /// True once the entry has been revoked.
    pub revoked: bool,
    /// True for boot-sealed entries.
    pub immutable: bool,
    /// Parent entry for derived capabilities.
    pub parent: Option<CapId>,
}

// Overflow storage for child lists that outgrow the inline array.
#[derive(Clone, Copy)]
struct ExcessNode {
    ids: [CapId; EXCESS_NODE_IDS],
    len: u8,
    next: u32,
}

impl ExcessNode {
    const fn empty() -> Self {
        Self { ids: [CapId::INVALID; EXCESS_NODE_IDS], len: 0, next: NO_NODE }
    }
}

/// The single global capability table.
///
/// `check_access` is the hot path and only reads; every mutating operation is
/// expected to run inside a critical section (see `sync::critical`).
pub struct CapTable {
    entries: Vec<Option<CapEntry>>,
    excess: Vec<ExcessNode>,
    excess_free: u32,
    generation_clock: u32,
}

impl CapTable {
    /// Creates a table sized for `slots` entries.
    pub fn with_capacity(slots: usize) -> Self {
        let mut entries: Vec<Option<CapEntry>> = Vec::with_capacity(slots);
        for _ in 0..slots {
            entries.push(None);
        }
        // One excess node per eight slots keeps deep derivation trees cheap
        // without letting the slab dominate the table footprint.
        let node_count = (slots / 8).max(8);
        let mut excess = Vec::with_capacity(node_count);
        for index in 0..node_count {
            let mut node = ExcessNode::empty();
            node.next = if index + 1 < node_count { index as u32 + 1 } else { NO_NODE };
            excess.push(node);
        }
        Self { entries, excess, excess_free: 0, generation_clock: 0 }
    }

    /// Creates the production-sized table.
    pub fn new() -> Self {
        Self::with_capacity(CAP_TABLE_SIZE)
    }

    /// Number of slots in the table.
    pub fn capacity(&self) -> usize {
        self.entries.len()
    }

    // ——— typed constructors ———

    /// Mints a memory capability for `owner`.
    pub fn create_memory(
        &mut self,
        owner: DomainId,
        base: PhysAddr,
        len: u64,
        rights: Rights,
    ) -> Result<CapId, CapError> {
        if len == 0 || base.checked_add(len).is_none() {
            return Err(CapError::InvalidParam);
        }
        self.allocate(CapKind::Memory { base, len }, rights, owner)
    }

    /// Mints a device-window capability for `owner`.
    pub fn create_mmio(
        &mut self,
        owner: DomainId,
        base: PhysAddr,
        len: u64,
        rights: Rights,
    ) -> Result<CapId, CapError> {
        if len == 0 || base.checked_add(len).is_none() {
            return Err(CapError::InvalidParam);
        }
        self.allocate(CapKind::Mmio { base, len }, rights | Rights::DEVICE, owner)
    }

    /// Mints an interrupt capability for `owner`.
    pub fn create_irq(
        &mut self,
        owner: DomainId,
        vector: IrqVector,
        rights: Rights,
    ) -> Result<CapId, CapError> {
        self.allocate(CapKind::Irq(vector), rights, owner)
    }

    /// Mints an endpoint capability naming `target` as the callee.
    pub fn create_endpoint(
        &mut self,
        owner: DomainId,
        target: DomainId,
        id: u32,
        rights: Rights,
    ) -> Result<CapId, CapError> {
        if target == DomainId::INVALID {
            return Err(CapError::InvalidParam);
        }
        self.allocate(CapKind::Endpoint { target, id }, rights, owner)
    }

    /// Mints a service capability for `owner`.
    pub fn create_service(
        &mut self,
        owner: DomainId,
        uuid: [u8; 16],
        rights: Rights,
    ) -> Result<CapId, CapError> {
        if uuid == [0; 16] {
            return Err(CapError::InvalidParam);
        }
        self.allocate(CapKind::Service { uuid }, rights, owner)
    }

    // ——— hot path ———

    /// Verifies that `domain` may exercise `required` through `cap`.
    ///
    /// Lock-free: reads the table without entering a critical section. The
    /// entry must be tagged (`cap_id == index`), not revoked, owned by the
    /// caller, and carry every requested right.
    pub fn check_access(
        &self,
        domain: DomainId,
        cap: CapId,
        required: Rights,
    ) -> Result<(), CapError> {
        let entry = self.entry(cap).ok_or(CapError::CapInvalid)?;
        if entry.flags.contains(CapFlags::REVOKED) {
            return Err(CapError::CapInvalid);
        }
        if entry.owner != domain {
            return Err(CapError::Permission);
        }
        if !entry.rights.contains(required) {
            return Err(CapError::Permission);
        }
        Ok(())
    }

    /// Returns a read-only view of an entry, including revoked ones.
    pub fn get_info(&self, cap: CapId) -> Result<CapEntryInfo, CapError> {
        let entry = self.entry(cap).ok_or(CapError::CapInvalid)?;
        Ok(info_of(entry))
    }

    /// Iterates over every occupied entry, revoked ones included. Used by
    /// the invariant monitor's read-only sweeps.
    pub fn iter_info(&self) -> impl Iterator<Item = CapEntryInfo> + '_ {
        self.entries.iter().flatten().map(info_of)
    }

    /// True when the entry is tagged and not revoked.
    pub fn is_live(&self, cap: CapId) -> bool {
        self.entry(cap).is_some_and(|e| !e.flags.contains(CapFlags::REVOKED))
    }

    // ——— mutation ———

    /// Derives a child of `parent` whose rights are `parent.rights & sub`.
    ///
    /// Fails with `Permission` if the request would grant a right the parent
    /// lacks.
    pub fn derive(
        &mut self,
        owner: DomainId,
        parent: CapId,
        sub: Rights,
    ) -> Result<CapId, CapError> {
        {
            let entry = self.entry(parent).ok_or(CapError::CapInvalid)?;
            if entry.flags.contains(CapFlags::REVOKED) {
                return Err(CapError::CapInvalid);
            }
            if entry.flags.contains(CapFlags::IMMUTABLE) {
                return Err(CapError::Permission);
            }
            if entry.owner != owner {
                return Err(CapError::Permission);
            }
            if !entry.rights.contains(sub) {
                return Err(CapError::Permission);
            }
        }
        let child = self.allocate(CapKind::Derived { parent }, sub, owner)?;
        if let Err(err) = self.add_child(parent, child) {
            // Roll the fresh entry back so the failure publishes nothing.
            self.entries[child.as_index()] = None;
            return Err(err);
        }
        if let Some(entry) = self.entry_mut(parent) {
            entry.ref_count = entry.ref_count.saturating_add(1);
        }
        Ok(child)
    }

    /// Revokes `cap` and, transitively, every capability derived from it.
    ///
    /// `on_revoked` fires once per newly revoked entry with its id and owner,
    /// letting the domain table keep its conservation counters exact.
    pub fn revoke_with(
        &mut self,
        cap: CapId,
        mut on_revoked: impl FnMut(CapId, DomainId),
    ) -> Result<u32, CapError> {
        {
            let entry = self.entry(cap).ok_or(CapError::CapInvalid)?;
            if entry.flags.contains(CapFlags::REVOKED) {
                return Err(CapError::CapInvalid);
            }
            if entry.flags.contains(CapFlags::IMMUTABLE) {
                return Err(CapError::Permission);
            }
        }

        let mut revoked = 0u32;
        let mut queue: Vec<CapId> = Vec::new();
        queue.push(cap);
        while let Some(current) = queue.pop() {
            let children = self.take_children(current);
            let Some(entry) = self.entry_mut(current) else {
                continue;
            };
            if entry.flags.contains(CapFlags::REVOKED) {
                continue;
            }
            entry.flags.insert(CapFlags::REVOKED);
            entry.generation = entry.generation.wrapping_add(1);
            let owner = entry.owner;
            revoked += 1;
            on_revoked(current, owner);
            for child in children {
                queue.push(child);
            }
        }
        Ok(revoked)
    }

    /// Revokes without conservation bookkeeping (boot and test paths).
    pub fn revoke(&mut self, cap: CapId) -> Result<u32, CapError> {
        self.revoke_with(cap, |_, _| {})
    }

    /// Reassigns ownership of an entry. The caller is responsible for the
    /// GRANT check and for moving the handle between capability spaces.
    pub fn set_owner(&mut self, cap: CapId, to: DomainId) -> Result<(), CapError> {
        let entry = self.entry_mut(cap).ok_or(CapError::CapInvalid)?;
        if entry.flags.contains(CapFlags::REVOKED) {
            return Err(CapError::CapInvalid);
        }
        entry.owner = to;
        Ok(())
    }

    /// Seals an entry against transfer, derivation, and revocation.
    pub fn set_immutable(&mut self, cap: CapId) -> Result<(), CapError> {
        let entry = self.entry_mut(cap).ok_or(CapError::CapInvalid)?;
        entry.flags.insert(CapFlags::IMMUTABLE);
        Ok(())
    }

    /// Returns the unforgeable handle token for a live entry.
    ///
    /// The token mixes the entry id, its generation, and the boot seed, so a
    /// handle goes stale the moment its entry is revoked or reused.
    pub fn token_for(&self, cap: CapId) -> Result<u64, CapError> {
        let entry = self.entry(cap).ok_or(CapError::CapInvalid)?;
        Ok(mix_token(cap, entry.generation))
    }

    // ——— internals ———

    fn entry(&self, cap: CapId) -> Option<&CapEntry> {
        self.entries
            .get(cap.as_index())
            .and_then(|slot| slot.as_ref())
            .filter(|entry| entry.cap_id == cap)
    }

    fn entry_mut(&mut self, cap: CapId) -> Option<&mut CapEntry> {
        self.entries
            .get_mut(cap.as_index())
            .and_then(|slot| slot.as_mut())
            .filter(|entry| entry.cap_id == cap)
    }

    fn allocate(
        &mut self,
        kind: CapKind,
        rights: Rights,
        owner: DomainId,
    ) -> Result<CapId, CapError> {
        if owner == DomainId::INVALID {
            return Err(CapError::InvalidParam);
        }
        let index = self
            .entries
            .iter()
            .position(|slot| slot.is_none())
            .ok_or(CapError::NoResource)?;
        let id = CapId::from_raw(index as u32);
        self.generation_clock = self.generation_clock.wrapping_add(1);
        self.entries[index] = Some(CapEntry {
            cap_id: id,
            kind,
            rights,
            owner,
            ref_count: 1,
            flags: CapFlags::empty(),
            generation: self.generation_clock,
            children: [CapId::INVALID; INLINE_CHILDREN],
            child_count: 0,
            overflow: NO_NODE,
        });
        Ok(id)
    }

    fn add_child(&mut self, parent: CapId, child: CapId) -> Result<(), CapError> {
        let need_excess = {
            let entry = self.entry_mut(parent).ok_or(CapError::CapInvalid)?;
            if (entry.child_count as usize) < INLINE_CHILDREN {
                let at = entry.child_count as usize;
                entry.children[at] = child;
                entry.child_count += 1;
                return Ok(());
            }
            entry.overflow
        };

        // Walk the overflow chain for a node with room.
        let mut cursor = need_excess;
        let mut last = NO_NODE;
        while cursor != NO_NODE {
            let node = &mut self.excess[cursor as usize];
            if (node.len as usize) < EXCESS_NODE_IDS {
                let at = node.len as usize;
                node.ids[at] = child;
                node.len += 1;
                return Ok(());
            }
            last = cursor;
            cursor = node.next;
        }

        // Chain a fresh node from the slab free list.
        let fresh = self.excess_free;
        if fresh == NO_NODE {
            return Err(CapError::NoResource);
        }
        self.excess_free = self.excess[fresh as usize].next;
        let node = &mut self.excess[fresh as usize];
        node.ids = [CapId::INVALID; EXCESS_NODE_IDS];
        node.ids[0] = child;
        node.len = 1;
        node.next = NO_NODE;
        if last != NO_NODE {
            self.excess[last as usize].next = fresh;
        } else if let Some(entry) = self.entry_mut(parent) {
            entry.overflow = fresh;
        }
        Ok(())
    }

    // Drains the child list of an entry, returning the ids and releasing any
    // excess nodes back to the slab.
    fn take_children(&mut self, cap: CapId) -> Vec<CapId> {
        let mut children = Vec::new();
        let overflow_head = {
            let Some(entry) = self.entry_mut(cap) else {
                return children;
            };
            for index in 0..entry.child_count as usize {
                children.push(entry.children[index]);
            }
            entry.children = [CapId::INVALID; INLINE_CHILDREN];
            entry.child_count = 0;
            let head = entry.overflow;
            entry.overflow = NO_NODE;
            head
        };
        let mut cursor = overflow_head;
        while cursor != NO_NODE {
            let next = self.excess[cursor as usize].next;
            {
                let node = &self.excess[cursor as usize];
                for index in 0..node.len as usize {
                    children.push(node.ids[index]);
                }
            }
            let node = &mut self.excess[cursor as usize];
            node.len = 0;
            node.next = self.excess_free;
            self.excess_free = cursor;
            cursor = next;
        }
        children
    }
}

impl Default for CapTable {
    fn default() -> Self {
        Self::new()
    }
}

fn info_of(entry: &CapEntry) -> CapEntryInfo {
    CapEntryInfo {
        id: entry.cap_id,
        kind: entry.kind,
        rights: entry.rights,
        owner: entry.owner,
        ref_count: entry.ref_count,
        revoked: entry.flags.contains(CapFlags::REVOKED),
        immutable: entry.flags.contains(CapFlags::IMMUTABLE),
        parent: match entry.kind {
            CapKind::Derived { parent } => Some(parent),
            _ => None,
        },
    }
}

// Per-boot salt folded into every handle token. Must not change while
// handles are live; there is no setter.
const TOKEN_SEED: u64 = 0x4849_4B21_0000_0001;

// SplitMix64-style finaliser; good avalanche, no cryptographic claim. The
// boot seed keeps tokens unpredictable across domains within one boot.
fn mix_token(cap: CapId, generation: u32) -> u64 {
    let mut x = TOKEN_SEED ^ ((cap.raw() as u64) << 32) ^ (generation as u64);
    x = x.wrapping_add(0x9E37_79B9_7F4A_7C15);
    x = (x ^ (x >> 30)).wrapping_mul(0xBF58_476D_1CE4_E5B9);
    x = (x ^ (x >> 27)).wrapping_mul(0x94D0_49BB_1331_11EB);
    x ^ (x >> 31)
}

/// Per-domain reference to a global entry. Only meaningful inside the
/// owning domain; the token thwarts cross-domain guessing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CapHandle {
    /// Referenced global entry.
    pub cap_id: CapId,
    token: u64,
}

/// Fixed-capacity handle array owned by one domain.
///
/// The table owns entry metadata; the space holds only `{cap_id, token}`
/// pairs, which sidesteps aliasing entry state across domains.
pub struct CapSpace {
    slots: Vec<Option<CapHandle>>,
}

impl CapSpace {
    /// Creates a space with room for `capacity` handles.
    pub fn with_capacity(capacity: usize) -> Self {
        let mut slots = Vec::with_capacity(capacity);
        for _ in 0..capacity {
            slots.push(None);
        }
        Self { slots }
    }

    /// Capacity fixed at domain creation.
    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    /// Number of occupied handle slots (live or stale).
    pub fn occupied(&self) -> usize {
        self.slots.iter().filter(|slot| slot.is_some()).count()
    }

    /// True when no further handle fits.
    pub fn is_full(&self) -> bool {
        self.slots.iter().all(|slot| slot.is_some())
    }

    /// Inserts a handle for `cap`, returning the slot index.
    pub fn insert(&mut self, table: &CapTable, cap: CapId) -> Result<usize, CapError> {
        let token = table.token_for(cap)?;
        let slot = self
            .slots
            .iter()
            .position(|slot| slot.is_none())
            .ok_or(CapError::NoResource)?;
        self.slots[slot] = Some(CapHandle { cap_id: cap, token });
        Ok(slot)
    }

    /// Removes and returns the handle in `slot`.
    pub fn remove(&mut self, slot: usize) -> Option<CapHandle> {
        self.slots.get_mut(slot).and_then(|entry| entry.take())
    }

    /// Removes the handle referencing `cap`, if present.
    pub fn remove_cap(&mut self, cap: CapId) -> Option<CapHandle> {
        let slot = self.find(cap)?;
        self.remove(slot)
    }

    /// Returns the handle stored in `slot` without consuming it.
    pub fn get(&self, slot: usize) -> Option<CapHandle> {
        self.slots.get(slot).and_then(|entry| *entry)
    }

    /// Finds the slot holding a handle for `cap`.
    pub fn find(&self, cap: CapId) -> Option<usize> {
        self.slots
            .iter()
            .position(|slot| slot.is_some_and(|handle| handle.cap_id == cap))
    }

    /// Resolves a slot to its entry id, verifying the obfuscation token
    /// against the entry's current generation.
    pub fn resolve(&self, table: &CapTable, slot: usize) -> Result<CapId, CapError> {
        let handle = self.get(slot).ok_or(CapError::CapInvalid)?;
        let expected = table.token_for(handle.cap_id)?;
        if expected != handle.token {
            return Err(CapError::CapInvalid);
        }
        Ok(handle.cap_id)
    }

    /// Counts handles whose entries are still live.
    pub fn live_count(&self, table: &CapTable) -> u32 {
        self.slots
            .iter()
            .flatten()
            .filter(|handle| table.is_live(handle.cap_id))
            .count() as u32
    }

    /// Iterates over occupied handles.
    pub fn iter(&self) -> impl Iterator<Item = &CapHandle> {
        self.slots.iter().flatten()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn table() -> CapTable {
        CapTable::with_capacity(64)
    }

    const D1: DomainId = DomainId::from_raw(1);
    const D2: DomainId = DomainId::from_raw(2);

    #[test]
    fn create_memory_rejects_zero_size() {
        let mut caps = table();
        assert_eq!(
            caps.create_memory(D1, PhysAddr::new(0x1000), 0, Rights::READ),
            Err(CapError::InvalidParam)
        );
    }

    #[test]
    fn check_access_enforces_owner_and_rights() {
        let mut caps = table();
        let cap = caps
            .create_memory(D1, PhysAddr::new(0x1000), 0x1000, Rights::READ | Rights::WRITE)
            .unwrap();
        assert_eq!(caps.check_access(D1, cap, Rights::READ), Ok(()));
        assert_eq!(caps.check_access(D2, cap, Rights::READ), Err(CapError::Permission));
        assert_eq!(caps.check_access(D1, cap, Rights::EXEC), Err(CapError::Permission));
        assert_eq!(
            caps.check_access(D1, CapId::from_raw(63), Rights::empty()),
            Err(CapError::CapInvalid)
        );
    }

    #[test]
    fn derive_intersects_rights_and_rejects_escalation() {
        let mut caps = table();
        let parent = caps
            .create_memory(D1, PhysAddr::new(0x1000), 0x1000, Rights::READ | Rights::WRITE)
            .unwrap();
        let child = caps.derive(D1, parent, Rights::READ).unwrap();
        let info = caps.get_info(child).unwrap();
        assert_eq!(info.rights, Rights::READ);
        assert_eq!(info.parent, Some(parent));
        assert_eq!(
            caps.derive(D1, parent, Rights::READ | Rights::EXEC),
            Err(CapError::Permission)
        );
    }

    #[test]
    fn revoke_cascades_through_the_derivation_chain() {
        let mut caps = table();
        let c1 = caps
            .create_memory(
                D1,
                PhysAddr::new(0x1000),
                0x1000,
                Rights::READ | Rights::WRITE | Rights::EXEC | Rights::GRANT,
            )
            .unwrap();
        let c2 = caps.derive(D1, c1, Rights::READ | Rights::WRITE).unwrap();
        let c3 = caps.derive(D1, c2, Rights::READ).unwrap();

        let count = caps.revoke(c1).unwrap();
        assert_eq!(count, 3);
        for cap in [c1, c2, c3] {
            assert!(caps.get_info(cap).unwrap().revoked);
        }
        assert_eq!(caps.check_access(D1, c2, Rights::READ), Err(CapError::CapInvalid));
    }

    #[test]
    fn revoking_a_leaf_leaves_the_parent_live() {
        let mut caps = table();
        let parent = caps
            .create_memory(D1, PhysAddr::new(0x1000), 0x1000, Rights::READ | Rights::WRITE)
            .unwrap();
        let child = caps.derive(D1, parent, Rights::READ).unwrap();
        assert_eq!(caps.revoke(child).unwrap(), 1);
        assert!(caps.is_live(parent));
        assert!(!caps.is_live(child));
    }

    #[test]
    fn revoke_drains_children_past_the_inline_array() {
        let mut caps = CapTable::with_capacity(128);
        let parent = caps
            .create_memory(D1, PhysAddr::new(0x1000), 0x1000, Rights::READ | Rights::WRITE)
            .unwrap();
        let mut derived = Vec::new();
        for _ in 0..20 {
            derived.push(caps.derive(D1, parent, Rights::READ).unwrap());
        }
        let count = caps.revoke(parent).unwrap();
        assert_eq!(count, 21);
        assert!(derived.iter().all(|cap| !caps.is_live(*cap)));
    }

    #[test]
    fn table_exhaustion_reports_no_resource() {
        let mut caps = CapTable::with_capacity(2);
        let _ = caps.create_irq(D1, IrqVector::from_raw(33), Rights::READ).unwrap();
        let _ = caps.create_irq(D1, IrqVector::from_raw(34), Rights::READ).unwrap();
        assert_eq!(
            caps.create_irq(D1, IrqVector::from_raw(35), Rights::READ),
            Err(CapError::NoResource)
        );
    }

    #[test]
    fn immutable_entries_refuse_mutation() {
        let mut caps = table();
        let cap = caps
            .create_memory(D1, PhysAddr::new(0x1000), 0x1000, Rights::READ | Rights::GRANT)
            .unwrap();
        caps.set_immutable(cap).unwrap();
        assert_eq!(caps.derive(D1, cap, Rights::READ), Err(CapError::Permission));
        assert_eq!(caps.revoke(cap), Err(CapError::Permission));
    }

    #[test]
    fn handle_tokens_go_stale_on_revocation() {
        let mut caps = table();
        let mut space = CapSpace::with_capacity(8);
        let cap = caps
            .create_memory(D1, PhysAddr::new(0x1000), 0x1000, Rights::READ)
            .unwrap();
        let slot = space.insert(&caps, cap).unwrap();
        assert_eq!(space.resolve(&caps, slot), Ok(cap));
        caps.revoke(cap).unwrap();
        assert_eq!(space.resolve(&caps, slot), Err(CapError::CapInvalid));
    }

    #[test]
    fn space_capacity_is_a_hard_limit() {
        let mut caps = table();
        let mut space = CapSpace::with_capacity(2);
        let a = caps.create_memory(D1, PhysAddr::new(0x1000), 0x1000, Rights::READ).unwrap();
        let b = caps.create_memory(D1, PhysAddr::new(0x2000), 0x1000, Rights::READ).unwrap();
        let c = caps.create_memory(D1, PhysAddr::new(0x3000), 0x1000, Rights::READ).unwrap();
        space.insert(&caps, a).unwrap();
        space.insert(&caps, b).unwrap();
        assert_eq!(space.insert(&caps, c), Err(CapError::NoResource));
        assert!(space.is_full());
    }

    #[test]
    fn live_count_tracks_revocations() {
        let mut caps = table();
        let mut space = CapSpace::with_capacity(8);
        let a = caps.create_memory(D1, PhysAddr::new(0x1000), 0x1000, Rights::READ).unwrap();
        let b = caps.create_memory(D1, PhysAddr::new(0x2000), 0x1000, Rights::READ).unwrap();
        space.insert(&caps, a).unwrap();
        space.insert(&caps, b).unwrap();
        assert_eq!(space.live_count(&caps), 2);
        caps.revoke(a).unwrap();
        assert_eq!(space.live_count(&caps), 1);
    }
}

#[cfg(test)]
mod tests_prop;
