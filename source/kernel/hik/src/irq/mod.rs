// Copyright 2026 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! CONTEXT: Lock-free interrupt routing from vector to (domain, handler, endpoint cap)
//! OWNERS: @kernel-team
//! PUBLIC API: IrqRouter (register_handler/enable/disable/dispatch), RouteFlags, DispatchOutcome
//! DEPENDS_ON: cap::CapTable (endpoint checks), hal::{PortIo, Mmio, IrqCtl}, sync::critical
//! INVARIANTS: dispatch never takes a lock; routes publish through the initialized flag with
//!             release/acquire pairing, so readers see the old or new route, never a tear

use core::sync::atomic::{AtomicBool, AtomicU32, AtomicUsize, Ordering};

use bitflags::bitflags;

use crate::arch::riscv as arch;
use crate::cap::{CapError, CapTable, Rights};
use crate::hal::{IrqCtl, Mmio, PortIo};
use crate::sync::critical;
use crate::types::{CapId, DomainId, IrqVector};

/// Number of routing slots; one per hardware vector.
pub const VECTOR_COUNT: usize = 256;

// Legacy PIC vector window (remapped hardware IRQs 0-15) and command ports.
const PIC_VECTOR_BASE: u8 = 32;
const PIC_SLAVE_VECTOR_BASE: u8 = 40;
const PIC_VECTOR_END: u8 = 48;
const PIC_MASTER_CMD: u16 = 0x20;
const PIC_SLAVE_CMD: u16 = 0xA0;
const PIC_EOI: u8 = 0x20;

// MMIO EOI register of the platform interrupt controller (vectors >= 48).
const INTC_EOI_OFFSET: usize = 0xB0;

bitflags! {
    /// Trigger-mode and sharing flags of a route.
    #[derive(Clone, Copy, PartialEq, Eq, Debug)]
    pub struct RouteFlags: u32 {
        /// Edge triggered.
        const EDGE = 1 << 0;
        /// Level triggered.
        const LEVEL = 1 << 1;
        /// Line may be shared between devices.
        const SHARED = 1 << 2;
    }
}

/// Errors produced by routing-table updates.
#[must_use = "IRQ errors must be handled explicitly"]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IrqError {
    /// Null handler address or malformed flags.
    InvalidParam,
    /// Vector has no initialized route.
    NotRouted,
    /// Endpoint capability check failed with a permission error.
    Permission,
    /// Endpoint capability is dead or mistagged.
    CapInvalid,
}

impl From<CapError> for IrqError {
    fn from(value: CapError) -> Self {
        match value {
            CapError::Permission => Self::Permission,
            _ => Self::CapInvalid,
        }
    }
}

/// What `dispatch` did for one interrupt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchOutcome {
    /// Handler ran and the controller was acknowledged.
    Handled,
    /// No initialized route for the vector.
    NoRoute,
    /// Route exists but the line is disabled.
    Masked,
    /// Endpoint capability check refused the delivery.
    Denied,
}

/// Registered handler signature: a same-privilege indirect call taking the
/// vector number. Privileged-1 handlers run at Core-0's privilege level;
/// isolation comes from capabilities and memory ownership, not a mode switch.
pub type IrqHandlerFn = extern "C" fn(u8);

// One routing slot. Every field is an atomic so the lock-free reader can
// never observe a torn value; cross-field consistency comes from the
// initialized-flag protocol in `register_handler`.
struct RouteSlot {
    domain: AtomicU32,
    handler: AtomicUsize,
    endpoint: AtomicU32,
    flags: AtomicU32,
    initialized: AtomicBool,
    enabled: AtomicBool,
}

impl RouteSlot {
    const fn empty() -> Self {
        Self {
            domain: AtomicU32::new(u32::MAX),
            handler: AtomicUsize::new(0),
            endpoint: AtomicU32::new(u32::MAX),
            flags: AtomicU32::new(0),
            initialized: AtomicBool::new(false),
            enabled: AtomicBool::new(false),
        }
    }
}

/// Read-only snapshot of one route.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RouteInfo {
    /// Domain whose handler services the vector.
    pub domain: DomainId,
    /// Handler entry address.
    pub handler: usize,
    /// Endpoint capability checked on every delivery.
    pub endpoint: CapId,
    /// Trigger-mode flags.
    pub flags: RouteFlags,
    /// True once a route was published.
    pub initialized: bool,
    /// True while the line is unmasked.
    pub enabled: bool,
}

/// The fixed 256-slot routing table.
pub struct IrqRouter {
    slots: [RouteSlot; VECTOR_COUNT],
}

impl IrqRouter {
    /// Creates a table with every vector unrouted.
    pub const fn new() -> Self {
        const EMPTY: RouteSlot = RouteSlot::empty();
        Self { slots: [EMPTY; VECTOR_COUNT] }
    }

    /// Masks every line and publishes the fresh table with a full barrier,
    /// so the first unmask can never observe a half-built table.
    pub fn controller_init(&self, hal: &impl IrqCtl) {
        for vector in 0..VECTOR_COUNT {
            hal.disable_line(vector as u8);
        }
        arch::barrier_full();
    }

    /// Publishes a route for `vector`.
    ///
    /// The caller's claim on the vector is the endpoint capability: the
    /// check runs against `domain` before anything is written. Publication
    /// happens inside a critical section using the initialized-flag
    /// protocol, so concurrent dispatchers see the old route or the new
    /// one, never a mix.
    pub fn register_handler(
        &self,
        caps: &CapTable,
        vector: IrqVector,
        domain: DomainId,
        handler: usize,
        endpoint: CapId,
        flags: RouteFlags,
    ) -> Result<(), IrqError> {
        if handler == 0 {
            return Err(IrqError::InvalidParam);
        }
        caps.check_access(domain, endpoint, Rights::empty())?;

        let slot = &self.slots[vector.as_index()];
        critical::with_interrupts_disabled(|| {
            slot.initialized.store(false, Ordering::Release);
            slot.domain.store(domain.raw() as u32, Ordering::Relaxed);
            slot.handler.store(handler, Ordering::Relaxed);
            slot.endpoint.store(endpoint.raw(), Ordering::Relaxed);
            slot.flags.store(flags.bits(), Ordering::Relaxed);
            slot.initialized.store(true, Ordering::Release);
        });
        Ok(())
    }

    /// Unmasks a routed vector.
    pub fn enable(&self, vector: IrqVector, hal: &impl IrqCtl) -> Result<(), IrqError> {
        let slot = &self.slots[vector.as_index()];
        if !slot.initialized.load(Ordering::Acquire) {
            return Err(IrqError::NotRouted);
        }
        slot.enabled.store(true, Ordering::Release);
        hal.enable_line(vector.raw());
        Ok(())
    }

    /// Masks a vector.
    pub fn disable(&self, vector: IrqVector, hal: &impl IrqCtl) -> Result<(), IrqError> {
        let slot = &self.slots[vector.as_index()];
        if !slot.initialized.load(Ordering::Acquire) {
            return Err(IrqError::NotRouted);
        }
        slot.enabled.store(false, Ordering::Release);
        hal.disable_line(vector.raw());
        Ok(())
    }

    /// Delivers one interrupt. Lock-free by contract: one acquire read of
    /// the slot, one capability check, one indirect call, one EOI write.
    pub fn dispatch(
        &self,
        vector: IrqVector,
        caps: &CapTable,
        hal: &(impl PortIo + Mmio),
    ) -> DispatchOutcome {
        let slot = &self.slots[vector.as_index()];
        if !slot.initialized.load(Ordering::Acquire) {
            log_debug!(target: "irq", "vector {} has no route", vector.raw());
            return DispatchOutcome::NoRoute;
        }
        if !slot.enabled.load(Ordering::Acquire) {
            return DispatchOutcome::Masked;
        }
        let handler = slot.handler.load(Ordering::Acquire);
        if handler == 0 {
            return DispatchOutcome::NoRoute;
        }
        let domain = DomainId::from_raw(slot.domain.load(Ordering::Acquire) as u16);
        let endpoint = CapId::from_raw(slot.endpoint.load(Ordering::Acquire));

        if caps.check_access(domain, endpoint, Rights::empty()).is_err() {
            log_warn!(target: "irq", "vector {}: permission denied", vector.raw());
            return DispatchOutcome::Denied;
        }

        // SAFETY: handler was registered as a non-null entry address by a
        // domain that passed the endpoint capability check; the call stays
        // at the current privilege level.
        let entry: IrqHandlerFn = unsafe { core::mem::transmute(handler) };
        entry(vector.raw());

        end_of_interrupt(hal, vector.raw());
        DispatchOutcome::Handled
    }

    /// Tears down every route whose endpoint capability was revoked, so the
    /// routing table never keeps a dead claim initialized.
    pub fn drop_routes_for(&self, endpoint: CapId) -> u32 {
        let mut dropped = 0;
        for slot in &self.slots {
            if slot.initialized.load(Ordering::Acquire)
                && slot.endpoint.load(Ordering::Acquire) == endpoint.raw()
            {
                critical::with_interrupts_disabled(|| {
                    slot.enabled.store(false, Ordering::Release);
                    slot.initialized.store(false, Ordering::Release);
                });
                dropped += 1;
            }
        }
        dropped
    }

    /// Snapshot of one route for the monitor and diagnostics.
    pub fn route_info(&self, vector: IrqVector) -> RouteInfo {
        let slot = &self.slots[vector.as_index()];
        RouteInfo {
            domain: DomainId::from_raw(slot.domain.load(Ordering::Acquire) as u16),
            handler: slot.handler.load(Ordering::Acquire),
            endpoint: CapId::from_raw(slot.endpoint.load(Ordering::Acquire)),
            flags: RouteFlags::from_bits_truncate(slot.flags.load(Ordering::Acquire)),
            initialized: slot.initialized.load(Ordering::Acquire),
            enabled: slot.enabled.load(Ordering::Acquire),
        }
    }
}

impl Default for IrqRouter {
    fn default() -> Self {
        Self::new()
    }
}

// Signals completion to the interrupt controller. Legacy PIC vectors are
// acknowledged over the command ports, everything at or above 48 through the
// controller's MMIO EOI register. Vectors below 32 are CPU exceptions and
// take no acknowledgement.
fn end_of_interrupt(hal: &(impl PortIo + Mmio), vector: u8) {
    if (PIC_VECTOR_BASE..PIC_VECTOR_END).contains(&vector) {
        if vector >= PIC_SLAVE_VECTOR_BASE {
            hal.outb(PIC_SLAVE_CMD, PIC_EOI);
        }
        hal.outb(PIC_MASTER_CMD, PIC_EOI);
    } else if vector >= PIC_VECTOR_END {
        hal.write32(INTC_EOI_OFFSET, vector as u32);
    }
}
