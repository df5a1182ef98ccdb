//! A minimal physical-address newtype.
//!
//! The real object/page/pmap layers define much richer address types
//! (alignment-checked, architecture-specific); SRE only ever needs to add,
//! compare, and shift physical addresses, so it carries its own tiny type
//! rather than depending on a full address-space crate.

use core::fmt;
use core::ops::{Add, Sub};

use crate::reservation::LEVEL0_SIZE;

#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct PhysAddr(usize);

impl PhysAddr {
    pub const fn new(value: usize) -> PhysAddr {
        PhysAddr(value)
    }

    pub const fn value(&self) -> usize {
        self.0
    }

    /// The index of the superpage-sized region containing this address,
    /// i.e. `phys_addr >> LEVEL0_SHIFT`.
    pub const fn level0_index(&self) -> usize {
        self.0 / LEVEL0_SIZE
    }

    /// The address of the first byte of the superpage-sized region
    /// containing this address.
    pub const fn level0_base(&self) -> PhysAddr {
        PhysAddr((self.0 / LEVEL0_SIZE) * LEVEL0_SIZE)
    }

    pub const fn is_level0_aligned(&self) -> bool {
        self.0 % LEVEL0_SIZE == 0
    }
}

impl Add<usize> for PhysAddr {
    type Output = PhysAddr;
    fn add(self, rhs: usize) -> PhysAddr {
        PhysAddr(self.0 + rhs)
    }
}

impl Sub<usize> for PhysAddr {
    type Output = PhysAddr;
    fn sub(self, rhs: usize) -> PhysAddr {
        PhysAddr(self.0 - rhs)
    }
}

impl Sub<PhysAddr> for PhysAddr {
    type Output = usize;
    fn sub(self, rhs: PhysAddr) -> usize {
        self.0 - rhs.0
    }
}

impl fmt::Debug for PhysAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PhysAddr({:#x})", self.0)
    }
}

/// Index of a `Reservation` slot within the dense reservation array (C2).
///
/// This doubles as the engine's intrusive-queue "pointer": the PartPop
/// queue's links and the object-list links are stored as
/// `Option<ReservationId>` inside each `Reservation` record, rather than as
/// raw pointers, since every reservation already lives at a stable index in
/// one long-lived array.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Debug)]
pub struct ReservationId(pub u32);

impl ReservationId {
    pub fn index(&self) -> usize {
        self.0 as usize
    }
}
