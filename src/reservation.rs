//! Per-superpage metadata record (C3) and the constants that size it.

use static_assertions::const_assert;

use crate::addr::{PhysAddr, ReservationId};
use crate::popmap::PopMap;

/// log2 of the number of small pages per superpage (512 pages = 2 MiB at a
/// standard 4 KiB page size).
pub const LEVEL0_ORDER: u32 = 9;

/// Number of small pages covered by one reservation.
pub const NPAGES: usize = 1 << LEVEL0_ORDER;

/// Small page size, in bytes. Only used to size `LEVEL0_SIZE`.
pub const PAGE_SIZE: usize = 4096;

/// Byte size of one superpage-sized region.
pub const LEVEL0_SIZE: usize = NPAGES * PAGE_SIZE;

/// Bits per popmap word.
pub const NBPOPMAP: usize = u64::BITS as usize;

/// Number of words needed to hold `NPAGES` bits.
pub const NPOPMAP: usize = (NPAGES + NBPOPMAP - 1) / NBPOPMAP;

const_assert!(NPAGES.is_power_of_two());
const_assert!(NPOPMAP * NBPOPMAP >= NPAGES);

bitflags::bitflags! {
    /// Per-reservation flag bits (invariant #3 and #9 reference these).
    #[derive(Default)]
    pub struct ReservFlags: u8 {
        /// Linked into the global PartPop queue.
        const IN_PARTPOPQ   = 0b0000_0001;
        /// Reparented by `rename`; retained for observability/debugging.
        const TRANSFERRED   = 0b0000_0010;
        /// Collides on `pindex` with another reservation in the same
        /// object after a shadow-object collapse; will never fully
        /// populate until a migrator reconciles the pair.
        const NEEDS_MIGRATE = 0b0000_0100;
        /// Inert sentinel used to hold a queue position across a
        /// lock-release window. Never mutated once inserted.
        const MARKER        = 0b0000_1000;
        /// `prepopulate` failed for a reservation-intrinsic reason; the
        /// daemon will not retry this reservation until it is torn down.
        const BAD           = 0b0001_0000;
    }
}

/// Per-superpage metadata (C3).
///
/// Generic over `O`, the owning object's identifier type, so that the
/// engine need not know anything about the real object layer beyond
/// equality comparison (see [`crate::backend::Backend`]).
pub struct Reservation<O> {
    /// The owning object, or `None` if this slot is free. Modeled as a weak
    /// observation: re-checked under the queue lock before every use, never
    /// an owning reference (see the Design Notes on cyclic references).
    pub(crate) object: Option<O>,
    /// Logical offset of this reservation's first page within `object`.
    /// Always a multiple of `NPAGES` while active (invariant #7).
    pub(crate) pindex: u64,
    /// Base physical address of the underlying small-page run, or `None` if
    /// this slot's physical region doesn't fully align to a superpage and
    /// must never be activated (invariant #1).
    pub(crate) phys_base: Option<PhysAddr>,
    pub(crate) popcnt: u32,
    pub(crate) timestamp: u64,
    pub(crate) flags: ReservFlags,
    pub(crate) popmap: PopMap,
    /// First page of the run carries the "promoted" marker once full
    /// (invariant #4). Modeled locally rather than reaching into a real
    /// page descriptor, since psind is otherwise purely a page-layer
    /// concept the engine only ever sets to 0 or 1 for its own run.
    pub(crate) psind: u8,
    pub(crate) partpopq_prev: Option<ReservationId>,
    pub(crate) partpopq_next: Option<ReservationId>,
}

impl<O: Copy + Eq> Reservation<O> {
    pub const fn invalid() -> Reservation<O> {
        Reservation {
            object: None,
            pindex: 0,
            phys_base: None,
            popcnt: 0,
            timestamp: 0,
            flags: ReservFlags::empty(),
            popmap: PopMap::empty(),
            psind: 0,
            partpopq_prev: None,
            partpopq_next: None,
        }
    }

    /// Invalid slots (C2): the physical region backing this slot does not
    /// fully align to a superpage and must never be activated.
    pub fn is_valid_slot(&self) -> bool {
        self.phys_base.is_some()
    }

    /// Active iff it has an owning object (invariant #2).
    pub fn is_active(&self) -> bool {
        self.object.is_some()
    }

    pub fn is_marker(&self) -> bool {
        self.flags.contains(ReservFlags::MARKER)
    }

    pub fn is_full(&self) -> bool {
        self.popcnt as usize == NPAGES
    }

    pub fn object(&self) -> Option<O> {
        self.object
    }

    pub fn pindex(&self) -> u64 {
        self.pindex
    }

    pub fn popcnt(&self) -> u32 {
        self.popcnt
    }

    pub fn flags(&self) -> ReservFlags {
        self.flags
    }

    pub fn phys_base(&self) -> Option<PhysAddr> {
        self.phys_base
    }

    pub fn timestamp(&self) -> u64 {
        self.timestamp
    }

    pub fn psind(&self) -> u8 {
        self.psind
    }

    pub fn popmap(&self) -> &PopMap {
        &self.popmap
    }

    /// `true` iff `pindex` falls within this reservation's covered range.
    pub fn has_pindex(&self, pindex: u64) -> bool {
        self.is_active() && pindex >= self.pindex && pindex < self.pindex + NPAGES as u64
    }

    fn index_of(&self, pindex: u64) -> usize {
        (pindex - self.pindex) as usize
    }

    pub fn is_populated(&self, pindex: u64) -> bool {
        self.popmap.is_set(self.index_of(pindex))
    }
}
