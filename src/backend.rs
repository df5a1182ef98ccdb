//! Capability interfaces (§6): the physical allocator, object layer, and
//! page layer are external collaborators, consumed only through this
//! trait. The engine is generic over `Backend` so it can be exercised in
//! tests against an in-memory mock, per the Design Notes' guidance on
//! polymorphism.

use crate::addr::{PhysAddr, ReservationId};

/// The kind of object a reservation belongs to; only anonymous/swap-backed
/// objects without a backing object are eligible for daemon pre-population
/// (§4.6).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ObjectKind {
    Anonymous,
    Swap,
    Vnode,
    Device,
}

bitflags::bitflags! {
    /// Flags passed to `Backend::page_alloc`.
    pub struct PageAllocFlags: u8 {
        /// Allocate only from the target reservation's own physical run,
        /// failing rather than falling back to the generic free pool.
        const RESERVONLY = 0b01;
    }
}

/// Everything SRE needs from the physical allocator, the object layer, and
/// the page layer, expressed as one capability interface.
///
/// `ObjectId` and `PageRef` are opaque handles owned by the caller's real
/// object/page implementation; the engine never dereferences them itself,
/// only compares them for equality and passes them back through this
/// trait.
pub trait Backend {
    type ObjectId: Copy + Eq;
    type PageRef: Copy + Eq;

    // --- physical allocator -------------------------------------------
    /// Request a contiguous, aligned run of physical memory.
    fn alloc_contig(
        &self,
        npages: usize,
        low: PhysAddr,
        high: PhysAddr,
        alignment: usize,
        boundary: usize,
    ) -> Option<PhysAddr>;

    /// Return a contiguous run to the physical allocator.
    fn free_contig(&self, base: PhysAddr, count: usize);

    /// Free-superpage count, used only for metrics (C9).
    fn count_order_9(&self) -> usize;

    /// Per-reservation page migration, used by eviction.
    fn reclaim_run(&self, count: usize, base: PhysAddr, high: PhysAddr) -> bool;

    // --- object layer ---------------------------------------------------
    fn object_write_lock(&self, obj: Self::ObjectId);
    fn object_write_unlock(&self, obj: Self::ObjectId);

    /// Link `rv` at the head of `obj`'s `rvq` list. `pindex` is `rv`'s
    /// current base offset, mirrored here because in the real object layer
    /// `rvq` is a list of the reservation records themselves (so their
    /// `pindex` is always available); a `Backend` that isn't backed by the
    /// same records needs it passed in explicitly to support
    /// `rvq_find_collision`.
    fn rvq_link(&self, obj: Self::ObjectId, rv: ReservationId, pindex: u64);
    /// Unlink `rv` from `obj`'s `rvq` list.
    fn rvq_unlink(&self, obj: Self::ObjectId, rv: ReservationId);
    /// Scan `obj.rvq` for a reservation (other than `exclude`) covering
    /// `pindex`, used by `rename`'s collision detection.
    fn rvq_find_collision(&self, obj: Self::ObjectId, pindex: u64, exclude: ReservationId) -> Option<ReservationId>;
    /// Every reservation currently linked into `obj.rvq`, used by
    /// `break_all`.
    fn rvq_members(&self, obj: Self::ObjectId) -> alloc::vec::Vec<ReservationId>;

    fn object_size_pages(&self, obj: Self::ObjectId) -> u64;
    fn object_kind(&self, obj: Self::ObjectId) -> ObjectKind;
    fn object_backing(&self, obj: Self::ObjectId) -> Option<Self::ObjectId>;
    fn object_is_vnode_backed(&self, obj: Self::ObjectId) -> bool;

    // --- page layer -------------------------------------------------------
    fn page_object(&self, page: Self::PageRef) -> Option<Self::ObjectId>;
    fn page_pindex(&self, page: Self::PageRef) -> u64;
    /// Physical address backing `page`; used to map an already-allocated
    /// page back to its candidate reservation slot via `from_phys`.
    fn page_phys_addr(&self, page: Self::PageRef) -> PhysAddr;

    /// The page immediately preceding `pindex` in `obj`'s page list, if any.
    fn mpred(&self, obj: Self::ObjectId, pindex: u64) -> Option<Self::PageRef>;
    /// The page immediately following `pindex` in `obj`'s page list, if any.
    fn msucc(&self, obj: Self::ObjectId, pindex: u64) -> Option<Self::PageRef>;
    /// The last page at or before `max_pindex`, used by eviction's
    /// backing-object scan.
    fn find_most(&self, obj: Self::ObjectId, max_pindex: u64) -> Option<Self::PageRef>;

    /// Allocate a page at `pindex` within `obj` from the generic free pool,
    /// with no associated reservation. Used only for the non-reservation
    /// fallback path in `alloc_contig` when a neighbor reservation
    /// truncates the request below a full superpage.
    fn page_alloc(&self, obj: Self::ObjectId, pindex: u64, flags: PageAllocFlags) -> Option<Self::PageRef>;

    /// Bind the already-reserved physical page at `addr` to `(obj, pindex)`
    /// and return its handle — the page-table-array analogue of
    /// `PHYS_TO_VM_PAGE`, used once the engine itself has already chosen
    /// `addr` via a reservation's own popmap-backed run. Fails only if the
    /// object layer finds `pindex` already occupied by a page the
    /// reservation didn't know about.
    fn page_from_phys(&self, obj: Self::ObjectId, pindex: u64, addr: PhysAddr) -> Option<Self::PageRef>;

    fn page_has_zero_flag(&self, page: Self::PageRef) -> bool;
    fn page_zero_idle(&self, page: Self::PageRef);
    fn page_activate(&self, page: Self::PageRef);
    fn page_xunbusy(&self, page: Self::PageRef);
    fn page_set_valid(&self, page: Self::PageRef, valid: bool);
}
