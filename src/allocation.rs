//! Allocation path (C5): `alloc_page` and `alloc_contig`, plus the
//! `populate`/`depopulate` primitives they (and the daemon, and reclaim)
//! build on.

use crate::addr::{PhysAddr, ReservationId};
use crate::backend::Backend;
use crate::engine::{Engine, EngineState};
use crate::error::ReservError;
use crate::reservation::{ReservFlags, LEVEL0_SIZE, NPAGES};

fn round_up(value: usize, multiple: usize) -> usize {
    ((value + multiple - 1) / multiple) * multiple
}

impl<O: Copy + Eq> EngineState<O> {
    /// `populate(rv, index)` (§4.3). Requires the queue lock held (enforced
    /// by `&mut self`).
    pub(crate) fn populate(&mut self, id: ReservationId, index: usize, now: u64) {
        debug_assert!(self.get(id).popmap.is_clear(index));
        debug_assert!((self.get(id).popcnt as usize) < NPAGES);
        if self.get(id).flags.contains(ReservFlags::IN_PARTPOPQ) {
            self.queue_unlink(id);
        }
        let rv = self.get_mut(id);
        rv.popmap.set(index);
        rv.popcnt += 1;
        rv.timestamp = now;
        if rv.popcnt as usize == NPAGES {
            rv.flags.remove(ReservFlags::IN_PARTPOPQ);
            rv.psind = 1;
        } else {
            rv.flags.insert(ReservFlags::IN_PARTPOPQ);
            self.queue_link_tail(id);
        }
    }

    /// `depopulate(rv, index)` (§4.3). Returns `true` once `popcnt` reaches
    /// zero; the caller (here, or `break`/`reclaim`) is then responsible for
    /// the rest of teardown: unlinking from the object list and returning
    /// the physical run to the allocator.
    pub(crate) fn depopulate(&mut self, id: ReservationId, index: usize, now: u64) -> bool {
        debug_assert!(self.get(id).popmap.is_set(index));
        debug_assert!(self.get(id).popcnt > 0);
        if self.get(id).flags.contains(ReservFlags::IN_PARTPOPQ) {
            self.queue_unlink(id);
        }
        let rv = self.get_mut(id);
        rv.popmap.clear(index);
        rv.popcnt -= 1;
        rv.timestamp = now;
        if rv.popcnt == 0 {
            rv.flags.remove(ReservFlags::IN_PARTPOPQ);
            rv.psind = 0;
            true
        } else {
            rv.flags.insert(ReservFlags::IN_PARTPOPQ);
            self.queue_link_tail(id);
            false
        }
    }
}

impl<B: Backend> Engine<B> {
    /// Finds an existing reservation covering `pindex` in `object` via
    /// adjacency (the FOUND label in §4.3 step 2).
    fn find_adjacent(
        &self,
        state: &EngineState<B::ObjectId>,
        object: B::ObjectId,
        pindex: u64,
        candidates: [Option<B::PageRef>; 2],
    ) -> Option<ReservationId> {
        for page in candidates.into_iter().flatten() {
            if self.backend.page_object(page) != Some(object) {
                continue;
            }
            let pa = self.backend.page_phys_addr(page);
            let id = state.array.id_of_phys(pa);
            let rv = state.array.get(id);
            if rv.is_valid_slot() && rv.is_active() && rv.object() == Some(object) && rv.has_pindex(pindex) {
                return Some(id);
            }
        }
        None
    }

    /// `alloc_page(object, pindex, mpred)` (§4.3), as a `Result` so the
    /// caller can distinguish why it failed before collapsing to `None`.
    fn try_alloc_page(&self, object: B::ObjectId, pindex: u64) -> Result<B::PageRef, ReservError> {
        if pindex >= self.backend.object_size_pages(object) {
            log::trace!("reservation_engine: alloc_page: pindex {} past object size, infeasible", pindex);
            return Err(ReservError::InfeasibleReservation);
        }

        let mpred = self.backend.mpred(object, pindex);
        let msucc = self.backend.msucc(object, pindex);
        let mut state = self.state.lock();

        if let Some(found) = self.find_adjacent(&state, object, pindex, [mpred, msucc]) {
            let index = (pindex - state.get(found).pindex()) as usize;
            if state.get(found).popmap().is_set(index) {
                log::debug!("reservation_engine: alloc_page: {} (pindex {})", ReservError::Collision, pindex);
                return Err(ReservError::Collision);
            }
            let now = self.tick();
            state.populate(found, index, now);
            let addr = state.get(found).phys_base().expect("active reservation always has a valid phys_base") + index * crate::reservation::PAGE_SIZE;
            drop(state);
            return self.backend.page_from_phys(object, pindex, addr).ok_or(ReservError::Collision);
        }

        let first = pindex - (pindex % NPAGES as u64);

        if let Some(p) = mpred {
            if self.backend.page_object(p) == Some(object) {
                let rv = state.array.from_phys(self.backend.page_phys_addr(p));
                if rv.is_valid_slot() && rv.is_active() && rv.object() == Some(object) && rv.pindex() + NPAGES as u64 > first {
                    log::trace!("reservation_engine: alloc_page: {} (would overlap left neighbor)", ReservError::InfeasibleReservation);
                    return Err(ReservError::InfeasibleReservation);
                }
            }
        }
        if let Some(p) = msucc {
            if self.backend.page_object(p) == Some(object) {
                let rv = state.array.from_phys(self.backend.page_phys_addr(p));
                if rv.is_valid_slot() && rv.is_active() && rv.object() == Some(object) && rv.pindex() < first + NPAGES as u64 {
                    log::trace!("reservation_engine: alloc_page: {} (would overlap right neighbor)", ReservError::InfeasibleReservation);
                    return Err(ReservError::InfeasibleReservation);
                }
            }
        }
        if first + NPAGES as u64 > self.backend.object_size_pages(object) && self.backend.object_is_vnode_backed(object) {
            log::trace!("reservation_engine: alloc_page: {} (would extend past vnode-backed object size)", ReservError::InfeasibleReservation);
            return Err(ReservError::InfeasibleReservation);
        }

        let base = self
            .backend
            .alloc_contig(NPAGES, PhysAddr::new(0), PhysAddr::new(usize::MAX), LEVEL0_SIZE, 0)
            .ok_or(ReservError::AllocatorExhausted)?;
        drop(state);

        self.backend.object_write_lock(object);
        let mut state = self.state.lock();
        let id = state.array.id_of_phys(base);
        {
            let rv = state.array.get_mut(id);
            if !rv.is_valid_slot() || rv.is_active() {
                drop(state);
                self.backend.object_write_unlock(object);
                self.backend.free_contig(base, NPAGES);
                log::warn!("reservation_engine: alloc_page: {} (allocator returned an unusable or already-active slot)", ReservError::AllocatorExhausted);
                return Err(ReservError::AllocatorExhausted);
            }
            rv.object = Some(object);
            rv.pindex = first;
        }
        let index = (pindex - first) as usize;
        let now = self.tick();
        state.populate(id, index, now);
        drop(state);
        self.backend.rvq_link(object, id, first);
        self.backend.object_write_unlock(object);

        self.backend
            .page_from_phys(object, pindex, base + index * crate::reservation::PAGE_SIZE)
            .ok_or(ReservError::Collision)
    }

    /// `alloc_page(object, pindex, mpred)` (§4.3).
    pub fn alloc_page(&self, object: B::ObjectId, pindex: u64) -> Option<B::PageRef> {
        self.try_alloc_page(object, pindex).ok()
    }

    /// `alloc_contig(object, pindex, npages, low, high, alignment, boundary,
    /// mpred)` (§4.3), as a `Result` so the caller can distinguish why it
    /// failed before collapsing to `None`. Reservations are always
    /// `pindex`-aligned to `NPAGES` (invariant #7), so the covered range is
    /// widened to the enclosing aligned chunk(s) before requesting physical
    /// memory. The allocated physical run always begins at a reservation
    /// boundary but does not always end at one: when a neighboring
    /// reservation leaves no room for the final, partial chunk, that
    /// trailing remainder is still part of the allocated run, just never
    /// turned into a reservation of its own.
    #[allow(clippy::too_many_arguments)]
    fn try_alloc_contig(
        &self,
        object: B::ObjectId,
        pindex: u64,
        npages: usize,
        low: PhysAddr,
        high: PhysAddr,
        alignment: usize,
        boundary: usize,
    ) -> Result<B::PageRef, ReservError> {
        if npages == 0 {
            return Err(ReservError::InfeasibleReservation);
        }
        let first = pindex - (pindex % NPAGES as u64);
        let lead = (pindex - first) as usize;
        let minpages = lead + npages;

        let mut state = self.state.lock();

        let msucc = self.backend.msucc(object, pindex + npages as u64 - 1);
        let maxpages = round_up(minpages, NPAGES);
        let mut allocpages = maxpages;
        if let Some(p) = msucc {
            if self.backend.page_object(p) == Some(object) {
                let succ_rv = state.array.from_phys(self.backend.page_phys_addr(p));
                if succ_rv.is_valid_slot() && succ_rv.is_active() && succ_rv.object() == Some(object) {
                    let succ_first = succ_rv.pindex();
                    if succ_first >= first && succ_first < first + allocpages as u64 {
                        if maxpages == NPAGES {
                            drop(state);
                            log::trace!(
                                "reservation_engine: alloc_contig: {} (right neighbor leaves no room for a whole reservation)",
                                ReservError::InfeasibleReservation
                            );
                            return Err(ReservError::InfeasibleReservation);
                        }
                        allocpages = minpages;
                    }
                }
            }
        }
        drop(state);

        let align = alignment.max(LEVEL0_SIZE);
        let bound = if boundary > LEVEL0_SIZE { boundary } else { 0 };
        let base = self
            .backend
            .alloc_contig(allocpages, low, high, align, bound)
            .ok_or(ReservError::AllocatorExhausted)?;

        self.backend.object_write_lock(object);
        let mut state = self.state.lock();
        let whole_chunks = allocpages / NPAGES;
        let mut linked = alloc::vec::Vec::with_capacity(whole_chunks);
        for c in 0..whole_chunks {
            let chunk_base = base + c * LEVEL0_SIZE;
            let id = state.array.id_of_phys(chunk_base);
            let chunk_first = first + (c * NPAGES) as u64;
            let rv = state.array.get_mut(id);
            if !rv.is_valid_slot() || rv.is_active() {
                drop(state);
                self.backend.object_write_unlock(object);
                self.backend.free_contig(base, allocpages);
                log::warn!("reservation_engine: alloc_contig: {} (target range intersects an already-populated slot)", ReservError::Collision);
                return Err(ReservError::Collision);
            }
            rv.object = Some(object);
            rv.pindex = chunk_first;
            linked.push((id, chunk_first));
        }
        drop(state);
        for (id, chunk_first) in linked {
            self.backend.rvq_link(object, id, chunk_first);
        }
        self.backend.object_write_unlock(object);

        let covered = whole_chunks * NPAGES;
        let mut state = self.state.lock();
        for i in 0..minpages.min(covered) {
            let chunk = i / NPAGES;
            let chunk_base = base + chunk * LEVEL0_SIZE;
            let id = state.array.id_of_phys(chunk_base);
            let index = i % NPAGES;
            if state.get(id).popmap.is_set(index) {
                drop(state);
                self.backend.free_contig(base, allocpages);
                return Err(ReservError::Collision);
            }
            let now = self.tick();
            state.populate(id, index, now);
        }
        drop(state);

        let mut first_page = None;
        for i in 0..npages {
            let overall = lead + i;
            let chunk = overall / NPAGES;
            let offset = overall % NPAGES;
            let addr = base + chunk * LEVEL0_SIZE + offset * crate::reservation::PAGE_SIZE;
            let page = self.backend.page_from_phys(object, pindex + i as u64, addr).ok_or(ReservError::Collision)?;
            if i == 0 {
                first_page = Some(page);
            }
        }
        first_page.ok_or(ReservError::InfeasibleReservation)
    }

    /// `alloc_contig(object, pindex, npages, low, high, alignment, boundary,
    /// mpred)` (§4.3).
    #[allow(clippy::too_many_arguments)]
    pub fn alloc_contig(
        &self,
        object: B::ObjectId,
        pindex: u64,
        npages: usize,
        low: PhysAddr,
        high: PhysAddr,
        alignment: usize,
        boundary: usize,
    ) -> Option<B::PageRef> {
        self.try_alloc_contig(object, pindex, npages, low, high, alignment, boundary).ok()
    }

    /// `free_page(page)`: the depopulation entry point exposed to the
    /// fault/free path. Returns `true` if the reservation was destroyed as
    /// a result (its physical run was returned to the allocator).
    pub fn free_page(&self, page: B::PageRef) -> bool {
        let object = match self.backend.page_object(page) {
            Some(o) => o,
            None => return false,
        };
        let pindex = self.backend.page_pindex(page);
        let pa = self.backend.page_phys_addr(page);

        let mut state = self.state.lock();
        let id = state.array.id_of_phys(pa);
        let rv = state.array.get(id);
        if !rv.is_valid_slot() || !rv.is_active() || rv.object() != Some(object) {
            return false;
        }
        let index = (pindex - rv.pindex()) as usize;
        let now = self.tick();
        let emptied = state.depopulate(id, index, now);
        if emptied {
            let base = state.get(id).phys_base().expect("valid slot always has phys_base");
            {
                let rv = state.array.get_mut(id);
                rv.object = None;
                rv.flags = ReservFlags::empty();
            }
            drop(state);
            self.backend.rvq_unlink(object, id);
            self.backend.free_contig(base, NPAGES);
            crate::stats::Stats::incr(&self.stats.freed);
            true
        } else {
            false
        }
    }
}
