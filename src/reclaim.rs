//! Break / reclaim (C6): tear down a reservation and return its free runs
//! to the external physical allocator in maximal contiguous slices.

use alloc::vec::Vec;

use crate::addr::{PhysAddr, ReservationId};
use crate::backend::Backend;
use crate::engine::{Engine, EngineState};
use crate::popmap::PopMap;
use crate::reservation::{ReservFlags, LEVEL0_SIZE, NPAGES, PAGE_SIZE};

impl<B: Backend> Engine<B> {
    /// `break(rv)` (§4.4). Precondition: `rv` is active and not in the
    /// PartPop queue; callers (`reclaim`, `break_all`) that might find it
    /// still linked must unlink it first.
    fn break_locked(&self, state: &mut EngineState<B::ObjectId>, id: ReservationId) {
        debug_assert!(state.get(id).is_active());
        debug_assert!(!state.get(id).flags().contains(ReservFlags::IN_PARTPOPQ));

        let base = state.get(id).phys_base().expect("active reservation always has a valid phys_base");
        let runs: Vec<(usize, usize)> = state.get(id).popmap().clear_runs().collect();
        let mut returned = 0usize;
        for (start, len) in runs {
            self.backend.free_contig(base + start * PAGE_SIZE, len);
            returned += len;
        }
        debug_assert_eq!(returned, NPAGES - state.get(id).popcnt() as usize);

        let rv = state.get_mut(id);
        rv.popmap = PopMap::empty();
        rv.popcnt = 0;
        rv.psind = 0;
        rv.object = None;
        rv.flags = ReservFlags::empty();
        debug_assert_eq!(rv.popcnt(), 0);
    }

    /// `break(rv)` (§4.4), exposed as a standalone operation over a
    /// `ReservationId`. No-op if the slot is no longer active (it may have
    /// been torn down by a concurrent depopulate down to zero).
    pub fn break_reservation(&self, id: ReservationId) {
        let object = {
            let state = self.state.lock();
            state.get(id).object()
        };
        let object = match object {
            Some(o) => o,
            None => return,
        };
        self.backend.object_write_lock(object);
        let did_break = {
            let mut state = self.state.lock();
            if state.get(id).object() != Some(object) {
                false
            } else {
                self.break_locked(&mut state, id);
                true
            }
        };
        if did_break {
            self.backend.rvq_unlink(object, id);
            crate::stats::Stats::incr(&self.stats.broken);
        }
        self.backend.object_write_unlock(object);
    }

    /// `reclaim(rv)` (§4.4): same as `break`, but unlinks from the PartPop
    /// queue first.
    pub fn reclaim(&self, id: ReservationId) {
        let object = {
            let state = self.state.lock();
            state.get(id).object()
        };
        let object = match object {
            Some(o) => o,
            None => return,
        };
        self.backend.object_write_lock(object);
        let did_reclaim = {
            let mut state = self.state.lock();
            if state.get(id).object() != Some(object) {
                false
            } else {
                if state.get(id).flags().contains(ReservFlags::IN_PARTPOPQ) {
                    state.queue_unlink(id);
                    state.get_mut(id).flags.remove(ReservFlags::IN_PARTPOPQ);
                }
                self.break_locked(&mut state, id);
                true
            }
        };
        if did_reclaim {
            self.backend.rvq_unlink(object, id);
            crate::stats::Stats::incr(&self.stats.reclaimed);
        }
        self.backend.object_write_unlock(object);
    }

    /// `reclaim_inactive()` (§4.4): reclaim the head of the PartPop queue,
    /// skipping markers. Returns whether a reclaim occurred.
    pub fn reclaim_inactive(&self) -> bool {
        let id = {
            let state = self.state.lock();
            state.next_non_marker(state.partpop_head)
        };
        match id {
            Some(id) => {
                self.reclaim(id);
                true
            }
            None => false,
        }
    }

    /// `reclaim_contig(npages, low, high, alignment, boundary)` (§4.4):
    /// scans the PartPop queue front-to-back for the first reservation
    /// overlapping `[low, high)` with a clear run satisfying the
    /// constraints, reclaiming it on the first match.
    pub fn reclaim_contig(&self, npages: usize, low: PhysAddr, high: PhysAddr, alignment: usize, boundary: usize) -> bool {
        let align = alignment.max(1);
        let candidate = {
            let state = self.state.lock();
            let mut found = None;
            'outer: for id in state.walk_front_to_back() {
                let rv = state.get(id);
                let base = match rv.phys_base() {
                    Some(b) => b,
                    None => continue,
                };
                if base.value() >= high.value() || base.value() + LEVEL0_SIZE <= low.value() {
                    continue;
                }
                for (start, len) in rv.popmap().clear_runs() {
                    if len < npages {
                        continue;
                    }
                    let run_addr = base + start * PAGE_SIZE;
                    if run_addr.value() % align != 0 {
                        continue;
                    }
                    if boundary > 0 {
                        let end = run_addr.value() + npages * PAGE_SIZE - 1;
                        if run_addr.value() / boundary != end / boundary {
                            continue;
                        }
                    }
                    found = Some(id);
                    break 'outer;
                }
            }
            found
        };
        match candidate {
            Some(id) => {
                self.reclaim(id);
                true
            }
            None => false,
        }
    }

    /// `break_all(object)` (SPEC_FULL.md §4.4, ADDED): tear down every
    /// reservation linked into `object.rvq`, used when an object is
    /// destroyed or a vnode-backed object is truncated.
    pub fn break_all(&self, object: B::ObjectId) {
        loop {
            let members = self.backend.rvq_members(object);
            let id = match members.first() {
                Some(id) => *id,
                None => break,
            };
            {
                let mut state = self.state.lock();
                if state.get(id).object() == Some(object) && state.get(id).flags().contains(ReservFlags::IN_PARTPOPQ) {
                    state.queue_unlink(id);
                    state.get_mut(id).flags.remove(ReservFlags::IN_PARTPOPQ);
                }
            }
            self.break_reservation(id);
        }
    }
}
