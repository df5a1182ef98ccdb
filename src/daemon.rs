//! Async daemon (C8): pre-population/pre-zeroing of nearly-full
//! reservations and eviction of inactive ones, plus the synchronous
//! promotion predicates the fault path queries directly.
//!
//! `daemon_cycle` runs one iteration and is the unit a real caller would
//! spawn repeatedly (e.g. `loop { engine.daemon_cycle(tick_hz); sleep(...) }`,
//! or as a periodic kernel task); spawning that loop is outside this crate,
//! which only owns what one cycle does.

use crate::backend::{Backend, ObjectKind};
use crate::engine::{Engine, EngineState, MarkerKind};
use crate::addr::ReservationId;
use crate::reservation::{ReservFlags, NPAGES};

impl<B: Backend> Engine<B> {
    /// Eligibility check for pre-population (§4.6 step 1): backed by an
    /// anonymous or swap object with no backing object, linked into
    /// PartPop with no other flag set, and past `pop_threshold`.
    fn is_prepop_eligible(&self, state: &EngineState<B::ObjectId>, id: ReservationId) -> bool {
        let rv = state.get(id);
        let object = match rv.object() {
            Some(o) => o,
            None => return false,
        };
        if rv.flags() != ReservFlags::IN_PARTPOPQ {
            return false;
        }
        if (rv.popcnt() as usize) < self.tunables.pop_threshold() {
            return false;
        }
        match self.backend.object_kind(object) {
            ObjectKind::Anonymous | ObjectKind::Swap => {}
            _ => return false,
        }
        self.backend.object_backing(object).is_none()
    }

    /// `prepopulate(rv)` contract (§4.6). Runs without the queue lock held
    /// except for the brief windows that touch reservation state;
    /// re-checks `rv.object` at every step boundary since a concurrent
    /// `break`/`break_all` may tear the reservation down mid-flight.
    /// Exactly one of `pop_succ`/`pop_fail`/`pop_broken` increments per call
    /// (invariant #9). Returns the number of pages actually zeroed, so
    /// `async_scan` can charge it against `zero_budget`.
    fn prepopulate(&self, id: ReservationId) -> usize {
        let mut zeroed = 0usize;
        let object = {
            let state = self.state.lock();
            match state.get(id).object() {
                Some(o) => o,
                None => return zeroed,
            }
        };
        self.backend.object_write_lock(object);

        loop {
            let (index, pindex, addr) = {
                let state = self.state.lock();
                let rv = state.get(id);
                if rv.object() != Some(object) {
                    self.backend.object_write_unlock(object);
                    crate::stats::Stats::incr(&self.stats.pop_broken);
                    return zeroed;
                }
                let next = rv.popmap().next_clear_from(0);
                if next >= NPAGES {
                    break;
                }
                let addr = rv.phys_base().expect("active reservation always has a valid phys_base") + next * crate::reservation::PAGE_SIZE;
                (next, rv.pindex() + next as u64, addr)
            };

            let page = match self.backend.page_from_phys(object, pindex, addr) {
                Some(p) => p,
                None => {
                    let mut state = self.state.lock();
                    if state.get(id).object() == Some(object) {
                        state.get_mut(id).flags.insert(ReservFlags::BAD);
                    }
                    drop(state);
                    self.backend.object_write_unlock(object);
                    crate::stats::Stats::incr(&self.stats.pop_fail);
                    return zeroed;
                }
            };

            if self.backend.page_object(page) != Some(object) {
                self.backend.page_xunbusy(page);
                self.backend.object_write_unlock(object);
                crate::stats::Stats::incr(&self.stats.pop_broken);
                return zeroed;
            }

            if !self.backend.page_has_zero_flag(page) {
                self.backend.object_write_unlock(object);
                self.backend.page_zero_idle(page);
                self.backend.object_write_lock(object);
                zeroed += 1;
                crate::stats::Stats::incr(&self.stats.async_prezero);
            } else {
                crate::stats::Stats::incr(&self.stats.async_skipzero);
            }

            {
                let mut state = self.state.lock();
                if state.get(id).object() != Some(object) {
                    drop(state);
                    self.backend.page_xunbusy(page);
                    self.backend.object_write_unlock(object);
                    crate::stats::Stats::incr(&self.stats.pop_broken);
                    return zeroed;
                }
                let now = self.tick();
                state.populate(id, index, now);
            }
            self.backend.page_set_valid(page, true);
            self.backend.page_activate(page);
            self.backend.page_xunbusy(page);
        }

        self.backend.object_write_unlock(object);
        crate::stats::Stats::incr(&self.stats.pop_succ);
        zeroed
    }

    /// Tail-first pre-population scan (§4.6 step 1), bounded by
    /// `pop_budget` successful pre-populations and `zero_budget` pages
    /// actually zeroed. Uses the async marker to hold its scan position
    /// across the lock drop inside `prepopulate`.
    ///
    /// A candidate is skipped for this cycle (left for the next one) rather
    /// than started and cut short if its worst-case zeroing cost (every
    /// still-clear slot) would exceed the remaining `zero_budget`; this
    /// keeps `prepopulate` an all-or-nothing step w.r.t. invariant #9
    /// instead of having to define a fourth, budget-exhausted outcome.
    fn async_scan(&self) {
        if self.tunables.pop_budget() == 0 {
            return;
        }
        let marker = {
            let state = self.state.lock();
            state.marker_id(MarkerKind::Async)
        };
        let mut budget = self.tunables.pop_budget();
        let mut zero_budget = self.tunables.zero_budget();
        let mut cur = {
            let state = self.state.lock();
            state.prev_non_marker(state.partpop_tail)
        };
        while budget > 0 {
            let id = match cur {
                Some(id) => id,
                None => break,
            };
            let (eligible, worst_case_zero) = {
                let state = self.state.lock();
                (self.is_prepop_eligible(&state, id), NPAGES - state.get(id).popcnt() as usize)
            };
            if !eligible || worst_case_zero > zero_budget {
                let state = self.state.lock();
                cur = state.prev_non_marker(state.partpop_prev(id));
                continue;
            }
            {
                let mut state = self.state.lock();
                state.queue_insert_before(marker, id);
            }
            let zeroed = self.prepopulate(id);
            zero_budget = zero_budget.saturating_sub(zeroed);
            let mut state = self.state.lock();
            cur = state.prev_non_marker(state.partpop_prev(marker));
            state.queue_unlink(marker);
            budget -= 1;
        }
    }

    /// Head-first eviction scan (§4.6 step 2), bounded by `migrate_budget`
    /// pages. Evicts any reservation past `inactive_thre` ticks since its
    /// last touch, or flagged `NEEDS_MIGRATE`.
    fn evict_scan(&self) {
        let budget_total = self.tunables.migrate_budget();
        if budget_total == 0 {
            return;
        }
        let marker = {
            let state = self.state.lock();
            state.marker_id(MarkerKind::Evict)
        };
        let mut budget = budget_total;
        let mut cur = {
            let state = self.state.lock();
            state.next_non_marker(state.partpop_head)
        };
        let now = self.tick();
        while budget > 0 {
            let id = match cur {
                Some(id) => id,
                None => break,
            };
            let (evict, popcnt, next_cur) = {
                let state = self.state.lock();
                let rv = state.get(id);
                let age = now.saturating_sub(rv.timestamp());
                let evict = (age as usize) > self.tunables.inactive_thre() || rv.flags().contains(ReservFlags::NEEDS_MIGRATE);
                let next = state.next_non_marker(state.partpop_next(id));
                (evict, rv.popcnt() as usize, next)
            };
            if !evict {
                cur = next_cur;
                continue;
            }
            {
                let mut state = self.state.lock();
                state.queue_insert_after(marker, id);
            }
            self.reclaim(id);
            let mut state = self.state.lock();
            cur = state.next_non_marker(state.partpop_next(marker));
            state.queue_unlink(marker);
            budget = budget.saturating_sub(popcnt.max(1));
        }
    }

    /// One daemon cycle (§4.6): pre-population then eviction, each gated by
    /// its own tunable, followed by the cycle's sleep duration in ticks
    /// (the caller owns the actual sleep/reschedule).
    pub fn daemon_cycle(&self, tick_hz: usize) -> usize {
        if self.tunables.enable_prezero() {
            self.async_scan();
        }
        if self.tunables.enable_compact() {
            self.evict_scan();
        }
        self.tunables.sleep_ticks(tick_hz)
    }

    fn satisfy_promotion(&self, page: B::PageRef, check_popcount: bool) -> bool {
        let object = match self.backend.page_object(page) {
            Some(o) => o,
            None => return false,
        };
        let pindex = self.backend.page_pindex(page);
        let pa = self.backend.page_phys_addr(page);
        let state = self.state.lock();
        let id = state.array.id_of_phys(pa);
        let rv = state.array.get(id);
        if !rv.is_valid_slot() || !rv.is_active() || rv.object() != Some(object) || !rv.has_pindex(pindex) {
            return false;
        }
        let index = (pindex - rv.pindex()) as usize;
        if !rv.popmap().is_set(index) {
            return false;
        }
        if rv.flags() != ReservFlags::IN_PARTPOPQ {
            return false;
        }
        if check_popcount && (rv.popcnt() as usize) < self.tunables.sync_popthreshold() {
            return false;
        }
        true
    }

    /// `satisfy_sync_promotion(page)` (§4.6): queried synchronously by the
    /// fault path to decide whether to perform a superpage mapping now.
    pub fn satisfy_sync_promotion(&self, page: B::PageRef) -> bool {
        self.satisfy_promotion(page, true)
    }

    /// `satisfy_adj_promotion(page)` (§4.6): same, without the popcount
    /// threshold check.
    pub fn satisfy_adj_promotion(&self, page: B::PageRef) -> bool {
        self.satisfy_promotion(page, false)
    }
}
