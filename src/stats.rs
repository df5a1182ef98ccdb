//! Observability (C9): cumulative counters plus queue-walk generators for
//! instantaneous summaries. Walks acquire the queue lock for their whole
//! duration and always skip markers, per §4.7.

use alloc::vec::Vec;
use core::sync::atomic::{AtomicU64, Ordering};

use crate::engine::{Engine, EngineState};
use crate::backend::Backend;
use crate::reservation::NPAGES;

macro_rules! counter {
    ($field:ident, $getter:ident) => {
        pub fn $getter(&self) -> u64 {
            self.$field.load(Ordering::Relaxed)
        }
    };
}

/// Cumulative counters (§4.7, §7, §8 invariant #9).
#[derive(Default)]
pub struct Stats {
    pub(crate) broken: AtomicU64,
    pub(crate) freed: AtomicU64,
    pub(crate) reclaimed: AtomicU64,
    pub(crate) async_prezero: AtomicU64,
    pub(crate) async_skipzero: AtomicU64,
    pub(crate) pop_succ: AtomicU64,
    pub(crate) pop_fail: AtomicU64,
    pub(crate) pop_broken: AtomicU64,
    pub(crate) num_needs_migrate: AtomicU64,
    /// Kept for fidelity with the original `numofdeadbeef` sysctl; never
    /// incremented by any live check (see SPEC_FULL.md §2.2 / §9).
    pub(crate) deadbeef: AtomicU64,
}

impl Stats {
    counter!(broken, broken);
    counter!(freed, freed);
    counter!(reclaimed, reclaimed);
    counter!(async_prezero, async_prezero);
    counter!(async_skipzero, async_skipzero);
    counter!(pop_succ, pop_succ);
    counter!(pop_fail, pop_fail);
    counter!(pop_broken, pop_broken);
    counter!(num_needs_migrate, num_needs_migrate);

    /// Always zero; see the field doc comment.
    pub fn deadbeef_count(&self) -> u64 {
        self.deadbeef.load(Ordering::Relaxed)
    }

    pub(crate) fn incr(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }
}

/// One row of the PartPop queue table sysctl (`partpopq` in the original).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PartPopRow {
    pub level: u32,
    pub unused_kib: u64,
    pub count: u64,
}

impl<B: Backend> Engine<B> {
    /// Instantaneous count of completely free superpages, as reported by
    /// the physical allocator (`freesp` sysctl).
    pub fn freesp(&self) -> usize {
        self.backend.count_order_9()
    }

    /// Instantaneous count of fully populated reservations (`fullpop`
    /// sysctl), found by scanning the array.
    pub fn fullpop(&self) -> usize {
        let state = self.state.lock();
        state.array.iter().filter(|(_, rv)| rv.is_active() && rv.is_full()).count()
    }

    /// Per-level (here, there is only one level: LEVEL0) total-unused-KiB
    /// and count table over the PartPop queue (`partpopq` sysctl).
    pub fn partpopq_table(&self) -> PartPopRow {
        let state = self.state.lock();
        Self::partpopq_table_locked(&state)
    }

    pub(crate) fn partpopq_table_locked(state: &EngineState<B::ObjectId>) -> PartPopRow {
        let mut count = 0u64;
        let mut unused_pages = 0u64;
        for id in state.walk_front_to_back() {
            let rv = state.get(id);
            count += 1;
            unused_pages += (NPAGES as u64) - rv.popcnt() as u64;
        }
        PartPopRow {
            level: 0,
            unused_kib: unused_pages * (crate::reservation::PAGE_SIZE as u64) / 1024,
            count,
        }
    }

    /// Population-count CDF over `[1, NPAGES]`, with an extra trailing
    /// bucket counting fully-populated reservations (`popcdf` sysctl).
    /// `cdf[i]` is the number of active, non-full reservations with
    /// `popcnt <= i + 1`; `cdf[NPAGES]` is the full-reservation count.
    pub fn popcdf(&self) -> Vec<u64> {
        let state = self.state.lock();
        let mut buckets = alloc::vec![0u64; NPAGES + 1];
        for (_, rv) in state.array.iter() {
            if !rv.is_active() {
                continue;
            }
            if rv.is_full() {
                buckets[NPAGES] += 1;
            } else if rv.popcnt() > 0 {
                buckets[(rv.popcnt() as usize) - 1] += 1;
            }
        }
        for i in 1..NPAGES {
            buckets[i] += buckets[i - 1];
        }
        buckets
    }

    /// Count of reservations flagged `NEEDS_MIGRATE` (`need_migrate`
    /// sysctl); kept in sync incrementally via `Stats::num_needs_migrate`,
    /// this recomputes it from scratch for cross-checking in tests.
    pub fn need_migrate_count(&self) -> usize {
        let state = self.state.lock();
        state
            .array
            .iter()
            .filter(|(_, rv)| rv.is_active() && rv.flags().contains(crate::reservation::ReservFlags::NEEDS_MIGRATE))
            .count()
    }
}
