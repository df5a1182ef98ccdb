//! Engine-level tests against [`mock::MockBackend`], covering the testable
//! properties and scenarios named in the design notes (S1-S6) rather than
//! mechanical per-module round trips (those live alongside the modules
//! they test).

extern crate std;

mod mock;

use mock::MockBackend;

use crate::addr::PhysAddr;
use crate::backend::{Backend, ObjectKind};
use crate::engine::Engine;
use crate::reservation::{NPAGES, PAGE_SIZE};

const OBJ: u32 = 1;

fn fresh_engine(total_pages: usize) -> Engine<MockBackend> {
    let backend = MockBackend::new(total_pages);
    Engine::startup(backend, total_pages * PAGE_SIZE)
}

/// S1: sequential allocation within one object fills a single reservation
/// and promotes it once full, clearing it from the PartPop queue.
#[test]
fn alloc_page_fills_and_promotes_reservation() {
    let engine = fresh_engine(2 * NPAGES);
    engine.backend().add_object(OBJ, ObjectKind::Anonymous, NPAGES as u64);

    let mut threshold_page = None;
    for i in 0..NPAGES as u64 {
        let page = engine.alloc_page(OBJ, i);
        assert!(page.is_some(), "alloc_page({}) should succeed", i);
        if i + 1 == engine.tunables.sync_popthreshold() as u64 {
            threshold_page = page;
        }
    }

    assert_eq!(engine.fullpop(), 1);
    assert_eq!(engine.partpopq_table().count, 0);

    let threshold_page = threshold_page.expect("loop always reaches the threshold count");
    assert!(
        !engine.satisfy_sync_promotion(threshold_page),
        "a fully populated reservation is no longer a sync-promotion candidate"
    );
}

/// Mid-flight, before the reservation is full, the sync-promotion predicate
/// should fire once popcnt reaches the threshold.
#[test]
fn satisfy_sync_promotion_fires_at_threshold() {
    let engine = fresh_engine(2 * NPAGES);
    engine.backend().add_object(OBJ, ObjectKind::Anonymous, NPAGES as u64);
    engine.tunables.set_sync_popthreshold(4);

    let mut last = None;
    for i in 0..4u64 {
        last = engine.alloc_page(OBJ, i);
    }
    let last = last.unwrap();

    assert!(engine.satisfy_sync_promotion(last));
}

/// S2: a lone allocation followed by a free tears the reservation all the
/// way down and returns its full physical run.
#[test]
fn alloc_then_free_destroys_reservation() {
    let engine = fresh_engine(2 * NPAGES);
    engine.backend().add_object(OBJ, ObjectKind::Anonymous, NPAGES as u64);
    let before_free = engine.backend().free_page_count();

    let page = engine.alloc_page(OBJ, 0).unwrap();
    assert_eq!(engine.partpopq_table().count, 1);

    let destroyed = engine.free_page(page);
    assert!(destroyed);
    assert_eq!(engine.stats.freed(), 1);
    assert_eq!(engine.fullpop(), 0);
    assert_eq!(engine.partpopq_table().count, 0);
    assert_eq!(engine.backend().free_page_count(), before_free);
}

/// S3: breaking a sparsely populated reservation returns its clear bits to
/// the allocator as maximal contiguous runs, matching the popmap-level
/// layout already covered in `popmap::tests::clear_runs_partial_break_layout`.
#[test]
fn break_reclaims_maximal_clear_runs() {
    let engine = fresh_engine(2 * NPAGES);
    engine.backend().add_object(OBJ, ObjectKind::Anonymous, NPAGES as u64);

    let page0 = engine.alloc_page(OBJ, 0).unwrap();
    engine.alloc_page(OBJ, 1).unwrap();
    engine.alloc_page(OBJ, 256).unwrap();
    engine.alloc_page(OBJ, 511).unwrap();

    let free_before = engine.backend().free_page_count();
    let pa = engine.backend().page_phys_addr(page0);
    let id = {
        let state = engine.state.lock();
        state.array.id_of_phys(pa)
    };

    engine.reclaim(id);

    assert_eq!(engine.stats.reclaimed(), 1);
    assert_eq!(engine.partpopq_table().count, 0);
    // 4 pages stay allocated to the (now torn-down) reservation's run only
    // in the sense that the mock already purged them on `free_contig`; the
    // rest of the run must come back.
    assert_eq!(engine.backend().free_page_count(), free_before + (NPAGES - 4));
}

/// When a right-neighbor reservation leaves no room for the final whole
/// chunk, `alloc_contig` still uses the allocated contiguous run: the
/// leading whole chunk gets a real reservation (and is fully populated,
/// since it lies entirely within the request), while the trailing pages
/// past it are bound directly without ever becoming a reservation of
/// their own.
#[test]
fn alloc_contig_truncated_by_neighbor_still_uses_whole_block() {
    let engine = fresh_engine(4 * NPAGES);
    engine.backend().add_object(OBJ, ObjectKind::Anonymous, 3 * NPAGES as u64);

    // A reservation already occupying the second chunk [NPAGES, 2*NPAGES).
    engine.alloc_page(OBJ, NPAGES as u64).unwrap();
    assert_eq!(engine.partpopq_table().count, 1);

    // Request spans the free first chunk and bleeds 5 pages into the
    // already-reserved second chunk, forcing truncation.
    let npages = NPAGES + 5;
    let page = engine.alloc_contig(OBJ, 0, npages, PhysAddr::new(0), PhysAddr::new(usize::MAX), 0, 0);
    assert!(page.is_some(), "alloc_contig should still succeed using the leading whole chunk");

    // The leading chunk became a full reservation of its own.
    assert_eq!(engine.fullpop(), 1);
    // The pre-existing second-chunk reservation is untouched.
    assert_eq!(engine.partpopq_table().count, 1);
}

/// `alloc_contig`'s ordinary (non-truncated) path allocates and fully
/// populates every whole `NPAGES` chunk the request spans.
#[test]
fn alloc_contig_untruncated_populates_every_whole_chunk() {
    let engine = fresh_engine(4 * NPAGES);
    engine.backend().add_object(OBJ, ObjectKind::Anonymous, 2 * NPAGES as u64);

    let page = engine.alloc_contig(OBJ, 0, 2 * NPAGES, PhysAddr::new(0), PhysAddr::new(usize::MAX), 0, 0);
    assert!(page.is_some());
    assert_eq!(engine.fullpop(), 2);
    assert_eq!(engine.partpopq_table().count, 0);
}

/// S4: renaming a reservation onto an object that already has a reservation
/// covering the same pindex flags both sides `NEEDS_MIGRATE` instead of
/// silently merging them.
#[test]
fn rename_detects_pindex_collision_and_flags_needs_migrate() {
    let engine = fresh_engine(4 * NPAGES);
    let old_obj = 10u32;
    let new_obj = 20u32;
    engine.backend().add_object(old_obj, ObjectKind::Anonymous, 2 * NPAGES as u64);
    engine.backend().add_object(new_obj, ObjectKind::Anonymous, NPAGES as u64);

    // A reservation already sitting in `new_obj` at pindex 0.
    engine.alloc_page(new_obj, 0).unwrap();
    // A reservation in `old_obj` at pindex `NPAGES`, which after renaming
    // with `old_offset == NPAGES` lands on pindex 0 too.
    let moved_page = engine.alloc_page(old_obj, NPAGES as u64).unwrap();

    assert_eq!(engine.need_migrate_count(), 0);

    engine.rename(moved_page, new_obj, old_obj, NPAGES as u64);

    assert_eq!(engine.need_migrate_count(), 2);
    assert_eq!(engine.stats.num_needs_migrate(), 2);
}

/// S5: the async daemon scan pre-populates an eligible, nearly-full
/// reservation the rest of the way and promotes it.
#[test]
fn daemon_prepopulates_eligible_reservation_to_full() {
    let engine = fresh_engine(2 * NPAGES);
    engine.backend().add_object(OBJ, ObjectKind::Anonymous, NPAGES as u64);
    engine.tunables.set_pop_threshold(2);
    engine.tunables.set_enable_prezero(true);
    engine.tunables.set_pop_budget(1);

    engine.alloc_page(OBJ, 0).unwrap();
    engine.alloc_page(OBJ, 1).unwrap();
    assert_eq!(engine.partpopq_table().count, 1);

    engine.daemon_cycle(1000);

    assert_eq!(engine.fullpop(), 1);
    assert_eq!(engine.partpopq_table().count, 0);
    assert_eq!(engine.stats.pop_succ(), 1);
    assert_eq!(engine.stats.pop_fail(), 0);
    assert_eq!(engine.stats.pop_broken(), 0);
}

/// S6: if the page bound during pre-population turns out to have been
/// reassigned to a different object (a concurrent rename/collapse), the
/// daemon aborts cleanly and counts it as `pop_broken`, never `pop_succ`.
#[test]
fn prepopulate_aborts_when_page_reassigned_mid_flight() {
    let engine = fresh_engine(2 * NPAGES);
    let other_obj = 2u32;
    engine.backend().add_object(OBJ, ObjectKind::Anonymous, NPAGES as u64);
    engine.backend().add_object(other_obj, ObjectKind::Anonymous, NPAGES as u64);
    engine.tunables.set_pop_threshold(2);
    engine.tunables.set_enable_prezero(true);
    engine.tunables.set_pop_budget(1);

    engine.alloc_page(OBJ, 0).unwrap();
    engine.alloc_page(OBJ, 1).unwrap();

    engine.backend().reassign_next_bound_page_to(other_obj);
    engine.daemon_cycle(1000);

    assert_eq!(engine.stats.pop_broken(), 1);
    assert_eq!(engine.stats.pop_succ(), 0);
    assert_eq!(engine.stats.pop_fail(), 0);
    assert_ne!(engine.fullpop(), 1);
}

/// `break_all` tears every reservation linked into an object's `rvq` down,
/// regardless of whether each one is still in the PartPop queue.
#[test]
fn break_all_tears_down_every_reservation_for_object() {
    let engine = fresh_engine(4 * NPAGES);
    engine.backend().add_object(OBJ, ObjectKind::Anonymous, 4 * NPAGES as u64);

    // Two disjoint reservations: [0, NPAGES) partially populated, and
    // [2*NPAGES, 3*NPAGES) fully populated.
    engine.alloc_page(OBJ, 0).unwrap();
    for i in 0..NPAGES as u64 {
        engine.alloc_page(OBJ, 2 * NPAGES as u64 + i).unwrap();
    }
    assert_eq!(engine.fullpop(), 1);
    assert_eq!(engine.partpopq_table().count, 1);

    engine.break_all(OBJ);

    assert_eq!(engine.fullpop(), 0);
    assert_eq!(engine.partpopq_table().count, 0);
    assert_eq!(engine.stats.broken(), 2);
}

/// PartPop membership bookkeeping (the `IN_PARTPOPQ` flag vs actual queue
/// linkage) never drifts apart across populate/depopulate churn.
#[test]
fn partpopq_membership_stays_consistent_across_churn() {
    let engine = fresh_engine(2 * NPAGES);
    engine.backend().add_object(OBJ, ObjectKind::Anonymous, NPAGES as u64);

    let mut pages = std::vec::Vec::new();
    for i in 0..16u64 {
        pages.push(engine.alloc_page(OBJ, i).unwrap());
    }
    for page in pages.drain(4..12) {
        engine.free_page(page);
    }

    let state = engine.state.lock();
    for (id, rv) in state.array.iter() {
        if rv.is_valid_slot() {
            assert!(state.partpopq_membership_consistent(id));
        }
    }
}
