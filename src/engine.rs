//! Ties the dense reservation array (C2) and the PartPop queue (C4)
//! together behind the single mutex that the concurrency model (§5) calls
//! the "free-page-queue mutex": both structures are always mutated
//! together, so one lock is enough and there is no lock-ordering rule to
//! maintain between them.

use core::sync::atomic::{AtomicU64, Ordering};

use spin::Mutex;

use crate::addr::ReservationId;
use crate::array::ReservationArray;
use crate::backend::Backend;
use crate::reservation::{Reservation, ReservFlags};
use crate::stats::Stats;
use crate::tunables::Tunables;

/// The three independent queue-traversal markers named in §4.6: one for the
/// pre-zeroing scan, one for the eviction scan, and one for on-demand
/// compaction. Each is allocated once, for the lifetime of the engine, and
/// must never be used by two traversals concurrently.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum MarkerKind {
    Async = 0,
    Evict = 1,
    Compaction = 2,
}

pub(crate) const MARKER_COUNT: usize = 3;

/// Everything protected by the queue mutex.
pub(crate) struct EngineState<O> {
    pub(crate) array: ReservationArray<O>,
    pub(crate) markers: [Reservation<O>; MARKER_COUNT],
    pub(crate) partpop_head: Option<ReservationId>,
    pub(crate) partpop_tail: Option<ReservationId>,
}

impl<O: Copy + Eq> EngineState<O> {
    fn new(high_water: usize) -> EngineState<O> {
        let array = ReservationArray::new(high_water);
        let mut markers = [Reservation::invalid(), Reservation::invalid(), Reservation::invalid()];
        for m in markers.iter_mut() {
            m.flags = ReservFlags::MARKER;
        }
        EngineState {
            array,
            markers,
            partpop_head: None,
            partpop_tail: None,
        }
    }

    pub(crate) fn marker_id(&self, kind: MarkerKind) -> ReservationId {
        ReservationId(self.array.len() as u32 + kind as u32)
    }

    pub(crate) fn get(&self, id: ReservationId) -> &Reservation<O> {
        let base = self.array.len();
        if id.index() < base {
            self.array.get(id)
        } else {
            &self.markers[id.index() - base]
        }
    }

    pub(crate) fn get_mut(&mut self, id: ReservationId) -> &mut Reservation<O> {
        let base = self.array.len();
        if id.index() < base {
            self.array.get_mut(id)
        } else {
            &mut self.markers[id.index() - base]
        }
    }
}

/// The Superpage Reservation Engine.
///
/// Generic over `B: Backend` so that it can be driven by a real kernel's
/// allocator/object/page layers in production and by an in-memory mock in
/// tests (see `tests::mock` for the latter).
pub struct Engine<B: Backend> {
    pub(crate) backend: B,
    pub(crate) state: Mutex<EngineState<B::ObjectId>>,
    pub(crate) clock: AtomicU64,
    pub stats: Stats,
    pub tunables: Tunables,
}

impl<B: Backend> Engine<B> {
    /// Size and zero the reservation array from the physical segment map
    /// (C10, startup). `high_water` is the highest physical address the
    /// array must be able to index.
    pub fn startup(backend: B, high_water: usize) -> Engine<B> {
        Engine {
            backend,
            state: Mutex::new(EngineState::new(high_water)),
            clock: AtomicU64::new(0),
            stats: Stats::default(),
            tunables: Tunables::default(),
        }
    }

    /// Monotonic tick used for PartPop queue ordering and eviction aging.
    pub(crate) fn tick(&self) -> u64 {
        self.clock.fetch_add(1, Ordering::Relaxed) + 1
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }
}
