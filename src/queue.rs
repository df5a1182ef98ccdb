//! PartPop queue operations (C4): a doubly-linked list of partially
//! populated reservations in touched order, realized as `ReservationId`
//! links embedded in each record (see the Design Notes on intrusive
//! linkage) rather than pointer-based intrusive-collections nodes.
//!
//! All functional traversals skip markers (invariant #9); only the marker
//! protocol itself (insert/remove) touches marker entries.

use crate::addr::ReservationId;
use crate::engine::EngineState;
use crate::reservation::ReservFlags;

impl<O: Copy + Eq> EngineState<O> {
    pub(crate) fn partpop_prev(&self, id: ReservationId) -> Option<ReservationId> {
        self.get(id).partpopq_prev
    }

    pub(crate) fn partpop_next(&self, id: ReservationId) -> Option<ReservationId> {
        self.get(id).partpopq_next
    }

    /// Removes `id` from its current position in the queue, wiring its
    /// neighbors directly together. Does not touch `id`'s own flags; the
    /// caller decides whether to clear `IN_PARTPOPQ` (real reservations
    /// always do; the marker protocol doesn't, since markers never carry
    /// that flag).
    pub(crate) fn queue_unlink(&mut self, id: ReservationId) {
        let (prev, next) = {
            let node = self.get(id);
            (node.partpopq_prev, node.partpopq_next)
        };
        match prev {
            Some(p) => self.get_mut(p).partpopq_next = next,
            None => self.partpop_head = next,
        }
        match next {
            Some(n) => self.get_mut(n).partpopq_prev = prev,
            None => self.partpop_tail = prev,
        }
        let node = self.get_mut(id);
        node.partpopq_prev = None;
        node.partpopq_next = None;
    }

    /// Links `id` at the tail of the queue (invariant #8: new/touched
    /// entries go to the tail).
    pub(crate) fn queue_link_tail(&mut self, id: ReservationId) {
        let old_tail = self.partpop_tail;
        self.get_mut(id).partpopq_prev = old_tail;
        self.get_mut(id).partpopq_next = None;
        match old_tail {
            Some(t) => self.get_mut(t).partpopq_next = Some(id),
            None => self.partpop_head = Some(id),
        }
        self.partpop_tail = Some(id);
    }

    /// Splices `id` into the queue immediately before `anchor`. Used only
    /// by the marker protocol to hold a scan position across a dropped
    /// lock.
    pub(crate) fn queue_insert_before(&mut self, id: ReservationId, anchor: ReservationId) {
        let prev = self.get(anchor).partpopq_prev;
        self.get_mut(id).partpopq_prev = prev;
        self.get_mut(id).partpopq_next = Some(anchor);
        match prev {
            Some(p) => self.get_mut(p).partpopq_next = Some(id),
            None => self.partpop_head = Some(id),
        }
        self.get_mut(anchor).partpopq_prev = Some(id);
    }

    /// Splices `id` into the queue immediately after `anchor`.
    pub(crate) fn queue_insert_after(&mut self, id: ReservationId, anchor: ReservationId) {
        let next = self.get(anchor).partpopq_next;
        self.get_mut(id).partpopq_next = next;
        self.get_mut(id).partpopq_prev = Some(anchor);
        match next {
            Some(n) => self.get_mut(n).partpopq_prev = Some(id),
            None => self.partpop_tail = Some(id),
        }
        self.get_mut(anchor).partpopq_next = Some(id);
    }

    /// Next non-marker entry at or after `from`, walking front-to-back.
    pub(crate) fn next_non_marker(&self, from: Option<ReservationId>) -> Option<ReservationId> {
        let mut cur = from;
        while let Some(id) = cur {
            if !self.get(id).is_marker() {
                return Some(id);
            }
            cur = self.partpop_next(id);
        }
        None
    }

    /// Previous non-marker entry at or before `from`, walking back-to-front.
    pub(crate) fn prev_non_marker(&self, from: Option<ReservationId>) -> Option<ReservationId> {
        let mut cur = from;
        while let Some(id) = cur {
            if !self.get(id).is_marker() {
                return Some(id);
            }
            cur = self.partpop_prev(id);
        }
        None
    }

    /// All non-marker members, head to tail (used by observability walks,
    /// which must skip markers per §4.7).
    pub(crate) fn walk_front_to_back(&self) -> PartPopIter<'_, O> {
        PartPopIter {
            state: self,
            cur: self.next_non_marker(self.partpop_head),
            backward: false,
        }
    }

    pub(crate) fn walk_back_to_front(&self) -> PartPopIter<'_, O> {
        PartPopIter {
            state: self,
            cur: self.prev_non_marker(self.partpop_tail),
            backward: true,
        }
    }

    /// Whether `id`'s `IN_PARTPOPQ` flag state matches its actual queue
    /// linkage (part of invariant #2/#3, used by property tests).
    #[cfg(test)]
    pub(crate) fn partpopq_membership_consistent(&self, id: ReservationId) -> bool {
        let rv = self.get(id);
        if rv.is_marker() {
            return true;
        }
        let linked = rv.partpopq_prev.is_some() || rv.partpopq_next.is_some() || self.partpop_head == Some(id);
        linked == rv.flags.contains(ReservFlags::IN_PARTPOPQ)
    }
}

pub(crate) struct PartPopIter<'a, O> {
    state: &'a EngineState<O>,
    cur: Option<ReservationId>,
    backward: bool,
}

impl<'a, O: Copy + Eq> Iterator for PartPopIter<'a, O> {
    type Item = ReservationId;

    fn next(&mut self) -> Option<ReservationId> {
        let id = self.cur?;
        self.cur = if self.backward {
            self.state.prev_non_marker(self.state.partpop_prev(id))
        } else {
            self.state.next_non_marker(self.state.partpop_next(id))
        };
        Some(id)
    }
}
