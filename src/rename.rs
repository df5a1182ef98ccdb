//! Rename / merge (C7): reparent a reservation to a new owning object on
//! shadow-object collapse, and detect the resulting pindex collision.

use crate::backend::Backend;
use crate::engine::Engine;
use crate::reservation::ReservFlags;

impl<B: Backend> Engine<B> {
    /// `rename(page, new_object, old_object, old_offset)` (§4.5). No-op if
    /// the reservation backing `page` is no longer owned by `old_object`
    /// (lost a race with a concurrent `break`).
    pub fn rename(&self, page: B::PageRef, new_object: B::ObjectId, old_object: B::ObjectId, old_offset: u64) {
        let pa = self.backend.page_phys_addr(page);

        let (id, new_pindex) = {
            let mut state = self.state.lock();
            let id = state.array.id_of_phys(pa);
            if state.get(id).object() != Some(old_object) {
                return;
            }
            let new_pindex = state.get(id).pindex() - old_offset;
            let rv = state.array.get_mut(id);
            rv.object = Some(new_object);
            rv.pindex = new_pindex;
            rv.flags.insert(ReservFlags::TRANSFERRED);
            (id, new_pindex)
        };

        self.backend.object_write_lock(old_object);
        self.backend.rvq_unlink(old_object, id);
        self.backend.object_write_unlock(old_object);

        self.backend.object_write_lock(new_object);
        self.backend.rvq_link(new_object, id, new_pindex);
        let collision = self.backend.rvq_find_collision(new_object, new_pindex, id);
        self.backend.object_write_unlock(new_object);

        if let Some(other) = collision {
            let mut state = self.state.lock();
            for flagged in [id, other] {
                let rv = state.get_mut(flagged);
                if !rv.flags.contains(ReservFlags::NEEDS_MIGRATE) {
                    rv.flags.insert(ReservFlags::NEEDS_MIGRATE);
                    crate::stats::Stats::incr(&self.stats.num_needs_migrate);
                }
            }
        }
    }
}
