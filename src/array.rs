//! Dense reservation array (C2): one slot per superpage-sized region of
//! physical memory, indexed by `phys_addr >> LEVEL0_ORDER`.
//!
//! This trades memory for O(1) lookup from any physical page to its
//! candidate reservation. Slots whose physical region doesn't fully align
//! to a superpage (typically only possible at the very top of a
//! non-superpage-aligned `high_water` mark) are left invalid
//! (`phys_base == None`) and must never be activated.

use alloc::vec::Vec;

use crate::addr::{PhysAddr, ReservationId};
use crate::reservation::{Reservation, LEVEL0_SIZE};

pub struct ReservationArray<O> {
    slots: Vec<Reservation<O>>,
}

impl<O: Copy + Eq> ReservationArray<O> {
    /// Size and zero the array to cover `[0, high_water)` (C10, startup).
    pub fn new(high_water: usize) -> ReservationArray<O> {
        let count = (high_water + LEVEL0_SIZE - 1) / LEVEL0_SIZE;
        let mut slots = Vec::with_capacity(count);
        for i in 0..count {
            let base = i * LEVEL0_SIZE;
            let mut rv = Reservation::invalid();
            if base + LEVEL0_SIZE <= high_water {
                rv.phys_base = Some(PhysAddr::new(base));
            }
            slots.push(rv);
        }
        ReservationArray { slots }
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    /// Maps a physical address to its candidate reservation slot. Callers
    /// must separately check `is_valid_slot()`/`is_active()`.
    pub fn from_phys(&self, pa: PhysAddr) -> &Reservation<O> {
        &self.slots[pa.level0_index()]
    }

    pub fn from_phys_mut(&mut self, pa: PhysAddr) -> &mut Reservation<O> {
        let idx = pa.level0_index();
        &mut self.slots[idx]
    }

    pub fn id_of_phys(&self, pa: PhysAddr) -> ReservationId {
        ReservationId(pa.level0_index() as u32)
    }

    pub fn get(&self, id: ReservationId) -> &Reservation<O> {
        &self.slots[id.index()]
    }

    pub fn get_mut(&mut self, id: ReservationId) -> &mut Reservation<O> {
        &mut self.slots[id.index()]
    }

    pub fn iter(&self) -> impl Iterator<Item = (ReservationId, &Reservation<O>)> {
        self.slots
            .iter()
            .enumerate()
            .map(|(i, rv)| (ReservationId(i as u32), rv))
    }
}
