//! Superpage Reservation Engine: speculative allocation, tracking,
//! promotion, eviction, and reclamation of superpage-sized physical memory
//! reservations, generic over an external physical-allocator/object/page
//! [`Backend`].
//!
//! The engine itself holds no knowledge of page tables, TLB shootdown, or
//! fault-time promotion decisions; it tracks *reservations* and exposes the
//! predicates and operations a caller's fault path and allocator use to
//! drive those decisions.

#![no_std]

extern crate alloc;

#[macro_use]
extern crate log;

mod addr;
mod allocation;
mod array;
mod backend;
mod daemon;
mod engine;
mod error;
mod popmap;
mod queue;
mod reclaim;
mod rename;
mod reservation;
mod stats;
mod tunables;

pub use addr::{PhysAddr, ReservationId};
pub use backend::{Backend, ObjectKind, PageAllocFlags};
pub use engine::{Engine, MarkerKind};
pub use error::ReservError;
pub use popmap::PopMap;
pub use reservation::{ReservFlags, Reservation, LEVEL0_ORDER, LEVEL0_SIZE, NBPOPMAP, NPAGES, NPOPMAP, PAGE_SIZE};
pub use stats::{PartPopRow, Stats};
pub use tunables::Tunables;

#[cfg(test)]
mod tests;
