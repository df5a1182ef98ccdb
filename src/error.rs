//! Error kinds (§7). Internal allocation-path helpers return
//! `Result<T, ReservError>` so the reason a step failed is distinguishable
//! while the logic is being built up; the public entry points in
//! `allocation.rs` collapse this to `None` via `.ok()` (mirroring the donor
//! frame allocator's `AllocationError -> &'static str -> Err` collapse in
//! `allocate_frames_deferred`). Inconsistency that should never happen is
//! raised via `assert!`/`debug_assert!` at the call site instead of being
//! constructed here.

use core::fmt;

/// Recoverable reasons an allocation-path operation can fail.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReservError {
    /// The request's pindex/object/size combination cannot be covered by a
    /// reservation.
    InfeasibleReservation,
    /// The external contiguous allocator failed.
    AllocatorExhausted,
    /// The target slot was already populated (e.g. rename aftermath); the
    /// caller should retry via the non-reservation path.
    Collision,
}

impl fmt::Display for ReservError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let msg = match self {
            ReservError::InfeasibleReservation => "no reservation can cover the requested range",
            ReservError::AllocatorExhausted => "physical allocator could not satisfy the request",
            ReservError::Collision => "target slot is already populated",
        };
        f.write_str(msg)
    }
}
