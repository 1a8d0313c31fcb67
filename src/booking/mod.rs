//! Booking domain: recurrence projection, slot arithmetic, availability checks
//! and optimistic slot overrides.

pub mod availability;
pub mod overrides;
pub mod recurrence;
pub mod slot_store;
pub mod slot_sync;
pub mod slots;
pub mod status;
