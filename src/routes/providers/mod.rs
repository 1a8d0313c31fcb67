pub mod appointments;
pub mod availability;
pub mod listings;
pub mod slots;
