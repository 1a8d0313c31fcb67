pub mod clients;
pub mod listings;
pub mod payments;
pub mod profile;
pub mod providers;
