pub mod appointments;
pub mod checkout;
pub mod ratings;
