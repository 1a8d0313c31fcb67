pub mod auth;
pub mod payment_gateway;
