pub mod api;
pub mod booking;
pub mod core;
pub mod models;
pub mod routes;
pub mod schema;
