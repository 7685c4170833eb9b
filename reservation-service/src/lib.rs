pub mod api;
pub mod auth;
pub mod db;
pub mod models;
pub mod reservation;
pub mod schema;
pub mod seed;
pub mod store;
