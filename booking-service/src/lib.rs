pub mod api;
pub mod board;
pub mod handlers;
pub mod idempotency;
pub mod maintenance;
pub mod models;
pub mod schema;
pub mod tenant;
