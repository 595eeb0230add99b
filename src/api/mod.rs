//! Operator API
//!
//! Small REST surface for inspecting and nudging a running pool, plus a
//! diagnostic fetch endpoint.

pub mod handlers;
pub mod routes;
pub mod server;

pub use server::{ApiServer, AppState};
