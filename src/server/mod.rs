//! HTTP facade for the governance pipeline.

pub mod routes;

pub use routes::{app_router, AppState};
