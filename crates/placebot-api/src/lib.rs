//! placebot HTTP API - axum server, route handlers, JSON errors.
//!
//! Exposes the conversational pipeline over HTTP: one endpoint per turn,
//! session listing and history, the schema text, and a health check.

pub mod error;
pub mod handlers;
pub mod routes;
pub mod state;

pub use error::ApiError;
pub use routes::{create_router, start_server};
pub use state::AppState;
