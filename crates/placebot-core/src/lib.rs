//! Shared configuration, error type, and domain types for placebot.

pub mod config;
pub mod error;
pub mod types;

pub use config::PlacebotConfig;
pub use error::{PlacebotError, Result};
pub use types::*;
