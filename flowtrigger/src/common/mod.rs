//! Common utilities module
//!
//! Shared helpers used by the configuration layer and the data model.

/// Environment variable loading utilities
pub mod env_loader;

/// Identifier newtypes and monotonic ULID generation
pub mod ids;

pub use env_loader::{load_env_optional, load_env_parsed, load_env_string, EnvLoader};
pub use ids::{generate_monotonic_ulid, IdError};
