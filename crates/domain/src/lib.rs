//! Shared domain types for the multibot supervisor: the error type and
//! the configuration model (environment + per-bot YAML).

pub mod config;
pub mod error;

pub use error::{Error, Result};
