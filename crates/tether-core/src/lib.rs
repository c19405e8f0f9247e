//! tether-core: Shared abstractions for the Tether client
//!
//! This crate provides the configuration types, error taxonomy,
//! path-safety validation, and time helpers used by the client binary.

pub mod config;
pub mod error;
pub mod pathsafe;
pub mod time;

pub use config::ClientConfig;
pub use error::TetherError;
