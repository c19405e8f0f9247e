//! Core error types for Tether

use std::path::PathBuf;
use tether_protocol::ProtocolError;
use thiserror::Error;

/// Top-level error type for the Tether client
#[derive(Error, Debug)]
pub enum TetherError {
    /// Protocol error
    #[error("Protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    /// Connection error
    #[error("Connection error: {0}")]
    Connection(#[from] ConnectionError),

    /// Session lookup error
    #[error("Session lookup error: {0}")]
    Lookup(#[from] LookupError),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Connection-related errors
#[derive(Error, Debug)]
pub enum ConnectionError {
    /// Handshake did not complete within the allotted time
    #[error("Connection timed out")]
    Timeout,

    /// The transport closed
    #[error("Connection closed: {reason}")]
    Closed {
        /// Close code if the transport provided one
        code: Option<u16>,
        /// Close reason, or a stand-in when the peer gave none
        reason: String,
    },

    /// Transport-level failure (socket error, TLS failure, ...)
    #[error("Transport error: {0}")]
    Transport(String),
}

/// Errors from the session-lookup collaborator
#[derive(Error, Debug)]
pub enum LookupError {
    /// Session does not exist
    #[error("Session not found: {0}")]
    NotFound(String),

    /// Session exists but is no longer running
    #[error("Session '{0}' has stopped")]
    SessionStopped(String),

    /// HTTP request failed
    #[error("Lookup request failed: {0}")]
    Request(String),

    /// Response was not in the expected shape
    #[error("Malformed lookup response: {0}")]
    Malformed(String),
}

/// Configuration-related errors
#[derive(Error, Debug)]
pub enum ConfigError {
    /// Config file not found
    #[error("Config file not found: {0}")]
    NotFound(PathBuf),

    /// Invalid configuration
    #[error("Invalid config: {0}")]
    Invalid(String),

    /// TOML parse error
    #[error("TOML parse error: {0}")]
    Parse(#[from] toml::de::Error),

    /// TOML serialize error
    #[error("TOML serialize error: {0}")]
    Serialize(#[from] toml::ser::Error),
}
