//! Protocol error types

use thiserror::Error;

/// Errors that can occur during control-message encoding or decoding
#[derive(Error, Debug)]
pub enum ProtocolError {
    /// Inbound text frame is not a valid control message.
    ///
    /// Callers must treat this as non-fatal and drop the frame: the
    /// transport also carries binary terminal bytes, and a stray frame
    /// must never take the session down.
    #[error("malformed control message: {reason}")]
    MalformedMessage { reason: String },

    /// Serialization error on the outbound path
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}
