//! Encoding and decoding of control messages
//!
//! Each control message is one self-contained JSON text frame. Decoding
//! is strict about structure (valid JSON object with a `type` field) but
//! lenient about content: unknown `type` values come back as
//! [`ControlMessage::Unrecognized`] rather than an error.

use crate::error::ProtocolError;
use crate::message::ControlMessage;

/// Encode a control message into a single text frame
pub fn encode(message: &ControlMessage) -> Result<String, ProtocolError> {
    Ok(serde_json::to_string(message)?)
}

/// Decode one text frame into a control message.
///
/// Fails with [`ProtocolError::MalformedMessage`] when the payload is not
/// valid JSON or lacks a `type` discriminator. Callers drop the frame on
/// failure; the session continues.
pub fn decode(text: &str) -> Result<ControlMessage, ProtocolError> {
    serde_json::from_str(text).map_err(|e| ProtocolError::MalformedMessage {
        reason: e.to_string(),
    })
}
