//! tether-protocol: Control-channel wire protocol for Tether
//!
//! This crate defines the JSON control messages exchanged between the
//! client and the remote session over the text channel of the websocket
//! transport. Raw terminal bytes travel as binary frames and never pass
//! through this crate.

pub mod codec;
pub mod error;
pub mod message;

pub use codec::{decode, encode};
pub use error::ProtocolError;
pub use message::{
    ControlMessage, FileChangeAction, TerminalSize, CLOSE_CODE_REPLACED, UPLOAD_CHUNK_BYTES,
};
