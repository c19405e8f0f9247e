//! Tether client library
//!
//! The client half of the Tether remote-terminal protocol: it relays a
//! raw local terminal to a remote process over a websocket and layers
//! resize notification, heartbeat, exit signaling, chunked file upload,
//! and sync-back file replication on the same channel.

pub mod commands;
pub mod output;
pub mod reconnect;
pub mod relay;
pub mod session;
pub mod sync;
pub mod terminal;
pub mod transport;
pub mod upload;
