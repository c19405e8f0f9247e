//! Message types for the Tether control channel
//!
//! The control channel is the text half of the websocket transport: one
//! JSON object per text frame, discriminated by a `type` field. Binary
//! frames carry raw terminal bytes and are not represented here.
//!
//! # Message Flow
//!
//! Typical sequence for a session:
//!
//! 1. Client connects and sends `resize` with the current dimensions
//! 2. Client optionally sends `sync_back { enabled: true }`
//! 3. Remote side sends `ready` once the process is attached
//! 4. Remote side sends `ping` periodically, client answers `pong`
//! 5. Terminal bytes flow as binary frames in both directions
//! 6. Remote file edits arrive as `file_change`; pasted local files go
//!    out as `file_upload` / `file_upload_chunk`
//! 7. The remote process ends with `exit`
//!
//! # Forward Compatibility
//!
//! Unknown `type` values decode to [`ControlMessage::Unrecognized`] so a
//! newer server can introduce message types without breaking older
//! clients; the relay ignores such frames.

use serde::{Deserialize, Serialize};

/// Websocket close code meaning "another client took over this session".
///
/// Treated as clean termination and never retried.
pub const CLOSE_CODE_REPLACED: u16 = 4001;

/// Maximum base64 payload carried by a single upload message.
///
/// Content larger than this is split into `file_upload_chunk` messages of
/// equal size. Each chunk is one self-contained text frame; no message
/// ever spans frames.
pub const UPLOAD_CHUNK_BYTES: usize = 256 * 1024;

/// Terminal dimensions
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TerminalSize {
    /// Number of columns
    pub cols: u16,
    /// Number of rows
    pub rows: u16,
}

impl TerminalSize {
    /// Create a new terminal size
    pub fn new(cols: u16, rows: u16) -> Self {
        Self { cols, rows }
    }

    /// Default terminal size (80x24)
    pub fn default_size() -> Self {
        Self { cols: 80, rows: 24 }
    }
}

impl Default for TerminalSize {
    fn default() -> Self {
        Self::default_size()
    }
}

/// Action carried by a `file_change` notification
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FileChangeAction {
    /// Create or overwrite the file
    Write,
    /// Remove the file
    Delete,
}

/// Control messages exchanged over the text channel
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ControlMessage {
    /// Local terminal dimensions changed (client -> remote)
    Resize {
        /// Columns
        cols: u16,
        /// Rows
        rows: u16,
    },

    /// Deliver a signal to the remote process (client -> remote)
    Signal {
        /// Signal name, e.g. "SIGINT"
        name: String,
    },

    /// Liveness probe (remote -> client)
    Ping,

    /// Liveness reply (client -> remote)
    Pong,

    /// Remote process is attached and ready (remote -> client)
    Ready,

    /// Remote process exited (remote -> client)
    Exit {
        /// Exit code of the remote process
        code: i32,
        /// Signal name if the process was killed by one
        #[serde(default, skip_serializing_if = "Option::is_none")]
        signal: Option<String>,
    },

    /// Non-fatal protocol-level error report (remote -> client)
    Error {
        /// Human-readable message
        message: String,
    },

    /// Request remote-to-local file replication (client -> remote)
    SyncBack {
        /// Whether sync-back should be active for this session
        enabled: bool,
    },

    /// Acknowledgment of a sync-back request (remote -> client)
    SyncBackAck {
        /// Whether the remote side enabled sync-back
        enabled: bool,
        /// Remote workspace directory being watched
        #[serde(default, skip_serializing_if = "Option::is_none")]
        workspace_dir: Option<String>,
        /// Remote polling interval, if the server declares one
        #[serde(default, skip_serializing_if = "Option::is_none")]
        interval_ms: Option<u64>,
    },

    /// A file changed on the remote side (remote -> client)
    FileChange {
        /// What happened to the file
        action: FileChangeAction,
        /// Path relative to the workspace root
        path: String,
        /// Base64-encoded content for `write` actions
        #[serde(default, skip_serializing_if = "Option::is_none")]
        content: Option<String>,
        /// Unix file mode bits, if known
        #[serde(default, skip_serializing_if = "Option::is_none")]
        mode: Option<u32>,
    },

    /// Upload a pasted local file in one message (client -> remote)
    FileUpload {
        /// Sanitized remote filename
        filename: String,
        /// Destination path on the remote side
        path: String,
        /// Base64-encoded file content
        content: String,
        /// MIME type of the file
        mime: String,
    },

    /// One slice of a chunked file upload (client -> remote)
    FileUploadChunk {
        /// Identifier shared by all chunks of one upload
        upload_id: String,
        /// Sanitized remote filename
        filename: String,
        /// Destination path on the remote side
        path: String,
        /// Zero-based sequence index of this chunk
        index: u32,
        /// Total number of chunks in the upload
        total: u32,
        /// Base64-encoded content slice
        chunk: String,
        /// MIME type of the file
        mime: String,
    },

    /// Any message type this client does not know about.
    ///
    /// Parsed inertly instead of failing so future server-side message
    /// types pass through without breaking the session.
    #[serde(other)]
    Unrecognized,
}

impl ControlMessage {
    /// Short name of the message variant, for logging
    pub fn kind(&self) -> &'static str {
        match self {
            ControlMessage::Resize { .. } => "resize",
            ControlMessage::Signal { .. } => "signal",
            ControlMessage::Ping => "ping",
            ControlMessage::Pong => "pong",
            ControlMessage::Ready => "ready",
            ControlMessage::Exit { .. } => "exit",
            ControlMessage::Error { .. } => "error",
            ControlMessage::SyncBack { .. } => "sync_back",
            ControlMessage::SyncBackAck { .. } => "sync_back_ack",
            ControlMessage::FileChange { .. } => "file_change",
            ControlMessage::FileUpload { .. } => "file_upload",
            ControlMessage::FileUploadChunk { .. } => "file_upload_chunk",
            ControlMessage::Unrecognized => "unrecognized",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_terminal_size_default() {
        let size = TerminalSize::default();
        assert_eq!(size.cols, 80);
        assert_eq!(size.rows, 24);
    }

    #[test]
    fn test_exit_omits_absent_signal() {
        let json = serde_json::to_string(&ControlMessage::Exit {
            code: 0,
            signal: None,
        })
        .unwrap();
        assert!(!json.contains("signal"));
    }

    #[test]
    fn test_unknown_type_is_unrecognized() {
        let msg: ControlMessage =
            serde_json::from_str(r#"{"type":"holographic_display","pixels":42}"#).unwrap();
        assert_eq!(msg, ControlMessage::Unrecognized);
    }

    #[test]
    fn test_kind_matches_wire_tag() {
        let msg = ControlMessage::SyncBack { enabled: true };
        let json = serde_json::to_string(&msg).unwrap();
        assert!(json.contains(&format!(r#""type":"{}""#, msg.kind())));
    }
}
