//! File-upload detection for pasted text
//!
//! When the user pastes text into the session, it may be a set of local
//! file paths (terminals paste drag-and-dropped files that way). Eligible
//! files are uploaded over the control channel and the paste is replaced
//! by the remote destination paths, so the remote process receives
//! references that exist on its side. Anything else — plain text, paths
//! that do not resolve, files that fail the eligibility gate — is
//! forwarded verbatim.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use uuid::Uuid;

use tether_core::time::current_time_millis;
use tether_protocol::{ControlMessage, UPLOAD_CHUNK_BYTES};

/// Largest file considered for auto-upload
pub const MAX_UPLOAD_BYTES: u64 = 10 * 1024 * 1024;

/// Remote directory uploads land in, relative to the remote workspace
pub const REMOTE_UPLOAD_DIR: &str = "uploads";

/// Pause between successive chunks of one upload.
///
/// Keeps a large upload from saturating the channel the interactive
/// session shares with it.
pub const INTER_CHUNK_DELAY: Duration = Duration::from_millis(25);

/// Extensions eligible for auto-upload: images and plain document types
const SUPPORTED_EXTENSIONS: &[&str] = &[
    "png", "jpg", "jpeg", "gif", "webp", "bmp", "svg", "txt", "md", "markdown", "csv", "json",
    "log", "pdf",
];

/// Result of inspecting one paste
#[derive(Debug)]
pub enum PasteOutcome {
    /// Not an upload; send the pasted text to the remote side unchanged
    Forward(String),
    /// Upload messages to send, plus the replacement text that stands in
    /// for the original paste
    Upload {
        messages: Vec<ControlMessage>,
        replacement: String,
    },
}

/// Inspect pasted text and build the upload plan if every referenced
/// file is eligible.
///
/// A single ineligible file (too large, unsupported type, unreadable)
/// downgrades the whole paste to verbatim forwarding — no partial
/// uploads.
pub fn process_paste(paste: &str) -> PasteOutcome {
    let candidates = detect_candidates(paste);
    if candidates.is_empty() {
        return PasteOutcome::Forward(paste.to_string());
    }

    let mut messages = Vec::new();
    let mut destinations = Vec::new();

    for path in &candidates {
        if !is_eligible(path) {
            tracing::debug!(path = %path.display(), "pasted file not eligible, forwarding paste");
            return PasteOutcome::Forward(paste.to_string());
        }

        let bytes = match fs::read(path) {
            Ok(bytes) => bytes,
            Err(e) => {
                tracing::warn!(path = %path.display(), "failed to read pasted file: {}", e);
                return PasteOutcome::Forward(paste.to_string());
            }
        };

        let filename = remote_filename(path, current_time_millis());
        let destination = format!("{}/{}", REMOTE_UPLOAD_DIR, filename);
        let mime = mime_for(path);

        messages.extend(build_upload_messages(&filename, &destination, &bytes, mime));
        destinations.push(destination);
    }

    PasteOutcome::Upload {
        messages,
        replacement: destinations.join(" "),
    }
}

/// Extract upload candidates: tokens that expand to absolute paths with
/// a live `stat`.
fn detect_candidates(paste: &str) -> Vec<PathBuf> {
    split_unescaped(paste)
        .into_iter()
        .map(|token| expand_tilde(&token))
        .filter(|path| path.is_absolute() && fs::metadata(path).is_ok())
        .collect()
}

/// Split on spaces that are not protected by a backslash, unescaping
/// `\ ` in the surviving tokens.
fn split_unescaped(text: &str) -> Vec<String> {
    let mut tokens = Vec::new();
    let mut current = String::new();
    let mut chars = text.chars().peekable();

    while let Some(c) = chars.next() {
        match c {
            '\\' if chars.peek() == Some(&' ') => {
                chars.next();
                current.push(' ');
            }
            ' ' | '\n' | '\r' | '\t' => {
                if !current.is_empty() {
                    tokens.push(std::mem::take(&mut current));
                }
            }
            _ => current.push(c),
        }
    }
    if !current.is_empty() {
        tokens.push(current);
    }
    tokens
}

/// Expand a leading `~` to the user's home directory
fn expand_tilde(token: &str) -> PathBuf {
    if token == "~" {
        return dirs::home_dir().unwrap_or_else(|| PathBuf::from("~"));
    }
    if let Some(rest) = token.strip_prefix("~/") {
        if let Some(home) = dirs::home_dir() {
            return home.join(rest);
        }
    }
    PathBuf::from(token)
}

/// Regular file, within the size ceiling, with a recognized extension
fn is_eligible(path: &Path) -> bool {
    let Ok(metadata) = fs::metadata(path) else {
        return false;
    };
    if !metadata.is_file() || metadata.len() > MAX_UPLOAD_BYTES {
        return false;
    }
    extension_of(path)
        .map(|ext| SUPPORTED_EXTENSIONS.contains(&ext.as_str()))
        .unwrap_or(false)
}

fn extension_of(path: &Path) -> Option<String> {
    path.extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase())
}

/// Collision-resistant remote filename: sanitized stem plus a
/// millisecond timestamp, original extension preserved.
fn remote_filename(path: &Path, now_millis: u64) -> String {
    let stem = path
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or("upload");
    let sanitized: String = stem
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '-' || c == '_' || c == '.' {
                c
            } else {
                '_'
            }
        })
        .collect();

    match extension_of(path) {
        Some(ext) => format!("{}_{}.{}", sanitized, now_millis, ext),
        None => format!("{}_{}", sanitized, now_millis),
    }
}

fn mime_for(path: &Path) -> &'static str {
    match extension_of(path).as_deref() {
        Some("png") => "image/png",
        Some("jpg") | Some("jpeg") => "image/jpeg",
        Some("gif") => "image/gif",
        Some("webp") => "image/webp",
        Some("bmp") => "image/bmp",
        Some("svg") => "image/svg+xml",
        Some("md") | Some("markdown") => "text/markdown",
        Some("csv") => "text/csv",
        Some("json") => "application/json",
        Some("pdf") => "application/pdf",
        _ => "text/plain",
    }
}

/// Encode one file into its upload messages: a single `file_upload` when
/// the encoded content fits one message, otherwise equal-sized
/// `file_upload_chunk` messages in strict index order.
fn build_upload_messages(
    filename: &str,
    destination: &str,
    bytes: &[u8],
    mime: &'static str,
) -> Vec<ControlMessage> {
    let encoded = BASE64.encode(bytes);

    if encoded.len() <= UPLOAD_CHUNK_BYTES {
        return vec![ControlMessage::FileUpload {
            filename: filename.to_string(),
            path: destination.to_string(),
            content: encoded,
            mime: mime.to_string(),
        }];
    }

    let upload_id = Uuid::new_v4().to_string();
    let slices = chunk_slices(&encoded, UPLOAD_CHUNK_BYTES);
    let total = slices.len() as u32;

    slices
        .into_iter()
        .enumerate()
        .map(|(index, chunk)| ControlMessage::FileUploadChunk {
            upload_id: upload_id.clone(),
            filename: filename.to_string(),
            path: destination.to_string(),
            index: index as u32,
            total,
            chunk: chunk.to_string(),
            mime: mime.to_string(),
        })
        .collect()
}

/// Split base64 text into the smallest number of equal-sized slices not
/// exceeding `max_len`. Base64 is ASCII, so byte indexing is safe.
fn chunk_slices(encoded: &str, max_len: usize) -> Vec<&str> {
    let total = encoded.len().div_ceil(max_len);
    let slice_len = encoded.len().div_ceil(total);

    let mut slices = Vec::with_capacity(total);
    let mut rest = encoded;
    while !rest.is_empty() {
        let cut = slice_len.min(rest.len());
        let (head, tail) = rest.split_at(cut);
        slices.push(head);
        rest = tail;
    }
    slices
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::TempDir;

    fn touch(dir: &TempDir, name: &str, contents: &[u8]) -> PathBuf {
        let path = dir.path().join(name);
        let mut file = fs::File::create(&path).unwrap();
        file.write_all(contents).unwrap();
        path
    }

    #[test]
    fn test_split_unescaped_protects_backslash_space() {
        assert_eq!(
            split_unescaped(r"/tmp/my\ file.png /tmp/other.txt"),
            vec!["/tmp/my file.png".to_string(), "/tmp/other.txt".to_string()]
        );
    }

    #[test]
    fn test_split_unescaped_plain_words() {
        assert_eq!(
            split_unescaped("hello  world"),
            vec!["hello".to_string(), "world".to_string()]
        );
    }

    #[test]
    fn test_plain_text_paste_forwards() {
        match process_paste("just some pasted prose") {
            PasteOutcome::Forward(text) => assert_eq!(text, "just some pasted prose"),
            other => panic!("expected forward, got {:?}", other),
        }
    }

    #[test]
    fn test_relative_paths_are_not_candidates() {
        match process_paste("src/main.rs Cargo.toml") {
            PasteOutcome::Forward(_) => {}
            other => panic!("expected forward, got {:?}", other),
        }
    }

    #[test]
    fn test_eligible_file_becomes_upload() {
        let dir = TempDir::new().unwrap();
        let path = touch(&dir, "shot.png", b"fake png bytes");

        match process_paste(&path.display().to_string()) {
            PasteOutcome::Upload {
                messages,
                replacement,
            } => {
                assert_eq!(messages.len(), 1);
                match &messages[0] {
                    ControlMessage::FileUpload {
                        filename,
                        path,
                        content,
                        mime,
                    } => {
                        assert!(filename.starts_with("shot_"));
                        assert!(filename.ends_with(".png"));
                        assert_eq!(path, &format!("{}/{}", REMOTE_UPLOAD_DIR, filename));
                        assert_eq!(
                            BASE64.decode(content).unwrap(),
                            b"fake png bytes"
                        );
                        assert_eq!(mime, "image/png");
                    }
                    other => panic!("expected file_upload, got {:?}", other),
                }
                assert!(replacement.starts_with("uploads/shot_"));
            }
            other => panic!("expected upload, got {:?}", other),
        }
    }

    #[test]
    fn test_unsupported_extension_forwards_verbatim() {
        let dir = TempDir::new().unwrap();
        let path = touch(&dir, "binary.exe", b"MZ");
        let paste = path.display().to_string();

        match process_paste(&paste) {
            PasteOutcome::Forward(text) => assert_eq!(text, paste),
            other => panic!("expected forward, got {:?}", other),
        }
    }

    #[test]
    fn test_oversized_file_forwards_verbatim() {
        let dir = TempDir::new().unwrap();
        let path = touch(&dir, "big.txt", b"x");
        // Grow past the ceiling without writing 10 MiB of real data.
        let file = fs::File::options().write(true).open(&path).unwrap();
        file.set_len(MAX_UPLOAD_BYTES + 1).unwrap();

        let paste = path.display().to_string();
        match process_paste(&paste) {
            PasteOutcome::Forward(text) => assert_eq!(text, paste),
            other => panic!("expected forward, got {:?}", other),
        }
    }

    #[test]
    fn test_one_bad_file_downgrades_whole_paste() {
        let dir = TempDir::new().unwrap();
        let good = touch(&dir, "ok.txt", b"fine");
        let bad = touch(&dir, "nope.bin", b"nope");
        let paste = format!("{} {}", good.display(), bad.display());

        match process_paste(&paste) {
            PasteOutcome::Forward(text) => assert_eq!(text, paste),
            other => panic!("expected forward, got {:?}", other),
        }
    }

    #[test]
    fn test_chunk_slices_are_equal_and_ordered() {
        let encoded = "A".repeat(1000);
        let slices = chunk_slices(&encoded, 300);
        assert_eq!(slices.len(), 4);
        assert_eq!(slices[0].len(), 250);
        assert_eq!(slices[1].len(), 250);
        assert_eq!(slices[2].len(), 250);
        assert_eq!(slices[3].len(), 250);
        assert_eq!(slices.concat(), encoded);
    }

    #[test]
    fn test_chunked_upload_messages_carry_sequence() {
        let bytes = vec![7u8; UPLOAD_CHUNK_BYTES];
        let messages = build_upload_messages("f.txt", "uploads/f.txt", &bytes, "text/plain");
        assert!(messages.len() > 1);

        let mut ids = std::collections::HashSet::new();
        for (expected_index, message) in messages.iter().enumerate() {
            match message {
                ControlMessage::FileUploadChunk {
                    upload_id,
                    index,
                    total,
                    ..
                } => {
                    assert_eq!(*index as usize, expected_index);
                    assert_eq!(*total as usize, messages.len());
                    ids.insert(upload_id.clone());
                }
                other => panic!("expected chunk, got {:?}", other),
            }
        }
        assert_eq!(ids.len(), 1, "all chunks share one upload id");
    }

    #[test]
    fn test_chunks_reassemble_exactly() {
        let bytes: Vec<u8> = (0..=255u8).cycle().take(UPLOAD_CHUNK_BYTES + 12345).collect();
        let messages = build_upload_messages("f.bin.txt", "uploads/f.txt", &bytes, "text/plain");

        let mut reassembled = String::new();
        for message in &messages {
            if let ControlMessage::FileUploadChunk { chunk, .. } = message {
                reassembled.push_str(chunk);
            }
        }
        assert_eq!(BASE64.decode(&reassembled).unwrap(), bytes);
    }

    #[test]
    fn test_remote_filename_sanitizes_and_stamps() {
        let name = remote_filename(Path::new("/tmp/my report (final).pdf"), 1_700_000_000_000);
        assert_eq!(name, "my_report__final__1700000000000.pdf");
    }
}
