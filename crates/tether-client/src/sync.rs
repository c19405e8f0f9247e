//! Sync-back writer
//!
//! Applies remote file-change notifications to the local workspace.
//! Strictly best-effort: a failed individual write must never take the
//! interactive session down, so every failure is logged and swallowed
//! here. Paths are attacker-controllable and go through the path-safety
//! validator before any filesystem access.

use std::fs;
use std::io::Write;
use std::path::PathBuf;

use anyhow::{Context, Result};
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;

use tether_core::pathsafe;
use tether_protocol::FileChangeAction;

/// Applies `file_change` messages under a fixed workspace root
#[derive(Debug, Clone)]
pub struct SyncBackWriter {
    root: PathBuf,
}

impl SyncBackWriter {
    /// Create a writer rooted at the local workspace directory
    pub fn new(root: PathBuf) -> Self {
        Self { root }
    }

    /// Apply one change. Never propagates errors.
    pub fn apply(
        &self,
        action: FileChangeAction,
        path: &str,
        content: Option<&str>,
        mode: Option<u32>,
    ) {
        if let Err(e) = self.try_apply(action, path, content, mode) {
            tracing::warn!(path = path, "sync-back change not applied: {:#}", e);
        }
    }

    fn try_apply(
        &self,
        action: FileChangeAction,
        path: &str,
        content: Option<&str>,
        mode: Option<u32>,
    ) -> Result<()> {
        let target = pathsafe::confine(&self.root, path)
            .with_context(|| format!("path '{}' escapes the workspace", path))?;

        match action {
            FileChangeAction::Delete => self.delete(&target),
            FileChangeAction::Write => self.write(&target, content, mode),
        }
    }

    fn delete(&self, target: &std::path::Path) -> Result<()> {
        match fs::remove_file(target) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e).with_context(|| format!("failed to delete {}", target.display())),
        }
    }

    /// Write through a temp file in the destination's own directory,
    /// then rename into place. A crash mid-write leaves the destination
    /// either absent or at its prior content, never half-written.
    fn write(
        &self,
        target: &std::path::Path,
        content: Option<&str>,
        mode: Option<u32>,
    ) -> Result<()> {
        let encoded = content.context("write change without content")?;
        let bytes = BASE64
            .decode(encoded)
            .context("content is not valid base64")?;

        let parent = target
            .parent()
            .context("target path has no parent directory")?;
        fs::create_dir_all(parent)
            .with_context(|| format!("failed to create {}", parent.display()))?;

        let mut temp = tempfile::NamedTempFile::new_in(parent)
            .context("failed to create temp file for atomic write")?;
        temp.write_all(&bytes).context("failed to write content")?;
        temp.flush().context("failed to flush content")?;
        temp.persist(target)
            .with_context(|| format!("failed to move into place at {}", target.display()))?;

        if let Some(mode) = mode {
            apply_mode(target, mode);
        }

        Ok(())
    }
}

/// Apply file-mode bits. Failure is non-fatal (some platforms reject
/// certain modes).
#[cfg(unix)]
fn apply_mode(target: &std::path::Path, mode: u32) {
    use std::os::unix::fs::PermissionsExt;

    if let Err(e) = fs::set_permissions(target, fs::Permissions::from_mode(mode)) {
        tracing::warn!(
            path = %target.display(),
            mode = format!("{:o}", mode),
            "could not apply file mode: {}",
            e
        );
    }
}

#[cfg(not(unix))]
fn apply_mode(_target: &std::path::Path, _mode: u32) {}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn writer() -> (TempDir, SyncBackWriter) {
        let dir = TempDir::new().unwrap();
        let writer = SyncBackWriter::new(dir.path().to_path_buf());
        (dir, writer)
    }

    fn b64(data: &[u8]) -> String {
        BASE64.encode(data)
    }

    #[test]
    fn test_write_creates_file_and_parents() {
        let (dir, writer) = writer();
        writer.apply(
            FileChangeAction::Write,
            "src/deep/nested.rs",
            Some(&b64(b"fn main() {}")),
            None,
        );
        let written = fs::read(dir.path().join("src/deep/nested.rs")).unwrap();
        assert_eq!(written, b"fn main() {}");
    }

    #[test]
    fn test_write_then_delete_leaves_nothing() {
        let (dir, writer) = writer();
        writer.apply(FileChangeAction::Write, "note.txt", Some(&b64(b"hi")), None);
        assert!(dir.path().join("note.txt").exists());

        writer.apply(FileChangeAction::Delete, "note.txt", None, None);
        assert!(!dir.path().join("note.txt").exists());
    }

    #[test]
    fn test_delete_of_absent_file_is_silent() {
        let (_dir, writer) = writer();
        writer.apply(FileChangeAction::Delete, "never-existed.txt", None, None);
    }

    #[test]
    fn test_write_is_idempotent() {
        let (dir, writer) = writer();
        for _ in 0..2 {
            writer.apply(
                FileChangeAction::Write,
                "same.txt",
                Some(&b64(b"payload")),
                Some(0o640),
            );
        }
        let written = fs::read(dir.path().join("same.txt")).unwrap();
        assert_eq!(written, b"payload");

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let mode = fs::metadata(dir.path().join("same.txt"))
                .unwrap()
                .permissions()
                .mode();
            assert_eq!(mode & 0o777, 0o640);
        }
    }

    #[test]
    fn test_traversal_paths_mutate_nothing() {
        let (dir, writer) = writer();
        let sentinel = dir.path().join("sentinel.txt");
        fs::write(&sentinel, b"untouched").unwrap();

        for path in ["../evil.txt", "/etc/evil.txt", "", "a/../../evil.txt"] {
            writer.apply(FileChangeAction::Write, path, Some(&b64(b"evil")), None);
            writer.apply(FileChangeAction::Delete, path, None, None);
        }

        // Nothing new appeared in the workspace and nothing escaped it.
        let entries: Vec<_> = fs::read_dir(dir.path())
            .unwrap()
            .map(|e| e.unwrap().file_name())
            .collect();
        assert_eq!(entries, vec![std::ffi::OsString::from("sentinel.txt")]);
        assert_eq!(fs::read(&sentinel).unwrap(), b"untouched");
        assert!(!dir.path().parent().unwrap().join("evil.txt").exists());
    }

    #[test]
    fn test_overwrite_replaces_whole_content() {
        let (dir, writer) = writer();
        writer.apply(
            FileChangeAction::Write,
            "file.txt",
            Some(&b64(b"first version, long")),
            None,
        );
        writer.apply(
            FileChangeAction::Write,
            "file.txt",
            Some(&b64(b"v2")),
            None,
        );
        assert_eq!(fs::read(dir.path().join("file.txt")).unwrap(), b"v2");
    }

    #[test]
    fn test_invalid_base64_leaves_prior_state() {
        let (dir, writer) = writer();
        writer.apply(
            FileChangeAction::Write,
            "file.txt",
            Some(&b64(b"good")),
            None,
        );
        writer.apply(
            FileChangeAction::Write,
            "file.txt",
            Some("!!! not base64 !!!"),
            None,
        );
        assert_eq!(fs::read(dir.path().join("file.txt")).unwrap(), b"good");
    }
}
