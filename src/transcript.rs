//! Per-session transcript side-channel and checkpoints on disk.

use std::io::SeekFrom;
use std::path::PathBuf;

use anyhow::{Context, Result};
use tokio::io::{AsyncReadExt, AsyncSeekExt};
use tracing::{debug, info};

use crate::ansi::sanitize_line;

/// Bytes read from the end of a transcript per requested line
const BYTES_PER_LINE: u64 = 512;
const MIN_TAIL_BYTES: u64 = 16 * 1024;

#[derive(Debug, Clone)]
pub struct TranscriptStore {
    root: PathBuf,
}

impl TranscriptStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Raw output appended by the multiplexer for `session_id`
    pub fn transcript_path(&self, session_id: &str) -> PathBuf {
        self.root
            .join("transcripts")
            .join(format!("{}.log", file_stem(session_id)))
    }

    pub fn checkpoint_path(&self, session_id: &str) -> PathBuf {
        self.root
            .join("checkpoints")
            .join(format!("{}.txt", file_stem(session_id)))
    }

    pub async fn ensure_dirs(&self) -> Result<()> {
        for sub in ["transcripts", "checkpoints"] {
            let dir = self.root.join(sub);
            tokio::fs::create_dir_all(&dir)
                .await
                .with_context(|| format!("Failed to create {}", dir.display()))?;
        }
        Ok(())
    }

    /// Last `max_lines` lines of the transcript, sanitized, or `None` when the
    /// session has no transcript yet.
    pub async fn read_tail(&self, session_id: &str, max_lines: usize) -> Result<Option<String>> {
        let path = self.transcript_path(session_id);
        let mut file = match tokio::fs::File::open(&path).await {
            Ok(file) => file,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e).with_context(|| format!("Failed to open {}", path.display())),
        };

        let len = file.metadata().await?.len();
        let window = (max_lines as u64 * BYTES_PER_LINE).max(MIN_TAIL_BYTES).min(len);
        let start = len - window;
        file.seek(SeekFrom::Start(start)).await?;

        let mut raw = Vec::with_capacity(window as usize);
        file.read_to_end(&mut raw).await?;
        let text = String::from_utf8_lossy(&raw);

        let mut lines: Vec<&str> = text.split('\n').collect();
        if start > 0 && !lines.is_empty() {
            // first line is cut mid-way
            lines.remove(0);
        }
        if lines.last().is_some_and(|l| l.is_empty()) {
            lines.pop();
        }

        let skip = lines.len().saturating_sub(max_lines);
        let tail: Vec<String> = lines[skip..].iter().map(|l| sanitize_line(l)).collect();
        debug!(session = session_id, lines = tail.len(), "transcript tail read");
        Ok(Some(tail.join("\n")))
    }

    /// Write a bounded checkpoint of `lines`, replacing any previous one.
    pub async fn write_checkpoint(
        &self,
        session_id: &str,
        lines: &[String],
        limit: usize,
    ) -> Result<PathBuf> {
        self.ensure_dirs().await?;
        let path = self.checkpoint_path(session_id);
        let tmp = path.with_extension("txt.tmp");

        let skip = lines.len().saturating_sub(limit);
        let mut body = lines[skip..].join("\n");
        body.push('\n');

        tokio::fs::write(&tmp, body.as_bytes())
            .await
            .with_context(|| format!("Failed to write {}", tmp.display()))?;
        tokio::fs::rename(&tmp, &path)
            .await
            .with_context(|| format!("Failed to move checkpoint to {}", path.display()))?;

        info!(session = session_id, lines = lines.len() - skip, path = %path.display(), "checkpoint written");
        Ok(path)
    }

    /// Truncate the transcript when a session is recreated under the same name.
    pub async fn reset(&self, session_id: &str) -> Result<()> {
        let path = self.transcript_path(session_id);
        match tokio::fs::remove_file(&path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e).with_context(|| format!("Failed to reset {}", path.display())),
        }
    }
}

fn file_stem(session_id: &str) -> String {
    session_id
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '_' { c } else { '_' })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn store_with(session: &str, content: &str) -> (tempfile::TempDir, TranscriptStore) {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = TranscriptStore::new(dir.path());
        store.ensure_dirs().await.expect("dirs");
        tokio::fs::write(store.transcript_path(session), content)
            .await
            .expect("write");
        (dir, store)
    }

    #[tokio::test]
    async fn test_missing_transcript_is_none() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = TranscriptStore::new(dir.path());
        assert_eq!(store.read_tail("deck-1", 10).await.expect("read"), None);
    }

    #[tokio::test]
    async fn test_read_tail_returns_last_lines() {
        let (_dir, store) = store_with("deck-1", "a\nb\nhello\nworld\n").await;
        let tail = store.read_tail("deck-1", 2).await.expect("read");
        assert_eq!(tail.as_deref(), Some("hello\nworld"));
    }

    #[tokio::test]
    async fn test_read_tail_sanitizes() {
        let (_dir, store) = store_with("deck-1", "\x1b[2Kprogress 10%\rprogress 99%\r\n").await;
        let tail = store.read_tail("deck-1", 5).await.expect("read");
        assert_eq!(tail.as_deref(), Some("progress 99%"));
    }

    #[tokio::test]
    async fn test_read_tail_of_large_file() {
        let content: String = (0..5000).map(|i| format!("line {i}\n")).collect();
        let (_dir, store) = store_with("deck-1", &content).await;
        let tail = store.read_tail("deck-1", 3).await.expect("read").expect("some");
        assert_eq!(tail, "line 4997\nline 4998\nline 4999");
    }

    #[tokio::test]
    async fn test_checkpoint_is_bounded() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = TranscriptStore::new(dir.path());
        let lines: Vec<String> = (0..10).map(|i| i.to_string()).collect();

        let path = store.write_checkpoint("deck-2", &lines, 3).await.expect("write");
        let written = tokio::fs::read_to_string(path).await.expect("read");
        assert_eq!(written, "7\n8\n9\n");
    }

    #[tokio::test]
    async fn test_reset_removes_transcript() {
        let (_dir, store) = store_with("deck-1", "old\n").await;
        store.reset("deck-1").await.expect("reset");
        assert_eq!(store.read_tail("deck-1", 10).await.expect("read"), None);
        store.reset("deck-1").await.expect("reset twice");
    }

    #[test]
    fn test_file_stem_is_safe() {
        assert_eq!(file_stem("deck-1"), "deck-1");
        assert_eq!(file_stem("../x y"), "___x_y");
    }
}
