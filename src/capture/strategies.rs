use std::sync::Arc;
use std::time::{Duration, SystemTime};

use async_trait::async_trait;

use super::{CaptureMethod, CaptureStrategy, LiveFeeds, PaneDump};
use crate::ansi::sanitize_line;
use crate::error::DeckError;
use crate::transcript::TranscriptStore;

/// Reads the standing attached reader's buffer. No I/O.
pub struct LiveMemoryCapture {
    feeds: Arc<LiveFeeds>,
    stale_after: Duration,
}

impl LiveMemoryCapture {
    pub fn new(feeds: Arc<LiveFeeds>, stale_after: Duration) -> Self {
        Self { feeds, stale_after }
    }
}

#[async_trait]
impl CaptureStrategy for LiveMemoryCapture {
    fn method(&self) -> CaptureMethod {
        CaptureMethod::LiveMemory
    }

    async fn capture(&self, session_id: &str, max_lines: usize) -> Result<String, DeckError> {
        self.feeds.ensure_attached(session_id);

        match self.feeds.buffer(session_id) {
            Some(buffer) if !buffer.is_empty() && !buffer.is_stale(self.stale_after) => {
                Ok(buffer.last_lines(max_lines).join("\n"))
            }
            Some(buffer) if !buffer.is_empty() => Err(DeckError::CaptureUnavailable(
                "live reader is stale".to_string(),
            )),
            _ => Err(DeckError::CaptureUnavailable(
                "no live output yet".to_string(),
            )),
        }
    }
}

/// Tails the session's transcript file.
pub struct LogFallbackCapture {
    store: TranscriptStore,
    /// Transcripts not written within this window are skipped
    max_age: Option<Duration>,
}

impl LogFallbackCapture {
    pub fn new(store: TranscriptStore, max_age: Option<Duration>) -> Self {
        Self { store, max_age }
    }

    async fn is_fresh(&self, session_id: &str) -> bool {
        let Some(max_age) = self.max_age else {
            return true;
        };
        let path = self.store.transcript_path(session_id);
        let Ok(meta) = tokio::fs::metadata(&path).await else {
            return false;
        };
        meta.modified()
            .ok()
            .and_then(|m| SystemTime::now().duration_since(m).ok())
            .map_or(true, |age| age <= max_age)
    }
}

#[async_trait]
impl CaptureStrategy for LogFallbackCapture {
    fn method(&self) -> CaptureMethod {
        CaptureMethod::LogFallback
    }

    async fn capture(&self, session_id: &str, max_lines: usize) -> Result<String, DeckError> {
        if !self.is_fresh(session_id).await {
            return Err(DeckError::CaptureUnavailable(
                "no recent transcript".to_string(),
            ));
        }
        match self.store.read_tail(session_id, max_lines).await {
            Ok(Some(tail)) if !tail.is_empty() => Ok(tail),
            Ok(_) => Err(DeckError::CaptureUnavailable("transcript is empty".to_string())),
            Err(e) => Err(DeckError::CaptureUnavailable(format!("{:#}", e))),
        }
    }
}

/// Asks the multiplexer for a one-off snapshot of the pane.
pub struct DumpCapture {
    dumper: Arc<dyn PaneDump>,
}

impl DumpCapture {
    pub fn new(dumper: Arc<dyn PaneDump>) -> Self {
        Self { dumper }
    }
}

#[async_trait]
impl CaptureStrategy for DumpCapture {
    fn method(&self) -> CaptureMethod {
        CaptureMethod::OneShotDump
    }

    async fn capture(&self, session_id: &str, max_lines: usize) -> Result<String, DeckError> {
        let snapshot = self
            .dumper
            .dump(session_id, max_lines)
            .await
            .map_err(|e| {
                let message = format!("{:#}", e);
                if message.contains("can't find") {
                    DeckError::SessionNotFound(session_id.to_string())
                } else {
                    DeckError::CaptureUnavailable(message)
                }
            })?;

        // tmux pads the visible screen with blank rows below the cursor
        let lines: Vec<String> = snapshot
            .trim_end_matches('\n')
            .split('\n')
            .map(sanitize_line)
            .collect();
        let end = lines
            .iter()
            .rposition(|l| !l.trim().is_empty())
            .map_or(0, |i| i + 1);
        let start = end.saturating_sub(max_lines);
        Ok(lines[start..end].join("\n"))
    }
}
