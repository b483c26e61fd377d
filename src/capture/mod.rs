//! Pulling recent styled output out of managed sessions.
//!
//! A [`CaptureCascade`] holds an ordered list of [`CaptureStrategy`]s and
//! returns the first one that produces content. Capture never fails outright:
//! when every strategy gives up the result carries `CaptureMethod::None` and
//! the last error, which the UI shows as an offline/waiting state.

mod cascade;
mod live;
mod strategies;

pub use cascade::{CaptureCascade, CaptureOptions};
pub use live::LiveFeeds;
pub use strategies::{DumpCapture, LiveMemoryCapture, LogFallbackCapture};

use std::fmt;

use anyhow::Result;
use async_trait::async_trait;

use crate::error::DeckError;

/// Which strategy produced a capture
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CaptureMethod {
    LiveMemory,
    LogFallback,
    OneShotDump,
    None,
}

impl fmt::Display for CaptureMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            CaptureMethod::LiveMemory => "live",
            CaptureMethod::LogFallback => "log",
            CaptureMethod::OneShotDump => "dump",
            CaptureMethod::None => "none",
        };
        f.write_str(name)
    }
}

/// Outcome of one capture call. Content always comes from a single method.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CaptureResult {
    pub content: String,
    pub method: CaptureMethod,
    pub error: Option<DeckError>,
}

impl CaptureResult {
    pub fn success(method: CaptureMethod, content: String) -> Self {
        Self {
            content,
            method,
            error: None,
        }
    }

    pub fn unavailable(error: DeckError) -> Self {
        Self {
            content: String::new(),
            method: CaptureMethod::None,
            error: Some(error),
        }
    }

    pub fn is_success(&self) -> bool {
        self.method != CaptureMethod::None
    }

    pub fn lines(&self) -> Vec<&str> {
        if self.content.is_empty() {
            Vec::new()
        } else {
            self.content.split('\n').collect()
        }
    }

    /// Same capture, restricted to its last `max_lines` lines.
    pub fn tail(&self, max_lines: usize) -> Self {
        let lines = self.lines();
        let skip = lines.len().saturating_sub(max_lines);
        Self {
            content: lines[skip..].join("\n"),
            method: self.method,
            error: self.error.clone(),
        }
    }
}

/// One way of obtaining a session's recent output.
///
/// `Err` means "fall through to the next strategy"; it is never surfaced as a
/// panic or propagated past the cascade.
#[async_trait]
pub trait CaptureStrategy: Send + Sync {
    fn method(&self) -> CaptureMethod;

    async fn capture(&self, session_id: &str, max_lines: usize) -> Result<String, DeckError>;
}

/// Snapshot of a pane's visible buffer, taken on demand.
#[async_trait]
pub trait PaneDump: Send + Sync {
    async fn dump(&self, session_id: &str, lines: usize) -> Result<String>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tail_keeps_method() {
        let result = CaptureResult::success(CaptureMethod::LogFallback, "a\nb\nc".into());
        let tail = result.tail(2);
        assert_eq!(tail.content, "b\nc");
        assert_eq!(tail.method, CaptureMethod::LogFallback);
        assert_eq!(result.tail(10).content, "a\nb\nc");
    }

    #[test]
    fn test_unavailable_is_displayable() {
        let result = CaptureResult::unavailable(DeckError::CaptureUnavailable("x".into()));
        assert!(!result.is_success());
        assert!(result.lines().is_empty());
        assert_eq!(result.method.to_string(), "none");
    }
}
