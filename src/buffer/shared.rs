use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::{Duration, Instant};

use super::RingBuffer;
use crate::ansi::{sanitize_line, style_at_end};

/// Most bytes held for a line whose newline has not arrived yet
const PARTIAL_LIMIT: usize = 8 * 1024;

#[derive(Debug)]
struct Inner {
    lines: RingBuffer<String>,
    /// Output received after the last newline (prompts usually live here).
    partial: String,
    last_update: Option<Instant>,
}

/// A session's scrollback, shared between its single writer (the attached
/// reader) and any number of readers.
///
/// Each call takes the lock for its own duration only, so a reader sees either
/// the state before an append or after it.
#[derive(Debug, Clone)]
pub struct SharedBuffer {
    inner: Arc<RwLock<Inner>>,
}

impl SharedBuffer {
    pub fn new(capacity: usize) -> Self {
        Self {
            inner: Arc::new(RwLock::new(Inner {
                lines: RingBuffer::new(capacity),
                partial: String::new(),
                last_update: None,
            })),
        }
    }

    fn read(&self) -> RwLockReadGuard<'_, Inner> {
        self.inner.read().unwrap_or_else(|e| e.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, Inner> {
        self.inner.write().unwrap_or_else(|e| e.into_inner())
    }

    /// Feed a chunk of raw output. Complete lines are sanitized and appended;
    /// a trailing fragment is held until its newline arrives.
    pub fn feed(&self, chunk: &str) {
        if chunk.is_empty() {
            return;
        }
        let mut inner = self.write();
        let mut rest = chunk;
        while let Some(pos) = rest.find('\n') {
            let mut line = std::mem::take(&mut inner.partial);
            line.push_str(&rest[..pos]);
            inner.lines.append(sanitize_line(&line));
            rest = &rest[pos + 1..];
        }
        inner.partial.push_str(rest);
        if inner.partial.len() > PARTIAL_LIMIT {
            compact(&mut inner);
        }
        inner.last_update = Some(Instant::now());
    }

    /// Append one already-complete line.
    pub fn push_line(&self, line: &str) {
        let mut inner = self.write();
        inner.lines.append(sanitize_line(line));
        inner.last_update = Some(Instant::now());
    }

    /// The most recent `n` lines, oldest first, including a pending fragment.
    pub fn last_lines(&self, n: usize) -> Vec<String> {
        let inner = self.read();
        let partial = sanitize_line(&inner.partial);
        if partial.is_empty() || n == 0 {
            return inner.lines.last_n(n);
        }
        let mut out = inner.lines.last_n(n - 1);
        out.push(partial);
        out
    }

    pub fn is_empty(&self) -> bool {
        let inner = self.read();
        inner.lines.is_empty() && inner.partial.is_empty()
    }

    #[cfg(test)]
    pub fn len(&self) -> usize {
        self.read().lines.len()
    }

    /// Time since the last write, `None` if never written.
    pub fn age(&self) -> Option<Duration> {
        self.read().last_update.map(|t| t.elapsed())
    }

    /// Never written, or not written within `threshold`.
    pub fn is_stale(&self, threshold: Duration) -> bool {
        self.age().map_or(true, |age| age > threshold)
    }

    pub fn clear(&self) {
        let mut inner = self.write();
        inner.lines.clear();
        inner.partial.clear();
        inner.last_update = None;
    }
}

/// Bound the pending fragment. Everything before its last carriage return
/// has already been overwritten on screen, so only the style in force there
/// survives. A fragment that is still too long is committed as a line.
fn compact(inner: &mut Inner) {
    if let Some(at) = inner.partial.rfind('\r') {
        let mut kept = style_at_end(&inner.partial[..at]).prefix();
        kept.push_str(&inner.partial[at + 1..]);
        inner.partial = kept;
    }
    if inner.partial.len() > PARTIAL_LIMIT {
        let line = std::mem::take(&mut inner.partial);
        inner.lines.append(sanitize_line(&line));
    }
}
