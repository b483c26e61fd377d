use std::collections::{HashMap, HashSet};
use std::sync::{Mutex, MutexGuard};
use std::time::{Duration, Instant};

use tracing::debug;

use super::{CaptureMethod, CaptureResult, CaptureStrategy};
use crate::error::DeckError;

#[derive(Debug, Clone, Copy)]
pub struct CaptureOptions {
    /// Deadline for each strategy attempt
    pub timeout: Duration,
    /// How long a result is reused for the same session
    pub ttl: Duration,
}

impl Default for CaptureOptions {
    fn default() -> Self {
        Self {
            timeout: Duration::from_millis(400),
            ttl: Duration::from_millis(200),
        }
    }
}

#[derive(Debug, Clone)]
struct Cached {
    at: Instant,
    max_lines: usize,
    result: CaptureResult,
}

/// Ordered fallback over capture strategies, with a short TTL cache and at
/// most one capture in flight per session.
pub struct CaptureCascade {
    strategies: Vec<Box<dyn CaptureStrategy>>,
    options: CaptureOptions,
    cache: Mutex<HashMap<String, Cached>>,
    in_flight: Mutex<HashSet<String>>,
}

/// Clears the in-flight mark when the capture finishes or is dropped.
struct InFlight<'a> {
    set: &'a Mutex<HashSet<String>>,
    session_id: String,
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        lock(self.set).remove(&self.session_id);
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|e| e.into_inner())
}

impl CaptureCascade {
    pub fn new(strategies: Vec<Box<dyn CaptureStrategy>>, options: CaptureOptions) -> Self {
        Self {
            strategies,
            options,
            cache: Mutex::new(HashMap::new()),
            in_flight: Mutex::new(HashSet::new()),
        }
    }

    /// Strategy order, first tried first.
    #[cfg(test)]
    pub fn methods(&self) -> Vec<CaptureMethod> {
        self.strategies.iter().map(|s| s.method()).collect()
    }

    /// Most recent `max_lines` lines of `session_id`. Never fails; see
    /// [`CaptureResult::unavailable`].
    pub async fn capture(&self, session_id: &str, max_lines: usize) -> CaptureResult {
        if let Some(hit) = self.cached(session_id, max_lines) {
            return hit;
        }

        let Some(_guard) = self.begin(session_id) else {
            debug!(session = session_id, "capture already in flight");
            return self.last_known(session_id, max_lines).unwrap_or_else(|| {
                CaptureResult::unavailable(DeckError::CaptureUnavailable(
                    "capture already in progress".to_string(),
                ))
            });
        };

        let result = self.run(session_id, max_lines).await;
        lock(&self.cache).insert(
            session_id.to_string(),
            Cached {
                at: Instant::now(),
                max_lines,
                result: result.clone(),
            },
        );
        result
    }

    async fn run(&self, session_id: &str, max_lines: usize) -> CaptureResult {
        let mut last_error = None;

        for strategy in &self.strategies {
            let method = strategy.method();
            let attempt =
                tokio::time::timeout(self.options.timeout, strategy.capture(session_id, max_lines))
                    .await;

            match attempt {
                Ok(Ok(content)) => {
                    return CaptureResult::success(method, content).tail(max_lines);
                }
                Ok(Err(e)) => {
                    debug!(session = session_id, %method, error = %e, "capture fell through");
                    last_error = Some(e);
                }
                Err(_) => {
                    debug!(session = session_id, %method, "capture attempt timed out");
                    last_error = Some(DeckError::Timeout {
                        operation: "capture",
                        after: self.options.timeout,
                    });
                }
            }
        }

        CaptureResult::unavailable(last_error.unwrap_or_else(|| {
            DeckError::CaptureUnavailable("no capture strategies configured".to_string())
        }))
    }

    fn begin(&self, session_id: &str) -> Option<InFlight<'_>> {
        let mut set = lock(&self.in_flight);
        if !set.insert(session_id.to_string()) {
            return None;
        }
        Some(InFlight {
            set: &self.in_flight,
            session_id: session_id.to_string(),
        })
    }

    fn cached(&self, session_id: &str, max_lines: usize) -> Option<CaptureResult> {
        let cache = lock(&self.cache);
        let entry = cache.get(session_id)?;
        if entry.at.elapsed() >= self.options.ttl || entry.max_lines < max_lines {
            return None;
        }
        Some(entry.result.tail(max_lines))
    }

    fn last_known(&self, session_id: &str, max_lines: usize) -> Option<CaptureResult> {
        lock(&self.cache)
            .get(session_id)
            .map(|entry| entry.result.tail(max_lines))
    }

    /// Drop cached state for a session that went away.
    pub fn forget(&self, session_id: &str) {
        lock(&self.cache).remove(session_id);
    }
}
