//! Per-session health: a liveness probe plus distress markers in recent
//! output, folded into a small state machine by [`HealthMonitor`].

mod distress;
mod monitor;

pub use distress::{detect, Distress};
pub use monitor::{probe_with_timeout, HealthEvent, HealthMonitor, HealthPolicy};

use std::fmt;
use std::time::Instant;

use async_trait::async_trait;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum HealthStatus {
    #[default]
    Healthy,
    Warning,
    Critical,
    /// Terminal
    Dead,
}

impl HealthStatus {
    /// Single-glyph marker for the status line
    pub fn icon(&self) -> &'static str {
        match self {
            HealthStatus::Healthy => "●",
            HealthStatus::Warning => "▲",
            HealthStatus::Critical => "■",
            HealthStatus::Dead => "✕",
        }
    }
}

impl fmt::Display for HealthStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            HealthStatus::Healthy => "healthy",
            HealthStatus::Warning => "warning",
            HealthStatus::Critical => "critical",
            HealthStatus::Dead => "dead",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct HealthRecord {
    pub status: HealthStatus,
    pub last_check: Option<Instant>,
    pub consecutive_failures: u32,
}

/// Answer from one liveness probe
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProbeOutcome {
    Alive,
    /// The multiplexer says the session (or its process) is gone
    NotFound,
    TimedOut,
    /// The probe itself could not run
    Failed(String),
}

/// Asks the multiplexer whether a session is still there.
#[async_trait]
pub trait LivenessProbe: Send + Sync {
    async fn probe(&self, session_id: &str) -> ProbeOutcome;
}
