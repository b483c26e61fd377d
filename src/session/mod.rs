mod registry;

pub use registry::{launch, CycleOutcome, SessionRegistry};

use std::fmt;
use std::time::Instant;

/// Where a managed session is in its life
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Lifecycle {
    /// Launch requested, not yet seen in the multiplexer listing
    Starting,
    Running,
    /// Probes or captures keep failing
    Unresponsive,
    /// Gone from the multiplexer; removed after a grace period
    Dead,
}

impl fmt::Display for Lifecycle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Lifecycle::Starting => "starting",
            Lifecycle::Running => "running",
            Lifecycle::Unresponsive => "unresponsive",
            Lifecycle::Dead => "dead",
        };
        f.write_str(name)
    }
}

/// One managed-process session
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Session {
    /// Multiplexer session name
    pub id: String,
    /// Short operator-facing number, never reused
    pub number: u32,
    pub alias: Option<String>,
    pub lifecycle: Lifecycle,
    pub dead_since: Option<Instant>,
}

impl Session {
    pub fn new(id: String, number: u32, lifecycle: Lifecycle) -> Self {
        Self {
            id,
            number,
            alias: None,
            lifecycle,
            dead_since: None,
        }
    }

    /// `3:main` with an alias, `3` without.
    pub fn label(&self) -> String {
        match &self.alias {
            Some(alias) => format!("{}:{}", self.number, alias),
            None => self.number.to_string(),
        }
    }

    pub fn is_dead(&self) -> bool {
        self.lifecycle == Lifecycle::Dead
    }
}
