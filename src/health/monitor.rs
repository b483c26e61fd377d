use std::collections::HashMap;
use std::time::{Duration, Instant};

use tracing::{info, warn};

use super::{detect, Distress, HealthRecord, HealthStatus, LivenessProbe, ProbeOutcome};

#[derive(Debug, Clone, Copy)]
pub struct HealthPolicy {
    /// Failed or timed-out probes in a row before a session counts as dead
    pub failure_threshold: u32,
    pub probe_timeout: Duration,
}

impl Default for HealthPolicy {
    fn default() -> Self {
        Self {
            failure_threshold: 3,
            probe_timeout: Duration::from_millis(800),
        }
    }
}

/// Something the consumer has to act on. Each is emitted once per transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HealthEvent {
    /// Entered `Critical`: write a checkpoint
    Checkpoint,
    /// Probes started failing
    Unresponsive,
    /// Entered `Dead`: run recovery
    Died,
    /// Back to `Healthy` after warning, critical or failed probes
    Recovered,
}

/// Run `probe` under a deadline; an overrun counts as [`ProbeOutcome::TimedOut`].
pub async fn probe_with_timeout(
    probe: &dyn LivenessProbe,
    session_id: &str,
    timeout: Duration,
) -> ProbeOutcome {
    tokio::time::timeout(timeout, probe.probe(session_id))
        .await
        .unwrap_or(ProbeOutcome::TimedOut)
}

/// Health state machine for every tracked session.
#[derive(Debug, Default)]
pub struct HealthMonitor {
    policy: HealthPolicy,
    records: HashMap<String, HealthRecord>,
}

impl HealthMonitor {
    pub fn new(policy: HealthPolicy) -> Self {
        Self {
            policy,
            records: HashMap::new(),
        }
    }

    pub fn policy(&self) -> HealthPolicy {
        self.policy
    }

    pub fn record(&self, session_id: &str) -> Option<&HealthRecord> {
        self.records.get(session_id)
    }

    pub fn status(&self, session_id: &str) -> HealthStatus {
        self.record(session_id).map(|r| r.status).unwrap_or_default()
    }

    /// Fold one probe outcome and the latest captured text into the session's
    /// record. `recent` is `None` when no capture was available this round;
    /// the previous distress level then stands.
    pub fn observe(
        &mut self,
        session_id: &str,
        outcome: &ProbeOutcome,
        recent: Option<&str>,
    ) -> Option<HealthEvent> {
        let threshold = self.policy.failure_threshold.max(1);
        let record = self.records.entry(session_id.to_string()).or_default();
        record.last_check = Some(Instant::now());

        if record.status == HealthStatus::Dead {
            return None;
        }
        let previous = record.status;

        match outcome {
            ProbeOutcome::NotFound => {
                record.status = HealthStatus::Dead;
            }
            ProbeOutcome::TimedOut | ProbeOutcome::Failed(_) => {
                record.consecutive_failures += 1;
                if record.consecutive_failures >= threshold {
                    record.status = HealthStatus::Dead;
                } else if record.consecutive_failures == 1 {
                    warn!(session = session_id, ?outcome, "liveness probe failed");
                    return Some(HealthEvent::Unresponsive);
                }
            }
            ProbeOutcome::Alive => {
                let had_failures = record.consecutive_failures > 0;
                record.consecutive_failures = 0;

                let distress = match recent {
                    Some(text) => detect(text),
                    None => match previous {
                        HealthStatus::Critical => Distress::Critical,
                        HealthStatus::Warning => Distress::Warning,
                        _ => Distress::None,
                    },
                };
                record.status = match distress {
                    Distress::None => HealthStatus::Healthy,
                    Distress::Warning => HealthStatus::Warning,
                    Distress::Critical => HealthStatus::Critical,
                };

                if record.status != previous {
                    info!(session = session_id, from = %previous, to = %record.status, "health changed");
                }
                if record.status == HealthStatus::Critical && previous != HealthStatus::Critical {
                    return Some(HealthEvent::Checkpoint);
                }
                if record.status == HealthStatus::Healthy
                    && (had_failures || previous != HealthStatus::Healthy)
                {
                    return Some(HealthEvent::Recovered);
                }
                return None;
            }
        }

        if record.status == HealthStatus::Dead {
            warn!(session = session_id, ?outcome, "session is dead");
            return Some(HealthEvent::Died);
        }
        None
    }

    /// Start over for a session relaunched under the same id.
    pub fn reset(&mut self, session_id: &str) {
        self.records.remove(session_id);
    }

    pub fn forget(&mut self, session_id: &str) {
        self.records.remove(session_id);
    }
}
