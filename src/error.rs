use std::time::Duration;

use thiserror::Error;

/// Errors surfaced by the console core.
///
/// None of these stop the render loop; they are either shown to the operator
/// or folded into a per-session status.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum DeckError {
    /// An id, number or alias did not resolve to a tracked session
    #[error("no session matches '{0}'")]
    SessionNotFound(String),

    /// Every capture method failed for one poll
    #[error("capture unavailable: {0}")]
    CaptureUnavailable(String),

    /// A capture or liveness probe exceeded its deadline
    #[error("{operation} timed out after {}ms", .after.as_millis())]
    Timeout {
        operation: &'static str,
        after: Duration,
    },

    /// The launcher could not start a session
    #[error("failed to launch session: {0}")]
    LaunchFailure(String),

    /// Aliases must be non-empty, without whitespace, and not a bare number
    #[error("invalid alias '{0}'")]
    InvalidAlias(String),

    /// Internal bookkeeping went inconsistent (alias collision, dangling index)
    #[error("registry invariant violated: {0}")]
    RegistryInvariantViolation(String),

    /// A multiplexer command ran but reported failure
    #[error("multiplexer: {0}")]
    Multiplexer(String),

    #[error("io: {0}")]
    Io(String),
}

impl DeckError {
    /// Timeouts and capture failures are retried on the next tick.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            DeckError::CaptureUnavailable(_) | DeckError::Timeout { .. }
        )
    }
}

impl From<std::io::Error> for DeckError {
    fn from(err: std::io::Error) -> Self {
        DeckError::Io(err.to_string())
    }
}

pub type DeckResult<T> = std::result::Result<T, DeckError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_timeout_message() {
        let err = DeckError::Timeout {
            operation: "capture",
            after: Duration::from_millis(400),
        };
        assert_eq!(err.to_string(), "capture timed out after 400ms");
        assert!(err.is_transient());
    }

    #[test]
    fn test_not_found_is_not_transient() {
        let err = DeckError::SessionNotFound("main".into());
        assert_eq!(err.to_string(), "no session matches 'main'");
        assert!(!err.is_transient());
    }
}
