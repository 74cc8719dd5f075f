use std::{fmt, time::Duration};

use serde::{Deserialize, Serialize};
use ulid::Ulid;

/// Identifies one (submission, endpoint) dispatch across all of its retries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct DispatchId(Ulid);

impl DispatchId {
    #[must_use]
    pub fn new() -> Self {
        Self(Ulid::new())
    }
}

impl Default for DispatchId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for DispatchId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Where a dispatch currently sits in its lifecycle.
///
/// ```text
/// Queued -> Claimed -> Succeeded
///                   -> ValidationFailed
///                   -> Failed
///                   -> RetryScheduled -> Queued
///                   -> RetriesExhausted
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum DispatchState {
    Queued,
    Claimed,
    Succeeded,
    /// One or more field checks failed; never retried.
    ValidationFailed(Vec<String>),
    /// Configuration or transformation failure; never retried.
    Failed(String),
    RetryScheduled {
        retry_count: u32,
        #[serde(with = "duration_millis")]
        delay: Duration,
    },
    RetriesExhausted {
        attempts: u32,
        reason: String,
    },
}

impl DispatchState {
    #[must_use]
    pub const fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::Succeeded
                | Self::ValidationFailed(_)
                | Self::Failed(_)
                | Self::RetriesExhausted { .. }
        )
    }
}

impl fmt::Display for DispatchState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Queued => f.write_str("queued"),
            Self::Claimed => f.write_str("claimed"),
            Self::Succeeded => f.write_str("succeeded"),
            Self::ValidationFailed(reasons) => {
                write!(f, "validation failed: {}", reasons.join("; "))
            }
            Self::Failed(reason) => write!(f, "failed: {reason}"),
            Self::RetryScheduled { retry_count, delay } => write!(
                f,
                "retry {retry_count} scheduled in {:.1}s",
                delay.as_secs_f64()
            ),
            Self::RetriesExhausted { attempts, reason } => {
                write!(f, "retries exhausted after {attempts} attempts: {reason}")
            }
        }
    }
}

mod duration_millis {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    #[allow(clippy::cast_possible_truncation, reason = "retry delays are far below u64::MAX ms")]
    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(d.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        u64::deserialize(d).map(Duration::from_millis)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_terminal_states() {
        assert!(!DispatchState::Queued.is_terminal());
        assert!(!DispatchState::Claimed.is_terminal());
        assert!(
            !DispatchState::RetryScheduled {
                retry_count: 1,
                delay: Duration::from_secs(2)
            }
            .is_terminal()
        );
        assert!(DispatchState::Succeeded.is_terminal());
        assert!(DispatchState::ValidationFailed(vec![]).is_terminal());
        assert!(DispatchState::Failed("bad transform".to_string()).is_terminal());
        assert!(
            DispatchState::RetriesExhausted {
                attempts: 3,
                reason: "HTTP 500".to_string()
            }
            .is_terminal()
        );
    }

    #[test]
    fn test_display() {
        let state = DispatchState::ValidationFailed(vec![
            "emailAddress: invalid format".to_string(),
            "missing required field: ssn".to_string(),
        ]);
        assert_eq!(
            state.to_string(),
            "validation failed: emailAddress: invalid format; missing required field: ssn"
        );
    }

    #[test]
    fn test_dispatch_ids_are_unique() {
        assert_ne!(DispatchId::new(), DispatchId::new());
    }
}
