use chrono::{DateTime, Utc};
use serde::Serialize;
use strum_macros::{AsRefStr, Display, EnumString};

use crate::collector::ErrorKind;

/// Lifecycle state of a job.
///
/// ```text
/// created -> checking -> running -> retrying -> checking ...
///    |          |                      |
///    +-> dead   +-> retrying           +-> stopped -> terminal
/// ```
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, EnumString, Display, AsRefStr,
)]
#[strum(serialize_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum JobState {
    #[default]
    Created,
    /// Init succeeded; the first probe is pending.
    Checking,
    /// Admitted to the tick loop.
    Running,
    /// Waiting for `autodetection_retry` before checking again.
    Retrying,
    /// Init failed or retry is disabled. Never scheduled again.
    Dead,
    /// Stop requested; cleanup pending.
    Stopped,
    /// Cleaned up.
    Terminal,
}

impl JobState {
    /// Whether the job may still be scheduled.
    pub fn is_alive(&self) -> bool {
        matches!(self, Self::Created | Self::Checking | Self::Running | Self::Retrying)
    }
}

/// Counters kept per job.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct JobStats {
    /// Ticks that produced samples.
    pub ticks: u64,
    /// Failed ticks, including empty ones and timeouts.
    pub failures: u64,
    pub consecutive_failures: u32,
    /// Ticks dropped because the sink was full.
    pub dropped_ticks: u64,
    /// Sub-entity failures reported by successful ticks.
    pub partial_failures: u64,
    pub last_collected: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
    #[serde(skip)]
    pub last_error_kind: Option<ErrorKind>,
}

impl JobStats {
    pub(crate) fn record_success(&mut self, at: DateTime<Utc>, partial: u64) {
        self.ticks += 1;
        self.consecutive_failures = 0;
        self.partial_failures += partial;
        self.last_collected = Some(at);
    }

    pub(crate) fn record_failure(&mut self, kind: Option<ErrorKind>, error: String) {
        self.failures += 1;
        self.consecutive_failures = self.consecutive_failures.saturating_add(1);
        self.last_error = Some(error);
        self.last_error_kind = kind;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_state_names() {
        assert_eq!(JobState::Retrying.to_string(), "retrying");
        assert_eq!("dead".parse::<JobState>().unwrap(), JobState::Dead);
        assert!(JobState::Retrying.is_alive());
        assert!(!JobState::Terminal.is_alive());
    }

    #[test]
    fn test_stats_counters() {
        let mut stats = JobStats::default();
        stats.record_failure(Some(ErrorKind::Network), "refused".into());
        stats.record_failure(None, "no metrics collected".into());
        assert_eq!(stats.consecutive_failures, 2);

        stats.record_success(Utc::now(), 3);
        assert_eq!(stats.consecutive_failures, 0);
        assert_eq!(stats.failures, 2);
        assert_eq!(stats.ticks, 1);
        assert_eq!(stats.partial_failures, 3);
        assert_eq!(stats.last_error.as_deref(), Some("no metrics collected"));
    }
}
