//! Job manager configuration.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::SchedulerError;

/// Configuration for the [`JobManager`](crate::JobManager).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobManagerConfig {
    /// Maximum number of worker tasks running at once.
    /// Defaults to 4.
    #[serde(default = "default_max_workers")]
    pub max_workers: usize,

    /// How often a job blocked on a predicate re-checks the running set,
    /// in milliseconds. A finishing job also wakes blocked registrations.
    /// Defaults to 500.
    #[serde(default = "default_predicate_poll_ms")]
    pub predicate_poll_ms: u64,
}

fn default_max_workers() -> usize {
    4
}

fn default_predicate_poll_ms() -> u64 {
    500
}

impl Default for JobManagerConfig {
    fn default() -> Self {
        Self {
            max_workers: default_max_workers(),
            predicate_poll_ms: default_predicate_poll_ms(),
        }
    }
}

impl JobManagerConfig {
    pub fn with_max_workers(mut self, max_workers: usize) -> Self {
        self.max_workers = max_workers;
        self
    }

    pub fn predicate_poll_interval(&self) -> Duration {
        Duration::from_millis(self.predicate_poll_ms.max(1))
    }

    /// # Errors
    ///
    /// Returns `SchedulerError::InvalidConfig` when `max_workers` is zero.
    pub fn validate(&self) -> Result<(), SchedulerError> {
        if self.max_workers == 0 {
            return Err(SchedulerError::InvalidConfig(
                "max_workers must be greater than 0".to_string(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = JobManagerConfig::default();
        assert_eq!(config.max_workers, 4);
        assert_eq!(config.predicate_poll_interval(), Duration::from_millis(500));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_zero_workers_rejected() {
        let config = JobManagerConfig::default().with_max_workers(0);
        assert!(matches!(
            config.validate(),
            Err(SchedulerError::InvalidConfig(_))
        ));
    }

    #[test]
    fn test_serde_defaults() {
        let config: JobManagerConfig = serde_json::from_str(r#"{"max_workers": 2}"#).unwrap();
        assert_eq!(config.max_workers, 2);
        assert_eq!(config.predicate_poll_ms, 500);
    }
}
