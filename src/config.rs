use rand::Rng;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Bounded, randomized retry for writes that hit a locked database.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
    /// Retries after the first attempt before giving up.
    pub max_retries: u32,
    /// Lower bound of the backoff window, in milliseconds.
    pub min_backoff_ms: u64,
    /// Upper bound of the backoff window, in milliseconds.
    pub max_backoff_ms: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 100,
            min_backoff_ms: 100,
            max_backoff_ms: 500,
        }
    }
}

impl RetryPolicy {
    pub fn new(max_retries: u32) -> Self {
        Self {
            max_retries,
            ..Self::default()
        }
    }

    pub fn with_backoff_ms(mut self, min: u64, max: u64) -> Self {
        self.min_backoff_ms = min;
        self.max_backoff_ms = max;
        self
    }

    /// Draw a sleep uniformly from the backoff window.
    pub fn backoff(&self) -> Duration {
        let (lo, hi) = if self.min_backoff_ms <= self.max_backoff_ms {
            (self.min_backoff_ms, self.max_backoff_ms)
        } else {
            (self.max_backoff_ms, self.min_backoff_ms)
        };
        Duration::from_millis(rand::thread_rng().gen_range(lo..=hi))
    }
}

/// SQLite database configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SqliteConfig {
    /// Path to the SQLite database file
    pub db_path: PathBuf,
    /// How long the engine itself waits on a lock before reporting busy.
    #[serde(default = "default_busy_timeout_ms")]
    pub busy_timeout_ms: u64,
    #[serde(default)]
    pub retry: RetryPolicy,
}

const fn default_busy_timeout_ms() -> u64 {
    5_000
}

impl SqliteConfig {
    /// Create a config for `db_path` with default timeouts and retries.
    pub fn new(db_path: impl Into<PathBuf>) -> Self {
        Self {
            db_path: db_path.into(),
            busy_timeout_ms: default_busy_timeout_ms(),
            retry: RetryPolicy::default(),
        }
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_busy_timeout_ms(mut self, busy_timeout_ms: u64) -> Self {
        self.busy_timeout_ms = busy_timeout_ms;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_documented_values() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.max_retries, 100);
        assert_eq!((policy.min_backoff_ms, policy.max_backoff_ms), (100, 500));
        assert_eq!(SqliteConfig::new("a.db").busy_timeout_ms, 5_000);
    }

    #[test]
    fn backoff_stays_in_window() {
        let policy = RetryPolicy::new(3).with_backoff_ms(10, 20);
        for _ in 0..200 {
            let d = policy.backoff();
            assert!(d >= Duration::from_millis(10) && d <= Duration::from_millis(20));
        }
    }

    #[test]
    fn inverted_window_is_swapped() {
        let policy = RetryPolicy::new(1).with_backoff_ms(9, 3);
        let d = policy.backoff();
        assert!(d >= Duration::from_millis(3) && d <= Duration::from_millis(9));
    }

    #[test]
    fn deserializes_with_defaults() {
        let config: SqliteConfig =
            serde_json::from_str(r#"{"db_path":"data.db","retry":{"max_retries":5}}"#).unwrap();
        assert_eq!(config.db_path, PathBuf::from("data.db"));
        assert_eq!(config.busy_timeout_ms, 5_000);
        assert_eq!(config.retry, RetryPolicy::new(5));
    }
}
