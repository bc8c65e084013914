//! Queue and server configuration
//!
//! Both structs can be built in code or loaded from environment variables:
//! - SIMULATION_TYPE (required)
//! - MIN_POLL_INTERVAL_SECS (optional, default: 1, never below 1)
//! - COMPUTE_SERVER_URL (required)
//! - REQUEST_TIMEOUT_SECS (optional, default: 30)

use std::time::Duration;

use crate::error::{QueueError, QueueResult};

/// Shortest delay the queue will wait between two polls of one item.
pub const MIN_POLL_INTERVAL: Duration = Duration::from_secs(1);

const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Settings for a [`RunQueue`](crate::RunQueue).
#[derive(Debug, Clone, PartialEq)]
pub struct QueueConfig {
    /// Application type stamped on every request (e.g. "elegant", "srw").
    pub simulation_type: String,
    min_poll_interval: Duration,
}

impl QueueConfig {
    /// Creates a configuration with the default poll floor
    pub fn new(simulation_type: impl Into<String>) -> Self {
        Self {
            simulation_type: simulation_type.into(),
            min_poll_interval: MIN_POLL_INTERVAL,
        }
    }

    /// Raise the poll floor. Values below one second are clamped up.
    pub fn with_min_poll_interval(mut self, interval: Duration) -> Self {
        self.min_poll_interval = interval.max(MIN_POLL_INTERVAL);
        self
    }

    /// Shortest allowed delay between polls.
    pub fn min_poll_interval(&self) -> Duration {
        self.min_poll_interval
    }

    /// Creates configuration from environment variables
    pub fn from_env() -> QueueResult<Self> {
        Self::from_vars(|key| std::env::var(key).ok())
    }

    fn from_vars(var: impl Fn(&str) -> Option<String>) -> QueueResult<Self> {
        let simulation_type = required(&var, "SIMULATION_TYPE")?;
        let mut config = Self::new(simulation_type);
        if let Some(secs) = optional_secs(&var, "MIN_POLL_INTERVAL_SECS")? {
            config = config.with_min_poll_interval(secs);
        }
        Ok(config)
    }
}

/// Connection settings for [`HttpTransport`](crate::HttpTransport).
#[derive(Debug, Clone, PartialEq)]
pub struct ServerConfig {
    /// Base URL of the compute service, without trailing slash.
    pub base_url: String,
    /// Per-request timeout.
    pub request_timeout: Duration,
}

impl ServerConfig {
    /// Creates a configuration with the default request timeout
    pub fn new(base_url: impl Into<String>) -> Self {
        let base_url = base_url.into();
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
        }
    }

    /// Override the request timeout.
    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    /// Creates configuration from environment variables
    pub fn from_env() -> QueueResult<Self> {
        Self::from_vars(|key| std::env::var(key).ok())
    }

    fn from_vars(var: impl Fn(&str) -> Option<String>) -> QueueResult<Self> {
        let mut config = Self::new(required(&var, "COMPUTE_SERVER_URL")?);
        if let Some(timeout) = optional_secs(&var, "REQUEST_TIMEOUT_SECS")? {
            config = config.with_request_timeout(timeout);
        }
        Ok(config)
    }
}

fn required(var: &impl Fn(&str) -> Option<String>, key: &str) -> QueueResult<String> {
    var(key)
        .filter(|value| !value.trim().is_empty())
        .ok_or_else(|| QueueError::Configuration(format!("{key} environment variable not set")))
}

fn optional_secs(
    var: &impl Fn(&str) -> Option<String>,
    key: &str,
) -> QueueResult<Option<Duration>> {
    var(key)
        .map(|raw| {
            raw.trim()
                .parse::<u64>()
                .map(Duration::from_secs)
                .map_err(|e| QueueError::Configuration(format!("{key}={raw:?}: {e}")))
        })
        .transpose()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn vars(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect();
        move |key: &str| map.get(key).cloned()
    }

    #[test]
    fn test_queue_config_defaults() {
        let config = QueueConfig::from_vars(vars(&[("SIMULATION_TYPE", "elegant")])).unwrap();
        assert_eq!(config.simulation_type, "elegant");
        assert_eq!(config.min_poll_interval(), MIN_POLL_INTERVAL);
    }

    #[test]
    fn test_poll_floor_cannot_be_lowered() {
        let config = QueueConfig::new("srw").with_min_poll_interval(Duration::from_millis(10));
        assert_eq!(config.min_poll_interval(), MIN_POLL_INTERVAL);

        let config = QueueConfig::from_vars(vars(&[
            ("SIMULATION_TYPE", "srw"),
            ("MIN_POLL_INTERVAL_SECS", "5"),
        ]))
        .unwrap();
        assert_eq!(config.min_poll_interval(), Duration::from_secs(5));
    }

    #[test]
    fn test_missing_simulation_type() {
        let err = QueueConfig::from_vars(vars(&[])).unwrap_err();
        assert!(matches!(err, QueueError::Configuration(_)));
        assert_eq!(
            err.to_string(),
            "Configuration error: SIMULATION_TYPE environment variable not set"
        );
    }

    #[test]
    fn test_server_config_from_vars() {
        let config = ServerConfig::from_vars(vars(&[
            ("COMPUTE_SERVER_URL", "http://localhost:8000/"),
            ("REQUEST_TIMEOUT_SECS", "5"),
        ]))
        .unwrap();
        assert_eq!(config.base_url, "http://localhost:8000");
        assert_eq!(config.request_timeout, Duration::from_secs(5));
    }

    #[test]
    fn test_malformed_timeout() {
        let err = ServerConfig::from_vars(vars(&[
            ("COMPUTE_SERVER_URL", "http://localhost:8000"),
            ("REQUEST_TIMEOUT_SECS", "soon"),
        ]))
        .unwrap_err();
        assert!(matches!(err, QueueError::Configuration(_)));
    }
}
