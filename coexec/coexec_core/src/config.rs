//! Scheduler configuration.
//!
//! A `SchedulerConfig` carries every option a scheduler recognizes. Unset
//! fields take the documented defaults, both when built in code and when
//! deserialized from JSON with the external option names (`retryInterval`,
//! `cores`, ...). A bare name converts into a configuration with that name.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

use crate::error::{Result, RuntimeError};

/// Custom log function receiving every scheduler log line.
#[derive(Clone)]
pub struct LogSink(Arc<dyn Fn(&str) + Send + Sync>);

impl LogSink {
    /// Wrap a log function.
    pub fn new(sink: impl Fn(&str) + Send + Sync + 'static) -> Self {
        Self(Arc::new(sink))
    }

    /// Write one line to the sink.
    pub fn write(&self, line: &str) {
        (self.0)(line)
    }
}

impl fmt::Debug for LogSink {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("LogSink(..)")
    }
}

/// Configuration of a scheduler and the defaults of its executions.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SchedulerConfig {
    /// Name of the scheduler, used in log lines
    #[serde(default = "default_name")]
    pub name: String,

    /// Retries allowed after a failed attempt
    #[serde(default = "default_retries")]
    pub retries: u32,

    /// Pause between a failed attempt and its retry, in milliseconds
    #[serde(default = "default_retry_interval")]
    pub retry_interval: u64,

    /// Number of executions admitted at once by the bounded lane
    #[serde(default = "default_cores")]
    pub cores: usize,

    /// Number of fan-out members launched at once
    #[serde(default = "default_threads")]
    pub threads: usize,

    /// Emit log lines as events instead of writing them
    #[serde(default)]
    pub silent: bool,

    /// Limit admission of the bounded lane to `cores` executions
    #[serde(default = "default_pooling")]
    pub pooling: bool,

    /// Execution timeout in milliseconds, 0 disables it
    #[serde(default)]
    pub timeout: u64,

    /// Custom log function, ignored when `silent` is set
    #[serde(skip)]
    pub log: Option<LogSink>,
}

fn default_name() -> String {
    "default".to_string()
}

fn default_retries() -> u32 {
    1
}

fn default_retry_interval() -> u64 {
    200
}

fn default_cores() -> usize {
    1
}

fn default_threads() -> usize {
    1
}

fn default_pooling() -> bool {
    true
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            name: default_name(),
            retries: default_retries(),
            retry_interval: default_retry_interval(),
            cores: default_cores(),
            threads: default_threads(),
            silent: false,
            pooling: default_pooling(),
            timeout: 0,
            log: None,
        }
    }
}

impl SchedulerConfig {
    /// Create a default configuration with the given name.
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }

    /// Parse a JSON configuration record and validate it.
    ///
    /// # Arguments
    ///
    /// * `json` - A JSON object using the external option names.
    ///
    /// # Returns
    ///
    /// * `Ok(SchedulerConfig)` - The parsed configuration with defaults applied.
    /// * `Err(RuntimeError)` - If the record cannot be parsed or is invalid.
    pub fn from_json(json: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Check that the configuration can drive a scheduler.
    pub fn validate(&self) -> Result<()> {
        if self.name.is_empty() {
            return Err(RuntimeError::InvalidConfig(
                "name must not be empty".to_string(),
            ));
        }
        if self.cores == 0 {
            return Err(RuntimeError::InvalidConfig(
                "cores must be at least 1".to_string(),
            ));
        }
        if self.threads == 0 {
            return Err(RuntimeError::InvalidConfig(
                "threads must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}

impl From<&str> for SchedulerConfig {
    fn from(name: &str) -> Self {
        Self::named(name)
    }
}

impl From<String> for SchedulerConfig {
    fn from(name: String) -> Self {
        Self::named(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    #[test]
    fn test_defaults() {
        let config = SchedulerConfig::default();
        assert_eq!(config.name, "default");
        assert_eq!(config.retries, 1);
        assert_eq!(config.retry_interval, 200);
        assert_eq!(config.cores, 1);
        assert_eq!(config.threads, 1);
        assert!(!config.silent);
        assert!(config.pooling);
        assert_eq!(config.timeout, 0);
        assert!(config.log.is_none());
    }

    #[test]
    fn test_name_shorthand() {
        let config: SchedulerConfig = "workers".into();
        assert_eq!(config.name, "workers");
        assert_eq!(config.cores, 1);
    }

    #[test]
    fn test_from_json_applies_defaults() {
        let config =
            SchedulerConfig::from_json(r#"{"name": "io", "cores": 8, "retryInterval": 5}"#)
                .unwrap();
        assert_eq!(config.name, "io");
        assert_eq!(config.cores, 8);
        assert_eq!(config.retry_interval, 5);
        assert_eq!(config.retries, 1);
        assert!(config.pooling);
    }

    #[test]
    fn test_from_json_rejects_invalid() {
        assert!(matches!(
            SchedulerConfig::from_json(r#"{"cores": 0}"#),
            Err(RuntimeError::InvalidConfig(_))
        ));
        assert!(matches!(
            SchedulerConfig::from_json("not json"),
            Err(RuntimeError::Parse(_))
        ));
    }

    #[test]
    fn test_validate() {
        let mut config = SchedulerConfig::default();
        assert!(config.validate().is_ok());

        config.threads = 0;
        assert!(config.validate().is_err());

        config.threads = 1;
        config.name = String::new();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_log_sink_receives_lines() {
        let lines = Arc::new(Mutex::new(Vec::new()));
        let captured = lines.clone();
        let sink = LogSink::new(move |line| captured.lock().unwrap().push(line.to_string()));

        sink.write("hello");
        assert_eq!(lines.lock().unwrap().as_slice(), ["hello".to_string()]);
    }
}
