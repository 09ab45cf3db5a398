//! Configuration structures.
//!
//! Configuration is built from defaults, a JSON document, or environment
//! variables layered over the defaults.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

use super::errors::{Error, Result};

/// Global kernel configuration.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    /// Dispatch and snapshot configuration.
    #[serde(default)]
    pub kernel: KernelConfig,

    /// Persisted state configuration.
    #[serde(default)]
    pub state: StateConfig,

    /// Observability configuration.
    #[serde(default)]
    pub observability: ObservabilityConfig,
}

impl Config {
    /// Parse a JSON configuration document. Missing sections take their defaults.
    pub fn from_json_str(raw: &str) -> Result<Self> {
        serde_json::from_str(raw).map_err(|e| Error::config(e.to_string()))
    }

    /// Defaults overlaid with `MICROKERNEL_*` environment variables.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let mut config = Config::default();

        if let Some(dir) = lookup("MICROKERNEL_STATE_DIR") {
            config.state.dir = Some(PathBuf::from(dir));
        }
        if let Some(raw) = lookup("MICROKERNEL_QUEUE_CAPACITY") {
            let capacity: usize = raw
                .parse()
                .map_err(|_| Error::config(format!("MICROKERNEL_QUEUE_CAPACITY: {raw}")))?;
            if capacity == 0 {
                return Err(Error::config("MICROKERNEL_QUEUE_CAPACITY must be positive"));
            }
            config.kernel.event_queue_capacity = capacity;
        }
        if let Some(raw) = lookup("MICROKERNEL_REPLY_TIMEOUT") {
            config.kernel.default_reply_timeout = parse_duration("MICROKERNEL_REPLY_TIMEOUT", &raw)?;
        }
        if let Some(raw) = lookup("MICROKERNEL_SNAPSHOT_INTERVAL") {
            config.kernel.snapshot_interval =
                Some(parse_duration("MICROKERNEL_SNAPSHOT_INTERVAL", &raw)?);
        }
        if let Some(level) = lookup("MICROKERNEL_LOG_LEVEL") {
            config.observability.log_level = level;
        }

        Ok(config)
    }
}

fn parse_duration(key: &str, raw: &str) -> Result<Duration> {
    humantime::parse_duration(raw).map_err(|e| Error::config(format!("{key}: {e}")))
}

/// Dispatch loop and snapshot timer configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct KernelConfig {
    /// Pending events the shared inbox holds before producers wait.
    pub event_queue_capacity: usize,

    /// Reply deadline for events that expect a reply but set no timeout.
    #[serde(with = "humantime_serde")]
    pub default_reply_timeout: Duration,

    /// Period of the best-effort state snapshot task (disabled when absent).
    #[serde(default, with = "humantime_serde")]
    pub snapshot_interval: Option<Duration>,
}

impl Default for KernelConfig {
    fn default() -> Self {
        Self {
            event_queue_capacity: 100,
            default_reply_timeout: Duration::from_secs(5),
            snapshot_interval: None,
        }
    }
}

/// Persisted state configuration.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct StateConfig {
    /// Directory holding `<service>.state` blobs. No store when absent.
    #[serde(default)]
    pub dir: Option<PathBuf>,
}

/// Observability configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// Tracing log level (trace, debug, info, warn, error).
    pub log_level: String,

    /// Enable JSON log formatting.
    pub json_logs: bool,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            json_logs: false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(config.kernel.event_queue_capacity, 100);
        assert_eq!(config.kernel.default_reply_timeout, Duration::from_secs(5));
        assert!(config.kernel.snapshot_interval.is_none());
        assert!(config.state.dir.is_none());
    }

    #[test]
    fn test_from_json_partial_document() {
        let config = Config::from_json_str(
            r#"{
                "kernel": {
                    "event_queue_capacity": 8,
                    "default_reply_timeout": "250ms",
                    "snapshot_interval": "2s"
                },
                "state": { "dir": "/var/lib/microkernel" }
            }"#,
        )
        .unwrap();

        assert_eq!(config.kernel.event_queue_capacity, 8);
        assert_eq!(config.kernel.default_reply_timeout, Duration::from_millis(250));
        assert_eq!(config.kernel.snapshot_interval, Some(Duration::from_secs(2)));
        assert_eq!(
            config.state.dir.as_deref(),
            Some(std::path::Path::new("/var/lib/microkernel"))
        );
        assert_eq!(config.observability.log_level, "info");
    }

    #[test]
    fn test_from_json_rejects_garbage() {
        let err = Config::from_json_str("{not json").unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }

    #[test]
    fn test_env_overlay() {
        let vars: HashMap<&str, &str> = HashMap::from([
            ("MICROKERNEL_STATE_DIR", "/tmp/mk"),
            ("MICROKERNEL_QUEUE_CAPACITY", "16"),
            ("MICROKERNEL_REPLY_TIMEOUT", "1s 500ms"),
            ("MICROKERNEL_SNAPSHOT_INTERVAL", "30s"),
        ]);
        let config = Config::from_lookup(|k| vars.get(k).map(|v| v.to_string())).unwrap();

        assert_eq!(config.state.dir, Some(PathBuf::from("/tmp/mk")));
        assert_eq!(config.kernel.event_queue_capacity, 16);
        assert_eq!(config.kernel.default_reply_timeout, Duration::from_millis(1500));
        assert_eq!(config.kernel.snapshot_interval, Some(Duration::from_secs(30)));
    }

    #[test]
    fn test_env_overlay_rejects_bad_values() {
        let err = Config::from_lookup(|k| {
            (k == "MICROKERNEL_QUEUE_CAPACITY").then(|| "lots".to_string())
        })
        .unwrap_err();
        assert!(err.to_string().contains("MICROKERNEL_QUEUE_CAPACITY"));

        let err = Config::from_lookup(|k| {
            (k == "MICROKERNEL_QUEUE_CAPACITY").then(|| "0".to_string())
        })
        .unwrap_err();
        assert!(matches!(err, Error::Config(_)));

        let err = Config::from_lookup(|k| {
            (k == "MICROKERNEL_REPLY_TIMEOUT").then(|| "soon".to_string())
        })
        .unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }
}
