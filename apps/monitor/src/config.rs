//! Monitor configuration.
//!
//! Stored as TOML at `~/.config/watchtower/monitor.toml` unless a path is
//! given on the command line. A missing file means defaults. Durations are
//! written in milliseconds.

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::Context;
use serde::{Deserialize, Serialize};

use watchtower_protocol::EventType;
use watchtower_stream::{ReconnectConfig, StreamConfig};

/// Environment variable that overrides the configured token.
pub const TOKEN_ENV: &str = "WATCHTOWER_TOKEN";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MonitorConfig {
    /// Server base URL, `ws://` or `wss://`.
    pub base_url: String,

    /// Session credential. Required to start streaming.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub token: Option<String>,

    pub heartbeat_interval_ms: u64,
    pub max_message_size: usize,
    pub initial_delay_ms: u64,
    pub max_delay_ms: u64,
    pub max_attempts: u32,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_lifetime_attempts: Option<u32>,

    /// Event types to subscribe to on connect.
    pub subscribe: Vec<EventType>,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        let stream = StreamConfig::default();
        Self {
            base_url: stream.base_url,
            token: None,
            heartbeat_interval_ms: millis(stream.heartbeat_interval),
            max_message_size: stream.max_message_size,
            initial_delay_ms: millis(stream.reconnect.initial_delay),
            max_delay_ms: millis(stream.reconnect.max_delay),
            max_attempts: stream.reconnect.max_attempts,
            max_lifetime_attempts: stream.reconnect.max_lifetime_attempts,
            subscribe: vec![
                EventType::ThreatDetected,
                EventType::ProviderHealthChange,
                EventType::CostThresholdAlert,
                EventType::SystemStatusUpdate,
            ],
        }
    }
}

impl MonitorConfig {
    /// Loads from `path`, falling back to defaults when the file is absent.
    pub fn load_from(path: &Path) -> anyhow::Result<Self> {
        if !path.exists() {
            tracing::debug!(path = %path.display(), "no config file, using defaults");
            return Ok(Self::default());
        }
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("reading {}", path.display()))?;
        let config: MonitorConfig =
            toml::from_str(&content).with_context(|| format!("parsing {}", path.display()))?;
        Ok(config)
    }

    /// Applies the token override, if set and non-empty.
    pub fn with_token_override(mut self, token: Option<String>) -> Self {
        if let Some(token) = token.filter(|t| !t.is_empty()) {
            self.token = Some(token);
        }
        self
    }

    pub fn stream_config(&self) -> StreamConfig {
        StreamConfig {
            base_url: self.base_url.clone(),
            heartbeat_interval: Duration::from_millis(self.heartbeat_interval_ms),
            max_message_size: self.max_message_size,
            reconnect: ReconnectConfig {
                initial_delay: Duration::from_millis(self.initial_delay_ms),
                max_delay: Duration::from_millis(self.max_delay_ms),
                max_attempts: self.max_attempts,
                max_lifetime_attempts: self.max_lifetime_attempts,
            },
            ..StreamConfig::default()
        }
    }
}

/// Config path: the explicit argument, else the per-user default.
pub fn config_path(arg: Option<String>) -> PathBuf {
    if let Some(arg) = arg {
        return PathBuf::from(arg);
    }
    let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".into());
    PathBuf::from(home)
        .join(".config")
        .join("watchtower")
        .join("monitor.toml")
}

fn millis(d: Duration) -> u64 {
    u64::try_from(d.as_millis()).unwrap_or(u64::MAX)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_stream_defaults() {
        let config = MonitorConfig::default();
        assert_eq!(config.heartbeat_interval_ms, 30_000);
        assert_eq!(config.initial_delay_ms, 1_000);
        assert_eq!(config.max_delay_ms, 30_000);
        assert_eq!(config.max_attempts, 10);
        assert!(config.token.is_none());
        assert_eq!(config.stream_config().reconnect, ReconnectConfig::default());
    }

    #[test]
    fn partial_toml_keeps_defaults() {
        let toml_str = r#"
            base_url = "wss://watchtower.example.com"
            max_attempts = 3
            subscribe = ["threat_detected", "cost_threshold_alert"]
        "#;
        let config: MonitorConfig = toml::from_str(toml_str).unwrap();
        assert_eq!(config.base_url, "wss://watchtower.example.com");
        assert_eq!(config.max_attempts, 3);
        assert_eq!(config.initial_delay_ms, 1_000);
        assert_eq!(
            config.subscribe,
            vec![EventType::ThreatDetected, EventType::CostThresholdAlert]
        );
    }

    #[test]
    fn unknown_event_type_is_rejected() {
        let result: Result<MonitorConfig, _> = toml::from_str(r#"subscribe = ["weather"]"#);
        assert!(result.is_err());
    }

    #[test]
    fn load_missing_file_gives_defaults() {
        let tmp = tempfile::tempdir().unwrap();
        let config = MonitorConfig::load_from(&tmp.path().join("absent.toml")).unwrap();
        assert_eq!(config, MonitorConfig::default());
    }

    #[test]
    fn load_from_file() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("monitor.toml");
        let config = MonitorConfig {
            token: Some("from-file".into()),
            max_lifetime_attempts: Some(50),
            ..MonitorConfig::default()
        };
        std::fs::write(&path, toml::to_string_pretty(&config).unwrap()).unwrap();

        let loaded = MonitorConfig::load_from(&path).unwrap();
        assert_eq!(loaded, config);
        assert_eq!(loaded.stream_config().reconnect.max_lifetime_attempts, Some(50));
    }

    #[test]
    fn load_reports_bad_toml() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("monitor.toml");
        std::fs::write(&path, "max_attempts = \"many\"").unwrap();
        let err = MonitorConfig::load_from(&path).unwrap_err();
        assert!(err.to_string().contains("parsing"));
    }

    #[test]
    fn token_override() {
        let config = MonitorConfig {
            token: Some("file".into()),
            ..MonitorConfig::default()
        };
        let kept = config.clone().with_token_override(Some(String::new()));
        assert_eq!(kept.token.as_deref(), Some("file"));
        let replaced = config.with_token_override(Some("env".into()));
        assert_eq!(replaced.token.as_deref(), Some("env"));
    }

    #[test]
    fn explicit_path_wins() {
        assert_eq!(config_path(Some("/etc/wt.toml".into())), PathBuf::from("/etc/wt.toml"));
        assert!(config_path(None).ends_with("watchtower/monitor.toml"));
    }
}
