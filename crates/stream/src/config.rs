//! Client configuration.

use std::time::Duration;

use url::Url;

use watchtower_protocol::constants::{
    HEARTBEAT_INTERVAL, MAX_MESSAGE_SIZE, STREAM_PATH, TOKEN_QUERY_PARAM,
};

use crate::cache::InvalidationTable;

/// Configuration for automatic reconnection with exponential backoff.
#[derive(Debug, Clone, PartialEq)]
pub struct ReconnectConfig {
    /// Delay before the first reconnection attempt.
    pub initial_delay: Duration,
    /// Maximum delay between attempts (backoff cap).
    pub max_delay: Duration,
    /// Consecutive failed attempts allowed before giving up. The counter
    /// resets on every successful open.
    pub max_attempts: u32,
    /// Optional cap on attempts across the whole session, never reset by a
    /// successful open. `None` tolerates flapping indefinitely.
    pub max_lifetime_attempts: Option<u32>,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(30),
            max_attempts: 10,
            max_lifetime_attempts: None,
        }
    }
}

impl ReconnectConfig {
    /// Delay for a given attempt number (1-based):
    /// `min(initial_delay * 2^(attempt - 1), max_delay)`.
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let exp = attempt.saturating_sub(1).min(31);
        let factor = 1u32 << exp;
        self.initial_delay
            .checked_mul(factor)
            .unwrap_or(self.max_delay)
            .min(self.max_delay)
    }
}

/// Event stream client configuration.
#[derive(Debug, Clone)]
pub struct StreamConfig {
    /// Base address of the server, e.g. `wss://api.example.com`.
    pub base_url: String,
    /// Endpoint path appended to `base_url`.
    pub path: String,
    /// Interval between heartbeat pings while connected.
    pub heartbeat_interval: Duration,
    /// Inbound frames larger than this are dropped.
    pub max_message_size: usize,
    pub reconnect: ReconnectConfig,
    /// Event type to cache key mapping.
    pub invalidation: InvalidationTable,
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            base_url: "ws://localhost:8000".into(),
            path: STREAM_PATH.into(),
            heartbeat_interval: HEARTBEAT_INTERVAL,
            max_message_size: MAX_MESSAGE_SIZE,
            reconnect: ReconnectConfig::default(),
            invalidation: InvalidationTable::default(),
        }
    }
}

impl StreamConfig {
    /// Builds the endpoint URL with the credential as a query parameter.
    pub fn endpoint_url(&self, token: &str) -> Result<Url, url::ParseError> {
        let joined = format!("{}{}", self.base_url.trim_end_matches('/'), self.path);
        let mut url = Url::parse(&joined)?;
        url.query_pairs_mut().append_pair(TOKEN_QUERY_PARAM, token);
        Ok(url)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reconnect_config_defaults() {
        let config = ReconnectConfig::default();
        assert_eq!(config.initial_delay, Duration::from_secs(1));
        assert_eq!(config.max_delay, Duration::from_secs(30));
        assert_eq!(config.max_attempts, 10);
        assert!(config.max_lifetime_attempts.is_none());
    }

    #[test]
    fn reconnect_config_delay_backoff() {
        let config = ReconnectConfig::default();
        // 1s, 2s, 4s, 8s, 16s, 30s (capped), 30s...
        let expected = [1, 2, 4, 8, 16, 30, 30, 30];
        for (i, &secs) in expected.iter().enumerate() {
            assert_eq!(
                config.delay_for_attempt((i + 1) as u32),
                Duration::from_secs(secs),
                "attempt {}",
                i + 1
            );
        }
    }

    #[test]
    fn delay_for_huge_attempt_saturates_at_max() {
        let config = ReconnectConfig::default();
        assert_eq!(config.delay_for_attempt(u32::MAX), config.max_delay);
        assert_eq!(config.delay_for_attempt(0), config.initial_delay);
    }

    #[test]
    fn endpoint_url_embeds_token() {
        let config = StreamConfig {
            base_url: "wss://api.example.com/".into(),
            ..StreamConfig::default()
        };
        let url = config.endpoint_url("abc 123").unwrap();
        assert_eq!(url.scheme(), "wss");
        assert_eq!(url.path(), "/ws/events");
        assert_eq!(url.query(), Some("token=abc+123"));
    }

    #[test]
    fn endpoint_url_rejects_garbage_base() {
        let config = StreamConfig {
            base_url: "not a url".into(),
            ..StreamConfig::default()
        };
        assert!(config.endpoint_url("t").is_err());
    }
}
