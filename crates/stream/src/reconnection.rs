//! Reconnect policy state and the single pending reconnect timer.

use std::time::Duration;

use tokio_util::sync::CancellationToken;

use crate::config::ReconnectConfig;

/// Attempt counters and the delay of the most recent backoff.
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct ReconnectState {
    attempts: u32,
    lifetime_attempts: u32,
    current_delay: Duration,
}

impl ReconnectState {
    pub(crate) fn new(config: &ReconnectConfig) -> Self {
        Self {
            attempts: 0,
            lifetime_attempts: 0,
            current_delay: config.initial_delay,
        }
    }

    /// Resets after a successful open. The lifetime counter is kept.
    pub(crate) fn reset(&mut self, config: &ReconnectConfig) {
        self.attempts = 0;
        self.current_delay = config.initial_delay;
    }

    /// Resets everything, including the lifetime counter.
    pub(crate) fn reset_all(&mut self, config: &ReconnectConfig) {
        *self = Self::new(config);
    }

    /// Advances to the next attempt and returns its delay, or `None` when
    /// the attempt budget is spent.
    pub(crate) fn advance(&mut self, config: &ReconnectConfig) -> Option<Duration> {
        if self.attempts >= config.max_attempts {
            return None;
        }
        if config
            .max_lifetime_attempts
            .is_some_and(|cap| self.lifetime_attempts >= cap)
        {
            return None;
        }
        self.attempts += 1;
        self.lifetime_attempts = self.lifetime_attempts.saturating_add(1);
        self.current_delay = config.delay_for_attempt(self.attempts);
        Some(self.current_delay)
    }

    pub(crate) fn attempts(&self) -> u32 {
        self.attempts
    }

    pub(crate) fn lifetime_attempts(&self) -> u32 {
        self.lifetime_attempts
    }

    pub(crate) fn current_delay(&self) -> Duration {
        self.current_delay
    }
}

/// The one reconnect timer that may be pending.
#[derive(Debug)]
pub(crate) struct PendingReconnect {
    pub(crate) id: u64,
    pub(crate) cancel: CancellationToken,
}

/// Cancels the pending reconnect timer, if any.
pub(crate) fn cancel_pending(pending: &mut Option<PendingReconnect>) -> bool {
    match pending.take() {
        Some(timer) => {
            timer.cancel.cancel();
            true
        }
        None => false,
    }
}
