//! Credential source for the event stream.

use std::sync::{PoisonError, RwLock};

use tokio::sync::broadcast;
use tracing::debug;

/// Login lifecycle notification from the token provider.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthEvent {
    LoggedIn,
    LoggedOut,
}

/// Supplies the current session credential and login/logout notifications.
pub trait TokenProvider: Send + Sync {
    /// Returns the current credential, or `None` when not authenticated.
    fn current_token(&self) -> Option<String>;

    /// Subscribes to login/logout notifications.
    fn auth_events(&self) -> broadcast::Receiver<AuthEvent>;
}

/// In-memory session token holder.
pub struct SessionTokens {
    token: RwLock<Option<String>>,
    events: broadcast::Sender<AuthEvent>,
}

impl SessionTokens {
    pub fn new() -> Self {
        let (events, _) = broadcast::channel(16);
        Self {
            token: RwLock::new(None),
            events,
        }
    }

    /// Creates a provider that already holds a credential.
    pub fn with_token(token: impl Into<String>) -> Self {
        let tokens = Self::new();
        *tokens.token.write().unwrap_or_else(PoisonError::into_inner) = Some(token.into());
        tokens
    }

    /// Stores the credential and notifies listeners.
    pub fn log_in(&self, token: impl Into<String>) {
        *self.token.write().unwrap_or_else(PoisonError::into_inner) = Some(token.into());
        // No receivers is fine: nobody is watching auth yet.
        let _ = self.events.send(AuthEvent::LoggedIn);
        debug!("session logged in");
    }

    /// Clears the credential and notifies listeners.
    pub fn log_out(&self) {
        *self.token.write().unwrap_or_else(PoisonError::into_inner) = None;
        let _ = self.events.send(AuthEvent::LoggedOut);
        debug!("session logged out");
    }
}

impl Default for SessionTokens {
    fn default() -> Self {
        Self::new()
    }
}

impl TokenProvider for SessionTokens {
    fn current_token(&self) -> Option<String> {
        self.token
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn auth_events(&self) -> broadcast::Receiver<AuthEvent> {
        self.events.subscribe()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn starts_without_token() {
        let tokens = SessionTokens::new();
        assert!(tokens.current_token().is_none());
    }

    #[test]
    fn with_token_is_authenticated() {
        let tokens = SessionTokens::with_token("t-1");
        assert_eq!(tokens.current_token().as_deref(), Some("t-1"));
    }

    #[tokio::test]
    async fn log_in_and_out_notify() {
        let tokens = SessionTokens::new();
        let mut rx = tokens.auth_events();

        tokens.log_in("secret");
        assert_eq!(tokens.current_token().as_deref(), Some("secret"));
        assert_eq!(rx.recv().await.unwrap(), AuthEvent::LoggedIn);

        tokens.log_out();
        assert!(tokens.current_token().is_none());
        assert_eq!(rx.recv().await.unwrap(), AuthEvent::LoggedOut);
    }
}
