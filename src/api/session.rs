//! Bearer-token session shared by every REST call.

use std::sync::atomic::{AtomicBool, Ordering};

use tokio::sync::watch;
use tracing::info;

/// Holds the current bearer token and broadcasts login/logout changes.
///
/// Any 401 from the backend calls [`AuthSession::logout`], so watchers (the
/// app, the binaries) can drop caches and go back to the login screen.
#[derive(Debug)]
pub struct AuthSession {
    token: watch::Sender<Option<String>>,
    onboarding_completed: AtomicBool,
}

impl AuthSession {
    /// Create a session, optionally already authenticated.
    #[must_use]
    pub fn new(token: Option<String>) -> Self {
        let (token, _rx) = watch::channel(token.filter(|t| !t.trim().is_empty()));
        Self {
            token,
            onboarding_completed: AtomicBool::new(false),
        }
    }

    /// Current bearer token.
    #[must_use]
    pub fn token(&self) -> Option<String> {
        self.token.borrow().clone()
    }

    /// Whether a token is held.
    #[must_use]
    pub fn is_authenticated(&self) -> bool {
        self.token.borrow().is_some()
    }

    /// Store a token after a successful login.
    pub fn set_token(&self, token: impl Into<String>) {
        self.token.send_replace(Some(token.into()));
    }

    /// Whether the account is past the onboarding wizard.
    #[must_use]
    pub fn onboarding_completed(&self) -> bool {
        self.onboarding_completed.load(Ordering::Acquire)
    }

    /// Record the onboarding flag from a login or an onboarding reply.
    pub fn set_onboarding_completed(&self, completed: bool) {
        self.onboarding_completed.store(completed, Ordering::Release);
    }

    /// Drop the token. Returns `false` if the session was already logged out.
    pub fn logout(&self) -> bool {
        self.onboarding_completed.store(false, Ordering::Release);
        let previous = self.token.send_replace(None);
        if previous.is_some() {
            info!("Session logged out");
        }
        previous.is_some()
    }

    /// Watch token changes; `None` means logged out.
    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<Option<String>> {
        self.token.subscribe()
    }
}

impl Default for AuthSession {
    fn default() -> Self {
        Self::new(None)
    }
}
