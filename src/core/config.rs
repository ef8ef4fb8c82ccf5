//! Configuration for the sync layer and its binaries.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use url::Url;

use crate::core::errors::{SyncError, SyncResult};

/// Top-level configuration.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct SyncConfig {
    /// REST client settings.
    pub api: ApiConfig,
    /// Realtime channel settings.
    pub realtime: RealtimeConfig,
    /// Polling backstop settings.
    pub polling: PollingConfig,
    /// Message reconciliation settings.
    pub reconcile: ReconcileConfig,
    /// Process-wide message cache settings.
    pub cache: CacheConfig,
}

impl SyncConfig {
    /// Create a new config with default settings.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the REST base URL.
    #[must_use]
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.api.base_url = base_url.into();
        self
    }

    /// Set the bearer token used at startup.
    #[must_use]
    pub fn with_token(mut self, token: impl Into<String>) -> Self {
        self.api.token = Some(token.into());
        self
    }

    /// Set the inbox list polling interval.
    #[must_use]
    pub const fn with_list_interval(mut self, interval: Duration) -> Self {
        self.polling.list_interval = interval;
        self
    }

    /// Set the open-thread polling interval.
    #[must_use]
    pub const fn with_thread_interval(mut self, interval: Duration) -> Self {
        self.polling.thread_interval = interval;
        self
    }

    /// Set how often the session token is re-validated.
    #[must_use]
    pub const fn with_token_check_interval(mut self, interval: Duration) -> Self {
        self.polling.token_check_interval = interval;
        self
    }

    /// Load defaults overridden by `HELPDESK_*` environment variables.
    ///
    /// # Errors
    /// Returns an error if a numeric variable does not parse or validation fails.
    pub fn from_env() -> SyncResult<Self> {
        let mut config = Self::default();

        if let Ok(url) = std::env::var("HELPDESK_API_URL") {
            config.api.base_url = url;
        }
        if let Ok(token) = std::env::var("HELPDESK_TOKEN") {
            if !token.trim().is_empty() {
                config.api.token = Some(token);
            }
        }
        if let Some(secs) = env_secs("HELPDESK_LIST_POLL_SECS")? {
            config.polling.list_interval = Duration::from_secs(secs);
        }
        if let Some(secs) = env_secs("HELPDESK_THREAD_POLL_SECS")? {
            config.polling.thread_interval = Duration::from_secs(secs);
        }
        if let Some(secs) = env_secs("HELPDESK_TOKEN_CHECK_SECS")? {
            config.polling.token_check_interval = Duration::from_secs(secs);
        }

        config.validate()?;
        Ok(config)
    }

    /// Validate configuration invariants.
    ///
    /// # Errors
    /// Returns an error if any values are out of range or invalid.
    pub fn validate(&self) -> SyncResult<()> {
        let url = Url::parse(&self.api.base_url)?;
        if !matches!(url.scheme(), "http" | "https") {
            return Err(SyncError::Config(format!(
                "api.base_url must be http(s), got {}",
                url.scheme()
            )));
        }

        if self.api.page_size == 0 {
            return Err(SyncError::Config("api.page_size must be > 0".to_string()));
        }

        if self.polling.list_interval.is_zero()
            || self.polling.thread_interval.is_zero()
            || self.polling.token_check_interval.is_zero()
        {
            return Err(SyncError::Config(
                "polling intervals must be > 0".to_string(),
            ));
        }

        if self.cache.max_conversations == 0 {
            return Err(SyncError::Config(
                "cache.max_conversations must be > 0".to_string(),
            ));
        }

        if self.realtime.global_channel.trim().is_empty() {
            return Err(SyncError::Config(
                "realtime.global_channel must not be empty".to_string(),
            ));
        }

        Ok(())
    }
}

fn env_secs(name: &str) -> SyncResult<Option<u64>> {
    match std::env::var(name) {
        Ok(raw) => raw
            .trim()
            .parse()
            .map(Some)
            .map_err(|_| SyncError::Config(format!("{name} must be a number of seconds"))),
        Err(_) => Ok(None),
    }
}

/// REST client settings.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ApiConfig {
    /// Base URL including the `/api` path.
    pub base_url: String,
    /// Bearer token to start with, if already logged in.
    pub token: Option<String>,
    /// Request timeout.
    #[serde(with = "duration_serde")]
    pub request_timeout: Duration,
    /// Connection timeout.
    #[serde(with = "duration_serde")]
    pub connect_timeout: Duration,
    /// Maximum retries for failed idempotent requests.
    pub max_retries: u32,
    /// Base delay between retries in milliseconds.
    pub retry_delay_ms: u64,
    /// Conversations per inbox page.
    pub page_size: u32,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            base_url: "http://127.0.0.1:8000/api/".to_string(),
            token: None,
            request_timeout: Duration::from_secs(30),
            connect_timeout: Duration::from_secs(10),
            max_retries: 2,
            retry_delay_ms: 500,
            page_size: 20,
        }
    }
}

/// Realtime channel settings.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RealtimeConfig {
    /// Channel carrying `new-conversation` events.
    pub global_channel: String,
    /// Silence after which an incoming typing indicator expires.
    #[serde(with = "duration_serde_ms")]
    pub typing_ttl: Duration,
    /// Idle time after the last keystroke before `is_typing=false` is sent.
    #[serde(with = "duration_serde_ms")]
    pub typing_idle: Duration,
}

impl Default for RealtimeConfig {
    fn default() -> Self {
        Self {
            global_channel: "conversations".to_string(),
            typing_ttl: Duration::from_secs(3),
            typing_idle: Duration::from_secs(3),
        }
    }
}

/// Polling backstop settings.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct PollingConfig {
    /// Inbox list refresh interval.
    #[serde(with = "duration_serde")]
    pub list_interval: Duration,
    /// Open thread background refresh interval.
    #[serde(with = "duration_serde")]
    pub thread_interval: Duration,
    /// How long background refresh stays paused after a scroll event.
    #[serde(with = "duration_serde")]
    pub scroll_pause: Duration,
    /// Session token re-validation interval.
    #[serde(with = "duration_serde")]
    pub token_check_interval: Duration,
}

impl Default for PollingConfig {
    fn default() -> Self {
        Self {
            list_interval: Duration::from_secs(30),
            thread_interval: Duration::from_secs(12),
            scroll_pause: Duration::from_secs(8),
            token_check_interval: Duration::from_secs(60),
        }
    }
}

/// Message reconciliation settings.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ReconcileConfig {
    /// Max distance between a placeholder and its server echo.
    #[serde(with = "duration_serde")]
    pub echo_window: Duration,
}

impl Default for ReconcileConfig {
    fn default() -> Self {
        Self {
            echo_window: Duration::from_secs(60),
        }
    }
}

/// Process-wide message cache settings.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct CacheConfig {
    /// Whether cached threads are shown before history loads.
    pub enabled: bool,
    /// Maximum number of conversations kept (least recently used evicted).
    pub max_conversations: usize,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            max_conversations: 50,
        }
    }
}

/// Serde module for Duration serialization in seconds.
mod duration_serde {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        duration.as_secs().serialize(serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let secs = u64::deserialize(deserializer)?;
        Ok(Duration::from_secs(secs))
    }
}

/// Serde module for Duration serialization in milliseconds.
mod duration_serde_ms {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        u64::try_from(duration.as_millis())
            .unwrap_or(u64::MAX)
            .serialize(serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let millis = u64::deserialize(deserializer)?;
        Ok(Duration::from_millis(millis))
    }
}
