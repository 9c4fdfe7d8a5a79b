//! Client Configuration Settings
//!
//! Configuration types for the exchange client, loaded from environment
//! variables.

use std::path::PathBuf;
use std::time::Duration;

use reqwest::Url;

use crate::application::services::FeedSettings;

/// Default REST base URL of the exchange backend.
pub const DEFAULT_API_BASE: &str = "http://127.0.0.1:8000/api";

/// Default location of the persisted credential pair.
pub const DEFAULT_CREDENTIALS_PATH: &str = ".exchange-client/credentials.json";

/// HTTP settings for the request pipeline.
#[derive(Debug, Clone)]
pub struct HttpSettings {
    /// Base URL every resource path is resolved against.
    pub api_base: Url,
    /// Per-request timeout.
    pub request_timeout: Duration,
}

impl Default for HttpSettings {
    #[allow(clippy::expect_used)]
    fn default() -> Self {
        Self {
            api_base: normalize_base(DEFAULT_API_BASE)
                .expect("static default API base is a valid URL"),
            request_timeout: Duration::from_secs(10),
        }
    }
}

/// Backend health check settings.
#[derive(Debug, Clone)]
pub struct HealthSettings {
    /// Interval between checks.
    pub interval: Duration,
    /// Per-check timeout.
    pub timeout: Duration,
}

impl Default for HealthSettings {
    fn default() -> Self {
        Self {
            interval: Duration::from_millis(5000),
            timeout: Duration::from_millis(3000),
        }
    }
}

/// Credentials used by the binary to sign in on startup.
#[derive(Clone)]
pub struct LoginCredentials {
    username: String,
    password: String,
}

impl LoginCredentials {
    /// Create new login credentials.
    #[must_use]
    pub const fn new(username: String, password: String) -> Self {
        Self { username, password }
    }

    /// Get the username.
    #[must_use]
    pub fn username(&self) -> &str {
        &self.username
    }

    /// Get the password.
    #[must_use]
    pub fn password(&self) -> &str {
        &self.password
    }
}

impl std::fmt::Debug for LoginCredentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LoginCredentials")
            .field("username", &self.username)
            .field("password", &"[REDACTED]")
            .finish()
    }
}

/// Complete client configuration.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Request pipeline settings.
    pub http: HttpSettings,
    /// Credential store location.
    pub credentials_path: PathBuf,
    /// Live feed timing.
    pub feed: FeedSettings,
    /// Health monitor timing.
    pub health: HealthSettings,
    /// Startup sign-in, when both username and password are set.
    pub login: Option<LoginCredentials>,
    /// Symbol the binary subscribes to on startup.
    pub symbol: Option<String>,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            http: HttpSettings::default(),
            credentials_path: PathBuf::from(DEFAULT_CREDENTIALS_PATH),
            feed: FeedSettings::default(),
            health: HealthSettings::default(),
            login: None,
            symbol: None,
        }
    }
}

impl ClientConfig {
    /// Create configuration from environment variables.
    ///
    /// # Errors
    ///
    /// Returns an error if `EXCHANGE_API_BASE` is not an http(s) URL.
    pub fn from_env() -> Result<Self, ConfigError> {
        let defaults = Self::default();

        let api_base = match std::env::var("EXCHANGE_API_BASE") {
            Ok(value) if !value.trim().is_empty() => normalize_base(value.trim())?,
            _ => defaults.http.api_base,
        };

        let http = HttpSettings {
            api_base,
            request_timeout: parse_env_duration_secs(
                "EXCHANGE_REQUEST_TIMEOUT_SECS",
                defaults.http.request_timeout,
            ),
        };

        let credentials_path = std::env::var("EXCHANGE_CREDENTIALS_PATH")
            .ok()
            .filter(|v| !v.trim().is_empty())
            .map_or(defaults.credentials_path, PathBuf::from);

        let feed = FeedSettings {
            poll_interval: parse_env_duration_millis(
                "FEED_POLL_INTERVAL_MS",
                defaults.feed.poll_interval,
            ),
            push_connect_timeout: parse_env_duration_secs(
                "FEED_PUSH_CONNECT_TIMEOUT_SECS",
                defaults.feed.push_connect_timeout,
            ),
        };

        let health = HealthSettings {
            interval: parse_env_duration_millis("HEALTH_CHECK_INTERVAL_MS", defaults.health.interval),
            timeout: parse_env_duration_millis("HEALTH_CHECK_TIMEOUT_MS", defaults.health.timeout),
        };

        let login = match (
            non_empty_env("EXCHANGE_USERNAME"),
            non_empty_env("EXCHANGE_PASSWORD"),
        ) {
            (Some(username), Some(password)) => Some(LoginCredentials::new(username, password)),
            _ => None,
        };

        Ok(Self {
            http,
            credentials_path,
            feed,
            health,
            login,
            symbol: non_empty_env("EXCHANGE_SYMBOL"),
        })
    }

    /// Push channel endpoint for a symbol, derived from the API base.
    ///
    /// Same host, `https` upgraded to `wss` and anything else to `ws`.
    #[must_use]
    pub fn order_book_stream_url(&self, symbol: &str) -> Url {
        order_book_stream_url(&self.http.api_base, symbol)
    }

    /// Backend health endpoint, derived from the API base.
    #[must_use]
    pub fn health_url(&self) -> Url {
        health_url(&self.http.api_base)
    }
}

/// Configuration error.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// The API base could not be parsed as a URL.
    #[error("invalid API base URL {url}: {reason}")]
    InvalidUrl {
        /// Offending value.
        url: String,
        /// Parser message.
        reason: String,
    },
    /// The API base uses a scheme other than http or https.
    #[error("unsupported API base scheme: {0}")]
    UnsupportedScheme(String),
}

/// Parse an API base URL, ensuring a trailing slash so relative resource
/// paths resolve beneath it.
///
/// # Errors
///
/// Returns an error for unparseable URLs and non-http(s) schemes.
pub fn normalize_base(raw: &str) -> Result<Url, ConfigError> {
    let mut url = Url::parse(raw).map_err(|e| ConfigError::InvalidUrl {
        url: raw.to_string(),
        reason: e.to_string(),
    })?;

    if !matches!(url.scheme(), "http" | "https") {
        return Err(ConfigError::UnsupportedScheme(url.scheme().to_string()));
    }

    if !url.path().ends_with('/') {
        let path = format!("{}/", url.path());
        url.set_path(&path);
    }
    url.set_query(None);
    url.set_fragment(None);
    Ok(url)
}

/// Order book push endpoint: `ws(s)://<host>/ws/orderbook/?symbol=<symbol>`.
#[must_use]
pub fn order_book_stream_url(api_base: &Url, symbol: &str) -> Url {
    let mut url = origin_of(api_base);
    let scheme = if api_base.scheme() == "https" { "wss" } else { "ws" };
    // Switching between special schemes cannot fail.
    let _ = url.set_scheme(scheme);
    url.set_path("/ws/orderbook/");
    url.query_pairs_mut().append_pair("symbol", symbol);
    url
}

/// Health endpoint: the API base with a trailing `/api` stripped, plus
/// `/api/health/`.
#[must_use]
pub fn health_url(api_base: &Url) -> Url {
    let mut url = api_base.clone();
    let trimmed = api_base.path().trim_end_matches('/');
    let prefix = trimmed.strip_suffix("/api").unwrap_or(trimmed);
    url.set_path(&format!("{prefix}/api/health/"));
    url
}

fn origin_of(url: &Url) -> Url {
    let mut origin = url.clone();
    origin.set_path("/");
    origin.set_query(None);
    origin.set_fragment(None);
    origin
}

fn non_empty_env(key: &str) -> Option<String> {
    std::env::var(key)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

fn parse_env_duration_secs(key: &str, default: Duration) -> Duration {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .map_or(default, Duration::from_secs)
}

fn parse_env_duration_millis(key: &str, default: Duration) -> Duration {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .map_or(default, Duration::from_millis)
}
