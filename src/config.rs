//! Client configuration parsed from environment variables.

use std::path::PathBuf;
use std::time::Duration;

pub const DEFAULT_BASE_URL: &str = "http://127.0.0.1:5000";
pub const DEFAULT_EXPORT_POLL_INTERVAL_MS: u64 = 2_000;
pub const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 30;
pub const DEFAULT_CONNECT_TIMEOUT_SECS: u64 = 10;

/// Errors produced while reading configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// The base URL is not an `http://` or `https://` URL.
    #[error("invalid base URL: {0}")]
    InvalidBaseUrl(String),

    /// A variable was set but could not be parsed.
    #[error("invalid value for {key}: {value:?}")]
    Parse { key: &'static str, value: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HttpTimeouts {
    pub request_secs: u64,
    pub connect_secs: u64,
}

/// Cadence and optional cutoff for the export status loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollSettings {
    pub interval: Duration,
    /// `None` polls for as long as the server keeps answering "processing".
    pub max_duration: Option<Duration>,
}

impl Default for PollSettings {
    fn default() -> Self {
        Self {
            interval: Duration::from_millis(DEFAULT_EXPORT_POLL_INTERVAL_MS),
            max_duration: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PortalConfig {
    pub base_url: String,
    pub session_file: PathBuf,
    pub export_dir: PathBuf,
    pub poll: PollSettings,
    pub timeouts: HttpTimeouts,
}

impl PortalConfig {
    /// Build typed config from environment variables.
    ///
    /// Optional:
    /// - `PORTAL_BASE_URL`: default `http://127.0.0.1:5000`
    /// - `PORTAL_SESSION_FILE`: default `$HOME/.config/portal/session.json`
    /// - `PORTAL_EXPORT_DIR`: default current directory
    /// - `PORTAL_EXPORT_POLL_INTERVAL_MS`: default 2000
    /// - `PORTAL_EXPORT_MAX_WAIT_SECS`: unset or `0` means no cutoff
    /// - `PORTAL_REQUEST_TIMEOUT_SECS`: default 30, must be non-zero
    /// - `PORTAL_CONNECT_TIMEOUT_SECS`: default 10, must be non-zero
    ///
    /// # Errors
    ///
    /// Returns an error if the base URL or a numeric variable is malformed.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build config from an arbitrary key lookup.
    ///
    /// # Errors
    ///
    /// Same as [`PortalConfig::from_env`].
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|value| !value.trim().is_empty());

        let base_url = normalize_base_url(&get("PORTAL_BASE_URL").unwrap_or_else(|| DEFAULT_BASE_URL.to_owned()))?;

        let session_file = get("PORTAL_SESSION_FILE")
            .map(PathBuf::from)
            .unwrap_or_else(|| default_session_file(get("HOME")));
        let export_dir = get("PORTAL_EXPORT_DIR").map_or_else(|| PathBuf::from("."), PathBuf::from);

        let interval_ms = parse_nonzero(
            "PORTAL_EXPORT_POLL_INTERVAL_MS",
            get("PORTAL_EXPORT_POLL_INTERVAL_MS"),
            DEFAULT_EXPORT_POLL_INTERVAL_MS,
        )?;
        let max_wait_secs = parse_u64("PORTAL_EXPORT_MAX_WAIT_SECS", get("PORTAL_EXPORT_MAX_WAIT_SECS"), 0)?;

        let timeouts = HttpTimeouts {
            request_secs: parse_nonzero(
                "PORTAL_REQUEST_TIMEOUT_SECS",
                get("PORTAL_REQUEST_TIMEOUT_SECS"),
                DEFAULT_REQUEST_TIMEOUT_SECS,
            )?,
            connect_secs: parse_nonzero(
                "PORTAL_CONNECT_TIMEOUT_SECS",
                get("PORTAL_CONNECT_TIMEOUT_SECS"),
                DEFAULT_CONNECT_TIMEOUT_SECS,
            )?,
        };

        Ok(Self {
            base_url,
            session_file,
            export_dir,
            poll: PollSettings {
                interval: Duration::from_millis(interval_ms),
                max_duration: (max_wait_secs > 0).then(|| Duration::from_secs(max_wait_secs)),
            },
            timeouts,
        })
    }

    /// Replace the base URL, applying the same validation as the env path.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::InvalidBaseUrl`] for non-HTTP URLs.
    pub fn with_base_url(mut self, base_url: &str) -> Result<Self, ConfigError> {
        self.base_url = normalize_base_url(base_url)?;
        Ok(self)
    }
}

/// Trim trailing slashes and reject anything that is not HTTP(S).
///
/// # Errors
///
/// Returns [`ConfigError::InvalidBaseUrl`] for other schemes.
pub fn normalize_base_url(raw: &str) -> Result<String, ConfigError> {
    let trimmed = raw.trim().trim_end_matches('/');
    let has_host = |rest: &str| !rest.is_empty();
    match (trimmed.strip_prefix("http://"), trimmed.strip_prefix("https://")) {
        (Some(rest), _) | (_, Some(rest)) if has_host(rest) => Ok(trimmed.to_owned()),
        _ => Err(ConfigError::InvalidBaseUrl(raw.to_owned())),
    }
}

fn default_session_file(home: Option<String>) -> PathBuf {
    match home {
        Some(home) => PathBuf::from(home).join(".config").join("portal").join("session.json"),
        None => PathBuf::from(".portal").join("session.json"),
    }
}

fn parse_u64(key: &'static str, raw: Option<String>, default: u64) -> Result<u64, ConfigError> {
    let Some(raw) = raw else {
        return Ok(default);
    };
    raw.trim()
        .parse::<u64>()
        .map_err(|_| ConfigError::Parse { key, value: raw })
}

/// Like [`parse_u64`], but 0 is rejected.
fn parse_nonzero(key: &'static str, raw: Option<String>, default: u64) -> Result<u64, ConfigError> {
    match parse_u64(key, raw, default)? {
        0 => Err(ConfigError::Parse { key, value: "0".to_owned() }),
        value => Ok(value),
    }
}

#[cfg(test)]
#[path = "config_test.rs"]
mod tests;
