//! Client configuration from environment variables.

use std::path::PathBuf;
use std::time::Duration;

use chatdesk_shared::is_loopback_host;

/// Protocol timing constants. Tests shrink these; production uses `Default`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChatTimings {
    /// Interval between `ping` frames while connected.
    pub heartbeat_interval: Duration,
    /// Fixed delay before a reconnect attempt.
    pub reconnect_delay: Duration,
    /// Abnormal closes tolerated before the connection enters `Error`.
    pub max_reconnect_attempts: u32,
    /// How long an optimistic message may stay pending before it is dropped.
    pub pending_timeout: Duration,
    /// Settling delay between selecting a conversation and subscribing.
    pub subscribe_delay: Duration,
    /// Maximum `created_at` drift between an optimistic message and its echo.
    pub echo_window: Duration,
}

impl Default for ChatTimings {
    fn default() -> Self {
        Self {
            heartbeat_interval: Duration::from_secs(30),
            reconnect_delay: Duration::from_secs(3),
            max_reconnect_attempts: 5,
            pending_timeout: Duration::from_secs(10),
            subscribe_delay: Duration::from_secs(1),
            echo_window: Duration::from_secs(10),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("invalid value for {var}: {value:?}")]
    Invalid { var: &'static str, value: String },
}

/// Runtime configuration for the chat console.
#[derive(Debug, Clone)]
pub struct ChatConfig {
    /// Backend host, with optional port (e.g. `api.example.com` or `localhost:8000`).
    pub backend_host: String,
    /// Base URL for REST calls, derived from the host unless overridden.
    pub api_base_url: String,
    pub session_key: Option<String>,
    pub auth_seed: Option<String>,
    /// Operator id used to recognise assignment events.
    pub operator_id: Option<String>,
    pub operator_name: Option<String>,
    /// Directory for persisted settings and caches (platform config dir when unset).
    pub data_dir: Option<PathBuf>,
    /// Sound asset for alerts; the synthesized tone is used when unset or unplayable.
    pub sound_asset: Option<PathBuf>,
    /// Ignore stored notification preferences and alert on everything.
    pub force_alerts: bool,
    pub message_page_size: u32,
    pub timings: ChatTimings,
}

impl ChatConfig {
    /// Read configuration from the environment.
    ///
    /// Environment variables:
    /// - `CHATDESK_BACKEND_HOST`: backend host (default: "localhost:8000")
    /// - `CHATDESK_API_BASE_URL`: REST base URL override
    /// - `CHATDESK_SESSION_KEY` / `CHATDESK_AUTH_SEED`: credential (default: read from storage)
    /// - `CHATDESK_OPERATOR_ID` / `CHATDESK_OPERATOR_NAME`
    /// - `CHATDESK_DATA_DIR`: storage directory
    /// - `CHATDESK_SOUND_ASSET`: path to the alert sound
    /// - `CHATDESK_FORCE_ALERTS`: "1"/"true" to force every alert on
    /// - `CHATDESK_PAGE_SIZE`: messages fetched per page (default: 50)
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Build configuration from an arbitrary variable lookup.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let var = |name: &str| {
            lookup(name)
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
        };

        let backend_host = var("CHATDESK_BACKEND_HOST").unwrap_or_else(|| "localhost:8000".to_string());
        let api_base_url = var("CHATDESK_API_BASE_URL").unwrap_or_else(|| api_base_url(&backend_host));

        let force_alerts = match var("CHATDESK_FORCE_ALERTS").map(|v| v.to_lowercase()) {
            None => false,
            Some(v) if v == "1" || v == "true" || v == "yes" => true,
            Some(v) if v == "0" || v == "false" || v == "no" => false,
            Some(value) => {
                return Err(ConfigError::Invalid {
                    var: "CHATDESK_FORCE_ALERTS",
                    value,
                })
            }
        };

        let message_page_size = match var("CHATDESK_PAGE_SIZE") {
            None => 50,
            Some(value) => match value.parse::<u32>() {
                Ok(size) if size > 0 => size,
                _ => {
                    return Err(ConfigError::Invalid {
                        var: "CHATDESK_PAGE_SIZE",
                        value,
                    })
                }
            },
        };

        Ok(Self {
            backend_host,
            api_base_url,
            session_key: var("CHATDESK_SESSION_KEY"),
            auth_seed: var("CHATDESK_AUTH_SEED"),
            operator_id: var("CHATDESK_OPERATOR_ID"),
            operator_name: var("CHATDESK_OPERATOR_NAME"),
            data_dir: var("CHATDESK_DATA_DIR").map(PathBuf::from),
            sound_asset: var("CHATDESK_SOUND_ASSET").map(PathBuf::from),
            force_alerts,
            message_page_size,
            timings: ChatTimings::default(),
        })
    }
}

/// REST base URL for a backend host: plain HTTP for loopback, HTTPS otherwise.
pub fn api_base_url(host: &str) -> String {
    let host = host.trim().trim_end_matches('/');
    if host.contains("://") {
        return host.to_string();
    }
    if is_loopback_host(host) {
        format!("http://{host}")
    } else {
        format!("https://{host}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |name| map.get(name).cloned()
    }

    #[test]
    fn defaults_when_environment_is_empty() {
        let config = ChatConfig::from_lookup(lookup(&[])).unwrap();
        assert_eq!(config.backend_host, "localhost:8000");
        assert_eq!(config.api_base_url, "http://localhost:8000");
        assert_eq!(config.message_page_size, 50);
        assert!(!config.force_alerts);
        assert!(config.session_key.is_none());
        assert_eq!(config.timings.max_reconnect_attempts, 5);
        assert_eq!(config.timings.heartbeat_interval, Duration::from_secs(30));
    }

    #[test]
    fn remote_hosts_use_https_and_blank_values_are_unset() {
        let config = ChatConfig::from_lookup(lookup(&[
            ("CHATDESK_BACKEND_HOST", "api.example.com"),
            ("CHATDESK_SESSION_KEY", "   "),
            ("CHATDESK_FORCE_ALERTS", "TRUE"),
        ]))
        .unwrap();
        assert_eq!(config.api_base_url, "https://api.example.com");
        assert!(config.session_key.is_none());
        assert!(config.force_alerts);
    }

    #[test]
    fn rejects_bad_numbers() {
        let err = ChatConfig::from_lookup(lookup(&[("CHATDESK_PAGE_SIZE", "0")])).unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { var: "CHATDESK_PAGE_SIZE", .. }));
    }
}
