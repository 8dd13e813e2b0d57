use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::errors::ConfigError;
use crate::events::EventBusConfig;
use crate::gateway::GatewayConfig;

pub const CONFIG_FILE_NAME: &str = "config.json";

pub const ENV_API_URL: &str = "LLMEET_API_URL";
pub const ENV_LIVEKIT_URL: &str = "LLMEET_LIVEKIT_URL";
pub const ENV_EVENTS_URL: &str = "LLMEET_EVENTS_URL";
pub const ENV_MAX_RETRIES: &str = "LLMEET_MAX_RETRIES";

/// What the event bus does after its connection closes or fails.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq, Default)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum ReconnectPolicy {
    /// Stay disconnected until someone calls `ensure_connected` again.
    #[default]
    Never,
    /// Exponential backoff starting at `base_delay_ms`, capped at `max_delay_ms`.
    Backoff {
        max_attempts: u32,
        base_delay_ms: u64,
        max_delay_ms: u64,
    },
}

impl ReconnectPolicy {
    /// Delay before reconnect attempt `attempt` (1-based), or `None` once
    /// the policy gives up.
    pub fn delay_for(&self, attempt: u32) -> Option<Duration> {
        match self {
            ReconnectPolicy::Never => None,
            ReconnectPolicy::Backoff {
                max_attempts,
                base_delay_ms,
                max_delay_ms,
            } => {
                if attempt == 0 || attempt > *max_attempts {
                    return None;
                }
                let factor = 1u64.checked_shl(attempt - 1).unwrap_or(u64::MAX);
                let delay = base_delay_ms.saturating_mul(factor).min(*max_delay_ms);
                Some(Duration::from_millis(delay))
            }
        }
    }
}

/// Client configuration, persisted as `config.json` in the data directory.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct ClientConfig {
    #[serde(default = "default_api_base_url")]
    pub api_base_url: String,
    #[serde(default = "default_livekit_base_url")]
    pub livekit_base_url: String,
    #[serde(default = "default_event_base_url")]
    pub event_base_url: String,
    #[serde(default = "default_event_path")]
    pub event_path: String,
    #[serde(default)]
    pub max_retries: u32,
    #[serde(default = "default_request_timeout_ms")]
    pub request_timeout_ms: u64,
    #[serde(default)]
    pub reconnect: ReconnectPolicy,
}

fn default_api_base_url() -> String {
    "http://localhost:8080".to_string()
}

fn default_livekit_base_url() -> String {
    "http://localhost:8000".to_string()
}

fn default_event_base_url() -> String {
    "ws://localhost:8000".to_string()
}

fn default_event_path() -> String {
    "/meeting/ws/recordings".to_string()
}

fn default_request_timeout_ms() -> u64 {
    30_000
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            api_base_url: default_api_base_url(),
            livekit_base_url: default_livekit_base_url(),
            event_base_url: default_event_base_url(),
            event_path: default_event_path(),
            max_retries: 0,
            request_timeout_ms: default_request_timeout_ms(),
            reconnect: ReconnectPolicy::Never,
        }
    }
}

impl ClientConfig {
    /// Load `config.json` from `data_dir`. A missing or unreadable file
    /// yields the defaults.
    pub fn load(data_dir: impl AsRef<Path>) -> Self {
        let path = Self::path_in(data_dir);
        match std::fs::read_to_string(&path) {
            Ok(contents) => serde_json::from_str(&contents).unwrap_or_else(|e| {
                tracing::warn!("ignoring corrupt config at {}: {e}", path.display());
                Self::default()
            }),
            Err(_) => Self::default(),
        }
    }

    pub fn save(&self, data_dir: impl AsRef<Path>) -> Result<(), ConfigError> {
        let path = Self::path_in(data_dir);
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let json =
            serde_json::to_string_pretty(self).map_err(|e| ConfigError::Parse(e.to_string()))?;
        std::fs::write(&path, json)?;
        Ok(())
    }

    /// Apply `LLMEET_*` overrides from the process environment.
    pub fn with_env_overrides(self) -> Result<Self, ConfigError> {
        self.with_overrides(|key| std::env::var(key).ok())
    }

    pub fn with_overrides(
        mut self,
        lookup: impl Fn(&str) -> Option<String>,
    ) -> Result<Self, ConfigError> {
        if let Some(v) = lookup(ENV_API_URL) {
            self.api_base_url = v;
        }
        if let Some(v) = lookup(ENV_LIVEKIT_URL) {
            self.livekit_base_url = v;
        }
        if let Some(v) = lookup(ENV_EVENTS_URL) {
            self.event_base_url = v;
        }
        if let Some(v) = lookup(ENV_MAX_RETRIES) {
            self.max_retries = v
                .trim()
                .parse()
                .map_err(|_| ConfigError::Parse(format!("{ENV_MAX_RETRIES}={v} is not a count")))?;
        }
        Ok(self)
    }

    /// Check that every origin parses and uses the scheme its consumer expects.
    pub fn validate(&self) -> Result<(), ConfigError> {
        check_origin(&self.api_base_url, &["http", "https"])?;
        check_origin(&self.livekit_base_url, &["http", "https"])?;
        check_origin(&self.event_base_url, &["ws", "wss"])?;
        Ok(())
    }

    /// Full URL of the push channel.
    pub fn event_url(&self) -> String {
        join_url(&self.event_base_url, &self.event_path)
    }

    pub fn gateway_config(&self) -> GatewayConfig {
        GatewayConfig {
            api_base_url: self.api_base_url.clone(),
            max_retries: self.max_retries,
            timeout: Duration::from_millis(self.request_timeout_ms),
        }
    }

    pub fn event_bus_config(&self) -> EventBusConfig {
        EventBusConfig {
            url: self.event_url(),
            reconnect: self.reconnect.clone(),
        }
    }

    fn path_in(data_dir: impl AsRef<Path>) -> PathBuf {
        data_dir.as_ref().join(CONFIG_FILE_NAME)
    }
}

fn check_origin(raw: &str, schemes: &[&str]) -> Result<(), ConfigError> {
    let parsed = url::Url::parse(raw).map_err(|e| ConfigError::InvalidUrl {
        url: raw.to_string(),
        reason: e.to_string(),
    })?;
    if !schemes.contains(&parsed.scheme()) {
        return Err(ConfigError::InvalidUrl {
            url: raw.to_string(),
            reason: format!("expected scheme {}", schemes.join(" or ")),
        });
    }
    Ok(())
}

/// Concatenate an origin and a path without doubling the slash between them.
pub(crate) fn join_url(base: &str, path: &str) -> String {
    let base = base.trim_end_matches('/');
    if path.is_empty() {
        base.to_string()
    } else if path.starts_with('/') {
        format!("{base}{path}")
    } else {
        format!("{base}/{path}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::fs;

    #[test]
    fn defaults_match_local_backend() {
        let c = ClientConfig::default();
        assert_eq!(c.api_base_url, "http://localhost:8080");
        assert_eq!(c.max_retries, 0);
        assert_eq!(c.reconnect, ReconnectPolicy::Never);
        assert_eq!(c.event_url(), "ws://localhost:8000/meeting/ws/recordings");
        assert!(c.validate().is_ok());
    }

    #[test]
    fn load_missing_file_gives_defaults() {
        let dir = tempfile::tempdir().unwrap();
        assert_eq!(ClientConfig::load(dir.path()), ClientConfig::default());
    }

    #[test]
    fn load_corrupt_file_gives_defaults() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join(CONFIG_FILE_NAME), "{{nope").unwrap();
        assert_eq!(ClientConfig::load(dir.path()), ClientConfig::default());
    }

    #[test]
    fn partial_file_keeps_other_defaults() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(
            dir.path().join(CONFIG_FILE_NAME),
            r#"{"max_retries":2,"reconnect":{"mode":"backoff","max_attempts":3,"base_delay_ms":100,"max_delay_ms":1000}}"#,
        )
        .unwrap();
        let c = ClientConfig::load(dir.path());
        assert_eq!(c.max_retries, 2);
        assert_eq!(c.api_base_url, "http://localhost:8080");
        assert_eq!(
            c.reconnect,
            ReconnectPolicy::Backoff {
                max_attempts: 3,
                base_delay_ms: 100,
                max_delay_ms: 1000
            }
        );
    }

    #[test]
    fn save_then_load() {
        let dir = tempfile::tempdir().unwrap();
        let mut c = ClientConfig::default();
        c.api_base_url = "https://meet.example.com".into();
        c.save(dir.path()).unwrap();
        assert_eq!(ClientConfig::load(dir.path()), c);
    }

    #[test]
    fn overrides_replace_fields() {
        let env: HashMap<&str, &str> = HashMap::from([
            (ENV_API_URL, "https://api.example.com"),
            (ENV_MAX_RETRIES, "3"),
        ]);
        let c = ClientConfig::default()
            .with_overrides(|k| env.get(k).map(|v| v.to_string()))
            .unwrap();
        assert_eq!(c.api_base_url, "https://api.example.com");
        assert_eq!(c.max_retries, 3);
        assert_eq!(c.livekit_base_url, "http://localhost:8000");
    }

    #[test]
    fn bad_retry_override_is_rejected() {
        let r = ClientConfig::default().with_overrides(|k| {
            (k == ENV_MAX_RETRIES).then(|| "many".to_string())
        });
        assert!(matches!(r, Err(ConfigError::Parse(_))));
    }

    #[test]
    fn validate_rejects_wrong_scheme() {
        let mut c = ClientConfig::default();
        c.event_base_url = "http://localhost:8000".into();
        assert!(matches!(c.validate(), Err(ConfigError::InvalidUrl { .. })));
        c.event_base_url = "not a url".into();
        assert!(c.validate().is_err());
    }

    #[test]
    fn backoff_delays_double_and_cap() {
        let p = ReconnectPolicy::Backoff {
            max_attempts: 4,
            base_delay_ms: 100,
            max_delay_ms: 300,
        };
        assert_eq!(p.delay_for(1), Some(Duration::from_millis(100)));
        assert_eq!(p.delay_for(2), Some(Duration::from_millis(200)));
        assert_eq!(p.delay_for(3), Some(Duration::from_millis(300)));
        assert_eq!(p.delay_for(4), Some(Duration::from_millis(300)));
        assert_eq!(p.delay_for(5), None);
        assert_eq!(ReconnectPolicy::Never.delay_for(1), None);
    }

    #[test]
    fn join_url_handles_slashes() {
        assert_eq!(join_url("http://a/", "/b"), "http://a/b");
        assert_eq!(join_url("http://a", "b"), "http://a/b");
        assert_eq!(join_url("http://a", ""), "http://a");
    }
}
