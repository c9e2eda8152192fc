use anyhow::{Context, Result};
use huddle_ipc::{ReconnectPolicy, push_url_from_api};
use huddle_sync::MailroomOptions;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::debug;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub(crate) struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub reconnect: ReconnectConfig,
    #[serde(default)]
    pub notifications: NotificationsConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub(crate) struct ServerConfig {
    #[serde(default = "default_api_url")]
    pub api_url: String,
    /// Push-channel URL. Derived from `api_url` when unset.
    #[serde(default)]
    pub push_url: Option<String>,
    #[serde(default = "default_request_timeout_ms")]
    pub request_timeout_ms: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            api_url: default_api_url(),
            push_url: None,
            request_timeout_ms: default_request_timeout_ms(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub(crate) struct ReconnectConfig {
    #[serde(default = "default_reconnect_delay_ms")]
    pub delay_ms: u64,
    /// 1.0 keeps every retry at `delay_ms`.
    #[serde(default = "default_reconnect_factor")]
    pub factor: f64,
    #[serde(default)]
    pub max_delay_ms: Option<u64>,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            delay_ms: default_reconnect_delay_ms(),
            factor: default_reconnect_factor(),
            max_delay_ms: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub(crate) struct NotificationsConfig {
    #[serde(default = "default_toast_ms")]
    pub toast_ms: u64,
}

impl Default for NotificationsConfig {
    fn default() -> Self {
        Self {
            toast_ms: default_toast_ms(),
        }
    }
}

fn default_api_url() -> String {
    "http://localhost:8080".to_owned()
}

fn default_request_timeout_ms() -> u64 {
    10_000
}

fn default_reconnect_delay_ms() -> u64 {
    3000
}

fn default_reconnect_factor() -> f64 {
    1.0
}

fn default_toast_ms() -> u64 {
    3000
}

impl Config {
    /// Load config from a TOML file.
    pub(crate) fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config file: {}", path.display()))?;
        let config: Config = toml::from_str(&content)
            .with_context(|| format!("failed to parse config file: {}", path.display()))?;
        Ok(config)
    }

    /// Like `load`, but a missing file yields the defaults.
    pub(crate) fn load_or_default(path: &Path) -> Result<Self> {
        if !path.exists() {
            debug!(path = %path.display(), "no config file, using defaults");
            return Ok(Self::default());
        }
        Self::load(path)
    }

    pub(crate) fn push_url(&self) -> String {
        self.server
            .push_url
            .as_deref()
            .map(str::trim)
            .filter(|url| !url.is_empty())
            .map_or_else(|| push_url_from_api(&self.server.api_url), str::to_owned)
    }

    pub(crate) fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.server.request_timeout_ms)
    }

    pub(crate) fn reconnect_policy(&self) -> ReconnectPolicy {
        let delay = Duration::from_millis(self.reconnect.delay_ms);
        if self.reconnect.factor <= 1.0 {
            return ReconnectPolicy::fixed(delay);
        }
        let max_delay = self
            .reconnect
            .max_delay_ms
            .map_or(delay, Duration::from_millis);
        ReconnectPolicy::exponential(delay, self.reconnect.factor, max_delay)
    }

    pub(crate) fn mailroom_options(&self) -> MailroomOptions {
        MailroomOptions {
            reconnect: self.reconnect_policy(),
            toast_ttl: Duration::from_millis(self.notifications.toast_ms),
        }
    }

    /// Resolve config path: check arg, then default locations.
    pub(crate) fn find_config_path(explicit: Option<&str>) -> PathBuf {
        if let Some(p) = explicit {
            return PathBuf::from(p);
        }

        let local = PathBuf::from("huddle.toml");
        if local.exists() {
            return local;
        }

        if let Ok(config_dir) = std::env::var("XDG_CONFIG_HOME") {
            let xdg = PathBuf::from(config_dir).join("huddle/huddle.toml");
            if xdg.exists() {
                return xdg;
            }
        }

        if let Ok(home) = std::env::var("HOME") {
            let home_config = PathBuf::from(home).join(".config/huddle/huddle.toml");
            if home_config.exists() {
                return home_config;
            }
        }

        local
    }
}
