//! TOML-based configuration.
//!
//! Stores:
//! - The alert budget (platform capacity and one-time reserve)
//! - The calendar offset used for recurrence, if not the host zone
//! - Remote store and token endpoints
//!
//! Configuration is stored at `~/.config/nudge/config.toml`.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use super::data_dir;
use crate::alerts::budget::{
    DEFAULT_ALERT_CAPACITY, DEFAULT_CANDIDATES_PER_REMINDER, DEFAULT_ONE_TIME_RESERVE,
};
use crate::error::ConfigError;
use crate::recurrence::CalendarZone;

/// Alert budget configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AlertsConfig {
    /// Pending alerts the platform keeps at once.
    #[serde(default = "default_capacity")]
    pub capacity: usize,
    /// Slots held back for one-time reminders.
    #[serde(default = "default_one_time_reserve")]
    pub one_time_reserve: usize,
    #[serde(default = "default_candidates")]
    pub candidates_per_reminder: usize,
    /// Alert body for reminders without notes.
    #[serde(default = "default_body")]
    pub default_body: String,
    /// Fixed calendar offset in minutes east of UTC. Unset means the host zone.
    #[serde(default)]
    pub utc_offset_minutes: Option<i32>,
}

/// Remote store configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyncConfig {
    /// Base URL of the reminder API, e.g. `https://api.example.com/v1`.
    #[serde(default)]
    pub base_url: Option<String>,
    /// OAuth token endpoint.
    #[serde(default)]
    pub token_url: Option<String>,
    #[serde(default)]
    pub client_id: Option<String>,
    /// Push local edits of already-synced records back to the remote.
    #[serde(default)]
    pub push_local_edits: bool,
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
}

/// Application configuration.
///
/// Serialized to/from TOML at `~/.config/nudge/config.toml`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub alerts: AlertsConfig,
    #[serde(default)]
    pub sync: SyncConfig,
}

fn default_capacity() -> usize {
    DEFAULT_ALERT_CAPACITY
}
fn default_one_time_reserve() -> usize {
    DEFAULT_ONE_TIME_RESERVE
}
fn default_candidates() -> usize {
    DEFAULT_CANDIDATES_PER_REMINDER
}
fn default_body() -> String {
    "Reminder".into()
}
fn default_request_timeout_secs() -> u64 {
    30
}

impl Default for AlertsConfig {
    fn default() -> Self {
        Self {
            capacity: default_capacity(),
            one_time_reserve: default_one_time_reserve(),
            candidates_per_reminder: default_candidates(),
            default_body: default_body(),
            utc_offset_minutes: None,
        }
    }
}

impl AlertsConfig {
    /// Zone used for wall-clock recurrence.
    pub fn calendar_zone(&self) -> Result<CalendarZone, ConfigError> {
        match self.utc_offset_minutes {
            None => Ok(CalendarZone::Local),
            Some(minutes) => {
                CalendarZone::from_offset_minutes(minutes).ok_or_else(|| {
                    ConfigError::InvalidValue {
                        key: "alerts.utc_offset_minutes".into(),
                        message: format!("{minutes} is not a valid UTC offset"),
                    }
                })
            }
        }
    }
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            base_url: None,
            token_url: None,
            client_id: None,
            push_local_edits: false,
            request_timeout_secs: default_request_timeout_secs(),
        }
    }
}

impl SyncConfig {
    pub fn base_url(&self) -> Result<url::Url, ConfigError> {
        Self::required_url("sync.base_url", self.base_url.as_deref())
    }

    pub fn token_url(&self) -> Result<url::Url, ConfigError> {
        Self::required_url("sync.token_url", self.token_url.as_deref())
    }

    fn required_url(key: &str, raw: Option<&str>) -> Result<url::Url, ConfigError> {
        let raw = raw.ok_or_else(|| ConfigError::MissingKey(key.to_string()))?;
        url::Url::parse(raw).map_err(|e| ConfigError::InvalidValue {
            key: key.to_string(),
            message: e.to_string(),
        })
    }
}

impl Config {
    fn get_json_value_by_path<'a>(
        root: &'a serde_json::Value,
        key: &str,
    ) -> Option<&'a serde_json::Value> {
        if key.is_empty() {
            return None;
        }

        let mut current = root;
        for part in key.split('.') {
            current = current.get(part)?;
        }
        Some(current)
    }

    fn set_json_value_by_path(
        root: &mut serde_json::Value,
        key: &str,
        value: &str,
    ) -> Result<(), ConfigError> {
        let invalid = |message: String| ConfigError::InvalidValue {
            key: key.to_string(),
            message,
        };
        let mut parts = key.split('.').peekable();
        if parts.peek().is_none() || key.is_empty() {
            return Err(ConfigError::UnknownKey(key.to_string()));
        }

        let mut current = root;
        while let Some(part) = parts.next() {
            let is_leaf = parts.peek().is_none();
            if is_leaf {
                let obj = current
                    .as_object_mut()
                    .ok_or_else(|| ConfigError::UnknownKey(key.to_string()))?;
                let existing = obj
                    .get(part)
                    .ok_or_else(|| ConfigError::UnknownKey(key.to_string()))?;

                let new_value = match existing {
                    serde_json::Value::Bool(_) => serde_json::Value::Bool(
                        value.parse::<bool>().map_err(|e| invalid(e.to_string()))?,
                    ),
                    serde_json::Value::Number(_) => {
                        if let Ok(n) = value.parse::<u64>() {
                            serde_json::Value::Number(n.into())
                        } else if let Ok(n) = value.parse::<i64>() {
                            serde_json::Value::Number(n.into())
                        } else {
                            return Err(invalid(format!("cannot parse '{value}' as number")));
                        }
                    }
                    // optional fields serialize as null; accept numbers or strings
                    serde_json::Value::Null => match value.parse::<i64>() {
                        Ok(n) => serde_json::Value::Number(n.into()),
                        Err(_) => serde_json::Value::String(value.into()),
                    },
                    serde_json::Value::Object(_) | serde_json::Value::Array(_) => {
                        serde_json::from_str(value).map_err(|e| invalid(e.to_string()))?
                    }
                    _ => serde_json::Value::String(value.into()),
                };

                obj.insert(part.to_string(), new_value);
                return Ok(());
            }

            current = current
                .get_mut(part)
                .ok_or_else(|| ConfigError::UnknownKey(key.to_string()))?;
        }

        Err(ConfigError::UnknownKey(key.to_string()))
    }

    fn path() -> Result<PathBuf, ConfigError> {
        Ok(data_dir()?.join("config.toml"))
    }

    /// Load from the default location, writing defaults if no file exists.
    ///
    /// # Errors
    ///
    /// Returns an error if the config file exists but cannot be parsed,
    /// or if the default config cannot be written to disk.
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_from(&Self::path()?)
    }

    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        match std::fs::read_to_string(path) {
            Ok(content) => {
                let cfg: Config =
                    toml::from_str(&content).map_err(|e| ConfigError::LoadFailed {
                        path: path.to_path_buf(),
                        message: e.to_string(),
                    })?;
                cfg.validate()?;
                Ok(cfg)
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                let cfg = Self::default();
                cfg.save_to(path)?;
                Ok(cfg)
            }
            Err(e) => Err(ConfigError::LoadFailed {
                path: path.to_path_buf(),
                message: e.to_string(),
            }),
        }
    }

    /// Persist to the default location.
    pub fn save(&self) -> Result<(), ConfigError> {
        self.save_to(&Self::path()?)
    }

    pub fn save_to(&self, path: &Path) -> Result<(), ConfigError> {
        let save_failed = |message: String| ConfigError::SaveFailed {
            path: path.to_path_buf(),
            message,
        };
        let content = toml::to_string_pretty(self).map_err(|e| save_failed(e.to_string()))?;
        std::fs::write(path, content).map_err(|e| save_failed(e.to_string()))
    }

    /// Load from disk, returning default on error.
    pub fn load_or_default() -> Self {
        Self::load().unwrap_or_default()
    }

    /// Reject combinations the allocator cannot honour.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.alerts.capacity == 0 {
            return Err(ConfigError::InvalidValue {
                key: "alerts.capacity".into(),
                message: "must be at least 1".into(),
            });
        }
        if self.alerts.one_time_reserve > self.alerts.capacity {
            return Err(ConfigError::InvalidValue {
                key: "alerts.one_time_reserve".into(),
                message: format!(
                    "reserve {} exceeds capacity {}",
                    self.alerts.one_time_reserve, self.alerts.capacity
                ),
            });
        }
        self.alerts.calendar_zone()?;
        Ok(())
    }

    /// Get a config value as string by dot-separated key.
    pub fn get(&self, key: &str) -> Option<String> {
        let json = serde_json::to_value(self).ok()?;
        let val = Self::get_json_value_by_path(&json, key)?;
        match val {
            serde_json::Value::String(s) => Some(s.clone()),
            other => Some(other.to_string()),
        }
    }

    /// Set a value by dot-separated key, in memory only.
    ///
    /// # Errors
    ///
    /// Returns an error if the key is unknown, the value cannot be parsed, or
    /// the result fails validation. `self` is unchanged on error.
    pub fn set(&mut self, key: &str, value: &str) -> Result<(), ConfigError> {
        let invalid = |message: String| ConfigError::InvalidValue {
            key: key.to_string(),
            message,
        };
        let mut json = serde_json::to_value(&*self).map_err(|e| invalid(e.to_string()))?;
        Self::set_json_value_by_path(&mut json, key, value)?;
        let updated: Config = serde_json::from_value(json).map_err(|e| invalid(e.to_string()))?;
        updated.validate()?;
        *self = updated;
        Ok(())
    }
}
