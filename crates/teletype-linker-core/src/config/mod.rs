//! Configuration management with file persistence

use anyhow::{Context, anyhow};
use serde::{Deserialize, Serialize};
use std::env;
use std::fs;
use std::path::PathBuf;
use std::time::Duration;

use crate::domain::events::DEFAULT_EVENT_CAPACITY;
use crate::domain::locator::LinkerEndpoint;
use crate::domain::locking::LockConfig;
use crate::domain::readiness::{DEFAULT_MAX_ATTEMPTS, RetryPolicy};
use crate::domain::session::CoordinatorConfig;

/// Environment variable overriding the configuration directory
pub const CONFIG_DIR_ENV: &str = "TELETYPE_LINKER_CONFIG_DIR";

const MAX_DELAY_MS: u64 = 60_000;

const KEYS: &[&str] = &[
    "linker.scheme",
    "linker.linker_id",
    "linker.lock_extension",
    "collaboration.package_name",
    "retry.max_attempts",
    "retry.delay_ms",
    "session.reuse_open_editor",
    "events.capacity",
    "notifications.dev_mode",
];

/// Linker configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub linker: LinkerSection,
    pub collaboration: CollaborationSection,
    pub retry: RetrySection,
    pub session: SessionSection,
    pub events: EventsSection,
    pub notifications: NotificationsSection,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LinkerSection {
    pub scheme: String,
    pub linker_id: String,
    pub lock_extension: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CollaborationSection {
    pub package_name: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetrySection {
    pub max_attempts: u32,
    pub delay_ms: u64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionSection {
    pub reuse_open_editor: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EventsSection {
    pub capacity: usize,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NotificationsSection {
    pub dev_mode: bool,
}

impl Default for LinkerSection {
    fn default() -> Self {
        let endpoint = LinkerEndpoint::default();
        Self {
            scheme: endpoint.scheme,
            linker_id: endpoint.linker_id,
            lock_extension: "lock".to_string(),
        }
    }
}

impl Default for CollaborationSection {
    fn default() -> Self {
        Self {
            package_name: "teletype".to_string(),
        }
    }
}

impl Default for RetrySection {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            delay_ms: 500,
        }
    }
}

impl Default for EventsSection {
    fn default() -> Self {
        Self {
            capacity: DEFAULT_EVENT_CAPACITY,
        }
    }
}

impl Config {
    /// Get the config directory path
    pub fn config_dir() -> anyhow::Result<PathBuf> {
        let dir = if let Ok(custom_dir) = env::var(CONFIG_DIR_ENV) {
            PathBuf::from(custom_dir)
        } else {
            dirs::config_dir()
                .ok_or_else(|| anyhow!("Could not determine config directory"))?
                .join("teletype-linker")
        };
        Ok(dir)
    }

    /// Get the config file path
    pub fn config_path() -> anyhow::Result<PathBuf> {
        Ok(Self::config_dir()?.join("config.toml"))
    }

    /// Load configuration from file, or defaults if it doesn't exist
    pub fn load() -> anyhow::Result<Self> {
        let path = Self::config_path()?;

        if path.exists() {
            let contents = fs::read_to_string(&path)
                .with_context(|| format!("Failed to read config file: {}", path.display()))?;
            let config = Self::from_toml(&contents)
                .with_context(|| format!("Failed to parse config file: {}", path.display()))?;
            Ok(config)
        } else {
            Ok(Config::default())
        }
    }

    /// Parse and validate a TOML document
    pub fn from_toml(contents: &str) -> anyhow::Result<Self> {
        let config: Config = toml::from_str(contents)?;
        config.validate()?;
        Ok(config)
    }

    /// Save configuration to file
    pub fn save(&self) -> anyhow::Result<()> {
        self.validate()?;

        let dir = Self::config_dir()?;
        fs::create_dir_all(&dir)
            .with_context(|| format!("Failed to create config directory: {}", dir.display()))?;

        let path = Self::config_path()?;
        let contents = toml::to_string_pretty(self).context("Failed to serialize config")?;

        fs::write(&path, contents)
            .with_context(|| format!("Failed to write config file: {}", path.display()))?;

        Ok(())
    }

    /// Validate configuration
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.linker.scheme.is_empty() || self.linker.linker_id.is_empty() {
            return Err(anyhow!("linker.scheme and linker.linker_id must not be empty"));
        }
        if self.linker.lock_extension.is_empty() || self.linker.lock_extension.contains('/') {
            return Err(anyhow!(
                "linker.lock_extension must be a non-empty file extension"
            ));
        }
        if self.collaboration.package_name.is_empty() {
            return Err(anyhow!("collaboration.package_name must not be empty"));
        }
        if self.retry.max_attempts < 1 {
            return Err(anyhow!("retry.max_attempts must be at least 1"));
        }
        if self.retry.delay_ms > MAX_DELAY_MS {
            return Err(anyhow!("retry.delay_ms must be at most {}", MAX_DELAY_MS));
        }
        if self.events.capacity < 1 {
            return Err(anyhow!("events.capacity must be at least 1"));
        }
        Ok(())
    }

    pub fn endpoint(&self) -> LinkerEndpoint {
        LinkerEndpoint::new(&self.linker.scheme, &self.linker.linker_id)
    }

    pub fn lock_config(&self) -> LockConfig {
        LockConfig::default()
            .with_endpoint(self.endpoint())
            .with_extension(&self.linker.lock_extension)
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::new(
            self.retry.max_attempts,
            Duration::from_millis(self.retry.delay_ms),
        )
    }

    pub fn coordinator_config(&self) -> CoordinatorConfig {
        CoordinatorConfig {
            package_name: self.collaboration.package_name.clone(),
            retry: self.retry_policy(),
            lock: self.lock_config(),
            reuse_open_editor: self.session.reuse_open_editor,
        }
    }

    /// Get a configuration value by key
    pub fn get(&self, key: &str) -> anyhow::Result<String> {
        match key {
            "linker.scheme" => Ok(self.linker.scheme.clone()),
            "linker.linker_id" => Ok(self.linker.linker_id.clone()),
            "linker.lock_extension" => Ok(self.linker.lock_extension.clone()),
            "collaboration.package_name" => Ok(self.collaboration.package_name.clone()),
            "retry.max_attempts" => Ok(self.retry.max_attempts.to_string()),
            "retry.delay_ms" => Ok(self.retry.delay_ms.to_string()),
            "session.reuse_open_editor" => Ok(self.session.reuse_open_editor.to_string()),
            "events.capacity" => Ok(self.events.capacity.to_string()),
            "notifications.dev_mode" => Ok(self.notifications.dev_mode.to_string()),
            _ => Err(unknown_key(key)),
        }
    }

    /// Set a configuration value by key
    ///
    /// The change is validated as a whole; on error nothing is modified.
    pub fn set(&mut self, key: &str, value: &str) -> anyhow::Result<()> {
        let mut updated = self.clone();
        match key {
            "linker.scheme" => updated.linker.scheme = value.to_string(),
            "linker.linker_id" => updated.linker.linker_id = value.to_string(),
            "linker.lock_extension" => {
                updated.linker.lock_extension = value.trim_start_matches('.').to_string();
            }
            "collaboration.package_name" => {
                updated.collaboration.package_name = value.to_string();
            }
            "retry.max_attempts" => {
                updated.retry.max_attempts = value
                    .parse()
                    .with_context(|| format!("Invalid max_attempts value: {}", value))?;
            }
            "retry.delay_ms" => {
                updated.retry.delay_ms = value
                    .parse()
                    .with_context(|| format!("Invalid delay_ms value: {}", value))?;
            }
            "session.reuse_open_editor" => {
                updated.session.reuse_open_editor = parse_bool(key, value)?;
            }
            "events.capacity" => {
                updated.events.capacity = value
                    .parse()
                    .with_context(|| format!("Invalid capacity value: {}", value))?;
            }
            "notifications.dev_mode" => {
                updated.notifications.dev_mode = parse_bool(key, value)?;
            }
            _ => return Err(unknown_key(key)),
        }

        updated.validate()?;
        *self = updated;
        Ok(())
    }

    /// List all configuration keys and their values
    pub fn list(&self) -> anyhow::Result<Vec<(String, String)>> {
        KEYS.iter()
            .map(|key| {
                let value = self.get(key)?;
                Ok((key.to_string(), value))
            })
            .collect()
    }

    /// Reset configuration to defaults
    pub fn reset() -> anyhow::Result<()> {
        let path = Self::config_path()?;
        if path.exists() {
            fs::remove_file(&path)
                .with_context(|| format!("Failed to remove config file: {}", path.display()))?;
        }
        Ok(())
    }
}

fn unknown_key(key: &str) -> anyhow::Error {
    anyhow!(
        "Unknown configuration key: {}. Use `teletype-linker config list` to see available keys.",
        key
    )
}

fn parse_bool(key: &str, value: &str) -> anyhow::Result<bool> {
    match value.to_ascii_lowercase().as_str() {
        "true" | "yes" | "on" | "1" => Ok(true),
        "false" | "no" | "off" | "0" => Ok(false),
        _ => Err(anyhow!("Invalid boolean for {}: {}", key, value)),
    }
}
