//! DeskBot configuration system.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::error::{DeskBotError, Result};

/// Root configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeskBotConfig {
    #[serde(default)]
    pub telegram: TelegramConfig,
    #[serde(default)]
    pub tracker: TrackerConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub alerts: AlertsConfig,
    #[serde(default)]
    pub archive: ArchiveConfig,
    #[serde(default)]
    pub render: RenderConfig,
}

impl Default for DeskBotConfig {
    fn default() -> Self {
        Self {
            telegram: TelegramConfig::default(),
            tracker: TrackerConfig::default(),
            storage: StorageConfig::default(),
            alerts: AlertsConfig::default(),
            archive: ArchiveConfig::default(),
            render: RenderConfig::default(),
        }
    }
}

impl DeskBotConfig {
    /// Load config from the default path (~/.deskbot/config.toml).
    pub fn load() -> Result<Self> {
        let path = Self::default_path();
        if path.exists() {
            Self::load_from(&path)
        } else {
            Ok(Self::default())
        }
    }

    /// Load config from a specific path.
    pub fn load_from(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| DeskBotError::Config(format!("Failed to read config: {e}")))?;
        let config: Self = toml::from_str(&content)
            .map_err(|e| DeskBotError::Config(format!("Failed to parse config: {e}")))?;
        config.validate()?;
        Ok(config)
    }

    /// Check cross-field constraints that serde cannot express.
    pub fn validate(&self) -> Result<()> {
        match self.storage.backend.as_str() {
            "sqlite" => {}
            "postgres" => {
                if self.storage.url.trim().is_empty() {
                    return Err(DeskBotError::Config(
                        "storage.url is required for the postgres backend".into(),
                    ));
                }
            }
            other => {
                return Err(DeskBotError::Config(format!(
                    "Unknown storage backend '{other}' (expected 'sqlite' or 'postgres')"
                )));
            }
        }

        let mut seen = std::collections::HashSet::new();
        let mut prev_minutes: Option<i64> = None;
        for step in &self.alerts.steps {
            if !seen.insert(step.index) {
                return Err(DeskBotError::Config(format!(
                    "Duplicate alert step index {}",
                    step.index
                )));
            }
            if step.minutes <= 0 {
                return Err(DeskBotError::Config(format!(
                    "Alert step {} must have a positive delay",
                    step.index
                )));
            }
            if prev_minutes.is_some_and(|prev| step.minutes <= prev) {
                return Err(DeskBotError::Config(format!(
                    "Alert step {} does not increase the delay of the previous step",
                    step.index
                )));
            }
            prev_minutes = Some(step.minutes);
        }
        Ok(())
    }

    /// Get the default config path.
    pub fn default_path() -> PathBuf {
        Self::home_dir().join("config.toml")
    }

    /// Get the DeskBot home directory.
    pub fn home_dir() -> PathBuf {
        dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(".deskbot")
    }
}

/// Telegram bot configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TelegramConfig {
    #[serde(default)]
    pub bot_token: String,
    /// Chat where issue notifications are posted.
    #[serde(default)]
    pub chat_id: String,
}

impl Default for TelegramConfig {
    fn default() -> Self {
        Self { bot_token: String::new(), chat_id: String::new() }
    }
}

/// Issue tracker (YouTrack-compatible) configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrackerConfig {
    #[serde(default)]
    pub base_url: String,
    #[serde(default)]
    pub token: String,
}

impl Default for TrackerConfig {
    fn default() -> Self {
        Self { base_url: String::new(), token: String::new() }
    }
}

/// Durable store configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    /// "sqlite" or "postgres".
    #[serde(default = "default_storage_backend")]
    pub backend: String,
    /// SQLite database path. Empty means ~/.deskbot/deskbot.db.
    #[serde(default)]
    pub path: String,
    /// Postgres connection URL (postgres backend only).
    #[serde(default)]
    pub url: String,
}

fn default_storage_backend() -> String {
    "sqlite".into()
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self { backend: default_storage_backend(), path: String::new(), url: String::new() }
    }
}

impl StorageConfig {
    /// SQLite path with the home-directory default applied.
    pub fn resolved_path(&self) -> PathBuf {
        if self.path.trim().is_empty() {
            DeskBotConfig::home_dir().join("deskbot.db")
        } else {
            PathBuf::from(&self.path)
        }
    }
}

/// One reminder in the escalation sequence.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AlertStep {
    pub index: u32,
    /// Delay after the issue enters the target status, in minutes.
    pub minutes: i64,
    /// Message template (Telegram HTML, `<br>` line breaks allowed).
    pub message: String,
}

/// Status reminder configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AlertsConfig {
    #[serde(default = "bool_true")]
    pub enabled: bool,
    /// Status that keeps the reminder sequence armed.
    #[serde(default = "default_target_status")]
    pub target_status: String,
    #[serde(default = "default_poll_seconds")]
    pub poll_seconds: u64,
    /// Static suffix used when no runtime override is stored.
    #[serde(default)]
    pub suffix_default: String,
    /// Step indices that get the suffix appended.
    #[serde(default = "default_suffix_positions")]
    pub suffix_positions: Vec<u32>,
    #[serde(default)]
    pub steps: Vec<AlertStep>,
}

fn bool_true() -> bool {
    true
}
fn default_target_status() -> String {
    "New".into()
}
fn default_poll_seconds() -> u64 {
    60
}
fn default_suffix_positions() -> Vec<u32> {
    vec![2, 3]
}

impl Default for AlertsConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            target_status: default_target_status(),
            poll_seconds: default_poll_seconds(),
            suffix_default: String::new(),
            suffix_positions: default_suffix_positions(),
            steps: Vec::new(),
        }
    }
}

impl AlertsConfig {
    /// Template for a step index, if configured.
    pub fn step_message(&self, index: u32) -> Option<&str> {
        self.steps
            .iter()
            .find(|s| s.index == index)
            .map(|s| s.message.as_str())
    }
}

/// Stale-message archiver configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ArchiveConfig {
    #[serde(default = "default_scan_interval")]
    pub scan_interval_seconds: u64,
    /// Messages untouched for this long are archived.
    #[serde(default = "default_idle_threshold")]
    pub idle_threshold_seconds: u64,
}

fn default_scan_interval() -> u64 {
    3600
}
fn default_idle_threshold() -> u64 {
    604_800
}

impl Default for ArchiveConfig {
    fn default() -> Self {
        Self {
            scan_interval_seconds: default_scan_interval(),
            idle_threshold_seconds: default_idle_threshold(),
        }
    }
}

/// Message rendering configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RenderConfig {
    #[serde(default = "default_description_max_len")]
    pub description_max_len: usize,
}

fn default_description_max_len() -> usize {
    500
}

impl Default for RenderConfig {
    fn default() -> Self {
        Self { description_max_len: default_description_max_len() }
    }
}
