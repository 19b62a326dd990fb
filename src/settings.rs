use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{Result, TellerError};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Settings {
    pub data_dir: String,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir().to_string_lossy().to_string(),
        }
    }
}

/// One allocation line of a configured multi-category vendor. Categories
/// are named, not id'd, and resolved against the caller's catalog when the
/// vendor fires.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VendorAllocation {
    pub category: String,
    pub percentage: f64,
}

/// A payee substring known to span several budget categories, with the
/// percentages to split it by.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SplitVendor {
    pub pattern: String,
    pub allocations: Vec<VendorAllocation>,
}

/// Engine tunables, stored as `config.json` in the data directory.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    #[serde(default = "default_min_samples")]
    pub min_samples: u32,
    #[serde(default = "default_min_frequency")]
    pub min_history_frequency: f64,
    #[serde(default = "default_cache_size")]
    pub history_cache_size: usize,
    #[serde(default = "default_lock_timeout_ms")]
    pub lock_timeout_ms: u64,
    #[serde(default = "default_research_timeout_ms")]
    pub research_timeout_ms: u64,
    #[serde(default)]
    pub split_vendors: Vec<SplitVendor>,
}

fn default_min_samples() -> u32 {
    3
}

fn default_min_frequency() -> f64 {
    crate::scoring::HISTORY_MIN_FREQUENCY
}

fn default_cache_size() -> usize {
    256
}

fn default_lock_timeout_ms() -> u64 {
    5000
}

fn default_research_timeout_ms() -> u64 {
    3000
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            min_samples: default_min_samples(),
            min_history_frequency: default_min_frequency(),
            history_cache_size: default_cache_size(),
            lock_timeout_ms: default_lock_timeout_ms(),
            research_timeout_ms: default_research_timeout_ms(),
            split_vendors: Vec::new(),
        }
    }
}

impl EngineConfig {
    pub fn lock_timeout(&self) -> Duration {
        Duration::from_millis(self.lock_timeout_ms)
    }

    pub fn research_timeout(&self) -> Duration {
        Duration::from_millis(self.research_timeout_ms)
    }
}

fn config_dir() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".config")
        .join("teller")
}

fn settings_path() -> PathBuf {
    config_dir().join("settings.json")
}

fn default_data_dir() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("Documents")
        .join("teller")
}

pub fn load_settings() -> Settings {
    let path = settings_path();
    if path.exists() {
        let content = std::fs::read_to_string(&path).unwrap_or_default();
        serde_json::from_str(&content).unwrap_or_default()
    } else {
        Settings::default()
    }
}

pub fn save_settings(settings: &Settings) -> Result<()> {
    let dir = config_dir();
    std::fs::create_dir_all(&dir)?;
    let json = serde_json::to_string_pretty(settings)
        .map_err(|e| TellerError::Settings(e.to_string()))?;
    std::fs::write(settings_path(), format!("{json}\n"))?;
    Ok(())
}

pub fn settings_file_exists() -> bool {
    settings_path().exists()
}

pub fn get_data_dir() -> PathBuf {
    PathBuf::from(&load_settings().data_dir)
}

pub fn config_path(data_dir: &Path) -> PathBuf {
    data_dir.join("config.json")
}

/// Engine config for a data directory. Missing file means defaults; an
/// unreadable file also falls back to defaults with a warning, so a typo
/// in config.json degrades tunables instead of killing evaluations.
pub fn load_config(data_dir: &Path) -> EngineConfig {
    let path = config_path(data_dir);
    if !path.exists() {
        return EngineConfig::default();
    }
    let content = std::fs::read_to_string(&path).unwrap_or_default();
    match serde_json::from_str(&content) {
        Ok(config) => config,
        Err(err) => {
            log::warn!("unreadable engine config at {} ({err}), using defaults", path.display());
            EngineConfig::default()
        }
    }
}

pub fn save_config(data_dir: &Path, config: &EngineConfig) -> Result<()> {
    std::fs::create_dir_all(data_dir)?;
    let json = serde_json::to_string_pretty(config)
        .map_err(|e| TellerError::Settings(e.to_string()))?;
    std::fs::write(config_path(data_dir), format!("{json}\n"))?;
    Ok(())
}

pub fn shellexpand_path(path: &str) -> String {
    if path.starts_with('~') {
        if let Some(home) = dirs::home_dir() {
            return path.replacen('~', &home.to_string_lossy(), 1);
        }
    }
    std::fs::canonicalize(path)
        .unwrap_or_else(|_| PathBuf::from(path))
        .to_string_lossy()
        .to_string()
}
