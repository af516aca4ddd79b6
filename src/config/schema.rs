use crate::error::{OpusMtError, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

/// Main configuration structure
#[derive(Deserialize, Serialize, Clone, Debug, Default)]
pub struct Config {
    #[serde(default)]
    pub models: ModelsConfig,
    #[serde(default)]
    pub engine: EngineConfig,
    #[serde(default)]
    pub pretranslation: PreTranslationConfig,
}

#[derive(Deserialize, Serialize, Clone, Debug)]
pub struct ModelsConfig {
    /// Local root; installed models live under `<root>/models/<pair>/<name>/`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub root: Option<PathBuf>,
    #[serde(default = "default_storage_url")]
    pub storage_url: String,
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
    #[serde(default = "default_max_listing_pages")]
    pub max_listing_pages: usize,
}

#[derive(Deserialize, Serialize, Clone, Debug)]
pub struct EngineConfig {
    #[serde(default = "default_program")]
    pub program: String,
    /// Argument template. `{model_dir}`, `{source}`, `{target}` and `{pair}` are substituted.
    #[serde(default = "default_args")]
    pub args: Vec<String>,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default = "default_cache_size")]
    pub cache_size: usize,
}

#[derive(Deserialize, Serialize, Clone, Debug)]
pub struct PreTranslationConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
}

// Default value functions
fn default_storage_url() -> String {
    "https://object.pouta.csc.fi/OPUS-MT-models".to_string()
}
const fn default_request_timeout_secs() -> u64 {
    30
}
const fn default_max_listing_pages() -> usize {
    50
}
fn default_program() -> String {
    "opusmt-engine".to_string()
}
fn default_args() -> Vec<String> {
    ["--model-dir", "{model_dir}", "--source", "{source}", "--target", "{target}"]
        .iter()
        .map(ToString::to_string)
        .collect()
}
const fn default_timeout_secs() -> u64 {
    30
}
const fn default_cache_size() -> usize {
    10_000
}
const fn default_true() -> bool {
    true
}

impl Default for ModelsConfig {
    fn default() -> Self {
        Self {
            root: None,
            storage_url: default_storage_url(),
            request_timeout_secs: default_request_timeout_secs(),
            max_listing_pages: default_max_listing_pages(),
        }
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            program: default_program(),
            args: default_args(),
            timeout_secs: default_timeout_secs(),
            cache_size: default_cache_size(),
        }
    }
}

impl Default for PreTranslationConfig {
    fn default() -> Self {
        Self {
            enabled: default_true(),
        }
    }
}

impl ModelsConfig {
    /// Resolve the local model root, falling back to the platform data directory
    pub fn resolve_root(&self) -> Result<PathBuf> {
        if let Some(root) = &self.root {
            return Ok(root.clone());
        }

        dirs::data_local_dir()
            .map(|dir| dir.join("opusmt"))
            .ok_or_else(|| OpusMtError::Config("Cannot determine local data directory".to_string()))
    }
}

impl Config {
    /// Load config from the user config file, falling back to defaults if it doesn't exist
    pub fn load() -> Result<Self> {
        let path = config_path()?;
        Self::load_from(&path)
    }

    /// Load config from an explicit path
    pub fn load_from(path: &Path) -> Result<Self> {
        if !path.exists() {
            tracing::debug!("No config at {}, using defaults", path.display());
            return Ok(Self::default());
        }

        let content = fs::read_to_string(path)?;
        Self::from_toml_str(&content)
    }

    /// Parse config from TOML text
    pub fn from_toml_str(content: &str) -> Result<Self> {
        toml::from_str(content)
            .map_err(|e| OpusMtError::Config(format!("Failed to parse config: {e}")))
    }

    /// Save config atomically (tmp + rename)
    pub fn save(&self, path: &Path) -> Result<()> {
        let toml_str = toml::to_string_pretty(self)
            .map_err(|e| OpusMtError::Config(format!("Failed to serialize config: {e}")))?;

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }

        let tmp_path = path.with_extension("tmp");
        fs::write(&tmp_path, toml_str)?;
        fs::rename(&tmp_path, path)?;

        Ok(())
    }
}

/// Get config file path
pub fn config_path() -> Result<PathBuf> {
    let config_dir = if let Ok(xdg_config) = std::env::var("XDG_CONFIG_HOME") {
        PathBuf::from(xdg_config)
    } else {
        dirs::config_dir()
            .ok_or_else(|| OpusMtError::Config("Cannot determine config directory".to_string()))?
    };

    Ok(config_dir.join("opusmt").join("config.toml"))
}
