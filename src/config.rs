use serde::{Deserialize, Serialize};
use std::fs;
use std::path::PathBuf;
use thiserror::Error;

use crate::utils;

/// Current configuration version
pub const CURRENT_CONFIG_VERSION: u32 = 1;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    #[serde(default = "default_database_path")]
    pub database_path: String,
    /// Owning user id; every row read or written is scoped by it
    #[serde(default)]
    pub owner_id: String,
    /// Era pinned with `eras era select`; unset means pick by date
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub selected_era: Option<String>,
    #[serde(default)]
    pub proxy: ProxyConfig,
    #[serde(default)]
    pub gemini: GeminiConfig,
    #[serde(default = "default_config_version")]
    pub config_version: Option<u32>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProxyConfig {
    /// Where the client posts prompts
    #[serde(default = "default_proxy_url")]
    pub url: String,
    /// Where `eras serve` listens
    #[serde(default = "default_proxy_bind")]
    pub bind: String,
    /// Bearer token shared by client and server; empty disables the check
    #[serde(default)]
    pub token: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GeminiConfig {
    #[serde(default = "default_gemini_api_base")]
    pub api_base: String,
    /// Name of the environment variable holding the API key
    #[serde(default = "default_gemini_api_key_env")]
    pub api_key_env: String,
    #[serde(default = "default_preview_model")]
    pub preview_model: String,
    #[serde(default = "default_stable_model")]
    pub stable_model: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            database_path: default_database_path(),
            owner_id: String::new(),
            selected_era: None,
            proxy: ProxyConfig::default(),
            gemini: GeminiConfig::default(),
            config_version: Some(CURRENT_CONFIG_VERSION),
        }
    }
}

impl Default for ProxyConfig {
    fn default() -> Self {
        Self {
            url: default_proxy_url(),
            bind: default_proxy_bind(),
            token: String::new(),
        }
    }
}

impl Default for GeminiConfig {
    fn default() -> Self {
        Self {
            api_base: default_gemini_api_base(),
            api_key_env: default_gemini_api_key_env(),
            preview_model: default_preview_model(),
            stable_model: default_stable_model(),
        }
    }
}

// Default value functions
fn default_database_path() -> String {
    // This is a fallback - actual profile will be determined at load time
    if let Some(data_dir) = utils::get_data_dir(utils::Profile::Prod) {
        data_dir.join("eras.db").to_string_lossy().to_string()
    } else {
        "~/.local/share/eras/eras.db".to_string()
    }
}

fn default_proxy_url() -> String {
    "http://127.0.0.1:8790/api/gemini".to_string()
}

fn default_proxy_bind() -> String {
    "127.0.0.1:8790".to_string()
}

fn default_gemini_api_base() -> String {
    "https://generativelanguage.googleapis.com".to_string()
}

fn default_gemini_api_key_env() -> String {
    "GEMINI_API_KEY".to_string()
}

fn default_preview_model() -> String {
    "gemini-3-flash-preview".to_string()
}

fn default_stable_model() -> String {
    "gemini-2.5-flash".to_string()
}

fn default_config_version() -> Option<u32> {
    Some(CURRENT_CONFIG_VERSION)
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config directory: {0}")]
    ConfigDirError(String),
    #[error("Failed to read config file: {0}")]
    ReadError(String),
    #[error("Failed to parse TOML: {0}")]
    ParseError(#[from] toml::de::Error),
    #[error("Failed to write config file: {0}")]
    WriteError(String),
}

impl Config {
    /// Load configuration from file, or create default if missing.
    /// A missing owner id is generated and written back.
    pub fn load_with_profile(profile: utils::Profile) -> Result<Self, ConfigError> {
        let config_path = Self::get_config_path(profile)?;

        let mut config = if config_path.exists() {
            let contents = fs::read_to_string(&config_path)
                .map_err(|e| ConfigError::ReadError(e.to_string()))?;
            toml::from_str::<Config>(&contents)?
        } else {
            let mut config = Config::default();
            config.database_path = Self::default_database_path_for_profile(profile);
            config
        };

        let needs_save = !config_path.exists() || config.owner_id.trim().is_empty();
        if config.owner_id.trim().is_empty() {
            config.owner_id = uuid::Uuid::new_v4().to_string();
            tracing::info!(owner_id = %config.owner_id, "generated owner id");
        }
        if needs_save {
            if let Err(ref e) = config.save_with_profile(profile) {
                tracing::error!(path = ?config_path, error = %e, "failed to save config file");
            }
        }

        config.apply_env_overrides();
        Ok(config)
    }

    /// Environment wins over the file for endpoints and secrets
    fn apply_env_overrides(&mut self) {
        if let Some(url) = non_empty_env("ERAS_PROXY_URL") {
            self.proxy.url = url;
        }
        if let Some(token) = non_empty_env("ERAS_PROXY_TOKEN") {
            self.proxy.token = token;
        }
    }

    /// Save configuration to file
    pub fn save_with_profile(&mut self, profile: utils::Profile) -> Result<(), ConfigError> {
        self.config_version = Some(CURRENT_CONFIG_VERSION);

        let config_path = Self::get_config_path(profile)?;

        if let Some(parent) = config_path.parent() {
            fs::create_dir_all(parent).map_err(|e| ConfigError::WriteError(e.to_string()))?;
        }

        let toml_string = toml::to_string_pretty(self)
            .map_err(|e| ConfigError::WriteError(format!("Failed to serialize config: {}", e)))?;

        fs::write(&config_path, toml_string).map_err(|e| ConfigError::WriteError(e.to_string()))?;

        Ok(())
    }

    /// Pin (or unpin) an era in the config file.
    /// Reads the file fresh so environment overrides are never written out.
    pub fn persist_selected_era(
        profile: utils::Profile,
        era: Option<uuid::Uuid>,
    ) -> Result<(), ConfigError> {
        let config_path = Self::get_config_path(profile)?;
        let mut on_disk = if config_path.exists() {
            let contents = fs::read_to_string(&config_path)
                .map_err(|e| ConfigError::ReadError(e.to_string()))?;
            toml::from_str::<Config>(&contents)?
        } else {
            Config::default()
        };
        on_disk.selected_era = era.map(|id| id.to_string());
        on_disk.save_with_profile(profile)
    }

    /// Pinned era id, ignoring values that do not parse
    pub fn selected_era_id(&self) -> Option<uuid::Uuid> {
        self.selected_era
            .as_deref()
            .and_then(|id| uuid::Uuid::parse_str(id.trim()).ok())
    }

    /// Get the path to the config file
    pub fn get_config_path(profile: utils::Profile) -> Result<PathBuf, ConfigError> {
        let config_dir = utils::get_config_dir(profile).ok_or_else(|| {
            ConfigError::ConfigDirError("Could not determine config directory".to_string())
        })?;
        Ok(config_dir.join("config.toml"))
    }

    /// Get default database path for a specific profile
    fn default_database_path_for_profile(profile: utils::Profile) -> String {
        if let Some(data_dir) = utils::get_data_dir(profile) {
            data_dir.join("eras.db").to_string_lossy().to_string()
        } else {
            match profile {
                utils::Profile::Dev => "~/.local/share/eras-dev/eras.db".to_string(),
                utils::Profile::Prod => "~/.local/share/eras/eras.db".to_string(),
            }
        }
    }

    /// Get the expanded database path (with ~ expansion)
    pub fn get_database_path(&self) -> PathBuf {
        utils::expand_path(&self.database_path)
    }

    /// Gemini API key read from the configured environment variable
    pub fn gemini_api_key(&self) -> Option<String> {
        non_empty_env(&self.gemini.api_key_env)
    }

    /// Proxy token, `None` when unset
    pub fn proxy_token(&self) -> Option<&str> {
        let token = self.proxy.token.trim();
        (!token.is_empty()).then_some(token)
    }
}

fn non_empty_env(name: &str) -> Option<String> {
    std::env::var(name)
        .ok()
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}
