//! Configuration file management for planloom.
//!
//! Provides a TOML-based config file at `~/.config/planloom/config.toml` and
//! a resolution chain: env var > config file > default.

use std::path::PathBuf;

use anyhow::{Context, Result, bail};
use serde::{Deserialize, Serialize};

// -----------------------------------------------------------------------
// Config file types
// -----------------------------------------------------------------------

#[derive(Debug, Serialize, Deserialize)]
pub struct ConfigFile {
    pub llm: LlmSection,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct LlmSection {
    /// API key for the hosted model.
    pub api_key: String,
    /// Model name, e.g. "gemini-2.0-flash".
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    /// Override for the API base URL.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub base_url: Option<String>,
}

// -----------------------------------------------------------------------
// Paths
// -----------------------------------------------------------------------

/// Return the planloom config directory.
///
/// Always uses XDG layout: `$XDG_CONFIG_HOME/planloom` or
/// `~/.config/planloom`, regardless of platform.
pub fn config_dir() -> PathBuf {
    if let Ok(xdg) = std::env::var("XDG_CONFIG_HOME") {
        return PathBuf::from(xdg).join("planloom");
    }
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".config")
        .join("planloom")
}

/// Return the path to the planloom config file.
pub fn config_path() -> PathBuf {
    config_dir().join("config.toml")
}

// -----------------------------------------------------------------------
// Read / write
// -----------------------------------------------------------------------

/// Load and parse the config file. Returns an error if it does not exist.
pub fn load_config() -> Result<ConfigFile> {
    let path = config_path();
    let contents = std::fs::read_to_string(&path)
        .with_context(|| format!("failed to read config file at {}", path.display()))?;
    let config: ConfigFile = toml::from_str(&contents).context("failed to parse config file")?;
    Ok(config)
}

/// Serialize and write the config file, creating parent dirs as needed.
/// Sets file permissions to 0600 on Unix since it holds an API key.
pub fn save_config(config: &ConfigFile) -> Result<()> {
    let path = config_path();
    let dir = config_dir();
    std::fs::create_dir_all(&dir)
        .with_context(|| format!("failed to create config directory {}", dir.display()))?;

    let contents = toml::to_string_pretty(config).context("failed to serialize config")?;
    std::fs::write(&path, &contents)
        .with_context(|| format!("failed to write config file at {}", path.display()))?;

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        let perms = std::fs::Permissions::from_mode(0o600);
        std::fs::set_permissions(&path, perms)
            .with_context(|| format!("failed to set permissions on {}", path.display()))?;
    }

    Ok(())
}

// -----------------------------------------------------------------------
// Resolved config
// -----------------------------------------------------------------------

const DEFAULT_MODEL: &str = "gemini-2.0-flash";

/// Fully resolved configuration, ready for use.
#[derive(Debug)]
pub struct PlanloomConfig {
    pub api_key: String,
    pub model: String,
    pub base_url: Option<String>,
}

impl PlanloomConfig {
    /// Resolve configuration using the chain: env var > config file > default.
    ///
    /// - API key: `PLANLOOM_API_KEY` env > `config_file.llm.api_key` > error
    /// - Model: `PLANLOOM_MODEL` env > `config_file.llm.model` > default
    /// - Base URL: `PLANLOOM_BASE_URL` env > `config_file.llm.base_url` > none
    pub fn resolve() -> Result<Self> {
        let file_config = load_config().ok();

        let api_key = if let Ok(key) = std::env::var("PLANLOOM_API_KEY") {
            key
        } else if let Some(ref cfg) = file_config {
            cfg.llm.api_key.clone()
        } else {
            bail!(
                "API key not found; set PLANLOOM_API_KEY or run `planloom init` to create a config file"
            );
        };
        if api_key.is_empty() {
            bail!("API key is empty; set PLANLOOM_API_KEY or edit the config file");
        }

        let model = std::env::var("PLANLOOM_MODEL")
            .ok()
            .or_else(|| file_config.as_ref().and_then(|c| c.llm.model.clone()))
            .unwrap_or_else(|| DEFAULT_MODEL.to_owned());

        let base_url = std::env::var("PLANLOOM_BASE_URL")
            .ok()
            .or_else(|| file_config.as_ref().and_then(|c| c.llm.base_url.clone()));

        Ok(Self {
            api_key,
            model,
            base_url,
        })
    }
}

// -----------------------------------------------------------------------
// Tests
// -----------------------------------------------------------------------
