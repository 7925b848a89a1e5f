//! Application configuration management.
//!
//! This module handles loading and saving the application configuration,
//! which includes the identity provider API key, an optional endpoint
//! override, and the last email used to sign in.
//!
//! Configuration is stored at `~/.config/recipebook/config.json`.
//! `RECIPEBOOK_API_KEY` and `RECIPEBOOK_IDENTITY_ENDPOINT` take precedence
//! over the file.

use std::path::PathBuf;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::api::DEFAULT_IDENTITY_ENDPOINT;

/// Application name used for config/data directory paths
const APP_NAME: &str = "recipebook";

/// Config file name
const CONFIG_FILE: &str = "config.json";

pub const API_KEY_ENV: &str = "RECIPEBOOK_API_KEY";
pub const ENDPOINT_ENV: &str = "RECIPEBOOK_IDENTITY_ENDPOINT";

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    pub api_key: Option<String>,
    pub identity_endpoint: Option<String>,
    pub last_email: Option<String>,
}

impl Config {
    pub fn load() -> Result<Self> {
        let path = Self::config_path()?;
        if path.exists() {
            let contents = std::fs::read_to_string(&path)
                .with_context(|| format!("Failed to read config file: {}", path.display()))?;
            Self::from_json(&contents)
        } else {
            Ok(Self::default())
        }
    }

    pub fn from_json(contents: &str) -> Result<Self> {
        serde_json::from_str(contents).context("Failed to parse config file")
    }

    pub fn save(&self) -> Result<()> {
        let path = Self::config_path()?;
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let contents = serde_json::to_string_pretty(self)?;
        std::fs::write(path, contents)?;
        Ok(())
    }

    fn config_path() -> Result<PathBuf> {
        let config_dir = dirs::config_dir()
            .ok_or_else(|| anyhow::anyhow!("Could not find config directory"))?;
        Ok(config_dir.join(APP_NAME).join(CONFIG_FILE))
    }

    /// Directory holding the persisted session and the log file
    pub fn data_dir(&self) -> Result<PathBuf> {
        let data_dir = dirs::data_local_dir()
            .ok_or_else(|| anyhow::anyhow!("Could not find data directory"))?;
        Ok(data_dir.join(APP_NAME))
    }

    pub fn resolve_api_key(&self) -> Result<String> {
        Self::pick(std::env::var(API_KEY_ENV).ok(), self.api_key.clone()).ok_or_else(|| {
            anyhow::anyhow!(
                "No API key configured. Set {} or add \"api_key\" to the config file.",
                API_KEY_ENV
            )
        })
    }

    pub fn endpoint(&self) -> String {
        Self::pick(std::env::var(ENDPOINT_ENV).ok(), self.identity_endpoint.clone())
            .unwrap_or_else(|| DEFAULT_IDENTITY_ENDPOINT.to_string())
    }

    /// First non-blank value, environment before file
    fn pick(env: Option<String>, file: Option<String>) -> Option<String> {
        env.into_iter()
            .chain(file)
            .map(|v| v.trim().to_string())
            .find(|v| !v.is_empty())
    }
}
