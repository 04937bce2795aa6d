use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use anyhow::{Result, anyhow};

use crate::engine::OutputMode;

pub const ENGINE_ENV_VAR: &str = "ASKTERM_ENGINE";

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(default)]
pub struct Config {
    pub engine_path: PathBuf,
    pub engine_args: Vec<String>,
    pub timeout_secs: u64,
    pub output_mode: OutputMode,
    pub char_limit: usize,
    pub placeholder: String,
    pub log_file: PathBuf,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            engine_path: PathBuf::from("./llm/run.sh"),
            engine_args: Vec::new(),
            timeout_secs: 5,
            output_mode: OutputMode::Stream,
            char_limit: 280,
            placeholder: "Send a message...".to_string(),
            log_file: PathBuf::from("debug.log"),
        }
    }
}

impl Config {
    pub fn new() -> Self {
        Self::default()
    }

    /// Load from the user config directory, then apply environment overrides
    pub fn load() -> Result<Self> {
        let config_path = Self::get_config_path()?;
        let mut config = Self::load_from(&config_path)?;
        config.apply_env();
        Ok(config)
    }

    pub fn load_from(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::new());
        }

        let config_content = fs::read_to_string(path)?;
        let config: Config = serde_json::from_str(&config_content)
            .map_err(|e| anyhow!("Invalid config file {}: {}", path.display(), e))?;
        Ok(config)
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    fn apply_env(&mut self) {
        if let Ok(path) = std::env::var(ENGINE_ENV_VAR) {
            if !path.trim().is_empty() {
                self.engine_path = PathBuf::from(path);
            }
        }
    }

    fn get_config_path() -> Result<PathBuf> {
        let config_dir = dirs::config_dir()
            .ok_or_else(|| anyhow!("Could not determine config directory"))?;

        Ok(config_dir.join("askterm").join("config.json"))
    }
}
