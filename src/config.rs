use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use tracing::debug;

use crate::{Error, Result};

const DEFAULT_PORT: u16 = 8000;
const DEFAULT_STATUS_INTERVAL_SECS: u64 = 15;
const DEFAULT_TELEMETRY_TIMEOUT_SECS: u64 = 10;

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    /// Artifact root. Defaults to `~/.stylize/data`.
    pub data_path: Option<String>,
    /// Renderer install directory; also the renderer's working directory.
    pub neural_style_path: Option<String>,
    pub renderer: Option<String>,
    pub renderer_script: Option<String>,
    pub backend: Option<String>,
    pub telemetry_command: Option<String>,
    /// Upper bound on one telemetry query before it counts as failed.
    pub telemetry_timeout_secs: Option<u64>,
    pub status_interval_secs: Option<u64>,
    /// Consumed by the transport layer, not by the engine.
    pub port: Option<u16>,
}

impl Config {
    pub fn stylize_dir() -> Result<PathBuf> {
        Ok(dirs::home_dir().ok_or(Error::NoHomeDir)?.join(".stylize"))
    }

    pub fn config_path() -> Result<PathBuf> {
        Ok(Self::stylize_dir()?.join("stylize.toml"))
    }

    pub fn data_dir(&self) -> Result<PathBuf> {
        match &self.data_path {
            Some(dir) => Ok(expand_tilde(dir)),
            None => Ok(Self::stylize_dir()?.join("data")),
        }
    }

    pub fn neural_style_dir(&self) -> PathBuf {
        expand_tilde(self.neural_style_path.as_deref().unwrap_or("~/neural-style"))
    }

    pub fn effective_renderer(&self) -> &str {
        self.renderer.as_deref().unwrap_or("th")
    }

    pub fn renderer_script_path(&self) -> PathBuf {
        self.neural_style_dir()
            .join(self.renderer_script.as_deref().unwrap_or("neural_style.lua"))
    }

    pub fn effective_backend(&self) -> &str {
        self.backend.as_deref().unwrap_or("cudnn")
    }

    pub fn effective_telemetry_command(&self) -> &str {
        self.telemetry_command.as_deref().unwrap_or("nvidia-smi")
    }

    pub fn telemetry_timeout(&self) -> Duration {
        Duration::from_secs(
            self.telemetry_timeout_secs
                .unwrap_or(DEFAULT_TELEMETRY_TIMEOUT_SECS)
                .max(1),
        )
    }

    pub fn status_interval(&self) -> Duration {
        Duration::from_secs(
            self.status_interval_secs
                .unwrap_or(DEFAULT_STATUS_INTERVAL_SECS)
                .max(1),
        )
    }

    pub fn effective_port(&self) -> u16 {
        self.port.unwrap_or(DEFAULT_PORT)
    }

    pub fn load() -> Result<Self> {
        Self::load_from(&Self::config_path()?)
    }

    pub fn load_from(path: &Path) -> Result<Self> {
        debug!(path = %path.display(), "Config::load");
        if !path.exists() {
            debug!("Config file not found, using defaults");
            return Ok(Self::default());
        }
        let config: Self = toml::from_str(&fs::read_to_string(path)?)?;
        debug!(
            data_path = ?config.data_path,
            neural_style_path = ?config.neural_style_path,
            renderer = ?config.renderer,
            "Config loaded"
        );
        Ok(config)
    }

    pub fn ensure_dirs(&self) -> Result<()> {
        let data_dir = self.data_dir()?;
        if !data_dir.exists() {
            debug!(data_dir = %data_dir.display(), "Creating data directory");
            fs::create_dir_all(&data_dir)?;
        }
        Ok(())
    }
}

fn expand_tilde(path: &str) -> PathBuf {
    if let Some(rest) = path.strip_prefix("~/") {
        if let Some(home) = dirs::home_dir() {
            return home.join(rest);
        }
    }
    PathBuf::from(path)
}
