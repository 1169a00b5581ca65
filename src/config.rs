// Global configuration management

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::engine::{
    AudioFormat, DEFAULT_BIT_RATE_KBPS, DEFAULT_ENCODER_PATH, ProgressMode, SessionOptions,
};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub defaults: DefaultsConfig,

    #[serde(default)]
    pub session: SessionConfig,

    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DefaultsConfig {
    /// Target bitrate in kb/s
    #[serde(default = "default_bit_rate")]
    pub bit_rate: u32,

    /// Target format; inferred from the input extension when unset
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub format: Option<AudioFormat>,

    /// ffmpeg binary to run
    #[serde(default = "default_encoder_path")]
    pub encoder_path: PathBuf,

    /// Where encoded files are written (beside the input when unset)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output_dir: Option<PathBuf>,

    /// Copy the original through when the bitrate guard aborts
    #[serde(default)]
    pub keep_original_on_guard: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionConfig {
    #[serde(default)]
    pub progress_mode: ProgressMode,

    #[serde(default = "default_true_config")]
    pub bitrate_guard: bool,

    /// Give up on an encode after this many seconds
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deadline_secs: Option<u64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Append logs to audioshrink.log instead of stderr
    #[serde(default)]
    pub debug_file: bool,
}

fn default_bit_rate() -> u32 {
    DEFAULT_BIT_RATE_KBPS
}

fn default_encoder_path() -> PathBuf {
    PathBuf::from(DEFAULT_ENCODER_PATH)
}

fn default_true_config() -> bool {
    true
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for DefaultsConfig {
    fn default() -> Self {
        Self {
            bit_rate: default_bit_rate(),
            format: None,
            encoder_path: default_encoder_path(),
            output_dir: None,
            keep_original_on_guard: false,
        }
    }
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            progress_mode: ProgressMode::default(),
            bitrate_guard: true,
            deadline_secs: None,
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            debug_file: false,
        }
    }
}

impl SessionConfig {
    pub fn to_options(&self) -> SessionOptions {
        SessionOptions {
            progress_mode: self.progress_mode,
            bitrate_guard: self.bitrate_guard,
            deadline: self.deadline_secs.map(Duration::from_secs),
        }
    }
}

impl Config {
    /// Get the path to the config file
    pub fn config_path() -> Result<PathBuf> {
        let config_dir = if cfg!(target_os = "macos") {
            dirs::home_dir()
                .context("Could not determine home directory")?
                .join(".config")
                .join("audioshrink")
        } else {
            dirs::config_dir()
                .context("Could not determine config directory")?
                .join("audioshrink")
        };

        Ok(config_dir.join("config.toml"))
    }

    /// Load config from disk, or create default if it doesn't exist
    pub fn load() -> Result<Self> {
        let config_path = Self::config_path()?;

        if config_path.exists() {
            Self::load_from(&config_path)
        } else {
            let config = Config::default();

            // Best effort: a read-only config dir still gets built-in defaults
            if let Err(e) = config.save() {
                // Logging is configured from this file, so it is not up yet
                eprintln!("Warning: Could not create default config file: {:#}", e);
                eprintln!(
                    "Using built-in defaults. Run 'audioshrink init-config' to create a config file."
                );
            }

            Ok(config)
        }
    }

    pub fn load_from(path: &Path) -> Result<Self> {
        let contents = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        let config: Config = toml::from_str(&contents)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))?;

        Ok(config)
    }

    /// Save config to disk
    pub fn save(&self) -> Result<()> {
        self.save_to(&Self::config_path()?)
    }

    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).with_context(|| {
                format!("Failed to create config directory: {}", parent.display())
            })?;
        }

        let contents = toml::to_string_pretty(self).context("Failed to serialize config")?;

        fs::write(path, contents)
            .with_context(|| format!("Failed to write config file: {}", path.display()))?;

        Ok(())
    }

    /// Check if config file exists
    pub fn exists() -> bool {
        Self::config_path().map(|p| p.exists()).unwrap_or(false)
    }
}
