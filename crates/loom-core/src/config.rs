use std::{
    env, fs,
    path::{Path, PathBuf},
};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::model::{DEFAULT_BITS_PER_SAMPLE, DEFAULT_RECORDING_TITLE, DEFAULT_SAMPLE_RATE};

pub const CONFIG_FILE_NAME: &str = "loom.config.toml";
pub const CONFIG_PATH_ENV: &str = "LOOM_CONFIG_PATH";

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct LoomConfig {
    pub bounce: BounceConfig,
    pub library: LibraryConfig,
    pub diagnostics: DiagnosticsConfig,
}

/// Render encoding for every bounce. Fixed per engine instance.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct BounceConfig {
    pub sample_rate: u32,
    pub bits_per_sample: u16,
    pub output_dir: PathBuf,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct LibraryConfig {
    pub recordings_dir: PathBuf,
    pub default_title: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct DiagnosticsConfig {
    pub rust_log_filter: String,
    pub trace_file_prefix: String,
    pub logs_dir: PathBuf,
    pub write_log_file: bool,
}

impl Default for BounceConfig {
    fn default() -> Self {
        Self {
            sample_rate: DEFAULT_SAMPLE_RATE,
            bits_per_sample: DEFAULT_BITS_PER_SAMPLE,
            output_dir: PathBuf::from("data/bounces"),
        }
    }
}

impl Default for LibraryConfig {
    fn default() -> Self {
        Self {
            recordings_dir: PathBuf::from("data/recordings"),
            default_title: DEFAULT_RECORDING_TITLE.to_string(),
        }
    }
}

impl Default for DiagnosticsConfig {
    fn default() -> Self {
        Self {
            rust_log_filter: "info,loom_core=trace".to_string(),
            trace_file_prefix: "loom".to_string(),
            logs_dir: PathBuf::from("logs"),
            write_log_file: true,
        }
    }
}

impl BounceConfig {
    /// Sample rate and bit depth pulled into the ranges the WAV writer accepts.
    #[must_use]
    pub fn normalized(mut self) -> Self {
        self.sample_rate = self.sample_rate.clamp(8_000, 192_000);
        self.bits_per_sample = match self.bits_per_sample {
            24 => 24,
            _ => 16,
        };
        self
    }
}

impl LoomConfig {
    pub fn load() -> Result<Self> {
        let config_path = discover_config_path().with_context(|| {
            format!("failed to locate {CONFIG_FILE_NAME}; looked in cwd and parent directory")
        })?;
        Self::load_from(&config_path)
    }

    pub fn load_from(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)
            .with_context(|| format!("failed to read config file {}", path.display()))?;
        Self::parse(&content)
            .with_context(|| format!("failed to parse config TOML from {}", path.display()))
    }

    pub fn parse(content: &str) -> Result<Self> {
        let mut config: LoomConfig = toml::from_str(content)?;
        config.bounce = config.bounce.normalized();
        Ok(config)
    }

    /// Like [`LoomConfig::load`] but a missing file yields the defaults.
    /// A file that exists and fails to parse is still an error.
    pub fn load_or_default() -> Result<Self> {
        match discover_config_path() {
            Ok(path) => Self::load_from(&path),
            Err(error) => {
                debug!(%error, "no config file found, using defaults");
                Ok(Self::default())
            }
        }
    }
}

fn discover_config_path() -> Result<PathBuf> {
    if let Some(path) = env::var_os(CONFIG_PATH_ENV) {
        let path = PathBuf::from(path);
        if path.is_file() {
            return Ok(path);
        }
    }

    let cwd = env::current_dir().context("failed to resolve current directory")?;
    let candidates = [
        cwd.join(CONFIG_FILE_NAME),
        cwd.join("..").join(CONFIG_FILE_NAME),
    ];

    candidates
        .into_iter()
        .find(|path| path.is_file())
        .ok_or_else(|| anyhow::anyhow!("{CONFIG_FILE_NAME} not found"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partial_toml_keeps_defaults() {
        let config = LoomConfig::parse(
            r#"
            [bounce]
            output_dir = "mixes"

            [library]
            default_title = "Sketch"
            "#,
        )
        .expect("partial config should parse");

        assert_eq!(config.bounce.output_dir, PathBuf::from("mixes"));
        assert_eq!(config.bounce.sample_rate, DEFAULT_SAMPLE_RATE);
        assert_eq!(config.library.default_title, "Sketch");
        assert_eq!(config.diagnostics.trace_file_prefix, "loom");
        assert!(config.diagnostics.write_log_file);
    }

    #[test]
    fn session_log_can_be_switched_off() {
        let config = LoomConfig::parse(
            r"
            [diagnostics]
            write_log_file = false
            ",
        )
        .expect("config should parse");

        assert!(!config.diagnostics.write_log_file);
        assert_eq!(config.diagnostics.logs_dir, PathBuf::from("logs"));
    }

    #[test]
    fn unsupported_encoding_is_normalized() {
        let config = LoomConfig::parse(
            r"
            [bounce]
            sample_rate = 1000
            bits_per_sample = 12
            ",
        )
        .expect("config should parse");

        assert_eq!(config.bounce.sample_rate, 8_000);
        assert_eq!(config.bounce.bits_per_sample, 16);
    }

    #[test]
    fn malformed_toml_is_an_error() {
        assert!(LoomConfig::parse("[bounce\nsample_rate = ").is_err());
    }
}
