use std::fmt;
use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};

/// Hardware-assisted encoding backend selected for this deployment.
///
/// Exactly one accelerator is active per deployment; it decides both the
/// container runtime attachments and which hardware encoder rows survive
/// catalog filtering.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Accelerator {
    Nvenc,
    Qsv,
    Vaapi,
}

impl Accelerator {
    /// The identifier used in configuration, the environment, and encoder
    /// name suffixes (e.g. `h264_nvenc`).
    pub fn tag(&self) -> &'static str {
        match self {
            Accelerator::Nvenc => "nvenc",
            Accelerator::Qsv => "qsv",
            Accelerator::Vaapi => "vaapi",
        }
    }

    pub fn from_tag(tag: &str) -> Option<Self> {
        match tag {
            "nvenc" => Some(Accelerator::Nvenc),
            "qsv" => Some(Accelerator::Qsv),
            "vaapi" => Some(Accelerator::Vaapi),
            _ => None,
        }
    }
}

impl fmt::Display for Accelerator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.tag())
    }
}

/// Configuration for the transcoding service
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceConfig {
    /// Hardware accelerator identifiers recognized on this deployment
    pub hardware_encoders: Vec<String>,
    /// Docker image providing the ffmpeg/ffprobe binaries
    pub docker_image: String,
    /// Path to docker binary
    pub docker_bin: PathBuf,
    /// Maximum number of encoder containers allowed to run at once
    pub max_concurrent_jobs: usize,
    /// Deadline in seconds for a single encoder run; None disables it
    pub job_timeout_secs: Option<u64>,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self::default_config()
    }
}

impl ServiceConfig {
    /// Create a default configuration with sensible values
    pub fn default_config() -> Self {
        Self {
            hardware_encoders: vec![
                "nvenc".to_string(),
                "qsv".to_string(),
                "vaapi".to_string(),
            ],
            docker_image: "linuxserver/ffmpeg".to_string(),
            docker_bin: PathBuf::from("docker"),
            max_concurrent_jobs: 2,
            job_timeout_secs: Some(3600),
        }
    }

    /// Load configuration from a file, or return defaults if path is None or file doesn't exist
    pub fn load_config(path: Option<&Path>) -> Result<Self> {
        let mut config = Self::default_config();

        if let Some(config_path) = path {
            if config_path.exists() {
                let content = std::fs::read_to_string(config_path).with_context(|| {
                    format!("Failed to read config file: {}", config_path.display())
                })?;

                // Try JSON first, then TOML
                if config_path.extension().and_then(|s| s.to_str()) == Some("toml") {
                    let file_config: ServiceConfig = toml::from_str(&content).with_context(|| {
                        format!("Failed to parse TOML config: {}", config_path.display())
                    })?;
                    config = file_config;
                } else {
                    let file_config: ServiceConfig =
                        serde_json::from_str(&content).with_context(|| {
                            format!("Failed to parse JSON config: {}", config_path.display())
                        })?;
                    config = file_config;
                }
            }
        }

        Ok(config)
    }
}

/// Resolved startup settings: file configuration plus the environment-provided
/// storage path and accelerator selection. Built once in main and injected.
#[derive(Debug, Clone)]
pub struct Settings {
    pub config: ServiceConfig,
    /// Shared storage directory, bind-mounted into the encoder container
    pub storage_path: PathBuf,
    /// The hardware accelerator active on this host
    pub accelerator: Accelerator,
}

impl Settings {
    /// Resolve configuration and environment. An unset storage path or an
    /// unset/unrecognized accelerator identifier is fatal.
    pub fn from_environment(config_path: Option<&Path>) -> Result<Self> {
        let config = ServiceConfig::load_config(config_path)?;
        let storage_path = storage_directory()?;
        let accelerator = hardware_accelerator(&config)?;
        Ok(Self {
            config,
            storage_path,
            accelerator,
        })
    }
}

/// Get and validate the storage directory from the `STORAGE_PATH` environment variable
pub fn storage_directory() -> Result<PathBuf> {
    match std::env::var_os("STORAGE_PATH") {
        Some(value) if !value.is_empty() => Ok(PathBuf::from(value)),
        _ => bail!("The environment variable 'STORAGE_PATH' is not set"),
    }
}

/// Get the selected accelerator from the `HARDWARE_ENCODER` environment
/// variable, verifying it against the configured identifier list.
pub fn hardware_accelerator(config: &ServiceConfig) -> Result<Accelerator> {
    let requested = std::env::var("HARDWARE_ENCODER")
        .context("The environment variable 'HARDWARE_ENCODER' is not set")?;

    if !config.hardware_encoders.iter().any(|t| *t == requested) {
        bail!(
            "{} is not an available hardware encoder. The available encoders are {:?}",
            requested,
            config.hardware_encoders
        );
    }

    Accelerator::from_tag(&requested).with_context(|| {
        format!("{requested} is not a hardware encoder this build knows how to attach")
    })
}
