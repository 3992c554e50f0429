use std::path::Path;
use std::time::Duration;

use serde::Deserialize;

use crate::error::{ConfigError, Result};

/// Top-level configuration. Every section defaults, so the tool works
/// without a config file on disk.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct SpacecapConfig {
    pub network: NetworkSection,
    pub capture: CaptureSection,
    pub output: OutputSection,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct NetworkSection {
    pub user_agent: String,
    pub request_timeout_seconds: u64,
}

impl Default for NetworkSection {
    fn default() -> Self {
        Self {
            user_agent: "spacecap/0.1".to_string(),
            request_timeout_seconds: 30,
        }
    }
}

impl NetworkSection {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_seconds)
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CaptureSection {
    /// Muxer binary name or path, resolved through PATH.
    pub muxer_binary: String,
    /// Wall-clock budget for each parallel capture job, in seconds.
    pub job_timeout_seconds: u64,
    /// Worker pool size for the dual-source branch. 0 means hardware
    /// parallelism.
    pub parallelism: usize,
    /// Scratch directory for intermediate artifacts, relative to the
    /// working directory unless absolute.
    pub scratch_dir: String,
}

impl Default for CaptureSection {
    fn default() -> Self {
        Self {
            muxer_binary: "ffmpeg".to_string(),
            job_timeout_seconds: 60,
            parallelism: 0,
            scratch_dir: "tmp".to_string(),
        }
    }
}

impl CaptureSection {
    pub fn job_timeout(&self) -> Duration {
        Duration::from_secs(self.job_timeout_seconds)
    }

    pub fn effective_parallelism(&self) -> usize {
        if self.parallelism > 0 {
            return self.parallelism;
        }
        std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(1)
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct OutputSection {
    /// Filename template, `%(field)s` style.
    pub name_template: String,
    pub output_dir: String,
}

impl Default for OutputSection {
    fn default() -> Self {
        Self {
            name_template: crate::naming::DEFAULT_NAME_TEMPLATE.to_string(),
            output_dir: ".".to_string(),
        }
    }
}

pub fn load_spacecap_config<P: AsRef<Path>>(path: P) -> Result<SpacecapConfig> {
    let path = path.as_ref();
    let contents = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
        source,
        path: path.to_path_buf(),
    })?;
    let config = toml::from_str(&contents).map_err(|source| ConfigError::Parse {
        source,
        path: path.to_path_buf(),
    })?;
    Ok(config)
}
