//! Runtime configuration: where things live and how to sample

use crate::error::{AbayesError, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

pub const CACHE_DIR_ENV: &str = "ABAYES_CACHE_DIR";
pub const TEMPLATE_DIR_ENV: &str = "ABAYES_TEMPLATE_DIR";
pub const CMDSTAN_ENV: &str = "CMDSTAN";

/// Locations of the model cache, templates and the CmdStan installation.
///
/// Resolution order: built-in defaults, then a JSON settings file (if
/// given), then environment variables.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// Directory for rendered models and executables (`~/.abayes/cache`)
    pub cache_dir: Option<PathBuf>,
    /// Directory of `*.stan` templates; the embedded set when unset
    pub template_dir: Option<PathBuf>,
    /// CmdStan installation; auto-detected when unset
    pub cmdstan: Option<PathBuf>,
}

impl Settings {
    /// Defaults overridden by the environment.
    pub fn from_env() -> Self {
        Self::default().with_env_overrides()
    }

    /// Read a JSON settings file, then apply environment overrides.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let settings: Settings = serde_json::from_str(&content)?;
        Ok(settings.with_env_overrides())
    }

    fn with_env_overrides(mut self) -> Self {
        if let Some(dir) = env_path(CACHE_DIR_ENV) {
            self.cache_dir = Some(dir);
        }
        if let Some(dir) = env_path(TEMPLATE_DIR_ENV) {
            self.template_dir = Some(dir);
        }
        if let Some(dir) = env_path(CMDSTAN_ENV) {
            self.cmdstan = Some(dir);
        }
        self
    }

    /// Cache directory, falling back to `~/.abayes/cache`.
    pub fn resolved_cache_dir(&self) -> Result<PathBuf> {
        match &self.cache_dir {
            Some(dir) => Ok(dir.clone()),
            None => default_cache_dir(),
        }
    }
}

pub fn default_cache_dir() -> Result<PathBuf> {
    let home = dirs::home_dir().ok_or_else(|| {
        AbayesError::Io(std::io::Error::new(
            std::io::ErrorKind::NotFound,
            "no HOME directory found",
        ))
    })?;
    Ok(home.join(".abayes").join("cache"))
}

fn env_path(key: &str) -> Option<PathBuf> {
    std::env::var_os(key)
        .filter(|v| !v.is_empty())
        .map(PathBuf::from)
}

/// Options for one sampling run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SamplerOptions {
    /// Number of chains to run
    pub num_chains: usize,
    /// Number of warmup iterations per chain
    pub num_warmup: usize,
    /// Number of sampling iterations per chain
    pub num_samples: usize,
    /// Random seed; chain `k` uses `seed + k`
    pub seed: Option<u32>,
    /// Adapt delta (target acceptance rate)
    pub adapt_delta: f64,
    /// Maximum tree depth
    pub max_treedepth: usize,
    /// Arguments appended verbatim to every sampler invocation
    pub extra_args: Vec<String>,
    /// Keep data and chain CSVs here instead of a temporary directory
    pub output_dir: Option<PathBuf>,
    /// Stream sampler console output instead of capturing it
    pub show_console: bool,
}

impl Default for SamplerOptions {
    fn default() -> Self {
        Self {
            num_chains: 4,
            num_warmup: 1000,
            num_samples: 1000,
            seed: None,
            adapt_delta: 0.8,
            max_treedepth: 10,
            extra_args: Vec::new(),
            output_dir: None,
            show_console: false,
        }
    }
}

impl SamplerOptions {
    pub fn validate(&self) -> Result<()> {
        if self.num_chains == 0 {
            return Err(AbayesError::InvalidData(
                "num_chains must be at least 1".to_string(),
            ));
        }
        if self.num_samples == 0 {
            return Err(AbayesError::InvalidData(
                "num_samples must be at least 1".to_string(),
            ));
        }
        if !(self.adapt_delta > 0.0 && self.adapt_delta < 1.0) {
            return Err(AbayesError::InvalidData(format!(
                "adapt_delta must lie in (0, 1), got {}",
                self.adapt_delta
            )));
        }
        Ok(())
    }
}
