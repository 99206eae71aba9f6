//! CmdStan execution
//!
//! This module provides functionality to:
//! - Detect a cmdstan installation
//! - Compile Stan programs to executables
//! - Run NUTS sampling chain by chain
//! - Parse the per-chain CSV output into a [`StanFit`]
//!
//! Compilation and sampling sit behind the [`Toolchain`] trait so callers
//! (and tests) can substitute their own driver.

use crate::config::SamplerOptions;
use crate::error::{AbayesError, Result};
use std::fs;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use tempfile::TempDir;

/// Everything the sampler needs for one run
#[derive(Debug, Clone, Copy)]
pub struct SampleRequest<'a> {
    pub executable: &'a Path,
    pub data_file: &'a Path,
    pub output_dir: &'a Path,
    pub options: &'a SamplerOptions,
}

/// External compiler/sampler
pub trait Toolchain {
    /// Turn a `.stan` file into an executable, returning its path.
    fn compile(&self, stan_file: &Path) -> Result<PathBuf>;

    /// Run every chain, returning the chain CSV paths in chain order.
    fn sample(&self, request: &SampleRequest<'_>) -> Result<Vec<PathBuf>>;
}

/// A cmdstan installation driven through `make` and the model executables
#[derive(Debug, Clone)]
pub struct CmdStan {
    home: PathBuf,
}

impl CmdStan {
    pub fn new(home: impl Into<PathBuf>) -> Self {
        Self { home: home.into() }
    }

    /// Use `explicit` if given, otherwise search the usual locations.
    pub fn locate(explicit: Option<&Path>) -> Result<Self> {
        match explicit {
            Some(path) if path.exists() => Ok(Self::new(path)),
            Some(path) => Err(AbayesError::CmdStanNotFound(format!(
                "{} does not exist",
                path.display()
            ))),
            None => detect_cmdstan().map(Self::new),
        }
    }

    pub fn home(&self) -> &Path {
        &self.home
    }
}

/// Detect cmdstan installation
pub fn detect_cmdstan() -> Result<PathBuf> {
    if let Ok(path) = std::env::var(crate::config::CMDSTAN_ENV) {
        let cmdstan_path = PathBuf::from(&path);
        if cmdstan_path.exists() {
            return Ok(cmdstan_path);
        }
    }

    let mut roots = Vec::new();
    if let Some(home) = dirs::home_dir() {
        roots.push(home.join(".cmdstan"));
        roots.push(home.join("cmdstan"));
    }
    roots.push(PathBuf::from("/usr/local/cmdstan"));
    roots.push(PathBuf::from("/opt/cmdstan"));

    for root in roots {
        if !root.exists() {
            continue;
        }
        // An installation root holds `makefile`; a parent dir holds versions.
        if root.join("makefile").exists() {
            return Ok(root);
        }
        if let Ok(entries) = fs::read_dir(&root) {
            let mut versions: Vec<PathBuf> = entries
                .filter_map(|e| e.ok())
                .map(|e| e.path())
                .filter(|p| p.is_dir())
                .collect();
            versions.sort();
            if let Some(latest) = versions.pop() {
                return Ok(latest);
            }
        }
    }

    Err(AbayesError::CmdStanNotFound(
        "please set the CMDSTAN environment variable or install cmdstan".to_string(),
    ))
}

impl Toolchain for CmdStan {
    fn compile(&self, stan_file: &Path) -> Result<PathBuf> {
        // make runs inside the cmdstan tree, so the target must be absolute
        let stan_file = fs::canonicalize(stan_file)?;
        let exe_path = executable_for(&stan_file);

        tracing::info!(model = %stan_file.display(), "compiling Stan model");

        let output = Command::new("make")
            .current_dir(&self.home)
            .arg(exe_path.to_string_lossy().to_string())
            .output()?;

        if !output.status.success() {
            return Err(AbayesError::Compilation {
                model: stan_file,
                stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
            });
        }

        tracing::info!(executable = %exe_path.display(), "compilation successful");
        Ok(exe_path)
    }

    fn sample(&self, request: &SampleRequest<'_>) -> Result<Vec<PathBuf>> {
        let config = request.options;
        fs::create_dir_all(request.output_dir)?;

        let mut chain_files = Vec::new();
        for chain_id in 1..=config.num_chains {
            let output_file = chain_file(request.output_dir, chain_id);
            tracing::info!(chain = chain_id, of = config.num_chains, "sampling");

            let mut cmd = Command::new(request.executable);
            cmd.args(sample_args(request, chain_id, &output_file));
            if config.show_console {
                cmd.stdout(Stdio::inherit());
            }

            let output = cmd.output()?;
            if !output.status.success() {
                return Err(AbayesError::Sampling {
                    chain: chain_id,
                    stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
                });
            }
            chain_files.push(output_file);
        }

        tracing::info!(chains = chain_files.len(), "MCMC sampling complete");
        Ok(chain_files)
    }
}

/// Path of the executable cmdstan builds for `stan_file`.
pub fn executable_for(stan_file: &Path) -> PathBuf {
    let stem = stan_file.with_extension("");
    let mut name = stem.into_os_string();
    name.push(std::env::consts::EXE_SUFFIX);
    PathBuf::from(name)
}

pub fn chain_file(output_dir: &Path, chain_id: usize) -> PathBuf {
    output_dir.join(format!("output_{}.csv", chain_id))
}

/// Command line for one chain of NUTS sampling.
pub fn sample_args(
    request: &SampleRequest<'_>,
    chain_id: usize,
    output_file: &Path,
) -> Vec<String> {
    let config = request.options;
    let mut args = vec![
        "sample".to_string(),
        format!("num_warmup={}", config.num_warmup),
        format!("num_samples={}", config.num_samples),
        "adapt".to_string(),
        format!("delta={}", config.adapt_delta),
        "algorithm=hmc".to_string(),
        "engine=nuts".to_string(),
        format!("max_depth={}", config.max_treedepth),
        "data".to_string(),
        format!("file={}", request.data_file.display()),
        "output".to_string(),
        format!("file={}", output_file.display()),
        format!("id={}", chain_id),
    ];

    if let Some(seed) = config.seed {
        args.push("random".to_string());
        args.push(format!("seed={}", seed.wrapping_add(chain_id as u32)));
    }

    args.extend(config.extra_args.iter().cloned());
    args
}

/// Raw result of one sampling run
#[derive(Debug)]
pub struct StanFit {
    /// Directory holding the data file and chain CSVs
    pub output_dir: PathBuf,
    /// Paths to chain CSV files
    pub chain_files: Vec<PathBuf>,
    /// CSV header, sampler columns (`lp__`, ...) included
    pub columns: Vec<String>,
    /// chain -> draw -> column
    pub chains: Vec<Vec<Vec<f64>>>,
    _scratch: Option<TempDir>,
}

impl StanFit {
    /// Parse chain CSVs written by cmdstan.
    pub fn from_chain_files(output_dir: &Path, chain_files: Vec<PathBuf>) -> Result<Self> {
        if chain_files.is_empty() {
            return Err(AbayesError::Output {
                path: output_dir.to_path_buf(),
                message: "sampler produced no chains".to_string(),
            });
        }

        let mut columns: Vec<String> = Vec::new();
        let mut chains: Vec<Vec<Vec<f64>>> = Vec::with_capacity(chain_files.len());

        for (chain_idx, path) in chain_files.iter().enumerate() {
            let (header, draws) = parse_stan_csv(path)?;
            let mismatch = |message: String| AbayesError::Output {
                path: path.clone(),
                message,
            };
            if draws.is_empty() {
                return Err(mismatch("chain has no draws".to_string()));
            }
            if chain_idx == 0 {
                columns = header;
            } else if header != columns {
                return Err(mismatch("columns differ from the first chain".to_string()));
            } else if draws.len() != chains[0].len() {
                return Err(mismatch(format!(
                    "chain has {} draws, the first chain has {}",
                    draws.len(),
                    chains[0].len()
                )));
            }
            chains.push(draws);
        }

        Ok(Self {
            output_dir: output_dir.to_path_buf(),
            chain_files,
            columns,
            chains,
            _scratch: None,
        })
    }

    /// Tie a temporary output directory to this fit's lifetime.
    pub(crate) fn with_scratch(mut self, scratch: Option<TempDir>) -> Self {
        self._scratch = scratch;
        self
    }

    pub fn num_chains(&self) -> usize {
        self.chains.len()
    }

    pub fn num_draws(&self) -> usize {
        self.chains.iter().map(|c| c.len()).sum()
    }

    /// Draws of one CSV column, per chain.
    pub fn column(&self, name: &str) -> Option<Vec<Vec<f64>>> {
        let idx = self.columns.iter().position(|c| c == name)?;
        Some(
            self.chains
                .iter()
                .map(|chain| chain.iter().map(|draw| draw[idx]).collect())
                .collect(),
        )
    }
}

/// Parse a Stan CSV file into its header and numeric rows.
fn parse_stan_csv(path: &Path) -> Result<(Vec<String>, Vec<Vec<f64>>)> {
    let malformed = |message: String| AbayesError::Output {
        path: path.to_path_buf(),
        message,
    };

    let content = fs::read_to_string(path)?;
    let mut lines = content
        .lines()
        .filter(|line| !line.starts_with('#') && !line.trim().is_empty());

    let header: Vec<String> = lines
        .next()
        .ok_or_else(|| malformed("no header found".to_string()))?
        .split(',')
        .map(|s| s.trim().to_string())
        .collect();

    let mut draws = Vec::new();
    for (row, line) in lines.enumerate() {
        let values = line
            .split(',')
            .map(|s| s.trim().parse::<f64>())
            .collect::<std::result::Result<Vec<f64>, _>>()
            .map_err(|e| malformed(format!("row {}: {}", row + 1, e)))?;

        if values.len() != header.len() {
            return Err(malformed(format!(
                "row {} has {} values, expected {}",
                row + 1,
                values.len(),
                header.len()
            )));
        }
        draws.push(values);
    }

    Ok((header, draws))
}
