//! Views over a completed fit
//!
//! - [`Draws`]: posterior draws grouped by Stan variable
//! - [`InferenceData`]: per-chain traces of posterior elements and sampler statistics
//! - [`SummaryTable`]: posterior summary of selected variables

pub mod mcmc;

pub use mcmc::{ParamStats, HDI_PROB};

use crate::stanrun::StanFit;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Split a cmdstan column name (`mu.2`, `beta.1.3`) into variable name and
/// 1-based indices.
fn split_column(column: &str) -> (&str, Vec<usize>) {
    let mut parts = column.split('.');
    let base = parts.next().unwrap_or(column);
    let indices: Option<Vec<usize>> = parts.map(|p| p.parse().ok()).collect();
    match indices {
        Some(indices) => (base, indices),
        None => (column, Vec::new()),
    }
}

/// `mu.2` -> `mu[2]`
fn element_name(column: &str) -> String {
    let (base, indices) = split_column(column);
    if indices.is_empty() {
        base.to_string()
    } else {
        let idx: Vec<String> = indices.iter().map(|i| i.to_string()).collect();
        format!("{}[{}]", base, idx.join(","))
    }
}

fn is_sampler_column(column: &str) -> bool {
    column.ends_with("__")
}

/// One Stan variable across all draws
#[derive(Debug, Clone, PartialEq)]
pub struct StanVariable {
    pub name: String,
    /// Empty for scalars
    pub shape: Vec<usize>,
    /// draw -> elements, in cmdstan column order; chains concatenated
    pub draws: Vec<Vec<f64>>,
}

impl StanVariable {
    pub fn is_scalar(&self) -> bool {
        self.shape.is_empty()
    }

    /// Draws of a scalar variable, or of the first element otherwise.
    pub fn scalar_draws(&self) -> Vec<f64> {
        self.draws.iter().filter_map(|d| d.first().copied()).collect()
    }

    /// Draws of one element by position in the flattened layout.
    pub fn element(&self, idx: usize) -> Option<Vec<f64>> {
        self.draws.iter().map(|d| d.get(idx).copied()).collect()
    }
}

/// Posterior draws keyed by variable name
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Draws {
    variables: BTreeMap<String, StanVariable>,
}

impl Draws {
    pub fn from_fit(fit: &StanFit) -> Self {
        let mut columns_by_var: Vec<(String, Vec<(usize, Vec<usize>)>)> = Vec::new();
        for (col_idx, column) in fit.columns.iter().enumerate() {
            if is_sampler_column(column) {
                continue;
            }
            let (base, indices) = split_column(column);
            match columns_by_var.iter_mut().find(|(name, _)| name == base) {
                Some((_, cols)) => cols.push((col_idx, indices)),
                None => columns_by_var.push((base.to_string(), vec![(col_idx, indices)])),
            }
        }

        let mut variables = BTreeMap::new();
        for (name, cols) in columns_by_var {
            let rank = cols.iter().map(|(_, idx)| idx.len()).max().unwrap_or(0);
            let shape: Vec<usize> = (0..rank)
                .map(|d| {
                    cols.iter()
                        .filter_map(|(_, idx)| idx.get(d).copied())
                        .max()
                        .unwrap_or(0)
                })
                .collect();

            let draws: Vec<Vec<f64>> = fit
                .chains
                .iter()
                .flatten()
                .map(|row| cols.iter().map(|(col_idx, _)| row[*col_idx]).collect())
                .collect();

            variables.insert(name.clone(), StanVariable { name, shape, draws });
        }

        Self { variables }
    }

    pub fn get(&self, name: &str) -> Option<&StanVariable> {
        self.variables.get(name)
    }

    pub fn names(&self) -> Vec<&str> {
        self.variables.keys().map(String::as_str).collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = &StanVariable> {
        self.variables.values()
    }

    pub fn len(&self) -> usize {
        self.variables.len()
    }

    pub fn is_empty(&self) -> bool {
        self.variables.is_empty()
    }
}

/// Per-chain draws of one scalar element (`mu[1]`, `lp`)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Trace {
    pub name: String,
    pub variable: String,
    pub chains: Vec<Vec<f64>>,
}

/// Chain-structured posterior and sampler statistics
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InferenceData {
    pub num_chains: usize,
    pub draws_per_chain: usize,
    pub posterior: Vec<Trace>,
    pub sample_stats: Vec<Trace>,
}

impl InferenceData {
    pub fn from_fit(fit: &StanFit) -> Self {
        let mut posterior = Vec::new();
        let mut sample_stats = Vec::new();

        for (col_idx, column) in fit.columns.iter().enumerate() {
            let chains: Vec<Vec<f64>> = fit
                .chains
                .iter()
                .map(|chain| chain.iter().map(|row| row[col_idx]).collect())
                .collect();

            if is_sampler_column(column) {
                let name = column.trim_end_matches("__").to_string();
                sample_stats.push(Trace {
                    variable: name.clone(),
                    name,
                    chains,
                });
            } else {
                let (base, _) = split_column(column);
                posterior.push(Trace {
                    name: element_name(column),
                    variable: base.to_string(),
                    chains,
                });
            }
        }

        Self {
            num_chains: fit.num_chains(),
            draws_per_chain: fit.chains.first().map(|c| c.len()).unwrap_or(0),
            posterior,
            sample_stats,
        }
    }

    pub fn posterior(&self, name: &str) -> Option<&Trace> {
        self.posterior.iter().find(|t| t.name == name)
    }

    pub fn sample_stat(&self, name: &str) -> Option<&Trace> {
        self.sample_stats.iter().find(|t| t.name == name)
    }

    /// Number of divergent transitions over all chains
    pub fn num_divergent(&self) -> usize {
        self.sample_stat("divergent")
            .map(|t| t.chains.iter().flatten().filter(|&&v| v > 0.5).count())
            .unwrap_or(0)
    }

    /// Summarize every element of the named variables, in the order given.
    /// Names with no matching element are skipped.
    pub fn summary(&self, var_names: &[&str]) -> SummaryTable {
        let rows = var_names
            .iter()
            .flat_map(|var| self.posterior.iter().filter(move |t| t.variable == *var))
            .map(|trace| ParamStats::compute(&trace.name, &trace.chains))
            .collect();
        SummaryTable { rows }
    }
}

/// Posterior summary, one row per scalar element
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SummaryTable {
    pub rows: Vec<ParamStats>,
}

impl SummaryTable {
    pub fn row(&self, name: &str) -> Option<&ParamStats> {
        self.rows.iter().find(|r| r.name == name)
    }

    pub fn names(&self) -> Vec<&str> {
        self.rows.iter().map(|r| r.name.as_str()).collect()
    }

    /// Rows whose R-hat or bulk ESS suggest the chains have not mixed.
    pub fn convergence_warnings(&self) -> Vec<String> {
        let mut warnings = Vec::new();
        for row in &self.rows {
            if row.rhat > 1.01 {
                warnings.push(format!(
                    "{} has R-hat = {:.3} (should be < 1.01)",
                    row.name, row.rhat
                ));
            }
            if row.ess_bulk < 400.0 {
                warnings.push(format!(
                    "{} has low ESS = {:.0} (should be > 400)",
                    row.name, row.ess_bulk
                ));
            }
        }
        warnings
    }
}

impl fmt::Display for SummaryTable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let low = format!("hdi_{}%", ((1.0 - HDI_PROB) / 2.0 * 100.0).round());
        let high = format!("hdi_{}%", ((1.0 + HDI_PROB) / 2.0 * 100.0).round());
        writeln!(
            f,
            "{:<16} {:>9} {:>9} {:>9} {:>9} {:>10} {:>9} {:>9} {:>7}",
            "", "mean", "sd", low, high, "mcse_mean", "ess_bulk", "ess_tail", "r_hat"
        )?;
        for row in &self.rows {
            writeln!(
                f,
                "{:<16} {:>9.3} {:>9.3} {:>9.3} {:>9.3} {:>10.3} {:>9.0} {:>9.0} {:>7.2}",
                row.name,
                row.mean,
                row.sd,
                row.hdi_low,
                row.hdi_high,
                row.mcse_mean,
                row.ess_bulk,
                row.ess_tail,
                row.rhat
            )?;
        }
        Ok(())
    }
}
