//! Posterior summary statistics over multi-chain draws
//!
//! Draws are passed as `chain -> draw`. All chains are expected to have the
//! same length (cmdstan guarantees this for one run).

use serde::{Deserialize, Serialize};

/// Probability mass of the reported highest density interval
pub const HDI_PROB: f64 = 0.94;

/// Summary statistics for one scalar posterior element
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParamStats {
    pub name: String,
    pub mean: f64,
    pub sd: f64,
    pub hdi_low: f64,
    pub hdi_high: f64,
    pub mcse_mean: f64,
    pub ess_bulk: f64,
    pub ess_tail: f64,
    pub rhat: f64,
}

impl ParamStats {
    pub fn compute(name: &str, draws_per_chain: &[Vec<f64>]) -> Self {
        let flat: Vec<f64> = draws_per_chain.iter().flatten().copied().collect();
        let mean = compute_mean(&flat);
        let sd = compute_sd(&flat, mean);
        let (hdi_low, hdi_high) = compute_hdi(&flat, HDI_PROB);
        let split = split_chains(draws_per_chain);
        let ess_bulk = compute_ess(&split);
        let ess_tail = compute_ess_tail(&split, &flat);

        Self {
            name: name.to_string(),
            mean,
            sd,
            hdi_low,
            hdi_high,
            mcse_mean: sd / ess_bulk.sqrt(),
            ess_bulk,
            ess_tail,
            rhat: compute_rhat(&split),
        }
    }
}

pub fn compute_mean(draws: &[f64]) -> f64 {
    if draws.is_empty() {
        return f64::NAN;
    }
    draws.iter().sum::<f64>() / draws.len() as f64
}

pub fn compute_sd(draws: &[f64], mean: f64) -> f64 {
    if draws.len() < 2 {
        return f64::NAN;
    }
    let variance =
        draws.iter().map(|x| (x - mean).powi(2)).sum::<f64>() / (draws.len() - 1) as f64;
    variance.sqrt()
}

/// Narrowest interval containing `prob` of the draws.
pub fn compute_hdi(draws: &[f64], prob: f64) -> (f64, f64) {
    if draws.is_empty() {
        return (f64::NAN, f64::NAN);
    }
    let mut sorted = draws.to_vec();
    sorted.sort_by(|a, b| a.total_cmp(b));

    let n = sorted.len();
    let width = ((prob * n as f64).floor() as usize).min(n - 1);
    let (start, _) = (0..n - width)
        .map(|i| (i, sorted[i + width] - sorted[i]))
        .fold((0, f64::INFINITY), |best, cur| if cur.1 < best.1 { cur } else { best });
    (sorted[start], sorted[start + width])
}

/// Split every chain in half (dropping the middle draw of odd chains).
pub fn split_chains(draws_per_chain: &[Vec<f64>]) -> Vec<Vec<f64>> {
    let mut split = Vec::with_capacity(draws_per_chain.len() * 2);
    for chain in draws_per_chain {
        let half = chain.len() / 2;
        if half == 0 {
            split.push(chain.clone());
            continue;
        }
        split.push(chain[..half].to_vec());
        split.push(chain[chain.len() - half..].to_vec());
    }
    split
}

/// Potential scale reduction factor over the given chains.
pub fn compute_rhat(chains: &[Vec<f64>]) -> f64 {
    let n_chains = chains.len();
    if n_chains < 2 {
        return f64::NAN;
    }
    let n_draws = chains[0].len();
    if chains.iter().any(|c| c.len() != n_draws) || n_draws < 2 {
        return f64::NAN;
    }

    let chain_means: Vec<f64> = chains.iter().map(|c| compute_mean(c)).collect();
    let within_var = chains
        .iter()
        .zip(&chain_means)
        .map(|(c, m)| c.iter().map(|x| (x - m).powi(2)).sum::<f64>() / (c.len() - 1) as f64)
        .sum::<f64>()
        / n_chains as f64;

    if within_var <= 0.0 {
        return f64::NAN;
    }

    let grand_mean = compute_mean(&chain_means);
    let between_var = chain_means
        .iter()
        .map(|m| (m - grand_mean).powi(2))
        .sum::<f64>()
        * n_draws as f64
        / (n_chains - 1) as f64;

    let var_plus = ((n_draws - 1) as f64 * within_var + between_var) / n_draws as f64;
    (var_plus / within_var).sqrt()
}

/// Effective sample size from the multi-chain autocorrelation, truncated
/// with Geyer's initial monotone sequence.
pub fn compute_ess(chains: &[Vec<f64>]) -> f64 {
    let n_chains = chains.len();
    if n_chains == 0 {
        return f64::NAN;
    }
    let n = chains.iter().map(|c| c.len()).min().unwrap_or(0);
    if n < 4 {
        return f64::NAN;
    }
    let chains: Vec<&[f64]> = chains.iter().map(|c| &c[..n]).collect();

    let means: Vec<f64> = chains.iter().map(|c| compute_mean(c)).collect();
    let autocov = |c: usize, lag: usize| -> f64 {
        let chain = chains[c];
        let m = means[c];
        (0..n - lag)
            .map(|i| (chain[i] - m) * (chain[i + lag] - m))
            .sum::<f64>()
            / n as f64
    };

    let acov0: Vec<f64> = (0..n_chains).map(|c| autocov(c, 0)).collect();
    let within = acov0.iter().sum::<f64>() / n_chains as f64 * n as f64 / (n - 1) as f64;
    let mut var_plus = within * (n - 1) as f64 / n as f64;
    if n_chains > 1 {
        let grand = compute_mean(&means);
        var_plus += means.iter().map(|m| (m - grand).powi(2)).sum::<f64>()
            / (n_chains - 1) as f64;
    }
    if var_plus <= 0.0 {
        return f64::NAN;
    }

    let rho = |lag: usize| -> f64 {
        let mean_acov = (0..n_chains).map(|c| autocov(c, lag)).sum::<f64>() / n_chains as f64;
        1.0 - (within - mean_acov) / var_plus
    };

    let mut sum = 0.0;
    let mut prev_pair = f64::INFINITY;
    let mut lag = 0;
    while lag + 1 < n {
        let pair = rho(lag) + rho(lag + 1);
        if pair <= 0.0 {
            break;
        }
        let pair = pair.min(prev_pair);
        sum += pair;
        prev_pair = pair;
        lag += 2;
    }

    let total = (n_chains * n) as f64;
    let tau = (2.0 * sum - 1.0).max(1.0 / total.log10());
    total / tau
}

/// Minimum ESS of the 5% and 95% quantile indicators.
pub fn compute_ess_tail(chains: &[Vec<f64>], flat: &[f64]) -> f64 {
    let q05 = compute_quantile(flat, 0.05);
    let q95 = compute_quantile(flat, 0.95);
    let indicator = |q: f64| -> Vec<Vec<f64>> {
        chains
            .iter()
            .map(|c| c.iter().map(|&x| if x <= q { 1.0 } else { 0.0 }).collect())
            .collect()
    };
    let lower = compute_ess(&indicator(q05));
    let upper = compute_ess(&indicator(q95));
    lower.min(upper)
}

pub fn compute_quantile(draws: &[f64], prob: f64) -> f64 {
    if draws.is_empty() {
        return f64::NAN;
    }
    let mut sorted = draws.to_vec();
    sorted.sort_by(|a, b| a.total_cmp(b));
    let idx = (prob * (sorted.len() - 1) as f64).round() as usize;
    sorted[idx.min(sorted.len() - 1)]
}
