// Shared helpers: a stand-in for cmdstan that writes CmdStan-shaped CSVs.

#![allow(dead_code)]

use abayes::stanrun::{chain_file, executable_for};
use abayes::{AbayesError, ArtifactCache, SampleRequest, Toolchain};
use std::fs;
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tempfile::TempDir;

/// Counters shared between a test and the toolchain it hands to `ABayes`
#[derive(Debug, Clone, Default)]
pub struct Calls {
    pub compiles: Arc<AtomicUsize>,
    pub samples: Arc<AtomicUsize>,
    pub last_seed: Arc<Mutex<Option<u32>>>,
}

impl Calls {
    pub fn compiles(&self) -> usize {
        self.compiles.load(Ordering::SeqCst)
    }

    pub fn samples(&self) -> usize {
        self.samples.load(Ordering::SeqCst)
    }

    pub fn last_seed(&self) -> Option<u32> {
        *self.last_seed.lock().unwrap()
    }
}

/// Fake compiler/sampler. Draws are centred on each group's sample mean.
pub struct FakeCmdStan {
    pub likelihood: &'static str,
    pub calls: Calls,
    pub fail_sampling: bool,
}

impl FakeCmdStan {
    pub fn new(likelihood: &'static str, calls: &Calls) -> Self {
        Self {
            likelihood,
            calls: calls.clone(),
            fail_sampling: false,
        }
    }

    fn columns(&self) -> Vec<&'static str> {
        let mut columns = vec!["lp__", "accept_stat__", "divergent__", "mu.1", "mu.2"];
        match self.likelihood {
            "normal" => columns.extend(["sigma.1", "sigma.2", "mu_diff", "sigma_diff"]),
            "bernoulli" => columns.extend(["mu_diff", "mu_prob.1", "mu_prob.2", "mu_prob_diff"]),
            _ => columns.push("mu_diff"),
        }
        columns
    }
}

impl Toolchain for FakeCmdStan {
    fn compile(&self, stan_file: &std::path::Path) -> abayes::Result<PathBuf> {
        self.calls.compiles.fetch_add(1, Ordering::SeqCst);
        let exe = executable_for(stan_file);
        fs::write(&exe, b"#!/bin/sh\n")?;
        Ok(exe)
    }

    fn sample(&self, request: &SampleRequest<'_>) -> abayes::Result<Vec<PathBuf>> {
        self.calls.samples.fetch_add(1, Ordering::SeqCst);
        *self.calls.last_seed.lock().unwrap() = request.options.seed;

        if self.fail_sampling {
            return Err(AbayesError::Sampling {
                chain: 1,
                stderr: "Rejecting initial value".to_string(),
            });
        }

        let data: serde_json::Value =
            serde_json::from_str(&fs::read_to_string(request.data_file)?)?;
        let (mut mean1, mut mean2) = group_means(&data);
        if self.likelihood == "bernoulli" {
            mean1 = logit(mean1);
            mean2 = logit(mean2);
        }

        let mut files = Vec::new();
        for chain in 1..=request.options.num_chains {
            let mut state = request.options.seed.unwrap_or(0) as u64 * 7919 + chain as u64;
            let mut noise = move || {
                state = state
                    .wrapping_mul(6364136223846793005)
                    .wrapping_add(1442695040888963407);
                ((state >> 11) as f64 / (1u64 << 53) as f64 - 0.5) * 0.2
            };

            let mut csv = String::from("# model = fake\n");
            csv.push_str(&self.columns().join(","));
            csv.push('\n');
            csv.push_str("# Adaptation terminated\n");
            for _ in 0..request.options.num_samples {
                let (mu1, mu2) = (mean1 + noise(), mean2 + noise());
                let mut row = vec![-4.2, 0.9, 0.0, mu1, mu2];
                match self.likelihood {
                    "normal" => {
                        let (s1, s2) = (1.0 + noise(), 1.0 + noise());
                        row.extend([s1, s2, mu2 - mu1, s2 - s1]);
                    }
                    "bernoulli" => {
                        let (p1, p2) = (inv_logit(mu1), inv_logit(mu2));
                        row.extend([mu2 - mu1, p1, p2, p2 - p1]);
                    }
                    _ => row.push(mu2 - mu1),
                }
                let row: Vec<String> = row.iter().map(|v| v.to_string()).collect();
                csv.push_str(&row.join(","));
                csv.push('\n');
            }

            let path = chain_file(request.output_dir, chain);
            fs::write(&path, csv)?;
            files.push(path);
        }
        Ok(files)
    }
}

fn logit(p: f64) -> f64 {
    let p = p.clamp(0.01, 0.99);
    (p / (1.0 - p)).ln()
}

fn inv_logit(x: f64) -> f64 {
    1.0 / (1.0 + (-x).exp())
}

fn group_means(data: &serde_json::Value) -> (f64, f64) {
    let j = data["j"].as_array().cloned().unwrap_or_default();
    let y = data["y"].as_array().cloned().unwrap_or_default();
    let mut sums = [0.0, 0.0];
    let mut counts = [0.0f64, 0.0];
    for (g, v) in j.iter().zip(&y) {
        let idx = (g.as_u64().unwrap_or(1) - 1) as usize;
        sums[idx] += v.as_f64().unwrap_or(0.0);
        counts[idx] += 1.0;
    }
    (sums[0] / counts[0].max(1.0), sums[1] / counts[1].max(1.0))
}

pub fn temp_cache() -> (TempDir, ArtifactCache) {
    let temp = TempDir::new().unwrap();
    let cache = ArtifactCache::new(temp.path().join("cache")).unwrap();
    (temp, cache)
}
