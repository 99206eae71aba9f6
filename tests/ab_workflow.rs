// A/B workflow: construction, caching, fitting and result access, driven by
// a fake toolchain so no cmdstan installation is needed.

mod common;

use abayes::{
    default_priors, ABayes, AbayesError, GroupedInput, Priors, SamplerOptions, TemplateRegistry,
};
use common::{temp_cache, Calls, FakeCmdStan};
use serde_json::json;
use std::fs;

fn quick_options() -> SamplerOptions {
    SamplerOptions {
        num_chains: 2,
        num_samples: 200,
        ..Default::default()
    }
}

// =============================================================================
// Construction & caching
// =============================================================================

#[test]
fn test_second_construction_reuses_cached_executable() {
    let (_temp, cache) = temp_cache();
    let calls = Calls::default();

    let first = ABayes::builder()
        .likelihood("normal")
        .cache(cache.clone())
        .toolchain(FakeCmdStan::new("normal", &calls))
        .build()
        .unwrap();
    assert!(!first.model().reused());
    assert_eq!(calls.compiles(), 1);

    let source = first.model().source.clone().unwrap();
    let rendered = fs::read_to_string(&source).unwrap();
    assert!(rendered.contains("sigma ~ normal(0, 1);"));
    fs::write(&source, "// untouched on reuse\n").unwrap();

    let second = ABayes::builder()
        .likelihood("normal")
        .cache(cache.clone())
        .toolchain(FakeCmdStan::new("normal", &calls))
        .build()
        .unwrap();
    assert!(second.model().reused());
    assert_eq!(second.fingerprint(), first.fingerprint());
    assert_eq!(second.executable(), cache.lookup(first.fingerprint()).unwrap());
    assert_eq!(calls.compiles(), 1);
    assert_eq!(fs::read_to_string(&source).unwrap(), "// untouched on reuse\n");
}

#[test]
fn test_force_compile_rebuilds() {
    let (_temp, cache) = temp_cache();
    let calls = Calls::default();

    for force in [false, false, true] {
        ABayes::builder()
            .cache(cache.clone())
            .force_compile(force)
            .toolchain(FakeCmdStan::new("normal", &calls))
            .build()
            .unwrap();
    }
    assert_eq!(calls.compiles(), 2);
}

#[test]
fn test_new_priors_get_new_artifact() {
    let (_temp, cache) = temp_cache();
    let calls = Calls::default();

    let a = ABayes::builder()
        .cache(cache.clone())
        .toolchain(FakeCmdStan::new("normal", &calls))
        .build()
        .unwrap();
    let b = ABayes::builder()
        .prior("sigma", "exponential(1)")
        .cache(cache.clone())
        .toolchain(FakeCmdStan::new("normal", &calls))
        .build()
        .unwrap();

    assert_ne!(a.fingerprint(), b.fingerprint());
    assert_eq!(b.priors()["sigma"], "exponential(1)");
    assert_eq!(b.priors()["mu"], "normal(0, 1)");
    assert_eq!(calls.compiles(), 2);
    assert_eq!(cache.entries().unwrap().len(), 2);
}

#[test]
fn test_unsupported_likelihood_fails_construction() {
    let (_temp, cache) = temp_cache();
    let calls = Calls::default();

    let err = ABayes::builder()
        .likelihood("weibull")
        .cache(cache)
        .toolchain(FakeCmdStan::new("normal", &calls))
        .build()
        .unwrap_err();

    let msg = err.to_string();
    assert!(matches!(err, AbayesError::UnsupportedLikelihood { .. }));
    for name in ["bernoulli", "normal", "poisson"] {
        assert!(msg.contains(name), "{}", msg);
    }
    assert_eq!(calls.compiles(), 0);
}

#[test]
fn test_template_directory_extends_likelihoods() {
    let (temp, cache) = temp_cache();
    let calls = Calls::default();

    let dir = temp.path().join("templates");
    fs::create_dir_all(&dir).unwrap();
    let builtin = TemplateRegistry::builtin();
    fs::write(
        dir.join("base.stan"),
        include_str!("../src/templates/distributions/base.stan"),
    )
    .unwrap();
    fs::write(
        dir.join("normal.stan"),
        include_str!("../src/templates/distributions/normal.stan"),
    )
    .unwrap();
    fs::write(
        dir.join("lognormal.stan"),
        include_str!("../src/templates/distributions/normal.stan")
            .replace("y ~ normal(", "y ~ lognormal("),
    )
    .unwrap();

    let registry = TemplateRegistry::from_dir(&dir).unwrap();
    assert_eq!(registry.likelihoods(), vec!["lognormal", "normal"]);
    assert!(!builtin.likelihoods().contains(&"lognormal".to_string()));

    let ab = ABayes::builder()
        .likelihood("lognormal")
        .registry(registry)
        .cache(cache)
        .toolchain(FakeCmdStan::new("normal", &calls))
        .build()
        .unwrap();
    let source = fs::read_to_string(ab.model().source.as_ref().unwrap()).unwrap();
    assert!(source.contains("y ~ lognormal(mu[j], sigma[j]);"));
}

// =============================================================================
// Fitting & accessors
// =============================================================================

#[test]
fn test_accessors_require_fit() {
    let (_temp, cache) = temp_cache();
    let calls = Calls::default();
    let ab = ABayes::builder()
        .cache(cache)
        .toolchain(FakeCmdStan::new("normal", &calls))
        .build()
        .unwrap();

    assert!(ab.cmdstan_mcmc().is_none());
    assert!(matches!(ab.draws(), Err(AbayesError::NotFit)));
    assert!(matches!(ab.summary(), Err(AbayesError::NotFit)));
    assert!(matches!(ab.inference_data(), Err(AbayesError::NotFit)));
    assert_eq!(calls.samples(), 0);
}

#[test]
fn test_bernoulli_example() {
    let (temp, cache) = temp_cache();
    let calls = Calls::default();
    let mut ab = ABayes::builder()
        .likelihood("bernoulli")
        .cache(cache)
        .toolchain(FakeCmdStan::new("bernoulli", &calls))
        .build()
        .unwrap();

    let input = GroupedInput::from_json(&json!({
        "control": [0, 1, 1, 0, 1],
        "treatment": [1, 1, 1, 0, 1],
    }))
    .unwrap();
    let options = SamplerOptions {
        output_dir: Some(temp.path().join("run")),
        ..quick_options()
    };
    ab.fit(input, &options).unwrap();

    let data: serde_json::Value =
        serde_json::from_str(&fs::read_to_string(temp.path().join("run/data.json")).unwrap())
            .unwrap();
    assert_eq!(data["N"], json!(10));
    assert_eq!(data["j"], json!([1, 1, 1, 1, 1, 2, 2, 2, 2, 2]));
    assert_eq!(data["y"], json!([0, 1, 1, 0, 1, 1, 1, 1, 0, 1]));

    let summary = ab.summary().unwrap();
    assert_eq!(
        summary.names(),
        vec!["mu[1]", "mu[2]", "mu_diff", "mu_prob[1]", "mu_prob[2]", "mu_prob_diff"]
    );
    let diff = summary.row("mu_prob_diff").unwrap();
    assert!((diff.mean - 0.2).abs() < 0.05, "mean = {}", diff.mean);

    let fit = ab.cmdstan_mcmc().unwrap();
    assert_eq!(fit.num_chains(), 2);
    assert_eq!(fit.num_draws(), 400);
}

#[test]
fn test_normal_summary_and_draws() {
    let (_temp, cache) = temp_cache();
    let calls = Calls::default();
    let mut ab = ABayes::builder()
        .cache(cache)
        .toolchain(FakeCmdStan::new("normal", &calls))
        .build()
        .unwrap();

    ab.fit(
        GroupedInput::pair([9.8, 10.1, 10.4, 9.7], [11.0, 11.2, 10.8]),
        &quick_options(),
    )
    .unwrap();

    let summary = ab.summary().unwrap();
    assert!(summary.row("sigma[1]").is_some());
    assert!(summary.row("sigma_diff").is_some());
    assert!(summary.row("mu_prob_diff").is_none());

    let draws = ab.draws().unwrap();
    let mu = draws.get("mu").unwrap();
    assert_eq!(mu.shape, vec![2]);
    assert_eq!(mu.draws.len(), 400);
    let mu_diff = draws.get("mu_diff").unwrap().scalar_draws();
    let mean_diff = mu_diff.iter().sum::<f64>() / mu_diff.len() as f64;
    assert!((mean_diff - 1.0).abs() < 0.1, "mean diff = {}", mean_diff);

    let idata = ab.inference_data().unwrap();
    assert_eq!(idata.num_chains, 2);
    assert_eq!(idata.draws_per_chain, 200);
    assert!(idata.sample_stat("accept_stat").is_some());
}

#[test]
fn test_refit_replaces_result() {
    let (_temp, cache) = temp_cache();
    let calls = Calls::default();
    let mut ab = ABayes::builder()
        .cache(cache)
        .toolchain(FakeCmdStan::new("normal", &calls))
        .build()
        .unwrap();

    ab.fit((vec![1.0, 2.0], vec![3.0, 4.0]), &quick_options())
        .unwrap();
    let first_dir = ab.cmdstan_mcmc().unwrap().output_dir.clone();
    assert!(first_dir.exists());

    let options = SamplerOptions {
        num_chains: 3,
        ..quick_options()
    };
    ab.fit((vec![1.0, 2.0], vec![3.0, 4.0]), &options).unwrap();

    assert_eq!(ab.cmdstan_mcmc().unwrap().num_chains(), 3);
    assert_eq!(calls.samples(), 2);
    // the first fit's scratch directory went with it
    assert!(!first_dir.exists());
}

#[test]
fn test_seed_precedence() {
    let (_temp, cache) = temp_cache();
    let calls = Calls::default();
    let mut ab = ABayes::builder()
        .seed(11)
        .cache(cache)
        .toolchain(FakeCmdStan::new("normal", &calls))
        .build()
        .unwrap();
    assert_eq!(ab.seed(), Some(11));

    ab.fit((vec![1.0], vec![2.0]), &quick_options()).unwrap();
    assert_eq!(calls.last_seed(), Some(11));

    let options = SamplerOptions {
        seed: Some(99),
        ..quick_options()
    };
    ab.fit((vec![1.0], vec![2.0]), &options).unwrap();
    assert_eq!(calls.last_seed(), Some(99));
}

#[test]
fn test_invalid_data_is_rejected_before_sampling() {
    let (_temp, cache) = temp_cache();
    let calls = Calls::default();
    let mut ab = ABayes::builder()
        .likelihood("bernoulli")
        .cache(cache)
        .toolchain(FakeCmdStan::new("bernoulli", &calls))
        .build()
        .unwrap();

    let err = ab
        .fit(GroupedInput::pair([0.0, 2.0], [1.0]), &quick_options())
        .unwrap_err();
    assert!(matches!(err, AbayesError::InvalidData(_)));

    assert!(GroupedInput::from_json(&json!(42)).is_err());
    assert_eq!(calls.samples(), 0);
    assert!(ab.cmdstan_mcmc().is_none());
}

#[test]
fn test_sampler_failure_propagates() {
    let (_temp, cache) = temp_cache();
    let calls = Calls::default();
    let mut fake = FakeCmdStan::new("normal", &calls);
    fake.fail_sampling = true;

    let mut ab = ABayes::builder()
        .cache(cache)
        .toolchain(fake)
        .build()
        .unwrap();
    let err = ab
        .fit((vec![1.0], vec![2.0]), &quick_options())
        .unwrap_err();
    match err {
        AbayesError::Sampling { chain, stderr } => {
            assert_eq!(chain, 1);
            assert_eq!(stderr, "Rejecting initial value");
        }
        other => panic!("unexpected error: {other:?}"),
    }
    assert!(matches!(ab.summary(), Err(AbayesError::NotFit)));
}

#[test]
fn test_default_configuration() {
    let (_temp, cache) = temp_cache();
    let calls = Calls::default();
    let ab = ABayes::builder()
        .cache(cache)
        .toolchain(FakeCmdStan::new("normal", &calls))
        .build()
        .unwrap();
    let expected: Priors = default_priors();
    assert_eq!(ab.likelihood(), "normal");
    assert_eq!(ab.priors(), &expected);
}
