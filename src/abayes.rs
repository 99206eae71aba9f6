//! The two-group Bayesian A/B test

use crate::cache::ArtifactCache;
use crate::config::{SamplerOptions, Settings};
use crate::data::GroupedInput;
use crate::diagnostics::{Draws, InferenceData, SummaryTable};
use crate::error::{AbayesError, Result};
use crate::model::{default_priors, Fingerprint, ModelConfig, Priors, DEFAULT_LIKELIHOOD};
use crate::stanrun::{CmdStan, SampleRequest, StanFit, Toolchain};
use crate::templates::TemplateRegistry;
use std::path::{Path, PathBuf};

/// File name of the Stan data record inside a fit's output directory
pub const DATA_FILE: &str = "data.json";

/// How the model executable was obtained
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompiledModel {
    pub fingerprint: Fingerprint,
    pub executable: PathBuf,
    /// Rendered source; `None` when a cached executable was reused
    pub source: Option<PathBuf>,
}

impl CompiledModel {
    pub fn reused(&self) -> bool {
        self.source.is_none()
    }
}

/// A compiled A/B model and, after [`ABayes::fit`], its latest fit.
pub struct ABayes {
    config: ModelConfig,
    seed: Option<u32>,
    model: CompiledModel,
    toolchain: Box<dyn Toolchain>,
    fit: Option<StanFit>,
}

impl std::fmt::Debug for ABayes {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ABayes")
            .field("config", &self.config)
            .field("seed", &self.seed)
            .field("model", &self.model)
            .field("fitted", &self.fit.is_some())
            .finish()
    }
}

impl ABayes {
    pub fn builder() -> ABayesBuilder {
        ABayesBuilder::default()
    }

    /// Build with default settings (environment-resolved cache, embedded
    /// templates, auto-detected cmdstan).
    pub fn new(likelihood: &str, priors: Priors) -> Result<Self> {
        Self::builder().likelihood(likelihood).priors(priors).build()
    }

    pub fn likelihood(&self) -> &str {
        self.config.likelihood()
    }

    pub fn priors(&self) -> &Priors {
        self.config.priors()
    }

    pub fn config(&self) -> &ModelConfig {
        &self.config
    }

    pub fn seed(&self) -> Option<u32> {
        self.seed
    }

    pub fn model(&self) -> &CompiledModel {
        &self.model
    }

    pub fn fingerprint(&self) -> &Fingerprint {
        &self.model.fingerprint
    }

    pub fn executable(&self) -> &Path {
        &self.model.executable
    }

    /// Raw sampler result of the latest fit.
    pub fn cmdstan_mcmc(&self) -> Option<&StanFit> {
        self.fit.as_ref()
    }

    /// Sample the posterior for two groups of observations, replacing any
    /// previous fit.
    pub fn fit(
        &mut self,
        data: impl Into<GroupedInput>,
        options: &SamplerOptions,
    ) -> Result<&mut Self> {
        options.validate()?;
        let data = data.into().normalize()?;
        let stan_data = data.to_stan_data(self.config.family())?;

        let (output_dir, scratch) = match &options.output_dir {
            Some(dir) => {
                std::fs::create_dir_all(dir)?;
                (dir.clone(), None)
            }
            None => {
                let scratch = tempfile::Builder::new()
                    .prefix(&format!("abayes-{}-", &self.model.fingerprint.as_str()[..12]))
                    .tempdir()?;
                (scratch.path().to_path_buf(), Some(scratch))
            }
        };

        let data_file = output_dir.join(DATA_FILE);
        stan_data.write_json(&data_file)?;

        let mut options = options.clone();
        if options.seed.is_none() {
            options.seed = self.seed;
        }

        tracing::info!(
            likelihood = self.likelihood(),
            groups = ?data.labels,
            n = stan_data.n,
            chains = options.num_chains,
            "fitting A/B model"
        );

        let request = SampleRequest {
            executable: &self.model.executable,
            data_file: &data_file,
            output_dir: &output_dir,
            options: &options,
        };
        let chain_files = self.toolchain.sample(&request)?;
        let fit = StanFit::from_chain_files(&output_dir, chain_files)?.with_scratch(scratch);

        tracing::debug!(draws = fit.num_draws(), dir = %output_dir.display(), "fit stored");
        self.fit = Some(fit);
        Ok(self)
    }

    fn fitted(&self) -> Result<&StanFit> {
        self.fit.as_ref().ok_or(AbayesError::NotFit)
    }

    /// Posterior draws per Stan variable.
    pub fn draws(&self) -> Result<Draws> {
        Ok(Draws::from_fit(self.fitted()?))
    }

    /// Chain-structured traces for convergence checks.
    pub fn inference_data(&self) -> Result<InferenceData> {
        Ok(InferenceData::from_fit(self.fitted()?))
    }

    /// Summary of the group parameters and their differences.
    pub fn summary(&self) -> Result<SummaryTable> {
        let variables = self.config.family().summary_variables();
        Ok(self.inference_data()?.summary(&variables))
    }
}

/// Builder for [`ABayes`]; every field has a default.
#[derive(Default)]
pub struct ABayesBuilder {
    likelihood: Option<String>,
    priors: Option<Priors>,
    seed: Option<u32>,
    force_compile: bool,
    settings: Option<Settings>,
    cache: Option<ArtifactCache>,
    registry: Option<TemplateRegistry>,
    toolchain: Option<Box<dyn Toolchain>>,
}

impl ABayesBuilder {
    pub fn likelihood(mut self, likelihood: impl Into<String>) -> Self {
        self.likelihood = Some(likelihood.into());
        self
    }

    pub fn priors(mut self, priors: Priors) -> Self {
        self.priors = Some(priors);
        self
    }

    /// Set one prior, starting from the defaults if none were given.
    pub fn prior(mut self, param: impl Into<String>, expr: impl Into<String>) -> Self {
        self.priors
            .get_or_insert_with(default_priors)
            .insert(param.into(), expr.into());
        self
    }

    pub fn seed(mut self, seed: u32) -> Self {
        self.seed = Some(seed);
        self
    }

    /// Render and compile even if a cached executable exists.
    pub fn force_compile(mut self, force: bool) -> Self {
        self.force_compile = force;
        self
    }

    pub fn settings(mut self, settings: Settings) -> Self {
        self.settings = Some(settings);
        self
    }

    pub fn cache(mut self, cache: ArtifactCache) -> Self {
        self.cache = Some(cache);
        self
    }

    pub fn registry(mut self, registry: TemplateRegistry) -> Self {
        self.registry = Some(registry);
        self
    }

    pub fn toolchain(mut self, toolchain: impl Toolchain + 'static) -> Self {
        self.toolchain = Some(Box::new(toolchain));
        self
    }

    /// Resolve the model executable (cached or freshly compiled).
    pub fn build(self) -> Result<ABayes> {
        let settings = match self.settings {
            Some(settings) => settings,
            None => Settings::from_env(),
        };
        let config = ModelConfig::new(
            self.likelihood
                .unwrap_or_else(|| DEFAULT_LIKELIHOOD.to_string()),
            self.priors.unwrap_or_else(default_priors),
        );
        let cache = match self.cache {
            Some(cache) => cache,
            None => ArtifactCache::new(settings.resolved_cache_dir()?)?,
        };
        let toolchain: Box<dyn Toolchain> = match self.toolchain {
            Some(toolchain) => toolchain,
            None => Box::new(CmdStan::locate(settings.cmdstan.as_deref())?),
        };

        let fingerprint = config.fingerprint();
        let model = match cache.lookup(&fingerprint) {
            Some(executable) if !self.force_compile => {
                tracing::info!(%fingerprint, "reusing cached model");
                CompiledModel {
                    fingerprint,
                    executable,
                    source: None,
                }
            }
            _ => {
                let registry = match self.registry {
                    Some(registry) => registry,
                    None => match &settings.template_dir {
                        Some(dir) => TemplateRegistry::from_dir(dir)?,
                        None => TemplateRegistry::builtin(),
                    },
                };
                let code = registry.render(config.likelihood(), config.priors())?;
                cache.invalidate(&fingerprint)?;
                let source = cache.write_source(&fingerprint, &code)?;
                tracing::info!(%fingerprint, likelihood = config.likelihood(), "compiling model");
                let executable = toolchain.compile(&source)?;
                CompiledModel {
                    fingerprint,
                    executable,
                    source: Some(source),
                }
            }
        };

        Ok(ABayes {
            config,
            seed: self.seed,
            model,
            toolchain,
            fit: None,
        })
    }
}
