//! Stan model templates keyed by likelihood name
//!
//! Every likelihood is a MiniJinja template extending the shared
//! `base.stan` layout. Priors are substituted into `{{ priors.<param> }}`
//! slots; the expressions themselves are passed through untouched and only
//! checked by stanc when the model is compiled.

use crate::error::{AbayesError, Result};
use crate::model::Priors;
use minijinja::{context, Environment, UndefinedBehavior};
use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

/// Name of the shared layout every likelihood template extends.
pub const BASE_TEMPLATE: &str = "base.stan";

const BUILTIN: &[(&str, &str)] = &[
    (BASE_TEMPLATE, include_str!("distributions/base.stan")),
    ("bernoulli", include_str!("distributions/bernoulli.stan")),
    ("normal", include_str!("distributions/normal.stan")),
    ("poisson", include_str!("distributions/poisson.stan")),
];

/// Broad class of a likelihood, deciding data encoding and summary variables.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Family {
    /// Real-valued outcomes with a location and a dispersion per group
    Continuous,
    /// 0/1 outcomes, `mu` on the logit scale
    Binary,
    /// Non-negative counts, `mu` on the log scale
    Count,
    /// Any template the crate has no special knowledge of
    Other,
}

impl Family {
    /// Classify a likelihood by name. Besides the built-in templates this
    /// knows the continuous families a template directory commonly adds
    /// (`student_t`, `lognormal`), so their summaries include `sigma`.
    pub fn of(likelihood: &str) -> Self {
        match likelihood.to_lowercase().as_str() {
            "normal" | "student_t" | "lognormal" => Family::Continuous,
            "bernoulli" => Family::Binary,
            "poisson" => Family::Count,
            _ => Family::Other,
        }
    }

    /// Whether observations must be emitted as Stan integers
    pub fn is_discrete(self) -> bool {
        matches!(self, Family::Binary | Family::Count)
    }

    /// Variables reported by the posterior summary for this family.
    pub fn summary_variables(self) -> Vec<&'static str> {
        let mut variables = vec!["mu", "mu_diff"];
        match self {
            Family::Continuous => variables.extend(["sigma", "sigma_diff"]),
            Family::Binary => variables.extend(["mu_prob", "mu_prob_diff"]),
            Family::Count => variables.extend(["mu_rate", "mu_rate_diff"]),
            Family::Other => {}
        }
        variables
    }
}

/// Registry of likelihood templates, validated once at construction.
#[derive(Debug, Clone)]
pub struct TemplateRegistry {
    base: String,
    likelihoods: BTreeMap<String, String>,
}

impl TemplateRegistry {
    /// Templates shipped with the crate.
    pub fn builtin() -> Self {
        let mut base = String::new();
        let mut likelihoods = BTreeMap::new();
        for (name, source) in BUILTIN {
            if *name == BASE_TEMPLATE {
                base = source.to_string();
            } else {
                likelihoods.insert(name.to_string(), source.to_string());
            }
        }
        Self { base, likelihoods }
    }

    /// Load every `*.stan` file in `dir`. Each file other than `base.stan`
    /// registers a likelihood named after its file stem.
    pub fn from_dir(dir: &Path) -> Result<Self> {
        let mut base = None;
        let mut likelihoods = BTreeMap::new();

        for entry in fs::read_dir(dir)? {
            let path = entry?.path();
            if path.extension().and_then(|s| s.to_str()) != Some("stan") {
                continue;
            }
            let source = fs::read_to_string(&path)?;
            if path.file_name().and_then(|s| s.to_str()) == Some(BASE_TEMPLATE) {
                base = Some(source);
            } else if let Some(stem) = path.file_stem().and_then(|s| s.to_str()) {
                likelihoods.insert(stem.to_lowercase(), source);
            }
        }

        let registry = Self {
            base: base.unwrap_or_default(),
            likelihoods,
        };
        registry.validate()?;
        tracing::debug!(
            dir = %dir.display(),
            likelihoods = ?registry.likelihoods(),
            "loaded model templates"
        );
        Ok(registry)
    }

    /// Supported likelihood names, sorted.
    pub fn likelihoods(&self) -> Vec<String> {
        self.likelihoods.keys().cloned().collect()
    }

    pub fn contains(&self, likelihood: &str) -> bool {
        self.likelihoods.contains_key(&likelihood.to_lowercase())
    }

    /// Render the model for `likelihood` with the given priors.
    pub fn render(&self, likelihood: &str, priors: &Priors) -> Result<String> {
        if !self.contains(likelihood) {
            return Err(AbayesError::UnsupportedLikelihood {
                likelihood: likelihood.to_string(),
                available: self.likelihoods(),
            });
        }

        let env = self.environment()?;
        let template = env.get_template(&likelihood.to_lowercase())?;
        let rendered = template.render(context! { priors => priors })?;
        Ok(rendered)
    }

    fn validate(&self) -> Result<()> {
        self.environment().map(|_| ())
    }

    fn environment(&self) -> Result<Environment<'_>> {
        let mut env = Environment::new();
        env.set_trim_blocks(true);
        env.set_lstrip_blocks(true);
        env.set_keep_trailing_newline(true);
        env.set_undefined_behavior(UndefinedBehavior::Strict);
        if !self.base.is_empty() {
            env.add_template(BASE_TEMPLATE, &self.base)?;
        }
        for (name, source) in &self.likelihoods {
            env.add_template(name, source)?;
        }
        Ok(env)
    }
}

impl Default for TemplateRegistry {
    fn default() -> Self {
        Self::builtin()
    }
}
