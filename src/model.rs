//! Model configuration and its cache fingerprint

use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::fmt;

use crate::templates::Family;

/// Prior expressions keyed by parameter name, kept sorted so that equal
/// maps always serialize (and therefore hash) identically.
pub type Priors = BTreeMap<String, String>;

pub const DEFAULT_LIKELIHOOD: &str = "normal";

/// `mu ~ normal(0, 1)`, `sigma ~ normal(0, 1)`
pub fn default_priors() -> Priors {
    let mut priors = Priors::new();
    priors.insert("mu".to_string(), "normal(0, 1)".to_string());
    priors.insert("sigma".to_string(), "normal(0, 1)".to_string());
    priors
}

/// Content-derived cache key of a [`ModelConfig`]
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Fingerprint(String);

impl Fingerprint {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Likelihood plus priors: everything that determines the generated Stan code.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModelConfig {
    likelihood: String,
    priors: Priors,
}

impl ModelConfig {
    pub fn new(likelihood: impl Into<String>, priors: Priors) -> Self {
        Self {
            likelihood: likelihood.into(),
            priors,
        }
    }

    pub fn likelihood(&self) -> &str {
        &self.likelihood
    }

    pub fn priors(&self) -> &Priors {
        &self.priors
    }

    pub fn family(&self) -> Family {
        Family::of(&self.likelihood)
    }

    /// SHA-256 over the JSON encoding of `(priors, likelihood)`.
    pub fn fingerprint(&self) -> Fingerprint {
        let payload = serde_json::to_vec(&(&self.priors, &self.likelihood))
            .expect("serializing string maps cannot fail");
        let digest = Sha256::digest(&payload);
        Fingerprint(hex::encode(digest))
    }
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self::new(DEFAULT_LIKELIHOOD, default_priors())
    }
}
