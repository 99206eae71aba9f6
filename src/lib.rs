//! Bayesian A/B testing on top of CmdStan.
//!
//! A model is chosen by likelihood name and a set of prior expressions,
//! rendered from a Stan template, compiled once per configuration
//! fingerprint and cached on disk. Two groups of observations are then
//! sampled with NUTS and the posterior is exposed as raw draws, a summary
//! table and chain-structured inference data.
//!
//! ```ignore
//! use abayes::{ABayes, SamplerOptions};
//!
//! let mut ab = ABayes::builder()
//!     .likelihood("bernoulli")
//!     .prior("mu", "normal(0, 1.5)")
//!     .seed(2024)
//!     .build()?;
//! ab.fit(
//!     abayes::GroupedInput::named("control", [0u8, 1, 1, 0, 1], "treatment", [1u8, 1, 1, 0, 1]),
//!     &SamplerOptions::default(),
//! )?;
//! println!("{}", ab.summary()?);
//! ```

pub mod abayes;
pub mod cache;
pub mod config;
pub mod data;
pub mod diagnostics;
pub mod error;
pub mod model;
pub mod stanrun;
pub mod templates;

pub use crate::abayes::{ABayes, ABayesBuilder, CompiledModel};
pub use cache::ArtifactCache;
pub use config::{SamplerOptions, Settings};
pub use data::{GroupedInput, StanData, TwoGroupData};
pub use diagnostics::{Draws, InferenceData, SummaryTable};
pub use error::{AbayesError, Result};
pub use model::{default_priors, Fingerprint, ModelConfig, Priors};
pub use stanrun::{CmdStan, SampleRequest, StanFit, Toolchain};
pub use templates::{Family, TemplateRegistry};
