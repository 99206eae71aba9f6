//! Error type shared by every stage of the A/B pipeline.

use std::path::PathBuf;

/// Errors raised while rendering, compiling, sampling or reading results.
#[derive(Debug, thiserror::Error)]
pub enum AbayesError {
    #[error(
        "Cannot build model for likelihood {likelihood:?}. Likelihoods available are [{}]",
        .available.join(", ")
    )]
    UnsupportedLikelihood {
        likelihood: String,
        available: Vec<String>,
    },

    #[error("Invalid A/B data: {0}")]
    InvalidData(String),

    #[error("The model has not been fit yet")]
    NotFit,

    #[error("Template error: {0}")]
    Template(#[from] minijinja::Error),

    #[error("cmdstan not found: {0}")]
    CmdStanNotFound(String),

    #[error("Stan compilation failed for {}:\n{stderr}", .model.display())]
    Compilation { model: PathBuf, stderr: String },

    #[error("Chain {chain} failed:\n{stderr}")]
    Sampling { chain: usize, stderr: String },

    #[error("Malformed CmdStan output {}: {message}", .path.display())]
    Output { path: PathBuf, message: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, AbayesError>;
