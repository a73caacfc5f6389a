use std::path::PathBuf;

use thiserror::Error;

/// Fatal configuration problems, raised before any stage runs.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("global configuration not found at {0}")]
    MissingGlobal(PathBuf),
    #[error("failed to load global configuration from {path}: {source}")]
    Global {
        path: PathBuf,
        #[source]
        source: config::ConfigError,
    },
    #[error("target configuration not found at {0}")]
    MissingTarget(PathBuf),
    #[error("failed to read target configuration {path}: {source}")]
    ReadTarget {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("malformed target configuration {path}: {source}")]
    ParseTarget {
        path: PathBuf,
        #[source]
        source: serde_yaml::Error,
    },
    #[error("target identity must not be blank")]
    BlankTarget,
    #[error("target identity `{0}` must be a plain name without path separators")]
    UnsafeTarget(String),
    #[error("target `{target}` lists an empty domain entry")]
    BlankDomain { target: String },
}

/// Failure of one outbound lookup inside an enrichment stage.
#[derive(Debug, Error)]
pub enum LookupError {
    /// Transport failure or unexpected status; only this lookup is lost.
    #[error("{0}")]
    Transient(String),
    /// Provider asked us to back off; the stage stops issuing lookups.
    #[error("rate limited by provider (status {status})")]
    RateLimited { status: u16 },
}

impl From<reqwest::Error> for LookupError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            Self::Transient(format!("request timed out: {err}"))
        } else {
            Self::Transient(err.to_string())
        }
    }
}
