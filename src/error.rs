use std::path::PathBuf;

use thiserror::Error;

/// Failures the mirroring engine distinguishes between.
///
/// Asset-level failures never show up here: the asset resolver absorbs them and
/// substitutes a placeholder.
#[derive(Debug, Error)]
pub enum MirrorError {
    #[error("fetch page {url}: {source}")]
    PageFetch {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("fetch page {url}: HTTP {status}")]
    Http {
        url: String,
        status: reqwest::StatusCode,
    },

    #[error("invalid url {url}: {source}")]
    InvalidUrl {
        url: String,
        #[source]
        source: url::ParseError,
    },

    #[error("{0}")]
    ConfigurationConflict(String),

    #[error("persist {}: {source}", path.display())]
    Persistence {
        path: PathBuf,
        #[source]
        source: anyhow::Error,
    },

    #[error(
        "progress file is in use by another run (lock {}); delete the lock if no other run is active",
        path.display()
    )]
    ProgressLocked { path: PathBuf },

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl MirrorError {
    pub fn conflict<S: Into<String>>(message: S) -> Self {
        MirrorError::ConfigurationConflict(message.into())
    }
}
