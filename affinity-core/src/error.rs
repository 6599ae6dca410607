//! Error types for affinity

use std::io;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("Data source error: {0}")]
    DataSource(String),

    #[error("Cannot cluster {training} training users into {clusters} clusters")]
    ClusteringPrecondition { training: usize, clusters: usize },

    #[error("Cache error: {0}")]
    Cache(String),

    #[error("Snapshot corruption: {0}")]
    Corruption(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Operation cancelled")]
    Cancelled,

    #[error("Internal error: {0}")]
    Internal(String),
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::Serialization(e.to_string())
    }
}

impl Error {
    /// Errors that abort a refresh cycle but leave the engine usable.
    pub fn is_recoverable(&self) -> bool {
        matches!(self, Error::DataSource(_) | Error::Cache(_) | Error::Io(_))
    }
}

pub type Result<T> = std::result::Result<T, Error>;
