use std::path::PathBuf;
use thiserror::Error;

use crate::feed::{DecodeError, EncodeError, ResolveError};
use crate::model::ValidationError;

/// Errors returned by [`FeedStore`](super::FeedStore) operations.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Reading, writing or renaming the feed file failed.
    #[error("Feed file I/O failed for '{path}': {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The persisted feed is not valid feed markup.
    #[error("Failed to parse feed file: {0}")]
    Parse(#[from] DecodeError),

    /// The feed could not be generated.
    #[error("Failed to generate feed: {0}")]
    Encode(#[from] EncodeError),

    /// The mutation was rejected before anything changed.
    #[error("Invalid change: {0}")]
    Validation(#[from] ValidationError),

    /// Relative references cannot be resolved against the configured base.
    #[error("Invalid base URL: {0}")]
    InvalidBaseUrl(#[source] ResolveError),

    /// No episode has the requested id.
    #[error("Episode not found: {0}")]
    NotFound(String),
}

impl StoreError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        StoreError::Io {
            path: path.into(),
            source,
        }
    }
}
