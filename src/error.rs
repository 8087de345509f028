// Error types shared by the tracker, the player and the backend client

use crate::downloads::{JobId, JobStatus};
use thiserror::Error;

/// Rejected locally before anything touches the network. Never retried.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    #[error("song '{song_id}' has no stream url")]
    MissingStreamUrl { song_id: String },
}

/// Failures talking to the backend API
#[derive(Error, Debug)]
pub enum ApiError {
    #[error("network error: {0}")]
    Network(#[from] reqwest::Error),

    #[error("server returned {status} for {endpoint}")]
    Status { status: u16, endpoint: String },

    #[error("could not decode response from {endpoint}: {message}")]
    Decode { endpoint: String, message: String },

    #[error("request to {0} timed out")]
    Timeout(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl ApiError {
    /// Connectivity problems and 5xx responses are worth retrying on the next tick.
    pub fn is_transient(&self) -> bool {
        match self {
            ApiError::Network(e) => !e.is_decode() && !e.is_builder(),
            ApiError::Timeout(_) => true,
            ApiError::Status { status, .. } => *status >= 500 || *status == 429,
            ApiError::Decode { .. } | ApiError::Io(_) => false,
        }
    }
}

#[derive(Error, Debug)]
pub enum SubmitError {
    #[error(transparent)]
    Invalid(#[from] ValidationError),

    #[error("download request failed: {0}")]
    Backend(#[from] ApiError),

    #[error("download tracker is no longer running")]
    TrackerClosed,
}

/// Server-side failure of a download job, read off its final record
#[derive(Error, Debug, Clone, PartialEq)]
#[error("download {job_id} ended with status {status}: {message}")]
pub struct UpstreamJobFailure {
    pub job_id: JobId,
    pub status: JobStatus,
    pub message: String,
}

#[cfg(feature = "favorites")]
#[derive(Error, Debug)]
pub enum FavoritesError {
    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("favorite {0} not found")]
    NotFound(i64),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}
