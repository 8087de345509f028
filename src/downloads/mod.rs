// Download tracking - mirrors server-side download jobs until they finish
// Submission goes through the tracker handle, status comes from polling

pub mod schedule; // repeating tick source for the poll loop
pub mod tracker;  // owns the job map and the poll loop

pub use schedule::{IntervalTicker, Ticker};
pub use tracker::{JobTracker, TrackerEvent, TrackerHandle, TrackerSnapshot};

use crate::error::UpstreamJobFailure;
use crate::song::Song;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Server-assigned job id, opaque to the client
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JobId(String);

impl JobId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Queued,
    Downloading,
    Completed,
    Failed,
    Error,
}

impl JobStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, JobStatus::Completed | JobStatus::Failed | JobStatus::Error)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            JobStatus::Queued => "queued",
            JobStatus::Downloading => "downloading",
            JobStatus::Completed => "completed",
            JobStatus::Failed => "failed",
            JobStatus::Error => "error",
        }
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Last known server view of a job. Replaced wholesale on every poll.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DownloadJob {
    pub status: JobStatus,
    #[serde(default)]
    pub progress: f32, // 0-100, mirrored as reported
    #[serde(default)]
    pub file: Option<String>,
    #[serde(default, rename = "error", alias = "errorMessage")]
    pub error_message: Option<String>,
}

impl DownloadJob {
    pub fn queued() -> Self {
        Self {
            status: JobStatus::Queued,
            progress: 0.0,
            file: None,
            error_message: None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    /// File name to fetch, only once the job completed
    pub fn completed_file(&self) -> Option<&str> {
        match self.status {
            JobStatus::Completed => self.file.as_deref(),
            _ => None,
        }
    }

    pub fn failure(&self, job_id: &JobId) -> Option<UpstreamJobFailure> {
        match self.status {
            JobStatus::Failed | JobStatus::Error => Some(UpstreamJobFailure {
                job_id: job_id.clone(),
                status: self.status,
                message: self
                    .error_message
                    .clone()
                    .unwrap_or_else(|| "no details from server".to_string()),
            }),
            _ => None,
        }
    }
}

/// Body of `POST /download`
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DownloadRequest {
    pub url: String,
    pub title: String,
    pub artist: String,
    pub thumbnail: String,
}

impl DownloadRequest {
    /// Only playable songs can be handed to the download backend.
    pub fn for_song(song: &Song) -> Result<Self, crate::error::ValidationError> {
        let url = song.require_stream_url()?;
        Ok(Self {
            url: url.to_string(),
            title: song.title.clone(),
            artist: song.artist.clone(),
            thumbnail: song.thumbnail_url.clone(),
        })
    }
}
