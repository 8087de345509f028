// Backend API seams - the tracker, resolver and CLI only see these traits
// so tests can drive them with in-memory fakes

pub mod http;

pub use http::HttpBackend;

use crate::downloads::{DownloadJob, DownloadRequest, JobId};
use crate::error::ApiError;
use crate::song::Song;
use async_trait::async_trait;

/// `POST /download` and `GET /status/{job_id}`
#[async_trait]
pub trait DownloadBackend: Send + Sync {
    async fn submit_download(&self, request: &DownloadRequest) -> Result<JobId, ApiError>;

    async fn job_status(&self, job_id: &JobId) -> Result<DownloadJob, ApiError>;
}

/// `GET /recommendations/{song_id}`
#[async_trait]
pub trait RecommendationSource: Send + Sync {
    async fn recommendations(&self, song_id: &str) -> Result<Vec<Song>, ApiError>;
}

/// Search and chart listings
#[async_trait]
pub trait Catalog: Send + Sync {
    async fn search(&self, query: &str) -> Result<Vec<Song>, ApiError>;

    async fn charts(&self, category: &str) -> Result<Vec<Song>, ApiError>;
}
