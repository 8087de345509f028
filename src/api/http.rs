use super::{Catalog, DownloadBackend, RecommendationSource};
use crate::config::ApiConfig;
use crate::downloads::{DownloadJob, DownloadRequest, JobId};
use crate::error::ApiError;
use crate::song::Song;
use async_trait::async_trait;
use futures::StreamExt;
use reqwest::{Client, Response};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::fs::File;
use tokio::io::AsyncWriteExt;
use tracing::{debug, info};

#[derive(Debug, Deserialize)]
struct SubmitResponse {
    #[serde(alias = "jobId")]
    job_id: JobId,
}

/// reqwest-backed client for the streaming backend
#[derive(Debug, Clone)]
pub struct HttpBackend {
    client: Client,
    base_url: String,
}

impl HttpBackend {
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Result<Self, ApiError> {
        let client = Client::builder()
            .timeout(timeout)
            .user_agent(concat!("tunelink/", env!("CARGO_PKG_VERSION")))
            .build()?;

        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        })
    }

    pub fn from_config(config: &ApiConfig) -> Result<Self, ApiError> {
        Self::new(&config.base_url, config.request_timeout())
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn url(&self, endpoint: &str) -> String {
        format!("{}{}", self.base_url, endpoint)
    }

    async fn send(&self, endpoint: &str, request: reqwest::RequestBuilder) -> Result<Response, ApiError> {
        let response = request.send().await.map_err(|e| classify(endpoint, e))?;
        let status = response.status();
        if !status.is_success() {
            return Err(ApiError::Status {
                status: status.as_u16(),
                endpoint: endpoint.to_string(),
            });
        }
        Ok(response)
    }

    async fn get_json<T: DeserializeOwned>(
        &self,
        endpoint: &str,
        query: &[(&str, &str)],
    ) -> Result<T, ApiError> {
        debug!("GET {}", endpoint);
        let request = self.client.get(self.url(endpoint)).query(query);
        let response = self.send(endpoint, request).await?;
        decode(endpoint, response).await
    }

    /// Streams a completed download (`GET /files/{filename}`) into `dest_dir`.
    /// The body lands in a `.part` file first, so a failed transfer never
    /// leaves a truncated file under the final name. Returns the path written.
    pub async fn fetch_file(&self, filename: &str, dest_dir: &Path) -> Result<PathBuf, ApiError> {
        let endpoint = format!("/files/{}", filename);
        let response = self.send(&endpoint, self.client.get(self.url(&endpoint))).await?;

        tokio::fs::create_dir_all(dest_dir).await?;
        let local_name = Path::new(filename)
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "download.bin".to_string());
        let path = dest_dir.join(&local_name);
        let partial = dest_dir.join(format!("{}.part", local_name));

        let written = match write_body(&endpoint, response, &partial).await {
            Ok(written) => written,
            Err(e) => {
                let _ = tokio::fs::remove_file(&partial).await;
                return Err(e);
            }
        };
        tokio::fs::rename(&partial, &path).await?;

        info!("Saved {} ({} bytes) to {}", filename, written, path.display());
        Ok(path)
    }
}

async fn write_body(endpoint: &str, response: Response, path: &Path) -> Result<u64, ApiError> {
    let mut file = File::create(path).await?;
    let mut body = response.bytes_stream();
    let mut written = 0u64;
    while let Some(chunk) = body.next().await {
        let chunk = chunk.map_err(|e| classify(endpoint, e))?;
        file.write_all(&chunk).await?;
        written += chunk.len() as u64;
    }
    file.flush().await?;
    Ok(written)
}

fn classify(endpoint: &str, err: reqwest::Error) -> ApiError {
    if err.is_timeout() {
        ApiError::Timeout(endpoint.to_string())
    } else {
        ApiError::Network(err)
    }
}

async fn decode<T: DeserializeOwned>(endpoint: &str, response: Response) -> Result<T, ApiError> {
    let body = response.bytes().await.map_err(|e| classify(endpoint, e))?;
    serde_json::from_slice(&body).map_err(|e| ApiError::Decode {
        endpoint: endpoint.to_string(),
        message: e.to_string(),
    })
}

#[async_trait]
impl DownloadBackend for HttpBackend {
    async fn submit_download(&self, request: &DownloadRequest) -> Result<JobId, ApiError> {
        let endpoint = "/download";
        debug!("POST {} for '{}'", endpoint, request.title);
        let response = self
            .send(endpoint, self.client.post(self.url(endpoint)).json(request))
            .await?;
        let body: SubmitResponse = decode(endpoint, response).await?;
        Ok(body.job_id)
    }

    async fn job_status(&self, job_id: &JobId) -> Result<DownloadJob, ApiError> {
        self.get_json(&format!("/status/{}", job_id), &[]).await
    }
}

#[async_trait]
impl RecommendationSource for HttpBackend {
    async fn recommendations(&self, song_id: &str) -> Result<Vec<Song>, ApiError> {
        self.get_json(&format!("/recommendations/{}", song_id), &[]).await
    }
}

#[async_trait]
impl Catalog for HttpBackend {
    async fn search(&self, query: &str) -> Result<Vec<Song>, ApiError> {
        self.get_json("/search", &[("query", query)]).await
    }

    async fn charts(&self, category: &str) -> Result<Vec<Song>, ApiError> {
        self.get_json("/charts", &[("category", category)]).await
    }
}
