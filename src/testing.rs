// In-memory fakes shared by the unit tests

use crate::api::{DownloadBackend, RecommendationSource};
use crate::downloads::{DownloadJob, DownloadRequest, JobId, JobStatus, Ticker};
use crate::error::ApiError;
use crate::playback::{Epoch, MediaSource};
use crate::song::{Song, SongSource, UnplayableReason};
use async_trait::async_trait;
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc;

pub fn song(id: &str, title: &str) -> Song {
    Song {
        id: id.to_string(),
        title: title.to_string(),
        artist: "Test Artist".to_string(),
        album: String::new(),
        thumbnail_url: format!("http://img/{id}.jpg"),
        duration_label: None,
        source: SongSource::Playable {
            stream_url: format!("http://cdn/{id}.mp4"),
        },
    }
}

pub fn unplayable_song(id: &str, title: &str) -> Song {
    Song {
        source: SongSource::Unplayable {
            reason: UnplayableReason::NoStreamUrl,
        },
        ..song(id, title)
    }
}

pub fn song_with_length(id: &str, title: &str, label: &str) -> Song {
    Song {
        duration_label: Some(label.to_string()),
        ..song(id, title)
    }
}

pub fn job(status: JobStatus, progress: f32) -> DownloadJob {
    DownloadJob {
        status,
        progress,
        file: None,
        error_message: None,
    }
}

#[derive(Default)]
struct FakeState {
    submissions: Vec<DownloadRequest>,
    scripts: HashMap<JobId, VecDeque<Option<DownloadJob>>>,
    status_delays: HashMap<JobId, Duration>,
    status_calls: HashMap<JobId, usize>,
    recommendations: HashMap<String, Vec<Song>>,
    failing_recommendations: Vec<String>,
    recommendation_delay: Option<Duration>,
    recommendation_calls: usize,
}

/// Scripted stand-in for the HTTP backend
#[derive(Default)]
pub struct FakeBackend {
    state: Mutex<FakeState>,
}

impl FakeBackend {
    /// Responses for successive status polls. The last entry repeats;
    /// `None` answers with a 503.
    pub fn script(&self, job_id: &JobId, responses: Vec<Option<DownloadJob>>) {
        let mut state = self.state.lock().unwrap();
        state.scripts.insert(job_id.clone(), responses.into());
    }

    pub fn delay_status(&self, job_id: &JobId, delay: Duration) {
        let mut state = self.state.lock().unwrap();
        state.status_delays.insert(job_id.clone(), delay);
    }

    pub fn status_calls(&self, job_id: &JobId) -> usize {
        let state = self.state.lock().unwrap();
        state.status_calls.get(job_id).copied().unwrap_or(0)
    }

    pub fn total_status_calls(&self) -> usize {
        let state = self.state.lock().unwrap();
        state.status_calls.values().sum()
    }

    pub fn submissions(&self) -> Vec<DownloadRequest> {
        self.state.lock().unwrap().submissions.clone()
    }

    pub fn recommend(&self, song_id: &str, songs: Vec<Song>) {
        let mut state = self.state.lock().unwrap();
        state.recommendations.insert(song_id.to_string(), songs);
    }

    pub fn fail_recommendations(&self, song_id: &str) {
        let mut state = self.state.lock().unwrap();
        state.failing_recommendations.push(song_id.to_string());
    }

    pub fn delay_recommendations(&self, delay: Duration) {
        self.state.lock().unwrap().recommendation_delay = Some(delay);
    }

    pub fn recommendation_calls(&self) -> usize {
        self.state.lock().unwrap().recommendation_calls
    }
}

#[async_trait]
impl DownloadBackend for FakeBackend {
    async fn submit_download(&self, request: &DownloadRequest) -> Result<JobId, ApiError> {
        let mut state = self.state.lock().unwrap();
        state.submissions.push(request.clone());
        Ok(JobId::new(format!("job-{}", state.submissions.len())))
    }

    async fn job_status(&self, job_id: &JobId) -> Result<DownloadJob, ApiError> {
        let (delay, response) = {
            let mut state = self.state.lock().unwrap();
            *state.status_calls.entry(job_id.clone()).or_default() += 1;
            let delay = state.status_delays.get(job_id).copied();
            let response = state.scripts.get_mut(job_id).map(|script| {
                if script.len() > 1 {
                    script.pop_front().flatten()
                } else {
                    script.front().cloned().flatten()
                }
            });
            (delay, response)
        };

        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        match response {
            Some(Some(job)) => Ok(job),
            Some(None) => Err(ApiError::Status {
                status: 503,
                endpoint: format!("/status/{job_id}"),
            }),
            None => Err(ApiError::Status {
                status: 404,
                endpoint: format!("/status/{job_id}"),
            }),
        }
    }
}

#[async_trait]
impl RecommendationSource for FakeBackend {
    async fn recommendations(&self, song_id: &str) -> Result<Vec<Song>, ApiError> {
        let (delay, result) = {
            let mut state = self.state.lock().unwrap();
            state.recommendation_calls += 1;
            let result = if state.failing_recommendations.iter().any(|id| id == song_id) {
                Err(ApiError::Timeout(format!("/recommendations/{song_id}")))
            } else {
                Ok(state.recommendations.get(song_id).cloned().unwrap_or_default())
            };
            (state.recommendation_delay, result)
        };

        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        result
    }
}

/// Ticker driven by hand through the returned sender
pub struct ManualTicker {
    ticks: mpsc::UnboundedReceiver<()>,
}

impl ManualTicker {
    pub fn new() -> (Self, mpsc::UnboundedSender<()>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { ticks: rx }, tx)
    }
}

#[async_trait]
impl Ticker for ManualTicker {
    async fn tick(&mut self) {
        if self.ticks.recv().await.is_none() {
            std::future::pending::<()>().await;
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum MediaCall {
    Open(Epoch, String),
    Play,
    Pause,
    Seek(f64),
    Volume(f32),
    Rate(f32),
}

/// Media source that only records what it was told
#[derive(Clone, Default)]
pub struct RecordingMedia {
    calls: Arc<Mutex<Vec<MediaCall>>>,
}

impl RecordingMedia {
    pub fn calls(&self) -> Vec<MediaCall> {
        self.calls.lock().unwrap().clone()
    }

    fn record(&self, call: MediaCall) {
        self.calls.lock().unwrap().push(call);
    }
}

impl MediaSource for RecordingMedia {
    fn open(&mut self, epoch: Epoch, song: &Song) {
        self.record(MediaCall::Open(epoch, song.id.clone()));
    }

    fn play(&mut self) {
        self.record(MediaCall::Play);
    }

    fn pause(&mut self) {
        self.record(MediaCall::Pause);
    }

    fn seek(&mut self, secs: f64) {
        self.record(MediaCall::Seek(secs));
    }

    fn set_volume(&mut self, volume: f32) {
        self.record(MediaCall::Volume(volume));
    }

    fn set_rate(&mut self, rate: f32) {
        self.record(MediaCall::Rate(rate));
    }
}
