use super::engine::PlaybackEngine;
use super::Epoch;
use crate::api::RecommendationSource;
use crate::song::Song;
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Snapshot taken when a song reaches its end
#[derive(Debug, Clone, PartialEq)]
pub struct EndedTrack {
    pub epoch: Epoch,
    pub song: Song,
}

/// Next song picked for an ended track, still tagged with that track's epoch
#[derive(Debug, Clone, PartialEq)]
pub struct Recommendation {
    pub epoch: Epoch,
    pub song: Song,
}

/// What to do when every recommendation matches the ended song
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum FallbackPolicy {
    /// Take the first entry anyway, which can replay the same song
    #[default]
    FirstCandidate,
    /// Leave playback ended
    Stop,
}

pub struct AutoplayResolver<R> {
    source: Arc<R>,
    fallback: FallbackPolicy,
}

impl<R: RecommendationSource + 'static> AutoplayResolver<R> {
    pub fn new(source: Arc<R>, fallback: FallbackPolicy) -> Self {
        Self { source, fallback }
    }

    /// Fetches recommendations for the ended song and picks the next one.
    /// `None` on failure or an empty list; errors are logged, not returned.
    pub fn resolve(&self, ended: EndedTrack) -> impl Future<Output = Option<Recommendation>> + Send + 'static {
        let source = Arc::clone(&self.source);
        let fallback = self.fallback;

        async move {
            debug!("Fetching recommendations after '{}'", ended.song.title);
            let candidates = match source.recommendations(&ended.song.id).await {
                Ok(candidates) => candidates,
                Err(e) => {
                    warn!("Autoplay lookup for '{}' failed: {}", ended.song.title, e);
                    return None;
                }
            };

            let song = select_next(&ended.song, candidates, fallback)?;
            Some(Recommendation { epoch: ended.epoch, song })
        }
    }

    /// Loads and starts the recommendation, unless something else was loaded
    /// since the lookup started. Only uses the engine's public operations.
    pub fn apply(&self, engine: &mut PlaybackEngine, recommendation: Recommendation) -> bool {
        if recommendation.epoch != engine.epoch() {
            debug!(
                "Discarding autoplay pick '{}' from epoch {} (now {})",
                recommendation.song.title,
                recommendation.epoch,
                engine.epoch()
            );
            return false;
        }

        let title = recommendation.song.display_title();
        match engine.load(recommendation.song) {
            Ok(_) => {
                engine.play();
                info!("Autoplaying '{}'", title);
                true
            }
            Err(e) => {
                warn!("Autoplay pick '{}' can't be played: {}", title, e);
                false
            }
        }
    }
}

/// First candidate differing from the ended song in both id and title,
/// otherwise whatever the fallback policy allows.
pub fn select_next(ended: &Song, candidates: Vec<Song>, fallback: FallbackPolicy) -> Option<Song> {
    if candidates.is_empty() {
        debug!("No recommendations after '{}'", ended.title);
        return None;
    }

    let pick = candidates
        .iter()
        .position(|c| c.id != ended.id && c.title != ended.title);

    match (pick, fallback) {
        (Some(index), _) => candidates.into_iter().nth(index),
        (None, FallbackPolicy::Stop) => {
            info!("Only '{}' look-alikes recommended, stopping", ended.title);
            None
        }
        (None, FallbackPolicy::FirstCandidate) => {
            let first = candidates.into_iter().next()?;
            if first.is_same_track(ended) {
                warn!("Autoplay falls back to replaying '{}'", ended.title);
            }
            Some(first)
        }
    }
}
