// Session - the tracker and the player under one cancellation token
// Built once at startup and handed to whatever drives the app

use crate::api::{DownloadBackend, RecommendationSource};
use crate::config::Config;
use crate::downloads::{IntervalTicker, JobTracker, TrackerEvent, TrackerHandle};
use crate::playback::{
    AutoplayResolver, MediaEvent, MediaSource, PlaybackEngine, Player, PlayerEvent, PlayerHandle,
};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// Notification streams from both tasks
pub struct SessionEvents {
    pub downloads: mpsc::UnboundedReceiver<TrackerEvent>,
    pub playback: mpsc::UnboundedReceiver<PlayerEvent>,
}

pub struct Session<B> {
    pub downloads: TrackerHandle<B>,
    pub player: PlayerHandle,
    cancel: CancellationToken,
    tasks: Vec<JoinHandle<()>>,
}

impl<B> Session<B>
where
    B: DownloadBackend + RecommendationSource + 'static,
{
    /// Spawns the tracker with the configured poll interval and the player
    /// on top of `media`. Must be called inside a tokio runtime.
    pub fn start(
        backend: Arc<B>,
        config: &Config,
        media: Box<dyn MediaSource>,
        media_events: mpsc::UnboundedReceiver<MediaEvent>,
    ) -> (Self, SessionEvents) {
        let cancel = CancellationToken::new();

        let (download_tx, download_rx) = mpsc::unbounded_channel();
        let mut tracker = JobTracker::new(Arc::clone(&backend));
        tracker.set_event_sender(download_tx);
        let ticker = IntervalTicker::new(config.downloads.poll_interval());
        let (downloads, tracker_task) = tracker.spawn(ticker, cancel.child_token());

        let playback = &config.playback;
        let engine = PlaybackEngine::new(media, playback.volume, playback.rate);
        let resolver = AutoplayResolver::new(backend, playback.autoplay_fallback);
        let (player_tx, player_rx) = mpsc::unbounded_channel();
        let mut player = Player::new(engine, resolver, playback.autoplay);
        player.set_event_sender(player_tx);
        let (player, player_task) = player.spawn(media_events, cancel.child_token());

        info!(
            "Session started (poll every {:?}, autoplay {})",
            config.downloads.poll_interval(),
            if playback.autoplay { "on" } else { "off" }
        );

        let session = Self {
            downloads,
            player,
            cancel,
            tasks: vec![tracker_task, player_task],
        };
        let events = SessionEvents {
            downloads: download_rx,
            playback: player_rx,
        };
        (session, events)
    }
}

impl<B> Session<B> {
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub fn is_shut_down(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Stops polling and playback and waits for both tasks. In-flight
    /// requests are dropped and their results never applied.
    pub async fn shutdown(mut self) {
        self.cancel.cancel();
        for task in self.tasks.drain(..) {
            if let Err(e) = task.await {
                warn!("Session task ended abnormally: {}", e);
            }
        }
        info!("Session shut down");
    }
}
