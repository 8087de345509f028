// Playback - the now-playing state machine plus autoplay chaining
// The engine is plain synchronous state; the player task feeds it commands,
// media events and recommendation results one at a time

pub mod autoplay; // picks the next track when one ends
pub mod engine;   // load/play/pause/seek/volume/rate + epoch
pub mod media;    // media source seam and the headless clock-driven source
pub mod player;   // task that owns the engine

pub use autoplay::{AutoplayResolver, EndedTrack, FallbackPolicy, Recommendation};
pub use engine::PlaybackEngine;
pub use media::{HeadlessMedia, MediaEvent, MediaEventKind, MediaSource};
pub use player::{Player, PlayerEvent, PlayerHandle};

use crate::song::Song;
use std::fmt;

/// Bumped on every load. Anything asynchronous started under an older epoch
/// is dropped when it comes back.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Epoch(u64);

impl Epoch {
    pub fn next(self) -> Self {
        Epoch(self.0 + 1)
    }

    pub fn value(self) -> u64 {
        self.0
    }
}

impl fmt::Display for Epoch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlaybackPhase {
    Idle,
    Loaded,
    Playing,
    Paused,
    Ended,
}

#[derive(Debug, Clone, PartialEq)]
pub struct PlaybackState {
    pub current_song: Option<Song>,
    pub phase: PlaybackPhase,
    pub volume: f32, // 0.0 to 1.0
    pub rate: f32,
    pub played_secs: f64,
    pub duration_secs: f64, // 0 until the media source reports it
    pub epoch: Epoch,
}

impl PlaybackState {
    pub fn new(volume: f32, rate: f32) -> Self {
        Self {
            current_song: None,
            phase: PlaybackPhase::Idle,
            volume: volume.clamp(0.0, 1.0),
            rate,
            played_secs: 0.0,
            duration_secs: 0.0,
            epoch: Epoch::default(),
        }
    }

    pub fn is_playing(&self) -> bool {
        self.phase == PlaybackPhase::Playing
    }

    /// Fraction played, 0 while the duration is unknown
    pub fn progress_ratio(&self) -> f64 {
        if self.duration_secs > 0.0 {
            self.played_secs / self.duration_secs
        } else {
            0.0
        }
    }
}

/// "m:ss" for status lines
pub fn format_clock(secs: f64) -> String {
    let total = secs.max(0.0) as u64;
    format!("{}:{:02}", total / 60, total % 60)
}
