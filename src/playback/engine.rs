use super::autoplay::EndedTrack;
use super::media::{MediaEvent, MediaEventKind, MediaSource};
use super::{Epoch, PlaybackPhase, PlaybackState};
use crate::error::ValidationError;
use crate::song::Song;
use tracing::{debug, info, warn};

/// Sole writer of [`PlaybackState`]. Commands are applied immediately and
/// mirrored into the media source.
pub struct PlaybackEngine {
    media: Box<dyn MediaSource>,
    state: PlaybackState,
}

impl PlaybackEngine {
    pub fn new(mut media: Box<dyn MediaSource>, volume: f32, rate: f32) -> Self {
        let state = PlaybackState::new(volume, if rate > 0.0 { rate } else { 1.0 });
        media.set_volume(state.volume);
        media.set_rate(state.rate);
        Self { media, state }
    }

    pub fn state(&self) -> &PlaybackState {
        &self.state
    }

    pub fn epoch(&self) -> Epoch {
        self.state.epoch
    }

    pub fn current_song(&self) -> Option<&Song> {
        self.state.current_song.as_ref()
    }

    /// Valid from any phase. Bumps the epoch, drops the old position and
    /// leaves the song loaded but not playing.
    pub fn load(&mut self, song: Song) -> Result<Epoch, ValidationError> {
        song.require_stream_url()?;

        let epoch = self.state.epoch.next();
        self.state.epoch = epoch;
        self.state.phase = PlaybackPhase::Loaded;
        self.state.played_secs = 0.0;
        self.state.duration_secs = 0.0;
        self.media.open(epoch, &song);

        debug!("Loaded '{}' at epoch {}", song.display_title(), epoch);
        self.state.current_song = Some(song);
        Ok(epoch)
    }

    pub fn play(&mut self) {
        match self.state.phase {
            PlaybackPhase::Loaded | PlaybackPhase::Paused => {
                self.media.play();
                self.state.phase = PlaybackPhase::Playing;
            }
            // Ended needs a fresh load
            PlaybackPhase::Idle | PlaybackPhase::Playing | PlaybackPhase::Ended => {}
        }
    }

    pub fn pause(&mut self) {
        if self.state.phase == PlaybackPhase::Playing {
            self.media.pause();
            self.state.phase = PlaybackPhase::Paused;
        }
    }

    pub fn toggle_play_pause(&mut self) {
        if self.state.is_playing() {
            self.pause();
        } else {
            self.play();
        }
    }

    /// Clamped into `[0, duration]`; ignored while the duration is unknown.
    pub fn seek(&mut self, secs: f64) {
        if self.state.current_song.is_none() || self.state.duration_secs <= 0.0 || secs.is_nan() {
            return;
        }
        let target = secs.clamp(0.0, self.state.duration_secs);
        self.state.played_secs = target;
        self.media.seek(target);
    }

    pub fn set_volume(&mut self, volume: f32) {
        if volume.is_nan() {
            return;
        }
        let clamped = volume.clamp(0.0, 1.0);
        self.state.volume = clamped;
        self.media.set_volume(clamped);
    }

    /// Any positive rate goes; the UI presets are not enforced here.
    pub fn set_rate(&mut self, rate: f32) {
        if !(rate.is_finite() && rate > 0.0) {
            warn!("Ignoring playback rate {}", rate);
            return;
        }
        self.state.rate = rate;
        self.media.set_rate(rate);
    }

    /// Applies a media-source event. Returns the ended track when this event
    /// moved the engine from Playing to Ended, which happens at most once per
    /// load.
    pub fn handle_media_event(&mut self, event: MediaEvent) -> Option<EndedTrack> {
        if event.epoch != self.state.epoch {
            debug!("Dropping media event from epoch {} (now {})", event.epoch, self.state.epoch);
            return None;
        }

        match event.kind {
            MediaEventKind::Progress { played_secs } => {
                self.state.played_secs = clamp_position(played_secs, self.state.duration_secs);
            }
            MediaEventKind::DurationKnown { secs } => {
                self.state.duration_secs = if secs.is_finite() { secs.max(0.0) } else { 0.0 };
                self.state.played_secs = clamp_position(self.state.played_secs, self.state.duration_secs);
            }
            MediaEventKind::Ended => {
                if self.state.phase != PlaybackPhase::Playing {
                    return None;
                }
                self.state.phase = PlaybackPhase::Ended;
                if self.state.duration_secs > 0.0 {
                    self.state.played_secs = self.state.duration_secs;
                }
                let song = self.state.current_song.clone()?;
                info!("Finished '{}'", song.display_title());
                return Some(EndedTrack { epoch: self.state.epoch, song });
            }
            MediaEventKind::Failed(message) => {
                warn!("Media source failed at epoch {}: {}", self.state.epoch, message);
                // stalled: keep the song loaded, stop claiming to play
                if self.state.phase == PlaybackPhase::Playing {
                    self.state.phase = PlaybackPhase::Paused;
                }
            }
        }
        None
    }
}

fn clamp_position(played: f64, duration: f64) -> f64 {
    let played = if played.is_finite() { played.max(0.0) } else { 0.0 };
    if duration > 0.0 {
        played.min(duration)
    } else {
        played
    }
}
