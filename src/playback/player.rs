use super::autoplay::{AutoplayResolver, Recommendation};
use super::engine::PlaybackEngine;
use super::media::MediaEvent;
use super::{Epoch, PlaybackState};
use crate::api::RecommendationSource;
use crate::error::ValidationError;
use crate::song::Song;
use futures::future::{BoxFuture, OptionFuture};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

#[derive(Debug, Clone)]
enum PlayerCommand {
    Load(Song),
    Play,
    Pause,
    TogglePlayPause,
    Seek(f64),
    SetVolume(f32),
    SetRate(f32),
}

#[derive(Debug, Clone, PartialEq)]
pub enum PlayerEvent {
    TrackStarted { song: Song, autoplay: bool },
    TrackFinished(Song),
    /// Autoplay had nothing to chain to; playback stays ended
    AutoplayStopped(Song),
}

/// Task that owns the engine. Commands, media events and the one outstanding
/// recommendation lookup are handled strictly one at a time.
pub struct Player<R> {
    engine: PlaybackEngine,
    resolver: AutoplayResolver<R>,
    autoplay: bool,
    state_tx: watch::Sender<PlaybackState>,
    event_sender: Option<mpsc::UnboundedSender<PlayerEvent>>,
}

impl<R: RecommendationSource + 'static> Player<R> {
    pub fn new(engine: PlaybackEngine, resolver: AutoplayResolver<R>, autoplay: bool) -> Self {
        let (state_tx, _) = watch::channel(engine.state().clone());
        Self {
            engine,
            resolver,
            autoplay,
            state_tx,
            event_sender: None,
        }
    }

    pub fn set_event_sender(&mut self, sender: mpsc::UnboundedSender<PlayerEvent>) {
        self.event_sender = Some(sender);
    }

    pub fn spawn(
        self,
        media_events: mpsc::UnboundedReceiver<MediaEvent>,
        cancel: CancellationToken,
    ) -> (PlayerHandle, JoinHandle<()>) {
        let (commands_tx, commands_rx) = mpsc::unbounded_channel();
        let handle = PlayerHandle {
            commands: commands_tx,
            state: self.state_tx.subscribe(),
        };
        let task = tokio::spawn(self.run(commands_rx, media_events, cancel));
        (handle, task)
    }

    async fn run(
        mut self,
        mut commands: mpsc::UnboundedReceiver<PlayerCommand>,
        mut media_events: mpsc::UnboundedReceiver<MediaEvent>,
        cancel: CancellationToken,
    ) {
        // tagged with the epoch of the track that ended
        let mut lookup: Option<BoxFuture<'static, (Epoch, Option<Recommendation>)>> = None;

        loop {
            tokio::select! {
                biased;

                _ = cancel.cancelled() => break,

                command = commands.recv() => match command {
                    Some(command) => self.handle_command(command),
                    None => break,
                },

                Some(event) = media_events.recv() => {
                    if let Some(ended) = self.engine.handle_media_event(event) {
                        self.emit(PlayerEvent::TrackFinished(ended.song.clone()));
                        if self.autoplay {
                            // replaces any lookup still running for an older epoch
                            let epoch = ended.epoch;
                            let resolving = self.resolver.resolve(ended);
                            lookup = Some(Box::pin(async move { (epoch, resolving.await) }));
                        }
                    }
                }

                Some((epoch, found)) = OptionFuture::from(lookup.as_mut()), if lookup.is_some() => {
                    lookup = None;
                    self.finish_lookup(epoch, found);
                }
            }

            self.publish();
        }

        if lookup.is_some() {
            debug!("Player stopped with a recommendation lookup outstanding");
        }
        info!("Player stopped");
    }

    fn handle_command(&mut self, command: PlayerCommand) {
        match command {
            PlayerCommand::Load(song) => {
                // validated by the handle, so this only fails on a logic error
                if self.engine.load(song.clone()).is_ok() {
                    self.emit(PlayerEvent::TrackStarted { song, autoplay: false });
                }
            }
            PlayerCommand::Play => self.engine.play(),
            PlayerCommand::Pause => self.engine.pause(),
            PlayerCommand::TogglePlayPause => self.engine.toggle_play_pause(),
            PlayerCommand::Seek(secs) => self.engine.seek(secs),
            PlayerCommand::SetVolume(volume) => self.engine.set_volume(volume),
            PlayerCommand::SetRate(rate) => self.engine.set_rate(rate),
        }
    }

    fn finish_lookup(&mut self, epoch: Epoch, found: Option<Recommendation>) {
        match found {
            Some(recommendation) => {
                let song = recommendation.song.clone();
                if self.resolver.apply(&mut self.engine, recommendation) {
                    self.emit(PlayerEvent::TrackStarted { song, autoplay: true });
                }
            }
            None if epoch != self.engine.epoch() => {
                debug!("Autoplay lookup from epoch {} came back empty after a newer load", epoch);
            }
            None => {
                if let Some(song) = self.engine.current_song() {
                    let song = song.clone();
                    self.emit(PlayerEvent::AutoplayStopped(song));
                }
            }
        }
    }

    fn emit(&self, event: PlayerEvent) {
        if let Some(sender) = &self.event_sender {
            let _ = sender.send(event);
        }
    }

    fn publish(&self) {
        let state = self.engine.state();
        self.state_tx.send_if_modified(|current| {
            if *current == *state {
                false
            } else {
                *current = state.clone();
                true
            }
        });
    }
}

/// Command side of the player plus a view of its state
#[derive(Clone)]
pub struct PlayerHandle {
    commands: mpsc::UnboundedSender<PlayerCommand>,
    state: watch::Receiver<PlaybackState>,
}

impl PlayerHandle {
    /// Unplayable songs are rejected here, before the player sees them.
    pub fn load(&self, song: Song) -> Result<(), ValidationError> {
        song.require_stream_url()?;
        self.send(PlayerCommand::Load(song));
        Ok(())
    }

    /// `load` followed by `play`
    pub fn play_song(&self, song: Song) -> Result<(), ValidationError> {
        self.load(song)?;
        self.play();
        Ok(())
    }

    pub fn play(&self) {
        self.send(PlayerCommand::Play);
    }

    pub fn pause(&self) {
        self.send(PlayerCommand::Pause);
    }

    pub fn toggle_play_pause(&self) {
        self.send(PlayerCommand::TogglePlayPause);
    }

    pub fn seek(&self, secs: f64) {
        self.send(PlayerCommand::Seek(secs));
    }

    pub fn set_volume(&self, volume: f32) {
        self.send(PlayerCommand::SetVolume(volume));
    }

    pub fn set_rate(&self, rate: f32) {
        self.send(PlayerCommand::SetRate(rate));
    }

    pub fn state(&self) -> PlaybackState {
        self.state.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<PlaybackState> {
        self.state.clone()
    }

    fn send(&self, command: PlayerCommand) {
        if self.commands.send(command).is_err() {
            debug!("Player is gone, dropping command");
        }
    }
}
