use super::Epoch;
use crate::song::Song;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time;
use tracing::debug;

#[derive(Debug, Clone, PartialEq)]
pub enum MediaEventKind {
    Progress { played_secs: f64 },
    DurationKnown { secs: f64 },
    Ended,
    Failed(String),
}

/// Event from the media source, tagged with the epoch of the load it
/// belongs to
#[derive(Debug, Clone, PartialEq)]
pub struct MediaEvent {
    pub epoch: Epoch,
    pub kind: MediaEventKind,
}

impl MediaEvent {
    pub fn new(epoch: Epoch, kind: MediaEventKind) -> Self {
        Self { epoch, kind }
    }
}

/// Whatever actually produces sound. The engine only pushes commands into it;
/// progress comes back as [`MediaEvent`]s on the channel the source was built
/// with.
pub trait MediaSource: Send {
    /// Replace the current source. Events for it must carry `epoch`.
    fn open(&mut self, epoch: Epoch, song: &Song);
    fn play(&mut self);
    fn pause(&mut self);
    fn seek(&mut self, secs: f64);
    fn set_volume(&mut self, volume: f32);
    fn set_rate(&mut self, rate: f32);
}

#[derive(Debug)]
enum HeadlessCommand {
    Open { epoch: Epoch, length: f64 },
    Play,
    Pause,
    Seek(f64),
    Rate(f32),
}

/// Clock-driven stand-in for an audio element: advances the position in real
/// time, reports progress and signals the end. Used when there is no audio
/// output.
pub struct HeadlessMedia {
    commands: mpsc::UnboundedSender<HeadlessCommand>,
    default_length: f64,
    driver: JoinHandle<()>,
}

impl HeadlessMedia {
    /// `default_length` is used for songs without a duration label.
    pub fn new(resolution: Duration, default_length: f64) -> (Self, mpsc::UnboundedReceiver<MediaEvent>) {
        let (commands_tx, commands_rx) = mpsc::unbounded_channel();
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let driver = tokio::spawn(drive(commands_rx, events_tx, resolution));

        let media = Self {
            commands: commands_tx,
            default_length,
            driver,
        };
        (media, events_rx)
    }

    fn send(&self, command: HeadlessCommand) {
        let _ = self.commands.send(command);
    }
}

impl Drop for HeadlessMedia {
    fn drop(&mut self) {
        self.driver.abort();
    }
}

impl MediaSource for HeadlessMedia {
    fn open(&mut self, epoch: Epoch, song: &Song) {
        let length = song.duration_hint_secs().unwrap_or(self.default_length);
        self.send(HeadlessCommand::Open { epoch, length });
    }

    fn play(&mut self) {
        self.send(HeadlessCommand::Play);
    }

    fn pause(&mut self) {
        self.send(HeadlessCommand::Pause);
    }

    fn seek(&mut self, secs: f64) {
        self.send(HeadlessCommand::Seek(secs));
    }

    fn set_volume(&mut self, _volume: f32) {
        // nothing audible to scale
    }

    fn set_rate(&mut self, rate: f32) {
        self.send(HeadlessCommand::Rate(rate));
    }
}

struct HeadlessTrack {
    epoch: Epoch,
    length: f64,
    position: f64,
    playing: bool,
}

async fn drive(
    mut commands: mpsc::UnboundedReceiver<HeadlessCommand>,
    events: mpsc::UnboundedSender<MediaEvent>,
    resolution: Duration,
) {
    let mut clock = time::interval(resolution);
    clock.set_missed_tick_behavior(time::MissedTickBehavior::Skip);
    let mut rate = 1.0f64;
    let mut track: Option<HeadlessTrack> = None;

    loop {
        tokio::select! {
            command = commands.recv() => {
                let Some(command) = command else { break };
                match command {
                    HeadlessCommand::Open { epoch, length } => {
                        let _ = events.send(MediaEvent::new(epoch, MediaEventKind::DurationKnown { secs: length }));
                        track = Some(HeadlessTrack { epoch, length, position: 0.0, playing: false });
                    }
                    HeadlessCommand::Play => {
                        if let Some(t) = track.as_mut() {
                            t.playing = t.position < t.length;
                        }
                    }
                    HeadlessCommand::Pause => {
                        if let Some(t) = track.as_mut() {
                            t.playing = false;
                        }
                    }
                    HeadlessCommand::Seek(secs) => {
                        if let Some(t) = track.as_mut() {
                            t.position = secs.clamp(0.0, t.length);
                        }
                    }
                    HeadlessCommand::Rate(r) => rate = r as f64,
                }
            }
            _ = clock.tick() => {
                let Some(t) = track.as_mut().filter(|t| t.playing) else { continue };
                t.position = (t.position + resolution.as_secs_f64() * rate).min(t.length);
                let _ = events.send(MediaEvent::new(t.epoch, MediaEventKind::Progress { played_secs: t.position }));
                if t.position >= t.length {
                    t.playing = false;
                    debug!("Headless media reached the end of epoch {}", t.epoch);
                    let _ = events.send(MediaEvent::new(t.epoch, MediaEventKind::Ended));
                }
            }
        }
    }
}
