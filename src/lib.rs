// tunelink library - client core for the streaming backend
// Download tracking, continuous playback and the pieces they share

pub mod api;        // backend seams + the reqwest client
pub mod config;     // settings and preferences
pub mod downloads;  // server-side download jobs, polled until done
pub mod error;      // error types
pub mod playback;   // now-playing engine, player task, autoplay
pub mod session;    // tracker + player under one cancellation token
pub mod song;       // the Song model and its wire format

#[cfg(feature = "favorites")]
pub mod favorites;  // saved songs in SQLite

#[cfg(test)]
mod testing;

// Export the stuff other modules actually use
pub use api::HttpBackend;
pub use config::Config;
pub use downloads::{DownloadJob, JobId, JobStatus, TrackerEvent, TrackerHandle};
pub use error::{ApiError, SubmitError, ValidationError};
pub use playback::{PlaybackPhase, PlaybackState, PlayerEvent, PlayerHandle};
pub use session::{Session, SessionEvents};
pub use song::Song;
