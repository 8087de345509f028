use crate::error::ValidationError;
use serde::{Deserialize, Serialize};

/// A track as surfaced by search, charts, recommendations or favorites.
///
/// Whether it can be played or downloaded is decided once, when the record
/// comes off the wire, and carried in [`SongSource`].
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(from = "SongRecord")]
pub struct Song {
    pub id: String,
    pub title: String,
    pub artist: String,
    pub album: String,
    pub thumbnail_url: String,
    pub duration_label: Option<String>,
    pub source: SongSource,
}

#[derive(Debug, Clone, PartialEq)]
pub enum SongSource {
    Playable { stream_url: String },
    Unplayable { reason: UnplayableReason },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnplayableReason {
    /// Provider returned the track without a direct audio url
    NoStreamUrl,
}

/// Song as the backend serializes it. Ids travel as `videoId` for
/// compatibility with older clients even though they hold provider ids.
/// Descriptive fields may arrive as `null` when the provider left them out.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SongRecord {
    pub video_id: String,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub artist: Option<String>,
    #[serde(default)]
    pub album: Option<String>,
    #[serde(default)]
    pub thumbnail: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stream_url: Option<String>,
}

impl From<SongRecord> for Song {
    fn from(record: SongRecord) -> Self {
        let source = match record.stream_url {
            Some(url) if !url.trim().is_empty() => SongSource::Playable { stream_url: url },
            _ => SongSource::Unplayable { reason: UnplayableReason::NoStreamUrl },
        };

        Self {
            id: record.video_id,
            title: record
                .title
                .filter(|t| !t.trim().is_empty())
                .unwrap_or_else(|| "Unknown".to_string()),
            artist: record.artist.unwrap_or_default(),
            album: record.album.unwrap_or_default(),
            thumbnail_url: record.thumbnail.unwrap_or_default(),
            duration_label: record.duration.filter(|d| !d.is_empty()),
            source,
        }
    }
}

impl From<&Song> for SongRecord {
    fn from(song: &Song) -> Self {
        Self {
            video_id: song.id.clone(),
            title: Some(song.title.clone()),
            artist: Some(song.artist.clone()),
            album: Some(song.album.clone()),
            thumbnail: Some(song.thumbnail_url.clone()),
            duration: song.duration_label.clone(),
            stream_url: song.stream_url().map(str::to_string),
        }
    }
}

impl Song {
    pub fn stream_url(&self) -> Option<&str> {
        match &self.source {
            SongSource::Playable { stream_url } => Some(stream_url),
            SongSource::Unplayable { .. } => None,
        }
    }

    pub fn is_playable(&self) -> bool {
        matches!(self.source, SongSource::Playable { .. })
    }

    /// Stream url or the validation error to hand back to the caller
    pub fn require_stream_url(&self) -> Result<&str, ValidationError> {
        self.stream_url().ok_or_else(|| ValidationError::MissingStreamUrl {
            song_id: self.id.clone(),
        })
    }

    /// Providers alias one logical track under several ids, so an id match
    /// alone doesn't make two songs the same.
    pub fn is_same_track(&self, other: &Song) -> bool {
        self.id == other.id && self.title == other.title
    }

    /// Parses `durationLabel` ("3:45", "1:02:03" or plain seconds)
    pub fn duration_hint_secs(&self) -> Option<f64> {
        let label = self.duration_label.as_deref()?.trim();
        let mut total = 0u64;
        for part in label.split(':') {
            let value: u64 = part.trim().parse().ok()?;
            total = total.checked_mul(60)?.checked_add(value)?;
        }
        (total > 0).then_some(total as f64)
    }

    pub fn display_title(&self) -> String {
        if self.artist.is_empty() {
            self.title.clone()
        } else {
            format!("{} - {}", self.title, self.artist)
        }
    }
}
