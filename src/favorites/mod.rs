// Favorites - songs the user saved for later
// Storage sits behind a trait; the SQLite implementation lives in database.rs

pub mod database;

pub use database::FavoritesDatabase;

use crate::error::FavoritesError;
use crate::song::{Song, SongSource, UnplayableReason};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FavoriteRecord {
    pub id: i64,
    pub song_id: String,
    pub title: String,
    pub artist: String,
    pub thumbnail_url: String,
    pub stream_url: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl FavoriteRecord {
    /// Back into a song so it can be handed to the player
    pub fn to_song(&self) -> Song {
        let source = match &self.stream_url {
            Some(url) if !url.is_empty() => SongSource::Playable { stream_url: url.clone() },
            _ => SongSource::Unplayable {
                reason: UnplayableReason::NoStreamUrl,
            },
        };

        Song {
            id: self.song_id.clone(),
            title: self.title.clone(),
            artist: self.artist.clone(),
            album: String::new(),
            thumbnail_url: self.thumbnail_url.clone(),
            duration_label: None,
            source,
        }
    }
}

pub trait FavoritesStore {
    fn insert(&self, song: &Song) -> Result<FavoriteRecord, FavoritesError>;

    /// Newest first
    fn list(&self) -> Result<Vec<FavoriteRecord>, FavoritesError>;

    fn get(&self, id: i64) -> Result<FavoriteRecord, FavoritesError>;

    fn remove(&self, id: i64) -> Result<(), FavoritesError>;
}
