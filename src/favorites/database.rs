use super::{FavoriteRecord, FavoritesStore};
use crate::error::FavoritesError;
use crate::song::Song;
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row};
use std::path::Path;
use tracing::debug;

pub struct FavoritesDatabase {
    conn: Connection,
}

impl FavoritesDatabase {
    pub fn new<P: AsRef<Path>>(db_path: P) -> Result<Self, FavoritesError> {
        if let Some(parent) = db_path.as_ref().parent().filter(|p| !p.as_os_str().is_empty()) {
            // Connection::open won't create missing directories
            std::fs::create_dir_all(parent)?;
        }
        let conn = Connection::open(db_path)?;
        let db = Self { conn };
        db.initialize_tables()?;
        Ok(db)
    }

    pub fn in_memory() -> Result<Self, FavoritesError> {
        let db = Self {
            conn: Connection::open_in_memory()?,
        };
        db.initialize_tables()?;
        Ok(db)
    }

    fn initialize_tables(&self) -> Result<(), FavoritesError> {
        self.conn.execute(
            "CREATE TABLE IF NOT EXISTS favorites (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                song_id TEXT NOT NULL,
                title TEXT NOT NULL,
                artist TEXT NOT NULL DEFAULT '',
                thumbnail_url TEXT NOT NULL DEFAULT '',
                stream_url TEXT,
                created_at TEXT NOT NULL
            )",
            [],
        )?;

        self.conn.execute(
            "CREATE INDEX IF NOT EXISTS idx_favorites_created_at ON favorites(created_at)",
            [],
        )?;

        Ok(())
    }

    fn row_to_record(row: &Row) -> rusqlite::Result<FavoriteRecord> {
        let created_at: String = row.get(6)?;
        let created_at = DateTime::parse_from_rfc3339(&created_at)
            .map_err(|e| rusqlite::Error::FromSqlConversionFailure(6, rusqlite::types::Type::Text, Box::new(e)))?
            .with_timezone(&Utc);

        Ok(FavoriteRecord {
            id: row.get(0)?,
            song_id: row.get(1)?,
            title: row.get(2)?,
            artist: row.get(3)?,
            thumbnail_url: row.get(4)?,
            stream_url: row.get(5)?,
            created_at,
        })
    }
}

impl FavoritesStore for FavoritesDatabase {
    fn insert(&self, song: &Song) -> Result<FavoriteRecord, FavoritesError> {
        let created_at = Utc::now();
        self.conn.execute(
            "INSERT INTO favorites (song_id, title, artist, thumbnail_url, stream_url, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                song.id,
                song.title,
                song.artist,
                song.thumbnail_url,
                song.stream_url(),
                created_at.to_rfc3339(),
            ],
        )?;

        let id = self.conn.last_insert_rowid();
        debug!("Saved favorite {} ('{}')", id, song.title);
        self.get(id)
    }

    fn list(&self) -> Result<Vec<FavoriteRecord>, FavoritesError> {
        let mut stmt = self.conn.prepare(
            "SELECT id, song_id, title, artist, thumbnail_url, stream_url, created_at
             FROM favorites ORDER BY created_at DESC, id DESC",
        )?;

        let records = stmt
            .query_map([], Self::row_to_record)?
            .collect::<Result<Vec<_>, _>>()?;

        Ok(records)
    }

    fn get(&self, id: i64) -> Result<FavoriteRecord, FavoritesError> {
        let mut stmt = self.conn.prepare(
            "SELECT id, song_id, title, artist, thumbnail_url, stream_url, created_at
             FROM favorites WHERE id = ?1",
        )?;

        stmt.query_row(params![id], Self::row_to_record)
            .optional()?
            .ok_or(FavoritesError::NotFound(id))
    }

    fn remove(&self, id: i64) -> Result<(), FavoritesError> {
        let removed = self.conn.execute("DELETE FROM favorites WHERE id = ?1", params![id])?;
        if removed == 0 {
            return Err(FavoritesError::NotFound(id));
        }
        Ok(())
    }
}
