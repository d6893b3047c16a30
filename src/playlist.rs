use anyhow::{Context, Result};
use sqlx::SqlitePool;

use crate::db::timestamp;
use crate::model::{Playlist, PlaylistCreate, PlaylistSong, Song};
use crate::songs::{SongRow, song_from_row};

type PlaylistRow = (String, String, Option<String>, String, String);

fn playlist_from_row((id, title, description, user_id, created_at): PlaylistRow) -> Playlist {
    Playlist {
        id,
        title,
        description,
        user_id,
        created_at,
    }
}

#[derive(Clone)]
pub struct PlaylistDatabase {
    pool: SqlitePool,
}

impl PlaylistDatabase {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Create a new playlist owned by `user_id`. The title is trimmed and an
    /// empty description is stored as NULL.
    pub async fn create_playlist(&self, user_id: &str, create: PlaylistCreate) -> Result<Playlist> {
        let title = create.title.trim().to_string();
        if title.is_empty() {
            anyhow::bail!("Playlist title must not be empty");
        }

        let description = create
            .description
            .map(|d| d.trim().to_string())
            .filter(|d| !d.is_empty());

        let id = uuid::Uuid::new_v4().to_string();
        let now = timestamp();

        sqlx::query(
            r#"
            INSERT INTO playlists (id, title, description, user_id, created_at)
            VALUES (?, ?, ?, ?, ?)
            "#,
        )
        .bind(&id)
        .bind(&title)
        .bind(&description)
        .bind(user_id)
        .bind(&now)
        .execute(&self.pool)
        .await
        .context("Failed to insert playlist")?;

        Ok(Playlist {
            id,
            title,
            description,
            user_id: user_id.to_string(),
            created_at: now,
        })
    }

    /// Playlists owned by a user, newest first
    pub async fn get_playlists(&self, user_id: &str) -> Result<Vec<Playlist>> {
        let rows = sqlx::query_as::<_, PlaylistRow>(
            r#"
            SELECT id, title, description, user_id, created_at
            FROM playlists
            WHERE user_id = ?
            ORDER BY created_at DESC, rowid DESC
            "#,
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await
        .context("Failed to fetch playlists")?;

        Ok(rows.into_iter().map(playlist_from_row).collect())
    }

    pub async fn get_playlist(&self, id: &str) -> Result<Option<Playlist>> {
        let row = sqlx::query_as::<_, PlaylistRow>(
            r#"
            SELECT id, title, description, user_id, created_at
            FROM playlists
            WHERE id = ?
            "#,
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .context("Failed to fetch playlist")?;

        Ok(row.map(playlist_from_row))
    }

    /// Songs of a playlist joined to their full records, in the order they
    /// were added (oldest first).
    pub async fn get_playlist_songs(&self, playlist_id: &str) -> Result<Vec<Song>> {
        let rows = sqlx::query_as::<_, SongRow>(
            r#"
            SELECT s.id, s.title, s.artist, s.file_path, s.user_id, s.created_at
            FROM playlist_songs ps
            JOIN songs s ON s.id = ps.song_id
            WHERE ps.playlist_id = ?
            ORDER BY ps.added_at ASC, ps.rowid ASC
            "#,
        )
        .bind(playlist_id)
        .fetch_all(&self.pool)
        .await
        .context("Failed to fetch playlist songs")?;

        Ok(rows.into_iter().map(song_from_row).collect())
    }

    /// Add a song to a playlist. Returns `None` if the playlist does not
    /// exist; adding a song that is already present keeps its original
    /// position.
    pub async fn add_song_to_playlist(
        &self,
        playlist_id: &str,
        song_id: &str,
    ) -> Result<Option<PlaylistSong>> {
        // Check if playlist exists
        let exists = sqlx::query_scalar::<_, i64>("SELECT COUNT(*) FROM playlists WHERE id = ?")
            .bind(playlist_id)
            .fetch_one(&self.pool)
            .await
            .context("Failed to check playlist existence")?;

        if exists == 0 {
            return Ok(None);
        }

        sqlx::query(
            r#"
            INSERT OR IGNORE INTO playlist_songs (playlist_id, song_id, added_at)
            VALUES (?, ?, ?)
            "#,
        )
        .bind(playlist_id)
        .bind(song_id)
        .bind(timestamp())
        .execute(&self.pool)
        .await
        .context("Failed to add song to playlist")?;

        let added_at = sqlx::query_scalar::<_, String>(
            "SELECT added_at FROM playlist_songs WHERE playlist_id = ? AND song_id = ?",
        )
        .bind(playlist_id)
        .bind(song_id)
        .fetch_one(&self.pool)
        .await
        .context("Failed to read playlist association")?;

        Ok(Some(PlaylistSong {
            playlist_id: playlist_id.to_string(),
            song_id: song_id.to_string(),
            added_at,
        }))
    }
}
