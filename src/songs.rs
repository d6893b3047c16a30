use anyhow::{Context, Result};
use async_trait::async_trait;
use sqlx::SqlitePool;

use crate::db::timestamp;
use crate::model::{NewSong, Song};

/// Column order: id, title, artist, file_path, user_id, created_at.
pub(crate) type SongRow = (String, String, String, String, String, String);

pub(crate) fn song_from_row((id, title, artist, file_path, user_id, created_at): SongRow) -> Song {
    Song {
        id,
        title,
        artist,
        file_path,
        user_id,
        created_at,
    }
}

/// Write side of the songs table, as seen by the upload relay.
#[async_trait]
pub trait SongStore: Send + Sync {
    async fn insert_song(&self, song: NewSong) -> Result<Song>;
}

#[derive(Clone)]
pub struct SongDatabase {
    pool: SqlitePool,
}

impl SongDatabase {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// All songs, most recent upload first
    pub async fn list_songs(&self) -> Result<Vec<Song>> {
        let rows = sqlx::query_as::<_, SongRow>(
            r#"
            SELECT id, title, artist, file_path, user_id, created_at
            FROM songs
            ORDER BY created_at DESC, rowid DESC
            "#,
        )
        .fetch_all(&self.pool)
        .await
        .context("Failed to fetch songs")?;

        Ok(rows.into_iter().map(song_from_row).collect())
    }

    pub async fn get_song(&self, id: &str) -> Result<Option<Song>> {
        let row = sqlx::query_as::<_, SongRow>(
            r#"
            SELECT id, title, artist, file_path, user_id, created_at
            FROM songs
            WHERE id = ?
            "#,
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .context("Failed to fetch song")?;

        Ok(row.map(song_from_row))
    }

    /// Look up a song by its storage path
    pub async fn find_by_path(&self, file_path: &str) -> Result<Option<Song>> {
        let row = sqlx::query_as::<_, SongRow>(
            r#"
            SELECT id, title, artist, file_path, user_id, created_at
            FROM songs
            WHERE file_path = ?
            "#,
        )
        .bind(file_path)
        .fetch_optional(&self.pool)
        .await
        .context("Failed to fetch song by path")?;

        Ok(row.map(song_from_row))
    }
}

#[async_trait]
impl SongStore for SongDatabase {
    async fn insert_song(&self, song: NewSong) -> Result<Song> {
        let id = uuid::Uuid::new_v4().to_string();
        let now = timestamp();

        sqlx::query(
            r#"
            INSERT INTO songs (id, title, artist, file_path, user_id, created_at)
            VALUES (?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&id)
        .bind(&song.title)
        .bind(&song.artist)
        .bind(&song.file_path)
        .bind(&song.user_id)
        .bind(&now)
        .execute(&self.pool)
        .await
        .context("Failed to insert song")?;

        Ok(Song {
            id,
            title: song.title,
            artist: song.artist,
            file_path: song.file_path,
            user_id: song.user_id,
            created_at: now,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn database() -> (tempfile::TempDir, SongDatabase) {
        let dir = tempfile::tempdir().unwrap();
        let pool = crate::db::connect(&dir.path().join("test.db")).await.unwrap();
        (dir, SongDatabase::new(pool))
    }

    fn new_song(title: &str, path: &str) -> NewSong {
        NewSong {
            title: title.to_string(),
            artist: "Rider".to_string(),
            file_path: path.to_string(),
            user_id: "u1".to_string(),
        }
    }

    #[tokio::test]
    async fn inserted_songs_are_listed_newest_first() {
        let (_dir, db) = database().await;

        db.insert_song(new_song("First", "1.mp3")).await.unwrap();
        db.insert_song(new_song("Second", "2.mp3")).await.unwrap();

        let titles: Vec<_> = db
            .list_songs()
            .await
            .unwrap()
            .into_iter()
            .map(|s| s.title)
            .collect();
        assert_eq!(titles, vec!["Second", "First"]);
    }

    #[tokio::test]
    async fn file_path_is_unique() {
        let (_dir, db) = database().await;

        db.insert_song(new_song("One", "same.mp3")).await.unwrap();
        assert!(db.insert_song(new_song("Two", "same.mp3")).await.is_err());

        let song = db.find_by_path("same.mp3").await.unwrap().unwrap();
        assert_eq!(song.title, "One");
        assert_eq!(db.get_song(&song.id).await.unwrap(), Some(song));
    }
}
