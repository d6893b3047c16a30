//! The upload relay: move one uploaded audio file into object storage and
//! record its metadata.
//!
//! The file is stored first under a freshly generated key and only a
//! successful write is followed by the metadata insert. A failed insert after
//! a successful write leaves the object in place.

use std::sync::Arc;

use thiserror::Error;

use crate::model::{NewSong, Song};
use crate::songs::SongStore;
use crate::storage::{ObjectStore, StorageError};

pub const DEFAULT_CONTENT_TYPE: &str = "application/octet-stream";

#[derive(Debug, Clone, Default)]
pub struct UploadedFile {
    pub file_name: String,
    pub content_type: Option<String>,
    pub data: Vec<u8>,
}

/// Raw multipart fields as received. Every field is optional here; the relay
/// decides what is missing.
#[derive(Debug, Clone, Default)]
pub struct UploadForm {
    pub file: Option<UploadedFile>,
    pub title: Option<String>,
    pub artist: Option<String>,
    pub user_id: Option<String>,
}

#[derive(Error, Debug)]
pub enum RelayError {
    #[error("Missing required fields: {}", .0.join(", "))]
    MissingFields(Vec<&'static str>),

    #[error("Failed to upload file")]
    Storage(#[source] StorageError),

    #[error("Failed to save song metadata")]
    Metadata(#[source] anyhow::Error),

    #[error("An unexpected error occurred")]
    Unexpected(String),
}

impl RelayError {
    /// Underlying cause, reported to the caller alongside the error message.
    pub fn details(&self) -> Option<String> {
        match self {
            RelayError::MissingFields(_) => None,
            RelayError::Storage(e) => Some(e.to_string()),
            RelayError::Metadata(e) => Some(format!("{:#}", e)),
            RelayError::Unexpected(details) => Some(details.clone()),
        }
    }
}

struct ValidUpload {
    file: UploadedFile,
    title: String,
    artist: String,
    user_id: String,
}

impl UploadForm {
    fn validate(self) -> Result<ValidUpload, RelayError> {
        let present = |value: &Option<String>| value.as_deref().is_some_and(|v| !v.is_empty());

        let mut missing = Vec::new();
        if !self.file.as_ref().is_some_and(|f| !f.data.is_empty()) {
            missing.push("file");
        }
        if !present(&self.title) {
            missing.push("title");
        }
        if !present(&self.artist) {
            missing.push("artist");
        }
        if !present(&self.user_id) {
            missing.push("userId");
        }

        match (self.file, self.title, self.artist, self.user_id) {
            (Some(file), Some(title), Some(artist), Some(user_id)) if missing.is_empty() => {
                Ok(ValidUpload {
                    file,
                    title,
                    artist,
                    user_id,
                })
            }
            _ => Err(RelayError::MissingFields(missing)),
        }
    }
}

/// Generate a fresh storage key for an upload: a random uuid followed by the
/// original file extension, if it has a usable one.
pub fn storage_path_for(file_name: &str) -> String {
    let id = uuid::Uuid::new_v4();
    let extension = file_name
        .rsplit_once('.')
        .map(|(_, ext)| ext)
        .filter(|ext| !ext.is_empty() && ext.chars().all(|c| c.is_ascii_alphanumeric()));

    match extension {
        Some(ext) => format!("{}.{}", id, ext),
        None => id.to_string(),
    }
}

#[derive(Clone)]
pub struct UploadRelay {
    store: Arc<dyn ObjectStore>,
    songs: Arc<dyn SongStore>,
}

impl UploadRelay {
    pub fn new(store: Arc<dyn ObjectStore>, songs: Arc<dyn SongStore>) -> Self {
        Self { store, songs }
    }

    pub async fn relay(&self, form: UploadForm) -> Result<Song, RelayError> {
        let upload = form.validate().map_err(|e| {
            tracing::warn!("Rejected upload: {}", e);
            e
        })?;

        let file_path = storage_path_for(&upload.file.file_name);
        let content_type = upload
            .file
            .content_type
            .as_deref()
            .filter(|ct| !ct.is_empty())
            .unwrap_or(DEFAULT_CONTENT_TYPE);

        tracing::info!(
            "Uploading '{}' ({} bytes) to storage: {}",
            upload.file.file_name,
            upload.file.data.len(),
            file_path
        );

        self.store
            .put(&file_path, &upload.file.data, content_type)
            .await
            .map_err(|e| {
                tracing::error!("Storage upload error: {}", e);
                RelayError::Storage(e)
            })?;

        tracing::debug!("File uploaded successfully, saving metadata");

        let song = self
            .songs
            .insert_song(NewSong {
                title: upload.title,
                artist: upload.artist,
                file_path: file_path.clone(),
                user_id: upload.user_id,
            })
            .await
            .map_err(|e| {
                tracing::error!(
                    "Database insert error, object {}/{} left without metadata: {:#}",
                    self.store.bucket(),
                    file_path,
                    e
                );
                RelayError::Metadata(e)
            })?;

        tracing::info!("Song metadata saved: {} ({})", song.id, song.file_path);
        Ok(song)
    }
}
