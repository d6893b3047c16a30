use std::sync::RwLock;
use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use serde::de::DeserializeOwned;
use thiserror::Error;

use crate::model::{
    Credentials, Playlist, PlaylistCreate, PlaylistSong, Session, SignRequest, SignedUrl, Song,
    UploadReceipt, User,
};
use crate::player::SourceResolver;

#[derive(Error, Debug)]
pub enum ClientError {
    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),

    #[error("Server returned {status}: {message}")]
    Api { status: u16, message: String },

    #[error("Authentication required")]
    AuthRequired,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// A song file to send to the upload relay.
#[derive(Debug, Clone)]
pub struct SongUpload {
    pub title: String,
    pub artist: String,
    pub user_id: String,
    pub file_name: String,
    pub content_type: Option<String>,
    pub data: Vec<u8>,
}

/// Everything the application needs from the service. Components receive an
/// implementation explicitly so tests can substitute a fake.
#[async_trait]
pub trait Backend: SourceResolver {
    async fn sign_up(&self, credentials: Credentials) -> Result<User, ClientError>;

    /// Sign in and remember the session for subsequent calls.
    async fn sign_in(&self, credentials: Credentials) -> Result<Session, ClientError>;

    async fn current_user(&self) -> Result<Option<User>, ClientError>;

    async fn list_songs(&self) -> Result<Vec<Song>, ClientError>;

    async fn upload_song(&self, upload: SongUpload) -> Result<UploadReceipt, ClientError>;

    async fn create_playlist(&self, create: PlaylistCreate) -> Result<Playlist, ClientError>;

    async fn list_playlists(&self) -> Result<Vec<Playlist>, ClientError>;

    /// Songs of a playlist, oldest addition first.
    async fn playlist_songs(&self, playlist_id: &str) -> Result<Vec<Song>, ClientError>;

    async fn add_song_to_playlist(
        &self,
        playlist_id: &str,
        song_id: &str,
    ) -> Result<PlaylistSong, ClientError>;
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
    error: String,
    #[serde(default)]
    details: Option<String>,
}

/// [`Backend`] over the service's HTTP API.
pub struct ApiClient {
    base_url: String,
    http: reqwest::Client,
    token: RwLock<Option<String>>,
}

impl ApiClient {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            http: reqwest::Client::new(),
            token: RwLock::new(None),
        }
    }

    pub fn with_token(self, token: Option<String>) -> Self {
        self.set_token(token);
        self
    }

    pub fn token(&self) -> Option<String> {
        self.token.read().ok().and_then(|t| t.clone())
    }

    fn set_token(&self, token: Option<String>) {
        if let Ok(mut slot) = self.token.write() {
            *slot = token;
        }
    }

    pub fn http(&self) -> &reqwest::Client {
        &self.http
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    fn authorized(&self, request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match self.token() {
            Some(token) => request.bearer_auth(token),
            None => request,
        }
    }

    async fn send<T: DeserializeOwned>(
        &self,
        request: reqwest::RequestBuilder,
    ) -> Result<T, ClientError> {
        let response = self.authorized(request).send().await?;
        let status = response.status();

        if status == reqwest::StatusCode::UNAUTHORIZED {
            return Err(ClientError::AuthRequired);
        }

        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            let message = match serde_json::from_str::<ErrorBody>(&text) {
                Ok(ErrorBody {
                    error,
                    details: Some(details),
                }) => format!("{} ({})", error, details),
                Ok(ErrorBody { error, .. }) => error,
                Err(_) => text,
            };
            return Err(ClientError::Api {
                status: status.as_u16(),
                message,
            });
        }

        Ok(response.json().await?)
    }
}

#[async_trait]
impl SourceResolver for ApiClient {
    async fn signed_url(&self, file_path: &str, expires_in: Duration) -> Result<String, ClientError> {
        let request = SignRequest {
            path: file_path.to_string(),
            expires_in: Some(expires_in.as_secs()),
        };
        let signed: SignedUrl = self
            .send(self.http.post(self.url("/storage/sign")).json(&request))
            .await?;

        if signed.signed_url.starts_with('/') {
            Ok(self.url(&signed.signed_url))
        } else {
            Ok(signed.signed_url)
        }
    }
}

#[async_trait]
impl Backend for ApiClient {
    async fn sign_up(&self, credentials: Credentials) -> Result<User, ClientError> {
        self.send(self.http.post(self.url("/auth/signup")).json(&credentials))
            .await
    }

    async fn sign_in(&self, credentials: Credentials) -> Result<Session, ClientError> {
        let session: Session = self
            .send(self.http.post(self.url("/auth/signin")).json(&credentials))
            .await?;
        self.set_token(Some(session.access_token.clone()));
        Ok(session)
    }

    async fn current_user(&self) -> Result<Option<User>, ClientError> {
        if self.token().is_none() {
            return Ok(None);
        }
        match self.send(self.http.get(self.url("/auth/user"))).await {
            Ok(user) => Ok(Some(user)),
            Err(ClientError::AuthRequired) => Ok(None),
            Err(e) => Err(e),
        }
    }

    async fn list_songs(&self) -> Result<Vec<Song>, ClientError> {
        self.send(self.http.get(self.url("/songs"))).await
    }

    async fn upload_song(&self, upload: SongUpload) -> Result<UploadReceipt, ClientError> {
        let mut part = reqwest::multipart::Part::bytes(upload.data).file_name(upload.file_name);
        if let Some(content_type) = upload.content_type {
            part = part.mime_str(&content_type)?;
        }

        let form = reqwest::multipart::Form::new()
            .part("file", part)
            .text("title", upload.title)
            .text("artist", upload.artist)
            .text("userId", upload.user_id);

        self.send(
            self.http
                .post(self.url("/functions/v1/upload-song"))
                .multipart(form),
        )
        .await
    }

    async fn create_playlist(&self, create: PlaylistCreate) -> Result<Playlist, ClientError> {
        self.send(self.http.post(self.url("/playlists")).json(&create))
            .await
    }

    async fn list_playlists(&self) -> Result<Vec<Playlist>, ClientError> {
        self.send(self.http.get(self.url("/playlists"))).await
    }

    async fn playlist_songs(&self, playlist_id: &str) -> Result<Vec<Song>, ClientError> {
        self.send(
            self.http
                .get(self.url(&format!("/playlists/{}/songs", playlist_id))),
        )
        .await
    }

    async fn add_song_to_playlist(
        &self,
        playlist_id: &str,
        song_id: &str,
    ) -> Result<PlaylistSong, ClientError> {
        self.send(
            self.http
                .post(self.url(&format!("/playlists/{}/songs/{}", playlist_id, song_id))),
        )
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn base_url_trailing_slash_is_dropped() {
        let client = ApiClient::new("http://localhost:3000/");
        assert_eq!(client.url("/songs"), "http://localhost:3000/songs");
    }

    #[test]
    fn token_is_kept() {
        let client = ApiClient::new("http://localhost:3000").with_token(Some("abc".to_string()));
        assert_eq!(client.token().as_deref(), Some("abc"));
    }
}
