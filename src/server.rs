use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use axum::{
    Json, Router,
    body::Body,
    extract::{
        DefaultBodyLimit, FromRequestParts, Multipart, Path, Query, State,
        multipart::MultipartRejection,
    },
    http::{HeaderMap, HeaderName, StatusCode, header, request::Parts},
    response::{IntoResponse, Response},
    routing::{get, post},
};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio_util::io::ReaderStream;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use crate::auth::{AuthDatabase, AuthError};
use crate::config::ServiceConfig;
use crate::db;
use crate::model::{
    Credentials, Playlist, PlaylistCreate, PlaylistSong, Session, SignRequest, SignedUrl, Song,
    UploadReceipt, User,
};
use crate::playlist::PlaylistDatabase;
use crate::relay::{RelayError, UploadForm, UploadRelay, UploadedFile};
use crate::signing::{MAX_URL_TTL, SignatureError, UrlSigner};
use crate::songs::SongDatabase;
use crate::storage::{LocalObjectStore, ObjectStore, SONGS_BUCKET, StorageError, validate_key};

const RELAY_ALLOWED_HEADERS: &str = "authorization, x-client-info, apikey, content-type";

#[derive(Clone)]
pub struct AppState {
    pub relay: UploadRelay,
    pub store: Arc<dyn ObjectStore>,
    pub signer: UrlSigner,
    pub songs: SongDatabase,
    pub playlists: PlaylistDatabase,
    pub auth: AuthDatabase,
    pub public_url: String,
    pub max_upload_bytes: usize,
}

impl AppState {
    /// Open storage and database as described by `config`.
    pub async fn open(config: &ServiceConfig, public_url: String) -> Result<Self> {
        let pool = db::connect(&config.database_path()).await?;
        let store: Arc<dyn ObjectStore> =
            Arc::new(LocalObjectStore::new(&config.data_dir, SONGS_BUCKET).await?);
        let songs = SongDatabase::new(pool.clone());

        Ok(Self {
            relay: UploadRelay::new(store.clone(), Arc::new(songs.clone())),
            store,
            signer: UrlSigner::new(config.signing_secret(), config.url_ttl()),
            songs,
            playlists: PlaylistDatabase::new(pool.clone()),
            auth: AuthDatabase::new(pool),
            public_url,
            max_upload_bytes: config.max_upload_bytes(),
        })
    }
}

pub fn create_router(state: AppState) -> Router {
    // The relay answers CORS itself, including plain OPTIONS requests.
    let relay = Router::new()
        .route(
            "/functions/v1/upload-song",
            post(upload_song).options(relay_preflight),
        )
        .layer(DefaultBodyLimit::max(state.max_upload_bytes));

    let api = Router::new()
        .route("/", get(root))
        .route("/auth/signup", post(sign_up))
        .route("/auth/signin", post(sign_in))
        .route("/auth/user", get(current_user))
        .route("/songs", get(list_songs))
        .route("/songs/:id", get(get_song))
        .route("/playlists", get(list_playlists).post(create_playlist))
        .route("/playlists/:id/songs", get(get_playlist_songs))
        .route("/playlists/:id/songs/:song_id", post(add_song_to_playlist))
        .route("/storage/sign", post(sign_object_url))
        .route("/storage/object/sign/:bucket/:path", get(download_object))
        .layer(CorsLayer::permissive());

    Router::new()
        .merge(relay)
        .merge(api)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

#[derive(Debug, Serialize)]
struct ErrorResponse {
    error: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    details: Option<String>,
}

#[derive(Error, Debug)]
pub enum ApiError {
    #[error("Authentication required")]
    Unauthorized,

    #[error("{0}")]
    BadRequest(String),

    #[error("{0}")]
    Conflict(String),

    #[error("{0} not found")]
    NotFound(String),

    #[error("Invalid signed URL: {0}")]
    Forbidden(#[from] SignatureError),

    #[error("Internal server error")]
    Internal(#[from] anyhow::Error),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self {
            ApiError::Unauthorized => StatusCode::UNAUTHORIZED,
            ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::Conflict(_) => StatusCode::CONFLICT,
            ApiError::NotFound(_) => StatusCode::NOT_FOUND,
            ApiError::Forbidden(_) => StatusCode::FORBIDDEN,
            ApiError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };
        let details = match &self {
            ApiError::Internal(e) => Some(format!("{:#}", e)),
            _ => None,
        };

        let body = ErrorResponse {
            error: self.to_string(),
            details,
        };
        (status, Json(body)).into_response()
    }
}

impl From<AuthError> for ApiError {
    fn from(err: AuthError) -> Self {
        match err {
            AuthError::MissingCredentials | AuthError::WeakPassword => {
                ApiError::BadRequest(err.to_string())
            }
            AuthError::InvalidCredentials => ApiError::BadRequest(err.to_string()),
            AuthError::AlreadyRegistered => ApiError::Conflict(err.to_string()),
            AuthError::Other(e) => ApiError::Internal(e),
        }
    }
}

impl From<StorageError> for ApiError {
    fn from(err: StorageError) -> Self {
        match err {
            StorageError::NotFound(key) => ApiError::NotFound(format!("Object {}", key)),
            StorageError::InvalidKey(_) => ApiError::BadRequest(err.to_string()),
            other => ApiError::Internal(other.into()),
        }
    }
}

/// The signed-in user, resolved from an `Authorization: Bearer` header.
pub struct CurrentUser(pub User);

#[axum::async_trait]
impl FromRequestParts<AppState> for CurrentUser {
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, ApiError> {
        let token = parts
            .headers
            .get(header::AUTHORIZATION)
            .and_then(|value| value.to_str().ok())
            .and_then(|value| value.strip_prefix("Bearer "))
            .map(str::trim)
            .filter(|token| !token.is_empty())
            .ok_or(ApiError::Unauthorized)?;

        let user = state.auth.current_user(token).await.map_err(|e| {
            tracing::error!("Failed to resolve session: {:#}", e);
            ApiError::Internal(e)
        })?;

        user.map(CurrentUser).ok_or(ApiError::Unauthorized)
    }
}

/// Root endpoint
async fn root() -> &'static str {
    "Retrospace API v0.1.0"
}

// ========== UPLOAD RELAY ==========

fn relay_headers() -> [(HeaderName, &'static str); 2] {
    [
        (header::ACCESS_CONTROL_ALLOW_ORIGIN, "*"),
        (header::ACCESS_CONTROL_ALLOW_HEADERS, RELAY_ALLOWED_HEADERS),
    ]
}

/// CORS preflight for the relay
async fn relay_preflight() -> impl IntoResponse {
    (StatusCode::OK, relay_headers())
}

/// Receive a song file with its metadata, store it and record it
async fn upload_song(
    State(state): State<AppState>,
    multipart: Result<Multipart, MultipartRejection>,
) -> Response {
    tracing::info!("Received upload request");

    let result = match multipart {
        Ok(multipart) => match read_upload_form(multipart).await {
            Ok(form) => state.relay.relay(form).await,
            Err(e) => Err(e),
        },
        Err(rejection) => Err(RelayError::Unexpected(rejection.body_text())),
    };

    match result {
        Ok(song) => {
            let receipt = UploadReceipt {
                message: "Song uploaded successfully".to_string(),
                file_path: song.file_path,
            };
            (StatusCode::OK, relay_headers(), Json(receipt)).into_response()
        }
        Err(e) => {
            let status = match e {
                RelayError::MissingFields(_) => StatusCode::BAD_REQUEST,
                _ => StatusCode::INTERNAL_SERVER_ERROR,
            };
            if let RelayError::Unexpected(details) = &e {
                tracing::error!("Unexpected error: {}", details);
            }
            let body = ErrorResponse {
                error: e.to_string(),
                details: e.details(),
            };
            (status, relay_headers(), Json(body)).into_response()
        }
    }
}

async fn read_upload_form(mut multipart: Multipart) -> Result<UploadForm, RelayError> {
    let unexpected = |e: axum::extract::multipart::MultipartError| {
        RelayError::Unexpected(e.body_text())
    };

    let mut form = UploadForm::default();

    while let Some(field) = multipart.next_field().await.map_err(unexpected)? {
        let name = field.name().unwrap_or("").to_string();

        match name.as_str() {
            "file" => {
                let file_name = field.file_name().unwrap_or("").to_string();
                let content_type = field.content_type().map(str::to_string);
                let data = field.bytes().await.map_err(unexpected)?;
                form.file = Some(UploadedFile {
                    file_name,
                    content_type,
                    data: data.to_vec(),
                });
            }
            "title" => form.title = Some(field.text().await.map_err(unexpected)?),
            "artist" => form.artist = Some(field.text().await.map_err(unexpected)?),
            "userId" => form.user_id = Some(field.text().await.map_err(unexpected)?),
            _ => tracing::debug!("Ignoring multipart field: {}", name),
        }
    }

    Ok(form)
}

// ========== AUTH ENDPOINTS ==========

async fn sign_up(
    State(state): State<AppState>,
    Json(credentials): Json<Credentials>,
) -> Result<Json<User>, ApiError> {
    tracing::debug!("Sign up: {}", credentials.email);
    let user = state.auth.sign_up(credentials).await?;
    Ok(Json(user))
}

async fn sign_in(
    State(state): State<AppState>,
    Json(credentials): Json<Credentials>,
) -> Result<Json<Session>, ApiError> {
    tracing::debug!("Sign in: {}", credentials.email);
    let session = state.auth.sign_in(credentials).await.map_err(|e| {
        tracing::warn!("Sign in failed: {}", e);
        ApiError::from(e)
    })?;
    Ok(Json(session))
}

async fn current_user(CurrentUser(user): CurrentUser) -> Json<User> {
    Json(user)
}

// ========== SONG ENDPOINTS ==========

/// List all songs, newest first
async fn list_songs(State(state): State<AppState>) -> Result<Json<Vec<Song>>, ApiError> {
    tracing::debug!("Fetching all songs");

    let songs = state.songs.list_songs().await.map_err(|e| {
        tracing::error!("Error fetching songs: {:#}", e);
        ApiError::Internal(e)
    })?;

    tracing::debug!("Returning {} songs", songs.len());
    Ok(Json(songs))
}

/// Get a specific song by ID
async fn get_song(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<Song>, ApiError> {
    tracing::debug!("Fetching song with id: {}", id);

    state
        .songs
        .get_song(&id)
        .await
        .map_err(|e| {
            tracing::error!("Error fetching song {}: {:#}", id, e);
            ApiError::Internal(e)
        })?
        .map(Json)
        .ok_or_else(|| {
            tracing::warn!("Song {} not found", id);
            ApiError::NotFound(format!("Song {}", id))
        })
}

// ========== PLAYLIST ENDPOINTS ==========

/// List the caller's playlists
async fn list_playlists(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
) -> Result<Json<Vec<Playlist>>, ApiError> {
    tracing::debug!("Fetching playlists for user {}", user.id);

    let playlists = state.playlists.get_playlists(&user.id).await.map_err(|e| {
        tracing::error!("Error fetching playlists: {:#}", e);
        ApiError::Internal(e)
    })?;

    tracing::debug!("Returning {} playlists", playlists.len());
    Ok(Json(playlists))
}

/// Create a new playlist owned by the caller
async fn create_playlist(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    Json(create): Json<PlaylistCreate>,
) -> Result<Json<Playlist>, ApiError> {
    tracing::debug!("Creating playlist: {}", create.title);

    if create.title.trim().is_empty() {
        return Err(ApiError::BadRequest("Playlist title is required".to_string()));
    }

    let playlist = state
        .playlists
        .create_playlist(&user.id, create)
        .await
        .map_err(|e| {
            tracing::error!("Error creating playlist: {:#}", e);
            ApiError::Internal(e)
        })?;

    tracing::debug!("Successfully created playlist: {}", playlist.id);
    Ok(Json(playlist))
}

/// Songs of a playlist in the order they were added
async fn get_playlist_songs(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<Vec<Song>>, ApiError> {
    tracing::debug!("Fetching songs of playlist: {}", id);

    let exists = state
        .playlists
        .get_playlist(&id)
        .await
        .map_err(ApiError::Internal)?
        .is_some();
    if !exists {
        tracing::debug!("Playlist {} not found", id);
        return Err(ApiError::NotFound(format!("Playlist {}", id)));
    }

    let songs = state.playlists.get_playlist_songs(&id).await.map_err(|e| {
        tracing::error!("Error fetching songs of playlist {}: {:#}", id, e);
        ApiError::Internal(e)
    })?;

    tracing::debug!("Playlist {} has {} songs", id, songs.len());
    Ok(Json(songs))
}

/// Add a song to one of the caller's playlists
async fn add_song_to_playlist(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    Path((playlist_id, song_id)): Path<(String, String)>,
) -> Result<Json<PlaylistSong>, ApiError> {
    tracing::debug!("Adding song {} to playlist {}", song_id, playlist_id);

    let owned = state
        .playlists
        .get_playlist(&playlist_id)
        .await
        .map_err(ApiError::Internal)?
        .is_some_and(|p| p.user_id == user.id);
    if !owned {
        return Err(ApiError::NotFound(format!("Playlist {}", playlist_id)));
    }

    state
        .songs
        .get_song(&song_id)
        .await
        .map_err(ApiError::Internal)?
        .ok_or_else(|| {
            tracing::warn!("Song {} not found", song_id);
            ApiError::NotFound(format!("Song {}", song_id))
        })?;

    let association = state
        .playlists
        .add_song_to_playlist(&playlist_id, &song_id)
        .await
        .map_err(|e| {
            tracing::error!("Error adding song to playlist: {:#}", e);
            ApiError::Internal(e)
        })?
        .ok_or_else(|| ApiError::NotFound(format!("Playlist {}", playlist_id)))?;

    tracing::debug!(
        "Successfully added song {} to playlist {}",
        song_id,
        playlist_id
    );
    Ok(Json(association))
}

// ========== STORAGE ENDPOINTS ==========

/// Issue a time-limited URL for reading a stored song
async fn sign_object_url(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    Json(request): Json<SignRequest>,
) -> Result<Json<SignedUrl>, ApiError> {
    tracing::debug!("User {} requests signed URL for {}", user.id, request.path);

    validate_key(&request.path)?;
    if request.expires_in.is_some_and(|secs| secs > MAX_URL_TTL.as_secs()) {
        return Err(ApiError::BadRequest(format!(
            "expiresIn must be at most {} seconds",
            MAX_URL_TTL.as_secs()
        )));
    }
    state.store.head(&request.path).await?;

    let ttl = request
        .expires_in
        .filter(|secs| *secs > 0)
        .map(Duration::from_secs);
    let (token, expires_at) = state.signer.sign(state.store.bucket(), &request.path, ttl);

    Ok(Json(SignedUrl {
        signed_url: format!(
            "{}/storage/object/sign/{}/{}?token={}",
            state.public_url,
            state.store.bucket(),
            request.path,
            token
        ),
        expires_at,
    }))
}

#[derive(Debug, Deserialize)]
struct TokenQuery {
    token: String,
}

/// Stream a stored object to the holder of a valid signed URL, with HTTP
/// Range support
async fn download_object(
    State(state): State<AppState>,
    Path((bucket, key)): Path<(String, String)>,
    Query(query): Query<TokenQuery>,
    headers: HeaderMap,
) -> Result<Response, ApiError> {
    if bucket != state.store.bucket() {
        return Err(ApiError::NotFound(format!("Bucket {}", bucket)));
    }

    state.signer.verify(&bucket, &key, &query.token).map_err(|e| {
        tracing::warn!("Rejected signed URL for {}/{}: {}", bucket, key, e);
        ApiError::Forbidden(e)
    })?;

    let info = state.store.head(&key).await?;
    let file_size = info.size;

    let range = headers
        .get(header::RANGE)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| parse_range(value, file_size));

    match range {
        Some((start, end)) => {
            let length = end - start + 1;
            let reader = state.store.read(&key, start, length).await?;

            tracing::debug!(
                "Streaming range {}-{}/{} ({} bytes)",
                start,
                end,
                file_size,
                length
            );

            Ok((
                StatusCode::PARTIAL_CONTENT,
                [
                    (header::CONTENT_TYPE, info.content_type),
                    (header::CONTENT_LENGTH, length.to_string()),
                    (header::ACCEPT_RANGES, "bytes".to_string()),
                    (
                        header::CONTENT_RANGE,
                        format!("bytes {}-{}/{}", start, end, file_size),
                    ),
                ],
                Body::from_stream(ReaderStream::new(reader)),
            )
                .into_response())
        }
        None => {
            let reader = state.store.read(&key, 0, file_size).await?;

            tracing::debug!("Streaming {} bytes for {}", file_size, key);

            Ok((
                StatusCode::OK,
                [
                    (header::CONTENT_TYPE, info.content_type),
                    (header::CONTENT_LENGTH, file_size.to_string()),
                    (header::ACCEPT_RANGES, "bytes".to_string()),
                ],
                Body::from_stream(ReaderStream::new(reader)),
            )
                .into_response())
        }
    }
}

/// Parse Range header value
/// Returns (start, end) tuple if valid
fn parse_range(range_str: &str, file_size: u64) -> Option<(u64, u64)> {
    // Expected format: "bytes=start-end" or "bytes=start-" or "bytes=-end"
    let range_part = range_str.strip_prefix("bytes=")?;
    let (start_str, end_str) = range_part.split_once('-')?;
    let (start_str, end_str) = (start_str.trim(), end_str.trim());

    match (start_str.is_empty(), end_str.is_empty()) {
        (false, false) => {
            let start = start_str.parse::<u64>().ok()?;
            let end = end_str.parse::<u64>().ok()?;
            if start > end || start >= file_size {
                return None;
            }
            Some((start, end.min(file_size - 1)))
        }
        (false, true) => {
            let start = start_str.parse::<u64>().ok()?;
            if start >= file_size {
                return None;
            }
            Some((start, file_size - 1))
        }
        (true, false) => {
            // Suffix range: the last N bytes
            let suffix_length = end_str.parse::<u64>().ok()?;
            if suffix_length == 0 || suffix_length > file_size {
                return None;
            }
            Some((file_size - suffix_length, file_size - 1))
        }
        (true, true) => None,
    }
}
