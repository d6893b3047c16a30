//! Application state for the song library page and its dialogs.
//!
//! Every component talks to the service through an injected [`Backend`] and
//! reports outcomes through a [`Notifier`]; none of them fail hard, so the
//! page stays usable after any single error.

use std::sync::Arc;

use crate::client::{Backend, ClientError, SongUpload};
use crate::model::{Credentials, Playlist, PlaylistCreate, Session, Song, UploadReceipt, User};
use crate::notify::{Notice, Notifier};
use crate::player::{MediaElement, Player};
use crate::search::filter_songs;

/// An audio file picked for upload.
#[derive(Debug, Clone)]
pub struct AudioFile {
    pub file_name: String,
    pub content_type: Option<String>,
    pub data: Vec<u8>,
}

/// Collects title, artist and file, then sends them to the upload relay.
#[derive(Debug, Default)]
pub struct UploadDialog {
    pub title: String,
    pub artist: String,
    pub file: Option<AudioFile>,
    uploading: bool,
}

impl UploadDialog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_uploading(&self) -> bool {
        self.uploading
    }

    /// Upload the song. Returns the relay's receipt on success, after which
    /// the fields are reset.
    pub async fn submit<B: Backend + ?Sized>(
        &mut self,
        backend: &B,
        notifier: &dyn Notifier,
    ) -> Option<UploadReceipt> {
        if self.title.is_empty() || self.artist.is_empty() || self.file.is_none() {
            notifier.notify(Notice::error(
                "Missing information",
                "Please fill in all fields and select a file.",
            ));
            return None;
        }

        self.uploading = true;
        let result = self.upload(backend).await;
        self.uploading = false;

        match result {
            Ok(Some(receipt)) => {
                notifier.notify(Notice::info("Success!", "Your song has been uploaded."));
                self.title.clear();
                self.artist.clear();
                self.file = None;
                Some(receipt)
            }
            Ok(None) => {
                notifier.notify(Notice::error(
                    "Authentication required",
                    "Please sign in to upload songs.",
                ));
                None
            }
            Err(e) => {
                tracing::error!("Upload error: {}", e);
                notifier.notify(Notice::error(
                    "Upload failed",
                    "There was an error uploading your song. Please try again.",
                ));
                None
            }
        }
    }

    /// `Ok(None)` when nobody is signed in.
    async fn upload<B: Backend + ?Sized>(
        &self,
        backend: &B,
    ) -> Result<Option<UploadReceipt>, ClientError> {
        let Some(user) = backend.current_user().await? else {
            return Ok(None);
        };
        let Some(file) = self.file.clone() else {
            return Ok(None);
        };

        let receipt = backend
            .upload_song(SongUpload {
                title: self.title.clone(),
                artist: self.artist.clone(),
                user_id: user.id,
                file_name: file.file_name,
                content_type: file.content_type,
                data: file.data,
            })
            .await?;

        tracing::info!("Uploaded song stored at {}", receipt.file_path);
        Ok(Some(receipt))
    }
}

#[derive(Debug, Default)]
pub struct CreatePlaylistDialog {
    pub title: String,
    pub description: String,
}

impl CreatePlaylistDialog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create the playlist. A blank title does nothing.
    pub async fn submit<B: Backend + ?Sized>(
        &mut self,
        backend: &B,
        notifier: &dyn Notifier,
    ) -> Option<Playlist> {
        let title = self.title.trim();
        if title.is_empty() {
            return None;
        }
        let description = Some(self.description.trim())
            .filter(|d| !d.is_empty())
            .map(str::to_string);
        let create = PlaylistCreate {
            title: title.to_string(),
            description,
        };

        match Self::create(backend, create).await {
            Ok(playlist) => {
                notifier.notify(Notice::info("Success", "Playlist created successfully"));
                self.title.clear();
                self.description.clear();
                Some(playlist)
            }
            Err(e) => {
                notifier.notify(Notice::error("Error", e.to_string()));
                None
            }
        }
    }

    async fn create<B: Backend + ?Sized>(
        backend: &B,
        create: PlaylistCreate,
    ) -> Result<Playlist, ClientError> {
        if backend.current_user().await?.is_none() {
            return Err(ClientError::AuthRequired);
        }
        backend.create_playlist(create).await
    }
}

/// A playlist as shown in the list, with its play action.
#[derive(Debug, Clone)]
pub struct PlaylistCard {
    pub playlist: Playlist,
}

impl PlaylistCard {
    pub fn new(playlist: Playlist) -> Self {
        Self { playlist }
    }

    /// Fetch the playlist's songs, oldest addition first, and hand them to
    /// the caller. An empty playlist yields `None` and a single notice.
    pub async fn play<B: Backend + ?Sized>(
        &self,
        backend: &B,
        notifier: &dyn Notifier,
    ) -> Option<Vec<Song>> {
        match backend.playlist_songs(&self.playlist.id).await {
            Ok(songs) if songs.is_empty() => {
                notifier.notify(Notice::info(
                    "No songs in playlist",
                    "Add some songs to this playlist to start playing",
                ));
                None
            }
            Ok(songs) => Some(songs),
            Err(e) => {
                tracing::error!("Failed to load playlist {}: {}", self.playlist.id, e);
                notifier.notify(Notice::error("Error", "Failed to load playlist songs"));
                None
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AuthMode {
    #[default]
    SignIn,
    SignUp,
}

#[derive(Debug, Default)]
pub struct AuthForm {
    pub email: String,
    pub password: String,
    pub mode: AuthMode,
}

impl AuthForm {
    pub fn toggle_mode(&mut self) {
        self.mode = match self.mode {
            AuthMode::SignIn => AuthMode::SignUp,
            AuthMode::SignUp => AuthMode::SignIn,
        };
    }

    /// Sign up or sign in. Returns the session on a successful sign-in.
    pub async fn submit<B: Backend + ?Sized>(
        &self,
        backend: &B,
        notifier: &dyn Notifier,
    ) -> Option<Session> {
        let credentials = Credentials {
            email: self.email.clone(),
            password: self.password.clone(),
        };

        match self.mode {
            AuthMode::SignUp => match backend.sign_up(credentials).await {
                Ok(user) => {
                    notifier.notify(Notice::info(
                        "Success!",
                        format!("Account created for {}. You can sign in now.", user.email),
                    ));
                    None
                }
                Err(e) => {
                    notifier.notify(Notice::error("Error", e.to_string()));
                    None
                }
            },
            AuthMode::SignIn => match backend.sign_in(credentials).await {
                Ok(session) => {
                    notifier.notify(Notice::info("Welcome back!", "Successfully signed in."));
                    Some(session)
                }
                Err(e) => {
                    notifier.notify(Notice::error("Error", e.to_string()));
                    None
                }
            },
        }
    }
}

/// The main page: search box, cached song list, selected track and player.
pub struct LibraryPage<B: Backend, E: MediaElement> {
    backend: Arc<B>,
    notifier: Arc<dyn Notifier>,
    player: Player<E>,
    search_query: String,
    songs: Option<Vec<Song>>,
}

impl<B: Backend, E: MediaElement> LibraryPage<B, E> {
    pub fn new(backend: Arc<B>, notifier: Arc<dyn Notifier>, element: E) -> Self {
        Self {
            backend,
            notifier,
            player: Player::new(element),
            search_query: String::new(),
            songs: None,
        }
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    pub fn player(&self) -> &Player<E> {
        &self.player
    }

    pub fn player_mut(&mut self) -> &mut Player<E> {
        &mut self.player
    }

    pub fn search_query(&self) -> &str {
        &self.search_query
    }

    pub fn set_search_query(&mut self, query: impl Into<String>) {
        self.search_query = query.into();
    }

    pub async fn current_user(&self) -> Option<User> {
        match self.backend.current_user().await {
            Ok(user) => user,
            Err(e) => {
                self.notifier.notify(Notice::error("Error", e.to_string()));
                None
            }
        }
    }

    /// Drop the cached song list; the next read fetches it again.
    pub fn invalidate_songs(&mut self) {
        self.songs = None;
    }

    /// All songs, fetched once and then served from the cache.
    pub async fn songs(&mut self) -> &[Song] {
        if self.songs.is_none() {
            match self.backend.list_songs().await {
                Ok(songs) => {
                    tracing::debug!("Loaded {} songs", songs.len());
                    self.songs = Some(songs);
                }
                Err(e) => {
                    self.notifier
                        .notify(Notice::error("Error", format!("Failed to load songs: {}", e)));
                    return &[];
                }
            }
        }
        self.songs.as_deref().unwrap_or_default()
    }

    /// Songs matching the current search query.
    pub async fn visible_songs(&mut self) -> Vec<Song> {
        let query = self.search_query.clone();
        let songs = self.songs().await;
        filter_songs(&query, songs).into_iter().cloned().collect()
    }

    /// Make `song_id` the selected track and bind it to the player.
    pub async fn select_track(&mut self, song_id: &str) -> bool {
        let song = self.songs().await.iter().find(|s| s.id == song_id).cloned();

        let Some(song) = song else {
            self.notifier
                .notify(Notice::error("Error", format!("Song {} not found", song_id)));
            return false;
        };

        self.player
            .select(song, self.backend.as_ref(), self.notifier.as_ref())
            .await
    }

    pub fn selected_track(&self) -> Option<&Song> {
        self.player.current()
    }

    /// Submit the upload dialog; a successful upload invalidates the cached
    /// song list.
    pub async fn upload(&mut self, dialog: &mut UploadDialog) -> Option<UploadReceipt> {
        let receipt = dialog
            .submit(self.backend.as_ref(), self.notifier.as_ref())
            .await;
        if receipt.is_some() {
            self.invalidate_songs();
        }
        receipt
    }

    pub async fn create_playlist(&mut self, dialog: &mut CreatePlaylistDialog) -> Option<Playlist> {
        dialog
            .submit(self.backend.as_ref(), self.notifier.as_ref())
            .await
    }

    pub async fn playlists(&self) -> Vec<PlaylistCard> {
        match self.backend.list_playlists().await {
            Ok(playlists) => playlists.into_iter().map(PlaylistCard::new).collect(),
            Err(e) => {
                self.notifier.notify(Notice::error("Error", e.to_string()));
                Vec::new()
            }
        }
    }

    pub async fn play_playlist(&self, card: &PlaylistCard) -> Option<Vec<Song>> {
        card.play(self.backend.as_ref(), self.notifier.as_ref()).await
    }
}

impl<B: Backend, E: MediaElement> Drop for LibraryPage<B, E> {
    fn drop(&mut self) {
        self.player.clear();
    }
}
