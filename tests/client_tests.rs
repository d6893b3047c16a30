use std::sync::Arc;

use retrospace::app::{AudioFile, AuthForm, AuthMode, CreatePlaylistDialog, LibraryPage, UploadDialog};
use retrospace::client::{ApiClient, Backend, ClientError};
use retrospace::config::ServiceConfig;
use retrospace::notify::{NoticeQueue, Severity};
use retrospace::player::{MediaElement, PlayerState};
use retrospace::server::{self, AppState};
use tempfile::TempDir;

#[derive(Default)]
struct RecordingElement {
    source: Option<String>,
    playing: bool,
}

impl MediaElement for RecordingElement {
    fn set_source(&mut self, url: &str) {
        self.source = Some(url.to_string());
    }
    fn rewind(&mut self) {}
    fn play(&mut self) {
        self.playing = true;
    }
    fn pause(&mut self) {
        self.playing = false;
    }
    fn set_volume(&mut self, _: f32) {}
}

/// Start a server on an ephemeral port and return its base URL.
async fn spawn_server() -> (String, TempDir) {
    let dir = tempfile::tempdir().unwrap();
    let mut config = ServiceConfig::new(dir.path());
    config.signing_secret = Some("client-test-secret".to_string());

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let base_url = format!("http://{}", listener.local_addr().unwrap());

    let mut state = AppState::open(&config, base_url.clone()).await.unwrap();
    state.auth = state.auth.with_cost(4);
    let app = server::create_router(state);

    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    (base_url, dir)
}

async fn sign_in(backend: &ApiClient, notices: &NoticeQueue, email: &str) {
    let mut form = AuthForm {
        email: email.to_string(),
        password: "hunter22".to_string(),
        mode: AuthMode::SignUp,
    };
    assert!(form.submit(backend, notices).await.is_none());
    form.toggle_mode();
    assert!(form.submit(backend, notices).await.is_some());
    notices.drain();
}

#[tokio::test]
async fn upload_then_play_through_signed_url() {
    let (base_url, _dir) = spawn_server().await;
    let backend = Arc::new(ApiClient::new(&base_url));
    let notices = Arc::new(NoticeQueue::new());
    sign_in(&backend, &notices, "fan@example.com").await;

    let mut page = LibraryPage::new(backend.clone(), notices.clone(), RecordingElement::default());
    assert!(page.songs().await.is_empty());

    let mut dialog = UploadDialog::new();
    dialog.title = "Neon".to_string();
    dialog.artist = "Rider".to_string();
    dialog.file = Some(AudioFile {
        file_name: "track.mp3".to_string(),
        content_type: Some("audio/mpeg".to_string()),
        data: b"not really an mp3".to_vec(),
    });
    let receipt = page.upload(&mut dialog).await.unwrap();
    assert_eq!(notices.drain()[0].title, "Success!");

    let song = page.songs().await[0].clone();
    assert_eq!(song.file_path, receipt.file_path);
    assert_eq!(song.title, "Neon");
    assert!(song.file_path.ends_with(".mp3"));

    assert!(page.select_track(&song.id).await);
    assert_eq!(page.player().state(), PlayerState::Paused);
    let source = page.player().element().source.clone().unwrap();
    assert!(source.starts_with(&format!("{}/storage/object/sign/songs/", base_url)));

    let bytes = backend.http().get(&source).send().await.unwrap().bytes().await.unwrap();
    assert_eq!(&bytes[..], b"not really an mp3");

    assert_eq!(page.player_mut().toggle(), PlayerState::Playing);
    assert!(page.player().element().playing);
}

#[tokio::test]
async fn upload_without_session_is_refused_client_side() {
    let (base_url, _dir) = spawn_server().await;
    let backend = Arc::new(ApiClient::new(&base_url));
    let notices = Arc::new(NoticeQueue::new());
    let mut page = LibraryPage::new(backend, notices.clone(), RecordingElement::default());

    let mut dialog = UploadDialog::new();
    dialog.title = "Neon".to_string();
    dialog.artist = "Rider".to_string();
    dialog.file = Some(AudioFile {
        file_name: "track.mp3".to_string(),
        content_type: None,
        data: b"abc".to_vec(),
    });

    assert!(page.upload(&mut dialog).await.is_none());
    let notice = &notices.drain()[0];
    assert_eq!(notice.title, "Authentication required");
    assert_eq!(notice.severity, Severity::Error);
    assert!(page.songs().await.is_empty());
}

#[tokio::test]
async fn playlist_round_trip_over_http() {
    let (base_url, _dir) = spawn_server().await;
    let backend = Arc::new(ApiClient::new(&base_url));
    let notices = Arc::new(NoticeQueue::new());
    sign_in(&backend, &notices, "curator@example.com").await;

    let mut page = LibraryPage::new(backend.clone(), notices.clone(), RecordingElement::default());

    let mut dialog = CreatePlaylistDialog::new();
    dialog.title = "Late night".to_string();
    dialog.description = "quiet ones".to_string();
    let playlist = page.create_playlist(&mut dialog).await.unwrap();
    assert_eq!(playlist.description.as_deref(), Some("quiet ones"));
    assert_eq!(notices.drain()[0].description, "Playlist created successfully");

    let cards = page.playlists().await;
    assert_eq!(cards.len(), 1);
    assert!(page.play_playlist(&cards[0]).await.is_none());
    let empty = notices.drain();
    assert_eq!(empty.len(), 1);
    assert_eq!(empty[0].title, "No songs in playlist");

    let user = backend.current_user().await.unwrap().unwrap();
    let mut upload = UploadDialog::new();
    upload.title = "Glow".to_string();
    upload.artist = "Rider".to_string();
    upload.file = Some(AudioFile {
        file_name: "glow.ogg".to_string(),
        content_type: Some("audio/ogg".to_string()),
        data: b"ogg".to_vec(),
    });
    assert!(page.upload(&mut upload).await.is_some());
    let song = page.songs().await[0].clone();
    assert_eq!(song.user_id, user.id);

    backend
        .add_song_to_playlist(&playlist.id, &song.id)
        .await
        .unwrap();
    let songs = page.play_playlist(&cards[0]).await.unwrap();
    assert_eq!(songs.len(), 1);
    assert_eq!(songs[0].id, song.id);
}

#[tokio::test]
async fn expired_session_reads_as_signed_out() {
    let (base_url, _dir) = spawn_server().await;
    let backend = ApiClient::new(&base_url).with_token(Some("stale-token".to_string()));

    assert!(backend.current_user().await.unwrap().is_none());
    assert!(matches!(
        backend.list_playlists().await,
        Err(ClientError::AuthRequired)
    ));
}
