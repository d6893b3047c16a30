use anyhow::{Context, Result};
use clap::Parser;
use retrospace::app::{AudioFile, AuthForm, AuthMode, CreatePlaylistDialog, LibraryPage, UploadDialog};
use retrospace::client::{ApiClient, Backend};
use retrospace::notify::{NoticeQueue, Severity};
use retrospace::player::{MediaElement, PlayerState};
use rodio::{Decoder, OutputStream, OutputStreamHandle, Sink};
use std::io::Cursor;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, BufReader};

#[derive(Parser)]
#[command(name = "retrospace-client")]
#[command(about = "Retrospace CLI Client", long_about = None)]
struct Cli {
    /// Server URL
    #[arg(short, long, env = "RETROSPACE_SERVER", default_value = "http://localhost:3000")]
    server: String,

    /// Session token from `signin`
    #[arg(short, long, env = "RETROSPACE_TOKEN", hide_env_values = true)]
    token: Option<String>,

    /// Command to execute
    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Parser)]
enum Command {
    /// Create an account
    Signup { email: String, password: String },
    /// Sign in and print a session token
    Signin { email: String, password: String },
    /// Show the signed-in user
    Whoami,
    /// List songs, optionally filtered by title or artist
    List {
        #[arg(short, long, default_value = "")]
        search: String,
    },
    /// Upload a song file
    Upload {
        file: PathBuf,
        #[arg(short, long)]
        title: String,
        #[arg(short, long)]
        artist: String,
    },
    /// Play a song by ID
    Play {
        id: String,
        /// Volume, 0-100
        #[arg(short, long, default_value_t = 100.0)]
        volume: f32,
    },
    /// Playlist management commands
    #[command(subcommand)]
    Playlist(PlaylistCommand),
}

#[derive(Parser)]
enum PlaylistCommand {
    /// List your playlists
    List,
    /// Create a new playlist
    Create {
        /// Playlist title
        title: String,
        /// Playlist description
        #[arg(short, long, default_value = "")]
        description: String,
    },
    /// Add songs to a playlist
    Add {
        /// Playlist ID
        playlist_id: String,
        /// Song IDs to add
        song_ids: Vec<String>,
    },
    /// Show the songs of a playlist in play order
    Songs {
        /// Playlist ID
        id: String,
    },
}

/// Media element backed by a rodio sink. The source is downloaded lazily
/// when playback first needs it.
struct RodioElement {
    http: reqwest::Client,
    _stream: OutputStream,
    _handle: OutputStreamHandle,
    sink: Sink,
    source: Option<String>,
    loaded: Option<String>,
}

impl RodioElement {
    fn new(http: reqwest::Client) -> Result<Self> {
        let (stream, handle) =
            OutputStream::try_default().context("Failed to open audio output")?;
        let sink = Sink::try_new(&handle).context("Failed to create audio sink")?;
        sink.pause();
        Ok(Self {
            http,
            _stream: stream,
            _handle: handle,
            sink,
            source: None,
            loaded: None,
        })
    }

    /// Download and decode the bound source if it is not loaded yet.
    async fn buffer(&mut self) -> Result<()> {
        let Some(url) = self.source.clone() else {
            return Ok(());
        };
        if self.loaded.as_deref() == Some(url.as_str()) {
            return Ok(());
        }

        let response = self
            .http
            .get(&url)
            .send()
            .await
            .context("Failed to stream audio")?;
        if !response.status().is_success() {
            anyhow::bail!("Server returned error: {}", response.status());
        }
        let bytes = response.bytes().await.context("Failed to read audio data")?;

        let decoder =
            Decoder::new(Cursor::new(bytes.to_vec())).context("Failed to decode audio")?;
        self.sink.append(decoder);
        self.loaded = Some(url);
        Ok(())
    }

    fn finished(&self) -> bool {
        self.loaded.is_some() && self.sink.empty()
    }
}

impl MediaElement for RodioElement {
    fn set_source(&mut self, url: &str) {
        self.sink.clear();
        self.source = Some(url.to_string());
        self.loaded = None;
    }

    fn rewind(&mut self) {
        if let Err(e) = self.sink.try_seek(Duration::ZERO) {
            tracing::debug!("Rewind not supported: {}", e);
        }
    }

    fn play(&mut self) {
        self.sink.play();
    }

    fn pause(&mut self) {
        self.sink.pause();
    }

    fn set_volume(&mut self, volume: f32) {
        self.sink.set_volume(volume);
    }
}

fn print_notices(notices: &NoticeQueue) {
    for notice in notices.drain() {
        match notice.severity {
            Severity::Info => println!("{}: {}", notice.title, notice.description),
            Severity::Error => eprintln!("{}: {}", notice.title, notice.description),
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_max_level(tracing::Level::WARN)
        .init();

    let cli = Cli::parse();
    let backend = Arc::new(ApiClient::new(&cli.server).with_token(cli.token));
    let notices = Arc::new(NoticeQueue::new());

    let result = match cli.command.unwrap_or(Command::List {
        search: String::new(),
    }) {
        Command::Signup { email, password } => {
            auth(&backend, &notices, AuthMode::SignUp, email, password).await
        }
        Command::Signin { email, password } => {
            auth(&backend, &notices, AuthMode::SignIn, email, password).await
        }
        Command::Whoami => whoami(&backend).await,
        Command::List { search } => list_songs(backend, notices.clone(), &search).await,
        Command::Upload {
            file,
            title,
            artist,
        } => upload(backend, notices.clone(), file, title, artist).await,
        Command::Play { id, volume } => play(backend, notices.clone(), &id, volume).await,
        Command::Playlist(cmd) => handle_playlist_command(backend, notices.clone(), cmd).await,
    };

    print_notices(&notices);
    result
}

async fn auth(
    backend: &ApiClient,
    notices: &NoticeQueue,
    mode: AuthMode,
    email: String,
    password: String,
) -> Result<()> {
    let form = AuthForm {
        email,
        password,
        mode,
    };

    if let Some(session) = form.submit(backend, notices).await {
        println!("Signed in as {}", session.user.email);
        println!("export RETROSPACE_TOKEN={}", session.access_token);
    }
    Ok(())
}

async fn whoami(backend: &ApiClient) -> Result<()> {
    match backend.current_user().await? {
        Some(user) => {
            println!("Email:   {}", user.email);
            println!("ID:      {}", user.id);
            println!("Since:   {}", user.created_at);
        }
        None => println!("Not signed in."),
    }
    Ok(())
}

/// Placeholder element for commands that never play audio.
struct NoOutput;

impl MediaElement for NoOutput {
    fn set_source(&mut self, _: &str) {}
    fn rewind(&mut self) {}
    fn play(&mut self) {}
    fn pause(&mut self) {}
    fn set_volume(&mut self, _: f32) {}
}

async fn list_songs(backend: Arc<ApiClient>, notices: Arc<NoticeQueue>, search: &str) -> Result<()> {
    let mut page = LibraryPage::new(backend, notices, NoOutput);
    page.set_search_query(search);
    let songs = page.visible_songs().await;

    if songs.is_empty() {
        println!("No songs found.");
        return Ok(());
    }

    println!("Songs ({}):", songs.len());
    println!("{:-<80}", "");

    for (idx, song) in songs.iter().enumerate() {
        println!("{}. {} - {}", idx + 1, song.artist, song.title);
        println!("   ID: {}", song.id);
        println!("   File: {}", song.file_path);
        println!("   Uploaded: {}", song.created_at);
        println!();
    }

    Ok(())
}

async fn upload(
    backend: Arc<ApiClient>,
    notices: Arc<NoticeQueue>,
    file: PathBuf,
    title: String,
    artist: String,
) -> Result<()> {
    let data = tokio::fs::read(&file)
        .await
        .with_context(|| format!("Failed to read {}", file.display()))?;

    let content_type = match file.extension().and_then(|s| s.to_str()) {
        Some("flac") => Some("audio/flac"),
        Some("mp3") => Some("audio/mpeg"),
        Some("ogg") => Some("audio/ogg"),
        Some("m4a") => Some("audio/mp4"),
        Some("wav") => Some("audio/wav"),
        _ => None,
    };

    let mut dialog = UploadDialog::new();
    dialog.title = title;
    dialog.artist = artist;
    dialog.file = Some(AudioFile {
        file_name: file
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_default(),
        content_type: content_type.map(str::to_string),
        data,
    });

    let mut page = LibraryPage::new(backend, notices, NoOutput);
    if let Some(receipt) = page.upload(&mut dialog).await {
        let song = page
            .songs()
            .await
            .iter()
            .find(|song| song.file_path == receipt.file_path)
            .cloned();
        match song {
            Some(song) => println!("Uploaded: {} - {} ({})", song.artist, song.title, song.id),
            None => println!("Uploaded to {}", receipt.file_path),
        }
    }
    Ok(())
}

async fn play(backend: Arc<ApiClient>, notices: Arc<NoticeQueue>, id: &str, volume: f32) -> Result<()> {
    let element = RodioElement::new(backend.http().clone())?;
    let mut page = LibraryPage::new(backend, notices.clone(), element);
    page.player_mut().set_volume(volume);

    if !page.select_track(id).await {
        return Ok(());
    }
    page.player_mut().element_mut().buffer().await?;

    if let Some(song) = page.selected_track() {
        println!("Now Playing:");
        println!("{:-<80}", "");
        println!("Title:  {}", song.title);
        println!("Artist: {}", song.artist);
        println!("{:-<80}", "");
    }
    println!("Commands: [p]lay/pause, [v]olume <0-100>, [q]uit");

    page.player_mut().toggle();

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut ticker = tokio::time::interval(Duration::from_millis(500));

    loop {
        tokio::select! {
            line = lines.next_line() => {
                let Some(line) = line? else { break };
                let mut parts = line.split_whitespace();
                match parts.next() {
                    Some("p") => {
                        let state = page.player_mut().toggle();
                        println!("{}", if state == PlayerState::Playing { "Playing" } else { "Paused" });
                    }
                    Some("v") => match parts.next().and_then(|v| v.parse::<f32>().ok()) {
                        Some(v) => {
                            page.player_mut().set_volume(v);
                            println!("Volume: {:.0}", page.player().volume());
                        }
                        None => println!("Usage: v <0-100>"),
                    },
                    Some("q") => break,
                    _ => {}
                }
                print_notices(&notices);
            }
            _ = ticker.tick() => {
                if page.player().element().finished() {
                    println!("Playback finished");
                    break;
                }
            }
        }
    }

    page.player_mut().clear();
    Ok(())
}

async fn handle_playlist_command(
    backend: Arc<ApiClient>,
    notices: Arc<NoticeQueue>,
    cmd: PlaylistCommand,
) -> Result<()> {
    let mut page = LibraryPage::new(backend, notices, NoOutput);

    match cmd {
        PlaylistCommand::List => {
            let cards = page.playlists().await;
            if cards.is_empty() {
                println!("No playlists found.");
                return Ok(());
            }

            println!("Playlists ({}):", cards.len());
            println!("{:-<80}", "");
            for card in cards {
                println!("{}", card.playlist.title);
                if let Some(desc) = &card.playlist.description {
                    println!("   Description: {}", desc);
                }
                println!("   ID: {}", card.playlist.id);
                println!("   Created: {}", card.playlist.created_at);
            }
        }
        PlaylistCommand::Create { title, description } => {
            let mut dialog = CreatePlaylistDialog::new();
            dialog.title = title;
            dialog.description = description;
            if let Some(playlist) = page.create_playlist(&mut dialog).await {
                println!("Created playlist {} ({})", playlist.title, playlist.id);
            }
        }
        PlaylistCommand::Add {
            playlist_id,
            song_ids,
        } => {
            for song_id in song_ids {
                match page.backend().add_song_to_playlist(&playlist_id, &song_id).await {
                    Ok(association) => println!("Added {} at {}", song_id, association.added_at),
                    Err(e) => eprintln!("Failed to add {}: {}", song_id, e),
                }
            }
        }
        PlaylistCommand::Songs { id } => {
            let card = page
                .playlists()
                .await
                .into_iter()
                .find(|card| card.playlist.id == id);
            let Some(card) = card else {
                println!("Playlist {} not found.", id);
                return Ok(());
            };

            if let Some(songs) = page.play_playlist(&card).await {
                println!("{} ({} songs):", card.playlist.title, songs.len());
                for (idx, song) in songs.iter().enumerate() {
                    println!("{}. {} - {} ({})", idx + 1, song.artist, song.title, song.id);
                }
            }
        }
    }

    Ok(())
}
