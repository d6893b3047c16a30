//! Playback state for a single track bound to a media element.
//!
//! Selecting a track is split in two: [`Player::begin_select`] records the
//! selection and hands out a ticket, and [`Player::complete_select`] binds the
//! resolved URL. Each selection bumps a generation counter, so a URL that
//! resolves after a newer selection (or after [`Player::clear`]) is discarded
//! instead of replacing the current source.

use std::time::Duration;

use async_trait::async_trait;

use crate::client::ClientError;
use crate::model::Song;
use crate::notify::{Notice, Notifier};
use crate::signing::DEFAULT_URL_TTL;

pub const MAX_VOLUME: f32 = 100.0;

/// The playback primitives of an audio output.
pub trait MediaElement {
    fn set_source(&mut self, url: &str);
    /// Move the playhead back to the start.
    fn rewind(&mut self);
    fn play(&mut self);
    fn pause(&mut self);
    /// Volume in `0.0..=1.0`.
    fn set_volume(&mut self, volume: f32);
}

/// Resolves a storage path into a short-lived URL the element can load.
#[async_trait]
pub trait SourceResolver: Send + Sync {
    async fn signed_url(&self, file_path: &str, expires_in: Duration) -> Result<String, ClientError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlayerState {
    Idle,
    Paused,
    Playing,
}

/// Proof of a pending selection. Only the most recent ticket can bind.
#[derive(Debug)]
pub struct SelectTicket {
    generation: u64,
    pub song_id: String,
    pub file_path: String,
}

pub struct Player<E: MediaElement> {
    element: E,
    state: PlayerState,
    volume: f32,
    current: Option<Song>,
    source: Option<String>,
    generation: u64,
    url_ttl: Duration,
}

impl<E: MediaElement> Player<E> {
    pub fn new(mut element: E) -> Self {
        element.set_volume(1.0);
        Self {
            element,
            state: PlayerState::Idle,
            volume: MAX_VOLUME,
            current: None,
            source: None,
            generation: 0,
            url_ttl: DEFAULT_URL_TTL,
        }
    }

    pub fn with_url_ttl(mut self, ttl: Duration) -> Self {
        self.url_ttl = ttl;
        self
    }

    pub fn state(&self) -> PlayerState {
        self.state
    }

    pub fn current(&self) -> Option<&Song> {
        self.current.as_ref()
    }

    /// URL currently bound to the element, if any.
    pub fn source(&self) -> Option<&str> {
        self.source.as_deref()
    }

    pub fn volume(&self) -> f32 {
        self.volume
    }

    pub fn element(&self) -> &E {
        &self.element
    }

    pub fn element_mut(&mut self) -> &mut E {
        &mut self.element
    }

    /// Record `song` as the selection and interrupt whatever was playing.
    /// Nothing is loaded, and the state stays `Idle`, until the ticket is
    /// completed.
    pub fn begin_select(&mut self, song: Song) -> SelectTicket {
        self.generation += 1;

        if self.state == PlayerState::Playing {
            self.element.pause();
        }
        self.state = PlayerState::Idle;
        self.source = None;

        let ticket = SelectTicket {
            generation: self.generation,
            song_id: song.id.clone(),
            file_path: song.file_path.clone(),
        };
        self.current = Some(song);

        tracing::debug!(
            "Selected track {} (generation {})",
            ticket.song_id,
            ticket.generation
        );
        ticket
    }

    /// Bind a resolved URL. Returns `false` (and changes nothing) when the
    /// ticket has been superseded.
    pub fn complete_select(&mut self, ticket: SelectTicket, url: String) -> bool {
        if ticket.generation != self.generation {
            tracing::debug!(
                "Discarding stale source for track {} (generation {} < {})",
                ticket.song_id,
                ticket.generation,
                self.generation
            );
            return false;
        }

        self.element.set_source(&url);
        self.element.rewind();
        self.element.pause();
        self.state = PlayerState::Paused;
        self.source = Some(url);
        true
    }

    /// Select `song` and bind its signed URL in one step.
    pub async fn select(
        &mut self,
        song: Song,
        resolver: &dyn SourceResolver,
        notifier: &dyn Notifier,
    ) -> bool {
        let ticket = self.begin_select(song);

        match resolver.signed_url(&ticket.file_path, self.url_ttl).await {
            Ok(url) => self.complete_select(ticket, url),
            Err(e) => {
                if ticket.generation == self.generation {
                    tracing::error!("Failed to resolve source for {}: {}", ticket.song_id, e);
                    notifier.notify(Notice::error("Playback error", "Failed to load track"));
                }
                false
            }
        }
    }

    /// Switch between paused and playing. Without a bound source this does
    /// nothing.
    pub fn toggle(&mut self) -> PlayerState {
        if self.source.is_none() {
            return self.state;
        }

        self.state = match self.state {
            PlayerState::Playing => {
                self.element.pause();
                PlayerState::Paused
            }
            PlayerState::Paused | PlayerState::Idle => {
                self.element.play();
                PlayerState::Playing
            }
        };
        self.state
    }

    /// Set volume on the 0–100 scale. Applied immediately, whatever the state.
    pub fn set_volume(&mut self, volume: f32) {
        if !volume.is_finite() {
            return;
        }
        self.volume = volume.clamp(0.0, MAX_VOLUME);
        self.element.set_volume(self.volume / MAX_VOLUME);
    }

    /// Stop playback and forget the selection. Any in-flight resolution is
    /// discarded when it completes.
    pub fn clear(&mut self) {
        self.generation += 1;
        if self.state == PlayerState::Playing {
            self.element.pause();
        }
        self.state = PlayerState::Idle;
        self.current = None;
        self.source = None;
    }
}
