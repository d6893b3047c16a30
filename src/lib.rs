//! Retrospace - a small music sharing service
//!
//! The server side stores uploaded songs (object storage plus a metadata
//! table), hands out signed playback URLs and manages playlists and accounts.
//! The client side holds the library page state, the upload and playlist
//! dialogs and the audio player, all talking to the service through the
//! injected [`client::Backend`].

pub mod app;
pub mod auth;
pub mod client;
pub mod config;
pub mod db;
pub mod model;
pub mod notify;
pub mod player;
pub mod playlist;
pub mod relay;
pub mod search;
pub mod server;
pub mod signing;
pub mod songs;
pub mod storage;
