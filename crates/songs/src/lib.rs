//! Song domain module.
//!
//! A song is one prompt-to-audio generation job. This crate holds the record
//! and its status machine as deterministic logic (no IO, no HTTP, no storage).

pub mod song;

pub use song::{MetadataPatch, NewSong, Song, SongStatus, Transition, DEFAULT_TITLE};
