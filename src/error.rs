//! Error types for scanning, subtitle parsing and playback.

use std::path::PathBuf;
use thiserror::Error;

/// Failures while enumerating a music directory.
#[derive(Debug, Error)]
pub enum ScanError {
    #[error("directory path cannot be empty")]
    BlankPath,

    #[error("directory not found: {0}")]
    NotFound(PathBuf),

    #[error("not a directory: {0}")]
    NotADirectory(PathBuf),

    #[error("failed to walk directory: {0}")]
    Walk(#[from] walkdir::Error),
}

/// Failures while reading a caption file.
///
/// These never escape the scan step; the affected track simply has no
/// subtitles.
#[derive(Debug, Error)]
pub enum SubtitleError {
    #[error("failed to read subtitle file {}: {source}", path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("malformed subtitle file {} at line {line}: {reason}", path.display())]
    Malformed {
        path: PathBuf,
        line: usize,
        reason: String,
    },
}

/// Failures reported by a playback backend.
#[derive(Debug, Error)]
pub enum PlaybackError {
    #[error("failed to open track {}: {source}", path.display())]
    Open {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to decode {}: {reason}", path.display())]
    Decode { path: PathBuf, reason: String },

    #[error("audio output unavailable: {0}")]
    Output(String),
}

/// Errors surfaced to callers of the player.
#[derive(Debug, Error)]
pub enum PlayerError {
    #[error("directory path cannot be empty")]
    InvalidPath,

    #[error("track index {index} is out of range for a playlist of {len}")]
    IndexOutOfRange { index: usize, len: usize },

    /// Files could not be enumerated; the previous playlist is kept.
    #[error("failed to load playlist from {}", directory.display())]
    Load {
        directory: PathBuf,
        #[source]
        source: ScanError,
    },

    /// The background loader went away before handing over a playlist.
    #[error("failed to build playlist from {}: loader stopped", directory.display())]
    LoaderGone { directory: PathBuf },

    #[error(transparent)]
    Playback(#[from] PlaybackError),
}

pub type Result<T> = std::result::Result<T, PlayerError>;
