use crate::subtitle::SubtitleTrack;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Arc;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PlayerState {
    #[default]
    Idle,
    Playing,
    Paused,
}

impl PlayerState {
    pub fn label(self) -> &'static str {
        match self {
            Self::Idle => "Idle",
            Self::Playing => "Playing",
            Self::Paused => "Paused",
        }
    }
}

/// One playable file from a scanned directory.
///
/// Subtitles are attached at most once, while the scanner builds the track,
/// and are shared read-only with the subtitle sync loop afterwards.
#[derive(Debug, Clone, PartialEq)]
pub struct Track {
    pub path: PathBuf,
    pub name: String,
    subtitles: Option<Arc<SubtitleTrack>>,
}

impl Track {
    pub fn new(path: impl Into<PathBuf>, name: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            name: name.into(),
            subtitles: None,
        }
    }

    pub fn with_subtitles(mut self, subtitles: SubtitleTrack) -> Self {
        if self.subtitles.is_none() {
            self.subtitles = Some(Arc::new(subtitles));
        }
        self
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn subtitles(&self) -> Option<&Arc<SubtitleTrack>> {
        self.subtitles.as_ref()
    }

    pub fn has_subtitles(&self) -> bool {
        self.subtitles.is_some()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Settings {
    #[serde(default = "default_volume")]
    pub volume: f32,
    #[serde(default = "default_volume_step")]
    pub volume_step: f32,
    #[serde(default = "default_subtitle_poll_ms")]
    pub subtitle_poll_ms: u64,
    #[serde(default)]
    pub recursive_scan: bool,
    #[serde(default)]
    pub last_directory: Option<PathBuf>,
    #[serde(default)]
    pub shuffle_seed: Option<u64>,
}

fn default_volume() -> f32 {
    1.0
}

fn default_volume_step() -> f32 {
    0.1
}

fn default_subtitle_poll_ms() -> u64 {
    100
}

impl Settings {
    pub fn subtitle_poll_interval(&self) -> std::time::Duration {
        std::time::Duration::from_millis(self.subtitle_poll_ms.clamp(10, 1000))
    }
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            volume: default_volume(),
            volume_step: default_volume_step(),
            subtitle_poll_ms: default_subtitle_poll_ms(),
            recursive_scan: false,
            last_directory: None,
            shuffle_seed: None,
        }
    }
}
