use crate::config;
use crate::error::ScanError;
use crate::model::Track;
use crate::subtitle::{self, SubtitleParser};
use std::ffi::OsStr;
use std::fs::File;
use std::path::Path;
use symphonia::core::formats::FormatOptions;
use symphonia::core::io::{MediaSourceStream, MediaSourceStreamOptions};
use symphonia::core::meta::{MetadataOptions, StandardTagKey};
use symphonia::core::probe::Hint;
use symphonia::default::get_probe;
use tracing::{debug, warn};
use walkdir::WalkDir;

const AUDIO_EXTENSIONS: &[&str] = &["mp3", "wav", "ogg", "flac", "m4a", "aac", "opus"];

pub trait FileScanner: Send + Sync {
    fn scan(&self, directory: &Path) -> Result<Vec<Track>, ScanError>;
}

/// Lists the audio files of a directory and attaches like-named captions.
pub struct DirectoryScanner {
    recursive: bool,
    parsers: Vec<Box<dyn SubtitleParser>>,
}

impl DirectoryScanner {
    pub fn new(recursive: bool) -> Self {
        Self::with_parsers(recursive, subtitle::default_parsers())
    }

    pub fn with_parsers(recursive: bool, parsers: Vec<Box<dyn SubtitleParser>>) -> Self {
        Self { recursive, parsers }
    }

    fn build_track(&self, path: &Path) -> Track {
        let name = display_name(path);
        let track = Track::new(path, name);

        match subtitle::load_sidecar(path, &self.parsers) {
            Some(Ok(subtitles)) => {
                debug!(
                    track = %path.display(),
                    captions = subtitles.len(),
                    "attached subtitles"
                );
                track.with_subtitles(subtitles)
            }
            Some(Err(err)) => {
                warn!(track = %path.display(), error = %err, "ignoring unreadable subtitles");
                track
            }
            None => track,
        }
    }
}

impl Default for DirectoryScanner {
    fn default() -> Self {
        Self::new(false)
    }
}

impl FileScanner for DirectoryScanner {
    fn scan(&self, directory: &Path) -> Result<Vec<Track>, ScanError> {
        if directory.as_os_str().to_string_lossy().trim().is_empty() {
            return Err(ScanError::BlankPath);
        }
        let root = config::strip_windows_verbatim_prefix(directory);
        if !root.exists() {
            return Err(ScanError::NotFound(root));
        }
        if !root.is_dir() {
            return Err(ScanError::NotADirectory(root));
        }

        let mut walker = WalkDir::new(&root).follow_links(true);
        if !self.recursive {
            walker = walker.max_depth(1);
        }

        let mut tracks = Vec::new();
        for entry in walker {
            let entry = match entry {
                Ok(entry) => entry,
                // The root itself failing means nothing can be listed.
                Err(err) if err.depth() == 0 => return Err(ScanError::Walk(err)),
                Err(err) => {
                    warn!(error = %err, "skipping unreadable entry");
                    continue;
                }
            };
            let path = entry.path();
            if !entry.file_type().is_file() || !is_audio(path) {
                continue;
            }
            tracks.push(self.build_track(path));
        }

        tracks.sort_by(|a, b| a.path.cmp(&b.path));
        debug!(directory = %root.display(), count = tracks.len(), "scan finished");
        Ok(tracks)
    }
}

pub fn is_audio(path: &Path) -> bool {
    let ext = path.extension().and_then(OsStr::to_str).unwrap_or_default();
    AUDIO_EXTENSIONS
        .iter()
        .any(|supported| ext.eq_ignore_ascii_case(supported))
}

fn display_name(path: &Path) -> String {
    embedded_title(path).unwrap_or_else(|| {
        path.file_name()
            .map(|name| name.to_string_lossy().to_string())
            .unwrap_or_else(|| path.display().to_string())
    })
}

fn embedded_title(path: &Path) -> Option<String> {
    let file = File::open(path).ok()?;
    let source = MediaSourceStream::new(Box::new(file), MediaSourceStreamOptions::default());

    let mut hint = Hint::new();
    if let Some(extension) = path.extension().and_then(OsStr::to_str) {
        hint.with_extension(extension);
    }

    let mut probed = get_probe()
        .format(
            &hint,
            source,
            &FormatOptions::default(),
            &MetadataOptions::default(),
        )
        .ok()?;

    let metadata = probed.format.metadata();
    let revision = metadata.current()?;
    let tags = revision.tags();

    tags.iter()
        .find(|tag| tag.std_key == Some(StandardTagKey::TrackTitle))
        .or_else(|| {
            tags.iter()
                .find(|tag| tag.key.eq_ignore_ascii_case("title"))
        })
        .map(|tag| tag.value.to_string())
        .and_then(|value| {
            let trimmed = value.trim();
            (!trimmed.is_empty()).then(|| trimmed.to_string())
        })
}
