//! Playback orchestration: the state machine that ties the playlist, the
//! audio backend, the background loader and the subtitle sync loop together.
//!
//! Everything here runs on the caller's thread. Work that finishes elsewhere
//! (directory scans, natural end of a track) comes back as a [`PlayerEvent`]
//! through one queue that [`Player::pump`] drains, so the playlist only ever
//! has a single writer.

use crate::audio::{PlaybackBackend, StopReason, TrackFinished};
use crate::error::{PlayerError, Result, ScanError};
use crate::library::FileScanner;
use crate::model::{PlayerState, Settings, Track};
use crate::playlist::Playlist;
use crate::subtitle::SubtitleTrack;
use crate::sync::{DEFAULT_POLL_INTERVAL, SubtitleBoard, SubtitleSync};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender, TryRecvError};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

const DEFAULT_VOLUME_STEP: f32 = 0.1;

/// Something that happened off the command path.
#[derive(Debug)]
pub enum PlayerEvent {
    LibraryLoaded {
        ticket: u64,
        directory: PathBuf,
        result: std::result::Result<Vec<Track>, ScanError>,
    },
    TrackFinished(TrackFinished),
}

/// User-level commands, as issued by key bindings or the command line.
#[derive(Debug, Clone, PartialEq)]
pub enum PlayerCommand {
    Load(PathBuf),
    PlayCurrent,
    PlayAt(usize),
    TogglePlayPause,
    Next,
    Previous,
    ToggleLoop,
    ToggleShuffle,
    Stop,
    SetVolume(f32),
    IncreaseVolume,
    DecreaseVolume,
}

struct PendingLoad {
    ticket: u64,
    directory: PathBuf,
    handle: JoinHandle<()>,
}

pub struct Player {
    playlist: Playlist,
    backend: Box<dyn PlaybackBackend>,
    scanner: Arc<dyn FileScanner>,
    board: Arc<SubtitleBoard>,
    sync: Option<SubtitleSync>,
    poll_interval: Duration,
    volume_step: f32,
    state: PlayerState,
    looping: bool,
    directory: Option<PathBuf>,
    pending_load: Option<PendingLoad>,
    next_ticket: u64,
    events_tx: Sender<PlayerEvent>,
    events_rx: Receiver<PlayerEvent>,
    pub status: String,
    pub dirty: bool,
}

impl Player {
    pub fn new(
        playlist: Playlist,
        backend: Box<dyn PlaybackBackend>,
        scanner: Arc<dyn FileScanner>,
    ) -> Self {
        let (events_tx, events_rx) = mpsc::channel();
        let status = format!("Audio: {}", backend.output_name());
        Self {
            playlist,
            backend,
            scanner,
            board: Arc::new(SubtitleBoard::new()),
            sync: None,
            poll_interval: DEFAULT_POLL_INTERVAL,
            volume_step: DEFAULT_VOLUME_STEP,
            state: PlayerState::Idle,
            looping: false,
            directory: None,
            pending_load: None,
            next_ticket: 0,
            events_tx,
            events_rx,
            status,
            dirty: true,
        }
    }

    /// Applies volume, volume step and subtitle cadence from saved settings.
    pub fn with_settings(mut self, settings: &Settings) -> Self {
        self.poll_interval = settings.subtitle_poll_interval();
        self.volume_step = settings.volume_step.clamp(0.01, 1.0);
        self.backend.set_volume(settings.volume);
        self
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    /// Starts scanning `directory` in the background.
    ///
    /// A blank path is rejected immediately. Anything else is reported
    /// later, when [`pump`](Self::pump) or
    /// [`wait_for_load`](Self::wait_for_load) applies the result. A newer
    /// load supersedes one that is still running.
    pub fn load_directory(&mut self, directory: impl AsRef<Path>) -> Result<()> {
        let directory = directory.as_ref();
        if directory.as_os_str().to_string_lossy().trim().is_empty() {
            return Err(PlayerError::InvalidPath);
        }
        let directory = directory.to_path_buf();

        self.next_ticket = self.next_ticket.wrapping_add(1);
        let ticket = self.next_ticket;
        let scanner = Arc::clone(&self.scanner);
        let events_tx = self.events_tx.clone();
        let scan_dir = directory.clone();

        let handle = thread::Builder::new()
            .name(String::from("library-scan"))
            .spawn(move || {
                let result = scanner.scan(&scan_dir);
                let _ = events_tx.send(PlayerEvent::LibraryLoaded {
                    ticket,
                    directory: scan_dir,
                    result,
                });
            })
            .map_err(|err| {
                warn!(directory = %directory.display(), error = %err, "failed to spawn loader");
                PlayerError::LoaderGone {
                    directory: directory.clone(),
                }
            })?;

        info!(directory = %directory.display(), ticket, "loading directory");
        self.status = format!("Loading {}...", directory.display());
        self.dirty = true;
        self.pending_load = Some(PendingLoad {
            ticket,
            directory,
            handle,
        });
        Ok(())
    }

    pub fn is_loading(&self) -> bool {
        self.pending_load.is_some()
    }

    /// Handles every queued event and checks the backend for a natural end
    /// of track. Returns the errors raised while doing so; each one has also
    /// been written to the status line.
    pub fn pump(&mut self) -> Vec<PlayerError> {
        self.collect_finished();

        let mut errors = Vec::new();
        loop {
            match self.events_rx.try_recv() {
                Ok(event) => {
                    if let Err(err) = self.handle_event(event) {
                        errors.push(err);
                    }
                }
                Err(TryRecvError::Empty | TryRecvError::Disconnected) => break,
            }
        }
        if let Some(err) = self.check_loader() {
            errors.push(err);
        }
        errors
    }

    /// Blocks until the pending load has been applied, or `timeout` passes.
    ///
    /// Returns `Ok(false)` on timeout and `Ok(true)` once nothing is loading.
    /// Other events that arrive meanwhile are handled as usual.
    pub fn wait_for_load(&mut self, timeout: Duration) -> Result<bool> {
        let deadline = Instant::now() + timeout;
        loop {
            let Some(ticket) = self.pending_load.as_ref().map(|load| load.ticket) else {
                return Ok(true);
            };
            if let Some(err) = self.check_loader() {
                return Err(err);
            }
            if self.pending_load.is_none() {
                return Ok(true);
            }
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return Ok(false);
            }

            match self.events_rx.recv_timeout(remaining) {
                Ok(event) => {
                    let is_ours = matches!(
                        &event,
                        PlayerEvent::LibraryLoaded { ticket: t, .. } if *t == ticket
                    );
                    let outcome = self.handle_event(event);
                    if is_ours {
                        return outcome.map(|()| true);
                    }
                    if let Err(err) = outcome {
                        debug!(error = %err, "event failed while waiting for load");
                    }
                }
                Err(RecvTimeoutError::Timeout | RecvTimeoutError::Disconnected) => {
                    return Ok(false);
                }
            }
        }
    }

    pub fn dispatch(&mut self, command: PlayerCommand) -> Result<()> {
        debug!(?command, "dispatching command");
        match command {
            PlayerCommand::Load(directory) => self.load_directory(directory),
            PlayerCommand::PlayCurrent => self.play_current_track(),
            PlayerCommand::PlayAt(index) => self.play_at_index(index),
            PlayerCommand::TogglePlayPause => self.toggle_play_pause(),
            PlayerCommand::Next => self.next_track().map(|_| ()),
            PlayerCommand::Previous => self.previous_track().map(|_| ()),
            PlayerCommand::ToggleLoop => {
                self.toggle_loop();
                Ok(())
            }
            PlayerCommand::ToggleShuffle => {
                self.toggle_shuffle();
                Ok(())
            }
            PlayerCommand::Stop => {
                self.stop();
                Ok(())
            }
            PlayerCommand::SetVolume(volume) => {
                self.set_volume(volume);
                Ok(())
            }
            PlayerCommand::IncreaseVolume => {
                self.increase_volume();
                Ok(())
            }
            PlayerCommand::DecreaseVolume => {
                self.decrease_volume();
                Ok(())
            }
        }
    }

    /// Plays whatever the playlist considers current. No-op without one.
    pub fn play_current_track(&mut self) -> Result<()> {
        let Some(track) = self.playlist.current_file().cloned() else {
            return Ok(());
        };

        self.stop_sync();
        if let Err(err) = self.backend.play(track.path()) {
            warn!(track = %track.path.display(), error = %err, "playback failed");
            self.board.clear();
            self.state = PlayerState::Idle;
            self.status = format!("playback error: {err}");
            self.dirty = true;
            return Err(err.into());
        }

        match track.subtitles() {
            Some(subtitles) => self.start_sync(Arc::clone(subtitles)),
            None => self.board.clear(),
        }

        info!(track = %track.path.display(), "playing");
        self.state = PlayerState::Playing;
        self.status = format!("Playing: {}", track.name);
        self.dirty = true;
        Ok(())
    }

    pub fn play_at_index(&mut self, index: usize) -> Result<()> {
        if !self.playlist.move_to_index(index) {
            return Err(PlayerError::IndexOutOfRange {
                index,
                len: self.playlist.len(),
            });
        }
        self.play_current_track()
    }

    pub fn toggle_play_pause(&mut self) -> Result<()> {
        if self.backend.is_playing() {
            self.backend.pause();
            self.state = PlayerState::Paused;
            self.status = String::from("Paused");
            self.dirty = true;
            debug!("paused");
            return Ok(());
        }
        if self.playlist.current_file().is_none() {
            return Ok(());
        }
        if self.backend.is_paused() {
            self.backend.resume();
            self.state = PlayerState::Playing;
            self.status = String::from("Resumed");
            self.dirty = true;
            debug!("resumed");
            return Ok(());
        }
        self.play_current_track()
    }

    /// Returns whether the playlist moved; playback is untouched otherwise.
    pub fn next_track(&mut self) -> Result<bool> {
        if !self.playlist.move_next() {
            self.status = String::from("No next track");
            self.dirty = true;
            return Ok(false);
        }
        self.play_current_track()?;
        Ok(true)
    }

    pub fn previous_track(&mut self) -> Result<bool> {
        if !self.playlist.move_previous() {
            self.status = String::from("No previous track");
            self.dirty = true;
            return Ok(false);
        }
        self.play_current_track()?;
        Ok(true)
    }

    pub fn toggle_loop(&mut self) {
        self.looping = !self.looping;
        self.status = if self.looping {
            String::from("Loop: on")
        } else {
            String::from("Loop: off")
        };
        self.dirty = true;
    }

    pub fn toggle_shuffle(&mut self) {
        self.playlist.toggle_shuffle();
        self.status = if self.playlist.is_shuffling() {
            String::from("Shuffle: on")
        } else {
            String::from("Shuffle: off")
        };
        self.dirty = true;
    }

    pub fn stop(&mut self) {
        self.stop_sync();
        self.board.clear();
        if let Some(finished) = self.backend.stop() {
            self.queue_event(PlayerEvent::TrackFinished(finished));
        }
        self.state = PlayerState::Idle;
        self.status = String::from("Stopped");
        self.dirty = true;
        info!("playback stopped");
    }

    pub fn set_volume(&mut self, volume: f32) {
        let volume = if volume.is_nan() {
            0.0
        } else {
            volume.clamp(0.0, 1.0)
        };
        self.backend.set_volume(volume);
        self.status = format!("Volume: {}%", (volume * 100.0).round() as u16);
        self.dirty = true;
    }

    pub fn increase_volume(&mut self) {
        self.set_volume(self.backend.volume() + self.volume_step);
    }

    pub fn decrease_volume(&mut self) {
        self.set_volume(self.backend.volume() - self.volume_step);
    }

    pub fn files(&self) -> &[Track] {
        self.playlist.files()
    }

    pub fn playlist(&self) -> &Playlist {
        &self.playlist
    }

    pub fn current_track(&self) -> Option<&Track> {
        self.playlist.current_file()
    }

    pub fn current_index(&self) -> Option<usize> {
        self.playlist.current_index()
    }

    pub fn directory(&self) -> Option<&Path> {
        self.directory.as_deref()
    }

    pub fn state(&self) -> PlayerState {
        self.state
    }

    pub fn position(&self) -> Option<Duration> {
        self.backend.position()
    }

    pub fn duration(&self) -> Option<Duration> {
        self.backend.duration()
    }

    pub fn is_playing(&self) -> bool {
        self.backend.is_playing()
    }

    pub fn is_looping(&self) -> bool {
        self.looping
    }

    pub fn is_shuffling(&self) -> bool {
        self.playlist.is_shuffling()
    }

    pub fn volume(&self) -> f32 {
        self.backend.volume()
    }

    pub fn output_name(&self) -> String {
        self.backend.output_name()
    }

    pub fn current_subtitle(&self) -> Option<String> {
        self.board.current_text()
    }

    /// Changes whenever the caption shown for the current track changes.
    pub fn subtitle_revision(&self) -> u64 {
        self.board.revision()
    }

    fn handle_event(&mut self, event: PlayerEvent) -> Result<()> {
        match event {
            PlayerEvent::LibraryLoaded {
                ticket,
                directory,
                result,
            } => self.apply_library(ticket, directory, result),
            PlayerEvent::TrackFinished(finished) => self.handle_track_finished(finished),
        }
    }

    fn apply_library(
        &mut self,
        ticket: u64,
        directory: PathBuf,
        result: std::result::Result<Vec<Track>, ScanError>,
    ) -> Result<()> {
        if self.pending_load.as_ref().map(|load| load.ticket) != Some(ticket) {
            debug!(directory = %directory.display(), ticket, "discarding superseded load");
            return Ok(());
        }
        self.pending_load = None;

        let tracks = match result {
            Ok(tracks) => tracks,
            Err(source) => {
                warn!(directory = %directory.display(), error = %source, "load failed");
                self.status = format!("load error: {source}");
                self.dirty = true;
                return Err(PlayerError::Load { directory, source });
            }
        };

        self.stop_sync();
        self.board.clear();
        if let Some(finished) = self.backend.stop() {
            self.queue_event(PlayerEvent::TrackFinished(finished));
        }
        self.state = PlayerState::Idle;
        self.playlist.load_files(tracks);
        info!(
            directory = %directory.display(),
            tracks = self.playlist.len(),
            "playlist loaded"
        );
        self.status = if self.playlist.is_empty() {
            format!("No audio files in {}", directory.display())
        } else {
            format!(
                "Loaded {} tracks from {}",
                self.playlist.len(),
                directory.display()
            )
        };
        self.directory = Some(directory);
        self.dirty = true;

        if self.playlist.move_next() {
            self.play_current_track()?;
        }
        Ok(())
    }

    fn handle_track_finished(&mut self, finished: TrackFinished) -> Result<()> {
        if finished.reason == StopReason::Manual {
            debug!(track = %finished.path.display(), "manual stop, not advancing");
            return Ok(());
        }
        // A stop issued after the backend noticed the end, but before this
        // event was handled, unloads the track; the finish no longer counts.
        let is_current = self
            .playlist
            .current_file()
            .is_some_and(|track| track.path() == finished.path.as_path())
            && self.backend.current_track() == Some(finished.path.as_path());
        if !is_current {
            debug!(track = %finished.path.display(), "ignoring finish of a stale track");
            return Ok(());
        }

        if self.looping {
            debug!(track = %finished.path.display(), "looping track");
            return self.play_current_track();
        }
        if self.playlist.move_next() {
            return self.play_current_track();
        }

        info!("reached end of playlist");
        self.stop_sync();
        self.board.clear();
        self.state = PlayerState::Idle;
        self.status = String::from("Reached end of playlist");
        self.dirty = true;
        Ok(())
    }

    fn collect_finished(&mut self) {
        if let Some(finished) = self.backend.poll_finished() {
            debug!(track = %finished.path.display(), "track reached end of stream");
            self.queue_event(PlayerEvent::TrackFinished(finished));
        }
    }

    fn check_loader(&mut self) -> Option<PlayerError> {
        let finished = self
            .pending_load
            .as_ref()
            .is_some_and(|load| load.handle.is_finished());
        if !finished {
            return None;
        }
        // The scan thread sends before it exits, so a result may still be
        // sitting in the queue.
        while let Ok(event) = self.events_rx.try_recv() {
            let is_ours = matches!(
                (&event, self.pending_load.as_ref()),
                (PlayerEvent::LibraryLoaded { ticket, .. }, Some(load)) if *ticket == load.ticket
            );
            match self.handle_event(event) {
                Err(err) if is_ours => return Some(err),
                Err(err) => debug!(error = %err, "event failed while collecting load result"),
                Ok(()) => {}
            }
        }
        let load = self.pending_load.take()?;
        warn!(directory = %load.directory.display(), "loader exited without a result");
        self.status = format!("load error: loader stopped for {}", load.directory.display());
        self.dirty = true;
        Some(PlayerError::LoaderGone {
            directory: load.directory,
        })
    }

    fn queue_event(&self, event: PlayerEvent) {
        let _ = self.events_tx.send(event);
    }

    fn start_sync(&mut self, subtitles: Arc<SubtitleTrack>) {
        let probe = self.backend.position_probe();
        match SubtitleSync::start(subtitles, probe, Arc::clone(&self.board), self.poll_interval) {
            Ok(sync) => self.sync = Some(sync),
            Err(err) => {
                warn!(error = %err, "failed to start subtitle sync");
                self.board.clear();
            }
        }
    }

    fn stop_sync(&mut self) {
        if let Some(sync) = self.sync.take() {
            sync.stop();
        }
    }
}

impl Drop for Player {
    fn drop(&mut self) {
        self.stop_sync();
        self.backend.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::PositionProbe;
    use crate::error::PlaybackError;
    use crate::subtitle::SubtitleSpan;
    use std::sync::atomic::{AtomicU64, Ordering};
    use std::sync::{Mutex, PoisonError};

    #[derive(Default)]
    struct Script {
        played: Vec<PathBuf>,
        failing: Vec<PathBuf>,
        finished: bool,
        stops: usize,
    }

    struct ClockProbe(Arc<AtomicU64>);

    impl PositionProbe for ClockProbe {
        fn position(&self) -> Option<Duration> {
            Some(Duration::from_millis(self.0.load(Ordering::SeqCst)))
        }
    }

    struct ScriptedBackend {
        script: Arc<Mutex<Script>>,
        clock: Arc<AtomicU64>,
        current: Option<PathBuf>,
        paused: bool,
        reported: bool,
        volume: f32,
    }

    impl ScriptedBackend {
        fn script(&self) -> std::sync::MutexGuard<'_, Script> {
            self.script.lock().unwrap_or_else(PoisonError::into_inner)
        }
    }

    impl PlaybackBackend for ScriptedBackend {
        fn play(&mut self, path: &Path) -> std::result::Result<(), PlaybackError> {
            let mut script = self.script();
            if script.failing.iter().any(|failing| failing == path) {
                return Err(PlaybackError::Decode {
                    path: path.to_path_buf(),
                    reason: String::from("scripted failure"),
                });
            }
            script.played.push(path.to_path_buf());
            script.finished = false;
            drop(script);
            self.current = Some(path.to_path_buf());
            self.paused = false;
            self.reported = false;
            Ok(())
        }

        fn pause(&mut self) {
            self.paused = true;
        }

        fn resume(&mut self) {
            self.paused = false;
        }

        fn stop(&mut self) -> Option<TrackFinished> {
            self.script().stops += 1;
            self.paused = false;
            Some(TrackFinished {
                path: self.current.take()?,
                reason: StopReason::Manual,
            })
        }

        fn poll_finished(&mut self) -> Option<TrackFinished> {
            if self.reported || !self.script().finished {
                return None;
            }
            self.reported = true;
            Some(TrackFinished {
                path: self.current.clone()?,
                reason: StopReason::EndOfStream,
            })
        }

        fn is_playing(&self) -> bool {
            self.current.is_some() && !self.paused && !self.script().finished
        }

        fn is_paused(&self) -> bool {
            self.current.is_some() && self.paused
        }

        fn current_track(&self) -> Option<&Path> {
            self.current.as_deref()
        }

        fn position(&self) -> Option<Duration> {
            Some(Duration::from_millis(self.clock.load(Ordering::SeqCst)))
        }

        fn duration(&self) -> Option<Duration> {
            None
        }

        fn volume(&self) -> f32 {
            self.volume
        }

        fn set_volume(&mut self, volume: f32) {
            self.volume = volume;
        }

        fn position_probe(&self) -> Arc<dyn PositionProbe> {
            Arc::new(ClockProbe(Arc::clone(&self.clock)))
        }

        fn output_name(&self) -> String {
            String::from("scripted")
        }
    }

    struct FnScanner<F>(F);

    impl<F> FileScanner for FnScanner<F>
    where
        F: Fn(&Path) -> std::result::Result<Vec<Track>, ScanError> + Send + Sync,
    {
        fn scan(&self, directory: &Path) -> std::result::Result<Vec<Track>, ScanError> {
            (self.0)(directory)
        }
    }

    struct Harness {
        player: Player,
        script: Arc<Mutex<Script>>,
        clock: Arc<AtomicU64>,
    }

    impl Harness {
        fn new(tracks: Vec<Track>) -> Self {
            let script = Arc::new(Mutex::new(Script::default()));
            let clock = Arc::new(AtomicU64::new(0));
            let backend = ScriptedBackend {
                script: Arc::clone(&script),
                clock: Arc::clone(&clock),
                current: None,
                paused: false,
                reported: false,
                volume: 1.0,
            };
            let scanner = FnScanner(move |directory: &Path| {
                if directory == Path::new("missing") {
                    return Err(ScanError::NotFound(directory.to_path_buf()));
                }
                Ok(tracks.clone())
            });
            let player = Player::new(Playlist::seeded(7), Box::new(backend), Arc::new(scanner))
                .with_poll_interval(Duration::from_millis(5));
            Self {
                player,
                script,
                clock,
            }
        }

        fn loaded(count: usize) -> Self {
            let mut harness = Self::new(tracks(count));
            harness.player.load_directory("music").expect("load");
            assert!(
                harness
                    .player
                    .wait_for_load(Duration::from_secs(2))
                    .expect("scan")
            );
            harness
        }

        fn played(&self) -> Vec<PathBuf> {
            self.script
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .played
                .clone()
        }

        fn finish_current(&mut self) -> Vec<PlayerError> {
            self.script
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .finished = true;
            self.player.pump()
        }
    }

    fn tracks(count: usize) -> Vec<Track> {
        (0..count)
            .map(|idx| Track::new(format!("{idx}.mp3"), format!("track {idx}")))
            .collect()
    }

    fn path(idx: usize) -> PathBuf {
        PathBuf::from(format!("{idx}.mp3"))
    }

    #[test]
    fn load_starts_first_track() {
        let harness = Harness::loaded(3);
        assert_eq!(harness.player.files().len(), 3);
        assert_eq!(harness.player.current_index(), Some(0));
        assert_eq!(harness.player.state(), PlayerState::Playing);
        assert_eq!(harness.played(), vec![path(0)]);
        assert_eq!(harness.player.directory(), Some(Path::new("music")));
    }

    #[test]
    fn blank_directory_is_rejected_synchronously() {
        let mut harness = Harness::new(tracks(2));
        assert!(matches!(
            harness.player.load_directory("   "),
            Err(PlayerError::InvalidPath)
        ));
        assert!(!harness.player.is_loading());
    }

    #[test]
    fn failed_load_keeps_previous_playlist() {
        let mut harness = Harness::loaded(3);
        harness.player.next_track().expect("next");

        harness.player.load_directory("missing").expect("spawn");
        let err = harness
            .player
            .wait_for_load(Duration::from_secs(2))
            .expect_err("missing directory");

        assert!(matches!(
            err,
            PlayerError::Load {
                source: ScanError::NotFound(_),
                ..
            }
        ));
        assert_eq!(harness.player.files().len(), 3);
        assert_eq!(harness.player.current_index(), Some(1));
        assert_eq!(harness.player.state(), PlayerState::Playing);
        assert!(harness.player.status.contains("load error"));
    }

    #[test]
    fn empty_scan_loads_empty_playlist() {
        let mut harness = Harness::new(Vec::new());
        harness.player.load_directory("music").expect("spawn");
        assert!(harness.player.wait_for_load(Duration::from_secs(2)).expect("scan"));
        assert!(harness.player.files().is_empty());
        assert_eq!(harness.player.state(), PlayerState::Idle);
        assert!(harness.played().is_empty());
    }

    #[test]
    fn boundary_moves_leave_playback_untouched() {
        let mut harness = Harness::loaded(2);
        assert!(!harness.player.previous_track().expect("previous"));
        assert!(harness.player.next_track().expect("next"));
        assert!(!harness.player.next_track().expect("next at end"));
        assert_eq!(harness.played(), vec![path(0), path(1)]);
        assert_eq!(harness.player.current_index(), Some(1));
    }

    #[test]
    fn natural_finish_advances_then_settles_idle() {
        let mut harness = Harness::loaded(2);

        assert!(harness.finish_current().is_empty());
        assert_eq!(harness.player.current_index(), Some(1));
        assert_eq!(harness.player.state(), PlayerState::Playing);

        assert!(harness.finish_current().is_empty());
        assert_eq!(harness.player.state(), PlayerState::Idle);
        assert_eq!(harness.player.status, "Reached end of playlist");
        assert_eq!(harness.played(), vec![path(0), path(1)]);

        // No further auto-advance once exhausted.
        assert!(harness.player.pump().is_empty());
        assert_eq!(harness.played().len(), 2);
    }

    #[test]
    fn looping_replays_same_track() {
        let mut harness = Harness::loaded(3);
        harness.player.toggle_loop();
        assert!(harness.player.is_looping());

        harness.finish_current();
        harness.finish_current();
        assert_eq!(harness.played(), vec![path(0), path(0), path(0)]);
        assert_eq!(harness.player.current_index(), Some(0));
    }

    #[test]
    fn manual_stop_does_not_advance() {
        let mut harness = Harness::loaded(3);
        harness.player.stop();
        assert!(harness.player.pump().is_empty());

        assert_eq!(harness.player.state(), PlayerState::Idle);
        assert_eq!(harness.player.current_index(), Some(0));
        assert_eq!(harness.played(), vec![path(0)]);
    }

    #[test]
    fn stale_finish_is_ignored() {
        let mut harness = Harness::loaded(3);
        harness.player.queue_event(PlayerEvent::TrackFinished(TrackFinished {
            path: path(2),
            reason: StopReason::EndOfStream,
        }));
        assert!(harness.player.pump().is_empty());
        assert_eq!(harness.player.current_index(), Some(0));
        assert_eq!(harness.played(), vec![path(0)]);
    }

    #[test]
    fn finish_racing_a_manual_stop_is_ignored() {
        let mut harness = Harness::loaded(3);
        harness.player.queue_event(PlayerEvent::TrackFinished(TrackFinished {
            path: path(0),
            reason: StopReason::EndOfStream,
        }));
        harness.player.stop();

        assert!(harness.player.pump().is_empty());
        assert_eq!(harness.player.state(), PlayerState::Idle);
        assert_eq!(harness.player.current_index(), Some(0));
        assert_eq!(harness.played(), vec![path(0)]);
    }

    #[test]
    fn restart_after_stop_still_auto_advances() {
        let mut harness = Harness::loaded(3);
        harness.player.stop();
        harness.player.toggle_play_pause().expect("restart");
        assert_eq!(harness.player.state(), PlayerState::Playing);

        assert!(harness.finish_current().is_empty());
        assert_eq!(harness.player.current_index(), Some(1));
        assert_eq!(harness.player.state(), PlayerState::Playing);
        assert_eq!(harness.played(), vec![path(0), path(0), path(1)]);
    }

    #[test]
    fn unrelated_failure_does_not_mask_finished_load() {
        let mut harness = Harness::loaded(3);
        harness
            .script
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .failing
            .push(path(1));
        harness.player.queue_event(PlayerEvent::TrackFinished(TrackFinished {
            path: path(0),
            reason: StopReason::EndOfStream,
        }));

        harness.player.load_directory("music").expect("spawn");
        let deadline = Instant::now() + Duration::from_secs(2);
        while !harness
            .player
            .pending_load
            .as_ref()
            .is_some_and(|load| load.handle.is_finished())
        {
            assert!(Instant::now() < deadline, "scan thread did not finish");
            thread::sleep(Duration::from_millis(2));
        }

        assert!(harness.player.check_loader().is_none());
        assert!(harness.player.pending_load.is_none());
        assert_eq!(harness.player.status, "Loaded 3 tracks from music");
        assert_eq!(harness.player.current_index(), Some(0));
        assert_eq!(harness.player.state(), PlayerState::Playing);
        assert_eq!(harness.played(), vec![path(0), path(0)]);
    }

    #[test]
    fn toggle_play_pause_cycles_states() {
        let mut harness = Harness::loaded(1);
        harness.player.toggle_play_pause().expect("pause");
        assert_eq!(harness.player.state(), PlayerState::Paused);
        harness.player.toggle_play_pause().expect("resume");
        assert_eq!(harness.player.state(), PlayerState::Playing);

        harness.player.stop();
        harness.player.toggle_play_pause().expect("restart");
        assert_eq!(harness.player.state(), PlayerState::Playing);
        assert_eq!(harness.played(), vec![path(0), path(0)]);
    }

    #[test]
    fn toggle_play_pause_without_track_is_noop() {
        let mut harness = Harness::new(Vec::new());
        harness.player.toggle_play_pause().expect("noop");
        assert_eq!(harness.player.state(), PlayerState::Idle);
        assert!(harness.played().is_empty());
    }

    #[test]
    fn play_at_index_validates_range() {
        let mut harness = Harness::loaded(3);
        assert!(matches!(
            harness.player.play_at_index(3),
            Err(PlayerError::IndexOutOfRange { index: 3, len: 3 })
        ));
        assert_eq!(harness.player.current_index(), Some(0));

        harness.player.play_at_index(2).expect("play");
        assert_eq!(harness.player.current_index(), Some(2));
        assert_eq!(harness.played(), vec![path(0), path(2)]);
    }

    #[test]
    fn playback_failure_propagates_and_goes_idle() {
        let mut harness = Harness::loaded(3);
        harness
            .script
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .failing
            .push(path(1));

        let err = harness.player.next_track().expect_err("scripted failure");
        assert!(matches!(err, PlayerError::Playback(PlaybackError::Decode { .. })));
        assert_eq!(harness.player.state(), PlayerState::Idle);
        assert_eq!(harness.player.current_index(), Some(1));
    }

    #[test]
    fn volume_is_clamped_and_stepped() {
        let mut harness = Harness::loaded(1);
        harness.player.set_volume(0.5);
        harness.player.increase_volume();
        assert!((harness.player.volume() - 0.6).abs() < 1e-6);
        harness.player.set_volume(3.0);
        assert_eq!(harness.player.volume(), 1.0);
        harness.player.set_volume(-1.0);
        harness.player.decrease_volume();
        assert_eq!(harness.player.volume(), 0.0);
    }

    #[test]
    fn shuffle_toggle_is_reported() {
        let mut harness = Harness::loaded(4);
        harness.player.dispatch(PlayerCommand::ToggleShuffle).expect("shuffle");
        assert!(harness.player.is_shuffling());
        assert_eq!(harness.player.status, "Shuffle: on");
    }

    #[test]
    fn subtitles_follow_playback_and_clear_on_plain_track() {
        let mut captions = SubtitleTrack::new("0.srt");
        captions.push(SubtitleSpan::new(
            Duration::from_secs(1),
            Duration::from_secs(3),
            "hello",
        ));
        let mut list = tracks(2);
        list[0] = list[0].clone().with_subtitles(captions);

        let mut harness = Harness::new(list);
        harness.player.load_directory("music").expect("spawn");
        harness
            .player
            .wait_for_load(Duration::from_secs(2))
            .expect("scan");

        harness.clock.store(1_500, Ordering::SeqCst);
        let deadline = Instant::now() + Duration::from_secs(2);
        while harness.player.current_subtitle().is_none() && Instant::now() < deadline {
            thread::sleep(Duration::from_millis(2));
        }
        assert_eq!(harness.player.current_subtitle().as_deref(), Some("hello"));

        harness.player.next_track().expect("next");
        assert_eq!(harness.player.current_subtitle(), None);
        thread::sleep(Duration::from_millis(30));
        assert_eq!(harness.player.current_subtitle(), None);
    }

    #[test]
    fn newer_load_supersedes_older_result() {
        let mut harness = Harness::loaded(2);
        harness.player.queue_event(PlayerEvent::LibraryLoaded {
            ticket: 0,
            directory: PathBuf::from("old"),
            result: Ok(tracks(5)),
        });
        assert!(harness.player.pump().is_empty());
        assert_eq!(harness.player.files().len(), 2);
    }

    #[test]
    fn drop_stops_backend() {
        let harness = Harness::loaded(1);
        let script = Arc::clone(&harness.script);
        drop(harness);
        assert!(script.lock().unwrap_or_else(PoisonError::into_inner).stops >= 1);
    }
}
