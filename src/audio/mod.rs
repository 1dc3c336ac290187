use crate::error::PlaybackError;
use rodio::Source;
use rodio::cpal::traits::{DeviceTrait, HostTrait};
use rodio::{
    Decoder, DeviceSinkBuilder as OutputStreamBuilder, MixerDeviceSink as OutputStream, Player as Sink,
};
#[cfg(unix)]
use std::ffi::CString;
use std::fs::File;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};
use tracing::{debug, info};

const MAX_VOLUME: f32 = 1.0;

/// Why playback of a track ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    /// The decoder ran out of samples.
    EndOfStream,
    /// Someone called `stop`.
    Manual,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrackFinished {
    pub path: PathBuf,
    pub reason: StopReason,
}

/// Read-only view of the playback clock that can be moved to another thread.
pub trait PositionProbe: Send + Sync {
    fn position(&self) -> Option<Duration>;
}

pub trait PlaybackBackend {
    fn play(&mut self, path: &Path) -> Result<(), PlaybackError>;
    fn pause(&mut self);
    fn resume(&mut self);
    /// Stops playback and reports it as a manual stop, if anything was loaded.
    fn stop(&mut self) -> Option<TrackFinished>;
    /// Reports a natural end of stream exactly once per `play`.
    fn poll_finished(&mut self) -> Option<TrackFinished>;
    fn is_playing(&self) -> bool;
    fn is_paused(&self) -> bool;
    fn current_track(&self) -> Option<&Path>;
    fn position(&self) -> Option<Duration>;
    fn duration(&self) -> Option<Duration>;
    fn volume(&self) -> f32;
    fn set_volume(&mut self, volume: f32);
    /// Probe for the track started by the most recent `play`.
    fn position_probe(&self) -> Arc<dyn PositionProbe>;
    fn output_name(&self) -> String;
}

struct SinkProbe {
    sink: Arc<Sink>,
}

impl PositionProbe for SinkProbe {
    fn position(&self) -> Option<Duration> {
        Some(self.sink.get_pos())
    }
}

pub struct RodioBackend {
    stream: OutputStream,
    sink: Arc<Sink>,
    current: Option<PathBuf>,
    track_duration: Option<Duration>,
    volume: f32,
    finish_reported: bool,
}

impl RodioBackend {
    pub fn new() -> Result<Self, PlaybackError> {
        let stream = open_output_stream()?;
        let sink = Arc::new(Sink::connect_new(stream.mixer()));

        Ok(Self {
            stream,
            sink,
            current: None,
            track_duration: None,
            volume: 1.0,
            finish_reported: false,
        })
    }
}

impl PlaybackBackend for RodioBackend {
    fn play(&mut self, path: &Path) -> Result<(), PlaybackError> {
        self.sink.stop();
        self.current = None;
        self.track_duration = None;
        self.sink = Arc::new(Sink::connect_new(self.stream.mixer()));

        let file = File::open(path).map_err(|source| PlaybackError::Open {
            path: path.to_path_buf(),
            source,
        })?;
        let source = Decoder::try_from(file).map_err(|err| PlaybackError::Decode {
            path: path.to_path_buf(),
            reason: err.to_string(),
        })?;
        self.track_duration = source.total_duration();
        self.sink.append(source);
        self.sink.set_volume(self.volume);

        self.current = Some(path.to_path_buf());
        self.finish_reported = false;
        debug!(track = %path.display(), duration = ?self.track_duration, "rodio playback started");
        Ok(())
    }

    fn pause(&mut self) {
        self.sink.pause();
    }

    fn resume(&mut self) {
        self.sink.play();
    }

    fn stop(&mut self) -> Option<TrackFinished> {
        self.sink.stop();
        self.track_duration = None;
        let path = self.current.take()?;
        Some(TrackFinished {
            path,
            reason: StopReason::Manual,
        })
    }

    fn poll_finished(&mut self) -> Option<TrackFinished> {
        if self.finish_reported || self.sink.is_paused() || !self.sink.empty() {
            return None;
        }
        let path = self.current.clone()?;
        self.finish_reported = true;
        Some(TrackFinished {
            path,
            reason: StopReason::EndOfStream,
        })
    }

    fn is_playing(&self) -> bool {
        self.current.is_some() && !self.sink.is_paused() && !self.sink.empty()
    }

    fn is_paused(&self) -> bool {
        self.current.is_some() && self.sink.is_paused()
    }

    fn current_track(&self) -> Option<&Path> {
        self.current.as_deref()
    }

    fn position(&self) -> Option<Duration> {
        self.current.as_ref()?;
        Some(self.sink.get_pos())
    }

    fn duration(&self) -> Option<Duration> {
        self.track_duration
    }

    fn volume(&self) -> f32 {
        self.volume
    }

    fn set_volume(&mut self, volume: f32) {
        self.volume = volume.clamp(0.0, MAX_VOLUME);
        self.sink.set_volume(self.volume);
    }

    fn position_probe(&self) -> Arc<dyn PositionProbe> {
        Arc::new(SinkProbe {
            sink: Arc::clone(&self.sink),
        })
    }

    fn output_name(&self) -> String {
        String::from("System default output (CPAL)")
    }
}

fn open_output_stream() -> Result<OutputStream, PlaybackError> {
    let mut stream = with_silenced_stderr(|| {
        let default = OutputStreamBuilder::from_default_device()
            .map_err(|err| err.to_string())
            .and_then(|builder| {
                builder
                    .with_error_callback(|_| {})
                    .open_sink_or_fallback()
                    .map_err(|err| err.to_string())
            });
        let default_err = match default {
            Ok(stream) => return Ok(stream),
            Err(err) => err,
        };

        info!(error = %default_err, "default output failed, trying other devices");
        let devices = rodio::cpal::default_host()
            .output_devices()
            .map_err(|err| PlaybackError::Output(err.to_string()))?;
        for device in devices {
            let name = device.name().unwrap_or_default();
            let Ok(builder) = OutputStreamBuilder::from_device(device) else {
                continue;
            };
            if let Ok(stream) = builder
                .with_error_callback(|_| {})
                .open_sink_or_fallback()
            {
                info!(device = %name, "using fallback output device");
                return Ok(stream);
            }
        }

        Err(PlaybackError::Output(format!(
            "unable to start any audio output stream after default failed: {default_err}"
        )))
    })?;
    stream.log_on_drop(false);
    Ok(stream)
}

#[cfg(unix)]
fn with_silenced_stderr<T>(operation: impl FnOnce() -> T) -> T {
    let saved = unsafe { libc::dup(libc::STDERR_FILENO) };
    if saved < 0 {
        return operation();
    }

    let devnull = CString::new("/dev/null")
        .ok()
        .map(|path| unsafe { libc::open(path.as_ptr(), libc::O_WRONLY) })
        .unwrap_or(-1);

    if devnull >= 0 {
        unsafe {
            libc::dup2(devnull, libc::STDERR_FILENO);
            libc::close(devnull);
        }
    }

    let result = operation();

    unsafe {
        libc::dup2(saved, libc::STDERR_FILENO);
        libc::close(saved);
    }

    result
}

#[cfg(not(unix))]
fn with_silenced_stderr<T>(operation: impl FnOnce() -> T) -> T {
    operation()
}

#[derive(Debug, Default)]
struct NullClock {
    loaded: bool,
    paused: bool,
    started_at: Option<Instant>,
    position_offset: Duration,
    track_duration: Option<Duration>,
}

impl NullClock {
    fn position(&self) -> Duration {
        let mut position = self.position_offset;
        if !self.paused
            && self.loaded
            && let Some(started_at) = self.started_at
        {
            position = position.saturating_add(started_at.elapsed());
        }
        if let Some(duration) = self.track_duration {
            return position.min(duration);
        }
        position
    }

    fn is_finished(&self) -> bool {
        let Some(duration) = self.track_duration else {
            return false;
        };
        self.loaded && !self.paused && self.position() >= duration
    }
}

struct NullProbe {
    clock: Arc<Mutex<NullClock>>,
}

impl PositionProbe for NullProbe {
    fn position(&self) -> Option<Duration> {
        let clock = self.clock.lock().unwrap_or_else(PoisonError::into_inner);
        clock.loaded.then(|| clock.position())
    }
}

/// Silent backend driven by a wall clock; used when no output device
/// exists and by the tests.
pub struct NullBackend {
    clock: Arc<Mutex<NullClock>>,
    current: Option<PathBuf>,
    volume: f32,
    fixed_duration: Option<Duration>,
    finish_reported: bool,
}

impl NullBackend {
    pub fn new() -> Self {
        Self {
            clock: Arc::new(Mutex::new(NullClock::default())),
            current: None,
            volume: 1.0,
            fixed_duration: None,
            finish_reported: false,
        }
    }

    /// Every track "lasts" `duration` regardless of its contents.
    pub fn with_fixed_duration(duration: Duration) -> Self {
        Self {
            fixed_duration: Some(duration),
            ..Self::new()
        }
    }

    fn clock(&self) -> std::sync::MutexGuard<'_, NullClock> {
        self.clock.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn estimate_duration(path: &Path) -> Option<Duration> {
        let file = File::open(path).ok()?;
        let source = Decoder::try_from(file).ok()?;
        source
            .total_duration()
            .filter(|duration| !duration.is_zero())
    }
}

impl Default for NullBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl PlaybackBackend for NullBackend {
    fn play(&mut self, path: &Path) -> Result<(), PlaybackError> {
        let track_duration = self
            .fixed_duration
            .or_else(|| Self::estimate_duration(path));
        {
            let mut clock = self.clock();
            clock.loaded = true;
            clock.paused = false;
            clock.started_at = Some(Instant::now());
            clock.position_offset = Duration::ZERO;
            clock.track_duration = track_duration;
        }
        self.current = Some(path.to_path_buf());
        self.finish_reported = false;
        Ok(())
    }

    fn pause(&mut self) {
        let mut clock = self.clock();
        if !clock.loaded || clock.paused {
            return;
        }
        clock.position_offset = clock.position();
        clock.started_at = None;
        clock.paused = true;
    }

    fn resume(&mut self) {
        let mut clock = self.clock();
        if clock.loaded && clock.paused {
            clock.started_at = Some(Instant::now());
            clock.paused = false;
        }
    }

    fn stop(&mut self) -> Option<TrackFinished> {
        *self.clock() = NullClock::default();
        let path = self.current.take()?;
        Some(TrackFinished {
            path,
            reason: StopReason::Manual,
        })
    }

    fn poll_finished(&mut self) -> Option<TrackFinished> {
        if self.finish_reported || !self.clock().is_finished() {
            return None;
        }
        let path = self.current.clone()?;
        self.finish_reported = true;
        Some(TrackFinished {
            path,
            reason: StopReason::EndOfStream,
        })
    }

    fn is_playing(&self) -> bool {
        let clock = self.clock();
        clock.loaded && !clock.paused && !clock.is_finished()
    }

    fn is_paused(&self) -> bool {
        let clock = self.clock();
        clock.loaded && clock.paused
    }

    fn current_track(&self) -> Option<&Path> {
        self.current.as_deref()
    }

    fn position(&self) -> Option<Duration> {
        self.current.as_ref()?;
        Some(self.clock().position())
    }

    fn duration(&self) -> Option<Duration> {
        self.clock().track_duration
    }

    fn volume(&self) -> f32 {
        self.volume
    }

    fn set_volume(&mut self, volume: f32) {
        self.volume = volume.clamp(0.0, MAX_VOLUME);
    }

    fn position_probe(&self) -> Arc<dyn PositionProbe> {
        Arc::new(NullProbe {
            clock: Arc::clone(&self.clock),
        })
    }

    fn output_name(&self) -> String {
        String::from("Null audio backend")
    }
}
