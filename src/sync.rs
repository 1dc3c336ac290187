//! Periodic subtitle sampling for the track that is currently playing.
//!
//! The loop runs on its own thread and only touches two things: the
//! immutable [`SubtitleTrack`] of the track and the shared
//! [`SubtitleBoard`]. Each loop owns a board generation; once the
//! generation is released, later ticks from that loop are rejected, so a
//! stopped or superseded loop can never overwrite the caption.

use crate::audio::PositionProbe;
use crate::subtitle::{SubtitleSpan, SubtitleTrack};
use std::sync::mpsc::{self, RecvTimeoutError, Sender};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::Duration;
use tracing::{debug, trace};

pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(100);

#[derive(Debug, Default)]
struct BoardState {
    generation: u64,
    active: Option<SubtitleSpan>,
    revision: u64,
}

impl BoardState {
    fn set_active(&mut self, span: Option<SubtitleSpan>) {
        if self.active != span {
            self.active = span;
            self.revision = self.revision.wrapping_add(1);
        }
    }
}

/// The "current subtitle" published by the sync loop.
#[derive(Debug, Default)]
pub struct SubtitleBoard {
    state: Mutex<BoardState>,
}

impl SubtitleBoard {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, BoardState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn current(&self) -> Option<SubtitleSpan> {
        self.lock().active.clone()
    }

    pub fn current_text(&self) -> Option<String> {
        self.lock().active.as_ref().map(|span| span.text.clone())
    }

    /// Bumped every time the published caption changes.
    pub fn revision(&self) -> u64 {
        self.lock().revision
    }

    /// Invalidates whichever loop owns the board and clears the caption.
    pub fn clear(&self) {
        let mut state = self.lock();
        state.generation = state.generation.wrapping_add(1);
        state.set_active(None);
    }

    fn claim(&self) -> u64 {
        let mut state = self.lock();
        state.generation = state.generation.wrapping_add(1);
        state.set_active(None);
        state.generation
    }

    fn release(&self, generation: u64) {
        let mut state = self.lock();
        if state.generation == generation {
            state.generation = state.generation.wrapping_add(1);
            state.set_active(None);
        }
    }

    fn publish(&self, generation: u64, span: Option<SubtitleSpan>) -> bool {
        let mut state = self.lock();
        if state.generation != generation {
            return false;
        }
        state.set_active(span);
        true
    }
}

/// Handle to a running sync loop. Dropping it stops the loop.
pub struct SubtitleSync {
    board: Arc<SubtitleBoard>,
    generation: u64,
    stop_tx: Option<Sender<()>>,
    handle: Option<JoinHandle<()>>,
}

impl SubtitleSync {
    pub fn start(
        subtitles: Arc<SubtitleTrack>,
        probe: Arc<dyn PositionProbe>,
        board: Arc<SubtitleBoard>,
        interval: Duration,
    ) -> std::io::Result<Self> {
        let generation = board.claim();
        let (stop_tx, stop_rx) = mpsc::channel::<()>();
        let loop_board = Arc::clone(&board);

        let spawned = thread::Builder::new()
            .name(String::from("subtitle-sync"))
            .spawn(move || {
                debug!(
                    source = %subtitles.source().display(),
                    generation,
                    "subtitle sync started"
                );
                let mut last_index: Option<usize> = None;
                loop {
                    let index = probe
                        .position()
                        .and_then(|position| subtitles.active_index_at(position));
                    if index != last_index {
                        let span = index.map(|idx| subtitles.spans()[idx].clone());
                        if !loop_board.publish(generation, span) {
                            break;
                        }
                        trace!(?index, "subtitle changed");
                        last_index = index;
                    }

                    match stop_rx.recv_timeout(interval) {
                        Err(RecvTimeoutError::Timeout) => {}
                        Ok(()) | Err(RecvTimeoutError::Disconnected) => break,
                    }
                }
                debug!(generation, "subtitle sync stopped");
            });

        let handle = match spawned {
            Ok(handle) => handle,
            Err(err) => {
                board.release(generation);
                return Err(err);
            }
        };

        Ok(Self {
            board,
            generation,
            stop_tx: Some(stop_tx),
            handle: Some(handle),
        })
    }

    /// Stops the loop and waits for its thread to exit.
    pub fn stop(mut self) {
        self.shutdown();
    }

    fn shutdown(&mut self) {
        // Release first: a tick racing with this call can no longer publish.
        self.board.release(self.generation);
        if let Some(stop_tx) = self.stop_tx.take() {
            let _ = stop_tx.send(());
        }
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

impl Drop for SubtitleSync {
    fn drop(&mut self) {
        self.shutdown();
    }
}
