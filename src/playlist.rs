use crate::model::Track;
use rand::SeedableRng;
use rand::rngs::SmallRng;
use rand::seq::SliceRandom;
use std::collections::{HashSet, VecDeque};

/// Track ordering with a history stack, a pending queue and shuffle that
/// only ever reorders what has not been played yet.
#[derive(Debug)]
pub struct Playlist {
    tracks: Vec<Track>,
    current: Option<usize>,
    history: Vec<usize>,
    future: VecDeque<usize>,
    played: HashSet<usize>,
    shuffling: bool,
    rng: SmallRng,
}

impl Playlist {
    pub fn new() -> Self {
        Self::with_rng(rand::make_rng::<SmallRng>())
    }

    /// Deterministic shuffles, for tests and reproducible sessions.
    pub fn seeded(seed: u64) -> Self {
        Self::with_rng(SmallRng::seed_from_u64(seed))
    }

    pub fn with_rng(rng: SmallRng) -> Self {
        Self {
            tracks: Vec::new(),
            current: None,
            history: Vec::new(),
            future: VecDeque::new(),
            played: HashSet::new(),
            shuffling: false,
            rng,
        }
    }

    /// Replaces the tracklist and discards all navigation state.
    pub fn load_files(&mut self, tracks: impl IntoIterator<Item = Track>) {
        self.tracks = tracks.into_iter().collect();
        self.reset();
    }

    pub fn reset(&mut self) {
        self.history.clear();
        self.played.clear();
        self.future = (0..self.tracks.len()).collect();
        self.current = None;
        self.shuffling = false;
    }

    /// Advances to the front of the pending queue. Does not wrap.
    pub fn move_next(&mut self) -> bool {
        let Some(next) = self.future.pop_front() else {
            return false;
        };
        if let Some(current) = self.current {
            self.history.push(current);
        }
        self.current = Some(next);
        self.played.insert(next);
        true
    }

    /// Steps back through history; the track being left becomes the next
    /// candidate again. Does not wrap.
    pub fn move_previous(&mut self) -> bool {
        let Some(previous) = self.history.pop() else {
            return false;
        };
        if let Some(current) = self.current {
            self.future.retain(|idx| *idx != current);
            self.future.push_front(current);
        }
        self.current = Some(previous);
        true
    }

    pub fn move_to_index(&mut self, index: usize) -> bool {
        if index >= self.tracks.len() {
            return false;
        }
        if let Some(current) = self.current {
            self.history.push(current);
        }
        self.current = Some(index);
        self.played.insert(index);
        self.future.retain(|idx| *idx != index);
        true
    }

    /// Flips shuffle and rebuilds the pending queue from every index that
    /// has never been current: shuffled when turning on, ascending when
    /// turning off. History, the played set and the current track stay put.
    pub fn toggle_shuffle(&mut self) {
        self.shuffling = !self.shuffling;

        let mut pending: Vec<usize> = (0..self.tracks.len())
            .filter(|idx| !self.played.contains(idx))
            .collect();
        if self.shuffling {
            pending.shuffle(&mut self.rng);
        }
        self.future = pending.into();
    }

    pub fn files(&self) -> &[Track] {
        &self.tracks
    }

    pub fn len(&self) -> usize {
        self.tracks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tracks.is_empty()
    }

    pub fn current_index(&self) -> Option<usize> {
        self.current
    }

    pub fn current_file(&self) -> Option<&Track> {
        self.tracks.get(self.current?)
    }

    pub fn is_shuffling(&self) -> bool {
        self.shuffling
    }

    /// Previously visited indices, most recent last.
    pub fn history(&self) -> &[usize] {
        &self.history
    }

    pub fn upcoming(&self) -> impl Iterator<Item = usize> + '_ {
        self.future.iter().copied()
    }

    pub fn upcoming_len(&self) -> usize {
        self.future.len()
    }

    pub fn was_played(&self, index: usize) -> bool {
        self.played.contains(&index)
    }
}

impl Default for Playlist {
    fn default() -> Self {
        Self::new()
    }
}
