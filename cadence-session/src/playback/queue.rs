//! Queue model
//!
//! Ordered list of track references plus a cursor, shuffle and repeat
//! policy. Pure data structure: no I/O, no locking. The playback session is
//! the only owner and mutates it from its worker task.
//!
//! Invariant after every operation: `cursor` is `Some(c)` with
//! `c < tracks.len()` when the queue is non-empty, and `None` iff it is empty.
//!
//! Shuffle never reorders `tracks`. It keeps a separate play order (a
//! permutation of array indices) generated once when shuffle is enabled.
//! Mutations patch that permutation in place, so the walk stays stable until
//! shuffle is toggled off and on again.

use cadence_common::{RepeatMode, TrackRef};
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use tracing::debug;

use crate::error::{Error, Result};

/// Walk direction for `advance`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Forward,
    Backward,
}

/// Result of removing an item from the queue
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Removal {
    /// The removed track
    pub removed: TrackRef,
    /// True when the removed item was under the cursor
    pub was_current: bool,
    /// True when the current item was removed and no item follows it with
    /// repeat off (cursor fell back to the preceding item)
    pub exhausted: bool,
}

pub struct QueueModel {
    tracks: Vec<TrackRef>,
    cursor: Option<usize>,
    shuffle_enabled: bool,
    repeat_mode: RepeatMode,
    /// Permutation of array indices while shuffled, empty otherwise
    play_order: Vec<usize>,
    rng: StdRng,
}

impl QueueModel {
    /// Create an empty queue with an entropy-seeded shuffle generator
    pub fn new() -> Self {
        Self::with_rng(StdRng::from_entropy())
    }

    /// Create an empty queue with a deterministic shuffle generator
    pub fn with_seed(seed: u64) -> Self {
        Self::with_rng(StdRng::seed_from_u64(seed))
    }

    fn with_rng(rng: StdRng) -> Self {
        Self {
            tracks: Vec::new(),
            cursor: None,
            shuffle_enabled: false,
            repeat_mode: RepeatMode::Off,
            play_order: Vec::new(),
            rng,
        }
    }

    // ------------------------------------------------------------------
    // Accessors
    // ------------------------------------------------------------------

    pub fn tracks(&self) -> &[TrackRef] {
        &self.tracks
    }

    pub fn len(&self) -> usize {
        self.tracks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tracks.is_empty()
    }

    pub fn cursor(&self) -> Option<usize> {
        self.cursor
    }

    pub fn current(&self) -> Option<&TrackRef> {
        self.cursor.and_then(|c| self.tracks.get(c))
    }

    pub fn shuffle_enabled(&self) -> bool {
        self.shuffle_enabled
    }

    pub fn repeat_mode(&self) -> RepeatMode {
        self.repeat_mode
    }

    /// Array indices in the order playback walks them
    pub fn play_order(&self) -> Vec<usize> {
        if self.shuffle_enabled {
            self.play_order.clone()
        } else {
            (0..self.tracks.len()).collect()
        }
    }

    // ------------------------------------------------------------------
    // Mutations
    // ------------------------------------------------------------------

    /// Replace the queue wholesale
    ///
    /// `start_index` past the end of a non-empty list is clamped to 0.
    pub fn set_all(&mut self, tracks: Vec<TrackRef>, start_index: usize) {
        self.tracks = tracks;
        self.cursor = if self.tracks.is_empty() {
            None
        } else if start_index >= self.tracks.len() {
            debug!(
                "start index {} out of bounds for {} tracks, clamping to 0",
                start_index,
                self.tracks.len()
            );
            Some(0)
        } else {
            Some(start_index)
        };

        if self.shuffle_enabled {
            self.regenerate_play_order();
        } else {
            self.play_order.clear();
        }
    }

    /// Insert a track immediately after the cursor
    pub fn insert_next(&mut self, track: TrackRef) {
        let Some(c) = self.cursor else {
            self.insert_into_empty(track);
            return;
        };

        let at = c + 1;
        self.tracks.insert(at, track);
        if self.shuffle_enabled {
            shift_up_from(&mut self.play_order, at);
            let pos = self.order_position(c).map(|p| p + 1).unwrap_or(0);
            self.play_order.insert(pos, at);
        }
        // at > c, so the cursor does not move
    }

    /// Insert a track at the end of the queue
    pub fn append(&mut self, track: TrackRef) {
        if self.tracks.is_empty() {
            self.insert_into_empty(track);
            return;
        }

        self.tracks.push(track);
        if self.shuffle_enabled {
            self.play_order.push(self.tracks.len() - 1);
        }
    }

    fn insert_into_empty(&mut self, track: TrackRef) {
        self.tracks.push(track);
        self.cursor = Some(0);
        if self.shuffle_enabled {
            self.play_order = vec![0];
        }
    }

    /// Remove the item at `index`, recomputing the cursor
    pub fn remove_at(&mut self, index: usize) -> Result<Removal> {
        let len = self.tracks.len();
        if index >= len {
            return Err(Error::IndexOutOfRange { index, len });
        }

        let cursor = self.cursor.unwrap_or(0);
        let was_current = index == cursor;

        // Decide where the cursor goes before indices shift
        // Repeat-one cannot keep a removed item, so it wraps like repeat-all
        let (target, exhausted) = if was_current && len > 1 {
            match self.successor(cursor, self.repeat_mode != RepeatMode::Off) {
                Some(next) => (Some(next), false),
                None => (self.predecessor(cursor), true),
            }
        } else {
            (self.cursor, false)
        };

        let removed = self.tracks.remove(index);
        if self.shuffle_enabled {
            self.play_order.retain(|&i| i != index);
            shift_down_above(&mut self.play_order, index);
        }

        self.cursor = if self.tracks.is_empty() {
            None
        } else {
            target.map(|t| if t > index { t - 1 } else { t })
        };

        Ok(Removal {
            removed,
            was_current,
            exhausted,
        })
    }

    /// Move the item at `from` to `to`; the cursor keeps pointing at the
    /// same logical track
    pub fn move_track(&mut self, from: usize, to: usize) -> Result<()> {
        let len = self.tracks.len();
        for index in [from, to] {
            if index >= len {
                return Err(Error::IndexOutOfRange { index, len });
            }
        }
        if from == to {
            return Ok(());
        }

        let track = self.tracks.remove(from);
        self.tracks.insert(to, track);

        let remap = |i: usize| remap_index(i, from, to);
        self.cursor = self.cursor.map(remap);
        if self.shuffle_enabled {
            for entry in self.play_order.iter_mut() {
                *entry = remap(*entry);
            }
        }
        Ok(())
    }

    /// Point the cursor at `index`
    pub fn set_cursor(&mut self, index: usize) -> Result<()> {
        let len = self.tracks.len();
        if index >= len {
            return Err(Error::IndexOutOfRange { index, len });
        }
        self.cursor = Some(index);
        Ok(())
    }

    /// Empty the queue
    pub fn clear(&mut self) {
        self.tracks.clear();
        self.play_order.clear();
        self.cursor = None;
    }

    /// Enable or disable shuffle
    ///
    /// Enabling generates a fresh play order starting at the current item;
    /// enabling while already enabled keeps the existing order.
    pub fn set_shuffle(&mut self, enabled: bool) {
        if enabled == self.shuffle_enabled {
            return;
        }
        self.shuffle_enabled = enabled;
        if enabled {
            self.regenerate_play_order();
        } else {
            self.play_order.clear();
        }
    }

    pub fn set_repeat_mode(&mut self, mode: RepeatMode) {
        self.repeat_mode = mode;
    }

    /// Step the repeat mode off -> all -> one -> off
    pub fn cycle_repeat(&mut self) -> RepeatMode {
        self.repeat_mode = self.repeat_mode.cycled();
        self.repeat_mode
    }

    /// Replace every copy of a track (matched by id) with `updated`
    ///
    /// Returns the number of entries replaced.
    pub fn replace_track(&mut self, updated: &TrackRef) -> usize {
        let mut replaced = 0;
        for track in self.tracks.iter_mut().filter(|t| t.id == updated.id) {
            *track = updated.clone();
            replaced += 1;
        }
        replaced
    }

    // ------------------------------------------------------------------
    // Navigation
    // ------------------------------------------------------------------

    /// Compute the next cursor for `direction` without moving
    ///
    /// - `One` returns the current index
    /// - `All` wraps past either end
    /// - `Off` returns None past the end going forward and stays on the
    ///   first item going backward
    pub fn peek_advance(&self, direction: Direction) -> Option<usize> {
        self.peek_with(self.repeat_mode, direction)
    }

    /// Move the cursor one step in `direction`
    ///
    /// Returns the new cursor, or None (cursor unchanged) when playback would
    /// run past the end with repeat off.
    pub fn advance(&mut self, direction: Direction) -> Option<usize> {
        let next = self.peek_advance(direction)?;
        self.cursor = Some(next);
        Some(next)
    }

    /// Move the cursor for an explicit user skip
    ///
    /// Same as `advance` except that repeat-one walks like repeat-off, so a
    /// skip always leaves the current item when there is somewhere to go.
    pub fn skip(&mut self, direction: Direction) -> Option<usize> {
        let mode = match self.repeat_mode {
            RepeatMode::One => RepeatMode::Off,
            mode => mode,
        };
        let next = self.peek_with(mode, direction)?;
        self.cursor = Some(next);
        Some(next)
    }

    fn peek_with(&self, mode: RepeatMode, direction: Direction) -> Option<usize> {
        let c = self.cursor?;
        if mode == RepeatMode::One {
            return Some(c);
        }
        match direction {
            Direction::Forward => self.successor(c, mode == RepeatMode::All),
            Direction::Backward => {
                let order = self.play_order();
                let pos = self.order_position(c)?;
                if pos > 0 {
                    Some(order[pos - 1])
                } else if mode == RepeatMode::All {
                    order.last().copied()
                } else {
                    Some(order[0])
                }
            }
        }
    }

    /// Next index in walk order, wrapping past the end when `wrap` is set
    fn successor(&self, index: usize, wrap: bool) -> Option<usize> {
        let order = self.play_order();
        let pos = self.order_position(index)?;
        if pos + 1 < order.len() {
            Some(order[pos + 1])
        } else if wrap {
            order.first().copied()
        } else {
            None
        }
    }

    fn predecessor(&self, index: usize) -> Option<usize> {
        let order = self.play_order();
        let pos = self.order_position(index)?;
        pos.checked_sub(1).map(|p| order[p])
    }

    fn order_position(&self, index: usize) -> Option<usize> {
        if self.shuffle_enabled {
            self.play_order.iter().position(|&i| i == index)
        } else if index < self.tracks.len() {
            Some(index)
        } else {
            None
        }
    }

    fn regenerate_play_order(&mut self) {
        let mut rest: Vec<usize> = (0..self.tracks.len())
            .filter(|&i| Some(i) != self.cursor)
            .collect();
        rest.shuffle(&mut self.rng);

        self.play_order = self.cursor.into_iter().chain(rest).collect();
    }
}

impl Default for QueueModel {
    fn default() -> Self {
        Self::new()
    }
}

/// Where index `i` lands after moving the item at `from` to `to`
fn remap_index(i: usize, from: usize, to: usize) -> usize {
    if i == from {
        to
    } else if from < to && i > from && i <= to {
        i - 1
    } else if to < from && i >= to && i < from {
        i + 1
    } else {
        i
    }
}

fn shift_up_from(order: &mut [usize], at: usize) {
    for entry in order.iter_mut().filter(|e| **e >= at) {
        *entry += 1;
    }
}

fn shift_down_above(order: &mut [usize], removed: usize) {
    for entry in order.iter_mut().filter(|e| **e > removed) {
        *entry -= 1;
    }
}
