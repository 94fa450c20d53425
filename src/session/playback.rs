use std::collections::HashSet;

use crate::audio::SourceId;

/// Starts closer than this to the requested time count as on time
const START_TOLERANCE: f64 = 1e-6;

/// Where one fragment landed on the output clock
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ScheduledPlayback {
    pub id: SourceId,
    /// Start time in seconds
    pub start: f64,
    /// End time in seconds
    pub end: f64,
}

/// Back-to-back playback bookkeeping
///
/// Each fragment starts at `max(now, cursor)` and pushes the cursor to its
/// end, so fragments never overlap and never start in the past. The output
/// may still start a fragment later than requested (the clock moved on while
/// it was decoded); `confirm` moves the cursor to the real end. Ids keep
/// increasing across resets; an end notification from a previous session can
/// never match a current source.
#[derive(Debug, Default)]
pub struct PlaybackScheduler {
    cursor: f64,
    outstanding: HashSet<SourceId>,
    next_id: SourceId,
    last: Option<ScheduledPlayback>,
}

impl PlaybackScheduler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reserve the next slot for a fragment of `duration` seconds
    pub fn schedule(&mut self, now: f64, duration: f64) -> ScheduledPlayback {
        let start = self.cursor.max(now);
        let end = start + duration.max(0.0);

        let id = self.next_id;
        self.next_id += 1;

        self.cursor = end;
        self.outstanding.insert(id);

        let slot = ScheduledPlayback { id, start, end };
        self.last = Some(slot);
        slot
    }

    /// Record where the output actually started a fragment
    ///
    /// Only the most recent fragment decides the cursor; a late start pushes
    /// it to that fragment's real end. Returns true if the cursor moved.
    pub fn confirm(&mut self, id: SourceId, actual_start: f64) -> bool {
        let Some(last) = self.last.filter(|slot| slot.id == id) else {
            return false;
        };
        if !self.outstanding.contains(&id) {
            return false;
        }

        let end = actual_start + (last.end - last.start);
        if end > self.cursor + START_TOLERANCE {
            self.cursor = end;
            true
        } else {
            false
        }
    }

    /// Mark a source finished
    ///
    /// Returns true only when this removal empties the outstanding set.
    /// Unknown ids are ignored.
    pub fn finish(&mut self, id: SourceId) -> bool {
        self.outstanding.remove(&id) && self.outstanding.is_empty()
    }

    /// Forget all scheduled playback and rewind the cursor for a new clock
    pub fn reset(&mut self) {
        self.cursor = 0.0;
        self.outstanding.clear();
        self.last = None;
    }

    /// Next free start time in seconds
    pub fn cursor(&self) -> f64 {
        self.cursor
    }

    pub fn outstanding(&self) -> usize {
        self.outstanding.len()
    }

    pub fn is_playing(&self) -> bool {
        !self.outstanding.is_empty()
    }
}
