//! Gapless playback scheduling for inbound speech.
//!
//! Each inbound chunk starts at `max(next_start, now)` and pushes
//! `next_start` forward by its duration, so bursts of jittery arrivals play
//! back to back in arrival order without overlap. Interruption stops every
//! active unit at once and forgets the timeline.

use std::collections::BTreeMap;

use tracing::{debug, info, warn};

use super::codec::{decode_pcm16, decode_transport};
use super::playback::{Speaker, UnitId};
use crate::error::LiveError;

/// One inbound speech chunk, consumed exactly once by the scheduler.
#[derive(Debug, Clone)]
pub struct AudioChunk {
    pub bytes: Vec<u8>,
    pub sample_rate: u32,
    pub channels: u16,
    /// Arrival order within the session.
    pub sequence: u64,
}

/// A unit handed to the output device, with its slot on the timeline.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PlaybackUnit {
    pub id: UnitId,
    pub sequence: u64,
    pub start: f64,
    pub end: f64,
}

/// What happened when a unit reported that it finished.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Completion {
    /// Other units are still playing.
    Pending,
    /// That was the last active unit.
    Drained,
    /// Unknown unit: already stopped by an interruption or flush.
    Stale,
}

/// Owns the output device for one session and every unit queued on it.
pub struct PlaybackScheduler {
    speaker: Option<Box<dyn Speaker>>,
    next_start: Option<f64>,
    active: BTreeMap<UnitId, PlaybackUnit>,
    next_unit: UnitId,
    next_sequence: u64,
}

impl PlaybackScheduler {
    pub fn new(speaker: Box<dyn Speaker>) -> Self {
        Self {
            speaker: Some(speaker),
            next_start: None,
            active: BTreeMap::new(),
            next_unit: 0,
            next_sequence: 0,
        }
    }

    /// Wrap a transport-encoded payload into a chunk with the next sequence.
    pub fn accept(&mut self, data: &str, sample_rate: u32, channels: u16) -> Result<AudioChunk, LiveError> {
        let bytes = decode_transport(data)?;
        let sequence = self.next_sequence;
        self.next_sequence += 1;
        Ok(AudioChunk {
            bytes,
            sample_rate,
            channels,
            sequence,
        })
    }

    /// Decode and schedule one chunk. Empty chunks are skipped.
    pub fn enqueue(&mut self, chunk: AudioChunk) -> Result<Option<PlaybackUnit>, LiveError> {
        let frame = decode_pcm16(&chunk.bytes, chunk.sample_rate, chunk.channels)?;
        if frame.is_empty() {
            debug!(sequence = chunk.sequence, "Skipping empty speech chunk");
            return Ok(None);
        }

        let Some(speaker) = self.speaker.as_mut() else {
            return Err(LiveError::Output("output device already released".into()));
        };

        let now = speaker.now();
        let start = self.next_start.map_or(now, |next| next.max(now));
        let id = self.next_unit;
        speaker.schedule(id, &frame, start)?;
        self.next_unit += 1;

        let unit = PlaybackUnit {
            id,
            sequence: chunk.sequence,
            start,
            end: start + frame.duration_secs(),
        };
        self.active.insert(id, unit);
        self.next_start = Some(unit.end);
        Ok(Some(unit))
    }

    /// Record that a unit played to its end.
    pub fn complete(&mut self, unit: UnitId) -> Completion {
        if self.active.remove(&unit).is_none() {
            return Completion::Stale;
        }
        if let Some(speaker) = self.speaker.as_mut() {
            speaker.retire(unit);
        }
        if self.active.is_empty() {
            Completion::Drained
        } else {
            Completion::Pending
        }
    }

    /// Stop every active unit and reset the timeline. Returns how many were stopped.
    pub fn interrupt(&mut self) -> usize {
        let stopped = self.active.len();
        if let Some(speaker) = self.speaker.as_mut() {
            for id in self.active.keys() {
                speaker.stop(*id);
            }
        }
        self.active.clear();
        self.next_start = None;
        if stopped > 0 {
            info!(stopped, "Playback flushed");
        }
        stopped
    }

    /// Flush and close the output device. Idempotent.
    pub fn release(&mut self) {
        self.interrupt();
        if let Some(mut speaker) = self.speaker.take() {
            speaker.release();
        }
    }

    pub fn active_units(&self) -> usize {
        self.active.len()
    }
}

impl Drop for PlaybackScheduler {
    fn drop(&mut self) {
        if self.speaker.is_some() {
            warn!("Playback scheduler dropped without release");
            self.release();
        }
    }
}
