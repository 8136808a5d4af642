//! Downlink audio: gapless scheduling of decoded chunks with barge-in support.
//!
//! Each chunk starts where the previous one ends, unless the cursor has
//! fallen behind the output clock, in which case it starts now. An
//! interruption stops everything in flight and pulls the cursor back to the
//! live clock.

use crate::audio::backend::{PlaybackContext, SourceId};
use crate::audio::pcm::{decode_chunk, resample};
use crate::defaults;
use crate::error::{ConciergeError, Result};
use std::collections::BTreeSet;

/// Where and for how long one chunk was scheduled.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ScheduledBuffer {
    pub source: SourceId,
    pub start_time: f64,
    pub duration: f64,
}

impl ScheduledBuffer {
    pub fn end_time(&self) -> f64 {
        self.start_time + self.duration
    }
}

pub struct PlaybackScheduler {
    context: Box<dyn PlaybackContext>,
    sample_rate: u32,
    next_start_time: f64,
    active: BTreeSet<SourceId>,
    chunks_scheduled: u64,
    interruptions: u64,
    closed: bool,
}

impl PlaybackScheduler {
    pub fn new(context: Box<dyn PlaybackContext>) -> Self {
        let sample_rate = context.sample_rate();
        let next_start_time = context.current_time();
        Self {
            context,
            sample_rate,
            next_start_time,
            active: BTreeSet::new(),
            chunks_scheduled: 0,
            interruptions: 0,
            closed: false,
        }
    }

    /// Decode a base64 PCM chunk at the context rate and schedule it.
    ///
    /// Returns `None` for a chunk that decodes to no samples.
    pub fn enqueue(&mut self, chunk: &str) -> Result<Option<ScheduledBuffer>> {
        let samples = decode_chunk(chunk)?;
        self.enqueue_samples(samples)
    }

    /// Like [`enqueue`](Self::enqueue) for a chunk recorded at `source_rate`.
    ///
    /// # Errors
    /// Rates outside `MIN_PCM_RATE..=MAX_PCM_RATE` are rejected as
    /// `ConciergeError::AudioDecode` before anything is decoded.
    pub fn enqueue_at_rate(
        &mut self,
        chunk: &str,
        source_rate: u32,
    ) -> Result<Option<ScheduledBuffer>> {
        if !(defaults::MIN_PCM_RATE..=defaults::MAX_PCM_RATE).contains(&source_rate) {
            return Err(ConciergeError::AudioDecode {
                message: format!("unsupported PCM rate {}", source_rate),
            });
        }
        let samples = decode_chunk(chunk)?;
        self.enqueue_samples(resample(&samples, source_rate, self.sample_rate))
    }

    /// Schedule already-decoded samples right after the previous buffer.
    pub fn enqueue_samples(&mut self, samples: Vec<f32>) -> Result<Option<ScheduledBuffer>> {
        if self.closed {
            return Err(ConciergeError::AudioPlayback {
                message: "playback already torn down".to_string(),
            });
        }
        if samples.is_empty() {
            return Ok(None);
        }

        let duration = samples.len() as f64 / self.sample_rate as f64;
        let start_time = self.next_start_time.max(self.context.current_time());
        let source = self.context.start_source(samples, start_time)?;

        self.next_start_time = start_time + duration;
        self.active.insert(source);
        self.chunks_scheduled += 1;

        Ok(Some(ScheduledBuffer {
            source,
            start_time,
            duration,
        }))
    }

    /// Forget a source that finished playing on its own.
    pub fn source_ended(&mut self, source: SourceId) -> bool {
        self.active.remove(&source)
    }

    /// Stop all scheduled and playing audio at once.
    ///
    /// Returns the number of sources stopped.
    pub fn interrupt(&mut self) -> usize {
        let sources = std::mem::take(&mut self.active);
        for &source in &sources {
            self.context.stop_source(source);
        }
        self.next_start_time = self.context.current_time();
        if !sources.is_empty() {
            self.interruptions += 1;
        }
        sources.len()
    }

    /// Interrupt and release the output context. Idempotent.
    pub fn teardown(&mut self) {
        self.interrupt();
        if !self.closed {
            self.closed = true;
            self.context.close();
        }
    }

    pub fn next_start_time(&self) -> f64 {
        self.next_start_time
    }

    pub fn active_sources(&self) -> usize {
        self.active.len()
    }

    pub fn chunks_scheduled(&self) -> u64 {
        self.chunks_scheduled
    }

    pub fn interruptions(&self) -> u64 {
        self.interruptions
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }
}
