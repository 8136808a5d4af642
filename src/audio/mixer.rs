//! Sample-clock mixer behind the cpal output stream.
//!
//! Sources are placed on an absolute frame timeline and summed into the
//! output as the device pulls buffers. The clock only advances by what has
//! been rendered, so it doubles as the playback context's `current_time`.

use crate::audio::backend::SourceId;

struct MixerSource {
    id: SourceId,
    start_frame: u64,
    samples: Vec<f32>,
}

impl MixerSource {
    fn end_frame(&self) -> u64 {
        self.start_frame + self.samples.len() as u64
    }
}

pub struct Mixer {
    sample_rate: u32,
    clock: u64,
    next_id: u64,
    sources: Vec<MixerSource>,
}

impl Mixer {
    pub fn new(sample_rate: u32) -> Self {
        Self {
            sample_rate: sample_rate.max(1),
            clock: 0,
            next_id: 0,
            sources: Vec::new(),
        }
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    /// Seconds of audio rendered so far.
    pub fn current_time(&self) -> f64 {
        self.clock as f64 / self.sample_rate as f64
    }

    fn frame_at(&self, time: f64) -> u64 {
        (time.max(0.0) * self.sample_rate as f64).round() as u64
    }

    /// Frames a source must span to cover `start_time..start_time + duration`.
    ///
    /// Sources sized this way tile the timeline exactly: the next source's
    /// start frame is this one's end frame, whatever the rate ratio.
    pub fn span_frames(&self, start_time: f64, duration: f64) -> usize {
        (self.frame_at(start_time + duration) - self.frame_at(start_time)) as usize
    }

    /// Place `samples` at `start_time` seconds. A start time in the past
    /// plays immediately.
    pub fn add(&mut self, samples: Vec<f32>, start_time: f64) -> SourceId {
        self.next_id += 1;
        let id = SourceId(self.next_id);
        let start_frame = self.frame_at(start_time);
        self.sources.push(MixerSource {
            id,
            start_frame: start_frame.max(self.clock),
            samples,
        });
        id
    }

    /// Remove a source. Returns false if it was unknown or already finished.
    pub fn stop(&mut self, id: SourceId) -> bool {
        let before = self.sources.len();
        self.sources.retain(|s| s.id != id);
        self.sources.len() != before
    }

    pub fn clear(&mut self) {
        self.sources.clear();
    }

    pub fn active(&self) -> usize {
        self.sources.len()
    }

    /// Fill `out` with the next mono frames, advance the clock and return the
    /// sources that finished during this buffer.
    pub fn render(&mut self, out: &mut [f32]) -> Vec<SourceId> {
        out.fill(0.0);
        let window_start = self.clock;
        let window_end = window_start + out.len() as u64;

        for source in &self.sources {
            let from = source.start_frame.max(window_start);
            let to = source.end_frame().min(window_end);
            for frame in from..to {
                let sample = source.samples[(frame - source.start_frame) as usize];
                out[(frame - window_start) as usize] += sample;
            }
        }
        for sample in out.iter_mut() {
            *sample = sample.clamp(-1.0, 1.0);
        }

        self.clock = window_end;
        let mut ended = Vec::new();
        self.sources.retain(|source| {
            if source.end_frame() <= window_end {
                ended.push(source.id);
                false
            } else {
                true
            }
        });
        ended
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::pcm::resample;

    #[test]
    fn clock_advances_with_rendered_frames() {
        let mut mixer = Mixer::new(100);
        let mut out = [0.0; 50];

        mixer.render(&mut out);

        assert_eq!(mixer.current_time(), 0.5);
    }

    #[test]
    fn source_plays_at_its_start_time() {
        let mut mixer = Mixer::new(10);
        mixer.add(vec![0.5; 3], 0.2);
        let mut out = [0.0; 6];

        let ended = mixer.render(&mut out);

        assert_eq!(out, [0.0, 0.0, 0.5, 0.5, 0.5, 0.0]);
        assert_eq!(ended.len(), 1);
        assert_eq!(mixer.active(), 0);
    }

    #[test]
    fn back_to_back_sources_leave_no_gap() {
        let mut mixer = Mixer::new(10);
        mixer.add(vec![0.1; 2], 0.0);
        mixer.add(vec![0.2; 2], 0.2);
        let mut out = [0.0; 4];

        mixer.render(&mut out);

        assert_eq!(out, [0.1, 0.1, 0.2, 0.2]);
    }

    #[test]
    fn source_spanning_buffers_ends_once() {
        let mut mixer = Mixer::new(10);
        let id = mixer.add(vec![0.3; 5], 0.0);
        let mut out = [0.0; 3];

        assert!(mixer.render(&mut out).is_empty());
        assert_eq!(mixer.render(&mut out), vec![id]);
        assert_eq!(out, [0.3, 0.3, 0.0]);
    }

    #[test]
    fn stopped_source_is_silent_and_not_reported() {
        let mut mixer = Mixer::new(10);
        let id = mixer.add(vec![0.9; 4], 0.0);

        assert!(mixer.stop(id));
        assert!(!mixer.stop(id));

        let mut out = [0.0; 4];
        assert!(mixer.render(&mut out).is_empty());
        assert_eq!(out, [0.0; 4]);
    }

    #[test]
    fn late_start_plays_immediately() {
        let mut mixer = Mixer::new(10);
        let mut out = [0.0; 5];
        mixer.render(&mut out);

        mixer.add(vec![0.4; 1], 0.1);
        mixer.render(&mut out);

        assert_eq!(out[0], 0.4);
    }

    #[test]
    fn overlapping_sources_are_clamped() {
        let mut mixer = Mixer::new(10);
        mixer.add(vec![0.8; 2], 0.0);
        mixer.add(vec![0.8; 2], 0.0);
        let mut out = [0.0; 2];

        mixer.render(&mut out);

        assert_eq!(out, [1.0, 1.0]);
    }

    #[test]
    fn resampled_chunks_tile_the_timeline_at_44k1() {
        let mut mixer = Mixer::new(44100);
        let duration = 1000.0 / 24000.0;
        let mut start_time = 0.0;

        for _ in 0..32 {
            let mut samples = resample(&[0.1; 1000], 24000, 44100);
            samples.resize(mixer.span_frames(start_time, duration), 0.1);
            mixer.add(samples, start_time);
            start_time += duration;
        }

        for pair in mixer.sources.windows(2) {
            assert_eq!(pair[1].start_frame, pair[0].end_frame());
        }
    }

    #[test]
    fn span_frames_matches_rate_for_integer_ratios() {
        let mixer = Mixer::new(48000);
        assert_eq!(mixer.span_frames(0.5, 0.25), 12000);
    }
}
