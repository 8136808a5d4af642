//! Uplink audio: fixed-size framing, PCM encoding and forwarding to the transport.

use crate::audio::backend::FrameSink;
use crate::audio::pcm::encode_frame;
use crate::defaults;
use crate::session::SessionEvent;
use crate::transport::TransportHandle;
use crossbeam_channel::Sender;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

/// Shared on/off switch between the audio thread and the session.
///
/// Closed the moment teardown begins so no frame is forwarded afterwards.
#[derive(Debug, Clone)]
pub struct CaptureGate(Arc<AtomicBool>);

impl CaptureGate {
    pub fn is_open(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }

    pub fn close(&self) {
        self.0.store(false, Ordering::Release);
    }
}

impl Default for CaptureGate {
    fn default() -> Self {
        Self(Arc::new(AtomicBool::new(true)))
    }
}

/// Accumulates arbitrarily sized device buffers into fixed-size frames.
#[derive(Debug)]
pub struct FrameAssembler {
    frame_size: usize,
    pending: Vec<f32>,
}

impl FrameAssembler {
    pub fn new(frame_size: usize) -> Self {
        let frame_size = frame_size.max(1);
        Self {
            frame_size,
            pending: Vec::with_capacity(frame_size),
        }
    }

    /// Append samples and return every frame completed by them, in order.
    pub fn push(&mut self, samples: &[f32]) -> Vec<Vec<f32>> {
        let mut frames = Vec::new();
        let mut rest = samples;
        while !rest.is_empty() {
            let take = (self.frame_size - self.pending.len()).min(rest.len());
            self.pending.extend_from_slice(&rest[..take]);
            rest = &rest[take..];
            if self.pending.len() == self.frame_size {
                frames.push(std::mem::replace(
                    &mut self.pending,
                    Vec::with_capacity(self.frame_size),
                ));
            }
        }
        frames
    }

    /// Samples waiting for the next frame.
    pub fn pending(&self) -> usize {
        self.pending.len()
    }
}

/// What happened to one capture frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameOutcome {
    Sent,
    /// Send failed; the frame is gone.
    Dropped,
    /// Gate already closed; nothing was sent.
    Skipped,
    /// Too many consecutive send failures; the transport is unusable.
    TransportFailed,
}

/// Per-session uplink state.
#[derive(Debug)]
pub struct CapturePipeline {
    gate: CaptureGate,
    sample_rate: u32,
    frame_size: usize,
    frames_sent: u64,
    frames_dropped: u64,
    consecutive_failures: u32,
}

impl CapturePipeline {
    pub fn new(sample_rate: u32, frame_size: usize) -> Self {
        Self {
            gate: CaptureGate::default(),
            sample_rate,
            frame_size,
            frames_sent: 0,
            frames_dropped: 0,
            consecutive_failures: 0,
        }
    }

    pub fn gate(&self) -> CaptureGate {
        self.gate.clone()
    }

    /// Build the sink handed to the capture context.
    ///
    /// Runs on the audio thread: frames are assembled there and posted to the
    /// session's event queue tagged with `session`.
    pub fn sink(&self, session: u64, events: Sender<SessionEvent>) -> FrameSink {
        let gate = self.gate();
        let mut assembler = FrameAssembler::new(self.frame_size);
        Box::new(move |samples: &[f32]| {
            if !gate.is_open() {
                return;
            }
            for frame in assembler.push(samples) {
                let event = SessionEvent::CaptureFrame {
                    session,
                    samples: frame,
                };
                if events.send(event).is_err() {
                    gate.close();
                    return;
                }
            }
        })
    }

    /// Encode one frame and hand it to the transport.
    pub fn process_frame(
        &mut self,
        samples: &[f32],
        transport: &mut dyn TransportHandle,
    ) -> FrameOutcome {
        if !self.gate.is_open() {
            return FrameOutcome::Skipped;
        }

        let blob = encode_frame(samples, self.sample_rate);
        match transport.send_realtime_input(&blob) {
            Ok(()) => {
                self.frames_sent += 1;
                self.consecutive_failures = 0;
                FrameOutcome::Sent
            }
            Err(e) => {
                self.frames_dropped += 1;
                self.consecutive_failures += 1;
                tracing::debug!(error = %e, "dropping capture frame");
                if self.consecutive_failures >= defaults::MAX_CONSECUTIVE_SEND_FAILURES {
                    FrameOutcome::TransportFailed
                } else {
                    FrameOutcome::Dropped
                }
            }
        }
    }

    /// Stop forwarding immediately.
    pub fn close(&mut self) {
        self.gate.close();
    }

    pub fn frames_sent(&self) -> u64 {
        self.frames_sent
    }

    pub fn frames_dropped(&self) -> u64 {
        self.frames_dropped
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::pcm::decode_chunk;
    use crate::transport::MockTransport;
    use crate::transport::{ConnectRequest, Transport, TransportEvents};

    fn open_handle(transport: &mut MockTransport) -> Box<dyn TransportHandle> {
        let (tx, _rx) = crossbeam_channel::unbounded();
        transport
            .connect(&ConnectRequest::default(), TransportEvents::new(1, tx))
            .unwrap()
    }

    #[test]
    fn assembler_emits_fixed_frames() {
        let mut assembler = FrameAssembler::new(4);

        assert!(assembler.push(&[0.1, 0.2, 0.3]).is_empty());
        assert_eq!(assembler.pending(), 3);

        let frames = assembler.push(&[0.4, 0.5, 0.6, 0.7, 0.8, 0.9]);
        assert_eq!(frames, vec![vec![0.1, 0.2, 0.3, 0.4], vec![0.5, 0.6, 0.7, 0.8]]);
        assert_eq!(assembler.pending(), 1);
    }

    #[test]
    fn assembler_zero_frame_size_is_one() {
        let mut assembler = FrameAssembler::new(0);
        assert_eq!(assembler.push(&[0.1, 0.2]).len(), 2);
    }

    #[test]
    fn gate_starts_open_and_closes_for_every_clone() {
        let gate = CaptureGate::default();
        let shared = gate.clone();
        assert!(shared.is_open());

        gate.close();

        assert!(!shared.is_open());
    }

    #[test]
    fn sink_posts_tagged_frames() {
        let pipeline = CapturePipeline::new(16000, 2);
        let (tx, rx) = crossbeam_channel::unbounded();
        let mut sink = pipeline.sink(9, tx);

        sink(&[0.1, 0.2, 0.3]);

        match rx.try_recv() {
            Ok(SessionEvent::CaptureFrame { session, samples }) => {
                assert_eq!(session, 9);
                assert_eq!(samples, vec![0.1, 0.2]);
            }
            _ => panic!("Expected CaptureFrame event"),
        }
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn sink_stops_when_gate_closes() {
        let mut pipeline = CapturePipeline::new(16000, 1);
        let (tx, rx) = crossbeam_channel::unbounded();
        let mut sink = pipeline.sink(1, tx);

        pipeline.close();
        sink(&[0.5, 0.5]);

        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn process_frame_sends_encoded_pcm() {
        let mut transport = MockTransport::new();
        let mut handle = open_handle(&mut transport);
        let mut pipeline = CapturePipeline::new(16000, 4);

        let outcome = pipeline.process_frame(&[0.5, -0.5, 0.0, 1.0], handle.as_mut());

        assert_eq!(outcome, FrameOutcome::Sent);
        assert_eq!(pipeline.frames_sent(), 1);
        let sent = transport.sent();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].mime_type, "audio/pcm;rate=16000");
        let decoded = decode_chunk(&sent[0].data).unwrap();
        assert_eq!(decoded.len(), 4);
        assert!((decoded[0] - 0.5).abs() < 1e-4);
    }

    #[test]
    fn process_frame_drops_on_send_failure() {
        let mut transport = MockTransport::new().with_send_failures(1);
        let mut handle = open_handle(&mut transport);
        let mut pipeline = CapturePipeline::new(16000, 1);

        assert_eq!(pipeline.process_frame(&[0.1], handle.as_mut()), FrameOutcome::Dropped);
        assert_eq!(pipeline.process_frame(&[0.2], handle.as_mut()), FrameOutcome::Sent);

        assert_eq!(pipeline.frames_dropped(), 1);
        assert_eq!(pipeline.frames_sent(), 1);
        // Dropped frames are never retried
        assert_eq!(transport.sent().len(), 1);
    }

    #[test]
    fn process_frame_reports_systemic_failure() {
        let mut transport = MockTransport::new().with_send_failures(u32::MAX);
        let mut handle = open_handle(&mut transport);
        let mut pipeline = CapturePipeline::new(16000, 1);

        let mut last = FrameOutcome::Sent;
        for _ in 0..defaults::MAX_CONSECUTIVE_SEND_FAILURES {
            last = pipeline.process_frame(&[0.0], handle.as_mut());
        }
        assert_eq!(last, FrameOutcome::TransportFailed);
    }

    #[test]
    fn process_frame_skips_after_close() {
        let mut transport = MockTransport::new();
        let mut handle = open_handle(&mut transport);
        let mut pipeline = CapturePipeline::new(16000, 1);

        pipeline.close();

        assert_eq!(pipeline.process_frame(&[0.1], handle.as_mut()), FrameOutcome::Skipped);
        assert!(transport.sent().is_empty());
    }
}
