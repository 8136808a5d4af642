//! Local echo transport.
//!
//! Plays the user's own voice back through the playback path, at the
//! playback rate, as if the model had said it. Used by the CLI to check the
//! microphone, the speakers and the scheduler end to end without a network.

use crate::audio::pcm::{self, PcmBlob};
use crate::defaults;
use crate::error::{ConciergeError, Result};
use crate::transport::{ConnectRequest, ServerMessage, Transport, TransportEvents, TransportHandle};

#[derive(Debug, Clone)]
pub struct LoopbackTransport {
    playback_sample_rate: u32,
    gain: f32,
}

impl LoopbackTransport {
    pub fn new(playback_sample_rate: u32) -> Self {
        Self {
            playback_sample_rate,
            gain: defaults::LOOPBACK_GAIN,
        }
    }

    pub fn with_gain(mut self, gain: f32) -> Self {
        self.gain = gain;
        self
    }
}

impl Transport for LoopbackTransport {
    fn connect(
        &mut self,
        request: &ConnectRequest,
        events: TransportEvents,
    ) -> Result<Box<dyn TransportHandle>> {
        tracing::info!(
            model = %request.model_id,
            voice = %request.config.voice,
            "loopback transport standing in for the hosted model"
        );
        events.open();
        Ok(Box::new(LoopbackHandle {
            events,
            playback_sample_rate: self.playback_sample_rate,
            gain: self.gain,
            closed: false,
        }))
    }
}

struct LoopbackHandle {
    events: TransportEvents,
    playback_sample_rate: u32,
    gain: f32,
    closed: bool,
}

impl TransportHandle for LoopbackHandle {
    fn send_realtime_input(&mut self, blob: &PcmBlob) -> Result<()> {
        if self.closed {
            return Err(ConciergeError::Transport {
                message: "loopback session closed".to_string(),
            });
        }
        let source_rate =
            pcm::parse_pcm_rate(&blob.mime_type).ok_or_else(|| ConciergeError::Transport {
                message: format!("unsupported mime type {}", blob.mime_type),
            })?;

        let samples = pcm::decode_chunk(&blob.data)?;
        let echoed: Vec<f32> = pcm::resample(&samples, source_rate, self.playback_sample_rate)
            .into_iter()
            .map(|s| s * self.gain)
            .collect();
        let reply = pcm::encode_frame(&echoed, self.playback_sample_rate);

        self.events
            .message(ServerMessage::audio(reply.mime_type, reply.data));
        Ok(())
    }

    fn close(&mut self) -> Result<()> {
        if !self.closed {
            self.closed = true;
            self.events.close();
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::SessionEvent;
    use crate::transport::TransportEvent;

    fn connect(
        transport: &mut LoopbackTransport,
    ) -> (Box<dyn TransportHandle>, crossbeam_channel::Receiver<SessionEvent>) {
        let (tx, rx) = crossbeam_channel::unbounded();
        let handle = transport
            .connect(&ConnectRequest::default(), TransportEvents::new(2, tx))
            .unwrap();
        (handle, rx)
    }

    fn next_transport_event(rx: &crossbeam_channel::Receiver<SessionEvent>) -> TransportEvent {
        match rx.try_recv() {
            Ok(SessionEvent::Transport { event, .. }) => event,
            other => panic!("Expected Transport event, got {:?}", other),
        }
    }

    #[test]
    fn opens_immediately() {
        let mut transport = LoopbackTransport::new(24000);
        let (_handle, rx) = connect(&mut transport);
        assert_eq!(next_transport_event(&rx), TransportEvent::Open);
    }

    #[test]
    fn echoes_frames_at_playback_rate() {
        let mut transport = LoopbackTransport::new(24000).with_gain(0.5);
        let (mut handle, rx) = connect(&mut transport);
        next_transport_event(&rx);

        handle
            .send_realtime_input(&pcm::encode_frame(&[0.5; 160], 16000))
            .unwrap();

        match next_transport_event(&rx) {
            TransportEvent::Message(message) => {
                assert_eq!(message.audio.len(), 1);
                assert_eq!(message.audio[0].mime_type, "audio/pcm;rate=24000");
                let samples = pcm::decode_chunk(&message.audio[0].data).unwrap();
                assert_eq!(samples.len(), 240);
                assert!((samples[0] - 0.25).abs() < 1e-3);
            }
            other => panic!("Expected Message, got {:?}", other),
        }
    }

    #[test]
    fn rejects_unknown_mime_type() {
        let mut transport = LoopbackTransport::new(24000);
        let (mut handle, _rx) = connect(&mut transport);
        let blob = PcmBlob {
            data: String::new(),
            mime_type: "audio/opus".to_string(),
        };
        assert!(handle.send_realtime_input(&blob).is_err());
    }

    #[test]
    fn close_emits_close_once() {
        let mut transport = LoopbackTransport::new(24000);
        let (mut handle, rx) = connect(&mut transport);
        next_transport_event(&rx);

        handle.close().unwrap();
        handle.close().unwrap();

        assert_eq!(next_transport_event(&rx), TransportEvent::Close);
        assert!(rx.try_recv().is_err());
    }
}
