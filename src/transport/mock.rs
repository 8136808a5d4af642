//! Scriptable transport for tests.

use crate::audio::pcm::PcmBlob;
use crate::error::{ConciergeError, Result};
use crate::transport::{
    ConnectRequest, ServerMessage, Transport, TransportEvent, TransportEvents, TransportHandle,
};
use std::sync::{Arc, Mutex, MutexGuard};

#[derive(Default)]
struct MockTransportState {
    connect_failure: Option<String>,
    send_failures_remaining: u32,
    open_on_connect: bool,
    requests: Vec<ConnectRequest>,
    sent: Vec<PcmBlob>,
    close_calls: usize,
    handles_closed: usize,
    events: Option<TransportEvents>,
}

fn lock(state: &Mutex<MockTransportState>) -> MutexGuard<'_, MockTransportState> {
    state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Mock transport that records everything and fires callbacks on demand.
///
/// Clones share state, so a test keeps one clone after moving another into
/// the session.
#[derive(Clone, Default)]
pub struct MockTransport {
    state: Arc<Mutex<MockTransportState>>,
}

impl MockTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Configure the mock to refuse the connection attempt
    pub fn with_connect_failure(self, message: &str) -> Self {
        lock(&self.state).connect_failure = Some(message.to_string());
        self
    }

    /// Configure the next `count` sends to fail
    pub fn with_send_failures(self, count: u32) -> Self {
        lock(&self.state).send_failures_remaining = count;
        self
    }

    /// Fire `open` immediately from inside `connect`
    pub fn with_open_on_connect(self) -> Self {
        lock(&self.state).open_on_connect = true;
        self
    }

    pub fn connect_calls(&self) -> usize {
        lock(&self.state).requests.len()
    }

    pub fn requests(&self) -> Vec<ConnectRequest> {
        lock(&self.state).requests.clone()
    }

    pub fn sent(&self) -> Vec<PcmBlob> {
        lock(&self.state).sent.clone()
    }

    /// Number of `close()` calls, including repeated ones.
    pub fn close_calls(&self) -> usize {
        lock(&self.state).close_calls
    }

    /// Number of handles that were actually closed.
    pub fn handles_closed(&self) -> usize {
        lock(&self.state).handles_closed
    }

    fn fire(&self, event: TransportEvent) {
        let events = lock(&self.state).events.clone();
        if let Some(events) = events {
            events.emit(event);
        }
    }

    pub fn fire_open(&self) {
        self.fire(TransportEvent::Open);
    }

    pub fn fire_message(&self, message: ServerMessage) {
        self.fire(TransportEvent::Message(message));
    }

    pub fn fire_error(&self, message: &str) {
        self.fire(TransportEvent::Error(message.to_string()));
    }

    pub fn fire_close(&self) {
        self.fire(TransportEvent::Close);
    }
}

impl Transport for MockTransport {
    fn connect(
        &mut self,
        request: &ConnectRequest,
        events: TransportEvents,
    ) -> Result<Box<dyn TransportHandle>> {
        let mut state = lock(&self.state);
        state.requests.push(request.clone());
        if let Some(message) = state.connect_failure.clone() {
            return Err(ConciergeError::ConnectFailure { message });
        }
        if state.open_on_connect {
            events.open();
        }
        state.events = Some(events);
        Ok(Box::new(MockHandle {
            state: Arc::clone(&self.state),
            closed: false,
        }))
    }
}

struct MockHandle {
    state: Arc<Mutex<MockTransportState>>,
    closed: bool,
}

impl TransportHandle for MockHandle {
    fn send_realtime_input(&mut self, blob: &PcmBlob) -> Result<()> {
        if self.closed {
            return Err(ConciergeError::Transport {
                message: "session already closed".to_string(),
            });
        }
        let mut state = lock(&self.state);
        if state.send_failures_remaining > 0 {
            state.send_failures_remaining -= 1;
            return Err(ConciergeError::Transport {
                message: "mock send failure".to_string(),
            });
        }
        state.sent.push(blob.clone());
        Ok(())
    }

    fn close(&mut self) -> Result<()> {
        let mut state = lock(&self.state);
        state.close_calls += 1;
        if !self.closed {
            self.closed = true;
            state.handles_closed += 1;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::pcm::encode_frame;
    use crate::session::SessionEvent;

    #[test]
    fn test_mock_transport_records_requests() {
        let mut transport = MockTransport::new();
        let (tx, _rx) = crossbeam_channel::unbounded();

        transport
            .connect(&ConnectRequest::default(), TransportEvents::new(1, tx))
            .unwrap();

        assert_eq!(transport.connect_calls(), 1);
        assert_eq!(transport.requests()[0], ConnectRequest::default());
    }

    #[test]
    fn test_mock_transport_connect_failure() {
        let mut transport = MockTransport::new().with_connect_failure("refused");
        let (tx, _rx) = crossbeam_channel::unbounded();

        let result = transport.connect(&ConnectRequest::default(), TransportEvents::new(1, tx));

        match result {
            Err(ConciergeError::ConnectFailure { message }) => assert_eq!(message, "refused"),
            _ => panic!("Expected ConnectFailure"),
        }
    }

    #[test]
    fn test_mock_transport_open_on_connect() {
        let mut transport = MockTransport::new().with_open_on_connect();
        let (tx, rx) = crossbeam_channel::unbounded();

        transport
            .connect(&ConnectRequest::default(), TransportEvents::new(3, tx))
            .unwrap();

        assert!(matches!(
            rx.try_recv(),
            Ok(SessionEvent::Transport {
                session: 3,
                event: TransportEvent::Open
            })
        ));
    }

    #[test]
    fn test_mock_handle_close_is_idempotent() {
        let mut transport = MockTransport::new();
        let (tx, _rx) = crossbeam_channel::unbounded();
        let mut handle = transport
            .connect(&ConnectRequest::default(), TransportEvents::new(1, tx))
            .unwrap();

        assert!(handle.close().is_ok());
        assert!(handle.close().is_ok());

        assert_eq!(transport.close_calls(), 2);
        assert_eq!(transport.handles_closed(), 1);
        assert!(handle.send_realtime_input(&encode_frame(&[0.0], 16000)).is_err());
    }

    #[test]
    fn test_mock_fire_without_connect_is_noop() {
        let transport = MockTransport::new();
        transport.fire_open();
        transport.fire_close();
    }
}
