//! Single-threaded dispatch loop for a [`VoiceSession`].
//!
//! Audio threads, transport callbacks and the user all post
//! [`SessionEvent`]s into one channel; the driver applies them one at a time,
//! so the session never sees two callbacks at once.

use crate::session::manager::VoiceSession;
use crate::session::state::{SessionEvent, SessionSnapshot};
use crossbeam_channel::{Receiver, RecvTimeoutError, Sender};
use std::time::{Duration, Instant};

/// Cloneable user-side handle for a running driver.
#[derive(Debug, Clone)]
pub struct SessionControl {
    tx: Sender<SessionEvent>,
}

impl SessionControl {
    pub fn new(tx: Sender<SessionEvent>) -> Self {
        Self { tx }
    }

    /// Returns false once the driver has exited.
    pub fn start(&self) -> bool {
        self.tx.send(SessionEvent::Start).is_ok()
    }

    pub fn stop(&self) -> bool {
        self.tx.send(SessionEvent::Stop).is_ok()
    }

    pub fn shutdown(&self) -> bool {
        self.tx.send(SessionEvent::Shutdown).is_ok()
    }
}

type SnapshotObserver = Box<dyn FnMut(&SessionSnapshot) + Send>;

pub struct SessionDriver {
    session: VoiceSession,
    events: Receiver<SessionEvent>,
    deadline: Option<Instant>,
    exit_when_finished: bool,
    observer: Option<SnapshotObserver>,
}

impl SessionDriver {
    pub fn new(session: VoiceSession, events: Receiver<SessionEvent>) -> Self {
        Self {
            session,
            events,
            deadline: None,
            exit_when_finished: false,
            observer: None,
        }
    }

    /// Hang up and exit once `limit` has elapsed.
    pub fn with_time_limit(mut self, limit: Duration) -> Self {
        self.deadline = Some(Instant::now() + limit);
        self
    }

    /// Exit as soon as the session reaches Closed or Errored.
    pub fn exit_when_finished(mut self) -> Self {
        self.exit_when_finished = true;
        self
    }

    /// Called with a fresh snapshot whenever the state or error changes.
    pub fn with_observer(mut self, observer: impl FnMut(&SessionSnapshot) + Send + 'static) -> Self {
        self.observer = Some(Box::new(observer));
        self
    }

    pub fn session(&self) -> &VoiceSession {
        &self.session
    }

    /// Dispatch everything already queued without blocking.
    pub fn drain(&mut self) -> SessionSnapshot {
        let mut last = self.session.snapshot();
        while let Ok(event) = self.events.try_recv() {
            self.session.handle_event(event);
            last = self.observe(&last);
        }
        last
    }

    /// Run until shutdown, the time limit, or (if requested) the session
    /// finishing. Always leaves the session stopped; returns its final snapshot.
    pub fn run(mut self) -> SessionSnapshot {
        let mut last = self.session.snapshot();

        loop {
            let event = match self.deadline {
                Some(deadline) => match self.events.recv_deadline(deadline) {
                    Ok(event) => event,
                    Err(RecvTimeoutError::Timeout) => {
                        tracing::info!("session time limit reached");
                        break;
                    }
                    Err(RecvTimeoutError::Disconnected) => break,
                },
                None => match self.events.recv() {
                    Ok(event) => event,
                    Err(_) => break,
                },
            };

            let shutdown = matches!(event, SessionEvent::Shutdown);
            self.session.handle_event(event);
            last = self.observe(&last);

            if shutdown {
                tracing::debug!("shutdown requested");
                break;
            }
            if self.exit_when_finished && last.state.is_finished() {
                break;
            }
        }

        self.session.stop();
        self.observe(&last)
    }

    fn observe(&mut self, previous: &SessionSnapshot) -> SessionSnapshot {
        let current = self.session.snapshot();
        let changed = current.state != previous.state
            || current.error != previous.error
            || current.epoch != previous.epoch;
        if changed && let Some(observer) = self.observer.as_mut() {
            observer(&current);
        }
        current
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::backend::MockAudioBackend;
    use crate::session::manager::SessionSettings;
    use crate::session::state::SessionState;
    use crate::transport::MockTransport;
    use std::sync::{Arc, Mutex};

    fn driver(transport: MockTransport) -> (SessionDriver, SessionControl) {
        let (tx, rx) = crossbeam_channel::unbounded();
        let session = VoiceSession::new(
            SessionSettings::default(),
            Box::new(MockAudioBackend::new()),
            Box::new(transport),
            tx.clone(),
        );
        (SessionDriver::new(session, rx), SessionControl::new(tx))
    }

    #[test]
    fn run_until_shutdown() {
        let (driver, control) = driver(MockTransport::new().with_open_on_connect());

        control.start();
        control.shutdown();
        let snapshot = driver.run();

        assert_eq!(snapshot.state, SessionState::Closed);
        assert_eq!(snapshot.epoch, 1);
    }

    #[test]
    fn exit_when_finished_stops_on_error() {
        let (driver, control) = driver(MockTransport::new().with_connect_failure("offline"));

        control.start();
        let snapshot = driver.exit_when_finished().run();

        assert_eq!(snapshot.state, SessionState::Errored);
        assert!(snapshot.error.is_some());
    }

    #[test]
    fn time_limit_hangs_up() {
        let (driver, control) = driver(MockTransport::new().with_open_on_connect());

        control.start();
        let snapshot = driver.with_time_limit(Duration::from_millis(20)).run();

        assert_eq!(snapshot.state, SessionState::Closed);
    }

    #[test]
    fn observer_sees_each_state_change() {
        let (driver, control) = driver(MockTransport::new().with_open_on_connect());
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);

        control.start();
        let mut driver = driver.with_observer(move |s| sink.lock().unwrap().push(s.state));
        driver.drain();
        control.stop();
        control.shutdown();
        driver.run();

        assert_eq!(
            *seen.lock().unwrap(),
            vec![
                SessionState::Connecting,
                SessionState::Active,
                SessionState::Closed,
            ]
        );
    }

    #[test]
    fn drain_applies_queued_events() {
        let (mut driver, control) = driver(MockTransport::new().with_open_on_connect());

        control.start();
        let snapshot = driver.drain();

        assert_eq!(snapshot.state, SessionState::Active);
        assert_eq!(driver.session().state(), SessionState::Active);
    }
}
