//! Shared tooling of the unit tests

use std::sync::{
    atomic::{AtomicBool, AtomicUsize, Ordering},
    Arc, Mutex,
};

use crate::server::{ClientData, ClientId, ClientTransport, DisconnectReason, EventMessage, Interface, ObjectId};

#[cfg(feature = "client")]
mod scripted;
mod state;

#[cfg(feature = "client")]
pub use self::scripted::*;
pub use self::state::*;

/// Install a tracing subscriber writing to the test output, filtered by `RUST_LOG`
pub fn init_logging() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// A [`ClientTransport`] recording every event sent to its client
#[derive(Debug, Clone, Default)]
pub struct RecordingTransport {
    events: Arc<Mutex<Vec<EventMessage>>>,
    flushes: Arc<AtomicUsize>,
    shut_down: Arc<AtomicBool>,
    fail_flush: Arc<AtomicBool>,
}

impl RecordingTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Remove and return every recorded event
    pub fn drain(&self) -> Vec<EventMessage> {
        std::mem::take(&mut *self.events.lock().unwrap())
    }

    /// Remove and return the recorded events of interface `I`, other events are kept
    pub fn take_events<I: Interface>(&self) -> Vec<(ObjectId, I::Event)> {
        let mut events = self.events.lock().unwrap();
        let (matching, others): (Vec<_>, Vec<_>) = events
            .drain(..)
            .partition(|message| message.interface == I::NAME && message.downcast_ref::<I::Event>().is_some());
        *events = others;
        matching
            .into_iter()
            .filter_map(|message| {
                let sender = message.sender;
                message.event.downcast::<I::Event>().ok().map(|event| (sender, *event))
            })
            .collect()
    }

    /// Number of recorded events, of any interface
    pub fn len(&self) -> usize {
        self.events.lock().unwrap().len()
    }

    pub fn flushes(&self) -> usize {
        self.flushes.load(Ordering::SeqCst)
    }

    pub fn is_shut_down(&self) -> bool {
        self.shut_down.load(Ordering::SeqCst)
    }

    /// Make every following flush fail
    pub fn break_pipe(&self) {
        self.fail_flush.store(true, Ordering::SeqCst);
    }
}

impl ClientTransport for RecordingTransport {
    fn send_event(&mut self, message: EventMessage) {
        self.events.lock().unwrap().push(message);
    }

    fn flush(&mut self) -> std::io::Result<()> {
        if self.fail_flush.load(Ordering::SeqCst) {
            return Err(std::io::ErrorKind::BrokenPipe.into());
        }
        self.flushes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn shutdown(&mut self) {
        self.shut_down.store(true, Ordering::SeqCst);
    }
}

/// A [`ClientData`] remembering how its client went away
#[derive(Debug, Default)]
pub struct RecordingClientData {
    pub disconnected: Mutex<Option<DisconnectReason>>,
}

impl ClientData for RecordingClientData {
    fn disconnected(&self, _client_id: ClientId, reason: DisconnectReason) {
        *self.disconnected.lock().unwrap() = Some(reason);
    }
}
