use std::{
    collections::{BTreeSet, HashMap},
    fmt,
    sync::{Arc, Mutex, MutexGuard, PoisonError, Weak},
    thread,
};

use tracing::{debug, info_span, instrument, trace, warn};

use crate::server::{ProtocolError, SERVER_ID_BASE};

use super::{
    event_queue::{Dispatch, EventQueue, EventSink, QueueHandle, QueueWaker},
    Argument, ConnectionError, Message, ObjectId, Proxy, Transport, DISPLAY_ID,
};

// wl_display requests
const DISPLAY_SYNC: u16 = 0;
pub(super) const DISPLAY_GET_REGISTRY: u16 = 1;
// wl_display events
const DISPLAY_ERROR: u16 = 0;
const DISPLAY_DELETE_ID: u16 = 1;

/// Configuration of a [`Connection`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionConfig {
    /// Name of the thread reading events from the transport
    pub thread_name: String,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        ConnectionConfig {
            thread_name: "waystate-reader".into(),
        }
    }
}

struct ObjectEntry {
    proxy: Proxy,
    // `None` for objects whose events are not delivered anywhere
    sink: Option<Arc<dyn EventSink>>,
}

type DeathCallback = Box<dyn FnOnce(&ConnectionError) + Send>;

struct ConnectionState {
    objects: HashMap<u32, ObjectEntry>,
    // released by the server, the lowest is reused first
    free_ids: BTreeSet<u32>,
    next_id: u32,
    next_serial: u32,
    error: Option<ConnectionError>,
    death_callbacks: Vec<DeathCallback>,
    queues: Vec<Weak<dyn QueueWaker>>,
}

impl ConnectionState {
    fn next_serial(&mut self) -> u32 {
        self.next_serial = self.next_serial.wrapping_add(1);
        self.next_serial
    }

    fn insert(&mut self, protocol_id: u32, interface: &'static str, version: u32, sink: Option<Arc<dyn EventSink>>) -> Proxy {
        let serial = self.next_serial();
        let proxy = Proxy::new(ObjectId { protocol_id, serial }, interface, version);
        self.objects.insert(
            protocol_id,
            ObjectEntry {
                proxy: proxy.clone(),
                sink,
            },
        );
        proxy
    }

    fn allocate_id(&mut self) -> u32 {
        self.free_ids.pop_first().unwrap_or_else(|| {
            let id = self.next_id;
            self.next_id += 1;
            id
        })
    }
}

struct ConnectionInner {
    transport: Box<dyn Transport>,
    state: Mutex<ConnectionState>,
    span: tracing::Span,
}

impl ConnectionInner {
    // A handler panicking while the state is locked must not take the reader thread down with
    // it: the state is only updated in single steps, so it stays consistent after a poisoning.
    fn state(&self) -> MutexGuard<'_, ConnectionState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn error(&self) -> Option<ConnectionError> {
        self.state().error.clone()
    }

    // Only the first error is kept, the death callbacks run once
    fn die(&self, error: ConnectionError) {
        let (callbacks, queues) = {
            let mut state = self.state();
            if state.error.is_some() {
                return;
            }
            state.error = Some(error.clone());
            (
                std::mem::take(&mut state.death_callbacks),
                std::mem::take(&mut state.queues),
            )
        };
        match &error {
            ConnectionError::Died => debug!("server hung up"),
            error => warn!(%error, "connection died"),
        }
        for callback in callbacks {
            callback(&error);
        }
        for queue in queues.iter().filter_map(Weak::upgrade) {
            queue.wake();
        }
    }

    fn handle_display_event(&self, message: Message) {
        match message.opcode {
            DISPLAY_ERROR => {
                let object_id = message.args.first().and_then(Argument::as_object).unwrap_or(0);
                let code = message.args.get(1).and_then(Argument::as_uint).unwrap_or(0);
                let text = message.args.get(2).and_then(Argument::as_str).unwrap_or_default();
                let object_interface = self
                    .state()
                    .objects
                    .get(&object_id)
                    .map(|entry| entry.proxy.interface())
                    .unwrap_or("unknown");
                self.die(ConnectionError::Protocol(ProtocolError {
                    code,
                    object_id,
                    object_interface: object_interface.into(),
                    message: text.into(),
                }));
            }
            DISPLAY_DELETE_ID => {
                let Some(id) = message.args.first().and_then(Argument::as_uint) else {
                    warn!(?message, "malformed delete_id");
                    return;
                };
                let mut state = self.state();
                if state.objects.remove(&id).is_some() && id < SERVER_ID_BASE {
                    state.free_ids.insert(id);
                }
                trace!(id, "object id released");
            }
            opcode => warn!(opcode, "unknown wl_display event"),
        }
    }

    fn route(&self, message: Message) {
        if message.sender_id == DISPLAY_ID {
            self.handle_display_event(message);
            return;
        }

        let target = {
            let mut state = self.state();
            let Some(entry) = state.objects.get(&message.sender_id) else {
                debug!(id = message.sender_id, "event for an unknown object dropped");
                return;
            };
            let proxy = entry.proxy.clone();
            let sink = entry.sink.clone();

            // objects created by the server are registered before any event can reach them
            for child_id in message.new_ids() {
                let child = sink.as_ref().and_then(|sink| sink.child(message.opcode));
                let (interface, child_sink) = match child {
                    Some((interface, child_sink)) => (interface, Some(child_sink)),
                    None => {
                        debug!(parent = proxy.interface(), opcode = message.opcode, "unhandled child object");
                        ("unknown", None)
                    }
                };
                state.insert(child_id, interface, proxy.version(), child_sink);
            }
            sink.map(|sink| (proxy, sink))
        };

        match target {
            Some((proxy, sink)) if proxy.is_alive() => sink.push(proxy, message),
            Some((proxy, _)) => trace!(object = %proxy.id(), "event for a destroyed object dropped"),
            None => trace!(id = message.sender_id, "event for an inert object dropped"),
        }
    }
}

fn read_events(inner: Arc<ConnectionInner>) {
    let _span = inner.span.clone().entered();
    // leaving this loop in any way kills the connection
    let inner = scopeguard::guard(inner, |inner| inner.die(ConnectionError::Died));
    loop {
        match inner.transport.recv() {
            Ok(Some(message)) => {
                trace!(?message, "event received");
                inner.route(message);
            }
            Ok(None) => break,
            Err(err) => {
                inner.die(err.into());
                break;
            }
        }
        if inner.error().is_some() {
            break;
        }
    }
}

/// A connection to a server
///
/// This is a cheaply cloneable handle. The reading thread keeps the connection alive until the
/// transport stops delivering events.
#[derive(Clone)]
pub struct Connection {
    inner: Arc<ConnectionInner>,
}

impl fmt::Debug for Connection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connection")
            .field("error", &self.inner.error())
            .finish_non_exhaustive()
    }
}

impl Connection {
    /// Start a connection over `transport`
    ///
    /// This spawns the thread reading events from the transport.
    pub fn new(transport: impl Transport, config: ConnectionConfig) -> Result<Connection, ConnectionError> {
        let mut state = ConnectionState {
            objects: HashMap::new(),
            free_ids: BTreeSet::new(),
            next_id: DISPLAY_ID + 1,
            next_serial: 0,
            error: None,
            death_callbacks: Vec::new(),
            queues: Vec::new(),
        };
        state.insert(DISPLAY_ID, "wl_display", 1, None);

        let inner = Arc::new(ConnectionInner {
            transport: Box::new(transport),
            state: Mutex::new(state),
            span: info_span!("client_connection"),
        });

        let reader = inner.clone();
        thread::Builder::new()
            .name(config.thread_name)
            .spawn(move || read_events(reader))?;

        Ok(Connection { inner })
    }

    /// The `wl_display` object
    pub fn display(&self) -> Proxy {
        self.object(DISPLAY_ID)
            .unwrap_or_else(|| unreachable!("the display object is never removed"))
    }

    /// Create a new event queue
    pub fn new_event_queue<S: 'static>(&self) -> EventQueue<S> {
        let queue = EventQueue::new(self.clone());
        let waker = queue.handle().waker();
        let mut state = self.inner.state();
        if state.error.is_some() {
            drop(state);
            waker.wake();
        } else {
            state.queues.retain(|queue| queue.strong_count() > 0);
            state.queues.push(Arc::downgrade(&waker));
        }
        queue
    }

    /// Register a new object created by the client
    ///
    /// The events of the object are delivered to `handler` through the queue of `qh`. The
    /// returned proxy carries the protocol id to put in the request creating the object.
    pub fn create_object<S: 'static>(
        &self,
        interface: &'static str,
        version: u32,
        qh: &QueueHandle<S>,
        handler: impl Dispatch<S>,
    ) -> Proxy {
        let sink = qh.sink(Arc::new(handler));
        let mut state = self.inner.state();
        let id = state.allocate_id();
        state.insert(id, interface, version, Some(sink))
    }

    /// Look up a live object by its protocol id
    pub fn object(&self, protocol_id: u32) -> Option<Proxy> {
        self.inner
            .state()
            .objects
            .get(&protocol_id)
            .map(|entry| entry.proxy.clone())
    }

    /// Send a request to `proxy`
    ///
    /// Requests to destroyed objects, or sent once the connection is dead, are dropped.
    #[instrument(level = "trace", parent = &self.inner.span, skip(self, args), fields(object = %proxy.id(), interface = proxy.interface()))]
    pub fn send_request(&self, proxy: &Proxy, opcode: u16, args: impl IntoIterator<Item = Argument>) {
        if !proxy.is_alive() {
            debug!("request to a destroyed object dropped");
            return;
        }
        if self.inner.error().is_some() {
            trace!("request on a dead connection dropped");
            return;
        }
        let message = Message::new(proxy.protocol_id(), opcode, args);
        if let Err(err) = self.inner.transport.send(message) {
            self.inner.die(err.into());
        }
    }

    /// Ask the server for a `wl_callback` signaled once every previous request was processed
    pub fn sync<S: 'static>(&self, qh: &QueueHandle<S>, handler: impl Dispatch<S>) -> Proxy {
        let callback = self.create_object("wl_callback", 1, qh, handler);
        self.send_request(
            &self.display(),
            DISPLAY_SYNC,
            [Argument::NewId(callback.protocol_id())],
        );
        callback
    }

    /// Write the pending requests to the server
    pub fn flush(&self) -> Result<(), ConnectionError> {
        if let Some(error) = self.inner.error() {
            return Err(error);
        }
        self.inner.transport.flush().map_err(|err| {
            let err = ConnectionError::from(err);
            self.inner.die(err.clone());
            err
        })
    }

    /// Whether the connection is still usable
    pub fn is_alive(&self) -> bool {
        self.inner.error().is_none()
    }

    /// The error that killed the connection, if it is dead
    pub fn error(&self) -> Option<ConnectionError> {
        self.inner.error()
    }

    /// Run `callback` once the connection dies
    ///
    /// If the connection is already dead, `callback` runs immediately.
    pub fn on_death<F>(&self, callback: F)
    where
        F: FnOnce(&ConnectionError) + Send + 'static,
    {
        let error = {
            let mut state = self.inner.state();
            match &state.error {
                Some(error) => error.clone(),
                None => {
                    state.death_callbacks.push(Box::new(callback));
                    return;
                }
            }
        };
        callback(&error);
    }
}
