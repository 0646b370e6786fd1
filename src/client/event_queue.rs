use std::{
    collections::VecDeque,
    fmt,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc, Condvar, Mutex,
    },
};

use tracing::trace;

use super::{Connection, ConnectionError, Message, Proxy};

/// Handler of the events of client side objects
///
/// Closures with the signature of [`event`](Dispatch::event) implement this trait.
pub trait Dispatch<S>: Send + Sync + 'static {
    /// An event was received for `proxy`
    fn event(&self, state: &mut S, proxy: &Proxy, event: Message, conn: &Connection, qh: &QueueHandle<S>);

    /// Interface and handler of the objects created by the server through the event `opcode`
    ///
    /// Returning `None` makes such objects inert, their events are dropped.
    fn event_created_child(&self, opcode: u16) -> Option<(&'static str, Arc<dyn Dispatch<S>>)> {
        let _ = opcode;
        None
    }
}

impl<S, F> Dispatch<S> for F
where
    F: Fn(&mut S, &Proxy, Message, &Connection, &QueueHandle<S>) + Send + Sync + 'static,
{
    fn event(&self, state: &mut S, proxy: &Proxy, event: Message, conn: &Connection, qh: &QueueHandle<S>) {
        self(state, proxy, event, conn, qh)
    }
}

/// Receiver of the events of one object, on behalf of the reading thread
pub(super) trait EventSink: Send + Sync {
    fn push(&self, proxy: Proxy, message: Message);
    fn child(&self, opcode: u16) -> Option<(&'static str, Arc<dyn EventSink>)>;
}

/// Wakes up the threads blocked on a queue
pub(super) trait QueueWaker: Send + Sync {
    fn wake(&self);
}

struct QueuedEvent<S> {
    proxy: Proxy,
    message: Message,
    handler: Arc<dyn Dispatch<S>>,
}

struct QueueInner<S> {
    events: Mutex<VecDeque<QueuedEvent<S>>>,
    condvar: Condvar,
}

impl<S: 'static> QueueWaker for QueueInner<S> {
    fn wake(&self) {
        let _events = self.events.lock().unwrap();
        self.condvar.notify_all();
    }
}

struct ObjectSink<S> {
    queue: Arc<QueueInner<S>>,
    handler: Arc<dyn Dispatch<S>>,
}

impl<S: 'static> EventSink for ObjectSink<S> {
    fn push(&self, proxy: Proxy, message: Message) {
        self.queue.events.lock().unwrap().push_back(QueuedEvent {
            proxy,
            message,
            handler: self.handler.clone(),
        });
        self.queue.condvar.notify_all();
    }

    fn child(&self, opcode: u16) -> Option<(&'static str, Arc<dyn EventSink>)> {
        self.handler
            .event_created_child(opcode)
            .map(|(interface, handler)| {
                let sink: Arc<dyn EventSink> = Arc::new(ObjectSink {
                    queue: self.queue.clone(),
                    handler,
                });
                (interface, sink)
            })
    }
}

/// A handle to an [`EventQueue`], used to create objects whose events go to this queue
pub struct QueueHandle<S> {
    inner: Arc<QueueInner<S>>,
}

impl<S> Clone for QueueHandle<S> {
    fn clone(&self) -> Self {
        QueueHandle {
            inner: self.inner.clone(),
        }
    }
}

impl<S> fmt::Debug for QueueHandle<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("QueueHandle")
            .field("pending", &self.inner.events.lock().unwrap().len())
            .finish()
    }
}

impl<S: 'static> QueueHandle<S> {
    pub(super) fn sink(&self, handler: Arc<dyn Dispatch<S>>) -> Arc<dyn EventSink> {
        Arc::new(ObjectSink {
            queue: self.inner.clone(),
            handler,
        })
    }

    pub(super) fn waker(&self) -> Arc<dyn QueueWaker> {
        self.inner.clone()
    }
}

/// A queue of events, dispatched on demand by the application
///
/// Events are dispatched in the order the server sent them, events of objects destroyed in the
/// meantime are dropped.
pub struct EventQueue<S> {
    handle: QueueHandle<S>,
    conn: Connection,
}

impl<S> fmt::Debug for EventQueue<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventQueue").field("handle", &self.handle).finish()
    }
}

impl<S: 'static> EventQueue<S> {
    pub(super) fn new(conn: Connection) -> Self {
        EventQueue {
            handle: QueueHandle {
                inner: Arc::new(QueueInner {
                    events: Mutex::new(VecDeque::new()),
                    condvar: Condvar::new(),
                }),
            },
            conn,
        }
    }

    /// A handle to this queue
    pub fn handle(&self) -> QueueHandle<S> {
        self.handle.clone()
    }

    /// Dispatch the events already in the queue, without blocking
    ///
    /// Returns the number of dispatched events. Fails with the error of the connection if it is
    /// dead and nothing was left to dispatch.
    pub fn dispatch_pending(&mut self, state: &mut S) -> Result<usize, ConnectionError> {
        let dispatched = self.dispatch_until(state, || false);
        match self.conn.error() {
            Some(error) if dispatched == 0 => Err(error),
            _ => Ok(dispatched),
        }
    }

    // Dispatch the queued events in order, stopping early once `stop` holds
    fn dispatch_until(&mut self, state: &mut S, stop: impl Fn() -> bool) -> usize {
        let mut dispatched = 0;
        while !stop() {
            // the lock is released before calling the handler, which may queue more events
            let Some(event) = self.handle.inner.events.lock().unwrap().pop_front() else {
                break;
            };
            if !event.proxy.is_alive() {
                trace!(object = %event.proxy.id(), "event for a destroyed object dropped");
                continue;
            }
            event
                .handler
                .event(state, &event.proxy, event.message, &self.conn, &self.handle);
            dispatched += 1;
        }
        dispatched
    }

    // Flush the connection, then block until the queue is not empty or the connection died
    fn wait_for_events(&self) {
        // a failed flush is reported once the queue is drained
        let _ = self.conn.flush();
        let mut events = self.handle.inner.events.lock().unwrap();
        while events.is_empty() && self.conn.is_alive() {
            events = self.handle.inner.condvar.wait(events).unwrap();
        }
    }

    /// Flush the connection, then dispatch the queued events, blocking until there is at least one
    pub fn blocking_dispatch(&mut self, state: &mut S) -> Result<usize, ConnectionError> {
        self.wait_for_events();
        self.dispatch_pending(state)
    }

    /// Block until the server processed every request sent so far
    ///
    /// The events received before the answer of the server are dispatched in order, the ones
    /// that follow it stay queued. Returns the number of dispatched events.
    pub fn roundtrip(&mut self, state: &mut S) -> Result<usize, ConnectionError> {
        let done = Arc::new(AtomicBool::new(false));
        let signal = done.clone();
        let callback = self.conn.sync(
            &self.handle,
            move |_: &mut S, _: &Proxy, _: Message, _: &Connection, _: &QueueHandle<S>| {
                signal.store(true, Ordering::Release);
            },
        );
        let _callback = scopeguard::guard(callback, |callback| callback.destroy());

        let mut dispatched = 0;
        while !done.load(Ordering::Acquire) {
            self.wait_for_events();
            let count = self.dispatch_until(state, || done.load(Ordering::Acquire));
            if count == 0 {
                if let Some(error) = self.conn.error() {
                    return Err(error);
                }
            }
            dispatched += count;
        }
        // the done event itself
        Ok(dispatched.saturating_sub(1))
    }

    /// Write the pending requests to the server
    pub fn flush(&self) -> Result<(), ConnectionError> {
        self.conn.flush()
    }
}
