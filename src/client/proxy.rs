use std::{
    fmt,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
};

/// Identity of a client side object
///
/// Protocol ids are recycled once the server acknowledged the destruction of an object, the
/// `serial` tells apart successive objects sharing a protocol id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ObjectId {
    pub(crate) protocol_id: u32,
    pub(crate) serial: u32,
}

impl ObjectId {
    /// The protocol id of the object
    pub fn protocol_id(&self) -> u32 {
        self.protocol_id
    }
}

impl fmt::Display for ObjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.protocol_id)
    }
}

#[derive(Debug)]
struct ProxyInner {
    id: ObjectId,
    interface: &'static str,
    version: u32,
    alive: AtomicBool,
}

/// Handle to a client side object
#[derive(Debug, Clone)]
pub struct Proxy {
    inner: Arc<ProxyInner>,
}

impl PartialEq for Proxy {
    fn eq(&self, other: &Self) -> bool {
        self.inner.id == other.inner.id
    }
}

impl Eq for Proxy {}

impl Proxy {
    pub(crate) fn new(id: ObjectId, interface: &'static str, version: u32) -> Self {
        Proxy {
            inner: Arc::new(ProxyInner {
                id,
                interface,
                version,
                alive: AtomicBool::new(true),
            }),
        }
    }

    /// Identity of the object
    pub fn id(&self) -> ObjectId {
        self.inner.id
    }

    /// Protocol id of the object
    pub fn protocol_id(&self) -> u32 {
        self.inner.id.protocol_id
    }

    /// Name of the interface of the object
    pub fn interface(&self) -> &'static str {
        self.inner.interface
    }

    /// Version of the object
    pub fn version(&self) -> u32 {
        self.inner.version
    }

    /// Whether the object was not destroyed yet
    pub fn is_alive(&self) -> bool {
        self.inner.alive.load(Ordering::Acquire)
    }

    /// Mark the object as destroyed
    ///
    /// Requests to this object are dropped from now on, as well as its events, including the
    /// ones already waiting in its queue. Sending the destructor request of the interface, if
    /// there is one, is up to the caller. Destroying an object twice does nothing.
    pub fn destroy(&self) {
        self.inner.alive.store(false, Ordering::Release);
    }
}
