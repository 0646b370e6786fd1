use std::{any::Any, fmt, io, sync::Arc};

use downcast_rs::{impl_downcast, Downcast, DowncastSync};

use crate::utils::{Serial, SerialCounter};

use super::{
    dispatch::{Dispatch, ResourceData},
    display::{DisplayHandle, WeakHandle},
    ClientId, Interface, InvalidId, ObjectId, Resource,
};

/// Payload of an event, as handed to the transport
///
/// This is the typed `Event` enum of the interface of the sending object, the transport is
/// expected to downcast it to serialize it.
pub trait EventPayload: Downcast + fmt::Debug + Send {}
impl_downcast!(EventPayload);

impl<T: Any + fmt::Debug + Send> EventPayload for T {}

/// An event sent by the server to one of its clients
#[derive(Debug)]
pub struct EventMessage {
    /// The object sending the event
    pub sender: ObjectId,
    /// Interface name of the sending object
    pub interface: &'static str,
    /// The event itself
    pub event: Box<dyn EventPayload>,
}

impl EventMessage {
    /// Access the event as the `Event` type of a given interface
    pub fn downcast_ref<E: EventPayload>(&self) -> Option<&E> {
        self.event.as_ref().downcast_ref::<E>()
    }
}

/// Server side of a client connection, as provided by the transport layer
///
/// The transport is responsible for serializing events and writing them to the peer.
/// It is owned by its [`Display`](super::Display) and only ever used from the dispatch thread.
pub trait ClientTransport: Send {
    /// Queue an event for the client
    fn send_event(&mut self, message: EventMessage);
    /// Write all queued events to the peer
    fn flush(&mut self) -> io::Result<()>;
    /// The connection is being torn down, no more events will be sent
    fn shutdown(&mut self) {}
}

/// A fatal protocol error, terminating the connection of the offending client
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("protocol error {code} on {object_interface}@{object_id}: {message}")]
pub struct ProtocolError {
    /// The interface-specific error code
    pub code: u32,
    /// Protocol id of the object the error was posted on
    pub object_id: u32,
    /// Interface of that object
    pub object_interface: String,
    /// Human readable description
    pub message: String,
}

/// Reason for a client disconnection
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DisconnectReason {
    /// The peer closed the connection or the transport failed
    ConnectionClosed,
    /// The server killed the client because of a protocol error
    ProtocolError(ProtocolError),
}

/// Data associated with a client connection
pub trait ClientData: DowncastSync {
    /// Notification that the client was initialized
    fn initialized(&self, _client_id: ClientId) {}
    /// Notification that the client was disconnected, after all its objects were destroyed
    fn disconnected(&self, _client_id: ClientId, _reason: DisconnectReason) {}
}
impl_downcast!(sync ClientData);

impl fmt::Debug for dyn ClientData {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClientData").finish_non_exhaustive()
    }
}

/// A [`ClientData`] with no content
#[derive(Debug, Default)]
pub struct NoClientData;

impl ClientData for NoClientData {}

/// Handle to a client connection
#[derive(Clone)]
pub struct Client {
    pub(crate) id: ClientId,
    pub(crate) data: Arc<dyn ClientData>,
    pub(crate) serials: Arc<SerialCounter>,
    pub(crate) handle: WeakHandle,
}

impl fmt::Debug for Client {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Client").field("id", &self.id).finish_non_exhaustive()
    }
}

impl PartialEq for Client {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Client {
    /// Id of this client
    pub fn id(&self) -> ClientId {
        self.id
    }

    /// Access the data associated with this client
    ///
    /// Returns `None` if the data is not of type `T`.
    pub fn get_data<T: ClientData>(&self) -> Option<&T> {
        self.data.as_ref().downcast_ref::<T>()
    }

    /// Allocate a new serial from the counter of this connection
    pub fn next_serial(&self) -> Serial {
        self.serials.next_serial()
    }

    /// Last serial handed out on this connection, if any
    pub fn last_serial(&self) -> Option<Serial> {
        self.serials.last_serial()
    }

    /// Whether this client is still connected and not scheduled for destruction
    pub fn is_alive(&self) -> bool {
        self.handle
            .upgrade()
            .map(|dh| dh.client_is_alive(self.id))
            .unwrap_or(false)
    }

    /// Create a new server-allocated object for this client
    ///
    /// The object gets an id from the server range. It is typically announced to the
    /// client by an event carrying it as a `new_id` argument.
    pub fn create_resource<I, U, D>(
        &self,
        handle: &DisplayHandle,
        version: u32,
        data: U,
    ) -> Result<Resource<I>, InvalidId>
    where
        I: Interface,
        U: Send + Sync + 'static,
        D: Dispatch<I, U> + 'static,
    {
        let data = Arc::new(ResourceData::<I, U>::new(data));
        let dispatcher = ResourceData::<I, U>::dispatcher::<D>(data.clone());
        handle.insert_object(
            self.id,
            None,
            I::NAME,
            version,
            None,
            None,
            data as Arc<dyn Any + Send + Sync>,
            dispatcher,
        )
        .map(|(id, data)| Resource::from_parts(id, version, Some(data), handle.downgrade()))
    }

    /// Kill this client with a protocol error posted on its display object
    pub fn kill(&self, handle: &DisplayHandle, error: ProtocolError) {
        handle.kill_client(self.id, DisconnectReason::ProtocolError(error));
    }
}
