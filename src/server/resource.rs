use std::{
    any::Any,
    fmt,
    hash::{Hash, Hasher},
    marker::PhantomData,
    sync::{Arc, Weak as ArcWeak},
};

use crate::utils::IsAlive;

use super::{
    dispatch::ResourceData,
    display::{DisplayHandle, WeakHandle},
    Client, ClientId, Interface, InvalidId, ObjectId,
};

/// A protocol object bound by a client, of interface `I`
///
/// This is a handle: cloning it is cheap and all clones designate the same object. Holding a
/// handle keeps the associated user data alive, but not the object itself: once the object
/// is destroyed (by the client, by the server or because its client disconnected) the handle
/// becomes inert, [`Resource::is_alive`] returns `false` and events sent through it are
/// dropped.
pub struct Resource<I: Interface> {
    id: ObjectId,
    version: u32,
    data: Option<Arc<dyn Any + Send + Sync>>,
    handle: WeakHandle,
    _i: PhantomData<fn() -> I>,
}

impl<I: Interface> Resource<I> {
    pub(crate) fn from_parts(
        id: ObjectId,
        version: u32,
        data: Option<Arc<dyn Any + Send + Sync>>,
        handle: WeakHandle,
    ) -> Self {
        Resource {
            id,
            version,
            data,
            handle,
            _i: PhantomData,
        }
    }

    /// Retrieve a handle to an object from its id
    ///
    /// Fails if the object is dead or not of interface `I`.
    pub fn from_id(handle: &DisplayHandle, id: ObjectId) -> Result<Self, InvalidId> {
        let info = handle.object_info(id)?;
        if info.interface != I::NAME {
            return Err(InvalidId);
        }
        Ok(Resource::from_parts(
            id,
            info.version,
            Some(handle.object_data(id)?),
            handle.downgrade(),
        ))
    }

    /// Id of this object
    pub fn id(&self) -> ObjectId {
        self.id
    }

    /// Version of the interface this object was created with
    pub fn version(&self) -> u32 {
        self.version
    }

    /// Id of the client owning this object
    pub fn client_id(&self) -> ClientId {
        self.id.client
    }

    /// Handle to the client owning this object, if it is still connected
    pub fn client(&self) -> Option<Client> {
        self.handle
            .upgrade()
            .and_then(|dh| dh.get_client(self.id.client).ok())
    }

    /// Access the user data associated with this object
    ///
    /// Returns `None` if the data is not of type `U`.
    pub fn data<U: 'static>(&self) -> Option<&U> {
        self.data
            .as_ref()
            .and_then(|data| (**data).downcast_ref::<ResourceData<I, U>>())
            .map(|data| &data.udata)
    }

    /// Check if this object is still alive
    pub fn is_alive(&self) -> bool {
        self.handle
            .upgrade()
            .map(|dh| dh.object_info(self.id).is_ok())
            .unwrap_or(false)
    }

    /// Id of the object this one was created from, if it is still alive
    pub fn parent(&self) -> Option<ObjectId> {
        self.handle.upgrade().and_then(|dh| dh.object_parent(self.id))
    }

    /// Send an event to the client through this object
    ///
    /// Events sent to a dead object are silently dropped.
    pub fn send_event(&self, event: I::Event) {
        if let Err(InvalidId) = self.try_send_event(event) {
            tracing::trace!(object = ?self.id, interface = I::NAME, "dropping event for dead object");
        }
    }

    /// Send an event to the client, reporting whether the object was alive
    pub fn try_send_event(&self, event: I::Event) -> Result<(), InvalidId> {
        let handle = self.handle.upgrade().ok_or(InvalidId)?;
        handle.send_event(self.id, I::NAME, Box::new(event))
    }

    /// Post a protocol error on this object
    ///
    /// This kills the client owning the object once the current request is processed. Only
    /// that client is affected.
    pub fn post_error(&self, code: impl Into<u32>, message: impl Into<String>) {
        if let Some(handle) = self.handle.upgrade() {
            handle.post_error(self.id, I::NAME, code.into(), message.into());
        }
    }

    /// Create a weak handle to this object
    pub fn downgrade(&self) -> Weak<I> {
        Weak {
            id: self.id,
            version: self.version,
            data: self.data.as_ref().map(Arc::downgrade),
            handle: self.handle.clone(),
            _i: PhantomData,
        }
    }
}

impl<I: Interface> IsAlive for Resource<I> {
    #[inline]
    fn alive(&self) -> bool {
        self.is_alive()
    }
}

impl<I: Interface> Clone for Resource<I> {
    fn clone(&self) -> Self {
        Resource {
            id: self.id,
            version: self.version,
            data: self.data.clone(),
            handle: self.handle.clone(),
            _i: PhantomData,
        }
    }
}

impl<I: Interface> PartialEq for Resource<I> {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl<I: Interface> Eq for Resource<I> {}

impl<I: Interface> PartialEq<Weak<I>> for Resource<I> {
    fn eq(&self, other: &Weak<I>) -> bool {
        self.id == other.id
    }
}

impl<I: Interface> Hash for Resource<I> {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.id.hash(state)
    }
}

impl<I: Interface> fmt::Debug for Resource<I> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", I::NAME, self.id.protocol_id)
    }
}

/// A weak handle to a protocol object
///
/// It does not keep the user data of the object alive, and upgrading it fails once the
/// object is dead.
pub struct Weak<I: Interface> {
    id: ObjectId,
    version: u32,
    data: Option<ArcWeak<dyn Any + Send + Sync>>,
    handle: WeakHandle,
    _i: PhantomData<fn() -> I>,
}

impl<I: Interface> Weak<I> {
    /// Try to get a strong handle to the object
    pub fn upgrade(&self) -> Result<Resource<I>, InvalidId> {
        let data = match &self.data {
            Some(data) => Some(data.upgrade().ok_or(InvalidId)?),
            None => None,
        };
        let resource = Resource::from_parts(self.id, self.version, data, self.handle.clone());
        if resource.is_alive() {
            Ok(resource)
        } else {
            Err(InvalidId)
        }
    }

    /// Id of the object
    pub fn id(&self) -> ObjectId {
        self.id
    }

    /// Whether the object is still alive
    pub fn is_alive(&self) -> bool {
        self.upgrade().is_ok()
    }
}

impl<I: Interface> Clone for Weak<I> {
    fn clone(&self) -> Self {
        Weak {
            id: self.id,
            version: self.version,
            data: self.data.clone(),
            handle: self.handle.clone(),
            _i: PhantomData,
        }
    }
}

impl<I: Interface> PartialEq for Weak<I> {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl<I: Interface> Eq for Weak<I> {}

impl<I: Interface> fmt::Debug for Weak<I> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Weak({}@{})", I::NAME, self.id.protocol_id)
    }
}

/// A client-allocated id for an object that is yet to be created
///
/// It is received as part of a request and must be turned into a [`Resource`] with
/// [`DataInit::init`](super::DataInit::init).
pub struct New<I> {
    id: u32,
    _i: PhantomData<fn() -> I>,
}

impl<I> New<I> {
    /// Wrap a protocol id chosen by the client
    pub fn wrap(id: u32) -> New<I> {
        New { id, _i: PhantomData }
    }

    /// The protocol id chosen by the client
    pub fn protocol_id(&self) -> u32 {
        self.id
    }
}

impl<I: Interface> fmt::Debug for New<I> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "New({}@{})", I::NAME, self.id)
    }
}
