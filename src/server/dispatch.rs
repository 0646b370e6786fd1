use std::{any::Any, marker::PhantomData, sync::Arc};

use tracing::debug;

use super::{
    display::DisplayHandle, Client, ClientId, DispatchError, Interface, InvalidId, New, ObjectId, Resource,
};

/// Handling of the requests of an interface
///
/// This trait is implemented by the compositor state `State` for every `(interface, user data)`
/// pair it handles. Protocol modules of this crate implement it on their own `*State` type
/// for any `State` satisfying their handler trait, and the compositor forwards to them with the
/// provided `delegate_*!` macros.
pub trait Dispatch<I: Interface, UserData, State = Self>: Sized {
    /// A request was received for an object of this interface
    fn request(
        state: &mut State,
        client: &Client,
        resource: &Resource<I>,
        request: I::Request,
        data: &UserData,
        dhandle: &DisplayHandle,
        data_init: &mut DataInit<'_, State>,
    );

    /// The object was destroyed and is no longer addressable
    ///
    /// This runs exactly once per object, before its user data is released.
    fn destroyed(_state: &mut State, _client: ClientId, _resource: &Resource<I>, _data: &UserData) {}
}

/// Handling of the binding of a global
pub trait GlobalDispatch<I: Interface, GlobalData, State = Self>: Sized {
    /// A client binds this global
    ///
    /// The `resource` must be initialized with `data_init`.
    fn bind(
        state: &mut State,
        handle: &DisplayHandle,
        client: &Client,
        resource: New<I>,
        global_data: &GlobalData,
        data_init: &mut DataInit<'_, State>,
    );

    /// Whether the global should be advertised to this client
    fn can_view(_client: &Client, _global_data: &GlobalData) -> bool {
        true
    }
}

/// Helper to initialize the objects created by a request
#[derive(Debug)]
pub struct DataInit<'a, D> {
    pub(crate) handle: &'a DisplayHandle,
    pub(crate) client: ClientId,
    pub(crate) parent: Option<ObjectId>,
    pub(crate) version: u32,
    pub(crate) global: Option<u32>,
    pub(crate) _state: PhantomData<fn(&mut D)>,
}

impl<D: 'static> DataInit<'_, D> {
    /// Initialize a new object with its user data
    ///
    /// The object inherits the version of the object that created it, and is recorded as one
    /// of its children. If the client picked an id that is already in use, the client is killed
    /// and an inert handle is returned.
    pub fn init<I, U>(&mut self, resource: New<I>, data: U) -> Resource<I>
    where
        I: Interface,
        U: Send + Sync + 'static,
        D: Dispatch<I, U>,
    {
        let data = Arc::new(ResourceData::<I, U>::new(data));
        let dispatcher = ResourceData::<I, U>::dispatcher::<D>(data.clone());
        self.insert(resource, data, dispatcher)
    }

    /// Initialize a new object that never receives requests
    ///
    /// This is used for objects such as `wl_callback`. Any request sent to it is a
    /// protocol error.
    pub fn init_inert<I: Interface>(&mut self, resource: New<I>) -> Resource<I> {
        let data: Arc<dyn Any + Send + Sync> = Arc::new(InertData);
        let dispatcher: Arc<dyn ObjectData<D>> = Arc::new(InertData);
        self.insert(resource, data, Box::new(dispatcher))
    }

    fn insert<I: Interface>(
        &mut self,
        resource: New<I>,
        data: Arc<dyn Any + Send + Sync>,
        dispatcher: Box<dyn Any + Send + Sync>,
    ) -> Resource<I> {
        match self.handle.insert_object(
            self.client,
            Some(resource.protocol_id()),
            I::NAME,
            self.version,
            self.parent,
            self.global,
            data.clone(),
            dispatcher,
        ) {
            Ok((id, data)) => Resource::from_parts(id, self.version, Some(data), self.handle.downgrade()),
            Err(InvalidId) => {
                debug!(
                    interface = I::NAME,
                    id = resource.protocol_id(),
                    "object could not be created"
                );
                Resource::from_parts(
                    ObjectId {
                        client: self.client,
                        protocol_id: resource.protocol_id(),
                        generation: 0,
                    },
                    self.version,
                    Some(data),
                    self.handle.downgrade(),
                )
            }
        }
    }
}

/// Header of an object, as needed by its dispatcher
#[derive(Debug)]
pub(crate) struct ObjectHeader {
    pub id: ObjectId,
    pub version: u32,
    pub interface: &'static str,
    pub data: Arc<dyn Any + Send + Sync>,
}

/// Type-erased request handling of an object, for a compositor state `D`
pub(crate) trait ObjectData<D>: Send + Sync {
    fn request(
        self: Arc<Self>,
        handle: &DisplayHandle,
        state: &mut D,
        client: &Client,
        target: ObjectHeader,
        request: Box<dyn Any + Send>,
    ) -> Result<(), DispatchError>;

    fn destroyed(self: Arc<Self>, handle: &DisplayHandle, state: &mut D, client: ClientId, target: ObjectHeader);
}

/// Storage of the user data of an object of interface `I`
pub(crate) struct ResourceData<I, U> {
    pub(crate) udata: U,
    _i: PhantomData<fn() -> I>,
}

impl<I: Interface, U: Send + Sync + 'static> ResourceData<I, U> {
    pub(crate) fn new(udata: U) -> Self {
        ResourceData {
            udata,
            _i: PhantomData,
        }
    }

    /// The dispatcher of this object for state `D`, boxed for type-erased storage
    pub(crate) fn dispatcher<D>(self: Arc<Self>) -> Box<dyn Any + Send + Sync>
    where
        D: Dispatch<I, U> + 'static,
    {
        let dispatcher: Arc<dyn ObjectData<D>> = self;
        Box::new(dispatcher)
    }
}

impl<I, U, D> ObjectData<D> for ResourceData<I, U>
where
    I: Interface,
    U: Send + Sync + 'static,
    D: Dispatch<I, U> + 'static,
{
    fn request(
        self: Arc<Self>,
        handle: &DisplayHandle,
        state: &mut D,
        client: &Client,
        target: ObjectHeader,
        request: Box<dyn Any + Send>,
    ) -> Result<(), DispatchError> {
        let request = request
            .downcast::<I::Request>()
            .map_err(|_| DispatchError::InterfaceMismatch {
                expected: I::NAME,
                found: target.interface,
            })?;
        let resource = Resource::<I>::from_parts(target.id, target.version, Some(target.data), handle.downgrade());
        let mut data_init = DataInit {
            handle,
            client: client.id(),
            parent: Some(target.id),
            version: target.version,
            global: None,
            _state: PhantomData,
        };
        D::request(
            state,
            client,
            &resource,
            *request,
            &self.udata,
            handle,
            &mut data_init,
        );
        Ok(())
    }

    fn destroyed(self: Arc<Self>, handle: &DisplayHandle, state: &mut D, client: ClientId, target: ObjectHeader) {
        let resource = Resource::<I>::from_parts(target.id, target.version, Some(target.data), handle.downgrade());
        D::destroyed(state, client, &resource, &self.udata);
    }
}

/// Dispatcher of objects that do not accept any request
pub(crate) struct InertData;

impl<D> ObjectData<D> for InertData {
    fn request(
        self: Arc<Self>,
        handle: &DisplayHandle,
        _state: &mut D,
        _client: &Client,
        target: ObjectHeader,
        _request: Box<dyn Any + Send>,
    ) -> Result<(), DispatchError> {
        handle.post_error(
            target.id,
            target.interface,
            crate::protocol::wl_display::Error::InvalidMethod as u32,
            format!("{} does not accept requests", target.interface),
        );
        Ok(())
    }

    fn destroyed(self: Arc<Self>, _: &DisplayHandle, _: &mut D, _: ClientId, _: ObjectHeader) {}
}

/// Type-erased bind handling of a global, for a compositor state `D`
pub(crate) trait GlobalHandler<D>: Send + Sync {
    fn can_view(&self, client: &Client) -> bool;

    fn bind(
        self: Arc<Self>,
        handle: &DisplayHandle,
        state: &mut D,
        client: &Client,
        global: u32,
        id: u32,
        version: u32,
    );
}

/// Storage of the data of a global of interface `I`
pub(crate) struct GlobalData<I, U> {
    data: U,
    _i: PhantomData<fn() -> I>,
}

impl<I: Interface, U: Send + Sync + 'static> GlobalData<I, U> {
    pub(crate) fn handler<D>(data: U) -> Box<dyn Any + Send + Sync>
    where
        D: GlobalDispatch<I, U> + 'static,
    {
        let handler: Arc<dyn GlobalHandler<D>> = Arc::new(GlobalData::<I, U> {
            data,
            _i: PhantomData,
        });
        Box::new(handler)
    }
}

impl<I, U, D> GlobalHandler<D> for GlobalData<I, U>
where
    I: Interface,
    U: Send + Sync + 'static,
    D: GlobalDispatch<I, U> + 'static,
{
    fn can_view(&self, client: &Client) -> bool {
        D::can_view(client, &self.data)
    }

    fn bind(
        self: Arc<Self>,
        handle: &DisplayHandle,
        state: &mut D,
        client: &Client,
        global: u32,
        id: u32,
        version: u32,
    ) {
        let mut data_init = DataInit {
            handle,
            client: client.id(),
            parent: None,
            version,
            global: Some(global),
            _state: PhantomData,
        };
        D::bind(state, handle, client, New::wrap(id), &self.data, &mut data_init);
    }
}
