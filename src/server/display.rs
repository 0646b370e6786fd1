use std::{
    any::Any,
    fmt,
    marker::PhantomData,
    sync::{Arc, Mutex, MutexGuard, Weak as ArcWeak},
};

use indexmap::IndexMap;
use tracing::{debug, info_span, instrument, trace, warn};

use crate::{
    protocol::{wl_callback, wl_display, wl_registry},
    utils::SerialCounter,
};

use super::{
    client::{Client, ClientData, ClientTransport, DisconnectReason, EventMessage, EventPayload, ProtocolError},
    dispatch::{DataInit, GlobalData, GlobalHandler, ObjectData, ObjectHeader},
    global::{GlobalEntry, GlobalInfo, RegistryData},
    id::{ClientId, GlobalId, InvalidId, ObjectId, SERVER_ID_BASE},
    DispatchError, GlobalDispatch, Interface,
};

/// Protocol id of the `wl_display` object of every client
pub const DISPLAY_ID: u32 = 1;

struct ObjectEntry {
    interface: &'static str,
    version: u32,
    generation: u64,
    parent: Option<ObjectId>,
    children: Vec<ObjectId>,
    global: Option<u32>,
    data: Arc<dyn Any + Send + Sync>,
    // an `Arc<dyn ObjectData<D>>`
    dispatcher: Box<dyn Any + Send + Sync>,
}

struct ClientEntry {
    transport: Box<dyn ClientTransport>,
    data: Arc<dyn ClientData>,
    serials: Arc<SerialCounter>,
    objects: IndexMap<u32, ObjectEntry>,
    next_server_id: u32,
    killed: Option<DisconnectReason>,
    flush_pending: bool,
}

struct PendingDestructor {
    client: ClientId,
    header: ObjectHeader,
    dispatcher: Box<dyn Any + Send + Sync>,
}

pub(crate) struct DisplayInner {
    clients: IndexMap<ClientId, ClientEntry>,
    globals: IndexMap<u32, GlobalEntry>,
    next_client_id: u32,
    next_global_name: u32,
    next_generation: u64,
    pending_destructors: Vec<PendingDestructor>,
    // parents of the unbound objects whose destructor did not run yet
    unbound_parents: IndexMap<ObjectId, ObjectId>,
}

/// Information about a live object
#[derive(Debug, Clone)]
pub struct ObjectInfo {
    /// Protocol id of the object
    pub id: u32,
    /// Interface of the object
    pub interface: &'static str,
    /// Version of the object
    pub version: u32,
}

impl DisplayInner {
    fn object(&self, id: ObjectId) -> Option<&ObjectEntry> {
        self.clients
            .get(&id.client)
            .and_then(|client| client.objects.get(&id.protocol_id))
            .filter(|entry| entry.generation == id.generation)
    }

    fn object_mut(&mut self, id: ObjectId) -> Option<&mut ObjectEntry> {
        self.clients
            .get_mut(&id.client)
            .and_then(|client| client.objects.get_mut(&id.protocol_id))
            .filter(|entry| entry.generation == id.generation)
    }

    fn send(&mut self, id: ObjectId, interface: &'static str, event: Box<dyn EventPayload>) -> Result<(), InvalidId> {
        let live = self.object(id).is_some();
        let client = self.clients.get_mut(&id.client).ok_or(InvalidId)?;
        if !live || client.killed.is_some() {
            return Err(InvalidId);
        }
        trace!(object = ?id, interface, event = ?event, "sending event");
        client.transport.send_event(EventMessage {
            sender: id,
            interface,
            event,
        });
        client.flush_pending = true;
        Ok(())
    }

    fn display_id(&self, client: ClientId) -> Option<ObjectId> {
        self.clients
            .get(&client)
            .and_then(|c| c.objects.get(&DISPLAY_ID))
            .map(|entry| ObjectId {
                client,
                protocol_id: DISPLAY_ID,
                generation: entry.generation,
            })
    }

    fn post_error(&mut self, error: ProtocolError, client: ClientId) {
        let Some(display) = self.display_id(client) else {
            return;
        };
        let Some(entry) = self.clients.get_mut(&client) else {
            return;
        };
        if entry.killed.is_some() {
            return;
        }
        warn!(client = ?client, error = %error, "killing client");
        entry.transport.send_event(EventMessage {
            sender: display,
            interface: wl_display::WlDisplay::NAME,
            event: Box::new(wl_display::Event::Error {
                object_id: error.object_id,
                code: error.code,
                message: error.message.clone(),
            }),
        });
        entry.flush_pending = true;
        entry.killed = Some(DisconnectReason::ProtocolError(error));
    }

    fn remove_object(&mut self, id: ObjectId) -> Option<PendingDestructor> {
        self.object(id)?;
        let client = self.clients.get_mut(&id.client)?;
        let entry = client.objects.shift_remove(&id.protocol_id)?;
        let display = self.display_id(id.client);

        // children observe the loss of their parent
        for child in &entry.children {
            if let Some(child) = self.object_mut(*child) {
                child.parent = None;
            }
        }
        if let Some(parent) = entry.parent {
            if let Some(parent_entry) = self.object_mut(parent) {
                parent_entry.children.retain(|child| *child != id);
            }
            self.unbound_parents.insert(id, parent);
        }
        if let Some(global) = entry.global.and_then(|name| self.globals.get_mut(&name)) {
            global.bound.retain(|bound| *bound != id);
        }

        if !id.is_server_allocated() {
            if let (Some(display), Some(client)) = (display, self.clients.get_mut(&id.client)) {
                if client.killed.is_none() {
                    client.transport.send_event(EventMessage {
                        sender: display,
                        interface: wl_display::WlDisplay::NAME,
                        event: Box::new(wl_display::Event::DeleteId { id: id.protocol_id }),
                    });
                    client.flush_pending = true;
                }
            }
        }

        Some(PendingDestructor {
            client: id.client,
            header: ObjectHeader {
                id,
                version: entry.version,
                interface: entry.interface,
                data: entry.data,
            },
            dispatcher: entry.dispatcher,
        })
    }

    fn registries(&self) -> Vec<(ObjectId, Arc<dyn Any + Send + Sync>)> {
        self.clients
            .iter()
            .filter(|(_, client)| client.killed.is_none())
            .flat_map(|(client_id, client)| {
                client
                    .objects
                    .iter()
                    .filter(|(_, entry)| entry.interface == wl_registry::WlRegistry::NAME)
                    .map(move |(protocol_id, entry)| {
                        (
                            ObjectId {
                                client: *client_id,
                                protocol_id: *protocol_id,
                                generation: entry.generation,
                            },
                            entry.data.clone(),
                        )
                    })
            })
            .collect()
    }
}

/// Weak handle to the display, held by resources
#[derive(Clone)]
pub(crate) struct WeakHandle {
    inner: ArcWeak<Mutex<DisplayInner>>,
}

impl WeakHandle {
    pub(crate) fn upgrade(&self) -> Option<DisplayHandle> {
        self.inner.upgrade().map(|inner| DisplayHandle { inner })
    }
}

/// A handle to the display, giving access to its clients, objects and globals
///
/// It does not need the compositor state and can be cloned freely, it is given to every
/// request handler. No internal lock is held while handlers run.
#[derive(Clone)]
pub struct DisplayHandle {
    inner: Arc<Mutex<DisplayInner>>,
}

impl fmt::Debug for DisplayHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DisplayHandle").finish_non_exhaustive()
    }
}

impl PartialEq for DisplayHandle {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

impl DisplayHandle {
    fn lock(&self) -> MutexGuard<'_, DisplayInner> {
        self.inner.lock().unwrap()
    }

    pub(crate) fn downgrade(&self) -> WeakHandle {
        WeakHandle {
            inner: Arc::downgrade(&self.inner),
        }
    }

    /// Retrieve a handle to a connected client
    pub fn get_client(&self, id: ClientId) -> Result<Client, InvalidId> {
        let inner = self.lock();
        let entry = inner.clients.get(&id).ok_or(InvalidId)?;
        Ok(Client {
            id,
            data: entry.data.clone(),
            serials: entry.serials.clone(),
            handle: self.downgrade(),
        })
    }

    pub(crate) fn client_is_alive(&self, id: ClientId) -> bool {
        self.lock()
            .clients
            .get(&id)
            .map(|client| client.killed.is_none())
            .unwrap_or(false)
    }

    /// Ids of every connected client
    pub fn clients(&self) -> Vec<ClientId> {
        self.lock().clients.keys().copied().collect()
    }

    /// Information about a live object
    ///
    /// Fails for unknown or destroyed objects.
    pub fn object_info(&self, id: ObjectId) -> Result<ObjectInfo, InvalidId> {
        self.lock()
            .object(id)
            .map(|entry| ObjectInfo {
                id: id.protocol_id,
                interface: entry.interface,
                version: entry.version,
            })
            .ok_or(InvalidId)
    }

    /// Look up a live object of a client by its protocol id
    pub fn lookup(&self, client: ClientId, protocol_id: u32) -> Option<ObjectId> {
        self.lock()
            .clients
            .get(&client)
            .and_then(|c| c.objects.get(&protocol_id))
            .map(|entry| ObjectId {
                client,
                protocol_id,
                generation: entry.generation,
            })
    }

    pub(crate) fn object_data(&self, id: ObjectId) -> Result<Arc<dyn Any + Send + Sync>, InvalidId> {
        self.lock().object(id).map(|entry| entry.data.clone()).ok_or(InvalidId)
    }

    pub(crate) fn object_parent(&self, id: ObjectId) -> Option<ObjectId> {
        let inner = self.lock();
        let parent = match inner.object(id) {
            Some(entry) => entry.parent?,
            // still visible to its own destructor
            None => *inner.unbound_parents.get(&id)?,
        };
        inner.object(parent).map(|_| parent)
    }

    /// Children of a live object, in creation order
    pub fn object_children(&self, id: ObjectId) -> Vec<ObjectId> {
        self.lock()
            .object(id)
            .map(|entry| entry.children.clone())
            .unwrap_or_default()
    }

    pub(crate) fn send_event(
        &self,
        id: ObjectId,
        interface: &'static str,
        event: Box<dyn EventPayload>,
    ) -> Result<(), InvalidId> {
        self.lock().send(id, interface, event)
    }

    pub(crate) fn post_error(&self, id: ObjectId, interface: &'static str, code: u32, message: String) {
        let error = ProtocolError {
            code,
            object_id: id.protocol_id,
            object_interface: interface.into(),
            message,
        };
        self.lock().post_error(error, id.client);
    }

    /// Schedule the destruction of a client
    ///
    /// The client is torn down the next time [`Display::cleanup`] runs. If the reason is a
    /// protocol error, it is sent to the client first.
    pub fn kill_client(&self, client: ClientId, reason: DisconnectReason) {
        let mut inner = self.lock();
        match reason {
            DisconnectReason::ProtocolError(error) => inner.post_error(error, client),
            DisconnectReason::ConnectionClosed => {
                if let Some(entry) = inner.clients.get_mut(&client) {
                    entry.killed.get_or_insert(DisconnectReason::ConnectionClosed);
                }
            }
        }
    }

    /// Destroy an object
    ///
    /// The object immediately stops being addressable, and its destruction hook runs once the
    /// current request has been processed. Destroying an object that is already dead is a
    /// no-op.
    pub fn destroy_object(&self, id: ObjectId) {
        let mut inner = self.lock();
        if let Some(pending) = inner.remove_object(id) {
            trace!(object = ?id, interface = pending.header.interface, "object unbound");
            inner.pending_destructors.push(pending);
        }
    }

    #[allow(clippy::too_many_arguments)]
    pub(crate) fn insert_object(
        &self,
        client: ClientId,
        protocol_id: Option<u32>,
        interface: &'static str,
        version: u32,
        parent: Option<ObjectId>,
        global: Option<u32>,
        data: Arc<dyn Any + Send + Sync>,
        dispatcher: Box<dyn Any + Send + Sync>,
    ) -> Result<(ObjectId, Arc<dyn Any + Send + Sync>), InvalidId> {
        let mut inner = self.lock();
        let generation = inner.next_generation;
        let entry = inner.clients.get_mut(&client).ok_or(InvalidId)?;
        if entry.killed.is_some() {
            return Err(InvalidId);
        }

        let protocol_id = match protocol_id {
            Some(id) if id == 0 || id >= SERVER_ID_BASE || entry.objects.contains_key(&id) => {
                let error = ProtocolError {
                    code: wl_display::Error::InvalidObject as u32,
                    object_id: DISPLAY_ID,
                    object_interface: wl_display::WlDisplay::NAME.into(),
                    message: format!("invalid new id {} for {}", id, interface),
                };
                inner.post_error(error, client);
                return Err(InvalidId);
            }
            Some(id) => id,
            None => {
                let mut id = entry.next_server_id;
                while entry.objects.contains_key(&id) {
                    id = id.checked_add(1).unwrap_or(SERVER_ID_BASE);
                }
                entry.next_server_id = id.checked_add(1).unwrap_or(SERVER_ID_BASE);
                id
            }
        };

        entry.objects.insert(
            protocol_id,
            ObjectEntry {
                interface,
                version,
                generation,
                parent,
                children: Vec::new(),
                global,
                data: data.clone(),
                dispatcher,
            },
        );
        inner.next_generation += 1;

        let id = ObjectId {
            client,
            protocol_id,
            generation,
        };
        if let Some(parent) = parent.and_then(|parent| inner.object_mut(parent)) {
            parent.children.push(id);
        }
        if let Some(global) = global.and_then(|name| inner.globals.get_mut(&name)) {
            global.bound.push(id);
        }
        trace!(object = ?id, interface, version, "object created");
        Ok((id, data))
    }

    /// Create a new global
    ///
    /// It is immediately advertised to every existing registry that can view it.
    ///
    /// # Panics
    ///
    /// Panics if `version` is higher than the version supported for interface `I`.
    pub fn create_global<D, I, U>(&self, version: u32, data: U) -> GlobalId
    where
        D: GlobalDispatch<I, U> + 'static,
        I: Interface,
        U: Send + Sync + 'static,
    {
        assert!(
            version <= I::VERSION,
            "Cannot create global {} version {}: maximum supported version is {}",
            I::NAME,
            version,
            I::VERSION
        );
        let handler = GlobalData::<I, U>::handler::<D>(data);
        let (name, registries, handler) = {
            let mut inner = self.lock();
            let name = inner.next_global_name;
            inner.next_global_name += 1;
            inner.globals.insert(
                name,
                GlobalEntry {
                    interface: I::NAME,
                    version,
                    disabled: false,
                    bound: Vec::new(),
                    handler,
                },
            );
            let handler = inner.globals[&name]
                .handler
                .downcast_ref::<Arc<dyn GlobalHandler<D>>>()
                .cloned();
            (name, inner.registries(), handler)
        };
        debug!(name, interface = I::NAME, version, "global created");

        if let Some(handler) = handler {
            for (registry, data) in registries {
                let visible = self
                    .get_client(registry.client)
                    .map(|client| handler.can_view(&client))
                    .unwrap_or(false);
                if let (true, Some(data)) = (visible, data.downcast_ref::<RegistryData>()) {
                    data.advertise(name);
                    let _ = self.send_event(
                        registry,
                        wl_registry::WlRegistry::NAME,
                        Box::new(wl_registry::Event::Global {
                            name,
                            interface: I::NAME.into(),
                            version,
                        }),
                    );
                }
            }
        }
        GlobalId(name)
    }

    /// Stop advertising a global
    ///
    /// Every registry that advertised it receives a single `global_remove`. Clients that did
    /// not process the removal yet can still bind it.
    pub fn disable_global(&self, id: GlobalId) {
        let registries = {
            let mut inner = self.lock();
            match inner.globals.get_mut(&id.0) {
                Some(global) if !global.disabled => global.disabled = true,
                _ => return,
            }
            inner.registries()
        };
        debug!(name = id.0, "global disabled");
        for (registry, data) in registries {
            let Some(data) = data.downcast_ref::<RegistryData>() else {
                continue;
            };
            if data.retract(id.0) {
                let _ = self.send_event(
                    registry,
                    wl_registry::WlRegistry::NAME,
                    Box::new(wl_registry::Event::GlobalRemove { name: id.0 }),
                );
            }
        }
    }

    /// Remove a global
    ///
    /// It is disabled first if needed, and destroyed once all advertisements were retracted.
    /// Objects already bound from it stay alive.
    pub fn remove_global(&self, id: GlobalId) {
        self.disable_global(id);
        if self.lock().globals.shift_remove(&id.0).is_some() {
            debug!(name = id.0, "global removed");
        }
    }

    /// Information about a global
    pub fn global_info(&self, id: GlobalId) -> Result<GlobalInfo, InvalidId> {
        self.lock()
            .globals
            .get(&id.0)
            .map(|global| GlobalInfo {
                interface: global.interface,
                version: global.version,
                disabled: global.disabled,
                bound: global.bound.clone(),
            })
            .ok_or(InvalidId)
    }

    fn global_was_created(&self, name: u32) -> bool {
        name > 0 && name < self.lock().next_global_name
    }

    fn global_handler<D: 'static>(&self, name: u32) -> Option<(&'static str, u32, Arc<dyn GlobalHandler<D>>)> {
        let inner = self.lock();
        let global = inner.globals.get(&name)?;
        let handler = global.handler.downcast_ref::<Arc<dyn GlobalHandler<D>>>()?.clone();
        Some((global.interface, global.version, handler))
    }

    fn visible_globals<D: 'static>(&self, client: &Client) -> Vec<(u32, &'static str, u32)> {
        let globals = {
            let inner = self.lock();
            inner
                .globals
                .iter()
                .filter(|(_, global)| !global.disabled)
                .filter_map(|(name, global)| {
                    global
                        .handler
                        .downcast_ref::<Arc<dyn GlobalHandler<D>>>()
                        .map(|handler| (*name, global.interface, global.version, handler.clone()))
                })
                .collect::<Vec<_>>()
        };
        globals
            .into_iter()
            .filter(|(_, _, _, handler)| handler.can_view(client))
            .map(|(name, interface, version, _)| (name, interface, version))
            .collect()
    }

    fn take_pending_destructors(&self) -> Vec<PendingDestructor> {
        std::mem::take(&mut self.lock().pending_destructors)
    }

    fn dispatcher<D: 'static>(&self, client: ClientId, protocol_id: u32) -> Option<(ObjectHeader, Arc<dyn ObjectData<D>>)> {
        let inner = self.lock();
        let entry = inner.clients.get(&client)?.objects.get(&protocol_id)?;
        let dispatcher = entry.dispatcher.downcast_ref::<Arc<dyn ObjectData<D>>>()?.clone();
        Some((
            ObjectHeader {
                id: ObjectId {
                    client,
                    protocol_id,
                    generation: entry.generation,
                },
                version: entry.version,
                interface: entry.interface,
                data: entry.data.clone(),
            },
            dispatcher,
        ))
    }
}

/// The server display, owning every client connection and global
///
/// `D` is the compositor state, passed mutably to every request handler.
pub struct Display<D: 'static> {
    handle: DisplayHandle,
    span: tracing::Span,
    _state: PhantomData<fn(&mut D)>,
}

impl<D: 'static> fmt::Debug for Display<D> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Display").finish_non_exhaustive()
    }
}

impl<D: 'static> Default for Display<D> {
    fn default() -> Self {
        Self::new()
    }
}

impl<D: 'static> Display<D> {
    /// Create a new display, with no client and no global
    pub fn new() -> Display<D> {
        Display {
            handle: DisplayHandle {
                inner: Arc::new(Mutex::new(DisplayInner {
                    clients: IndexMap::new(),
                    globals: IndexMap::new(),
                    next_client_id: 1,
                    next_global_name: 1,
                    next_generation: 1,
                    pending_destructors: Vec::new(),
                    unbound_parents: IndexMap::new(),
                })),
            },
            span: info_span!("display"),
            _state: PhantomData,
        }
    }

    /// A handle to this display
    pub fn handle(&self) -> DisplayHandle {
        self.handle.clone()
    }

    /// Register a new client connection
    pub fn insert_client(&mut self, transport: Box<dyn ClientTransport>, data: Arc<dyn ClientData>) -> Client {
        let _guard = self.span.enter();
        let (id, serials) = {
            let mut inner = self.handle.lock();
            let id = ClientId(inner.next_client_id);
            inner.next_client_id += 1;
            let serials = Arc::new(SerialCounter::new());
            inner.clients.insert(
                id,
                ClientEntry {
                    transport,
                    data: data.clone(),
                    serials: serials.clone(),
                    objects: IndexMap::new(),
                    next_server_id: SERVER_ID_BASE,
                    killed: None,
                    flush_pending: false,
                },
            );
            (id, serials)
        };
        let display_data = Arc::new(DisplayData);
        let dispatcher: Arc<dyn ObjectData<D>> = display_data.clone();
        // the connection was just inserted, this cannot fail
        let _ = self.handle.insert_object(
            id,
            Some(DISPLAY_ID),
            wl_display::WlDisplay::NAME,
            1,
            None,
            None,
            display_data,
            Box::new(dispatcher),
        );
        debug!(client = ?id, "new client");
        data.initialized(id);
        Client {
            id,
            data,
            serials,
            handle: self.handle.downgrade(),
        }
    }

    /// Dispatch a request received from a client
    ///
    /// Requests addressed to unknown or already destroyed objects are ignored: this is the
    /// normal race of a client using an object the server just destroyed. Once the request is
    /// processed, destructors run and killed clients are torn down.
    #[instrument(level = "trace", parent = &self.span, skip(self, state, request), fields(interface = I::NAME))]
    pub fn dispatch_request<I: Interface>(
        &mut self,
        state: &mut D,
        client: ClientId,
        object: u32,
        request: I::Request,
    ) -> Result<(), DispatchError> {
        let client_handle = self
            .handle
            .get_client(client)
            .map_err(|_| DispatchError::UnknownClient(client))?;
        if !client_handle.is_alive() {
            trace!("ignoring request from a dying client");
            return Ok(());
        }
        let Some((header, dispatcher)) = self.handle.dispatcher::<D>(client, object) else {
            debug!(object, "request for an unknown or dead object, ignoring");
            return Ok(());
        };
        if header.interface != I::NAME {
            self.handle.post_error(
                header.id,
                header.interface,
                wl_display::Error::InvalidMethod as u32,
                format!("{} request sent to {}@{}", I::NAME, header.interface, object),
            );
            self.cleanup(state);
            return Err(DispatchError::InterfaceMismatch {
                expected: I::NAME,
                found: header.interface,
            });
        }

        let id = header.id;
        let destructor = I::is_destructor(&request);
        trace!(request = ?request, "dispatching request");
        let result = dispatcher.request(&self.handle, state, &client_handle, header, Box::new(request));
        if destructor {
            self.handle.destroy_object(id);
        }
        self.cleanup(state);
        result
    }

    /// Report that a client connection was closed by the peer
    pub fn disconnect_client(&mut self, state: &mut D, client: ClientId) {
        self.handle.kill_client(client, DisconnectReason::ConnectionClosed);
        self.cleanup(state);
    }

    /// Flush pending events of every client
    ///
    /// Clients whose transport fails are scheduled for disconnection.
    pub fn flush_clients(&mut self) {
        let mut inner = self.handle.lock();
        for (id, client) in inner.clients.iter_mut() {
            if !client.flush_pending {
                continue;
            }
            client.flush_pending = false;
            if let Err(err) = client.transport.flush() {
                warn!(client = ?id, error = %err, "failed to flush client");
                client.killed.get_or_insert(DisconnectReason::ConnectionClosed);
            }
        }
    }

    /// Run pending destructors and tear down killed clients
    pub fn cleanup(&mut self, state: &mut D) {
        self.run_destructors(state);
        loop {
            let killed = {
                let inner = self.handle.lock();
                inner
                    .clients
                    .iter()
                    .find_map(|(id, client)| client.killed.clone().map(|reason| (*id, reason)))
            };
            match killed {
                Some((client, reason)) => self.teardown_client(state, client, reason),
                None => break,
            }
        }
    }

    fn run_destructors(&self, state: &mut D) {
        loop {
            let pending = self.handle.take_pending_destructors();
            if pending.is_empty() {
                break;
            }
            for destructor in pending {
                let id = destructor.header.id;
                match destructor.dispatcher.downcast::<Arc<dyn ObjectData<D>>>() {
                    Ok(dispatcher) => dispatcher.destroyed(&self.handle, state, destructor.client, destructor.header),
                    Err(_) => warn!(object = ?id, "object dispatcher of a foreign state type"),
                }
                self.handle.lock().unbound_parents.shift_remove(&id);
            }
        }
    }

    fn teardown_client(&self, state: &mut D, client: ClientId, reason: DisconnectReason) {
        let _guard = self.span.enter();
        debug!(client = ?client, reason = ?reason, "tearing down client");
        let objects = {
            let inner = self.handle.lock();
            match inner.clients.get(&client) {
                Some(entry) => entry
                    .objects
                    .iter()
                    .rev()
                    .map(|(protocol_id, entry)| ObjectId {
                        client,
                        protocol_id: *protocol_id,
                        generation: entry.generation,
                    })
                    .collect::<Vec<_>>(),
                None => return,
            }
        };
        // reverse creation order, so children always go before their parent
        for id in objects {
            self.handle.destroy_object(id);
            self.run_destructors(state);
        }
        let entry = self.handle.lock().clients.shift_remove(&client);
        if let Some(mut entry) = entry {
            entry.transport.shutdown();
            entry.data.disconnected(client, reason);
        }
    }
}

/// Dispatcher of the `wl_display` object of each client
struct DisplayData;

impl<D: 'static> ObjectData<D> for DisplayData {
    fn request(
        self: Arc<Self>,
        handle: &DisplayHandle,
        _state: &mut D,
        client: &Client,
        target: ObjectHeader,
        request: Box<dyn Any + Send>,
    ) -> Result<(), DispatchError> {
        let request = request
            .downcast::<wl_display::Request>()
            .map_err(|_| DispatchError::InterfaceMismatch {
                expected: wl_display::WlDisplay::NAME,
                found: target.interface,
            })?;
        let mut data_init = DataInit::<D> {
            handle,
            client: client.id(),
            parent: Some(target.id),
            version: 1,
            global: None,
            _state: PhantomData,
        };
        match *request {
            wl_display::Request::Sync { callback } => {
                let callback = data_init.init_inert(callback);
                callback.send_event(wl_callback::Event::Done {
                    callback_data: client.next_serial().into(),
                });
                handle.destroy_object(callback.id());
            }
            wl_display::Request::GetRegistry { registry } => {
                let registry_data = Arc::new(RegistryData::default());
                let dispatcher: Arc<dyn ObjectData<D>> = registry_data.clone();
                let Ok((id, _)) = handle.insert_object(
                    client.id(),
                    Some(registry.protocol_id()),
                    wl_registry::WlRegistry::NAME,
                    1,
                    Some(target.id),
                    None,
                    registry_data.clone(),
                    Box::new(dispatcher),
                ) else {
                    return Ok(());
                };
                for (name, interface, version) in handle.visible_globals::<D>(client) {
                    registry_data.advertise(name);
                    let _ = handle.send_event(
                        id,
                        wl_registry::WlRegistry::NAME,
                        Box::new(wl_registry::Event::Global {
                            name,
                            interface: interface.into(),
                            version,
                        }),
                    );
                }
            }
        }
        Ok(())
    }

    fn destroyed(self: Arc<Self>, _: &DisplayHandle, _: &mut D, _: ClientId, _: ObjectHeader) {}
}

impl<D: 'static> ObjectData<D> for RegistryData {
    fn request(
        self: Arc<Self>,
        handle: &DisplayHandle,
        state: &mut D,
        client: &Client,
        target: ObjectHeader,
        request: Box<dyn Any + Send>,
    ) -> Result<(), DispatchError> {
        let request = request
            .downcast::<wl_registry::Request>()
            .map_err(|_| DispatchError::InterfaceMismatch {
                expected: wl_registry::WlRegistry::NAME,
                found: target.interface,
            })?;
        let wl_registry::Request::Bind {
            name,
            interface,
            version,
            id,
        } = *request;

        let Some((global_interface, global_version, handler)) = handle.global_handler::<D>(name) else {
            if handle.global_was_created(name) {
                // removed while the bind was in flight
                debug!(name, "bind to a removed global, ignoring");
            } else {
                handle.post_error(
                    target.id,
                    target.interface,
                    wl_display::Error::InvalidObject as u32,
                    format!("invalid global {} ({})", interface, name),
                );
            }
            return Ok(());
        };
        if global_interface != interface {
            handle.post_error(
                target.id,
                target.interface,
                wl_display::Error::InvalidObject as u32,
                format!("invalid interface for global {}: have {}, wanted {}", name, global_interface, interface),
            );
            return Ok(());
        }
        if version == 0 {
            handle.post_error(
                target.id,
                target.interface,
                wl_display::Error::InvalidObject as u32,
                format!("invalid version 0 for global {} ({})", interface, name),
            );
            return Ok(());
        }
        let version = version.min(global_version);
        trace!(name, interface = global_interface, version, "binding global");
        handler.bind(handle, state, client, name, id, version);
        Ok(())
    }

    fn destroyed(self: Arc<Self>, _: &DisplayHandle, _: &mut D, _: ClientId, _: ObjectHeader) {}
}
