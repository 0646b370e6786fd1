use std::{os::fd::OwnedFd, sync::Arc};

use tracing::debug;

use crate::{
    delegate_buffer, delegate_compositor, delegate_data_device, delegate_seat, delegate_xdg_shell,
    input::{keyboard::KeyboardConfig, pointer::CursorImageStatus, Seat, SeatHandler, SeatState},
    protocol::{
        wl_buffer::WlBuffer,
        wl_compositor::{self, WlCompositor},
        wl_data_device_manager::DndAction,
        wl_data_source::WlDataSource,
        wl_display::{self, WlDisplay},
        wl_registry::{self, WlRegistry},
        wl_seat::WlSeat,
        wl_surface::{self, WlSurface},
        xdg_surface::{self, XdgSurface},
        xdg_toplevel::{self, XdgToplevel},
        xdg_wm_base::{self, XdgWmBase},
    },
    server::{
        Client, DisconnectReason, Display, DisplayHandle, Interface, New, ObjectId, ProtocolError, Resource,
        DISPLAY_ID,
    },
    utils::{Logical, Point, Rectangle, Serial, Size},
    wayland::{
        buffer::{self, BufferHandler},
        compositor::{CompositorHandler, CompositorState},
        data_device::{
            set_data_device_focus, ClientDndGrabHandler, DataDeviceHandler, DataDeviceState, ServerDndGrabHandler,
        },
        shell::xdg::{
            Configure, PopupSurface, PositionerState, ShellClient, ToplevelSurface, XdgShellHandler, XdgShellState,
        },
    },
};

use super::{init_logging, RecordingClientData, RecordingTransport};

/// A notification received by [`TestState`] from one of the protocol handlers
#[derive(Debug, Clone, PartialEq)]
pub enum Recorded {
    Commit(ObjectId),
    Damaged(ObjectId, Vec<Rectangle<i32, Logical>>),
    Mapped(ObjectId),
    Unmapped(ObjectId),
    SizeChanged(ObjectId, Option<Size<i32, Logical>>),
    SurfaceDestroyed(ObjectId),
    BufferDestroyed(ObjectId),
    FocusChanged(Option<ObjectId>),
    CursorImage(CursorImageStatus),
    NewSelection(Option<ObjectId>),
    SendSelection { mime_type: String, user_data: String },
    DndStarted { source: Option<ObjectId>, icon: Option<ObjectId> },
    DndDropped { target: Option<ObjectId>, validated: bool },
    ServerDndAction(DndAction),
    ServerDndDropped,
    ServerDndCancelled,
    ServerDndSend(String),
    ServerDndFinished,
    NewShellClient(ObjectId),
    ClientPong(ObjectId),
    NewToplevel(ObjectId),
    NewPopup(ObjectId, PositionerState),
    AckConfigure(ObjectId, Serial),
    PopupGrab(ObjectId, Serial),
    Reposition(ObjectId, PositionerState, u32),
    Move(ObjectId, Serial),
    Resize(ObjectId, xdg_toplevel::ResizeEdge),
    Maximize(ObjectId),
    Fullscreen(ObjectId),
    Minimize(ObjectId),
    WindowMenu(ObjectId, Point<i32, Logical>),
    TitleChanged(ObjectId, Option<String>),
    AppIdChanged(ObjectId, Option<String>),
    ParentChanged(ObjectId, Option<ObjectId>),
    ToplevelDestroyed(ObjectId),
    PopupDestroyed(ObjectId),
}

/// Compositor state implementing every handler of the crate, recording their notifications
#[derive(Debug)]
pub struct TestState {
    pub compositor_state: CompositorState,
    pub seat_state: SeatState<TestState>,
    pub data_device_state: DataDeviceState,
    pub xdg_shell_state: XdgShellState,
    pub seat: Seat<TestState>,
    /// Acknowledged configures, in the order they were reported
    pub acked: Vec<Configure>,
    pub events: Vec<Recorded>,
    dh: DisplayHandle,
}

impl TestState {
    fn new(dh: &DisplayHandle) -> Self {
        let mut seat_state = SeatState::new();
        let mut seat = seat_state.new_wl_seat(dh, "seat-0");
        seat.add_pointer();
        seat.add_keyboard(KeyboardConfig::default());
        seat.add_touch();
        TestState {
            compositor_state: CompositorState::new::<TestState>(dh),
            data_device_state: DataDeviceState::new::<TestState>(dh),
            xdg_shell_state: XdgShellState::new::<TestState>(dh),
            seat_state,
            seat,
            acked: Vec::new(),
            events: Vec::new(),
            dh: dh.clone(),
        }
    }

    /// Remove and return the recorded notifications
    pub fn take_events(&mut self) -> Vec<Recorded> {
        std::mem::take(&mut self.events)
    }
}

impl CompositorHandler for TestState {
    fn compositor_state(&mut self) -> &mut CompositorState {
        &mut self.compositor_state
    }

    fn commit(&mut self, surface: &Resource<WlSurface>) {
        self.events.push(Recorded::Commit(surface.id()));
    }

    fn damaged(&mut self, surface: &Resource<WlSurface>, damage: &[Rectangle<i32, Logical>]) {
        self.events.push(Recorded::Damaged(surface.id(), damage.to_vec()));
    }

    fn mapped(&mut self, surface: &Resource<WlSurface>) {
        self.events.push(Recorded::Mapped(surface.id()));
    }

    fn unmapped(&mut self, surface: &Resource<WlSurface>) {
        self.events.push(Recorded::Unmapped(surface.id()));
    }

    fn size_changed(&mut self, surface: &Resource<WlSurface>, size: Option<Size<i32, Logical>>) {
        self.events.push(Recorded::SizeChanged(surface.id(), size));
    }

    fn destroyed(&mut self, surface: &Resource<WlSurface>) {
        self.events.push(Recorded::SurfaceDestroyed(surface.id()));
    }
}

impl BufferHandler for TestState {
    fn buffer_destroyed(&mut self, buffer: &Resource<WlBuffer>) {
        self.events.push(Recorded::BufferDestroyed(buffer.id()));
    }
}

impl SeatHandler for TestState {
    fn seat_state(&mut self) -> &mut SeatState<Self> {
        &mut self.seat_state
    }

    fn focus_changed(&mut self, seat: &Seat<Self>, focused: Option<&Resource<WlSurface>>) {
        self.events.push(Recorded::FocusChanged(focused.map(Resource::id)));
        let dh = self.dh.clone();
        set_data_device_focus(&dh, seat, focused.and_then(Resource::client));
    }

    fn cursor_image(&mut self, _seat: &Seat<Self>, image: CursorImageStatus) {
        self.events.push(Recorded::CursorImage(image));
    }
}

impl DataDeviceHandler for TestState {
    type SelectionUserData = String;

    fn data_device_state(&self) -> &DataDeviceState {
        &self.data_device_state
    }

    fn new_selection(&mut self, source: Option<Resource<WlDataSource>>, _seat: Seat<Self>) {
        self.events.push(Recorded::NewSelection(source.map(|source| source.id())));
    }

    fn send_selection(&mut self, mime_type: String, _fd: OwnedFd, _seat: Seat<Self>, user_data: &String) {
        self.events.push(Recorded::SendSelection {
            mime_type,
            user_data: user_data.clone(),
        });
    }
}

impl ClientDndGrabHandler for TestState {
    fn started(&mut self, source: Option<Resource<WlDataSource>>, icon: Option<Resource<WlSurface>>, _seat: Seat<Self>) {
        self.events.push(Recorded::DndStarted {
            source: source.map(|source| source.id()),
            icon: icon.map(|icon| icon.id()),
        });
    }

    fn dropped(&mut self, target: Option<Resource<WlSurface>>, validated: bool, _seat: Seat<Self>) {
        self.events.push(Recorded::DndDropped {
            target: target.map(|target| target.id()),
            validated,
        });
    }
}

impl ServerDndGrabHandler for TestState {
    fn action(&mut self, action: DndAction, _seat: Seat<Self>) {
        self.events.push(Recorded::ServerDndAction(action));
    }

    fn dropped(&mut self, _seat: Seat<Self>) {
        self.events.push(Recorded::ServerDndDropped);
    }

    fn cancelled(&mut self, _seat: Seat<Self>) {
        self.events.push(Recorded::ServerDndCancelled);
    }

    fn send(&mut self, mime_type: String, _fd: OwnedFd, _seat: Seat<Self>) {
        self.events.push(Recorded::ServerDndSend(mime_type));
    }

    fn finished(&mut self, _seat: Seat<Self>) {
        self.events.push(Recorded::ServerDndFinished);
    }
}

impl XdgShellHandler for TestState {
    fn xdg_shell_state(&mut self) -> &mut XdgShellState {
        &mut self.xdg_shell_state
    }

    fn new_client(&mut self, client: ShellClient) {
        self.events.push(Recorded::NewShellClient(client.id()));
    }

    fn client_pong(&mut self, client: ShellClient) {
        self.events.push(Recorded::ClientPong(client.id()));
    }

    fn new_toplevel(&mut self, surface: ToplevelSurface) {
        self.events.push(Recorded::NewToplevel(surface.wl_surface().id()));
    }

    fn new_popup(&mut self, surface: PopupSurface, positioner: PositionerState) {
        self.events
            .push(Recorded::NewPopup(surface.wl_surface().id(), positioner));
    }

    fn grab(&mut self, surface: PopupSurface, _seat: Resource<WlSeat>, serial: Serial) {
        self.events
            .push(Recorded::PopupGrab(surface.wl_surface().id(), serial));
    }

    fn reposition_request(&mut self, surface: PopupSurface, positioner: PositionerState, token: u32) {
        self.events
            .push(Recorded::Reposition(surface.wl_surface().id(), positioner, token));
    }

    fn move_request(&mut self, surface: ToplevelSurface, _seat: Resource<WlSeat>, serial: Serial) {
        self.events.push(Recorded::Move(surface.wl_surface().id(), serial));
    }

    fn resize_request(
        &mut self,
        surface: ToplevelSurface,
        _seat: Resource<WlSeat>,
        _serial: Serial,
        edges: xdg_toplevel::ResizeEdge,
    ) {
        self.events.push(Recorded::Resize(surface.wl_surface().id(), edges));
    }

    fn maximize_request(&mut self, surface: ToplevelSurface) {
        self.events.push(Recorded::Maximize(surface.wl_surface().id()));
    }

    fn fullscreen_request(&mut self, surface: ToplevelSurface) {
        self.events.push(Recorded::Fullscreen(surface.wl_surface().id()));
    }

    fn minimize_request(&mut self, surface: ToplevelSurface) {
        self.events.push(Recorded::Minimize(surface.wl_surface().id()));
    }

    fn show_window_menu(
        &mut self,
        surface: ToplevelSurface,
        _seat: Resource<WlSeat>,
        _serial: Serial,
        location: Point<i32, Logical>,
    ) {
        self.events
            .push(Recorded::WindowMenu(surface.wl_surface().id(), location));
    }

    fn ack_configure(&mut self, surface: Resource<WlSurface>, configure: Configure) {
        self.events
            .push(Recorded::AckConfigure(surface.id(), configure.serial()));
        self.acked.push(configure);
    }

    fn toplevel_destroyed(&mut self, surface: ToplevelSurface) {
        self.events
            .push(Recorded::ToplevelDestroyed(surface.wl_surface().id()));
    }

    fn popup_destroyed(&mut self, surface: PopupSurface) {
        self.events
            .push(Recorded::PopupDestroyed(surface.wl_surface().id()));
    }

    fn title_changed(&mut self, surface: ToplevelSurface) {
        self.events
            .push(Recorded::TitleChanged(surface.wl_surface().id(), surface.title()));
    }

    fn app_id_changed(&mut self, surface: ToplevelSurface) {
        self.events
            .push(Recorded::AppIdChanged(surface.wl_surface().id(), surface.app_id()));
    }

    fn parent_changed(&mut self, surface: ToplevelSurface) {
        let parent = surface.parent().map(|parent| parent.id());
        self.events
            .push(Recorded::ParentChanged(surface.wl_surface().id(), parent));
    }
}

delegate_compositor!(TestState);
delegate_buffer!(TestState);
delegate_seat!(TestState);
delegate_data_device!(TestState);
delegate_xdg_shell!(TestState);

/// The server side of a connection driven by a test
#[derive(Debug)]
pub struct TestClient {
    pub client: Client,
    pub transport: RecordingTransport,
    data: Arc<RecordingClientData>,
    next_id: u32,
}

impl TestClient {
    /// Allocate a fresh client-side object id
    pub fn new_id(&mut self) -> u32 {
        let id = self.next_id;
        self.next_id += 1;
        id
    }

    /// The protocol error this client was killed with, if any
    pub fn take_error(&self) -> Option<ProtocolError> {
        match self.data.disconnected.lock().unwrap().take() {
            Some(DisconnectReason::ProtocolError(error)) => Some(error),
            _ => None,
        }
    }
}

/// A display and its state, with helpers playing the client side of the protocol
#[derive(Debug)]
pub struct TestServer {
    pub display: Display<TestState>,
    pub state: TestState,
}

impl Default for TestServer {
    fn default() -> Self {
        Self::new()
    }
}

impl TestServer {
    pub fn new() -> Self {
        init_logging();
        let display = Display::new();
        let state = TestState::new(&display.handle());
        TestServer { display, state }
    }

    pub fn add_client(&mut self) -> TestClient {
        let transport = RecordingTransport::new();
        let data = Arc::new(RecordingClientData::default());
        let client = self.display.insert_client(Box::new(transport.clone()), data.clone());
        TestClient {
            client,
            transport,
            data,
            next_id: DISPLAY_ID + 1,
        }
    }

    /// Dispatch a request addressed to the object with protocol id `object`
    pub fn send<I: Interface>(&mut self, client: &TestClient, object: u32, request: I::Request) {
        if let Err(err) = self
            .display
            .dispatch_request::<I>(&mut self.state, client.client.id(), object, request)
        {
            debug!(error = %err, "request rejected");
        }
    }

    /// Dispatch a request addressed to `resource`
    pub fn request<I: Interface>(&mut self, client: &TestClient, resource: &Resource<I>, request: I::Request) {
        self.send::<I>(client, resource.id().protocol_id(), request);
    }

    /// Look up an object of the client by its protocol id
    pub fn resource<I: Interface>(&self, client: &TestClient, id: u32) -> Resource<I> {
        let dh = self.display.handle();
        let object = dh
            .lookup(client.client.id(), id)
            .unwrap_or_else(|| panic!("no object {} for this client", id));
        Resource::from_id(&dh, object).unwrap()
    }

    /// Bind the global implementing `I` through a new registry, returns the id of the bound object
    pub fn global<I: Interface>(&mut self, client: &mut TestClient) -> u32 {
        let registry = client.new_id();
        self.send::<WlDisplay>(
            client,
            DISPLAY_ID,
            wl_display::Request::GetRegistry {
                registry: New::wrap(registry),
            },
        );
        let name = client
            .transport
            .take_events::<WlRegistry>()
            .into_iter()
            .find_map(|(_, event)| match event {
                wl_registry::Event::Global { name, interface, .. } if interface == I::NAME => Some(name),
                _ => None,
            })
            .unwrap_or_else(|| panic!("no {} global", I::NAME));
        let id = client.new_id();
        self.send::<WlRegistry>(
            client,
            registry,
            wl_registry::Request::Bind {
                name,
                interface: I::NAME.into(),
                version: I::VERSION,
                id,
            },
        );
        id
    }

    /// Bind the `wl_seat` global
    pub fn bind_seat(&mut self, client: &mut TestClient) -> Resource<WlSeat> {
        let id = self.global::<WlSeat>(client);
        self.resource(client, id)
    }

    pub fn create_surface(&mut self, client: &mut TestClient) -> Resource<WlSurface> {
        let compositor = self.global::<WlCompositor>(client);
        let id = client.new_id();
        self.send::<WlCompositor>(
            client,
            compositor,
            wl_compositor::Request::CreateSurface { id: New::wrap(id) },
        );
        self.resource(client, id)
    }

    /// Attach `buffer` to the surface, or detach its buffer
    pub fn attach(&mut self, client: &TestClient, surface: &Resource<WlSurface>, buffer: Option<Resource<WlBuffer>>) {
        self.request(client, surface, wl_surface::Request::Attach { buffer, x: 0, y: 0 });
    }

    pub fn commit(&mut self, client: &TestClient, surface: &Resource<WlSurface>) {
        self.request(client, surface, wl_surface::Request::Commit);
    }

    /// Bind the stable shell global
    pub fn bind_xdg_wm_base(&mut self, client: &mut TestClient) -> Resource<XdgWmBase> {
        let id = self.global::<XdgWmBase>(client);
        self.resource(client, id)
    }

    pub fn create_xdg_surface(
        &mut self,
        client: &mut TestClient,
        wm_base: &Resource<XdgWmBase>,
        surface: &Resource<WlSurface>,
    ) -> Resource<XdgSurface> {
        let id = client.new_id();
        self.request(
            client,
            wm_base,
            xdg_wm_base::Request::GetXdgSurface {
                id: New::wrap(id),
                surface: surface.clone(),
            },
        );
        self.resource(client, id)
    }

    /// Create a surface with the toplevel role
    pub fn create_toplevel(
        &mut self,
        client: &mut TestClient,
        wm_base: &Resource<XdgWmBase>,
    ) -> (Resource<WlSurface>, Resource<XdgSurface>, Resource<XdgToplevel>) {
        let surface = self.create_surface(client);
        let xdg_surface = self.create_xdg_surface(client, wm_base, &surface);
        let id = client.new_id();
        self.request(
            client,
            &xdg_surface,
            xdg_surface::Request::GetToplevel { id: New::wrap(id) },
        );
        let toplevel = self.resource(client, id);
        (surface, xdg_surface, toplevel)
    }

    pub fn create_buffer(&mut self, client: &TestClient, size: (i32, i32)) -> Resource<WlBuffer> {
        buffer::create_buffer::<TestState>(&self.display.handle(), &client.client, size).unwrap()
    }
}
