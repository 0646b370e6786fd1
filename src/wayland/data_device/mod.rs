//! Utilities for manipulating the data devices
//!
//! The data device is wayland's abstraction to represent both selection (copy/paste) and
//! drag'n'drop actions. This module provides logic to handle this part of the protocol.
//! Selection and drag'n'drop are per-seat notions.
//!
//! This module provides the freestanding [`set_data_device_focus`] function:
//!   This function sets the data device focus for a given seat; you'd typically call it
//!   whenever the keyboard focus changes, to follow it (for example in the focus hook of your
//!   keyboards).
//!
//! Using these facilities, this module will handle all the selection logic for you:
//!
//! - a client with the keyboard focus can set the selection, cancelling the previous one;
//! - the selection is offered to the focused client, and offered again whenever the focus
//!   moves to another client.
//!
//! It also handles drag'n'drop initiated by clients holding an implicit pointer or touch grab,
//! negotiating the action between the source and the targets. The compositor can also set a
//! selection of its own with [`set_data_device_selection`], or start a drag with [`start_dnd`].
//!
//! ## Initialization
//!
//! ```no_run
//! use waystate::delegate_data_device;
//! use waystate::input::{Seat, SeatHandler, SeatState};
//! use waystate::server::Display;
//! use waystate::wayland::data_device::{
//!     ClientDndGrabHandler, DataDeviceHandler, DataDeviceState, ServerDndGrabHandler,
//! };
//!
//! # struct State { data_device_state: DataDeviceState, seat_state: SeatState<State> }
//! # impl SeatHandler for State {
//! #     fn seat_state(&mut self) -> &mut SeatState<Self> { &mut self.seat_state }
//! # }
//! let display = Display::<State>::new();
//!
//! // Create the data device manager global
//! let data_device_state = DataDeviceState::new::<State>(&display.handle());
//!
//! // implement the necessary traits
//! impl ClientDndGrabHandler for State {}
//! impl ServerDndGrabHandler for State {}
//! impl DataDeviceHandler for State {
//!     type SelectionUserData = ();
//!     fn data_device_state(&self) -> &DataDeviceState { &self.data_device_state }
//!     // ... override default implementations here to customize handling ...
//! }
//! delegate_data_device!(State);
//!
//! // You're now ready to go!
//! ```

use std::{os::unix::io::OwnedFd, sync::Mutex};

use tracing::{debug, instrument};

use crate::{
    input::{pointer::GrabStartData, touch::TouchGrabStartData, Focus, Seat, SeatHandler},
    protocol::{
        wl_data_device_manager::{self, DndAction, WlDataDeviceManager},
        wl_data_offer::WlDataOffer,
        wl_data_source::{self, WlDataSource},
        wl_surface::WlSurface,
    },
    server::{Client, DataInit, Dispatch, DisplayHandle, GlobalDispatch, GlobalId, Interface, New, Resource},
    utils::Serial,
};

mod device;
mod dnd_grab;
mod seat_data;
mod source;

pub use device::{DataDeviceUserData, DND_ICON_ROLE};
pub use dnd_grab::DndOfferData;
pub use seat_data::{Selection, SelectionOffer};
pub use source::{with_source_metadata, DataSourceUserData, SourceMetadata};

use dnd_grab::{DnDGrab, DragSource};
use seat_data::SeatData;

/// Events that are generated by interactions of the clients with the data device
pub trait DataDeviceHandler: Sized + SeatHandler + ClientDndGrabHandler + ServerDndGrabHandler {
    /// UserData attached to server-side selections
    type SelectionUserData: Clone + Send + Sync + 'static;

    /// [DataDeviceState] getter
    fn data_device_state(&self) -> &DataDeviceState;

    /// Action chooser for DnD negotiation
    ///
    /// `available` is the set of actions supported by both the source and the target, and
    /// `preferred` the action the target prefers. The default implementation is
    /// [`default_action_chooser`].
    fn action_choice(&mut self, available: DndAction, preferred: DndAction) -> DndAction {
        default_action_chooser(available, preferred)
    }

    /// A client has set the selection
    ///
    /// `source` is `None` if the client cleared the selection.
    #[allow(unused_variables)]
    fn new_selection(&mut self, source: Option<Resource<WlDataSource>>, seat: Seat<Self>) {}

    /// A client requested to read the server-set selection
    ///
    /// * `mime_type` - the requested mime type
    /// * `fd` - the fd to write into
    #[allow(unused_variables)]
    fn send_selection(
        &mut self,
        mime_type: String,
        fd: OwnedFd,
        seat: Seat<Self>,
        user_data: &Self::SelectionUserData,
    ) {
    }
}

/// Events that are generated during client initiated drag'n'drop
pub trait ClientDndGrabHandler: SeatHandler + Sized {
    /// A client started a drag'n'drop as response to a user pointer action
    ///
    /// * `source` - The data source provided by the client.
    ///   If it is `None`, this means the DnD is restricted to surfaces of the
    ///   same client and the client will manage data transfer by itself.
    /// * `icon` - The icon the client requested to be used to be associated with the cursor icon
    ///   during the drag'n'drop.
    /// * `seat` - The seat on which the DnD operation was started
    #[allow(unused_variables)]
    fn started(&mut self, source: Option<Resource<WlDataSource>>, icon: Option<Resource<WlSurface>>, seat: Seat<Self>) {}

    /// The drag'n'drop action was finished by the user releasing the buttons
    ///
    /// At this point, any pointer icon should be removed.
    ///
    /// Note that this method will be called for all DnD operations, even those initiated
    /// by the compositor.
    ///
    /// * `target` - The surface the drop happened on, if any
    /// * `validated` - Whether the target accepted the drop
    #[allow(unused_variables)]
    fn dropped(&mut self, target: Option<Resource<WlSurface>>, validated: bool, seat: Seat<Self>) {}
}

/// Event generated by the interactions of clients with a server initiated drag'n'drop
pub trait ServerDndGrabHandler: SeatHandler {
    /// The client chose an action
    #[allow(unused_variables)]
    fn action(&mut self, action: DndAction, seat: Seat<Self>) {}

    /// The DnD resource was dropped by the user
    ///
    /// After that, the client can still interact with your resource
    #[allow(unused_variables)]
    fn dropped(&mut self, seat: Seat<Self>) {}

    /// The Dnd was cancelled
    ///
    /// The client can no longer interact
    #[allow(unused_variables)]
    fn cancelled(&mut self, seat: Seat<Self>) {}

    /// The client requested for data to be sent
    ///
    /// * `mime_type` - The requested mime type
    /// * `fd` - The FD to write into
    #[allow(unused_variables)]
    fn send(&mut self, mime_type: String, fd: OwnedFd, seat: Seat<Self>) {}

    /// The client has finished interacting with the resource
    ///
    /// This can only happen after the resource was dropped.
    #[allow(unused_variables)]
    fn finished(&mut self, seat: Seat<Self>) {}
}

/// State of data device
#[derive(Debug)]
pub struct DataDeviceState {
    manager_global: GlobalId,
}

impl DataDeviceState {
    /// Register a new [WlDataDeviceManager] global
    pub fn new<D>(display: &DisplayHandle) -> Self
    where
        D: GlobalDispatch<WlDataDeviceManager, ()> + 'static,
        D: DataDeviceHandler,
    {
        let manager_global = display.create_global::<D, WlDataDeviceManager, _>(WlDataDeviceManager::VERSION, ());

        Self { manager_global }
    }

    /// [WlDataDeviceManager] GlobalId getter
    pub fn global(&self) -> GlobalId {
        self.manager_global
    }
}

/// A simple action chooser for DnD negotiation
///
/// If the preferred action is available, it'll pick it. Otherwise, it'll pick the first
/// available in the following order: Copy, Move, Ask.
pub fn default_action_chooser(available: DndAction, preferred: DndAction) -> DndAction {
    // if the preferred action is valid (a single action) and in the available actions, use it
    // otherwise, follow a fallback stategy
    if [DndAction::Move, DndAction::Copy, DndAction::Ask].contains(&preferred) && available.contains(preferred) {
        preferred
    } else if available.contains(DndAction::Copy) {
        DndAction::Copy
    } else if available.contains(DndAction::Move) {
        DndAction::Move
    } else if available.contains(DndAction::Ask) {
        DndAction::Ask
    } else {
        DndAction::empty()
    }
}

/// Errors happening when requesting selection contents
#[derive(Debug, PartialEq, Eq, thiserror::Error)]
pub enum SelectionRequestError {
    /// Requested mime type is not available
    #[error("Requested mime type is not available")]
    InvalidMimetype,
    /// Requesting server side selection contents is not supported
    #[error("Current selection is server-side")]
    ServerSideSelection,
    /// There is no active selection
    #[error("No active selection to query")]
    NoSelection,
}

pub(crate) fn seat_data<D: DataDeviceHandler + 'static>(seat: &Seat<D>) -> &Mutex<SeatData<D::SelectionUserData>> {
    seat.user_data()
        .get_or_insert(|| Mutex::new(SeatData::<D::SelectionUserData>::new()))
}

/// Set the data device focus to a certain client for a given seat
///
/// The selection of the seat is offered to the data devices of this client.
#[instrument(level = "debug", skip(dh, seat), fields(seat = seat.name()))]
pub fn set_data_device_focus<D>(dh: &DisplayHandle, seat: &Seat<D>, client: Option<Client>)
where
    D: DataDeviceHandler,
    D: Dispatch<WlDataOffer, SelectionOffer<D>>,
    D: 'static,
{
    seat_data(seat).lock().unwrap().set_focus::<D>(dh, seat, client);
}

/// Set a compositor-provided selection for this seat
///
/// You need to provide the available mime types for this selection.
///
/// Whenever a client requests to read the selection, your callback will
/// receive a [`DataDeviceHandler::send_selection`] event.
#[instrument(level = "debug", skip(dh, seat, user_data), fields(seat = seat.name()))]
pub fn set_data_device_selection<D>(
    dh: &DisplayHandle,
    seat: &Seat<D>,
    mime_types: Vec<String>,
    user_data: D::SelectionUserData,
) where
    D: DataDeviceHandler,
    D: Dispatch<WlDataOffer, SelectionOffer<D>>,
    D: 'static,
{
    seat_data(seat).lock().unwrap().set_selection::<D>(
        dh,
        seat,
        Selection::Compositor {
            metadata: SourceMetadata {
                mime_types,
                dnd_action: DndAction::empty(),
            },
            user_data,
        },
    );
}

/// Clear the current selection for this seat
#[instrument(level = "debug", skip(dh, seat), fields(seat = seat.name()))]
pub fn clear_data_device_selection<D>(dh: &DisplayHandle, seat: &Seat<D>)
where
    D: DataDeviceHandler,
    D: Dispatch<WlDataOffer, SelectionOffer<D>>,
    D: 'static,
{
    seat_data(seat)
        .lock()
        .unwrap()
        .set_selection::<D>(dh, seat, Selection::Empty);
}

/// Get the user data of the compositor-provided selection of this seat, if it is the current one
pub fn current_data_device_selection_userdata<D>(seat: &Seat<D>) -> Option<D::SelectionUserData>
where
    D: DataDeviceHandler + 'static,
{
    match seat_data(seat).lock().unwrap().selection() {
        Selection::Compositor { user_data, .. } => Some(user_data.clone()),
        _ => None,
    }
}

/// Request the current data_device selection of the given seat
/// to be written to the provided file descriptor in the given mime type.
pub fn request_data_device_client_selection<D>(
    seat: &Seat<D>,
    mime_type: String,
    fd: OwnedFd,
) -> Result<(), SelectionRequestError>
where
    D: DataDeviceHandler + 'static,
{
    match seat_data(seat).lock().unwrap().selection() {
        Selection::Empty => Err(SelectionRequestError::NoSelection),
        Selection::Compositor { .. } => Err(SelectionRequestError::ServerSideSelection),
        Selection::Client(source) => {
            if !source.is_alive() {
                return Err(SelectionRequestError::NoSelection);
            }
            let valid = with_source_metadata(source, |meta| meta.mime_types.contains(&mime_type)).unwrap_or(false);
            if !valid {
                return Err(SelectionRequestError::InvalidMimetype);
            }
            source.send_event(wl_data_source::Event::Send { mime_type, fd });
            Ok(())
        }
    }
}

/// Start a drag'n'drop from a resource controlled by the compositor
///
/// You'll receive events generated by the interaction of clients with your
/// drag'n'drop in the provided callback. See [`ServerDndGrabHandler`] for details about
/// which events can be generated and what response is expected from you to them.
#[instrument(level = "debug", skip(dh, seat, data, start_data, metadata), fields(seat = seat.name()))]
pub fn start_dnd<D>(
    dh: &DisplayHandle,
    seat: &Seat<D>,
    data: &mut D,
    serial: Serial,
    start_data: GrabStartData,
    metadata: SourceMetadata,
) where
    D: DataDeviceHandler,
    D: Dispatch<WlDataOffer, DndOfferData<D>>,
    D: 'static,
{
    if let Some(pointer) = seat.get_pointer() {
        pointer.set_grab(
            data,
            DnDGrab::new(dh, start_data, DragSource::Compositor(metadata), seat.clone()),
            serial,
            Focus::Clear,
        );
    } else {
        debug!("Cannot start a drag on a seat without pointer");
    }
}

/// Start a drag'n'drop from a resource controlled by the compositor, driven by a touch point
///
/// This behaves like [`start_dnd`], the drop happens once the touch point of `start_data` is
/// lifted.
#[instrument(level = "debug", skip(dh, seat, data, start_data, metadata), fields(seat = seat.name()))]
pub fn start_touch_dnd<D>(
    dh: &DisplayHandle,
    seat: &Seat<D>,
    data: &mut D,
    serial: Serial,
    start_data: TouchGrabStartData,
    metadata: SourceMetadata,
) where
    D: DataDeviceHandler,
    D: Dispatch<WlDataOffer, DndOfferData<D>>,
    D: 'static,
{
    if let Some(touch) = seat.get_touch() {
        touch.set_grab(
            data,
            DnDGrab::new(dh, start_data, DragSource::Compositor(metadata), seat.clone()),
            serial,
        );
    } else {
        debug!("Cannot start a drag on a seat without touch");
    }
}

impl<D> GlobalDispatch<WlDataDeviceManager, (), D> for DataDeviceState
where
    D: GlobalDispatch<WlDataDeviceManager, ()>,
    D: Dispatch<WlDataDeviceManager, ()>,
    D: DataDeviceHandler,
    D: 'static,
{
    fn bind(
        _state: &mut D,
        _handle: &DisplayHandle,
        _client: &Client,
        resource: New<WlDataDeviceManager>,
        _global_data: &(),
        data_init: &mut DataInit<'_, D>,
    ) {
        data_init.init(resource, ());
    }
}

impl<D> Dispatch<WlDataDeviceManager, (), D> for DataDeviceState
where
    D: Dispatch<WlDataDeviceManager, ()>,
    D: Dispatch<WlDataSource, DataSourceUserData>,
    D: Dispatch<crate::protocol::wl_data_device::WlDataDevice, DataDeviceUserData>,
    D: Dispatch<WlDataOffer, SelectionOffer<D>>,
    D: DataDeviceHandler,
    D: 'static,
{
    fn request(
        _state: &mut D,
        client: &Client,
        _resource: &Resource<WlDataDeviceManager>,
        request: wl_data_device_manager::Request,
        _data: &(),
        dhandle: &DisplayHandle,
        data_init: &mut DataInit<'_, D>,
    ) {
        match request {
            wl_data_device_manager::Request::CreateDataSource { id } => {
                data_init.init(id, DataSourceUserData::new());
            }
            wl_data_device_manager::Request::GetDataDevice { id, seat: wl_seat } => {
                match Seat::<D>::from_resource(&wl_seat) {
                    Some(seat) => {
                        let data_device = data_init.init(id, DataDeviceUserData { wl_seat });
                        seat_data(&seat)
                            .lock()
                            .unwrap()
                            .add_device::<D>(dhandle, &seat, data_device);
                    }
                    None => {
                        debug!(client = ?client.id(), "Data device requested for a seat that no longer exists");
                        data_init.init(id, DataDeviceUserData { wl_seat });
                    }
                }
            }
        }
    }
}

/// Macro to delegate implementation of the wl_data_device_manager and related objects to
/// [`DataDeviceState`].
///
/// You must also implement [`DataDeviceHandler`] to use this.
#[macro_export]
macro_rules! delegate_data_device {
    ($ty: ty) => {
        $crate::delegate_global_dispatch!($ty: [$crate::protocol::wl_data_device_manager::WlDataDeviceManager: ()] => $crate::wayland::data_device::DataDeviceState);
        $crate::delegate_dispatch!($ty: [$crate::protocol::wl_data_device_manager::WlDataDeviceManager: ()] => $crate::wayland::data_device::DataDeviceState);
        $crate::delegate_dispatch!($ty: [$crate::protocol::wl_data_device::WlDataDevice: $crate::wayland::data_device::DataDeviceUserData] => $crate::wayland::data_device::DataDeviceState);
        $crate::delegate_dispatch!($ty: [$crate::protocol::wl_data_source::WlDataSource: $crate::wayland::data_device::DataSourceUserData] => $crate::wayland::data_device::DataDeviceState);
        $crate::delegate_dispatch!($ty: [$crate::protocol::wl_data_offer::WlDataOffer: $crate::wayland::data_device::SelectionOffer<$ty>] => $crate::wayland::data_device::DataDeviceState);
        $crate::delegate_dispatch!($ty: [$crate::protocol::wl_data_offer::WlDataOffer: $crate::wayland::data_device::DndOfferData<$ty>] => $crate::wayland::data_device::DataDeviceState);
    };
}
