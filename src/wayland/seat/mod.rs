//! Seat global utilities
//!
//! This module provides the `wl_seat` global advertising a [`Seat`] to clients, and the handling
//! of the `wl_pointer`, `wl_keyboard` and `wl_touch` objects they create from it. The input
//! logic itself lives in the [`input`](crate::input) module.
//!
//! ## How to use it
//!
//! ### Initialization
//!
//! ```no_run
//! use waystate::delegate_seat;
//! use waystate::input::{Seat, SeatState, SeatHandler};
//! use waystate::server::Display;
//!
//! # struct State { seat_state: SeatState<State> };
//! let display = Display::<State>::new();
//!
//! // insert the seat state into your state
//! let mut seat_state = SeatState::<State>::new();
//! // create the wl_seat global
//! let seat = seat_state.new_wl_seat(&display.handle(), "seat-0");
//!
//! // implement the required traits
//! impl SeatHandler for State {
//!     fn seat_state(&mut self) -> &mut SeatState<Self> {
//!         &mut self.seat_state
//!     }
//! }
//! delegate_seat!(State);
//! ```
//!
//! ### Run usage
//!
//! Once the seat is initialized, you can add capabilities to it.
//!
//! Currently, all capabilities (pointer, keyboard and touch) are supported. The keyboard repeat
//! information is provided with the [`KeyboardConfig`](crate::input::keyboard::KeyboardConfig)
//! when the capability is added.
//!
//! These methods return handles that can be cloned and sent across thread, so you can keep one
//! around in your event-handling code to forward inputs to your clients.

use std::sync::Arc;

use tracing::{debug, trace};

use crate::{
    input::{
        keyboard::KeyboardHandle,
        pointer::{CursorImageAttributes, CursorImageStatus, CursorImageSurfaceData, PointerHandle, CURSOR_IMAGE_ROLE},
        touch::TouchHandle,
        Inner, Seat, SeatHandler, SeatRc, SeatState, WeakSeat,
    },
    protocol::{
        wl_keyboard::{self, WlKeyboard},
        wl_pointer::{self, WlPointer},
        wl_seat::{self, WlSeat},
        wl_touch::{self, WlTouch},
    },
    server::{Client, ClientId, DataInit, Dispatch, DisplayHandle, GlobalDispatch, Interface, New, Resource},
    utils::Serial,
    wayland::compositor,
};

impl<D: SeatHandler> Inner<D> {
    fn add_seat(&mut self, seat: &Resource<WlSeat>) {
        self.known_seats.push(seat.downgrade());
    }
}

impl<D: SeatHandler + 'static> SeatState<D> {
    /// Create a new seat and advertise it to clients with a `wl_seat` global
    pub fn new_wl_seat<N>(&mut self, display: &DisplayHandle, name: N) -> Seat<D>
    where
        D: GlobalDispatch<WlSeat, SeatGlobalData<D>> + SeatHandler + 'static,
        N: Into<String>,
    {
        let seat = self.new_seat(name);
        let global_id = display.create_global::<D, WlSeat, _>(
            WlSeat::VERSION,
            SeatGlobalData {
                arc: seat.arc.clone(),
            },
        );
        seat.arc.inner.lock().unwrap().global = Some(global_id);
        seat
    }
}

impl<D: SeatHandler + 'static> Seat<D> {
    /// Attempt to retrieve a [`Seat`] from an existing resource
    ///
    /// May return `None` for a valid `WlSeat` that was created without
    /// the [`SeatState`] or whose seat was dropped.
    pub fn from_resource(seat: &Resource<WlSeat>) -> Option<Self> {
        seat.data::<SeatUserData<D>>().and_then(|data| data.seat.upgrade())
    }

    /// Checks whether a given [`WlSeat`] is associated with this [`Seat`]
    pub fn owns(&self, seat: &Resource<WlSeat>) -> bool {
        let inner = self.arc.inner.lock().unwrap();
        inner.known_seats.iter().any(|s| s.id() == seat.id())
    }

    /// Id of the `wl_seat` global of this seat, if it was advertised
    pub fn global(&self) -> Option<crate::server::GlobalId> {
        self.arc.inner.lock().unwrap().global
    }
}

/// User data for seat
#[derive(Debug)]
pub struct SeatUserData<D: SeatHandler> {
    seat: WeakSeat<D>,
}

/// Global data for seat
#[derive(Debug)]
pub struct SeatGlobalData<D: SeatHandler> {
    arc: Arc<SeatRc<D>>,
}

/// User data for pointer
#[derive(Debug)]
pub struct PointerUserData<D: SeatHandler> {
    pub(crate) handle: Option<PointerHandle<D>>,
}

/// User data for keyboard
#[derive(Debug)]
pub struct KeyboardUserData<D: SeatHandler> {
    pub(crate) handle: Option<KeyboardHandle<D>>,
}

/// User data for touch
#[derive(Debug)]
pub struct TouchUserData<D: SeatHandler> {
    pub(crate) handle: Option<TouchHandle<D>>,
}

impl<D> GlobalDispatch<WlSeat, SeatGlobalData<D>, D> for SeatState<D>
where
    D: GlobalDispatch<WlSeat, SeatGlobalData<D>>,
    D: Dispatch<WlSeat, SeatUserData<D>>,
    D: SeatHandler + 'static,
{
    fn bind(
        _state: &mut D,
        _handle: &DisplayHandle,
        _client: &Client,
        resource: New<WlSeat>,
        global_data: &SeatGlobalData<D>,
        data_init: &mut DataInit<'_, D>,
    ) {
        let data = SeatUserData {
            seat: Seat {
                arc: global_data.arc.clone(),
            }
            .downgrade(),
        };

        let resource = data_init.init(resource, data);

        if resource.version() >= 2 {
            resource.send_event(wl_seat::Event::Name {
                name: global_data.arc.name.clone(),
            });
        }

        let mut inner = global_data.arc.inner.lock().unwrap();
        resource.send_event(wl_seat::Event::Capabilities {
            capabilities: inner.compute_caps(),
        });

        inner.add_seat(&resource);
    }
}

impl<D> Dispatch<WlSeat, SeatUserData<D>, D> for SeatState<D>
where
    D: Dispatch<WlSeat, SeatUserData<D>>,
    D: Dispatch<WlKeyboard, KeyboardUserData<D>>,
    D: Dispatch<WlPointer, PointerUserData<D>>,
    D: Dispatch<WlTouch, TouchUserData<D>>,
    D: SeatHandler + 'static,
{
    fn request(
        _state: &mut D,
        _client: &Client,
        resource: &Resource<WlSeat>,
        request: wl_seat::Request,
        data: &SeatUserData<D>,
        _dhandle: &DisplayHandle,
        data_init: &mut DataInit<'_, D>,
    ) {
        let Some(seat) = data.seat.upgrade() else {
            // the seat is gone, create inert objects
            match request {
                wl_seat::Request::GetPointer { id } => {
                    data_init.init(id, PointerUserData::<D> { handle: None });
                }
                wl_seat::Request::GetKeyboard { id } => {
                    data_init.init(id, KeyboardUserData::<D> { handle: None });
                }
                wl_seat::Request::GetTouch { id } => {
                    data_init.init(id, TouchUserData::<D> { handle: None });
                }
                wl_seat::Request::Release => {}
            }
            return;
        };

        match request {
            wl_seat::Request::GetPointer { id } => {
                let handle = seat.get_pointer();
                let pointer = data_init.init(id, PointerUserData { handle: handle.clone() });
                match handle {
                    Some(handle) => handle.new_pointer(pointer),
                    None => debug!(seat = seat.name(), "client requested a pointer the seat does not have"),
                }
            }
            wl_seat::Request::GetKeyboard { id } => {
                let handle = seat.get_keyboard();
                let keyboard = data_init.init(id, KeyboardUserData { handle: handle.clone() });
                match handle {
                    Some(handle) => handle.new_kbd(keyboard),
                    None => debug!(seat = seat.name(), "client requested a keyboard the seat does not have"),
                }
            }
            wl_seat::Request::GetTouch { id } => {
                let handle = seat.get_touch();
                let touch = data_init.init(id, TouchUserData { handle: handle.clone() });
                match handle {
                    Some(handle) => handle.new_instance(touch),
                    None => debug!(seat = seat.name(), "client requested a touch device the seat does not have"),
                }
            }
            wl_seat::Request::Release => {
                trace!(seat = ?resource.id(), "wl_seat released");
            }
        }
    }

    fn destroyed(_state: &mut D, _client: ClientId, resource: &Resource<WlSeat>, data: &SeatUserData<D>) {
        if let Some(seat) = data.seat.upgrade() {
            seat.arc
                .inner
                .lock()
                .unwrap()
                .known_seats
                .retain(|s| s.id() != resource.id());
        }
    }
}

impl<D> Dispatch<WlPointer, PointerUserData<D>, D> for SeatState<D>
where
    D: Dispatch<WlPointer, PointerUserData<D>>,
    D: SeatHandler + 'static,
{
    fn request(
        state: &mut D,
        _client: &Client,
        resource: &Resource<WlPointer>,
        request: wl_pointer::Request,
        data: &PointerUserData<D>,
        _dhandle: &DisplayHandle,
        _data_init: &mut DataInit<'_, D>,
    ) {
        match request {
            wl_pointer::Request::SetCursor {
                surface,
                hotspot_x,
                hotspot_y,
                serial,
            } => {
                let Some(handle) = &data.handle else {
                    return;
                };
                let Some(seat) = handle.seat() else {
                    return;
                };

                // only the focused client may set the cursor, with the serial of its last enter
                let focused = handle
                    .current_focus()
                    .map(|focus| focus.client_id() == resource.client_id())
                    .unwrap_or(false);
                if !focused {
                    debug!("set_cursor from a client without the pointer focus");
                    return;
                }
                if handle.last_enter() != Some(Serial::from(serial)) {
                    debug!(serial, "set_cursor with a stale serial");
                    return;
                }

                let cursor_image = match surface {
                    Some(surface) => {
                        // tolerate re-using the same surface
                        if compositor::give_role(&surface, CURSOR_IMAGE_ROLE).is_err()
                            && compositor::get_role(&surface) != Some(CURSOR_IMAGE_ROLE)
                        {
                            resource.post_error(wl_pointer::Error::Role, "Given wl_surface has another role.");
                            return;
                        }

                        compositor::with_states(&surface, |states| {
                            states.data_map.insert_if_missing(|| {
                                CursorImageSurfaceData::new(CursorImageAttributes::default())
                            });
                            if let Some(attributes) = states.data_map.get::<CursorImageSurfaceData>() {
                                attributes.lock().unwrap().hotspot = (hotspot_x, hotspot_y).into();
                            }
                        });

                        CursorImageStatus::Surface(surface)
                    }
                    None => CursorImageStatus::Hidden,
                };

                state.cursor_image(&seat, cursor_image)
            }
            wl_pointer::Request::Release => {
                // Our destructors already handle it
            }
        }
    }

    fn destroyed(_state: &mut D, _client: ClientId, pointer: &Resource<WlPointer>, data: &PointerUserData<D>) {
        if let Some(ref handle) = data.handle {
            handle.remove_pointer(pointer);
        }
    }
}

impl<D> Dispatch<WlKeyboard, KeyboardUserData<D>, D> for SeatState<D>
where
    D: Dispatch<WlKeyboard, KeyboardUserData<D>>,
    D: SeatHandler + 'static,
{
    fn request(
        _state: &mut D,
        _client: &Client,
        _resource: &Resource<WlKeyboard>,
        request: wl_keyboard::Request,
        _data: &KeyboardUserData<D>,
        _dhandle: &DisplayHandle,
        _data_init: &mut DataInit<'_, D>,
    ) {
        match request {
            wl_keyboard::Request::Release => {
                // Our destructors already handle it
            }
        }
    }

    fn destroyed(_state: &mut D, _client: ClientId, keyboard: &Resource<WlKeyboard>, data: &KeyboardUserData<D>) {
        if let Some(ref handle) = data.handle {
            handle.remove_kbd(keyboard);
        }
    }
}

impl<D> Dispatch<WlTouch, TouchUserData<D>, D> for SeatState<D>
where
    D: Dispatch<WlTouch, TouchUserData<D>>,
    D: SeatHandler + 'static,
{
    fn request(
        _state: &mut D,
        _client: &Client,
        _resource: &Resource<WlTouch>,
        request: wl_touch::Request,
        _data: &TouchUserData<D>,
        _dhandle: &DisplayHandle,
        _data_init: &mut DataInit<'_, D>,
    ) {
        match request {
            wl_touch::Request::Release => {
                // Our destructors already handle it
            }
        }
    }

    fn destroyed(_state: &mut D, _client: ClientId, touch: &Resource<WlTouch>, data: &TouchUserData<D>) {
        if let Some(ref handle) = data.handle {
            handle.remove_instance(touch);
        }
    }
}

/// Macro to delegate implementation of wl_seat related protocols to [`SeatState`].
///
/// You must also implement [`SeatHandler`] to use this.
#[macro_export]
macro_rules! delegate_seat {
    ($ty: ty) => {
        $crate::delegate_global_dispatch!($ty: [$crate::protocol::wl_seat::WlSeat: $crate::wayland::seat::SeatGlobalData<$ty>] => $crate::input::SeatState<$ty>);
        $crate::delegate_dispatch!($ty: [$crate::protocol::wl_seat::WlSeat: $crate::wayland::seat::SeatUserData<$ty>] => $crate::input::SeatState<$ty>);
        $crate::delegate_dispatch!($ty: [$crate::protocol::wl_pointer::WlPointer: $crate::wayland::seat::PointerUserData<$ty>] => $crate::input::SeatState<$ty>);
        $crate::delegate_dispatch!($ty: [$crate::protocol::wl_keyboard::WlKeyboard: $crate::wayland::seat::KeyboardUserData<$ty>] => $crate::input::SeatState<$ty>);
        $crate::delegate_dispatch!($ty: [$crate::protocol::wl_touch::WlTouch: $crate::wayland::seat::TouchUserData<$ty>] => $crate::input::SeatState<$ty>);
    };
}
