//! Input abstractions
//!
//! This module provides the seat, the routing authority for pointer, keyboard and touch input.
//! Each capability of a seat is represented by a cloneable handle through which the compositor
//! feeds input events. The handles track the focused surface of their device, and deliver the
//! events to the matching protocol objects of the focused client.
//!
//! The [`wl_seat`](crate::wayland::seat) global advertising a seat to clients is handled in the
//! `wayland::seat` module.
//!
//! ## How to use it
//!
//! To start using this module you need to create a [`SeatState`] and use that to create [`Seat`]s.
//! Additionally you need to implement the [`SeatHandler`] trait.
//!
//! ```no_run
//! use waystate::input::{Seat, SeatHandler, SeatState};
//! use waystate::protocol::wl_surface::WlSurface;
//! use waystate::server::Resource;
//!
//! struct State {
//!     seat_state: SeatState<Self>,
//!     // ...
//! }
//!
//! impl SeatHandler for State {
//!     fn seat_state(&mut self) -> &mut SeatState<Self> {
//!         &mut self.seat_state
//!     }
//!
//!     fn focus_changed(&mut self, seat: &Seat<Self>, focused: Option<&Resource<WlSurface>>) {
//!         // hand the selection over to the newly focused client, ...
//!     }
//! }
//!
//! let mut seat_state = SeatState::<State>::new();
//! let mut seat = seat_state.new_seat("seat-0");
//! let pointer = seat.add_pointer();
//! ```
//!
//! ### Serials and implicit grabs
//!
//! Serials are allocated from the connection of the client an event is addressed to. A button
//! press on a surface starts an implicit grab identified by the serial of that press, keeping the
//! pointer focused on that surface until every button is released. Touch-down does the same for
//! touch points. Protocols requiring an input serial (drag-and-drop, interactive move, popup
//! grabs) authorize their requests with [`PointerHandle::has_grab`] and
//! [`TouchHandle::has_grab`].

use std::{
    fmt,
    hash::Hash,
    sync::{Arc, Mutex, Weak},
};

use tracing::{info_span, instrument};

use crate::{
    protocol::{
        wl_seat::{self, WlSeat},
        wl_surface::WlSurface,
    },
    server::{GlobalId, Resource, Weak as WeakResource},
    utils::{user_data::UserDataMap, Logical, Point, Serial, SerialCounter},
};

use self::{
    keyboard::{KeyboardConfig, KeyboardHandle},
    pointer::{CursorImageStatus, PointerHandle},
    touch::{TouchGrab, TouchHandle},
};

pub mod keyboard;
pub mod pointer;
pub mod touch;

/// Handler trait for Seats
pub trait SeatHandler: Sized {
    /// [SeatState] getter
    fn seat_state(&mut self) -> &mut SeatState<Self>;

    /// Callback that will be notified whenever the keyboard focus of the seat changes.
    fn focus_changed(&mut self, _seat: &Seat<Self>, _focused: Option<&Resource<WlSurface>>) {}

    /// Callback that will be notified whenever a client requests to set a custom cursor image.
    fn cursor_image(&mut self, _seat: &Seat<Self>, _image: CursorImageStatus) {}
}

/// Delegate type for all [Seat] globals.
///
/// Events will be forwarded to an instance of the Seat global.
pub struct SeatState<D: SeatHandler> {
    pub(crate) seats: Vec<Seat<D>>,
}

impl<D: SeatHandler> fmt::Debug for SeatState<D> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SeatState").field("seats", &self.seats).finish()
    }
}

/// Focus handling of a grab
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Focus {
    /// Keep the current focus
    Keep,
    /// Clear the current focus
    Clear,
}

/// The surface an input device is focused on
///
/// The surface is referenced weakly: once it is destroyed the focus reads as empty.
#[derive(Debug, Clone)]
pub struct SurfaceFocus {
    surface: WeakResource<WlSurface>,
    /// Serial of the event that moved the focus to this surface
    pub serial: Serial,
    /// Location of the surface origin in the global compositor space
    pub location: Point<i32, Logical>,
}

impl SurfaceFocus {
    pub(crate) fn new(surface: &Resource<WlSurface>, serial: Serial, location: Point<i32, Logical>) -> Self {
        SurfaceFocus {
            surface: surface.downgrade(),
            serial,
            location,
        }
    }

    /// The focused surface, if it is still alive
    pub fn surface(&self) -> Option<Resource<WlSurface>> {
        self.surface.upgrade().ok()
    }

    pub(crate) fn is(&self, surface: &Resource<WlSurface>) -> bool {
        self.surface.id() == surface.id()
    }
}

/// A Seat handle
///
/// This struct gives you access to the control of the
/// capabilities of the associated seat.
///
/// This is an handle to the inner logic, it can be cloned.
///
/// See module-level documentation for details of use.
pub struct Seat<D: SeatHandler> {
    pub(crate) arc: Arc<SeatRc<D>>,
}

/// Weak variant of an [`Seat`]
///
/// Does not keep associated user data alive,
/// and can be used to refer to a potentially already destroyed seat.
pub struct WeakSeat<D: SeatHandler>(Weak<SeatRc<D>>);

impl<D: SeatHandler> WeakSeat<D> {
    /// Try to retrieve the original `Seat`, if it still exists
    pub fn upgrade(&self) -> Option<Seat<D>> {
        self.0.upgrade().map(|arc| Seat { arc })
    }
}

impl<D: SeatHandler> Clone for WeakSeat<D> {
    fn clone(&self) -> Self {
        WeakSeat(self.0.clone())
    }
}

impl<D: SeatHandler> fmt::Debug for WeakSeat<D> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("WeakSeat").field(&self.0.as_ptr()).finish()
    }
}

impl<D: SeatHandler> Seat<D> {
    /// Create a weak reference to this seat
    pub fn downgrade(&self) -> WeakSeat<D> {
        WeakSeat(Arc::downgrade(&self.arc))
    }
}

impl<D: SeatHandler> fmt::Debug for Seat<D> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Seat").field("arc", &self.arc).finish()
    }
}

impl<D: SeatHandler> PartialEq for Seat<D> {
    #[inline]
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.arc, &other.arc)
    }
}
impl<D: SeatHandler> Eq for Seat<D> {}

impl<D: SeatHandler> Hash for Seat<D> {
    #[inline]
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        Arc::as_ptr(&self.arc).hash(state)
    }
}

impl<D: SeatHandler> Clone for Seat<D> {
    #[inline]
    fn clone(&self) -> Self {
        Self {
            arc: self.arc.clone(),
        }
    }
}

pub(crate) struct Inner<D: SeatHandler> {
    pub(crate) pointer: Option<PointerHandle<D>>,
    pub(crate) keyboard: Option<KeyboardHandle<D>>,
    pub(crate) touch: Option<TouchHandle<D>>,
    pub(crate) global: Option<GlobalId>,
    pub(crate) known_seats: Vec<WeakResource<WlSeat>>,
}

impl<D: SeatHandler> fmt::Debug for Inner<D> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Inner")
            .field("pointer", &self.pointer)
            .field("keyboard", &self.keyboard)
            .field("touch", &self.touch)
            .field("global", &self.global)
            .field("known_seats", &self.known_seats)
            .finish()
    }
}

impl<D: SeatHandler> Inner<D> {
    pub(crate) fn compute_caps(&self) -> wl_seat::Capability {
        let mut caps = wl_seat::Capability::empty();
        if self.pointer.is_some() {
            caps |= wl_seat::Capability::Pointer;
        }
        if self.keyboard.is_some() {
            caps |= wl_seat::Capability::Keyboard;
        }
        if self.touch.is_some() {
            caps |= wl_seat::Capability::Touch;
        }
        caps
    }

    pub(crate) fn send_all_caps(&mut self) {
        let capabilities = self.compute_caps();
        self.known_seats.retain(|seat| seat.is_alive());
        for seat in self.known_seats.iter().filter_map(|seat| seat.upgrade().ok()) {
            seat.send_event(wl_seat::Event::Capabilities { capabilities });
        }
    }
}

pub(crate) struct SeatRc<D: SeatHandler> {
    pub(crate) name: String,
    pub(crate) inner: Mutex<Inner<D>>,
    // serials of events no client is focused for
    serials: SerialCounter,
    span: tracing::Span,
    user_data_map: UserDataMap,
}

impl<D: SeatHandler> fmt::Debug for SeatRc<D> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SeatRc")
            .field("name", &self.name)
            .field("inner", &self.inner)
            .field("user_data_map", &self.user_data_map)
            .finish()
    }
}

impl<D: SeatHandler> Default for SeatState<D> {
    #[inline]
    fn default() -> Self {
        Self::new()
    }
}

impl<D: SeatHandler> SeatState<D> {
    /// Create new delegate SeatState
    pub fn new() -> Self {
        Self { seats: Vec::new() }
    }

    /// Create a new seat
    ///
    /// The seat is not advertised to clients, see
    /// [`SeatState::new_wl_seat`](crate::wayland::seat) for that.
    pub fn new_seat<N>(&mut self, name: N) -> Seat<D>
    where
        N: Into<String>,
    {
        let name = name.into();
        let span = info_span!("input_seat", name);

        let arc = Arc::new(SeatRc {
            name,
            inner: Mutex::new(Inner {
                pointer: None,
                keyboard: None,
                touch: None,
                global: None,
                known_seats: Vec::new(),
            }),
            serials: SerialCounter::new(),
            span,
            user_data_map: UserDataMap::new(),
        });
        self.seats.push(Seat { arc: arc.clone() });

        Seat { arc }
    }

    /// Every seat created by this state
    pub fn seats(&self) -> impl Iterator<Item = &Seat<D>> {
        self.seats.iter()
    }
}

impl<D: SeatHandler + 'static> Seat<D> {
    /// Access the `UserDataMap` associated with this `Seat`
    pub fn user_data(&self) -> &UserDataMap {
        &self.arc.user_data_map
    }

    /// Adds the pointer capability to this seat
    ///
    /// You are provided a [`PointerHandle`], which allows you to send input events
    /// to this pointer. This handle can be cloned.
    ///
    /// Calling this method on a seat that already has a pointer capability
    /// will overwrite it, and will be seen by the clients as if the
    /// mouse was unplugged and a new one was plugged.
    #[instrument(parent = &self.arc.span, skip(self))]
    pub fn add_pointer(&mut self) -> PointerHandle<D> {
        let mut inner = self.arc.inner.lock().unwrap();
        let pointer = PointerHandle::new(self.downgrade());
        if inner.pointer.is_some() {
            // there is already a pointer, remove it and notify the clients
            // of the change
            inner.pointer = None;
            inner.send_all_caps();
        }
        inner.pointer = Some(pointer.clone());
        inner.send_all_caps();
        pointer
    }

    /// Access the pointer of this seat if any
    pub fn get_pointer(&self) -> Option<PointerHandle<D>> {
        self.arc.inner.lock().unwrap().pointer.clone()
    }

    /// Remove the pointer capability from this seat
    ///
    /// Clients will be appropriately notified.
    #[instrument(parent = &self.arc.span, skip(self))]
    pub fn remove_pointer(&mut self) {
        let mut inner = self.arc.inner.lock().unwrap();
        if inner.pointer.is_some() {
            inner.pointer = None;
            inner.send_all_caps();
        }
    }

    /// Adds the keyboard capability to this seat
    ///
    /// You are provided a [`KeyboardHandle`], which allows you to send input events
    /// to this keyboard. This handle can be cloned.
    ///
    /// The repeat information of the config is forwarded to the clients.
    ///
    /// Calling this method on a seat that already has a keyboard capability
    /// will overwrite it, and will be seen by the clients as if the
    /// keyboard was unplugged and a new one was plugged.
    #[instrument(parent = &self.arc.span, skip(self))]
    pub fn add_keyboard(&mut self, config: KeyboardConfig) -> KeyboardHandle<D> {
        let mut inner = self.arc.inner.lock().unwrap();
        let keyboard = KeyboardHandle::new(self.downgrade(), config);
        if inner.keyboard.is_some() {
            inner.keyboard = None;
            inner.send_all_caps();
        }
        inner.keyboard = Some(keyboard.clone());
        inner.send_all_caps();
        keyboard
    }

    /// Access the keyboard of this seat if any
    pub fn get_keyboard(&self) -> Option<KeyboardHandle<D>> {
        self.arc.inner.lock().unwrap().keyboard.clone()
    }

    /// Remove the keyboard capability from this seat
    ///
    /// Clients will be appropriately notified.
    #[instrument(parent = &self.arc.span, skip(self))]
    pub fn remove_keyboard(&mut self) {
        let mut inner = self.arc.inner.lock().unwrap();
        if inner.keyboard.is_some() {
            inner.keyboard = None;
            inner.send_all_caps();
        }
    }

    /// Adds the touch capability to this seat
    ///
    /// You are provided a [`TouchHandle`], which allows you to send input events
    /// to this touch device. This handle can be cloned.
    ///
    /// Calling this method on a seat that already has a touch capability
    /// will overwrite it, and will be seen by the clients as if the
    /// touchscreen was unplugged and a new one was plugged in.
    pub fn add_touch(&mut self) -> TouchHandle<D> {
        self.add_touch_with_default_grab(|| Box::new(touch::DefaultGrab))
    }

    /// Adds the touch capability to this seat with a custom default [`TouchGrab`]
    ///
    /// The default grab is used in case no other grab is currently active. When using
    /// [`Seat::add_touch`] it is [`touch::DefaultGrab`], which starts an implicit grab on the
    /// first touch point.
    pub fn add_touch_with_default_grab<F>(&mut self, default_grab: F) -> TouchHandle<D>
    where
        F: Fn() -> Box<dyn TouchGrab<D>> + Send + 'static,
    {
        let mut inner = self.arc.inner.lock().unwrap();
        let touch = TouchHandle::new(self.downgrade(), default_grab);
        if inner.touch.is_some() {
            // If there's already a touch device, remove it notify the clients about the change.
            inner.touch = None;
            inner.send_all_caps();
        }
        inner.touch = Some(touch.clone());
        inner.send_all_caps();
        touch
    }

    /// Access the touch device of this seat, if any.
    pub fn get_touch(&self) -> Option<TouchHandle<D>> {
        self.arc.inner.lock().unwrap().touch.clone()
    }

    /// Remove the touch capability from this seat
    ///
    /// Clients will be appropriately notified.
    pub fn remove_touch(&mut self) {
        let mut inner = self.arc.inner.lock().unwrap();
        if inner.touch.is_some() {
            inner.touch = None;
            inner.send_all_caps();
        }
    }

    /// Gets this seat's name
    pub fn name(&self) -> &str {
        &self.arc.name
    }
}

pub(crate) enum GrabStatus<G: ?Sized> {
    None,
    Active(Serial, Box<G>),
    Borrowed,
}

// `G` is not `Debug`, so we have to impl Debug manually
impl<G: ?Sized> fmt::Debug for GrabStatus<G> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            GrabStatus::None => f.debug_tuple("GrabStatus::None").finish(),
            GrabStatus::Active(serial, _) => f.debug_tuple("GrabStatus::Active").field(&serial).finish(),
            GrabStatus::Borrowed => f.debug_tuple("GrabStatus::Borrowed").finish(),
        }
    }
}

/// Allocate a serial from the connection of the client owning this surface
pub(crate) fn client_serial(surface: &Resource<WlSurface>) -> Option<Serial> {
    surface.client().map(|client| client.next_serial())
}

impl<D: SeatHandler> Seat<D> {
    /// Serial for an event addressed to `surface`, or to no client at all
    pub(crate) fn serial_for(&self, surface: Option<&Resource<WlSurface>>) -> Serial {
        surface
            .and_then(client_serial)
            .unwrap_or_else(|| self.arc.serials.next_serial())
    }
}

#[cfg(test)]
mod tests;
