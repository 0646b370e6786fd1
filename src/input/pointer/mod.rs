//! Pointer-related types of the input abstraction

use std::{
    fmt,
    sync::{Arc, Mutex},
};

use tracing::{info_span, instrument, trace};

use crate::{
    input::{client_serial, Focus, GrabStatus, Seat, SeatHandler, SurfaceFocus, WeakSeat},
    protocol::{
        wl_pointer::{self, Axis, ButtonState, WlPointer},
        wl_surface::WlSurface,
    },
    server::Resource,
    utils::{Logical, Point, Serial},
};

mod cursor_image;
pub use cursor_image::{CursorImageAttributes, CursorImageStatus, CURSOR_IMAGE_ROLE};
pub(crate) use cursor_image::CursorImageSurfaceData;

mod grab;
use grab::DefaultGrab;
pub use grab::{GrabStartData, PointerGrab};

/// Pointer motion event
#[derive(Debug, Clone, Copy)]
pub struct MotionEvent {
    /// Location of the pointer in the global compositor space
    pub location: Point<f64, Logical>,
    /// Timestamp in milliseconds
    pub time: u32,
}

/// Pointer button event
#[derive(Debug, Clone, Copy)]
pub struct ButtonEvent {
    /// Button code, as defined by `linux/input-event-codes.h`
    pub button: u32,
    /// Button state
    pub state: ButtonState,
    /// Timestamp in milliseconds
    pub time: u32,
}

/// A frame of scroll events
#[derive(Debug, Clone, PartialEq)]
pub struct AxisFrame {
    /// Timestamp in milliseconds
    pub time: u32,
    /// Scroll amounts of this frame
    pub axis: Vec<(Axis, f64)>,
}

impl AxisFrame {
    /// Create a new frame of axis events
    pub fn new(time: u32) -> Self {
        AxisFrame { time, axis: Vec::new() }
    }

    /// Add a scroll amount to this frame
    pub fn value(mut self, axis: Axis, value: f64) -> Self {
        self.axis.push((axis, value));
        self
    }
}

/// An handle to a pointer handler
///
/// It can be cloned and all clones manipulate the same internal state.
///
/// This handle gives you access to an interface to send pointer events to your
/// clients.
///
/// When sending events using this handle, they will be intercepted by a pointer
/// grab if any is active. See the [`PointerGrab`] trait for details.
pub struct PointerHandle<D: SeatHandler> {
    pub(crate) inner: Arc<Mutex<PointerInternal<D>>>,
    pub(crate) known_pointers: Arc<Mutex<Vec<Resource<WlPointer>>>>,
    seat: WeakSeat<D>,
    pub(crate) span: tracing::Span,
}

impl<D: SeatHandler> fmt::Debug for PointerHandle<D> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PointerHandle")
            .field("inner", &self.inner)
            .field("known_pointers", &self.known_pointers)
            .finish()
    }
}

impl<D: SeatHandler> Clone for PointerHandle<D> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
            known_pointers: self.known_pointers.clone(),
            seat: self.seat.clone(),
            span: self.span.clone(),
        }
    }
}

impl<D: SeatHandler> std::hash::Hash for PointerHandle<D> {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        Arc::as_ptr(&self.inner).hash(state)
    }
}

impl<D: SeatHandler> std::cmp::PartialEq for PointerHandle<D> {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

impl<D: SeatHandler> std::cmp::Eq for PointerHandle<D> {}

impl<D: SeatHandler + 'static> PointerHandle<D> {
    pub(crate) fn new(seat: WeakSeat<D>) -> PointerHandle<D> {
        let known_pointers = Arc::new(Mutex::new(Vec::new()));
        PointerHandle {
            inner: Arc::new(Mutex::new(PointerInternal::new(known_pointers.clone()))),
            known_pointers,
            seat,
            span: info_span!("input_pointer"),
        }
    }

    /// Change the current grab on this pointer to the provided grab
    ///
    /// If focus is set to [`Focus::Clear`] any currently focused surface will be unfocused.
    ///
    /// Overwrites any current grab.
    #[instrument(level = "debug", parent = &self.span, skip(self, data, grab))]
    pub fn set_grab<G: PointerGrab<D> + 'static>(&self, data: &mut D, grab: G, serial: Serial, focus: Focus) {
        let Some(seat) = self.seat.upgrade() else {
            return;
        };
        self.inner
            .lock()
            .unwrap()
            .set_grab(data, &seat, serial, Box::new(grab), focus);
    }

    /// Remove any current grab on this pointer, resetting it to the default behavior
    #[instrument(level = "debug", parent = &self.span, skip(self, data))]
    pub fn unset_grab(&self, data: &mut D, time: u32) {
        let Some(seat) = self.seat.upgrade() else {
            return;
        };
        self.inner.lock().unwrap().unset_grab(data, &seat, time, true);
    }

    /// Check if this pointer is currently grabbed with this serial
    pub fn has_grab(&self, serial: Serial) -> bool {
        let guard = self.inner.lock().unwrap();
        match guard.grab {
            GrabStatus::Active(s, _) => s == serial,
            _ => false,
        }
    }

    /// Check if this pointer is currently being grabbed
    pub fn is_grabbed(&self) -> bool {
        let guard = self.inner.lock().unwrap();
        !matches!(guard.grab, GrabStatus::None)
    }

    /// Returns the start data for the grab, if any.
    pub fn grab_start_data(&self) -> Option<GrabStartData> {
        let guard = self.inner.lock().unwrap();
        match &guard.grab {
            GrabStatus::Active(_, g) => Some(g.start_data().clone()),
            _ => None,
        }
    }

    /// Notify that the pointer moved
    ///
    /// You provide the new location of the pointer, in the form of:
    ///
    /// - The coordinates of the pointer in the global compositor space
    /// - The surface on top of which the cursor is, and the coordinates of its
    ///   origin in the global compositor space (or `None` of the pointer is not
    ///   on top of a client surface).
    ///
    /// This will internally take care of notifying the appropriate client objects
    /// of enter/motion/leave events.
    #[instrument(level = "trace", parent = &self.span, skip(self, data, focus), fields(focus = ?focus.as_ref().map(|(_, loc)| loc)))]
    pub fn motion(
        &self,
        data: &mut D,
        focus: Option<(Resource<WlSurface>, Point<i32, Logical>)>,
        event: &MotionEvent,
    ) {
        let Some(seat) = self.seat.upgrade() else {
            return;
        };
        let mut inner = self.inner.lock().unwrap();
        inner.pending_focus = focus.clone();
        inner.with_grab(&seat, |handle, grab| {
            grab.motion(data, handle, focus, event);
        });
    }

    /// Notify that a button was pressed
    ///
    /// This will internally send the appropriate button event to the client
    /// objects matching with the currently focused surface. The serial of the event is
    /// allocated from the connection of the focused client and returned.
    #[instrument(level = "trace", parent = &self.span, skip(self, data))]
    pub fn button(&self, data: &mut D, event: &ButtonEvent) -> Serial {
        let Some(seat) = self.seat.upgrade() else {
            return Serial::from(0);
        };
        let mut inner = self.inner.lock().unwrap();
        match event.state {
            ButtonState::Pressed => {
                inner.pressed_buttons.push(event.button);
            }
            ButtonState::Released => {
                inner.pressed_buttons.retain(|b| *b != event.button);
            }
        }
        let focus = inner.focus.as_ref().and_then(SurfaceFocus::surface);
        let serial = seat.serial_for(focus.as_ref());
        inner.with_grab(&seat, |handle, grab| {
            grab.button(data, handle, event, serial);
        });
        serial
    }

    /// Send a frame of scroll events
    #[instrument(level = "trace", parent = &self.span, skip(self, data))]
    pub fn axis(&self, data: &mut D, details: AxisFrame) {
        let Some(seat) = self.seat.upgrade() else {
            return;
        };
        self.inner.lock().unwrap().with_grab(&seat, |handle, grab| {
            grab.axis(data, handle, details);
        });
    }

    /// Access the current location of this pointer in the global space
    pub fn current_location(&self) -> Point<f64, Logical> {
        self.inner.lock().unwrap().location
    }

    /// Retrieve the current pointer focus
    pub fn current_focus(&self) -> Option<Resource<WlSurface>> {
        self.inner.lock().unwrap().focus.as_ref().and_then(SurfaceFocus::surface)
    }

    /// The serial of the last `enter` event, if that focus is still active.
    pub fn last_enter(&self) -> Option<Serial> {
        self.inner
            .lock()
            .unwrap()
            .focus
            .as_ref()
            .filter(|focus| focus.surface().is_some())
            .map(|focus| focus.serial)
    }

    /// Register a new `wl_pointer` object for this pointer
    ///
    /// If its client currently has the pointer focus, the object is sent an `enter` event.
    pub(crate) fn new_pointer(&self, pointer: Resource<WlPointer>) {
        let inner = self.inner.lock().unwrap();
        if let Some(focus) = inner.focus.as_ref() {
            if let Some(surface) = focus.surface().filter(|s| s.client_id() == pointer.client_id()) {
                let local = inner.location - focus.location.to_f64();
                pointer.send_event(wl_pointer::Event::Enter {
                    serial: focus.serial.into(),
                    surface,
                    surface_x: local.x,
                    surface_y: local.y,
                });
                if pointer.version() >= 5 {
                    pointer.send_event(wl_pointer::Event::Frame);
                }
            }
        }
        self.known_pointers.lock().unwrap().push(pointer);
    }

    pub(crate) fn seat(&self) -> Option<Seat<D>> {
        self.seat.upgrade()
    }

    pub(crate) fn remove_pointer(&self, pointer: &Resource<WlPointer>) {
        self.known_pointers.lock().unwrap().retain(|p| p != pointer);
    }
}

/// This inner handle is accessed from inside a pointer grab logic, and directly
/// sends event to the client
pub struct PointerInnerHandle<'a, D: SeatHandler> {
    inner: &'a mut PointerInternal<D>,
    seat: &'a Seat<D>,
}

impl<D: SeatHandler> fmt::Debug for PointerInnerHandle<'_, D> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PointerInnerHandle")
            .field("inner", &self.inner)
            .field("seat", &self.seat.arc.name)
            .finish()
    }
}

impl<D: SeatHandler + 'static> PointerInnerHandle<'_, D> {
    /// Change the current grab on this pointer to the provided grab
    ///
    /// Overwrites any current grab.
    pub fn set_grab<G: PointerGrab<D> + 'static>(&mut self, data: &mut D, serial: Serial, focus: Focus, grab: G) {
        self.inner.set_grab(data, self.seat, serial, Box::new(grab), focus);
    }

    /// Remove any current grab on this pointer, resetting it to the default behavior
    ///
    /// This will also restore the focus of the underlying pointer if restore_focus
    /// is [`true`]
    pub fn unset_grab(&mut self, data: &mut D, time: u32, restore_focus: bool) {
        self.inner.unset_grab(data, self.seat, time, restore_focus);
    }

    /// Access the current focus of this pointer
    pub fn current_focus(&self) -> Option<(Resource<WlSurface>, Point<i32, Logical>)> {
        self.inner
            .focus
            .as_ref()
            .and_then(|focus| focus.surface().map(|surface| (surface, focus.location)))
    }

    /// Access the current location of this pointer in the global space
    pub fn current_location(&self) -> Point<f64, Logical> {
        self.inner.location
    }

    /// A list of the currently physically pressed buttons
    ///
    /// This still includes buttons that your grab have intercepted and not sent
    /// to the client.
    pub fn current_pressed(&self) -> &[u32] {
        &self.inner.pressed_buttons
    }

    /// Notify that the pointer moved
    ///
    /// This will internally take care of notifying the appropriate client objects
    /// of enter/motion/leave events.
    pub fn motion(
        &mut self,
        data: &mut D,
        focus: Option<(Resource<WlSurface>, Point<i32, Logical>)>,
        event: &MotionEvent,
    ) {
        self.inner.motion(data, self.seat, focus, event);
    }

    /// Notify that a button was pressed
    ///
    /// This will internally send the appropriate button event to the client
    /// objects matching with the currently focused surface.
    pub fn button(&mut self, _data: &mut D, event: &ButtonEvent, serial: Serial) {
        if let Some(surface) = self.inner.focus.as_ref().and_then(SurfaceFocus::surface) {
            self.inner.send_to_focus(&surface, |pointer| {
                pointer.send_event(wl_pointer::Event::Button {
                    serial: serial.into(),
                    time: event.time,
                    button: event.button,
                    state: event.state,
                })
            });
        }
    }

    /// Notify that an axis was scrolled
    ///
    /// This will internally send the appropriate axis events to the client
    /// objects matching with the currently focused surface.
    pub fn axis(&mut self, _data: &mut D, details: AxisFrame) {
        if let Some(surface) = self.inner.focus.as_ref().and_then(SurfaceFocus::surface) {
            self.inner.send_to_focus(&surface, |pointer| {
                for &(axis, value) in &details.axis {
                    pointer.send_event(wl_pointer::Event::Axis {
                        time: details.time,
                        axis,
                        value,
                    });
                }
            });
        }
    }
}

pub(crate) struct PointerInternal<D: SeatHandler> {
    pub(crate) focus: Option<SurfaceFocus>,
    pending_focus: Option<(Resource<WlSurface>, Point<i32, Logical>)>,
    location: Point<f64, Logical>,
    grab: GrabStatus<dyn PointerGrab<D>>,
    pressed_buttons: Vec<u32>,
    known_pointers: Arc<Mutex<Vec<Resource<WlPointer>>>>,
}

// the grab does not implement debug, so we have to impl Debug manually
impl<D: SeatHandler> fmt::Debug for PointerInternal<D> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PointerInternal")
            .field("focus", &self.focus)
            .field("pending_focus", &self.pending_focus)
            .field("location", &self.location)
            .field("grab", &self.grab)
            .field("pressed_buttons", &self.pressed_buttons)
            .finish()
    }
}

impl<D: SeatHandler + 'static> PointerInternal<D> {
    fn new(known_pointers: Arc<Mutex<Vec<Resource<WlPointer>>>>) -> Self {
        Self {
            focus: None,
            pending_focus: None,
            location: (0.0, 0.0).into(),
            grab: GrabStatus::None,
            pressed_buttons: Vec::new(),
            known_pointers,
        }
    }

    /// Send events to every pointer object of the client owning `surface`, then a frame
    fn send_to_focus(&self, surface: &Resource<WlSurface>, mut f: impl FnMut(&Resource<WlPointer>)) {
        let pointers = {
            let mut known = self.known_pointers.lock().unwrap();
            known.retain(|p| p.is_alive());
            known
                .iter()
                .filter(|p| p.client_id() == surface.client_id())
                .cloned()
                .collect::<Vec<_>>()
        };
        for pointer in pointers {
            f(&pointer);
            if pointer.version() >= 5 {
                pointer.send_event(wl_pointer::Event::Frame);
            }
        }
    }

    fn set_grab(
        &mut self,
        data: &mut D,
        seat: &Seat<D>,
        serial: Serial,
        grab: Box<dyn PointerGrab<D>>,
        focus: Focus,
    ) {
        self.grab = GrabStatus::Active(serial, grab);

        if matches!(focus, Focus::Clear) {
            let location = self.location;
            self.motion(data, seat, None, &MotionEvent { location, time: 0 });
        }
    }

    fn unset_grab(&mut self, data: &mut D, seat: &Seat<D>, time: u32, restore_focus: bool) {
        self.grab = GrabStatus::None;
        if restore_focus {
            // restore the focus
            let location = self.location;
            let focus = self.pending_focus.clone();
            self.motion(data, seat, focus, &MotionEvent { location, time });
        }
    }

    fn motion(
        &mut self,
        data: &mut D,
        seat: &Seat<D>,
        focus: Option<(Resource<WlSurface>, Point<i32, Logical>)>,
        event: &MotionEvent,
    ) {
        self.location = event.location;
        // a destroyed surface reads as no focus at all
        let current = self.focus.as_ref().and_then(SurfaceFocus::surface);
        let stays = match (&current, &focus) {
            (Some(current), Some((new, _))) => current == new,
            _ => false,
        };

        // do we leave a surface ?
        if !stays {
            if let Some(surface) = current {
                if let Some(serial) = client_serial(&surface) {
                    self.send_to_focus(&surface, |pointer| {
                        pointer.send_event(wl_pointer::Event::Leave {
                            serial: serial.into(),
                            surface: surface.clone(),
                        })
                    });
                }
            }
            if self.focus.take().is_some() {
                data.cursor_image(seat, CursorImageStatus::Default);
            }
        }

        // do we enter one ?
        let Some((surface, surface_location)) = focus else {
            return;
        };
        let local = event.location - surface_location.to_f64();
        if stays {
            // the coordinates of the surface might have changed
            if let Some(focus) = self.focus.as_mut() {
                focus.location = surface_location;
            }
            self.send_to_focus(&surface, |pointer| {
                pointer.send_event(wl_pointer::Event::Motion {
                    time: event.time,
                    surface_x: local.x,
                    surface_y: local.y,
                })
            });
        } else if let Some(serial) = client_serial(&surface) {
            trace!(surface = ?surface, ?serial, "pointer enter");
            self.focus = Some(SurfaceFocus::new(&surface, serial, surface_location));
            self.send_to_focus(&surface, |pointer| {
                pointer.send_event(wl_pointer::Event::Enter {
                    serial: serial.into(),
                    surface: surface.clone(),
                    surface_x: local.x,
                    surface_y: local.y,
                })
            });
        }
    }

    fn with_grab<F>(&mut self, seat: &Seat<D>, f: F)
    where
        F: FnOnce(&mut PointerInnerHandle<'_, D>, &mut dyn PointerGrab<D>),
    {
        let mut grab = std::mem::replace(&mut self.grab, GrabStatus::Borrowed);
        match grab {
            GrabStatus::Borrowed => panic!("Accessed a pointer grab from within a pointer grab access."),
            GrabStatus::Active(_, ref mut handler) => {
                // If this grab is associated with a surface that is no longer alive, discard it
                if let Some((ref focus, _)) = handler.start_data().focus {
                    if !focus.is_alive() {
                        self.grab = GrabStatus::None;
                        f(&mut PointerInnerHandle { inner: self, seat }, &mut DefaultGrab);
                        return;
                    }
                }
                f(&mut PointerInnerHandle { inner: self, seat }, &mut **handler);
            }
            GrabStatus::None => {
                f(&mut PointerInnerHandle { inner: self, seat }, &mut DefaultGrab);
            }
        }

        if let GrabStatus::Borrowed = self.grab {
            // the grab has not been ended nor replaced, put it back in place
            self.grab = grab;
        }
    }
}
