//! Touch-related types of the input abstraction

use std::{
    collections::HashMap,
    fmt,
    sync::{Arc, Mutex},
};

use tracing::{info_span, instrument, trace};

use crate::{
    input::{GrabStatus, Seat, SeatHandler, WeakSeat},
    protocol::{
        wl_surface::WlSurface,
        wl_touch::{self, WlTouch},
    },
    server::Resource,
    utils::{Logical, Point, Serial},
};

mod grab;
pub use grab::{DefaultGrab, TouchDownGrab, TouchGrab, TouchGrabStartData};

/// Identifier of a touch point, as reported to clients
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TouchSlot(i32);

impl From<i32> for TouchSlot {
    fn from(id: i32) -> Self {
        TouchSlot(id)
    }
}

impl From<TouchSlot> for i32 {
    fn from(slot: TouchSlot) -> Self {
        slot.0
    }
}

/// A new touch point has appeared
#[derive(Debug, Clone, Copy)]
pub struct DownEvent {
    /// Touch point of the event
    pub slot: TouchSlot,
    /// Location of the touch point in the global compositor space
    pub location: Point<f64, Logical>,
    /// Timestamp in milliseconds
    pub time: u32,
}

/// A touch point has disappeared
#[derive(Debug, Clone, Copy)]
pub struct UpEvent {
    /// Touch point of the event
    pub slot: TouchSlot,
    /// Timestamp in milliseconds
    pub time: u32,
}

/// A touch point has moved
#[derive(Debug, Clone, Copy)]
pub struct MotionEvent {
    /// Touch point of the event
    pub slot: TouchSlot,
    /// Location of the touch point in the global compositor space
    pub location: Point<f64, Logical>,
    /// Timestamp in milliseconds
    pub time: u32,
}

/// An handle to a touch handler
///
/// It can be cloned and all clones manipulate the same internal state.
///
/// This handle gives you access to an interface to send touch events to your
/// clients.
///
/// When sending events using this handle, they will be intercepted by a touch
/// grab if any is active. See the [`TouchGrab`] trait for details.
pub struct TouchHandle<D: SeatHandler> {
    inner: Arc<Mutex<TouchInternal<D>>>,
    seat: WeakSeat<D>,
    span: tracing::Span,
}

impl<D: SeatHandler> fmt::Debug for TouchHandle<D> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TouchHandle").field("inner", &self.inner).finish()
    }
}

impl<D: SeatHandler> Clone for TouchHandle<D> {
    #[inline]
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
            seat: self.seat.clone(),
            span: self.span.clone(),
        }
    }
}

impl<D: SeatHandler> PartialEq for TouchHandle<D> {
    #[inline]
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

struct TouchSlotState {
    focus: Option<(Resource<WlSurface>, Point<i32, Logical>)>,
    // surface of a lifted touch point still owed a frame event
    frame_pending: Option<Resource<WlSurface>>,
}

pub(crate) struct TouchInternal<D: SeatHandler> {
    known_instances: Vec<Resource<WlTouch>>,
    focus: HashMap<TouchSlot, TouchSlotState>,
    default_grab: Box<dyn Fn() -> Box<dyn TouchGrab<D>> + Send>,
    grab: GrabStatus<dyn TouchGrab<D>>,
}

impl<D: SeatHandler> fmt::Debug for TouchInternal<D> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TouchInternal")
            .field("known_instances", &self.known_instances)
            .field("slots", &self.focus.keys().collect::<Vec<_>>())
            .field("grab", &self.grab)
            .finish()
    }
}

impl<D: SeatHandler + 'static> TouchHandle<D> {
    pub(crate) fn new<F>(seat: WeakSeat<D>, default_grab: F) -> TouchHandle<D>
    where
        F: Fn() -> Box<dyn TouchGrab<D>> + Send + 'static,
    {
        TouchHandle {
            inner: Arc::new(Mutex::new(TouchInternal::new(default_grab))),
            seat,
            span: info_span!("input_touch"),
        }
    }

    pub(crate) fn new_instance(&self, touch: Resource<WlTouch>) {
        self.inner.lock().unwrap().known_instances.push(touch);
    }

    pub(crate) fn remove_instance(&self, touch: &Resource<WlTouch>) {
        self.inner.lock().unwrap().known_instances.retain(|t| t != touch);
    }

    /// Change the current grab on this touch to the provided grab
    ///
    /// Overwrites any current grab.
    #[instrument(level = "debug", parent = &self.span, skip(self, data, grab))]
    pub fn set_grab<G: TouchGrab<D> + 'static>(&self, data: &mut D, grab: G, serial: Serial) {
        self.inner.lock().unwrap().set_grab(data, serial, grab);
    }

    /// Remove any current grab on this touch, resetting it to the default behavior
    #[instrument(level = "debug", parent = &self.span, skip(self, data))]
    pub fn unset_grab(&self, data: &mut D) {
        self.inner.lock().unwrap().unset_grab(data);
    }

    /// Check if this touch is currently grabbed with this serial
    pub fn has_grab(&self, serial: Serial) -> bool {
        let guard = self.inner.lock().unwrap();
        match guard.grab {
            GrabStatus::Active(s, _) => s == serial,
            _ => false,
        }
    }

    /// Check if this touch is currently being grabbed
    pub fn is_grabbed(&self) -> bool {
        let guard = self.inner.lock().unwrap();
        !matches!(guard.grab, GrabStatus::None)
    }

    /// Returns the start data for the grab, if any.
    pub fn grab_start_data(&self) -> Option<TouchGrabStartData> {
        let guard = self.inner.lock().unwrap();
        match &guard.grab {
            GrabStatus::Active(_, g) => Some(g.start_data().clone()),
            _ => None,
        }
    }

    /// Notify clients about new touch points.
    ///
    /// The focus is the surface under the touch point and the location of its origin in the
    /// global compositor space. Returns the serial of the event.
    #[instrument(level = "trace", parent = &self.span, skip(self, data, focus))]
    pub fn down(
        &self,
        data: &mut D,
        focus: Option<(Resource<WlSurface>, Point<i32, Logical>)>,
        event: &DownEvent,
    ) -> Serial {
        let Some(seat) = self.seat.upgrade() else {
            return Serial::from(0);
        };
        let mut inner = self.inner.lock().unwrap();
        let serial = seat.serial_for(focus.as_ref().map(|(surface, _)| surface));
        inner.with_grab(data, &seat, |data, handle, grab| {
            grab.down(data, handle, focus, event, serial);
        });
        serial
    }

    /// Notify clients about touch point removal.
    ///
    /// Returns the serial of the event.
    #[instrument(level = "trace", parent = &self.span, skip(self, data))]
    pub fn up(&self, data: &mut D, event: &UpEvent) -> Serial {
        let Some(seat) = self.seat.upgrade() else {
            return Serial::from(0);
        };
        let mut inner = self.inner.lock().unwrap();
        let focus = inner
            .focus
            .get(&event.slot)
            .and_then(|state| state.focus.as_ref())
            .map(|(surface, _)| surface.clone());
        let serial = seat.serial_for(focus.as_ref());
        inner.with_grab(data, &seat, |data, handle, grab| {
            grab.up(data, handle, event, serial);
        });
        serial
    }

    /// Notify clients about touch motion.
    #[instrument(level = "trace", parent = &self.span, skip(self, data, focus))]
    pub fn motion(
        &self,
        data: &mut D,
        focus: Option<(Resource<WlSurface>, Point<i32, Logical>)>,
        event: &MotionEvent,
    ) {
        let Some(seat) = self.seat.upgrade() else {
            return;
        };
        self.inner
            .lock()
            .unwrap()
            .with_grab(data, &seat, |data, handle, grab| {
                grab.motion(data, handle, focus, event);
            });
    }

    /// Notify clients about the end of a set of events that belong together.
    pub fn frame(&self, data: &mut D) {
        let Some(seat) = self.seat.upgrade() else {
            return;
        };
        self.inner
            .lock()
            .unwrap()
            .with_grab(data, &seat, |data, handle, grab| {
                grab.frame(data, handle);
            });
    }

    /// Notify clients about the cancellation of the touch session.
    ///
    /// This will remove all current focus targets, and no further events will be sent
    /// until a new touch point appears.
    pub fn cancel(&self, data: &mut D) {
        let Some(seat) = self.seat.upgrade() else {
            return;
        };
        self.inner
            .lock()
            .unwrap()
            .with_grab(data, &seat, |data, handle, grab| {
                grab.cancel(data, handle);
            });
    }
}

/// This inner handle is accessed from inside a touch grab logic, and directly
/// sends event to the client
pub struct TouchInnerHandle<'a, D: SeatHandler> {
    inner: &'a mut TouchInternal<D>,
    seat: &'a Seat<D>,
}

impl<D: SeatHandler> fmt::Debug for TouchInnerHandle<'_, D> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TouchInnerHandle")
            .field("inner", &self.inner)
            .field("seat", &self.seat.arc.name)
            .finish()
    }
}

impl<D: SeatHandler + 'static> TouchInnerHandle<'_, D> {
    /// Change the current grab on this touch to the provided grab
    ///
    /// Requires a reference to the current grab, which is notified it has been replaced.
    ///
    /// Overwrites any current grab.
    pub fn set_grab<G: TouchGrab<D> + 'static>(
        &mut self,
        handler: &mut dyn TouchGrab<D>,
        data: &mut D,
        serial: Serial,
        grab: G,
    ) {
        handler.unset(data);
        self.inner.set_grab(data, serial, grab);
    }

    /// Remove any current grab on this touch, resetting it to the default behavior
    ///
    /// Requires a reference to the current grab, which is notified it has been unset.
    pub fn unset_grab(&mut self, handler: &mut dyn TouchGrab<D>, data: &mut D) {
        handler.unset(data);
        self.inner.unset_grab(data);
    }

    /// The seat of this touch device
    pub fn seat(&self) -> &Seat<D> {
        self.seat
    }

    /// Notify clients about new touch points.
    pub fn down(
        &mut self,
        _data: &mut D,
        focus: Option<(Resource<WlSurface>, Point<i32, Logical>)>,
        event: &DownEvent,
        serial: Serial,
    ) {
        self.inner.down(focus, event, serial)
    }

    /// Notify clients about touch point removal.
    pub fn up(&mut self, _data: &mut D, event: &UpEvent, serial: Serial) {
        self.inner.up(event, serial)
    }

    /// Notify clients about touch motion.
    pub fn motion(&mut self, _data: &mut D, event: &MotionEvent) {
        self.inner.motion(event)
    }

    /// Notify clients about the end of a set of events that belong together.
    pub fn frame(&mut self, _data: &mut D) {
        self.inner.frame()
    }

    /// Notify clients about the cancellation of the touch session.
    pub fn cancel(&mut self, _data: &mut D) {
        self.inner.cancel()
    }
}

impl<D: SeatHandler + 'static> TouchInternal<D> {
    fn new<F>(default_grab: F) -> Self
    where
        F: Fn() -> Box<dyn TouchGrab<D>> + Send + 'static,
    {
        Self {
            known_instances: Vec::new(),
            focus: HashMap::new(),
            default_grab: Box::new(default_grab),
            grab: GrabStatus::None,
        }
    }

    fn set_grab<G: TouchGrab<D> + 'static>(&mut self, data: &mut D, serial: Serial, grab: G) {
        if let GrabStatus::Active(_, handler) = &mut self.grab {
            handler.unset(data);
        }
        self.grab = GrabStatus::Active(serial, Box::new(grab));
    }

    fn unset_grab(&mut self, data: &mut D) {
        if let GrabStatus::Active(_, handler) = &mut self.grab {
            handler.unset(data);
        }
        self.grab = GrabStatus::None;
    }

    fn with_instances(&mut self, surface: &Resource<WlSurface>, mut f: impl FnMut(&Resource<WlTouch>)) {
        self.known_instances.retain(|t| t.is_alive());
        for touch in self
            .known_instances
            .iter()
            .filter(|t| t.client_id() == surface.client_id())
        {
            f(touch);
        }
    }

    fn down(
        &mut self,
        focus: Option<(Resource<WlSurface>, Point<i32, Logical>)>,
        event: &DownEvent,
        serial: Serial,
    ) {
        let frame_pending = self.focus.remove(&event.slot).and_then(|state| state.frame_pending);
        if let Some((surface, loc)) = focus.as_ref() {
            let local = event.location - loc.to_f64();
            self.with_instances(surface, |touch| {
                touch.send_event(wl_touch::Event::Down {
                    serial: serial.into(),
                    time: event.time,
                    surface: surface.clone(),
                    id: event.slot.into(),
                    x: local.x,
                    y: local.y,
                })
            });
        }
        self.focus.insert(event.slot, TouchSlotState { focus, frame_pending });
    }

    fn up(&mut self, event: &UpEvent, serial: Serial) {
        let Some(state) = self.focus.get_mut(&event.slot) else {
            return;
        };
        let Some((surface, _)) = state.focus.take() else {
            return;
        };
        // keep the surface around to send it a frame event
        state.frame_pending = Some(surface.clone());
        self.with_instances(&surface, |touch| {
            touch.send_event(wl_touch::Event::Up {
                serial: serial.into(),
                time: event.time,
                id: event.slot.into(),
            })
        });
    }

    fn motion(&mut self, event: &MotionEvent) {
        let Some((surface, loc)) = self
            .focus
            .get(&event.slot)
            .and_then(|state| state.focus.clone())
        else {
            return;
        };
        let local = event.location - loc.to_f64();
        self.with_instances(&surface, |touch| {
            touch.send_event(wl_touch::Event::Motion {
                time: event.time,
                id: event.slot.into(),
                x: local.x,
                y: local.y,
            })
        });
    }

    fn frame(&mut self) {
        let mut surfaces: Vec<Resource<WlSurface>> = Vec::new();
        self.focus.retain(|_, state| {
            if let Some(surface) = state.frame_pending.take() {
                surfaces.push(surface);
            }
            if let Some((surface, _)) = state.focus.as_ref() {
                surfaces.push(surface.clone());
            }
            state.focus.is_some()
        });
        // one frame per client
        let mut seen = Vec::new();
        surfaces.retain(|surface| {
            let client = surface.client_id();
            let first = !seen.contains(&client);
            seen.push(client);
            first
        });
        for surface in surfaces {
            trace!(?surface, "touch frame");
            self.with_instances(&surface, |touch| touch.send_event(wl_touch::Event::Frame));
        }
    }

    fn cancel(&mut self) {
        let mut surfaces: Vec<Resource<WlSurface>> = self
            .focus
            .drain()
            .filter_map(|(_, state)| state.focus.map(|(surface, _)| surface))
            .collect();
        let mut seen = Vec::new();
        surfaces.retain(|surface| {
            let client = surface.client_id();
            let first = !seen.contains(&client);
            seen.push(client);
            first
        });
        for surface in surfaces {
            self.with_instances(&surface, |touch| touch.send_event(wl_touch::Event::Cancel));
        }
    }

    fn with_grab<F>(&mut self, data: &mut D, seat: &Seat<D>, f: F)
    where
        F: FnOnce(&mut D, &mut TouchInnerHandle<'_, D>, &mut dyn TouchGrab<D>),
    {
        let mut grab = std::mem::replace(&mut self.grab, GrabStatus::Borrowed);
        match grab {
            GrabStatus::Borrowed => panic!("Accessed a touch grab from within a touch grab access."),
            GrabStatus::Active(_, ref mut handler) => {
                // If this grab is associated with a surface that is no longer alive, discard it
                if let Some((ref focus, _)) = handler.start_data().focus {
                    if !focus.is_alive() {
                        handler.unset(data);
                        self.grab = GrabStatus::None;
                        let mut default_grab = (self.default_grab)();
                        f(
                            data,
                            &mut TouchInnerHandle { inner: self, seat },
                            &mut *default_grab,
                        );
                        return;
                    }
                }
                f(data, &mut TouchInnerHandle { inner: self, seat }, &mut **handler);
            }
            GrabStatus::None => {
                let mut default_grab = (self.default_grab)();
                f(
                    data,
                    &mut TouchInnerHandle { inner: self, seat },
                    &mut *default_grab,
                );
            }
        }

        if let GrabStatus::Borrowed = self.grab {
            // the grab has not been ended nor replaced, put it back in place
            self.grab = grab;
        }
    }
}
