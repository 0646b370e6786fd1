use crate::{
    input::SeatHandler,
    protocol::wl_surface::WlSurface,
    server::Resource,
    utils::{Logical, Point, Serial},
};

use super::{DownEvent, MotionEvent, TouchInnerHandle, TouchSlot, UpEvent};

/// A trait to implement a touch grab
///
/// In some context, it is necessary to temporarily change the behavior of the touch handler. This is
/// typically known as a touch grab. A typical example would be, during a drag'n'drop operation,
/// the underlying surfaces will no longer receive classic touch events, but rather special events.
///
/// This trait is the interface to intercept regular touch events and change them as needed, its
/// interface mimics the [`TouchHandle`](super::TouchHandle) interface.
///
/// Any interactions with [`TouchHandle`](super::TouchHandle)
/// should be done using [`TouchInnerHandle`], as handle is borrowed/locked before grab methods are called,
/// so calling methods on [`TouchHandle`](super::TouchHandle) would result in a deadlock.
///
/// If your logic decides that the grab should end, both [`TouchInnerHandle`]
/// and [`TouchHandle`](super::TouchHandle) have a method to change it.
///
/// When your grab ends (either as you requested it or if it was forcefully cancelled by the server),
/// [`TouchGrab::unset`] is invoked, before the struct implementing this trait is dropped.
pub trait TouchGrab<D: SeatHandler>: Send {
    /// A new touch point has appeared on the touchscreen
    ///
    /// This method allows you attach additional behavior to a down event, possibly altering it.
    /// You generally will want to invoke [`TouchInnerHandle::down`] as part of your processing.
    /// If you don't, the rest of the compositor will behave as if the down event never occurred.
    ///
    /// `serial` is the serial allocated for this event.
    fn down(
        &mut self,
        data: &mut D,
        handle: &mut TouchInnerHandle<'_, D>,
        focus: Option<(Resource<WlSurface>, Point<i32, Logical>)>,
        event: &DownEvent,
        serial: Serial,
    );
    /// A touch point disappeared from the touchscreen
    ///
    /// This method allows you attach additional behavior to an up event, possibly altering it.
    /// You generally will want to invoke [`TouchInnerHandle::up`] as part of your processing.
    fn up(&mut self, data: &mut D, handle: &mut TouchInnerHandle<'_, D>, event: &UpEvent, serial: Serial);

    /// A touch point has changed coordinates.
    fn motion(
        &mut self,
        data: &mut D,
        handle: &mut TouchInnerHandle<'_, D>,
        focus: Option<(Resource<WlSurface>, Point<i32, Logical>)>,
        event: &MotionEvent,
    );

    /// Marks the end of a set of events that logically belong together.
    fn frame(&mut self, data: &mut D, handle: &mut TouchInnerHandle<'_, D>);

    /// A touch session has been cancelled.
    ///
    /// Usually called in case the compositor decides the touch stream is a global gesture.
    fn cancel(&mut self, data: &mut D, handle: &mut TouchInnerHandle<'_, D>);

    /// The data about the event that started the grab.
    fn start_data(&self) -> &TouchGrabStartData;

    /// The grab has been unset or replaced with another grab.
    fn unset(&mut self, data: &mut D);
}

/// Data about the event that started the grab.
#[derive(Debug, Clone)]
pub struct TouchGrabStartData {
    /// The focused surface and its location, if any, at the start of the grab.
    ///
    /// The location coordinates are in the global compositor space.
    pub focus: Option<(Resource<WlSurface>, Point<i32, Logical>)>,
    /// The touch point that initiated the grab.
    pub slot: TouchSlot,
    /// The location of the down event that initiated the grab, in the global compositor space.
    pub location: Point<f64, Logical>,
}

/// The default grab, the behavior when no particular grab is in progress
///
/// The first touch point starts a [`TouchDownGrab`].
#[derive(Debug)]
pub struct DefaultGrab;

impl<D: SeatHandler + 'static> TouchGrab<D> for DefaultGrab {
    fn down(
        &mut self,
        data: &mut D,
        handle: &mut TouchInnerHandle<'_, D>,
        focus: Option<(Resource<WlSurface>, Point<i32, Logical>)>,
        event: &DownEvent,
        serial: Serial,
    ) {
        handle.down(data, focus.clone(), event, serial);
        handle.set_grab(
            self,
            data,
            serial,
            TouchDownGrab {
                start_data: TouchGrabStartData {
                    focus,
                    slot: event.slot,
                    location: event.location,
                },
                touch_points: 1,
            },
        );
    }

    fn up(&mut self, data: &mut D, handle: &mut TouchInnerHandle<'_, D>, event: &UpEvent, serial: Serial) {
        handle.up(data, event, serial)
    }

    fn motion(
        &mut self,
        data: &mut D,
        handle: &mut TouchInnerHandle<'_, D>,
        _focus: Option<(Resource<WlSurface>, Point<i32, Logical>)>,
        event: &MotionEvent,
    ) {
        handle.motion(data, event)
    }

    fn frame(&mut self, data: &mut D, handle: &mut TouchInnerHandle<'_, D>) {
        handle.frame(data)
    }

    fn cancel(&mut self, data: &mut D, handle: &mut TouchInnerHandle<'_, D>) {
        handle.cancel(data)
    }

    fn start_data(&self) -> &TouchGrabStartData {
        unreachable!()
    }

    fn unset(&mut self, _data: &mut D) {}
}

/// A touch down grab, basic grab started when an user touches a surface
/// to maintain it focused until the user releases the touch.
///
/// In case the user maintains several simultaneous touch points, release
/// the grab once all are released.
#[derive(Debug)]
pub struct TouchDownGrab {
    /// Start date for this grab
    pub start_data: TouchGrabStartData,
    /// Currently active touch points
    pub touch_points: usize,
}

impl<D: SeatHandler + 'static> TouchGrab<D> for TouchDownGrab {
    fn down(
        &mut self,
        data: &mut D,
        handle: &mut TouchInnerHandle<'_, D>,
        _focus: Option<(Resource<WlSurface>, Point<i32, Logical>)>,
        event: &DownEvent,
        serial: Serial,
    ) {
        handle.down(data, self.start_data.focus.clone(), event, serial);
        self.touch_points += 1;
    }

    fn up(&mut self, data: &mut D, handle: &mut TouchInnerHandle<'_, D>, event: &UpEvent, serial: Serial) {
        handle.up(data, event, serial);
        self.touch_points = self.touch_points.saturating_sub(1);
        if self.touch_points == 0 {
            handle.unset_grab(self, data);
        }
    }

    fn motion(
        &mut self,
        data: &mut D,
        handle: &mut TouchInnerHandle<'_, D>,
        _focus: Option<(Resource<WlSurface>, Point<i32, Logical>)>,
        event: &MotionEvent,
    ) {
        handle.motion(data, event)
    }

    fn frame(&mut self, data: &mut D, handle: &mut TouchInnerHandle<'_, D>) {
        handle.frame(data)
    }

    fn cancel(&mut self, data: &mut D, handle: &mut TouchInnerHandle<'_, D>) {
        handle.cancel(data);
        handle.unset_grab(self, data);
    }

    fn start_data(&self) -> &TouchGrabStartData {
        &self.start_data
    }

    fn unset(&mut self, _data: &mut D) {}
}

