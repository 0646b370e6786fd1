use std::{
    fmt,
    os::unix::io::OwnedFd,
    sync::{Arc, Mutex},
};

use tracing::{debug, trace};

use crate::{
    input::{
        pointer::{
            AxisFrame, ButtonEvent, GrabStartData as PointerGrabStartData, MotionEvent, PointerGrab,
            PointerInnerHandle,
        },
        touch::{self, TouchGrab, TouchGrabStartData, TouchInnerHandle},
        Seat, SeatHandler, WeakSeat,
    },
    protocol::{
        wl_data_device::{self, WlDataDevice},
        wl_data_device_manager::DndAction,
        wl_data_offer::{self, WlDataOffer},
        wl_data_source::{self, WlDataSource},
        wl_surface::WlSurface,
    },
    server::{Client, ClientId, DataInit, Dispatch, DisplayHandle, Resource},
    utils::{Logical, Point, Serial},
};

use super::{
    seat_data, source::DataSourceUserData, with_source_metadata, ClientDndGrabHandler, DataDeviceHandler,
    DataDeviceState, ServerDndGrabHandler, SourceMetadata,
};

/// Where the data of a drag comes from
pub(crate) enum DragSource {
    /// A client drag, `source` is `None` for drags restricted to the origin client
    Client {
        source: Option<Resource<WlDataSource>>,
        origin: Resource<WlSurface>,
    },
    /// A drag started by the compositor
    Compositor(SourceMetadata),
}

/// The drag'n'drop grab
///
/// `S` is the start data of the implicit grab the drag replaced, it decides whether the drag
/// is driven by the pointer or by a touch point.
pub(crate) struct DnDGrab<D: SeatHandler, S> {
    dh: DisplayHandle,
    start_data: S,
    source: DragSource,
    current_focus: Option<Resource<WlSurface>>,
    // one offer per data device of the focused client
    offers: Vec<(Resource<WlDataOffer>, Arc<Mutex<OfferData>>)>,
    seat: Seat<D>,
}

impl<D: SeatHandler, S: fmt::Debug> fmt::Debug for DnDGrab<D, S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DnDGrab")
            .field("start_data", &self.start_data)
            .field("current_focus", &self.current_focus)
            .field("offers", &self.offers.iter().map(|(offer, _)| offer).collect::<Vec<_>>())
            .finish_non_exhaustive()
    }
}

impl<D, S> DnDGrab<D, S>
where
    D: DataDeviceHandler,
    D: Dispatch<WlDataOffer, DndOfferData<D>>,
    D: 'static,
{
    pub(crate) fn new(dh: &DisplayHandle, start_data: S, source: DragSource, seat: Seat<D>) -> Self {
        Self {
            dh: dh.clone(),
            start_data,
            source,
            current_focus: None,
            offers: Vec::with_capacity(1),
            seat,
        }
    }

    // Drags without a data source are only visible to the client that started them
    fn reaches(&self, surface: &Resource<WlSurface>) -> bool {
        match self.source {
            DragSource::Client {
                source: None,
                ref origin,
            } => origin.client_id() == surface.client_id(),
            _ => true,
        }
    }

    fn source_lost(&self) -> bool {
        matches!(
            self.source,
            DragSource::Client { source: Some(ref source), .. } if !source.is_alive()
        )
    }

    fn devices_of(&self, surface: &Resource<WlSurface>) -> Vec<Resource<WlDataDevice>> {
        seat_data(&self.seat)
            .lock()
            .unwrap()
            .known_devices()
            .filter(|device| device.client_id() == surface.client_id())
            .cloned()
            .collect()
    }

    fn leave_current(&mut self) {
        if let Some(surface) = self.current_focus.take() {
            // only leave if there is a data source or we are on the original client
            if self.reaches(&surface) {
                for device in self.devices_of(&surface) {
                    device.send_event(wl_data_device::Event::Leave);
                }
            }
            // disable the offers
            for (_, offer_data) in self.offers.drain(..) {
                offer_data.lock().unwrap().active = false;
            }
        }
    }

    fn offer_source(&self) -> Option<(OfferSource<D>, SourceMetadata)> {
        match self.source {
            DragSource::Client { source: None, .. } => None,
            DragSource::Client {
                source: Some(ref source),
                ..
            } => {
                let metadata = with_source_metadata(source, Clone::clone).ok()?;
                Some((OfferSource::Client(source.clone()), metadata))
            }
            DragSource::Compositor(ref metadata) => Some((
                OfferSource::Compositor {
                    metadata: metadata.clone(),
                    seat: self.seat.downgrade(),
                },
                metadata.clone(),
            )),
        }
    }

    fn enter(&mut self, client: &Client, surface: &Resource<WlSurface>, x: f64, y: f64) {
        let serial = self.seat.serial_for(Some(surface));
        let devices = self.devices_of(surface);

        let Some((offer_source, metadata)) = self.offer_source() else {
            // only send if we are on a surface of the same client
            if self.reaches(surface) {
                for device in devices {
                    device.send_event(wl_data_device::Event::Enter {
                        serial: serial.into(),
                        surface: surface.clone(),
                        x,
                        y,
                        id: None,
                    });
                }
            }
            return;
        };

        for device in devices {
            // create a data offer, one per device, each negotiating on its own
            let offer_data = Arc::new(Mutex::new(OfferData::new()));
            let data = DndOfferData {
                offer_data: offer_data.clone(),
                source: offer_source.clone(),
            };
            let offer = match client.create_resource::<WlDataOffer, DndOfferData<D>, D>(&self.dh, device.version(), data)
            {
                Ok(offer) => offer,
                Err(_) => {
                    debug!(device = ?device, "Could not create a drag'n'drop offer");
                    continue;
                }
            };
            if let OfferSource::Client(ref source) = offer_source {
                if let Some(source_data) = source.data::<DataSourceUserData>() {
                    source_data.track_dnd_offer(&offer);
                }
            }

            // advertize the offer to the client
            device.send_event(wl_data_device::Event::DataOffer { id: offer.clone() });
            for mime_type in metadata.mime_types.iter().cloned() {
                offer.send_event(wl_data_offer::Event::Offer { mime_type });
            }
            if offer.version() >= 3 {
                offer.send_event(wl_data_offer::Event::SourceActions {
                    source_actions: metadata.dnd_action,
                });
            }
            device.send_event(wl_data_device::Event::Enter {
                serial: serial.into(),
                surface: surface.clone(),
                x,
                y,
                id: Some(offer.clone()),
            });
            self.offers.push((offer, offer_data));
        }
    }

    fn update_focus(
        &mut self,
        focus: Option<(Resource<WlSurface>, Point<i32, Logical>)>,
        location: Point<f64, Logical>,
        time: u32,
    ) {
        if focus.as_ref().map(|(surface, _)| surface) != self.current_focus.as_ref() {
            // focus changed, we need to make a leave if appropriate
            self.leave_current();
        }

        let Some((surface, surface_location)) = focus else {
            return;
        };
        // early return if the surface is no longer valid
        let Some(client) = surface.client() else {
            return;
        };
        let local = location - surface_location.to_f64();
        if self.current_focus.is_none() {
            // We entered a new surface, send the data offer if appropriate
            trace!(surface = ?surface, "Drag entered a new surface");
            self.enter(&client, &surface, local.x, local.y);
            self.current_focus = Some(surface);
        } else if self.reaches(&surface) {
            // make a move
            for device in self.devices_of(&surface) {
                device.send_event(wl_data_device::Event::Motion {
                    time,
                    x: local.x,
                    y: local.y,
                });
            }
        }
    }

    // The user released the drag
    fn drop_on_target(&mut self, data: &mut D) {
        // the drop goes to the first offer accepted with an agreed action
        let dropped_offer = self.offers.iter().position(|(_, data)| {
            let data = data.lock().unwrap();
            data.accepted && !data.chosen_action.is_empty()
        });
        let validated = dropped_offer.is_some();
        let no_source = matches!(self.source, DragSource::Client { source: None, .. });

        if let Some(surface) = self.current_focus.clone() {
            if self.reaches(&surface) {
                for device in self.devices_of(&surface) {
                    if validated || no_source {
                        device.send_event(wl_data_device::Event::Drop);
                    } else {
                        device.send_event(wl_data_device::Event::Leave);
                    }
                }
            }
        }
        for (index, (_, offer_data)) in self.offers.iter().enumerate() {
            let mut data = offer_data.lock().unwrap();
            if Some(index) == dropped_offer {
                data.dropped = true;
            } else {
                data.active = false;
            }
        }
        debug!(target = ?self.current_focus, validated, "Drag'n'drop dropped");

        match self.source {
            DragSource::Client { ref source, .. } => {
                if let Some(source) = source {
                    if source.version() >= 3 {
                        source.send_event(wl_data_source::Event::DndDropPerformed);
                    }
                    if !validated {
                        source.send_event(wl_data_source::Event::Cancelled);
                    }
                }
            }
            DragSource::Compositor(_) => {
                if validated {
                    ServerDndGrabHandler::dropped(data, self.seat.clone());
                } else {
                    ServerDndGrabHandler::cancelled(data, self.seat.clone());
                }
            }
        }
        ClientDndGrabHandler::dropped(data, self.current_focus.clone(), validated, self.seat.clone());
    }

    // The drag was aborted, either by the compositor or because its source went away
    fn abort(&mut self, data: &mut D) {
        debug!("Drag'n'drop cancelled");
        self.leave_current();
        match self.source {
            DragSource::Client {
                source: Some(ref source),
                ..
            } => source.send_event(wl_data_source::Event::Cancelled),
            DragSource::Client { source: None, .. } => {}
            DragSource::Compositor(_) => ServerDndGrabHandler::cancelled(data, self.seat.clone()),
        }
        ClientDndGrabHandler::dropped(data, None, false, self.seat.clone());
    }
}

impl<D> PointerGrab<D> for DnDGrab<D, PointerGrabStartData>
where
    D: DataDeviceHandler,
    D: Dispatch<WlDataOffer, DndOfferData<D>>,
    D: 'static,
{
    fn motion(
        &mut self,
        data: &mut D,
        handle: &mut PointerInnerHandle<'_, D>,
        focus: Option<(Resource<WlSurface>, Point<i32, Logical>)>,
        event: &MotionEvent,
    ) {
        // While the grab is active, no client has pointer focus
        handle.motion(data, None, event);

        if self.source_lost() {
            self.abort(data);
            handle.unset_grab(data, event.time, true);
            return;
        }
        self.update_focus(focus, event.location, event.time);
    }

    fn button(&mut self, data: &mut D, handle: &mut PointerInnerHandle<'_, D>, event: &ButtonEvent, _serial: Serial) {
        if handle.current_pressed().is_empty() {
            // the user dropped, proceed to the drop
            if self.source_lost() {
                self.abort(data);
            } else {
                self.drop_on_target(data);
            }
            // no more buttons are pressed, release the grab
            handle.unset_grab(data, event.time, true);
        }
    }

    fn axis(&mut self, data: &mut D, handle: &mut PointerInnerHandle<'_, D>, details: AxisFrame) {
        // we just forward the axis events as is
        handle.axis(data, details);
    }

    fn start_data(&self) -> &PointerGrabStartData {
        &self.start_data
    }
}

impl<D> TouchGrab<D> for DnDGrab<D, TouchGrabStartData>
where
    D: DataDeviceHandler,
    D: Dispatch<WlDataOffer, DndOfferData<D>>,
    D: 'static,
{
    fn down(
        &mut self,
        _data: &mut D,
        _handle: &mut TouchInnerHandle<'_, D>,
        _focus: Option<(Resource<WlSurface>, Point<i32, Logical>)>,
        _event: &touch::DownEvent,
        _serial: Serial,
    ) {
        // Ignore other touch points during the drag
    }

    fn up(&mut self, data: &mut D, handle: &mut TouchInnerHandle<'_, D>, event: &touch::UpEvent, serial: Serial) {
        handle.up(data, event, serial);
        if event.slot != self.start_data.slot {
            return;
        }
        if self.source_lost() {
            self.abort(data);
        } else {
            self.drop_on_target(data);
        }
        handle.unset_grab(self, data);
    }

    fn motion(
        &mut self,
        data: &mut D,
        handle: &mut TouchInnerHandle<'_, D>,
        focus: Option<(Resource<WlSurface>, Point<i32, Logical>)>,
        event: &touch::MotionEvent,
    ) {
        if event.slot != self.start_data.slot {
            return;
        }
        if self.source_lost() {
            self.abort(data);
            handle.unset_grab(self, data);
            return;
        }
        self.update_focus(focus, event.location, event.time);
    }

    fn frame(&mut self, _data: &mut D, _handle: &mut TouchInnerHandle<'_, D>) {}

    fn cancel(&mut self, data: &mut D, handle: &mut TouchInnerHandle<'_, D>) {
        self.abort(data);
        handle.cancel(data);
        handle.unset_grab(self, data);
    }

    fn start_data(&self) -> &TouchGrabStartData {
        &self.start_data
    }

    fn unset(&mut self, _data: &mut D) {}
}

#[derive(Debug, Default)]
struct OfferData {
    active: bool,
    dropped: bool,
    accepted: bool,
    finished: bool,
    // as last set by the target
    target_actions: DndAction,
    preferred_action: DndAction,
    chosen_action: DndAction,
}

impl OfferData {
    fn new() -> Self {
        OfferData {
            active: true,
            ..Default::default()
        }
    }
}

enum OfferSource<D: SeatHandler> {
    Client(Resource<WlDataSource>),
    Compositor { metadata: SourceMetadata, seat: WeakSeat<D> },
}

impl<D: SeatHandler> Clone for OfferSource<D> {
    fn clone(&self) -> Self {
        match self {
            OfferSource::Client(source) => OfferSource::Client(source.clone()),
            OfferSource::Compositor { metadata, seat } => OfferSource::Compositor {
                metadata: metadata.clone(),
                seat: seat.clone(),
            },
        }
    }
}

impl<D: SeatHandler> OfferSource<D> {
    fn metadata(&self) -> Option<SourceMetadata> {
        match self {
            OfferSource::Client(source) => with_source_metadata(source, Clone::clone).ok(),
            OfferSource::Compositor { metadata, .. } => Some(metadata.clone()),
        }
    }

    fn is_alive(&self) -> bool {
        match self {
            OfferSource::Client(source) => source.is_alive(),
            OfferSource::Compositor { seat, .. } => seat.upgrade().is_some(),
        }
    }
}

/// User data of the offers of a drag'n'drop
#[doc(hidden)]
pub struct DndOfferData<D: SeatHandler> {
    offer_data: Arc<Mutex<OfferData>>,
    source: OfferSource<D>,
}

impl<D: SeatHandler> fmt::Debug for DndOfferData<D> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DndOfferData")
            .field("offer_data", &self.offer_data)
            .finish_non_exhaustive()
    }
}

impl<D> Dispatch<WlDataOffer, DndOfferData<D>, D> for DataDeviceState
where
    D: Dispatch<WlDataOffer, DndOfferData<D>>,
    D: DataDeviceHandler,
    D: 'static,
{
    fn request(
        handler: &mut D,
        _client: &Client,
        offer: &Resource<WlDataOffer>,
        request: wl_data_offer::Request,
        data: &DndOfferData<D>,
        _dhandle: &DisplayHandle,
        _data_init: &mut DataInit<'_, D>,
    ) {
        handle_dnd(handler, offer, request, data);
    }

    fn destroyed(handler: &mut D, _client: ClientId, _offer: &Resource<WlDataOffer>, data: &DndOfferData<D>) {
        // a target dropping an offer it was dropped on without finishing it cancels the transfer
        let abandoned = {
            let mut offer_data = data.offer_data.lock().unwrap();
            let abandoned = offer_data.active && offer_data.dropped && !offer_data.finished;
            if abandoned {
                offer_data.active = false;
            }
            abandoned
        };
        if !abandoned {
            return;
        }
        match data.source {
            OfferSource::Client(ref source) => source.send_event(wl_data_source::Event::Cancelled),
            OfferSource::Compositor { ref seat, .. } => {
                if let Some(seat) = seat.upgrade() {
                    ServerDndGrabHandler::cancelled(handler, seat);
                }
            }
        }
    }
}

// What remains to be done once the offer lock is released
enum Followup<D: SeatHandler> {
    Nothing,
    Send(String, OwnedFd, Seat<D>),
    Finished(Seat<D>),
}

fn handle_dnd<D>(handler: &mut D, offer: &Resource<WlDataOffer>, request: wl_data_offer::Request, data: &DndOfferData<D>)
where
    D: DataDeviceHandler,
    D: 'static,
{
    let source = &data.source;
    let followup = match request {
        wl_data_offer::Request::Accept { mime_type, .. } => {
            let accepted = match mime_type {
                Some(ref mime_type) => source
                    .metadata()
                    .map(|meta| meta.mime_types.contains(mime_type))
                    .unwrap_or(false),
                None => false,
            };
            let mut offer_data = data.offer_data.lock().unwrap();
            offer_data.accepted = accepted;
            if let (OfferSource::Client(source), true) = (source, offer_data.active) {
                source.send_event(wl_data_source::Event::Target { mime_type });
            }
            Followup::Nothing
        }
        wl_data_offer::Request::Receive { mime_type, fd } => {
            // check if the source and associated mime type is still valid
            let valid = source
                .metadata()
                .map(|meta| meta.mime_types.contains(&mime_type))
                .unwrap_or(false)
                && source.is_alive()
                && data.offer_data.lock().unwrap().active;
            if !valid {
                debug!("Denying a wl_data_offer.receive with invalid source.");
                return;
            }
            match source {
                OfferSource::Client(source) => {
                    source.send_event(wl_data_source::Event::Send { mime_type, fd });
                    Followup::Nothing
                }
                OfferSource::Compositor { seat, .. } => match seat.upgrade() {
                    Some(seat) => Followup::Send(mime_type, fd, seat),
                    None => Followup::Nothing,
                },
            }
        }
        wl_data_offer::Request::Destroy => Followup::Nothing,
        wl_data_offer::Request::Finish => {
            let mut offer_data = data.offer_data.lock().unwrap();
            let refusal = if !offer_data.active {
                Some("Cannot finish a data offer that is no longer active.")
            } else if !offer_data.accepted {
                Some("Cannot finish a data offer that has not been accepted.")
            } else if !offer_data.dropped {
                Some("Cannot finish a data offer that has not been dropped.")
            } else if offer_data.chosen_action.is_empty() {
                Some("Cannot finish a data offer with no valid action.")
            } else {
                None
            };
            if let Some(message) = refusal {
                offer.post_error(wl_data_offer::Error::InvalidFinish, message);
                return;
            }
            offer_data.active = false;
            offer_data.finished = true;
            match source {
                OfferSource::Client(source) => {
                    source.send_event(wl_data_source::Event::DndFinished);
                    Followup::Nothing
                }
                OfferSource::Compositor { seat, .. } => match seat.upgrade() {
                    Some(seat) => Followup::Finished(seat),
                    None => Followup::Nothing,
                },
            }
        }
        wl_data_offer::Request::SetActions {
            dnd_actions,
            preferred_action,
        } => {
            set_actions(handler, offer, data, dnd_actions, preferred_action);
            Followup::Nothing
        }
    };

    match followup {
        Followup::Nothing => {}
        Followup::Send(mime_type, fd, seat) => ServerDndGrabHandler::send(handler, mime_type, fd, seat),
        Followup::Finished(seat) => ServerDndGrabHandler::finished(handler, seat),
    }
}

fn set_actions<D>(
    handler: &mut D,
    offer: &Resource<WlDataOffer>,
    data: &DndOfferData<D>,
    dnd_actions: u32,
    preferred_action: u32,
) where
    D: DataDeviceHandler,
    D: 'static,
{
    let Some(dnd_actions) = DndAction::from_bits(dnd_actions) else {
        offer.post_error(
            wl_data_offer::Error::InvalidActionMask,
            format!("Invalid action mask {:#x}.", dnd_actions),
        );
        return;
    };
    // preferred_action must only contain one bitflag at the same time
    let Some(preferred_action) = DndAction::from_bits(preferred_action).filter(is_single_action) else {
        offer.post_error(wl_data_offer::Error::InvalidAction, "Invalid preferred action.");
        return;
    };
    {
        let mut offer_data = data.offer_data.lock().unwrap();
        if !offer_data.active {
            return;
        }
        offer_data.target_actions = dnd_actions;
        offer_data.preferred_action = preferred_action;
    }
    negotiate_action(handler, offer, data);
}

/// Choose the action of a drag'n'drop offer from the current actions of both sides
///
/// Runs whenever the source or the target changes its actions. Both sides are notified when
/// the chosen action changes.
pub(crate) fn negotiate_action<D>(handler: &mut D, offer: &Resource<WlDataOffer>, data: &DndOfferData<D>)
where
    D: DataDeviceHandler,
    D: 'static,
{
    let (target_actions, preferred_action) = {
        let offer_data = data.offer_data.lock().unwrap();
        if !offer_data.active {
            return;
        }
        (offer_data.target_actions, offer_data.preferred_action)
    };
    let source_actions = data
        .source
        .metadata()
        .map(|meta| meta.dnd_action)
        .unwrap_or_default();
    let possible_actions = source_actions & target_actions;
    let chosen_action = handler.action_choice(possible_actions, preferred_action);
    // check that the user provided callback respects that one precise action should be chosen
    debug_assert!(
        is_single_action(&chosen_action),
        "Only one precise action should be chosen"
    );

    {
        let mut offer_data = data.offer_data.lock().unwrap();
        if chosen_action == offer_data.chosen_action {
            return;
        }
        offer_data.chosen_action = chosen_action;
    }
    trace!(action = ?chosen_action, "Drag'n'drop action negotiated");
    offer.send_event(wl_data_offer::Event::Action {
        dnd_action: chosen_action,
    });
    match data.source {
        OfferSource::Client(ref source) => {
            source.send_event(wl_data_source::Event::Action {
                dnd_action: chosen_action,
            });
        }
        OfferSource::Compositor { ref seat, .. } => {
            if let Some(seat) = seat.upgrade() {
                ServerDndGrabHandler::action(handler, chosen_action, seat);
            }
        }
    }
}

fn is_single_action(action: &DndAction) -> bool {
    [DndAction::empty(), DndAction::Move, DndAction::Copy, DndAction::Ask].contains(action)
}
