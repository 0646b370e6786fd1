use tracing::debug;

use crate::{
    input::{pointer::GrabStartData, touch::TouchGrabStartData, Focus, Seat, SeatHandler},
    protocol::{
        wl_data_device::{self, WlDataDevice},
        wl_data_offer::WlDataOffer,
        wl_seat::WlSeat,
        wl_surface::WlSurface,
    },
    server::{Client, ClientId, DataInit, Dispatch, DisplayHandle, Resource},
    utils::Serial,
    wayland::compositor,
};

use super::{
    dnd_grab::{DnDGrab, DragSource},
    seat_data, DataDeviceHandler, DataDeviceState, DndOfferData, Selection, SelectionOffer,
};

/// WlSurface role of drag and drop icon
pub const DND_ICON_ROLE: &str = "dnd_icon";

#[doc(hidden)]
#[derive(Debug)]
pub struct DataDeviceUserData {
    pub(crate) wl_seat: Resource<WlSeat>,
}

// The implicit grab a drag is started from
enum ImplicitGrab {
    Pointer(GrabStartData),
    Touch(TouchGrabStartData),
}

// A drag may only be started by the client holding an implicit grab with this serial on the
// origin surface.
fn implicit_grab<D: SeatHandler + 'static>(
    seat: &Seat<D>,
    serial: Serial,
    origin: &Resource<WlSurface>,
) -> Option<ImplicitGrab> {
    let is_origin = |focus: &Option<(Resource<WlSurface>, _)>| {
        focus.as_ref().map(|(surface, _)| surface == origin).unwrap_or(false)
    };

    if let Some(pointer) = seat.get_pointer() {
        if pointer.has_grab(serial) {
            if let Some(start_data) = pointer.grab_start_data().filter(|data| is_origin(&data.focus)) {
                return Some(ImplicitGrab::Pointer(start_data));
            }
        }
    }
    if let Some(touch) = seat.get_touch() {
        if touch.has_grab(serial) {
            if let Some(start_data) = touch.grab_start_data().filter(|data| is_origin(&data.focus)) {
                return Some(ImplicitGrab::Touch(start_data));
            }
        }
    }
    None
}

impl<D> Dispatch<WlDataDevice, DataDeviceUserData, D> for DataDeviceState
where
    D: Dispatch<WlDataDevice, DataDeviceUserData>,
    D: Dispatch<WlDataOffer, SelectionOffer<D>>,
    D: Dispatch<WlDataOffer, DndOfferData<D>>,
    D: DataDeviceHandler,
    D: 'static,
{
    fn request(
        handler: &mut D,
        client: &Client,
        resource: &Resource<WlDataDevice>,
        request: wl_data_device::Request,
        data: &DataDeviceUserData,
        dh: &DisplayHandle,
        _data_init: &mut DataInit<'_, D>,
    ) {
        let Some(seat) = Seat::<D>::from_resource(&data.wl_seat) else {
            return;
        };

        match request {
            wl_data_device::Request::StartDrag {
                source,
                origin,
                icon,
                serial,
            } => {
                let serial = Serial::from(serial);
                let Some(grab) = implicit_grab(&seat, serial, &origin) else {
                    debug!(serial = ?serial, client = ?client.id(), "denying drag from client without implicit grab");
                    return;
                };

                if let Some(ref icon) = icon {
                    if compositor::give_role(icon, DND_ICON_ROLE).is_err()
                        && compositor::get_role(icon) != Some(DND_ICON_ROLE)
                    {
                        resource.post_error(wl_data_device::Error::Role, "Given surface already has an other role");
                        return;
                    }
                }

                // The StartDrag is in response to an implicit grab, all is good
                handler.started(source.clone(), icon, seat.clone());
                let source = DragSource::Client { source, origin };
                match grab {
                    ImplicitGrab::Pointer(start_data) => {
                        if let Some(pointer) = seat.get_pointer() {
                            pointer.set_grab(
                                handler,
                                DnDGrab::new(dh, start_data, source, seat.clone()),
                                serial,
                                Focus::Clear,
                            );
                        }
                    }
                    ImplicitGrab::Touch(start_data) => {
                        if let Some(touch) = seat.get_touch() {
                            touch.set_grab(handler, DnDGrab::new(dh, start_data, source, seat.clone()), serial);
                        }
                    }
                }
            }
            wl_data_device::Request::SetSelection { source, .. } => {
                let focused = seat
                    .get_keyboard()
                    .and_then(|keyboard| keyboard.current_focus())
                    .map(|focus| focus.client_id() == resource.client_id())
                    .unwrap_or(false);
                if !focused {
                    debug!(client = ?client.id(), "denying setting selection by a non-focused client");
                    return;
                }

                handler.new_selection(source.clone(), seat.clone());
                // The client has kbd focus, it can set the selection
                seat_data(&seat).lock().unwrap().set_selection::<D>(
                    dh,
                    &seat,
                    source.map(Selection::Client).unwrap_or(Selection::Empty),
                );
            }
            wl_data_device::Request::Release => {
                // Our destructors already handle it
            }
        }
    }

    fn destroyed(_state: &mut D, _client: ClientId, resource: &Resource<WlDataDevice>, data: &DataDeviceUserData) {
        if let Some(seat) = Seat::<D>::from_resource(&data.wl_seat) {
            seat_data(&seat).lock().unwrap().remove_device(resource);
        }
    }
}
