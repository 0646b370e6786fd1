use std::fmt;

use tracing::{debug, trace};

use crate::{
    input::{Seat, SeatHandler, WeakSeat},
    protocol::{
        wl_data_device::{self, WlDataDevice},
        wl_data_offer::{self, WlDataOffer},
        wl_data_source::{self, WlDataSource},
    },
    server::{Client, DataInit, Dispatch, DisplayHandle, Resource},
};

use super::{with_source_metadata, DataDeviceHandler, DataDeviceState, SourceMetadata};

/// The clipboard selection of a seat
#[derive(Debug, Clone)]
pub enum Selection<U> {
    /// No selection
    Empty,
    /// The selection is provided by a client data source
    Client(Resource<WlDataSource>),
    /// The selection is provided by the compositor
    Compositor {
        /// Metadata of the selection
        metadata: SourceMetadata,
        /// User data given to [`set_data_device_selection`](super::set_data_device_selection)
        user_data: U,
    },
}

#[derive(Debug)]
pub(crate) struct SeatData<U> {
    known_devices: Vec<Resource<WlDataDevice>>,
    selection: Selection<U>,
    current_focus: Option<Client>,
}

impl<U: Clone + Send + Sync + 'static> SeatData<U> {
    pub(crate) fn new() -> Self {
        SeatData {
            known_devices: Vec::new(),
            selection: Selection::Empty,
            current_focus: None,
        }
    }

    pub(crate) fn known_devices(&self) -> impl Iterator<Item = &Resource<WlDataDevice>> {
        self.known_devices.iter().filter(|device| device.is_alive())
    }

    pub(crate) fn selection(&self) -> &Selection<U> {
        &self.selection
    }

    pub(crate) fn add_device<D>(&mut self, dh: &DisplayHandle, seat: &Seat<D>, device: Resource<WlDataDevice>)
    where
        D: DataDeviceHandler<SelectionUserData = U>,
        D: Dispatch<WlDataOffer, SelectionOffer<D>>,
        D: 'static,
    {
        self.known_devices.retain(|device| device.is_alive());
        self.known_devices.push(device.clone());
        let focused = self
            .current_focus
            .as_ref()
            .map(|client| client.id() == device.client_id())
            .unwrap_or(false);
        if focused {
            self.offer_selection::<D>(dh, seat, &device);
        }
    }

    pub(crate) fn remove_device(&mut self, device: &Resource<WlDataDevice>) {
        self.known_devices.retain(|d| d != device && d.is_alive());
    }

    pub(crate) fn set_selection<D>(&mut self, dh: &DisplayHandle, seat: &Seat<D>, new_selection: Selection<U>)
    where
        D: DataDeviceHandler<SelectionUserData = U>,
        D: Dispatch<WlDataOffer, SelectionOffer<D>>,
        D: 'static,
    {
        if let Selection::Client(ref old_source) = self.selection {
            let replaced = match new_selection {
                Selection::Client(ref new_source) => new_source != old_source,
                _ => true,
            };
            if replaced {
                trace!(source = ?old_source, "Cancelling the previous selection");
                old_source.send_event(wl_data_source::Event::Cancelled);
            }
        }
        self.selection = new_selection;
        self.send_selection::<D>(dh, seat);
    }

    pub(crate) fn set_focus<D>(&mut self, dh: &DisplayHandle, seat: &Seat<D>, new_focus: Option<Client>)
    where
        D: DataDeviceHandler<SelectionUserData = U>,
        D: Dispatch<WlDataOffer, SelectionOffer<D>>,
        D: 'static,
    {
        if self.current_focus == new_focus {
            return;
        }
        self.current_focus = new_focus;
        self.send_selection::<D>(dh, seat);
    }

    /// Drop the selection if it is backed by this source, returns whether it was
    pub(crate) fn source_destroyed(&mut self, source: &Resource<WlDataSource>) -> bool {
        match self.selection {
            Selection::Client(ref current) if current == source => {}
            _ => return false,
        }
        self.selection = Selection::Empty;
        if let Some(client) = self.current_focus.as_ref() {
            for device in self
                .known_devices
                .iter()
                .filter(|device| device.client_id() == client.id())
            {
                device.send_event(wl_data_device::Event::Selection { id: None });
            }
        }
        true
    }

    fn send_selection<D>(&mut self, dh: &DisplayHandle, seat: &Seat<D>)
    where
        D: DataDeviceHandler<SelectionUserData = U>,
        D: Dispatch<WlDataOffer, SelectionOffer<D>>,
        D: 'static,
    {
        let Some(client) = self.current_focus.clone() else {
            return;
        };
        // first sanitize the selection, reseting it to null if the client holding
        // it dropped it
        if let Selection::Client(ref source) = self.selection {
            if !source.is_alive() {
                self.selection = Selection::Empty;
            }
        }
        self.known_devices.retain(|device| device.is_alive());
        let devices = self
            .known_devices
            .iter()
            .filter(|device| device.client_id() == client.id())
            .cloned()
            .collect::<Vec<_>>();
        for device in devices {
            self.offer_selection::<D>(dh, seat, &device);
        }
    }

    // Create an offer for the current selection and advertise it on this device
    fn offer_selection<D>(&self, dh: &DisplayHandle, seat: &Seat<D>, device: &Resource<WlDataDevice>)
    where
        D: DataDeviceHandler<SelectionUserData = U>,
        D: Dispatch<WlDataOffer, SelectionOffer<D>>,
        D: 'static,
    {
        let (offer_data, mime_types) = match self.selection {
            Selection::Empty => {
                device.send_event(wl_data_device::Event::Selection { id: None });
                return;
            }
            Selection::Client(ref source) => {
                let Ok(mime_types) = with_source_metadata(source, |meta| meta.mime_types.clone()) else {
                    device.send_event(wl_data_device::Event::Selection { id: None });
                    return;
                };
                (SelectionOffer::Client(source.clone()), mime_types)
            }
            Selection::Compositor {
                ref metadata,
                ref user_data,
            } => (
                SelectionOffer::Compositor {
                    metadata: metadata.clone(),
                    seat: seat.downgrade(),
                    user_data: user_data.clone(),
                },
                metadata.mime_types.clone(),
            ),
        };

        let Some(client) = device.client() else {
            return;
        };
        let offer = match client.create_resource::<WlDataOffer, SelectionOffer<D>, D>(dh, device.version(), offer_data)
        {
            Ok(offer) => offer,
            Err(_) => {
                debug!(device = ?device, "Could not create a selection offer");
                return;
            }
        };

        // advertize the offer to the client
        device.send_event(wl_data_device::Event::DataOffer { id: offer.clone() });
        for mime_type in mime_types {
            offer.send_event(wl_data_offer::Event::Offer { mime_type });
        }
        device.send_event(wl_data_device::Event::Selection { id: Some(offer) });
    }
}

/// User data of the offers of a selection
#[doc(hidden)]
pub enum SelectionOffer<D: DataDeviceHandler> {
    Client(Resource<WlDataSource>),
    Compositor {
        metadata: SourceMetadata,
        seat: WeakSeat<D>,
        user_data: D::SelectionUserData,
    },
}

impl<D: DataDeviceHandler> fmt::Debug for SelectionOffer<D> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SelectionOffer::Client(source) => f.debug_tuple("Client").field(source).finish(),
            SelectionOffer::Compositor { metadata, seat, .. } => f
                .debug_struct("Compositor")
                .field("metadata", metadata)
                .field("seat", seat)
                .finish_non_exhaustive(),
        }
    }
}

impl<D> Dispatch<WlDataOffer, SelectionOffer<D>, D> for DataDeviceState
where
    D: Dispatch<WlDataOffer, SelectionOffer<D>>,
    D: DataDeviceHandler,
    D: SeatHandler,
    D: 'static,
{
    fn request(
        handler: &mut D,
        _client: &Client,
        offer: &Resource<WlDataOffer>,
        request: wl_data_offer::Request,
        data: &SelectionOffer<D>,
        _dhandle: &DisplayHandle,
        _data_init: &mut DataInit<'_, D>,
    ) {
        match request {
            wl_data_offer::Request::Receive { mime_type, fd } => match data {
                SelectionOffer::Client(source) => {
                    // check if the source and associated mime type is still valid
                    let valid = with_source_metadata(source, |meta| meta.mime_types.contains(&mime_type))
                        .unwrap_or(false)
                        && source.is_alive();
                    if !valid {
                        // deny the receive
                        debug!("Denying a wl_data_offer.receive with invalid source.");
                        return;
                    }
                    source.send_event(wl_data_source::Event::Send { mime_type, fd });
                }
                SelectionOffer::Compositor {
                    metadata,
                    seat,
                    user_data,
                } => {
                    if !metadata.mime_types.contains(&mime_type) {
                        debug!("Denying a wl_data_offer.receive with invalid mime type.");
                        return;
                    }
                    if let Some(seat) = seat.upgrade() {
                        handler.send_selection(mime_type, fd, seat, user_data);
                    }
                }
            },
            wl_data_offer::Request::Finish => {
                offer.post_error(
                    wl_data_offer::Error::InvalidFinish,
                    "Cannot finish a data offer that is not a drag'n'drop offer.",
                );
            }
            wl_data_offer::Request::SetActions { .. } => {
                offer.post_error(
                    wl_data_offer::Error::InvalidOffer,
                    "Cannot set the actions of a data offer that is not a drag'n'drop offer.",
                );
            }
            // selection data offers only care about the `receive` request
            wl_data_offer::Request::Accept { .. } | wl_data_offer::Request::Destroy => {}
        }
    }
}
