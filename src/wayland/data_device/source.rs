use std::sync::Mutex;

use tracing::{debug, error};

use crate::{
    protocol::{
        wl_data_device_manager::DndAction,
        wl_data_offer::WlDataOffer,
        wl_data_source::{self, WlDataSource},
    },
    server::{Client, ClientId, DataInit, Dispatch, DisplayHandle, InvalidId, Resource, Weak},
};

use super::{
    dnd_grab::{negotiate_action, DndOfferData},
    seat_data::SeatData,
    DataDeviceHandler, DataDeviceState, SelectionOffer,
};

/// The metadata describing a data source
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct SourceMetadata {
    /// The MIME types supported by this source
    pub mime_types: Vec<String>,
    /// The Drag'n'Drop actions supported by this source
    pub dnd_action: DndAction,
}

#[doc(hidden)]
#[derive(Debug)]
pub struct DataSourceUserData {
    pub(crate) inner: Mutex<SourceMetadata>,
    // offers made to drag'n'drop targets from this source
    dnd_offers: Mutex<Vec<Weak<WlDataOffer>>>,
}

impl DataSourceUserData {
    pub(super) fn new() -> Self {
        Self {
            inner: Default::default(),
            dnd_offers: Default::default(),
        }
    }

    pub(super) fn track_dnd_offer(&self, offer: &Resource<WlDataOffer>) {
        let mut offers = self.dnd_offers.lock().unwrap();
        offers.retain(|offer| offer.is_alive());
        offers.push(offer.downgrade());
    }

    fn live_dnd_offers(&self) -> Vec<Resource<WlDataOffer>> {
        let mut offers = self.dnd_offers.lock().unwrap();
        offers.retain(|offer| offer.is_alive());
        offers.iter().filter_map(|offer| offer.upgrade().ok()).collect()
    }
}

impl<D> Dispatch<WlDataSource, DataSourceUserData, D> for DataDeviceState
where
    D: Dispatch<WlDataSource, DataSourceUserData>,
    D: Dispatch<WlDataOffer, SelectionOffer<D>>,
    D: DataDeviceHandler,
    D: 'static,
{
    fn request(
        state: &mut D,
        _client: &Client,
        resource: &Resource<WlDataSource>,
        request: wl_data_source::Request,
        data: &DataSourceUserData,
        _dhandle: &DisplayHandle,
        _data_init: &mut DataInit<'_, D>,
    ) {
        match request {
            wl_data_source::Request::Offer { mime_type } => data.inner.lock().unwrap().mime_types.push(mime_type),
            wl_data_source::Request::SetActions { dnd_actions } => match DndAction::from_bits(dnd_actions) {
                Some(dnd_actions) => {
                    data.inner.lock().unwrap().dnd_action = dnd_actions;
                    // a drag in progress picks its action again
                    for offer in data.live_dnd_offers() {
                        if let Some(offer_data) = offer.data::<DndOfferData<D>>() {
                            negotiate_action(state, &offer, offer_data);
                        }
                    }
                }
                None => resource.post_error(
                    wl_data_source::Error::InvalidActionMask,
                    format!("invalid action mask {:#x}", dnd_actions),
                ),
            },
            wl_data_source::Request::Destroy => {}
        }
    }

    fn destroyed(state: &mut D, _client: ClientId, resource: &Resource<WlDataSource>, _data: &DataSourceUserData) {
        let seats = state.seat_state().seats().cloned().collect::<Vec<_>>();
        for seat in seats {
            let Some(seat_data) = seat.user_data().get::<Mutex<SeatData<D::SelectionUserData>>>() else {
                continue;
            };
            if seat_data.lock().unwrap().source_destroyed(resource) {
                debug!(seat = seat.name(), source = ?resource, "Selection source destroyed, clearing the selection");
            }
        }
    }
}

/// Access the metadata of a data source
pub fn with_source_metadata<T, F: FnOnce(&SourceMetadata) -> T>(
    source: &Resource<WlDataSource>,
    f: F,
) -> Result<T, InvalidId> {
    match source.data::<DataSourceUserData>() {
        Some(data) => Ok(f(&data.inner.lock().unwrap())),
        None => {
            error!(source = ?source, "Accessing the metadata of a data source not created by this module");
            Err(InvalidId)
        }
    }
}
