use std::sync::atomic::Ordering;

use crate::{
    protocol::{
        wl_surface::WlSurface,
        xdg_popup::{self, XdgPopup},
        xdg_positioner::XdgPositioner,
        xdg_surface::{self, XdgSurface},
        xdg_wm_base,
    },
    server::{Client, ClientId, DataInit, Dispatch, DisplayHandle, New, Resource},
    utils::Serial,
    wayland::compositor::{self, BufferAssignment, SurfaceAttributes},
};

use super::{
    super::{
        super::{popup_attributes, PopupState, PopupSurface, XdgPopupSurfaceRoleAttributes, XdgShellHandler, XdgShellState, XDG_POPUP_ROLE},
        XdgPositionerUserData,
    },
    XdgShellSurfaceUserData, XdgSurfaceUserData,
};

pub(super) fn make_popup<D>(
    state: &mut D,
    xdg_surface: &Resource<XdgSurface>,
    data: &XdgSurfaceUserData,
    id: New<XdgPopup>,
    parent: Option<Resource<XdgSurface>>,
    positioner: Resource<XdgPositioner>,
    data_init: &mut DataInit<'_, D>,
) where
    D: Dispatch<XdgPopup, XdgShellSurfaceUserData>,
    D: XdgShellHandler,
    D: 'static,
{
    let surface = &data.wl_surface;
    let positioner_state = match positioner.data::<XdgPositionerUserData>() {
        Some(positioner_data) => positioner_data.state(),
        None => return,
    };
    if !positioner_state.is_complete() {
        data.shell.post_error(
            xdg_wm_base::Error::InvalidPositioner,
            "the positioner of a popup must have a size",
        );
        return;
    }
    if data.has_active_role.load(Ordering::Acquire) {
        xdg_surface.post_error(
            xdg_surface::Error::AlreadyConstructed,
            "xdg_surface already has a role object",
        );
        return;
    }
    if compositor::give_role(surface, XDG_POPUP_ROLE).is_err() {
        data.shell
            .post_error(xdg_wm_base::Error::Role, "Surface already has a role.");
        return;
    }
    data.has_active_role.store(true, Ordering::Release);

    let parent_surface = parent
        .as_ref()
        .and_then(|parent| parent.data::<XdgSurfaceUserData>())
        .map(|parent_data| parent_data.wl_surface.clone());
    compositor::with_states(surface, |states| {
        *popup_attributes(states) = XdgPopupSurfaceRoleAttributes {
            parent: parent_surface.as_ref().map(Resource::downgrade),
            server_pending: Some(PopupState {
                positioner: positioner_state,
                geometry: positioner_state.get_geometry(),
            }),
            ..Default::default()
        };
    });

    let popup = data_init.init(id, XdgShellSurfaceUserData::new(data, xdg_surface));

    let weak = popup.downgrade();
    let pre_hook = compositor::add_pre_commit_hook::<D, _>(surface, move |_state, _dh, surface| {
        if let Ok(popup) = weak.upgrade() {
            pre_commit(&popup, surface);
        }
    });
    let post_hook = compositor::add_post_commit_hook::<D, _>(surface, |_state, _dh, surface| post_commit(surface));
    if let Some(data) = popup.data::<XdgShellSurfaceUserData>() {
        data.hooks.lock().unwrap().extend([pre_hook, post_hook]);
    }

    let handle = PopupSurface::new(surface.clone(), popup);
    state.xdg_shell_state().known_popups.push(handle.clone());
    XdgShellHandler::new_popup(state, handle, positioner_state);
}

fn pre_commit(popup: &Resource<XdgPopup>, surface: &Resource<WlSurface>) {
    let Some(data) = popup.data::<XdgShellSurfaceUserData>() else {
        return;
    };
    let (no_parent, unconfigured_buffer) = compositor::with_states(surface, |states| {
        let attributes = popup_attributes(states);
        let new_buffer = matches!(
            states.cached_state.pending::<SurfaceAttributes>().buffer,
            Some(BufferAssignment::NewBuffer(_))
        );
        (attributes.parent.is_none(), new_buffer && !attributes.configured)
    });

    if no_parent {
        data.shell.post_error(
            xdg_wm_base::Error::InvalidPopupParent,
            "xdg_popup must have a parent before being committed",
        );
    } else if unconfigured_buffer {
        data.xdg_surface.post_error(
            xdg_surface::Error::UnconfiguredBuffer,
            "a buffer was attached before the initial configure was acknowledged",
        );
    }
}

fn post_commit(surface: &Resource<WlSurface>) {
    compositor::with_states(surface, |states| {
        let mut attributes = popup_attributes(states);
        attributes.committed = true;
        if let Some(state) = attributes.last_acked {
            attributes.current = state;
        }
    });
}

impl<D> Dispatch<XdgPopup, XdgShellSurfaceUserData, D> for XdgShellState
where
    D: Dispatch<XdgPopup, XdgShellSurfaceUserData>,
    D: XdgShellHandler,
    D: 'static,
{
    fn request(
        state: &mut D,
        _client: &Client,
        popup: &Resource<XdgPopup>,
        request: xdg_popup::Request,
        data: &XdgShellSurfaceUserData,
        _dh: &DisplayHandle,
        _data_init: &mut DataInit<'_, D>,
    ) {
        let handle = PopupSurface::new(data.wl_surface.clone(), popup.clone());
        match request {
            xdg_popup::Request::Destroy => {
                let has_children = state
                    .xdg_shell_state()
                    .known_popups
                    .iter()
                    .any(|other| other.alive() && other.get_parent_surface().as_ref() == Some(&data.wl_surface));
                if has_children {
                    data.shell.post_error(
                        xdg_wm_base::Error::NotTheTopmostPopup,
                        "xdg_popup was destroyed while it was not the topmost popup",
                    );
                }
            }
            xdg_popup::Request::Grab { seat, serial } => {
                let committed = compositor::with_states(&data.wl_surface, |states| popup_attributes(states).committed);
                if committed {
                    popup.post_error(
                        xdg_popup::Error::InvalidGrab,
                        "xdg_popup.grab must be sent before the first commit",
                    );
                    return;
                }
                XdgShellHandler::grab(state, handle, seat, Serial::from(serial));
            }
            xdg_popup::Request::Reposition { positioner, token } => {
                let Some(positioner_data) = positioner.data::<XdgPositionerUserData>() else {
                    return;
                };
                let positioner_state = positioner_data.state();
                if !positioner_state.is_complete() {
                    data.shell.post_error(
                        xdg_wm_base::Error::InvalidPositioner,
                        "the positioner of a popup must have a size",
                    );
                    return;
                }
                XdgShellHandler::reposition_request(state, handle, positioner_state, token);
            }
        }
    }

    fn destroyed(state: &mut D, _client: ClientId, popup: &Resource<XdgPopup>, data: &XdgShellSurfaceUserData) {
        data.role_destroyed();
        let handle = PopupSurface::new(data.wl_surface.clone(), popup.clone());
        state.xdg_shell_state().known_popups.retain(|known| known != &handle);
        XdgShellHandler::popup_destroyed(state, handle);
    }
}
