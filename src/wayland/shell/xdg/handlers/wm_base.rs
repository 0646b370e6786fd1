use std::sync::Mutex;

use tracing::{debug, trace};

use crate::{
    protocol::{
        xdg_positioner::XdgPositioner,
        xdg_surface::XdgSurface,
        xdg_wm_base::{self, XdgWmBase},
        zxdg_shell_v6::ZxdgShellV6,
    },
    server::{Client, DataInit, Dispatch, DisplayHandle, GlobalDispatch, Interface, New, Resource},
    utils::Serial,
    wayland::compositor,
};

use super::super::{
    has_xdg_role, ShellClient, ShellClientData, ShellVariant, XdgPositionerUserData, XdgShellHandler,
    XdgShellState, XdgSurfaceUserData,
};

/// User data of the shell objects, `xdg_wm_base` and `zxdg_shell_v6`
#[derive(Debug)]
pub struct XdgWmBaseUserData {
    pub(crate) variant: ShellVariant,
    pub(crate) client_data: Mutex<ShellClientData>,
}

impl XdgWmBaseUserData {
    fn new(variant: ShellVariant) -> Self {
        XdgWmBaseUserData {
            variant,
            client_data: Mutex::new(ShellClientData::default()),
        }
    }
}

impl<D> GlobalDispatch<XdgWmBase, (), D> for XdgShellState
where
    D: GlobalDispatch<XdgWmBase, ()>,
    D: Dispatch<XdgWmBase, XdgWmBaseUserData>,
    D: XdgShellHandler,
    D: 'static,
{
    fn bind(
        state: &mut D,
        _handle: &DisplayHandle,
        _client: &Client,
        resource: New<XdgWmBase>,
        _global_data: &(),
        data_init: &mut DataInit<'_, D>,
    ) {
        let shell = data_init.init(resource, XdgWmBaseUserData::new(ShellVariant::Stable));
        XdgShellHandler::new_client(state, shell.into());
    }
}

impl<D> GlobalDispatch<ZxdgShellV6, (), D> for XdgShellState
where
    D: GlobalDispatch<ZxdgShellV6, ()>,
    D: Dispatch<ZxdgShellV6, XdgWmBaseUserData>,
    D: XdgShellHandler,
    D: 'static,
{
    fn bind(
        state: &mut D,
        _handle: &DisplayHandle,
        _client: &Client,
        resource: New<ZxdgShellV6>,
        _global_data: &(),
        data_init: &mut DataInit<'_, D>,
    ) {
        let shell = data_init.init(resource, XdgWmBaseUserData::new(ShellVariant::V6));
        XdgShellHandler::new_client(state, shell.into());
    }
}

impl<D> Dispatch<XdgWmBase, XdgWmBaseUserData, D> for XdgShellState
where
    D: Dispatch<XdgWmBase, XdgWmBaseUserData>,
    D: Dispatch<XdgSurface, XdgSurfaceUserData>,
    D: Dispatch<XdgPositioner, XdgPositionerUserData>,
    D: XdgShellHandler,
    D: 'static,
{
    fn request(
        state: &mut D,
        _client: &Client,
        wm_base: &Resource<XdgWmBase>,
        request: xdg_wm_base::Request,
        data: &XdgWmBaseUserData,
        dh: &DisplayHandle,
        data_init: &mut DataInit<'_, D>,
    ) {
        shell_request(state, wm_base.clone().into(), request, data, dh, data_init);
    }
}

impl<D> Dispatch<ZxdgShellV6, XdgWmBaseUserData, D> for XdgShellState
where
    D: Dispatch<ZxdgShellV6, XdgWmBaseUserData>,
    D: Dispatch<XdgSurface, XdgSurfaceUserData>,
    D: Dispatch<XdgPositioner, XdgPositionerUserData>,
    D: XdgShellHandler,
    D: 'static,
{
    fn request(
        state: &mut D,
        _client: &Client,
        shell: &Resource<ZxdgShellV6>,
        request: xdg_wm_base::Request,
        data: &XdgWmBaseUserData,
        dh: &DisplayHandle,
        data_init: &mut DataInit<'_, D>,
    ) {
        shell_request(state, shell.clone().into(), request, data, dh, data_init);
    }
}

// both shell variants share their requests
fn shell_request<D>(
    state: &mut D,
    shell: ShellClient,
    request: xdg_wm_base::Request,
    data: &XdgWmBaseUserData,
    dh: &DisplayHandle,
    data_init: &mut DataInit<'_, D>,
) where
    D: Dispatch<XdgSurface, XdgSurfaceUserData>,
    D: Dispatch<XdgPositioner, XdgPositionerUserData>,
    D: XdgShellHandler,
    D: 'static,
{
    match request {
        xdg_wm_base::Request::Destroy => {
            let defunct = dh.object_children(shell.id()).into_iter().any(|child| {
                dh.object_info(child)
                    .map(|info| info.interface == XdgSurface::NAME)
                    .unwrap_or(false)
            });
            if defunct {
                shell.post_error(
                    xdg_wm_base::Error::DefunctSurfaces,
                    "xdg_wm_base was destroyed before its xdg_surfaces",
                );
            }
        }
        xdg_wm_base::Request::CreatePositioner { id } => {
            data_init.init(id, XdgPositionerUserData::new(data.variant));
        }
        xdg_wm_base::Request::GetXdgSurface { id, surface } => {
            // an xdg_surface can only be created for a surface without a role, or whose role
            // object was destroyed
            if compositor::get_role(&surface).is_some() && !has_xdg_role(&surface) {
                shell.post_error(xdg_wm_base::Error::Role, "Surface already has a role.");
                return;
            }

            let xdg_surface = data_init.init(id, XdgSurfaceUserData::new(shell.clone(), surface.clone()));
            XdgSurfaceUserData::install_commit_hook::<D>(&xdg_surface);
            trace!(surface = ?surface, xdg_surface = ?xdg_surface, "xdg_surface created");
        }
        xdg_wm_base::Request::Pong { serial } => {
            let serial = Serial::from(serial);
            let valid = {
                let mut guard = data.client_data.lock().unwrap();
                if guard.pending_ping == Some(serial) {
                    guard.pending_ping = None;
                    true
                } else {
                    false
                }
            };
            if valid {
                XdgShellHandler::client_pong(state, shell);
            } else {
                debug!(?serial, "Ignoring a pong for an unknown ping");
            }
        }
    }
}
