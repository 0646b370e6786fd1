use std::sync::{
    atomic::{AtomicBool, Ordering},
    Mutex,
};

use tracing::trace;

use crate::{
    protocol::{
        wl_surface::WlSurface,
        xdg_popup::XdgPopup,
        xdg_surface::{self, XdgSurface},
        xdg_toplevel::XdgToplevel,
    },
    server::{Client, ClientId, DataInit, Dispatch, DisplayHandle, Resource},
    utils::{Rectangle, Serial},
    wayland::compositor::{self, HookId},
};

use super::super::{
    has_xdg_role, popup_attributes, toplevel_attributes, Configure, ShellClient, SurfaceCachedState,
    XdgShellHandler, XdgShellState, XDG_POPUP_ROLE, XDG_TOPLEVEL_ROLE,
};

mod popup;
mod toplevel;

/// User data of xdg surface
#[derive(Debug)]
pub struct XdgSurfaceUserData {
    pub(crate) shell: ShellClient,
    pub(crate) wl_surface: Resource<WlSurface>,
    pub(crate) has_active_role: AtomicBool,
    commit_hook: Mutex<Option<HookId>>,
}

impl XdgSurfaceUserData {
    pub(crate) fn new(shell: ShellClient, wl_surface: Resource<WlSurface>) -> Self {
        XdgSurfaceUserData {
            shell,
            wl_surface,
            has_active_role: AtomicBool::new(false),
            commit_hook: Mutex::new(None),
        }
    }

    /// Refuse commits of the surface until it was given a role
    pub(crate) fn install_commit_hook<D: 'static>(xdg_surface: &Resource<XdgSurface>) {
        let Some(data) = xdg_surface.data::<XdgSurfaceUserData>() else {
            return;
        };
        let weak = xdg_surface.downgrade();
        let hook = compositor::add_pre_commit_hook::<D, _>(&data.wl_surface, move |_state, _dh, surface| {
            let Ok(xdg_surface) = weak.upgrade() else {
                return;
            };
            if !has_xdg_role(surface) {
                xdg_surface.post_error(
                    xdg_surface::Error::NotConstructed,
                    "xdg_surface must have a role before being committed",
                );
            }
        });
        *data.commit_hook.lock().unwrap() = Some(hook);
        // a commit before the role is assigned must reach the hook
        compositor::with_states(&data.wl_surface, |states| states.cached_state.mark_changed());
    }
}

/// User data of the role objects, `xdg_toplevel` and `xdg_popup`
#[derive(Debug)]
pub struct XdgShellSurfaceUserData {
    pub(crate) shell: ShellClient,
    pub(crate) wl_surface: Resource<WlSurface>,
    pub(crate) xdg_surface: Resource<XdgSurface>,
    hooks: Mutex<Vec<HookId>>,
}

impl XdgShellSurfaceUserData {
    fn new(data: &XdgSurfaceUserData, xdg_surface: &Resource<XdgSurface>) -> Self {
        XdgShellSurfaceUserData {
            shell: data.shell.clone(),
            wl_surface: data.wl_surface.clone(),
            xdg_surface: xdg_surface.clone(),
            hooks: Mutex::new(Vec::new()),
        }
    }

    // the role object is gone, its surface can take a new one
    fn role_destroyed(&self) {
        for hook in self.hooks.lock().unwrap().drain(..) {
            compositor::remove_hook(&self.wl_surface, hook);
        }
        if let Some(data) = self.xdg_surface.data::<XdgSurfaceUserData>() {
            data.has_active_role.store(false, Ordering::Release);
        }
    }
}

impl<D> Dispatch<XdgSurface, XdgSurfaceUserData, D> for XdgShellState
where
    D: Dispatch<XdgSurface, XdgSurfaceUserData>,
    D: Dispatch<XdgToplevel, XdgShellSurfaceUserData>,
    D: Dispatch<XdgPopup, XdgShellSurfaceUserData>,
    D: XdgShellHandler,
    D: 'static,
{
    fn request(
        state: &mut D,
        _client: &Client,
        xdg_surface: &Resource<XdgSurface>,
        request: xdg_surface::Request,
        data: &XdgSurfaceUserData,
        _dh: &DisplayHandle,
        data_init: &mut DataInit<'_, D>,
    ) {
        match request {
            xdg_surface::Request::Destroy => {
                if data.has_active_role.load(Ordering::Acquire) {
                    xdg_surface.post_error(
                        xdg_surface::Error::DefunctRoleObject,
                        "xdg_surface was destroyed before its role object",
                    );
                }
            }
            xdg_surface::Request::GetToplevel { id } => {
                toplevel::make_toplevel(state, xdg_surface, data, id, data_init);
            }
            xdg_surface::Request::GetPopup { id, parent, positioner } => {
                popup::make_popup(state, xdg_surface, data, id, parent, positioner, data_init);
            }
            xdg_surface::Request::SetWindowGeometry { x, y, width, height } => {
                if width <= 0 || height <= 0 {
                    xdg_surface.post_error(
                        xdg_surface::Error::InvalidSize,
                        format!("invalid window geometry size {}x{}", width, height),
                    );
                    return;
                }
                if !has_xdg_role(&data.wl_surface) {
                    xdg_surface.post_error(
                        xdg_surface::Error::NotConstructed,
                        "xdg_surface must have a role before setting its geometry",
                    );
                    return;
                }
                compositor::with_states(&data.wl_surface, |states| {
                    states.cached_state.pending::<SurfaceCachedState>().geometry =
                        Some(Rectangle::new((x, y).into(), (width, height).into()));
                });
            }
            xdg_surface::Request::AckConfigure { serial } => {
                let serial = Serial::from(serial);
                let surface = &data.wl_surface;
                let acked: Option<Vec<Configure>> = match compositor::get_role(surface) {
                    Some(XDG_TOPLEVEL_ROLE) => compositor::with_states(surface, |states| {
                        toplevel_attributes(states).ack_configure(serial)
                    })
                    .map(|configures| configures.into_iter().map(Configure::from).collect()),
                    Some(XDG_POPUP_ROLE) => compositor::with_states(surface, |states| {
                        popup_attributes(states).ack_configure(serial)
                    })
                    .map(|configures| configures.into_iter().map(Configure::from).collect()),
                    _ => {
                        xdg_surface.post_error(
                            xdg_surface::Error::NotConstructed,
                            "xdg_surface must have a role before acknowledging a configure",
                        );
                        return;
                    }
                };

                match acked {
                    Some(configures) => {
                        // the acknowledged state is applied by the next commit
                        compositor::with_states(surface, |states| states.cached_state.mark_changed());
                        trace!(surface = ?surface, ?serial, count = configures.len(), "configures acknowledged");
                        for configure in configures {
                            XdgShellHandler::ack_configure(state, surface.clone(), configure);
                        }
                    }
                    None => {
                        xdg_surface.post_error(
                            xdg_surface::Error::InvalidSerial,
                            format!("wrong configure serial: {}", u32::from(serial)),
                        );
                    }
                }
            }
        }
    }

    fn destroyed(_state: &mut D, _client: ClientId, _resource: &Resource<XdgSurface>, data: &XdgSurfaceUserData) {
        if let Some(hook) = data.commit_hook.lock().unwrap().take() {
            compositor::remove_hook(&data.wl_surface, hook);
        }
    }
}
