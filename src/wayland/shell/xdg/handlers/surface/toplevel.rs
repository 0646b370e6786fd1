use std::sync::atomic::Ordering;

use crate::{
    protocol::{
        wl_surface::WlSurface,
        xdg_surface::{self, XdgSurface},
        xdg_toplevel::{self, XdgToplevel},
        xdg_wm_base,
    },
    server::{Client, ClientId, DataInit, Dispatch, DisplayHandle, New, Resource},
    utils::Serial,
    wayland::compositor::{self, BufferAssignment, SurfaceAttributes},
};

use super::{
    super::super::{
        toplevel_attributes, SurfaceCachedState, ToplevelSurface, XdgShellHandler, XdgShellState,
        XdgToplevelSurfaceRoleAttributes, XDG_TOPLEVEL_ROLE,
    },
    XdgShellSurfaceUserData, XdgSurfaceUserData,
};

pub(super) fn make_toplevel<D>(
    state: &mut D,
    xdg_surface: &Resource<XdgSurface>,
    data: &XdgSurfaceUserData,
    id: New<XdgToplevel>,
    data_init: &mut DataInit<'_, D>,
) where
    D: Dispatch<XdgToplevel, XdgShellSurfaceUserData>,
    D: XdgShellHandler,
    D: 'static,
{
    let surface = &data.wl_surface;
    if data.has_active_role.load(Ordering::Acquire) {
        xdg_surface.post_error(
            xdg_surface::Error::AlreadyConstructed,
            "xdg_surface already has a role object",
        );
        return;
    }
    if compositor::give_role(surface, XDG_TOPLEVEL_ROLE).is_err() {
        data.shell
            .post_error(xdg_wm_base::Error::Role, "Surface already has a role.");
        return;
    }
    data.has_active_role.store(true, Ordering::Release);

    let capabilities = state.xdg_shell_state().capabilities.clone();
    compositor::with_states(surface, |states| {
        *toplevel_attributes(states) = XdgToplevelSurfaceRoleAttributes {
            capabilities,
            ..Default::default()
        };
    });

    let toplevel = data_init.init(id, XdgShellSurfaceUserData::new(data, xdg_surface));

    let weak = toplevel.downgrade();
    let pre_hook = compositor::add_pre_commit_hook::<D, _>(surface, move |_state, _dh, surface| {
        if let Ok(toplevel) = weak.upgrade() {
            pre_commit(&toplevel, surface);
        }
    });
    let post_hook = compositor::add_post_commit_hook::<D, _>(surface, |_state, _dh, surface| post_commit(surface));
    if let Some(data) = toplevel.data::<XdgShellSurfaceUserData>() {
        data.hooks.lock().unwrap().extend([pre_hook, post_hook]);
    }

    let handle = ToplevelSurface::new(surface.clone(), toplevel);
    state.xdg_shell_state().known_toplevels.push(handle.clone());
    XdgShellHandler::new_toplevel(state, handle);
}

fn pre_commit(toplevel: &Resource<XdgToplevel>, surface: &Resource<WlSurface>) {
    let Some(data) = toplevel.data::<XdgShellSurfaceUserData>() else {
        return;
    };
    let (unconfigured_buffer, invalid_size) = compositor::with_states(surface, |states| {
        let configured = toplevel_attributes(states).configured;
        let new_buffer = matches!(
            states.cached_state.pending::<SurfaceAttributes>().buffer,
            Some(BufferAssignment::NewBuffer(_))
        );
        let cached = *states.cached_state.pending::<SurfaceCachedState>();
        // a max of 0 leaves the axis unbounded
        let invalid = |min: i32, max: i32| max > 0 && min > max;
        (
            new_buffer && !configured,
            invalid(cached.min_size.w, cached.max_size.w) || invalid(cached.min_size.h, cached.max_size.h),
        )
    });

    if unconfigured_buffer {
        data.xdg_surface.post_error(
            xdg_surface::Error::UnconfiguredBuffer,
            "a buffer was attached before the initial configure was acknowledged",
        );
    } else if invalid_size {
        toplevel.post_error(xdg_toplevel::Error::InvalidSize, "min size is larger than max size");
    }
}

fn post_commit(surface: &Resource<WlSurface>) {
    let mapped = compositor::is_mapped(surface);
    compositor::with_states(surface, |states| {
        let mut attributes = toplevel_attributes(states);
        if let Some(state) = attributes.last_acked.clone() {
            attributes.current = state;
        }
        if attributes.mapped && !mapped {
            attributes.reset_configure();
        }
        attributes.mapped = mapped;
    });
}

// whether making `parent` the parent of `surface` would create a loop
fn creates_cycle(surface: &Resource<WlSurface>, parent: &Resource<WlSurface>) -> bool {
    let mut current = Some(parent.clone());
    while let Some(ancestor) = current {
        if &ancestor == surface {
            return true;
        }
        current = compositor::with_states(&ancestor, |states| {
            toplevel_attributes(states)
                .parent
                .as_ref()
                .and_then(|parent| parent.upgrade().ok())
        });
    }
    false
}

impl<D> Dispatch<XdgToplevel, XdgShellSurfaceUserData, D> for XdgShellState
where
    D: Dispatch<XdgToplevel, XdgShellSurfaceUserData>,
    D: XdgShellHandler,
    D: 'static,
{
    fn request(
        state: &mut D,
        _client: &Client,
        toplevel: &Resource<XdgToplevel>,
        request: xdg_toplevel::Request,
        data: &XdgShellSurfaceUserData,
        _dh: &DisplayHandle,
        _data_init: &mut DataInit<'_, D>,
    ) {
        let handle = ToplevelSurface::new(data.wl_surface.clone(), toplevel.clone());
        match request {
            xdg_toplevel::Request::Destroy => {
                // all is handled by destructor
            }
            xdg_toplevel::Request::SetParent { parent } => {
                let parent_surface = parent
                    .as_ref()
                    .and_then(|parent| parent.data::<XdgShellSurfaceUserData>())
                    .map(|parent_data| parent_data.wl_surface.clone());
                if let Some(parent_surface) = parent_surface.as_ref() {
                    if creates_cycle(&data.wl_surface, parent_surface) {
                        toplevel.post_error(
                            xdg_toplevel::Error::InvalidParent,
                            "a toplevel cannot be its own ancestor",
                        );
                        return;
                    }
                }
                let changed = compositor::with_states(&data.wl_surface, |states| {
                    let mut attributes = toplevel_attributes(states);
                    let previous = attributes.parent.as_ref().and_then(|parent| parent.upgrade().ok());
                    attributes.parent = parent_surface.as_ref().map(Resource::downgrade);
                    previous != parent_surface
                });
                if changed {
                    XdgShellHandler::parent_changed(state, handle);
                }
            }
            xdg_toplevel::Request::SetTitle { title } => {
                compositor::with_states(&data.wl_surface, |states| {
                    toplevel_attributes(states).title = Some(title);
                });
                XdgShellHandler::title_changed(state, handle);
            }
            xdg_toplevel::Request::SetAppId { app_id } => {
                compositor::with_states(&data.wl_surface, |states| {
                    toplevel_attributes(states).app_id = Some(app_id);
                });
                XdgShellHandler::app_id_changed(state, handle);
            }
            xdg_toplevel::Request::ShowWindowMenu { seat, serial, x, y } => {
                XdgShellHandler::show_window_menu(state, handle, seat, Serial::from(serial), (x, y).into());
            }
            xdg_toplevel::Request::Move { seat, serial } => {
                XdgShellHandler::move_request(state, handle, seat, Serial::from(serial));
            }
            xdg_toplevel::Request::Resize { seat, serial, edges } => match xdg_toplevel::ResizeEdge::try_from(edges) {
                Ok(edges) => XdgShellHandler::resize_request(state, handle, seat, Serial::from(serial), edges),
                Err(()) => toplevel.post_error(
                    xdg_toplevel::Error::InvalidResizeEdge,
                    format!("invalid resize edge {}", edges),
                ),
            },
            xdg_toplevel::Request::SetMaxSize { width, height } => {
                if width < 0 || height < 0 {
                    toplevel.post_error(xdg_toplevel::Error::InvalidSize, "max size cannot be negative");
                    return;
                }
                compositor::with_states(&data.wl_surface, |states| {
                    states.cached_state.pending::<SurfaceCachedState>().max_size = (width, height).into();
                });
            }
            xdg_toplevel::Request::SetMinSize { width, height } => {
                if width < 0 || height < 0 {
                    toplevel.post_error(xdg_toplevel::Error::InvalidSize, "min size cannot be negative");
                    return;
                }
                compositor::with_states(&data.wl_surface, |states| {
                    states.cached_state.pending::<SurfaceCachedState>().min_size = (width, height).into();
                });
            }
            xdg_toplevel::Request::SetMaximized => XdgShellHandler::maximize_request(state, handle),
            xdg_toplevel::Request::UnsetMaximized => XdgShellHandler::unmaximize_request(state, handle),
            xdg_toplevel::Request::SetFullscreen => XdgShellHandler::fullscreen_request(state, handle),
            xdg_toplevel::Request::UnsetFullscreen => XdgShellHandler::unfullscreen_request(state, handle),
            xdg_toplevel::Request::SetMinimized => XdgShellHandler::minimize_request(state, handle),
        }
    }

    fn destroyed(state: &mut D, _client: ClientId, toplevel: &Resource<XdgToplevel>, data: &XdgShellSurfaceUserData) {
        data.role_destroyed();
        let handle = ToplevelSurface::new(data.wl_surface.clone(), toplevel.clone());
        state
            .xdg_shell_state()
            .known_toplevels
            .retain(|known| known != &handle);
        XdgShellHandler::toplevel_destroyed(state, handle);
    }
}
