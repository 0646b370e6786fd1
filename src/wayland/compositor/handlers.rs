use std::sync::{
    atomic::{AtomicBool, Ordering},
    Mutex,
};

use tracing::trace;

use crate::{
    protocol::{
        wl_compositor::{self, WlCompositor},
        wl_region::{self, WlRegion},
        wl_subcompositor::{self, WlSubcompositor},
        wl_subsurface::{self, WlSubsurface},
        wl_surface::{self, WlSurface},
    },
    server::{Client, ClientId, DataInit, Dispatch, DisplayHandle, GlobalDispatch, New, Resource},
    utils::{Logical, Point, Rectangle, Transform},
    wayland::buffer::BufferData,
};

use super::{
    cache::Cacheable,
    tree::{Location, PrivateSurfaceData},
    AlreadyHasRole, BufferAssignment, CompositorHandler, CompositorState, Damage, RectangleKind,
    RegionAttributes, SurfaceAttributes, SurfaceDirty,
};

/*
 * wl_compositor
 */

impl<D> GlobalDispatch<WlCompositor, (), D> for CompositorState
where
    D: GlobalDispatch<WlCompositor, ()>,
    D: Dispatch<WlCompositor, ()>,
    D: Dispatch<WlSurface, SurfaceUserData>,
    D: Dispatch<WlRegion, RegionUserData>,
    D: CompositorHandler,
    D: 'static,
{
    fn bind(
        _state: &mut D,
        _handle: &DisplayHandle,
        _client: &Client,
        resource: New<WlCompositor>,
        _global_data: &(),
        data_init: &mut DataInit<'_, D>,
    ) {
        data_init.init(resource, ());
    }
}

impl<D> Dispatch<WlCompositor, (), D> for CompositorState
where
    D: Dispatch<WlCompositor, ()>,
    D: Dispatch<WlSurface, SurfaceUserData>,
    D: Dispatch<WlRegion, RegionUserData>,
    D: CompositorHandler,
    D: 'static,
{
    fn request(
        state: &mut D,
        _client: &Client,
        _resource: &Resource<WlCompositor>,
        request: wl_compositor::Request,
        _data: &(),
        _dhandle: &DisplayHandle,
        data_init: &mut DataInit<'_, D>,
    ) {
        match request {
            wl_compositor::Request::CreateSurface { id } => {
                trace!(id = ?id, "Creating a new wl_surface.");

                let surface = data_init.init(
                    id,
                    SurfaceUserData {
                        inner: PrivateSurfaceData::new(),
                    },
                );
                state.new_surface(&surface);
            }
            wl_compositor::Request::CreateRegion { id } => {
                trace!(id = ?id, "Creating a new wl_region.");

                data_init.init(
                    id,
                    RegionUserData {
                        inner: Default::default(),
                    },
                );
            }
        }
    }
}

/*
 * wl_surface
 */

impl Cacheable for SurfaceAttributes {
    fn commit(&mut self, _dh: &DisplayHandle) -> Self {
        SurfaceAttributes {
            buffer: self.buffer.take(),
            buffer_delta: self.buffer_delta.take(),
            buffer_scale: self.buffer_scale,
            buffer_transform: self.buffer_transform,
            opaque_region: self.opaque_region.clone(),
            input_region: self.input_region.clone(),
            damage: std::mem::take(&mut self.damage),
            frame_callbacks: std::mem::take(&mut self.frame_callbacks),
            dirty: std::mem::take(&mut self.dirty),
        }
    }

    fn merge_into(self, into: &mut Self, _dh: &DisplayHandle) {
        if self.dirty.contains(SurfaceDirty::BUFFER) {
            into.buffer = self.buffer;
        }
        if self.dirty.contains(SurfaceDirty::OFFSET) {
            into.buffer_delta = self.buffer_delta;
        }
        if self.dirty.contains(SurfaceDirty::SCALE) {
            into.buffer_scale = self.buffer_scale;
        }
        if self.dirty.contains(SurfaceDirty::TRANSFORM) {
            into.buffer_transform = self.buffer_transform;
        }
        if self.dirty.contains(SurfaceDirty::OPAQUE_REGION) {
            into.opaque_region = self.opaque_region;
        }
        if self.dirty.contains(SurfaceDirty::INPUT_REGION) {
            into.input_region = self.input_region;
        }
        into.damage.extend(self.damage);
        into.frame_callbacks.extend(self.frame_callbacks);
        into.dirty |= self.dirty;
    }
}

/// User data for WlSurface
#[derive(Debug)]
pub struct SurfaceUserData {
    pub(crate) inner: Mutex<PrivateSurfaceData>,
}

fn with_pending<F>(surface: &Resource<WlSurface>, f: F)
where
    F: FnOnce(&mut SurfaceAttributes),
{
    PrivateSurfaceData::with_states(surface, |states| {
        f(&mut states.cached_state.pending::<SurfaceAttributes>());
    });
}

fn region_attributes(region: Option<Resource<WlRegion>>) -> Option<RegionAttributes> {
    region
        .as_ref()
        .and_then(|r| r.data::<RegionUserData>())
        .map(|data| data.inner.lock().unwrap().clone())
}

/// Handle `wl_surface.commit` and notify the handler of what the new state changed
fn commit<D>(state: &mut D, handle: &DisplayHandle, surface: &Resource<WlSurface>)
where
    D: CompositorHandler + 'static,
{
    if !PrivateSurfaceData::has_changes_to_commit(surface) {
        trace!(surface = ?surface, "ignoring commit without changes");
        return;
    }

    PrivateSurfaceData::invoke_pre_commit_hooks(state, handle, surface);

    let client_alive = surface.client().map(|client| client.is_alive()).unwrap_or(false);
    if !surface.is_alive() || !client_alive {
        // the client was killed by a hook, abort
        return;
    }

    let applied = PrivateSurfaceData::commit(surface, handle);
    for (surface, outcome) in applied {
        PrivateSurfaceData::invoke_post_commit_hooks(state, handle, &surface);
        if outcome.mapped {
            trace!(surface = ?surface, "surface mapped");
            state.mapped(&surface);
        }
        if !outcome.damage.is_empty() {
            state.damaged(&surface, &outcome.damage);
        }
        if outcome.unmapped {
            trace!(surface = ?surface, "surface unmapped");
            state.unmapped(&surface);
        }
        if let Some(size) = outcome.size_changed {
            state.size_changed(&surface, size);
        }
        trace!(surface = ?surface, "Calling user implementation for wl_surface.commit");
        state.commit(&surface);
    }
}

impl<D> Dispatch<WlSurface, SurfaceUserData, D> for CompositorState
where
    D: Dispatch<WlSurface, SurfaceUserData>,
    D: CompositorHandler,
    D: 'static,
{
    fn request(
        state: &mut D,
        _client: &Client,
        surface: &Resource<WlSurface>,
        request: wl_surface::Request,
        _data: &SurfaceUserData,
        handle: &DisplayHandle,
        data_init: &mut DataInit<'_, D>,
    ) {
        match request {
            wl_surface::Request::Attach { buffer, x, y } => {
                let offset: Point<i32, Logical> = (x, y).into();
                if surface.version() >= 5 && offset != Point::default() {
                    surface.post_error(
                        wl_surface::Error::InvalidOffset,
                        "Passing non-zero x,y is protocol violation since versions 5",
                    );
                    return;
                }
                if let Some(data) = buffer.as_ref().and_then(|buffer| buffer.data::<BufferData>()) {
                    // destroying the buffer must also clear the pending state
                    data.track_surface(surface);
                }
                with_pending(surface, |pending| {
                    pending.buffer = Some(match buffer {
                        Some(buffer) => BufferAssignment::NewBuffer(buffer),
                        None => BufferAssignment::Removed,
                    });
                    pending.dirty |= SurfaceDirty::BUFFER;
                    if offset != Point::default() {
                        pending.buffer_delta = Some(offset);
                        pending.dirty |= SurfaceDirty::OFFSET;
                    }
                });
            }
            wl_surface::Request::Damage { x, y, width, height } => {
                with_pending(surface, |pending| {
                    pending
                        .damage
                        .push(Damage::Surface(Rectangle::new((x, y).into(), (width, height).into())));
                    pending.dirty |= SurfaceDirty::DAMAGE;
                });
            }
            wl_surface::Request::Frame { callback } => {
                let callback = data_init.init_inert(callback);
                with_pending(surface, |pending| {
                    pending.frame_callbacks.push(callback);
                    pending.dirty |= SurfaceDirty::FRAME_CALLBACKS;
                });
            }
            wl_surface::Request::SetOpaqueRegion { region } => {
                let attributes = region_attributes(region);
                with_pending(surface, |pending| {
                    pending.opaque_region = attributes;
                    pending.dirty |= SurfaceDirty::OPAQUE_REGION;
                });
            }
            wl_surface::Request::SetInputRegion { region } => {
                let attributes = region_attributes(region);
                with_pending(surface, |pending| {
                    pending.input_region = attributes;
                    pending.dirty |= SurfaceDirty::INPUT_REGION;
                });
            }
            wl_surface::Request::Commit => commit(state, handle, surface),
            wl_surface::Request::SetBufferTransform { transform } => match Transform::from_wire(transform) {
                Some(transform) => with_pending(surface, |pending| {
                    pending.buffer_transform = transform;
                    pending.dirty |= SurfaceDirty::TRANSFORM;
                }),
                None => surface.post_error(
                    wl_surface::Error::InvalidTransform,
                    format!("Invalid transform: {}", transform),
                ),
            },
            wl_surface::Request::SetBufferScale { scale } => {
                if scale < 1 {
                    surface.post_error(wl_surface::Error::InvalidScale, "Scale must be positive");
                    return;
                }
                with_pending(surface, |pending| {
                    pending.buffer_scale = scale;
                    pending.dirty |= SurfaceDirty::SCALE;
                });
            }
            wl_surface::Request::DamageBuffer { x, y, width, height } => {
                with_pending(surface, |pending| {
                    pending
                        .damage
                        .push(Damage::Buffer(Rectangle::new((x, y).into(), (width, height).into())));
                    pending.dirty |= SurfaceDirty::DAMAGE;
                });
            }
            wl_surface::Request::Offset { x, y } => {
                with_pending(surface, |pending| {
                    pending.buffer_delta = Some((x, y).into());
                    pending.dirty |= SurfaceDirty::OFFSET;
                });
            }
            wl_surface::Request::Destroy => {
                // All is already handled by our destructor
            }
        }
    }

    fn destroyed(state: &mut D, _client: ClientId, surface: &Resource<WlSurface>, _data: &SurfaceUserData) {
        PrivateSurfaceData::invoke_destruction_hooks(state, surface);
        state.destroyed(surface);
        PrivateSurfaceData::cleanup(surface);
    }
}

/*
 * wl_region
 */

/// User data of WlRegion
#[derive(Debug)]
pub struct RegionUserData {
    pub(crate) inner: Mutex<RegionAttributes>,
}

impl RegionUserData {
    /// Snapshot of the current content of the region
    pub fn attributes(&self) -> RegionAttributes {
        self.inner.lock().unwrap().clone()
    }
}

impl<D> Dispatch<WlRegion, RegionUserData, D> for CompositorState
where
    D: Dispatch<WlRegion, RegionUserData>,
    D: CompositorHandler,
{
    fn request(
        _state: &mut D,
        _client: &Client,
        _resource: &Resource<WlRegion>,
        request: wl_region::Request,
        data: &RegionUserData,
        _dhandle: &DisplayHandle,
        _init: &mut DataInit<'_, D>,
    ) {
        let mut guard = data.inner.lock().unwrap();
        match request {
            wl_region::Request::Add { x, y, width, height } => guard
                .rects
                .push((RectangleKind::Add, Rectangle::new((x, y).into(), (width, height).into()))),
            wl_region::Request::Subtract { x, y, width, height } => guard.rects.push((
                RectangleKind::Subtract,
                Rectangle::new((x, y).into(), (width, height).into()),
            )),
            wl_region::Request::Destroy => {
                // all is handled by our destructor
            }
        }
    }
}

/*
 * wl_subcompositor
 */

impl<D> GlobalDispatch<WlSubcompositor, (), D> for CompositorState
where
    D: GlobalDispatch<WlSubcompositor, ()>,
    D: Dispatch<WlSubcompositor, ()>,
    D: Dispatch<WlSubsurface, SubsurfaceUserData>,
    D: CompositorHandler,
    D: 'static,
{
    fn bind(
        _state: &mut D,
        _handle: &DisplayHandle,
        _client: &Client,
        resource: New<WlSubcompositor>,
        _global_data: &(),
        data_init: &mut DataInit<'_, D>,
    ) {
        data_init.init(resource, ());
    }
}

impl<D> Dispatch<WlSubcompositor, (), D> for CompositorState
where
    D: Dispatch<WlSubcompositor, ()>,
    D: Dispatch<WlSubsurface, SubsurfaceUserData>,
    D: CompositorHandler,
    D: 'static,
{
    fn request(
        state: &mut D,
        _client: &Client,
        subcompositor: &Resource<WlSubcompositor>,
        request: wl_subcompositor::Request,
        _data: &(),
        _handle: &DisplayHandle,
        data_init: &mut DataInit<'_, D>,
    ) {
        match request {
            wl_subcompositor::Request::GetSubsurface { id, surface, parent } => {
                if PrivateSurfaceData::is_ancestor(&surface, &parent) {
                    subcompositor.post_error(
                        wl_subcompositor::Error::BadParent,
                        "Parent is the surface itself or one of its descendants.",
                    );
                    return;
                }
                if let Err(AlreadyHasRole) = PrivateSurfaceData::set_parent(&surface, &parent) {
                    subcompositor.post_error(wl_subcompositor::Error::BadSurface, "Surface already has a role.");
                    return;
                }

                data_init.init(
                    id,
                    SubsurfaceUserData {
                        surface: surface.clone(),
                    },
                );

                PrivateSurfaceData::with_states(&surface, |states| {
                    states
                        .data_map
                        .get_or_insert(SubsurfaceState::new)
                        .sync
                        .store(true, Ordering::Release);
                });
                state.new_subsurface(&surface, &parent);
            }
            wl_subcompositor::Request::Destroy => {}
        }
    }
}

/*
 * wl_subsurface
 */

/// User data of WlSubsurface
#[derive(Debug)]
pub struct SubsurfaceUserData {
    surface: Resource<WlSurface>,
}

impl SubsurfaceUserData {
    /// The surface this subsurface object controls
    pub fn surface(&self) -> &Resource<WlSurface> {
        &self.surface
    }
}

/// The cached state associated with a subsurface
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SubsurfaceCachedState {
    /// Location of the top-left corner of this subsurface
    /// relative to its parent coordinate space
    pub location: Point<i32, Logical>,
}

impl Default for SubsurfaceCachedState {
    fn default() -> Self {
        SubsurfaceCachedState {
            location: (0, 0).into(),
        }
    }
}

impl Cacheable for SubsurfaceCachedState {
    fn commit(&mut self, _dh: &DisplayHandle) -> Self {
        *self
    }

    fn merge_into(self, into: &mut Self, _dh: &DisplayHandle) {
        into.location = self.location;
    }
}

#[derive(Debug)]
pub(crate) struct SubsurfaceState {
    pub(crate) sync: AtomicBool,
}

impl SubsurfaceState {
    fn new() -> SubsurfaceState {
        SubsurfaceState {
            sync: AtomicBool::new(true),
        }
    }

    pub(crate) fn is_sync(&self) -> bool {
        self.sync.load(Ordering::Acquire)
    }
}

fn set_sync(surface: &Resource<WlSurface>, sync: bool) {
    PrivateSurfaceData::with_states(surface, |state| {
        if let Some(subsurface) = state.data_map.get::<SubsurfaceState>() {
            subsurface.sync.store(sync, Ordering::Release);
        }
    });
}

impl<D> Dispatch<WlSubsurface, SubsurfaceUserData, D> for CompositorState
where
    D: Dispatch<WlSubsurface, SubsurfaceUserData>,
    D: CompositorHandler,
    D: 'static,
{
    fn request(
        _state: &mut D,
        _client: &Client,
        subsurface: &Resource<WlSubsurface>,
        request: wl_subsurface::Request,
        data: &SubsurfaceUserData,
        _handle: &DisplayHandle,
        _data_init: &mut DataInit<'_, D>,
    ) {
        match request {
            wl_subsurface::Request::SetPosition { x, y } => {
                PrivateSurfaceData::with_states(&data.surface, |state| {
                    state.cached_state.pending::<SubsurfaceCachedState>().location = (x, y).into();
                })
            }
            wl_subsurface::Request::PlaceAbove { sibling } => {
                if let Err(()) = PrivateSurfaceData::reorder(&data.surface, Location::After, &sibling) {
                    subsurface.post_error(
                        wl_subsurface::Error::BadSurface,
                        "Provided surface is not a sibling or parent.",
                    )
                }
            }
            wl_subsurface::Request::PlaceBelow { sibling } => {
                if let Err(()) = PrivateSurfaceData::reorder(&data.surface, Location::Before, &sibling) {
                    subsurface.post_error(
                        wl_subsurface::Error::BadSurface,
                        "Provided surface is not a sibling or parent.",
                    )
                }
            }
            wl_subsurface::Request::SetSync => set_sync(&data.surface, true),
            wl_subsurface::Request::SetDesync => set_sync(&data.surface, false),
            wl_subsurface::Request::Destroy => {
                // Our destructor already handles it
            }
        }
    }

    fn destroyed(_state: &mut D, _client: ClientId, _subsurface: &Resource<WlSubsurface>, data: &SubsurfaceUserData) {
        PrivateSurfaceData::unset_parent(&data.surface);
    }
}
