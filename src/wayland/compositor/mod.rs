//! Utilities for handling surfaces, subsurfaces and regions
//!
//! This module provides automatic handling of surfaces, subsurfaces
//! and region objects, by registering an implementation for
//! the `wl_compositor` and `wl_subcompositor` globals.
//!
//! ## Why use this implementation
//!
//! This implementation does a simple job: it stores in a coherent way the state of
//! surface trees with subsurfaces, to provide you a direct access to the tree
//! structure and all surface attributes, and handles the double-buffering
//! semantics of the surface state.
//!
//! As such, you can, given a root surface with a role requiring it to be displayed,
//! you can iterate over the whole tree of subsurfaces to recover all the metadata you
//! need to display the subsurface tree.
//!
//! This implementation will not do anything more than present you the metadata specified by the
//! client in a coherent and practical way, and tell you when the content of a surface changed
//! through the [`CompositorHandler`] notifications. All the logic regarding drawing itself, and
//! the positioning of windows (surface trees) one relative to another is out of its scope.
//!
//! ## How to use it
//!
//! ### Initialization
//!
//! To initialize this implementation create the [`CompositorState`], store it inside your `State`
//! struct and implement the [`CompositorHandler`], as shown in this example:
//!
//! ```no_run
//! use waystate::delegate_compositor;
//! use waystate::protocol::wl_surface::WlSurface;
//! use waystate::server::{Display, Resource};
//! use waystate::wayland::compositor::{CompositorState, CompositorHandler};
//!
//! # struct State { compositor_state: CompositorState }
//! let display = Display::<State>::new();
//!
//! // Create the compositor state
//! let compositor_state = CompositorState::new::<State>(&display.handle());
//!
//! // insert the CompositorState into your state
//! // ..
//!
//! // implement the necessary traits
//! impl CompositorHandler for State {
//!    fn compositor_state(&mut self) -> &mut CompositorState {
//!        &mut self.compositor_state
//!    }
//!
//!    fn commit(&mut self, surface: &Resource<WlSurface>) {
//!        // called every time the state of a surface is applied
//!    }
//! }
//! delegate_compositor!(State);
//! ```
//!
//! ### Use the surface states
//!
//! The surface state is held in the [`SurfaceData`] struct, which can be accessed with
//! [`with_states`]. It contains double-buffered states, whose pending part is filled by the
//! client requests and whose current part is updated on commit. The
//! [`SurfaceAttributes`] of `wl_surface` are one of them, other protocol modules add their own
//! [`Cacheable`] types to the same [`MultiCache`].
//!
//! Synchronized subsurfaces have their committed state cached until the state of their parent
//! is applied, after which their state is applied as well, parent first.

mod cache;
mod handlers;
mod tree;

use std::{any::Any, sync::Arc};

use tracing::trace;

pub use self::cache::{Cacheable, MultiCache};
pub use self::handlers::{RegionUserData, SubsurfaceCachedState, SubsurfaceUserData, SurfaceUserData};
pub use self::tree::{HookId, TraversalAction};
use self::tree::PrivateSurfaceData;

use crate::{
    protocol::{
        wl_buffer::WlBuffer,
        wl_callback::{self, WlCallback},
        wl_compositor::WlCompositor,
        wl_subcompositor::WlSubcompositor,
        wl_surface::WlSurface,
    },
    server::{DisplayHandle, GlobalDispatch, GlobalId, Interface, ObjectId, Resource},
    utils::{user_data::UserDataMap, Buffer, Logical, Point, Rectangle, Size, Transform},
};

/// The role of subsurfaces
pub const SUBSURFACE_ROLE: &str = "subsurface";

/// Description of a part of a surface that
/// should be considered damaged and needs to be redrawn
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Damage {
    /// A rectangle containing the damaged zone, in surface coordinates
    Surface(Rectangle<i32, Logical>),
    /// A rectangle containing the damaged zone, in buffer coordinates
    ///
    /// Note: Buffer scaling must be taken into consideration
    Buffer(Rectangle<i32, Buffer>),
}

/// New buffer assignation for a surface
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BufferAssignment {
    /// The surface no longer has a buffer attached to it
    Removed,
    /// A new buffer has been attached
    NewBuffer(Resource<WlBuffer>),
}

bitflags::bitflags! {
    /// Double-buffered fields of [`SurfaceAttributes`] the client set since the last commit
    #[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
    pub struct SurfaceDirty: u32 {
        /// A buffer was attached
        const BUFFER = 1;
        /// The buffer offset changed
        const OFFSET = 2;
        /// The buffer scale changed
        const SCALE = 4;
        /// The buffer transform changed
        const TRANSFORM = 8;
        /// The opaque region changed
        const OPAQUE_REGION = 16;
        /// The input region changed
        const INPUT_REGION = 32;
        /// Damage was posted
        const DAMAGE = 64;
        /// Frame callbacks were requested
        const FRAME_CALLBACKS = 128;
    }
}

/// General state associated with a surface
///
/// The fields of this struct represent double-buffered state: the pending instance is filled
/// by the client requests and merged into the current one on commit. Only the fields the client
/// actually set are carried over, as recorded by [`SurfaceAttributes::dirty`].
#[derive(Debug)]
pub struct SurfaceAttributes {
    /// Buffer defining the contents of the surface
    ///
    /// You are free to set this field to `None` to avoid processing it several
    /// times. It'll be set to `Some(...)` if the user attaches a buffer (or `NULL`) to
    /// the surface, and be left to `None` if the user does not attach anything.
    pub buffer: Option<BufferAssignment>,
    /// Location of the new buffer relative to the previous one
    ///
    /// The x and y arguments specify the location of the new pending buffer's upper left corner,
    /// relative to the current buffer's upper left corner, in surface-local coordinates.
    pub buffer_delta: Option<Point<i32, Logical>>,
    /// Scale of the contents of the buffer, for higher-resolution contents.
    pub buffer_scale: i32,
    /// Transform under which interpret the contents of the buffer
    pub buffer_transform: Transform,
    /// Region of the surface that is guaranteed to be opaque
    ///
    /// By default the whole surface is potentially transparent
    pub opaque_region: Option<RegionAttributes>,
    /// Region of the surface that is sensitive to user input
    ///
    /// By default the whole surface should be sensitive
    pub input_region: Option<RegionAttributes>,
    /// Damage rectangle
    ///
    /// Hint provided by the client to suggest that only this part
    /// of the surface was changed and needs to be redrawn
    pub damage: Vec<Damage>,
    /// The frame callbacks associated with this surface, in the order the client requested them
    ///
    /// They are fired by [`send_frame_done`].
    pub frame_callbacks: Vec<Resource<WlCallback>>,
    /// Fields set by the client since the last commit
    pub dirty: SurfaceDirty,
}

impl Default for SurfaceAttributes {
    fn default() -> SurfaceAttributes {
        SurfaceAttributes {
            buffer: None,
            buffer_delta: None,
            buffer_scale: 1,
            buffer_transform: Transform::Normal,
            opaque_region: None,
            input_region: None,
            damage: Vec::new(),
            frame_callbacks: Vec::new(),
            dirty: SurfaceDirty::empty(),
        }
    }
}

/// Kind of a rectangle part of a region
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum RectangleKind {
    /// This rectangle should be added to the region
    Add,
    /// The intersection of this rectangle with the region should
    /// be removed from the region
    Subtract,
}

/// Description of the contents of a region
///
/// A region is defined as an union and difference of rectangle.
///
/// This struct contains an ordered `Vec` containing the rectangles defining
/// a region. They should be added or subtracted in this order to compute the
/// actual contents of the region.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct RegionAttributes {
    /// List of rectangle part of this region
    pub rects: Vec<(RectangleKind, Rectangle<i32, Logical>)>,
}

impl RegionAttributes {
    /// Checks whether given point is inside the region.
    pub fn contains<P: Into<Point<i32, Logical>>>(&self, point: P) -> bool {
        let point: Point<i32, Logical> = point.into();
        let mut contains = false;
        for (kind, rect) in &self.rects {
            if rect.contains(point) {
                match kind {
                    RectangleKind::Add => contains = true,
                    RectangleKind::Subtract => contains = false,
                }
            }
        }
        contains
    }
}

/// Kinds of decoration effects a client can attach to a surface
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DecorationKind {
    /// Drop shadow
    Shadow,
    /// Background blur
    Blur,
    /// Slide animation
    Slide,
    /// Background contrast
    Contrast,
}

impl DecorationKind {
    fn bit(self) -> u8 {
        match self {
            DecorationKind::Shadow => 1,
            DecorationKind::Blur => 2,
            DecorationKind::Slide => 4,
            DecorationKind::Contrast => 8,
        }
    }
}

/// Double-buffered handles to the decoration objects attached to a surface
///
/// Protocol extensions providing decoration effects record their objects here with
/// [`set_pending_decoration`], they take effect on the next commit of the surface.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct DecorationHandles {
    /// Shadow object
    pub shadow: Option<ObjectId>,
    /// Blur object
    pub blur: Option<ObjectId>,
    /// Slide object
    pub slide: Option<ObjectId>,
    /// Contrast object
    pub contrast: Option<ObjectId>,
    changed: u8,
}

impl DecorationHandles {
    /// The handle of a given kind
    pub fn get(&self, kind: DecorationKind) -> Option<ObjectId> {
        match kind {
            DecorationKind::Shadow => self.shadow,
            DecorationKind::Blur => self.blur,
            DecorationKind::Slide => self.slide,
            DecorationKind::Contrast => self.contrast,
        }
    }

    fn slot(&mut self, kind: DecorationKind) -> &mut Option<ObjectId> {
        match kind {
            DecorationKind::Shadow => &mut self.shadow,
            DecorationKind::Blur => &mut self.blur,
            DecorationKind::Slide => &mut self.slide,
            DecorationKind::Contrast => &mut self.contrast,
        }
    }
}

const DECORATION_KINDS: [DecorationKind; 4] = [
    DecorationKind::Shadow,
    DecorationKind::Blur,
    DecorationKind::Slide,
    DecorationKind::Contrast,
];

impl Cacheable for DecorationHandles {
    fn commit(&mut self, _dh: &DisplayHandle) -> Self {
        let mut update = self.clone();
        update.changed = std::mem::take(&mut self.changed);
        update
    }

    fn merge_into(self, into: &mut Self, _dh: &DisplayHandle) {
        for kind in DECORATION_KINDS {
            if self.changed & kind.bit() != 0 {
                *into.slot(kind) = self.get(kind);
            }
        }
    }
}

/// Set or clear the pending decoration handle of a given kind
///
/// The change takes effect on the next commit of the surface.
pub fn set_pending_decoration(surface: &Resource<WlSurface>, kind: DecorationKind, handle: Option<ObjectId>) {
    with_states(surface, |states| {
        let mut pending = states.cached_state.pending::<DecorationHandles>();
        *pending.slot(kind) = handle;
        pending.changed |= kind.bit();
    });
}

/// Data associated with a surface
#[derive(Debug)]
pub struct SurfaceData {
    /// The current role of the surface
    ///
    /// If `None` if the surface has not yet been assigned a role
    pub role: Option<&'static str>,
    /// The non-buffered typemap storage of this surface
    pub data_map: UserDataMap,
    /// The double-buffered typemap storage of this surface
    pub cached_state: MultiCache,
}

/// The surface already has a different role
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("The surface already has a role.")]
pub struct AlreadyHasRole;

/// Handler trait for the compositor
///
/// Apart from [`CompositorHandler::commit`], every notification has an empty default
/// implementation.
pub trait CompositorHandler {
    /// [CompositorState] getter
    fn compositor_state(&mut self) -> &mut CompositorState;

    /// The state of a surface was applied
    ///
    /// This is invoked after every commit that applied state, including the application of the
    /// cached state of synchronized subsurfaces when their parent commits.
    fn commit(&mut self, surface: &Resource<WlSurface>);

    /// A new surface was created
    fn new_surface(&mut self, _surface: &Resource<WlSurface>) {}

    /// A surface became the subsurface of `parent`
    fn new_subsurface(&mut self, _surface: &Resource<WlSurface>, _parent: &Resource<WlSurface>) {}

    /// Some part of the surface content changed, in surface-local coordinates
    fn damaged(&mut self, _surface: &Resource<WlSurface>, _damage: &[Rectangle<i32, Logical>]) {}

    /// The surface got content for the first time since it was created or unmapped
    fn mapped(&mut self, _surface: &Resource<WlSurface>) {}

    /// The surface lost its content
    fn unmapped(&mut self, _surface: &Resource<WlSurface>) {}

    /// The surface size changed, `None` means it has no content
    fn size_changed(&mut self, _surface: &Resource<WlSurface>, _size: Option<Size<i32, Logical>>) {}

    /// The surface was destroyed
    fn destroyed(&mut self, _surface: &Resource<WlSurface>) {}
}

/// Access the states associated to this surface
pub fn with_states<F, T>(surface: &Resource<WlSurface>, f: F) -> T
where
    F: FnOnce(&SurfaceData) -> T,
{
    PrivateSurfaceData::with_states(surface, f)
}

/// Retrieve the parent of this surface
///
/// Returns `None` is this surface is a root surface
pub fn get_parent(surface: &Resource<WlSurface>) -> Option<Resource<WlSurface>> {
    PrivateSurfaceData::get_parent(surface)
}

/// Retrieve the children of this surface, bottom-most first
pub fn get_children(surface: &Resource<WlSurface>) -> Vec<Resource<WlSurface>> {
    PrivateSurfaceData::get_children(surface)
}

/// Check if this subsurface is a synchronized subsurface
///
/// This is the case if it was set to sync or if one of its ancestors is synchronized.
pub fn is_sync_subsurface(surface: &Resource<WlSurface>) -> bool {
    tree::is_effectively_sync(surface)
}

/// Get the current role of this surface
pub fn get_role(surface: &Resource<WlSurface>) -> Option<&'static str> {
    PrivateSurfaceData::get_role(surface)
}

/// Register that this surface has given role
///
/// Fails if the surface already has a different role.
pub fn give_role(surface: &Resource<WlSurface>, role: &'static str) -> Result<(), AlreadyHasRole> {
    PrivateSurfaceData::give_role(surface, role)
}

/// Whether the surface currently displays content
pub fn is_mapped(surface: &Resource<WlSurface>) -> bool {
    PrivateSurfaceData::is_mapped(surface)
}

/// Size of the surface in logical coordinates, `None` if it has no content
pub fn surface_size(surface: &Resource<WlSurface>) -> Option<Size<i32, Logical>> {
    PrivateSurfaceData::surface_size(surface)
}

/// Access the data of a surface tree from top to bottom
///
/// The provided closure is called successively on the surface and all its child subsurfaces,
/// in a depth-first order. This matches the reverse of the order in which the surfaces are
/// supposed to be drawn: top-most first.
///
/// The arguments provided to the closure are, in this order:
///
/// - The surface object itself
/// - a reference to its surface data
/// - a custom value that is passed in a fold-like manner, but only from the output of a parent
///   to its children. See [`TraversalAction`] for details.
pub fn with_surface_tree_downward<F, T>(surface: &Resource<WlSurface>, initial: T, mut f: F)
where
    F: FnMut(&Resource<WlSurface>, &SurfaceData, &T) -> TraversalAction<T>,
{
    PrivateSurfaceData::map_tree(surface, &initial, &mut f);
}

/// Register a hook to be invoked on surface commit, before the state is applied
///
/// The hook runs for every commit, including the ones of synchronized subsurfaces whose state
/// is only cached. A hook may post a protocol error, in which case the commit is aborted.
pub fn add_pre_commit_hook<D, F>(surface: &Resource<WlSurface>, hook: F) -> HookId
where
    D: 'static,
    F: Fn(&mut D, &DisplayHandle, &Resource<WlSurface>) + Send + Sync + 'static,
{
    let hook = move |state: &mut dyn Any, dh: &DisplayHandle, surface: &Resource<WlSurface>| {
        if let Some(state) = state.downcast_mut::<D>() {
            hook(state, dh, surface);
        }
    };
    PrivateSurfaceData::add_pre_commit_hook(surface, Arc::new(hook))
}

/// Register a hook to be invoked after the state of the surface was applied
pub fn add_post_commit_hook<D, F>(surface: &Resource<WlSurface>, hook: F) -> HookId
where
    D: 'static,
    F: Fn(&mut D, &DisplayHandle, &Resource<WlSurface>) + Send + Sync + 'static,
{
    let hook = move |state: &mut dyn Any, dh: &DisplayHandle, surface: &Resource<WlSurface>| {
        if let Some(state) = state.downcast_mut::<D>() {
            hook(state, dh, surface);
        }
    };
    PrivateSurfaceData::add_post_commit_hook(surface, Arc::new(hook))
}

/// Register a hook to be invoked when the surface is destroyed
pub fn add_destruction_hook<D, F>(surface: &Resource<WlSurface>, hook: F) -> HookId
where
    D: 'static,
    F: Fn(&mut D, &Resource<WlSurface>) + Send + Sync + 'static,
{
    let hook = move |state: &mut dyn Any, surface: &Resource<WlSurface>| {
        if let Some(state) = state.downcast_mut::<D>() {
            hook(state, surface);
        }
    };
    PrivateSurfaceData::add_destruction_hook(surface, Arc::new(hook))
}

/// Unregister a hook
pub fn remove_hook(surface: &Resource<WlSurface>, hook_id: HookId) {
    PrivateSurfaceData::remove_hook(surface, hook_id)
}

/// Fire the frame callbacks of a surface
///
/// The callbacks are answered in the order the client requested them, with the given timestamp
/// in milliseconds, and removed from the surface state.
pub fn send_frame_done(dh: &DisplayHandle, surface: &Resource<WlSurface>, time: u32) {
    let callbacks = with_states(surface, |states| {
        std::mem::take(&mut states.cached_state.current::<SurfaceAttributes>().frame_callbacks)
    });
    trace!(surface = ?surface, count = callbacks.len(), "sending frame callbacks");
    for callback in callbacks {
        callback.send_event(wl_callback::Event::Done { callback_data: time });
        dh.destroy_object(callback.id());
    }
}

pub(crate) fn buffer_destroyed(surface: &Resource<WlSurface>, buffer: &Resource<WlBuffer>) {
    PrivateSurfaceData::buffer_destroyed(surface, buffer)
}

/// State of the compositor
#[derive(Debug)]
pub struct CompositorState {
    compositor: GlobalId,
    subcompositor: GlobalId,
}

impl CompositorState {
    /// Create new `wl_compositor` and `wl_subcompositor` globals, at the newest supported
    /// version.
    pub fn new<D>(display: &DisplayHandle) -> Self
    where
        D: GlobalDispatch<WlCompositor, ()> + GlobalDispatch<WlSubcompositor, ()> + 'static,
    {
        Self::new_with_version::<D>(display, WlCompositor::VERSION)
    }

    /// Create new `wl_compositor` version `version` and `wl_subcompositor` globals.
    ///
    /// # Panics
    ///
    /// Panics if `version` is higher than the version supported by this crate.
    pub fn new_with_version<D>(display: &DisplayHandle, version: u32) -> Self
    where
        D: GlobalDispatch<WlCompositor, ()> + GlobalDispatch<WlSubcompositor, ()> + 'static,
    {
        let compositor = display.create_global::<D, WlCompositor, ()>(version, ());
        let subcompositor = display.create_global::<D, WlSubcompositor, ()>(1, ());

        CompositorState {
            compositor,
            subcompositor,
        }
    }

    /// Get id of compositor global
    pub fn compositor_global(&self) -> GlobalId {
        self.compositor
    }

    /// Get id of subcompositor global
    pub fn subcompositor_global(&self) -> GlobalId {
        self.subcompositor
    }
}

/// Macro to delegate implementation of the compositor protocols to [`CompositorState`].
///
/// You must also implement [`CompositorHandler`] to use this.
#[macro_export]
macro_rules! delegate_compositor {
    ($ty: ty) => {
        $crate::delegate_global_dispatch!($ty: [$crate::protocol::wl_compositor::WlCompositor: ()] => $crate::wayland::compositor::CompositorState);
        $crate::delegate_dispatch!($ty: [$crate::protocol::wl_compositor::WlCompositor: ()] => $crate::wayland::compositor::CompositorState);
        $crate::delegate_dispatch!($ty: [$crate::protocol::wl_surface::WlSurface: $crate::wayland::compositor::SurfaceUserData] => $crate::wayland::compositor::CompositorState);
        $crate::delegate_dispatch!($ty: [$crate::protocol::wl_region::WlRegion: $crate::wayland::compositor::RegionUserData] => $crate::wayland::compositor::CompositorState);
        $crate::delegate_global_dispatch!($ty: [$crate::protocol::wl_subcompositor::WlSubcompositor: ()] => $crate::wayland::compositor::CompositorState);
        $crate::delegate_dispatch!($ty: [$crate::protocol::wl_subcompositor::WlSubcompositor: ()] => $crate::wayland::compositor::CompositorState);
        $crate::delegate_dispatch!($ty: [$crate::protocol::wl_subsurface::WlSubsurface: $crate::wayland::compositor::SubsurfaceUserData] => $crate::wayland::compositor::CompositorState);
    };
}
