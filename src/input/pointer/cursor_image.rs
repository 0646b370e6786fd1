use std::sync::Mutex;

use crate::{
    protocol::wl_surface::WlSurface,
    server::Resource,
    utils::{Logical, Point},
};

/// The role representing a surface set as the pointer cursor
pub const CURSOR_IMAGE_ROLE: &str = "cursor_image";

/// Attributes of a surface with the cursor image role
///
/// ```no_run
/// # use waystate::wayland::compositor;
/// use waystate::input::pointer::CursorImageAttributes;
/// use std::sync::Mutex;
///
/// # let wl_surface: waystate::server::Resource<waystate::protocol::wl_surface::WlSurface> = todo!();
/// compositor::with_states(&wl_surface, |states| {
///     let hotspot = states
///         .data_map
///         .get::<Mutex<CursorImageAttributes>>()
///         .map(|attrs| attrs.lock().unwrap().hotspot);
/// });
/// ```
#[derive(Debug, Default, Copy, Clone, PartialEq, Eq)]
pub struct CursorImageAttributes {
    /// Location of the hotspot of the pointer in the surface
    pub hotspot: Point<i32, Logical>,
}

/// Possible status of a cursor as requested by clients
#[derive(Debug, Clone, PartialEq)]
pub enum CursorImageStatus {
    /// The cursor should be hidden
    Hidden,
    /// The compositor should draw its cursor
    Default,
    /// The cursor should be drawn using this surface as an image
    Surface(Resource<WlSurface>),
}

pub(crate) type CursorImageSurfaceData = Mutex<CursorImageAttributes>;
