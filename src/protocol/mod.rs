//! Typed protocol definitions
//!
//! Every interface is a module holding a marker type implementing
//! [`Interface`](crate::server::Interface), the `Request` and `Event` enums of the interface and
//! its error codes. Requests reference other objects as [`Resource`](crate::server::Resource)s
//! and carry the ids of objects they create as [`New`](crate::server::New) handles, in the shape
//! a transport produces once it has decoded a message.
//!
//! Enumerated arguments whose validity must be checked by the server (positioner anchors,
//! resize edges, action masks, scales) are left as raw integers in the requests.

macro_rules! interface {
    ($marker:ident, $name:literal, $version:literal $(, destructor: $destructor:pat)?) => {
        #[doc = concat!("Marker type of the `", $name, "` interface")]
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
        pub struct $marker;

        impl $crate::server::Interface for $marker {
            const NAME: &'static str = $name;
            const VERSION: u32 = $version;
            type Request = Request;
            type Event = Event;

            #[allow(unused_variables)]
            fn is_destructor(request: &Request) -> bool {
                false $(|| matches!(request, $destructor))?
            }
        }
    };
}

macro_rules! error_code {
    ($error:ty) => {
        impl From<$error> for u32 {
            fn from(error: $error) -> u32 {
                error as u32
            }
        }
    };
}

mod wayland;
mod xdg;

pub use self::wayland::{
    wl_buffer, wl_callback, wl_compositor, wl_data_device, wl_data_device_manager, wl_data_offer,
    wl_data_source, wl_display, wl_keyboard, wl_pointer, wl_region, wl_registry, wl_seat, wl_subcompositor,
    wl_subsurface, wl_surface, wl_touch,
};
pub use self::xdg::{xdg_popup, xdg_positioner, xdg_surface, xdg_toplevel, xdg_wm_base, zxdg_shell_v6};
