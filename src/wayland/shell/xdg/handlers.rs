mod wm_base;
pub use wm_base::XdgWmBaseUserData;

mod positioner;
pub use positioner::XdgPositionerUserData;

mod surface;
pub use surface::{XdgShellSurfaceUserData, XdgSurfaceUserData};
