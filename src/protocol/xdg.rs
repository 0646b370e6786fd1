//! Desktop shell interfaces
//!
//! Both the stable `xdg_wm_base` and the unstable `zxdg_shell_v6` globals create objects of the
//! same sub-interfaces, the variant being recorded in the data of each object.

#![allow(missing_docs)]

pub mod xdg_wm_base {
    use super::{xdg_positioner::XdgPositioner, xdg_surface::XdgSurface};
    use crate::{
        protocol::wl_surface::WlSurface,
        server::{New, Resource},
    };

    interface!(XdgWmBase, "xdg_wm_base", 5, destructor: Request::Destroy);

    #[derive(Debug)]
    pub enum Request {
        Destroy,
        CreatePositioner {
            id: New<XdgPositioner>,
        },
        GetXdgSurface {
            id: New<XdgSurface>,
            surface: Resource<WlSurface>,
        },
        Pong {
            serial: u32,
        },
    }

    #[derive(Debug)]
    pub enum Event {
        Ping { serial: u32 },
    }

    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    #[repr(u32)]
    pub enum Error {
        Role = 0,
        DefunctSurfaces = 1,
        NotTheTopmostPopup = 2,
        InvalidPopupParent = 3,
        InvalidSurfaceState = 4,
        InvalidPositioner = 5,
        Unresponsive = 6,
    }
    error_code!(Error);
}

/// The unstable v6 shell, sharing its requests and events with `xdg_wm_base`
pub mod zxdg_shell_v6 {
    pub use super::xdg_wm_base::{Error, Event, Request};

    interface!(ZxdgShellV6, "zxdg_shell_v6", 1, destructor: Request::Destroy);
}

pub mod xdg_positioner {
    interface!(XdgPositioner, "xdg_positioner", 5, destructor: Request::Destroy);

    /// Positioner requests
    ///
    /// `anchor`, `gravity` and `constraint_adjustment` are kept raw: their decoding depends on
    /// the shell variant the positioner was created from.
    #[derive(Debug)]
    pub enum Request {
        Destroy,
        SetSize {
            width: i32,
            height: i32,
        },
        SetAnchorRect {
            x: i32,
            y: i32,
            width: i32,
            height: i32,
        },
        SetAnchor {
            anchor: u32,
        },
        SetGravity {
            gravity: u32,
        },
        SetConstraintAdjustment {
            constraint_adjustment: u32,
        },
        SetOffset {
            x: i32,
            y: i32,
        },
        SetReactive,
        SetParentSize {
            parent_width: i32,
            parent_height: i32,
        },
        SetParentConfigure {
            serial: u32,
        },
    }

    #[derive(Debug)]
    pub enum Event {}

    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    #[repr(u32)]
    pub enum Error {
        InvalidInput = 0,
    }
    error_code!(Error);
}

pub mod xdg_surface {
    use super::{xdg_popup::XdgPopup, xdg_positioner::XdgPositioner, xdg_toplevel::XdgToplevel};
    use crate::server::{New, Resource};

    interface!(XdgSurface, "xdg_surface", 5, destructor: Request::Destroy);

    #[derive(Debug)]
    pub enum Request {
        Destroy,
        GetToplevel {
            id: New<XdgToplevel>,
        },
        GetPopup {
            id: New<XdgPopup>,
            parent: Option<Resource<XdgSurface>>,
            positioner: Resource<XdgPositioner>,
        },
        SetWindowGeometry {
            x: i32,
            y: i32,
            width: i32,
            height: i32,
        },
        AckConfigure {
            serial: u32,
        },
    }

    #[derive(Debug)]
    pub enum Event {
        Configure { serial: u32 },
    }

    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    #[repr(u32)]
    pub enum Error {
        NotConstructed = 1,
        AlreadyConstructed = 2,
        UnconfiguredBuffer = 3,
        InvalidSerial = 4,
        InvalidSize = 5,
        DefunctRoleObject = 6,
    }
    error_code!(Error);
}

pub mod xdg_toplevel {
    use crate::{
        protocol::wl_seat::WlSeat,
        server::Resource,
    };

    interface!(XdgToplevel, "xdg_toplevel", 5, destructor: Request::Destroy);

    #[derive(Debug)]
    pub enum Request {
        Destroy,
        SetParent {
            parent: Option<Resource<XdgToplevel>>,
        },
        SetTitle {
            title: String,
        },
        SetAppId {
            app_id: String,
        },
        ShowWindowMenu {
            seat: Resource<WlSeat>,
            serial: u32,
            x: i32,
            y: i32,
        },
        Move {
            seat: Resource<WlSeat>,
            serial: u32,
        },
        Resize {
            seat: Resource<WlSeat>,
            serial: u32,
            edges: u32,
        },
        SetMaxSize {
            width: i32,
            height: i32,
        },
        SetMinSize {
            width: i32,
            height: i32,
        },
        SetMaximized,
        UnsetMaximized,
        SetFullscreen,
        UnsetFullscreen,
        SetMinimized,
    }

    #[derive(Debug)]
    pub enum Event {
        Configure { width: i32, height: i32, states: Vec<u32> },
        Close,
        ConfigureBounds { width: i32, height: i32 },
        WmCapabilities { capabilities: Vec<u32> },
    }

    /// States a toplevel can be configured with
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    #[repr(u32)]
    pub enum State {
        Maximized = 1,
        Fullscreen = 2,
        Resizing = 3,
        Activated = 4,
        TiledLeft = 5,
        TiledRight = 6,
        TiledTop = 7,
        TiledBottom = 8,
        Suspended = 9,
    }

    impl State {
        /// Oldest version of the interface supporting this state
        pub fn since(&self) -> u32 {
            match self {
                State::TiledLeft | State::TiledRight | State::TiledTop | State::TiledBottom => 2,
                State::Suspended => 6,
                _ => 1,
            }
        }
    }

    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    #[repr(u32)]
    pub enum WmCapabilities {
        WindowMenu = 1,
        Maximize = 2,
        Fullscreen = 3,
        Minimize = 4,
    }

    /// Edge being dragged by an interactive resize
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    #[repr(u32)]
    pub enum ResizeEdge {
        None = 0,
        Top = 1,
        Bottom = 2,
        Left = 4,
        TopLeft = 5,
        BottomLeft = 6,
        Right = 8,
        TopRight = 9,
        BottomRight = 10,
    }

    impl TryFrom<u32> for ResizeEdge {
        type Error = ();

        fn try_from(value: u32) -> Result<Self, ()> {
            Ok(match value {
                0 => ResizeEdge::None,
                1 => ResizeEdge::Top,
                2 => ResizeEdge::Bottom,
                4 => ResizeEdge::Left,
                5 => ResizeEdge::TopLeft,
                6 => ResizeEdge::BottomLeft,
                8 => ResizeEdge::Right,
                9 => ResizeEdge::TopRight,
                10 => ResizeEdge::BottomRight,
                _ => return Err(()),
            })
        }
    }

    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    #[repr(u32)]
    pub enum Error {
        InvalidResizeEdge = 0,
        InvalidParent = 1,
        InvalidSize = 2,
    }
    error_code!(Error);
}

pub mod xdg_popup {
    use super::xdg_positioner::XdgPositioner;
    use crate::{protocol::wl_seat::WlSeat, server::Resource};

    interface!(XdgPopup, "xdg_popup", 5, destructor: Request::Destroy);

    #[derive(Debug)]
    pub enum Request {
        Destroy,
        Grab {
            seat: Resource<WlSeat>,
            serial: u32,
        },
        Reposition {
            positioner: Resource<XdgPositioner>,
            token: u32,
        },
    }

    #[derive(Debug)]
    pub enum Event {
        Configure {
            x: i32,
            y: i32,
            width: i32,
            height: i32,
        },
        PopupDone,
        Repositioned {
            token: u32,
        },
    }

    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    #[repr(u32)]
    pub enum Error {
        InvalidGrab = 0,
    }
    error_code!(Error);
}
