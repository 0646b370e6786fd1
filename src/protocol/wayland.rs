//! Core interfaces

#![allow(missing_docs, non_upper_case_globals)]

/// The connection singleton, always protocol id 1
pub mod wl_display {
    use super::{wl_callback::WlCallback, wl_registry::WlRegistry};
    use crate::server::New;

    interface!(WlDisplay, "wl_display", 1);

    #[derive(Debug)]
    pub enum Request {
        Sync { callback: New<WlCallback> },
        GetRegistry { registry: New<WlRegistry> },
    }

    #[derive(Debug)]
    pub enum Event {
        Error { object_id: u32, code: u32, message: String },
        DeleteId { id: u32 },
    }

    /// Global error codes
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    #[repr(u32)]
    pub enum Error {
        InvalidObject = 0,
        InvalidMethod = 1,
        NoMemory = 2,
        Implementation = 3,
    }
    error_code!(Error);
}

/// Global advertisement and binding
pub mod wl_registry {
    interface!(WlRegistry, "wl_registry", 1);

    #[derive(Debug)]
    pub enum Request {
        /// Bind a global, the new object has the id `id`
        Bind {
            name: u32,
            interface: String,
            version: u32,
            id: u32,
        },
    }

    #[derive(Debug)]
    pub enum Event {
        Global { name: u32, interface: String, version: u32 },
        GlobalRemove { name: u32 },
    }
}

pub mod wl_callback {
    interface!(WlCallback, "wl_callback", 1);

    #[derive(Debug)]
    pub enum Request {}

    #[derive(Debug)]
    pub enum Event {
        Done { callback_data: u32 },
    }
}

pub mod wl_compositor {
    use super::{wl_region::WlRegion, wl_surface::WlSurface};
    use crate::server::New;

    interface!(WlCompositor, "wl_compositor", 6);

    #[derive(Debug)]
    pub enum Request {
        CreateSurface { id: New<WlSurface> },
        CreateRegion { id: New<WlRegion> },
    }

    #[derive(Debug)]
    pub enum Event {}
}

pub mod wl_surface {
    use super::{wl_buffer::WlBuffer, wl_callback::WlCallback, wl_region::WlRegion};
    use crate::server::{New, Resource};

    interface!(WlSurface, "wl_surface", 6, destructor: Request::Destroy);

    #[derive(Debug)]
    pub enum Request {
        Destroy,
        Attach {
            buffer: Option<Resource<WlBuffer>>,
            x: i32,
            y: i32,
        },
        Damage {
            x: i32,
            y: i32,
            width: i32,
            height: i32,
        },
        Frame {
            callback: New<WlCallback>,
        },
        SetOpaqueRegion {
            region: Option<Resource<WlRegion>>,
        },
        SetInputRegion {
            region: Option<Resource<WlRegion>>,
        },
        Commit,
        SetBufferTransform {
            transform: i32,
        },
        SetBufferScale {
            scale: i32,
        },
        DamageBuffer {
            x: i32,
            y: i32,
            width: i32,
            height: i32,
        },
        Offset {
            x: i32,
            y: i32,
        },
    }

    #[derive(Debug)]
    pub enum Event {
        PreferredBufferScale { factor: i32 },
        PreferredBufferTransform { transform: u32 },
    }

    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    #[repr(u32)]
    pub enum Error {
        InvalidScale = 0,
        InvalidTransform = 1,
        InvalidSize = 2,
        InvalidOffset = 3,
        DefunctRoleObject = 4,
    }
    error_code!(Error);
}

pub mod wl_region {
    interface!(WlRegion, "wl_region", 1, destructor: Request::Destroy);

    #[derive(Debug)]
    pub enum Request {
        Destroy,
        Add { x: i32, y: i32, width: i32, height: i32 },
        Subtract { x: i32, y: i32, width: i32, height: i32 },
    }

    #[derive(Debug)]
    pub enum Event {}
}

pub mod wl_buffer {
    interface!(WlBuffer, "wl_buffer", 1, destructor: Request::Destroy);

    #[derive(Debug)]
    pub enum Request {
        Destroy,
    }

    #[derive(Debug)]
    pub enum Event {
        Release,
    }
}

pub mod wl_subcompositor {
    use super::{wl_subsurface::WlSubsurface, wl_surface::WlSurface};
    use crate::server::{New, Resource};

    interface!(WlSubcompositor, "wl_subcompositor", 1, destructor: Request::Destroy);

    #[derive(Debug)]
    pub enum Request {
        Destroy,
        GetSubsurface {
            id: New<WlSubsurface>,
            surface: Resource<WlSurface>,
            parent: Resource<WlSurface>,
        },
    }

    #[derive(Debug)]
    pub enum Event {}

    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    #[repr(u32)]
    pub enum Error {
        BadSurface = 0,
        BadParent = 1,
    }
    error_code!(Error);
}

pub mod wl_subsurface {
    use super::wl_surface::WlSurface;
    use crate::server::Resource;

    interface!(WlSubsurface, "wl_subsurface", 1, destructor: Request::Destroy);

    #[derive(Debug)]
    pub enum Request {
        Destroy,
        SetPosition { x: i32, y: i32 },
        PlaceAbove { sibling: Resource<WlSurface> },
        PlaceBelow { sibling: Resource<WlSurface> },
        SetSync,
        SetDesync,
    }

    #[derive(Debug)]
    pub enum Event {}

    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    #[repr(u32)]
    pub enum Error {
        BadSurface = 0,
    }
    error_code!(Error);
}

pub mod wl_seat {
    use super::{wl_keyboard::WlKeyboard, wl_pointer::WlPointer, wl_touch::WlTouch};
    use crate::server::New;

    interface!(WlSeat, "wl_seat", 7, destructor: Request::Release);

    #[derive(Debug)]
    pub enum Request {
        GetPointer { id: New<WlPointer> },
        GetKeyboard { id: New<WlKeyboard> },
        GetTouch { id: New<WlTouch> },
        Release,
    }

    #[derive(Debug)]
    pub enum Event {
        Capabilities { capabilities: Capability },
        Name { name: String },
    }

    bitflags::bitflags! {
        /// Input device classes of a seat
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
        pub struct Capability: u32 {
            const Pointer = 1;
            const Keyboard = 2;
            const Touch = 4;
        }
    }

    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    #[repr(u32)]
    pub enum Error {
        MissingCapability = 0,
    }
    error_code!(Error);
}

pub mod wl_pointer {
    use super::wl_surface::WlSurface;
    use crate::server::Resource;

    interface!(WlPointer, "wl_pointer", 7, destructor: Request::Release);

    #[derive(Debug)]
    pub enum Request {
        SetCursor {
            serial: u32,
            surface: Option<Resource<WlSurface>>,
            hotspot_x: i32,
            hotspot_y: i32,
        },
        Release,
    }

    #[derive(Debug)]
    pub enum Event {
        Enter {
            serial: u32,
            surface: Resource<WlSurface>,
            surface_x: f64,
            surface_y: f64,
        },
        Leave {
            serial: u32,
            surface: Resource<WlSurface>,
        },
        Motion {
            time: u32,
            surface_x: f64,
            surface_y: f64,
        },
        Button {
            serial: u32,
            time: u32,
            button: u32,
            state: ButtonState,
        },
        Axis {
            time: u32,
            axis: Axis,
            value: f64,
        },
        Frame,
    }

    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub enum ButtonState {
        Released = 0,
        Pressed = 1,
    }

    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub enum Axis {
        VerticalScroll = 0,
        HorizontalScroll = 1,
    }

    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    #[repr(u32)]
    pub enum Error {
        Role = 0,
    }
    error_code!(Error);
}

pub mod wl_keyboard {
    use super::wl_surface::WlSurface;
    use crate::server::Resource;

    interface!(WlKeyboard, "wl_keyboard", 7, destructor: Request::Release);

    #[derive(Debug)]
    pub enum Request {
        Release,
    }

    #[derive(Debug)]
    pub enum Event {
        Enter {
            serial: u32,
            surface: Resource<WlSurface>,
            keys: Vec<u32>,
        },
        Leave {
            serial: u32,
            surface: Resource<WlSurface>,
        },
        Key {
            serial: u32,
            time: u32,
            key: u32,
            state: KeyState,
        },
        Modifiers {
            serial: u32,
            mods_depressed: u32,
            mods_latched: u32,
            mods_locked: u32,
            group: u32,
        },
        RepeatInfo {
            rate: i32,
            delay: i32,
        },
    }

    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub enum KeyState {
        Released = 0,
        Pressed = 1,
    }
}

pub mod wl_touch {
    use super::wl_surface::WlSurface;
    use crate::server::Resource;

    interface!(WlTouch, "wl_touch", 7, destructor: Request::Release);

    #[derive(Debug)]
    pub enum Request {
        Release,
    }

    #[derive(Debug)]
    pub enum Event {
        Down {
            serial: u32,
            time: u32,
            surface: Resource<WlSurface>,
            id: i32,
            x: f64,
            y: f64,
        },
        Up {
            serial: u32,
            time: u32,
            id: i32,
        },
        Motion {
            time: u32,
            id: i32,
            x: f64,
            y: f64,
        },
        Frame,
        Cancel,
    }
}

pub mod wl_data_device_manager {
    use super::{wl_data_device::WlDataDevice, wl_data_source::WlDataSource, wl_seat::WlSeat};
    use crate::server::{New, Resource};

    interface!(WlDataDeviceManager, "wl_data_device_manager", 3);

    #[derive(Debug)]
    pub enum Request {
        CreateDataSource {
            id: New<WlDataSource>,
        },
        GetDataDevice {
            id: New<WlDataDevice>,
            seat: Resource<WlSeat>,
        },
    }

    #[derive(Debug)]
    pub enum Event {}

    bitflags::bitflags! {
        /// Drag-and-drop actions
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
        pub struct DndAction: u32 {
            const Copy = 1;
            const Move = 2;
            const Ask = 4;
        }
    }
}

pub mod wl_data_source {
    use std::os::unix::io::OwnedFd;

    use super::wl_data_device_manager::DndAction;

    interface!(WlDataSource, "wl_data_source", 3, destructor: Request::Destroy);

    #[derive(Debug)]
    pub enum Request {
        Offer { mime_type: String },
        Destroy,
        SetActions { dnd_actions: u32 },
    }

    #[derive(Debug)]
    pub enum Event {
        Target { mime_type: Option<String> },
        Send { mime_type: String, fd: OwnedFd },
        Cancelled,
        DndDropPerformed,
        DndFinished,
        Action { dnd_action: DndAction },
    }

    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    #[repr(u32)]
    pub enum Error {
        InvalidActionMask = 0,
        InvalidSource = 1,
    }
    error_code!(Error);
}

pub mod wl_data_device {
    use super::{wl_data_offer::WlDataOffer, wl_data_source::WlDataSource, wl_surface::WlSurface};
    use crate::server::Resource;

    interface!(WlDataDevice, "wl_data_device", 3, destructor: Request::Release);

    #[derive(Debug)]
    pub enum Request {
        StartDrag {
            source: Option<Resource<WlDataSource>>,
            origin: Resource<WlSurface>,
            icon: Option<Resource<WlSurface>>,
            serial: u32,
        },
        SetSelection {
            source: Option<Resource<WlDataSource>>,
            serial: u32,
        },
        Release,
    }

    #[derive(Debug)]
    pub enum Event {
        /// Introduces a new server-created offer
        DataOffer {
            id: Resource<WlDataOffer>,
        },
        Enter {
            serial: u32,
            surface: Resource<WlSurface>,
            x: f64,
            y: f64,
            id: Option<Resource<WlDataOffer>>,
        },
        Leave,
        Motion {
            time: u32,
            x: f64,
            y: f64,
        },
        Drop,
        Selection {
            id: Option<Resource<WlDataOffer>>,
        },
    }

    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    #[repr(u32)]
    pub enum Error {
        Role = 0,
    }
    error_code!(Error);
}

pub mod wl_data_offer {
    use std::os::unix::io::OwnedFd;

    use super::wl_data_device_manager::DndAction;

    interface!(WlDataOffer, "wl_data_offer", 3, destructor: Request::Destroy);

    #[derive(Debug)]
    pub enum Request {
        Accept { serial: u32, mime_type: Option<String> },
        Receive { mime_type: String, fd: OwnedFd },
        Destroy,
        Finish,
        SetActions { dnd_actions: u32, preferred_action: u32 },
    }

    #[derive(Debug)]
    pub enum Event {
        Offer { mime_type: String },
        SourceActions { source_actions: DndAction },
        Action { dnd_action: DndAction },
    }

    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    #[repr(u32)]
    pub enum Error {
        InvalidFinish = 0,
        InvalidActionMask = 1,
        InvalidAction = 2,
        InvalidOffer = 3,
    }
    error_code!(Error);
}
