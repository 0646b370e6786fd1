//! Utilities for handling shell surfaces with the `xdg_shell` protocol
//!
//! This module provides automatic handling of shell surfaces objects, by being registered
//! as a global handler for `xdg_wm_base` and `zxdg_shell_v6`. Both variants create objects of
//! the same interfaces, the variant only changes how positioner edges are decoded and which
//! events the objects support.
//!
//! ## Why use this implementation
//!
//! This implementation can track for you the various shell surfaces defined by the
//! clients by handling the `xdg_shell` protocol. It runs the configure handshake of every
//! surface: configures the compositor sends are queued with their serial, and the client
//! acknowledging a serial consumes every older configure. The acknowledged state becomes the
//! current state of the surface on its next commit.
//!
//! ## How to use it
//!
//! ### Initialization
//!
//! To initialize this handler, create an [`XdgShellState`], store it in your compositor state,
//! implement [`XdgShellHandler`] and use [`delegate_xdg_shell!`](crate::delegate_xdg_shell)
//! to forward the protocol to it. Your state must also support the compositor protocol, shell
//! surfaces being built on `wl_surface`s.
//!
//! ```no_run
//! # extern crate waystate;
//! use waystate::delegate_xdg_shell;
//! use waystate::protocol::wl_seat::WlSeat;
//! use waystate::server::Resource;
//! use waystate::utils::Serial;
//! use waystate::wayland::shell::xdg::{PopupSurface, PositionerState, ToplevelSurface, XdgShellHandler, XdgShellState};
//!
//! # struct State { xdg_shell_state: XdgShellState }
//! # let display = waystate::server::Display::<State>::new();
//! let xdg_shell_state = XdgShellState::new::<State>(&display.handle());
//!
//! impl XdgShellHandler for State {
//!     fn xdg_shell_state(&mut self) -> &mut XdgShellState {
//!         &mut self.xdg_shell_state
//!     }
//!
//!     fn new_toplevel(&mut self, surface: ToplevelSurface) {
//!         surface.with_pending_state(|state| state.size = Some((800, 600).into()));
//!         let _ = surface.send_configure();
//!     }
//!
//!     fn new_popup(&mut self, surface: PopupSurface, positioner: PositionerState) { /* ... */ }
//!     fn grab(&mut self, surface: PopupSurface, seat: Resource<WlSeat>, serial: Serial) { /* ... */ }
//!     fn reposition_request(&mut self, surface: PopupSurface, positioner: PositionerState, token: u32) { /* ... */ }
//! }
//! delegate_xdg_shell!(State);
//! ```
//!
//! ### Access to shell surface and clients data
//!
//! There are mainly 3 kind of objects that you'll manipulate from this implementation:
//!
//! - [`ShellClient`]: This is a handle representing an isolated client connection to the
//!   shell global. You can associate data to it and use it to ping the client.
//! - [`ToplevelSurface`]: This is a handle representing a toplevel surface, you can
//!   retrieve a list of all currently alive toplevel surface from the [`XdgShellState`].
//! - [`PopupSurface`]: This is a handle representing a popup/tooltip surface. Similarly,
//!   you can get a list of all currently alive popup surface from the [`XdgShellState`].

use std::{
    collections::VecDeque,
    sync::{Mutex, MutexGuard},
};

use tracing::trace;

use crate::{
    protocol::{
        wl_seat::WlSeat,
        wl_surface::WlSurface,
        xdg_popup::{self, XdgPopup},
        xdg_surface,
        xdg_toplevel::{self, XdgToplevel},
        xdg_wm_base::{self, XdgWmBase},
        zxdg_shell_v6::ZxdgShellV6,
    },
    server::{Client, DisplayHandle, GlobalDispatch, GlobalId, Interface, InvalidId, ObjectId, Resource, Weak},
    utils::{user_data::UserDataMap, Logical, Point, Rectangle, Serial, Size},
    wayland::compositor::{self, Cacheable, SurfaceData},
};

use super::PingError;

mod handlers;
pub mod positioner;

pub use self::handlers::{XdgPositionerUserData, XdgShellSurfaceUserData, XdgSurfaceUserData, XdgWmBaseUserData};
pub use self::positioner::{ConstraintAdjustment, Edges, PositionerError, PositionerState};

/// The role of an xdg_toplevel surface
pub const XDG_TOPLEVEL_ROLE: &str = "xdg_toplevel";

/// The role of an xdg_popup surface
pub const XDG_POPUP_ROLE: &str = "xdg_popup";

/// Whether the surface has one of the xdg roles
pub(crate) fn has_xdg_role(surface: &Resource<WlSurface>) -> bool {
    matches!(compositor::get_role(surface), Some(XDG_TOPLEVEL_ROLE | XDG_POPUP_ROLE))
}

/// The shell global a client bound
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ShellVariant {
    /// The stable `xdg_wm_base`
    Stable,
    /// The unstable `zxdg_shell_v6`
    V6,
}

/// Configuration of the shell globals
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct XdgShellConfig {
    /// The shell variants to advertise
    pub variants: Vec<ShellVariant>,
    /// The window management capabilities advertised to toplevels
    pub capabilities: Vec<xdg_toplevel::WmCapabilities>,
}

impl Default for XdgShellConfig {
    fn default() -> Self {
        XdgShellConfig {
            variants: vec![ShellVariant::Stable, ShellVariant::V6],
            capabilities: vec![
                xdg_toplevel::WmCapabilities::WindowMenu,
                xdg_toplevel::WmCapabilities::Maximize,
                xdg_toplevel::WmCapabilities::Fullscreen,
                xdg_toplevel::WmCapabilities::Minimize,
            ],
        }
    }
}

/// A configure tracked until the client acknowledges it
pub trait TrackedConfigure {
    /// Serial the configure was sent with
    fn serial(&self) -> Serial;
}

/// The configures sent to a surface and not yet acknowledged, oldest first
#[derive(Debug, Clone)]
pub struct ConfigureQueue<C> {
    configures: VecDeque<C>,
}

impl<C> Default for ConfigureQueue<C> {
    fn default() -> Self {
        ConfigureQueue {
            configures: VecDeque::new(),
        }
    }
}

impl<C: TrackedConfigure> ConfigureQueue<C> {
    /// Track a newly sent configure
    pub fn push(&mut self, configure: C) {
        self.configures.push_back(configure);
    }

    /// Acknowledge `serial`
    ///
    /// Removes and returns the configure with this serial and every configure queued before
    /// it, oldest first. Returns `None` and leaves the queue untouched if no queued configure
    /// has this serial.
    pub fn ack(&mut self, serial: Serial) -> Option<Vec<C>> {
        let position = self
            .configures
            .iter()
            .position(|configure| configure.serial() == serial)?;
        Some(self.configures.drain(..=position).collect())
    }

    /// The most recently sent configure
    pub fn last(&self) -> Option<&C> {
        self.configures.back()
    }

    /// Iterate over the queued configures, oldest first
    pub fn iter(&self) -> impl Iterator<Item = &C> {
        self.configures.iter()
    }

    /// Number of configures waiting for an acknowledgement
    pub fn len(&self) -> usize {
        self.configures.len()
    }

    /// Whether every sent configure was acknowledged
    pub fn is_empty(&self) -> bool {
        self.configures.is_empty()
    }

    fn clear(&mut self) {
        self.configures.clear();
    }
}

macro_rules! xdg_role {
    ($state:ty,
     $(#[$configure_meta:meta])* $configure_name:ident {$($(#[$configure_field_meta:meta])* $configure_field_vis:vis $configure_field_name:ident: $configure_field_type:ty),*},
     $(#[$attributes_meta:meta])* $attributes_name:ident {$($(#[$attributes_field_meta:meta])* $attributes_field_vis:vis $attributes_field_name:ident: $attributes_field_type:ty),*}) => {

        $(#[$configure_meta])*
        pub struct $configure_name {
            /// The state associated with this configure
            pub state: $state,
            /// A serial number to track ACK from the client
            ///
            /// The ACK-ing from a client for a serial validates all pending
            /// older serials.
            pub serial: Serial,
            $(
                $(#[$configure_field_meta])*
                $configure_field_vis $configure_field_name: $configure_field_type,
            )*
        }

        impl TrackedConfigure for $configure_name {
            fn serial(&self) -> Serial {
                self.serial
            }
        }

        $(#[$attributes_meta])*
        pub struct $attributes_name {
            /// Defines if the surface has received at least one
            /// xdg_surface.ack_configure from the client
            pub configured: bool,
            /// The serial of the last acked configure
            pub configure_serial: Option<Serial>,
            /// Holds the state if the surface has sent the initial
            /// configure event to the client
            pub initial_configure_sent: bool,
            /// Holds the configures the server has sent out
            /// to the client waiting to be acknowledged by
            /// the client
            pending_configures: ConfigureQueue<$configure_name>,
            /// Holds the pending state as set by the server.
            pub server_pending: Option<$state>,
            /// Holds the last server_pending state that has been acknowledged
            /// by the client. This state is cloned to the current
            /// during a commit.
            pub last_acked: Option<$state>,
            /// Holds the current state after a successful commit.
            pub current: $state,
            $(
                $(#[$attributes_field_meta])*
                $attributes_field_vis $attributes_field_name: $attributes_field_type,
            )*
        }

        impl $attributes_name {
            fn ack_configure(&mut self, serial: Serial) -> Option<Vec<$configure_name>> {
                let acked = self.pending_configures.ack(serial)?;
                if let Some(configure) = acked.last() {
                    self.last_acked = Some(configure.state.clone());
                }
                self.configured = true;
                self.configure_serial = Some(serial);
                Some(acked)
            }

            /// Gets the latest state that has been configured
            /// on the server and sent to the client.
            ///
            /// This is the state of the last sent configure, or the last
            /// acknowledged one, or the current one, whichever exists first.
            /// It excludes the [`server_pending`](#structfield.server_pending) state.
            pub fn current_server_state(&self) -> &$state {
                self.pending_configures
                    .last()
                    .map(|c| &c.state)
                    .or(self.last_acked.as_ref())
                    .unwrap_or(&self.current)
            }

            /// Check if the state has pending changes that have
            /// not been sent to the client.
            pub fn has_pending_changes(&self) -> bool {
                self.server_pending
                    .as_ref()
                    .map(|s| s != self.current_server_state())
                    .unwrap_or(false)
            }

            /// The configures waiting for an acknowledgement
            pub fn pending_configures(&self) -> &ConfigureQueue<$configure_name> {
                &self.pending_configures
            }

            // the surface was unmapped, the handshake starts over
            fn reset_configure(&mut self) {
                self.configured = false;
                self.configure_serial = None;
                self.initial_configure_sent = false;
                self.pending_configures.clear();
                self.server_pending = None;
                self.last_acked = None;
                self.current = Default::default();
            }
        }

        impl Default for $attributes_name {
            fn default() -> Self {
                Self {
                    configured: false,
                    configure_serial: None,
                    initial_configure_sent: false,
                    pending_configures: ConfigureQueue::default(),
                    server_pending: None,
                    last_acked: None,
                    current: Default::default(),
                    $(
                        $attributes_field_name: Default::default(),
                    )*
                }
            }
        }
    };
}

xdg_role!(
    ToplevelState,
    /// A configure message for toplevel surfaces
    #[derive(Debug, Clone, PartialEq)]
    ToplevelConfigure {},
    /// Role specific attributes for xdg_toplevel
    ///
    /// This interface defines an xdg_surface role which allows a surface to,
    /// among other things, set window-like properties such as maximize,
    /// fullscreen, and minimize, set application-specific metadata like title and
    /// id, and well as trigger user interactive operations such as interactive
    /// resize and move.
    ///
    /// Unmapping an xdg_toplevel means that the surface cannot be shown
    /// by the compositor until it is explicitly mapped again. The configure
    /// handshake starts over: the client re-maps the toplevel by performing
    /// a commit without any buffer attached, waiting for a configure event
    /// and handling it as usual. Title and app id are kept.
    #[derive(Debug)]
    XdgToplevelSurfaceRoleAttributes {
        /// The parent field of the toplevel
        parent: Option<Weak<WlSurface>>,
        /// Title of the toplevel, as set by the client
        pub title: Option<String>,
        /// Application id of the toplevel, as set by the client
        pub app_id: Option<String>,
        /// Window management capabilities advertised with the initial configure
        capabilities: Vec<xdg_toplevel::WmCapabilities>,
        /// Whether the surface was mapped on its last commit
        mapped: bool
    }
);

xdg_role!(
    PopupState,
    /// A configure message for popup surface
    #[derive(Debug, Clone, Copy, PartialEq)]
    PopupConfigure {
        /// The token the client provided in the `xdg_popup::reposition`
        /// request. The token itself is opaque, and has no other special meaning.
        /// The token is sent in the corresponding `xdg_popup::repositioned` event.
        pub reposition_token: Option<u32>
    },
    /// Role specific attributes for xdg_popup
    ///
    /// A popup surface is a short-lived, temporary surface. It can be used to
    /// implement for example menus, popovers, tooltips and other similar user
    /// interface concepts.
    #[derive(Debug)]
    XdgPopupSurfaceRoleAttributes {
        /// Holds the parent for the xdg_popup.
        parent: Option<Weak<WlSurface>>,
        /// Defines if the surface has received at least one commit
        ///
        /// Once committed, the popup can no longer take a grab.
        pub committed: bool
    }
);

/// Data attached to the `wl_surface` of toplevels
pub type XdgToplevelSurfaceData = Mutex<XdgToplevelSurfaceRoleAttributes>;

/// Data attached to the `wl_surface` of popups
pub type XdgPopupSurfaceData = Mutex<XdgPopupSurfaceRoleAttributes>;

fn toplevel_attributes(states: &SurfaceData) -> MutexGuard<'_, XdgToplevelSurfaceRoleAttributes> {
    states
        .data_map
        .get_or_insert(XdgToplevelSurfaceData::default)
        .lock()
        .unwrap()
}

fn popup_attributes(states: &SurfaceData) -> MutexGuard<'_, XdgPopupSurfaceRoleAttributes> {
    states
        .data_map
        .get_or_insert(XdgPopupSurfaceData::default)
        .lock()
        .unwrap()
}

/// Represents the state of the toplevel
#[derive(Debug, Default, Clone, PartialEq)]
pub struct ToplevelState {
    /// The suggested size of the surface, `None` letting the client choose
    pub size: Option<Size<i32, Logical>>,
    /// The bounds the client should keep its size within
    pub bounds: Option<Size<i32, Logical>>,
    /// The states for this surface
    pub states: ToplevelStateSet,
}

/// Container holding the states for a `XdgToplevel`
///
/// This container will prevent the `XdgToplevel` from
/// having the same `xdg_toplevel::State` multiple times
/// and simplifies setting and un-setting a particularly
/// `xdg_toplevel::State`
#[derive(Debug, Default, Clone, PartialEq)]
pub struct ToplevelStateSet {
    states: Vec<xdg_toplevel::State>,
}

impl ToplevelStateSet {
    /// Returns `true` if the states contains a state.
    pub fn contains(&self, state: xdg_toplevel::State) -> bool {
        self.states.iter().any(|s| *s == state)
    }

    /// Adds a state to the states.
    ///
    /// Returns whether the state was not yet present.
    pub fn set(&mut self, state: xdg_toplevel::State) -> bool {
        if self.contains(state) {
            false
        } else {
            self.states.push(state);
            true
        }
    }

    /// Removes a state from the states. Returns whether the state was
    /// present in the states.
    pub fn unset(&mut self, state: xdg_toplevel::State) -> bool {
        if !self.contains(state) {
            false
        } else {
            self.states.retain(|s| *s != state);
            true
        }
    }

    /// The states a toplevel of the given version understands
    pub(crate) fn into_filtered_states(self, version: u32) -> Vec<xdg_toplevel::State> {
        if self.states.iter().all(|state| state.since() <= version) {
            return self.states;
        }
        self.states
            .into_iter()
            .filter(|state| state.since() <= version)
            .collect()
    }
}

impl IntoIterator for ToplevelStateSet {
    type Item = xdg_toplevel::State;
    type IntoIter = std::vec::IntoIter<xdg_toplevel::State>;

    fn into_iter(self) -> Self::IntoIter {
        self.states.into_iter()
    }
}

impl From<ToplevelStateSet> for Vec<xdg_toplevel::State> {
    fn from(states: ToplevelStateSet) -> Self {
        states.states
    }
}

/// Represents the state of the popup
#[derive(Debug, Default, Clone, Copy, PartialEq)]
pub struct PopupState {
    /// The positioner state the popup was created or repositioned with
    pub positioner: PositionerState,
    /// Geometry of the popup relative to its parent window geometry
    pub geometry: Rectangle<i32, Logical>,
}

impl PopupState {
    /// Place the popup within `target`, applying the constraint adjustments of its positioner
    pub fn constrained(positioner: PositionerState, target: Rectangle<i32, Logical>) -> Self {
        PopupState {
            positioner,
            geometry: positioner.get_unconstrained_geometry(target),
        }
    }
}

/// A configure acknowledged by the client
#[derive(Debug, Clone, PartialEq)]
pub enum Configure {
    /// A configure of a toplevel
    Toplevel(ToplevelConfigure),
    /// A configure of a popup
    Popup(PopupConfigure),
}

impl Configure {
    /// Serial of the configure
    pub fn serial(&self) -> Serial {
        match self {
            Configure::Toplevel(configure) => configure.serial,
            Configure::Popup(configure) => configure.serial,
        }
    }
}

impl From<ToplevelConfigure> for Configure {
    fn from(configure: ToplevelConfigure) -> Self {
        Configure::Toplevel(configure)
    }
}

impl From<PopupConfigure> for Configure {
    fn from(configure: PopupConfigure) -> Self {
        Configure::Popup(configure)
    }
}

/// Represents the client pending state
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct SurfaceCachedState {
    /// Holds the double-buffered geometry that may be specified
    /// by xdg_surface.set_window_geometry.
    pub geometry: Option<Rectangle<i32, Logical>>,
    /// Minimum size of the surface, `0` meaning unlimited on that axis
    pub min_size: Size<i32, Logical>,
    /// Maximum size of the surface, `0` meaning unlimited on that axis
    pub max_size: Size<i32, Logical>,
}

impl Cacheable for SurfaceCachedState {
    fn commit(&mut self, _dh: &DisplayHandle) -> Self {
        *self
    }

    fn merge_into(self, into: &mut Self, _dh: &DisplayHandle) {
        *into = self;
    }
}

/// Data associated with a shell client
#[derive(Debug, Default)]
pub struct ShellClientData {
    /// The serial of the last ping sent to this client, not yet answered
    pub pending_ping: Option<Serial>,
    /// Compositor-defined data attached to the client
    pub data: UserDataMap,
}

#[derive(Debug, Clone, PartialEq)]
enum ShellResource {
    Stable(Resource<XdgWmBase>),
    V6(Resource<ZxdgShellV6>),
}

/// A shell client
///
/// This represents an instantiation of the shell global, be it
/// the stable `xdg_wm_base` or the unstable `zxdg_shell_v6`.
///
/// Most of the time, you can consider that a wayland client will be a single
/// shell client.
///
/// You can use this handle to access a storage for any client-specific data
/// you wish to associate with it.
#[derive(Debug, Clone, PartialEq)]
pub struct ShellClient {
    kind: ShellResource,
}

impl From<Resource<XdgWmBase>> for ShellClient {
    fn from(resource: Resource<XdgWmBase>) -> Self {
        ShellClient {
            kind: ShellResource::Stable(resource),
        }
    }
}

impl From<Resource<ZxdgShellV6>> for ShellClient {
    fn from(resource: Resource<ZxdgShellV6>) -> Self {
        ShellClient {
            kind: ShellResource::V6(resource),
        }
    }
}

macro_rules! with_shell_resource {
    ($client:expr, $resource:ident => $body:expr) => {
        match &$client.kind {
            ShellResource::Stable($resource) => $body,
            ShellResource::V6($resource) => $body,
        }
    };
}

impl ShellClient {
    /// Is the shell client represented by this handle still connected?
    pub fn alive(&self) -> bool {
        with_shell_resource!(self, resource => resource.is_alive())
    }

    /// The shell global this client bound
    pub fn variant(&self) -> ShellVariant {
        match self.kind {
            ShellResource::Stable(_) => ShellVariant::Stable,
            ShellResource::V6(_) => ShellVariant::V6,
        }
    }

    /// Id of the shell object
    pub fn id(&self) -> ObjectId {
        with_shell_resource!(self, resource => resource.id())
    }

    /// The client owning the shell object
    pub fn client(&self) -> Option<Client> {
        with_shell_resource!(self, resource => resource.client())
    }

    fn data(&self) -> Option<&XdgWmBaseUserData> {
        with_shell_resource!(self, resource => resource.data::<XdgWmBaseUserData>())
    }

    pub(crate) fn post_error(&self, code: xdg_wm_base::Error, message: impl Into<String>) {
        with_shell_resource!(self, resource => resource.post_error(code, message))
    }

    fn send_event(&self, event: xdg_wm_base::Event) {
        with_shell_resource!(self, resource => resource.send_event(event))
    }

    /// Send a ping request to this shell client
    ///
    /// You'll receive the reply through [`XdgShellHandler::client_pong`]. Only one ping can be
    /// pending at a time, the serial is allocated from the client's serials.
    pub fn send_ping(&self) -> Result<Serial, PingError> {
        if !self.alive() {
            return Err(PingError::DeadSurface);
        }
        let (data, client) = match (self.data(), self.client()) {
            (Some(data), Some(client)) => (data, client),
            _ => return Err(PingError::DeadSurface),
        };
        let serial = {
            let mut guard = data.client_data.lock().unwrap();
            if let Some(pending_ping) = guard.pending_ping {
                return Err(PingError::PingAlreadyPending(pending_ping));
            }
            let serial = client.next_serial();
            guard.pending_ping = Some(serial);
            serial
        };
        self.send_event(xdg_wm_base::Event::Ping { serial: serial.into() });
        Ok(serial)
    }

    /// Disconnect a client that failed to answer a ping in time
    pub fn unresponsive(&self) {
        self.post_error(xdg_wm_base::Error::Unresponsive, "client did not respond to ping");
    }

    /// Access the user data associated with this shell client
    pub fn with_data<F, T>(&self, f: F) -> Result<T, InvalidId>
    where
        F: FnOnce(&mut ShellClientData) -> T,
    {
        if !self.alive() {
            return Err(InvalidId);
        }
        let data = self.data().ok_or(InvalidId)?;
        let mut guard = data.client_data.lock().unwrap();
        Ok(f(&mut guard))
    }
}

/// Errors of [`ToplevelSurface::send_configure`] and [`PopupSurface::send_configure`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum ConfigureError {
    /// The surface or its role object was destroyed
    #[error("the surface has been destroyed")]
    DeadSurface,
    /// The popup was already configured and its version does not support
    /// being configured again
    #[error("the popup has already been configured")]
    AlreadyConfigured,
    /// The popup was already configured and its positioner is not reactive
    #[error("the popup positioner is not reactive")]
    NotReactive,
}

/// A handle to a toplevel surface
#[derive(Debug, Clone)]
pub struct ToplevelSurface {
    wl_surface: Resource<WlSurface>,
    shell_surface: Resource<XdgToplevel>,
}

impl PartialEq for ToplevelSurface {
    fn eq(&self, other: &Self) -> bool {
        self.wl_surface == other.wl_surface
    }
}

impl ToplevelSurface {
    pub(crate) fn new(wl_surface: Resource<WlSurface>, shell_surface: Resource<XdgToplevel>) -> Self {
        ToplevelSurface {
            wl_surface,
            shell_surface,
        }
    }

    /// Is the toplevel surface referred by this handle still alive?
    pub fn alive(&self) -> bool {
        self.wl_surface.is_alive() && self.shell_surface.is_alive()
    }

    /// Version of the `xdg_toplevel` object
    pub fn version(&self) -> u32 {
        self.shell_surface.version()
    }

    /// Retrieve the shell client owning this toplevel surface
    pub fn client(&self) -> Option<ShellClient> {
        self.shell_surface
            .data::<XdgShellSurfaceUserData>()
            .map(|data| data.shell.clone())
    }

    /// Access the underlying `wl_surface` of this toplevel surface
    pub fn wl_surface(&self) -> &Resource<WlSurface> {
        &self.wl_surface
    }

    /// Access the underlying `xdg_toplevel` object
    pub fn xdg_toplevel(&self) -> &Resource<XdgToplevel> {
        &self.shell_surface
    }

    /// Allows the pending state of this toplevel to
    /// be manipulated.
    ///
    /// This should be used to inform the client about size and state changes,
    /// for example after a resize request from the client.
    ///
    /// The state will be sent to the client when calling [`send_configure`](#method.send_configure).
    pub fn with_pending_state<F, T>(&self, f: F) -> T
    where
        F: FnOnce(&mut ToplevelState) -> T,
    {
        compositor::with_states(&self.wl_surface, |states| {
            let mut attributes = toplevel_attributes(states);
            let current = attributes.current_server_state().clone();
            f(attributes.server_pending.get_or_insert(current))
        })
    }

    /// Send a configure event to this toplevel surface
    ///
    /// The pending state, or the last sent state if there is none, is queued with a fresh
    /// serial. The events are sent in order: the capabilities with the initial configure, the
    /// bounds, the toplevel configure and finally the `xdg_surface` configure carrying the
    /// serial.
    pub fn send_configure(&self) -> Result<Serial, ConfigureError> {
        if !self.alive() {
            return Err(ConfigureError::DeadSurface);
        }
        let client = self.shell_surface.client().ok_or(ConfigureError::DeadSurface)?;
        let serial = client.next_serial();
        let (configure, capabilities) = compositor::with_states(&self.wl_surface, |states| {
            let mut attributes = toplevel_attributes(states);
            let state = match attributes.server_pending.take() {
                Some(state) => state,
                None => attributes.current_server_state().clone(),
            };
            let configure = ToplevelConfigure { state, serial };
            attributes.pending_configures.push(configure.clone());
            let capabilities = if attributes.initial_configure_sent {
                None
            } else {
                Some(attributes.capabilities.clone())
            };
            attributes.initial_configure_sent = true;
            (configure, capabilities)
        });
        send_toplevel_configure(&self.shell_surface, configure, capabilities);
        Ok(serial)
    }

    /// Send a configure event if the pending state differs from the last sent one
    pub fn send_pending_configure(&self) -> Option<Serial> {
        if self.has_pending_changes() {
            self.send_configure().ok()
        } else {
            None
        }
    }

    /// Whether the pending state differs from the last sent one
    pub fn has_pending_changes(&self) -> bool {
        compositor::with_states(&self.wl_surface, |states| toplevel_attributes(states).has_pending_changes())
    }

    /// Whether the initial configure was sent
    pub fn is_initial_configure_sent(&self) -> bool {
        compositor::with_states(&self.wl_surface, |states| {
            toplevel_attributes(states).initial_configure_sent
        })
    }

    /// Whether the client acknowledged at least one configure
    pub fn is_configured(&self) -> bool {
        compositor::with_states(&self.wl_surface, |states| toplevel_attributes(states).configured)
    }

    /// The state of the toplevel as of its last commit
    pub fn current_state(&self) -> ToplevelState {
        compositor::with_states(&self.wl_surface, |states| toplevel_attributes(states).current.clone())
    }

    /// The double-buffered client state as of the last commit
    pub fn cached_state(&self) -> SurfaceCachedState {
        compositor::with_states(&self.wl_surface, |states| {
            *states.cached_state.current::<SurfaceCachedState>()
        })
    }

    /// Send a "close" event to the client
    pub fn send_close(&self) {
        self.shell_surface.send_event(xdg_toplevel::Event::Close);
    }

    /// The parent of this toplevel, if any
    pub fn parent(&self) -> Option<Resource<WlSurface>> {
        compositor::with_states(&self.wl_surface, |states| {
            toplevel_attributes(states)
                .parent
                .as_ref()
                .and_then(|parent| parent.upgrade().ok())
        })
    }

    /// Title of the toplevel
    pub fn title(&self) -> Option<String> {
        compositor::with_states(&self.wl_surface, |states| toplevel_attributes(states).title.clone())
    }

    /// Application id of the toplevel
    pub fn app_id(&self) -> Option<String> {
        compositor::with_states(&self.wl_surface, |states| toplevel_attributes(states).app_id.clone())
    }
}

fn send_toplevel_configure(
    resource: &Resource<XdgToplevel>,
    configure: ToplevelConfigure,
    capabilities: Option<Vec<xdg_toplevel::WmCapabilities>>,
) {
    let Some(data) = resource.data::<XdgShellSurfaceUserData>() else {
        return;
    };
    let version = resource.version();
    let ToplevelConfigure { state, serial } = configure;

    if let Some(capabilities) = capabilities {
        if version >= 5 {
            resource.send_event(xdg_toplevel::Event::WmCapabilities {
                capabilities: capabilities.into_iter().map(|c| c as u32).collect(),
            });
        }
    }
    if let Some(bounds) = state.bounds {
        if version >= 4 {
            resource.send_event(xdg_toplevel::Event::ConfigureBounds {
                width: bounds.w,
                height: bounds.h,
            });
        }
    }

    let (width, height) = state.size.unwrap_or_default().into();
    let states = state
        .states
        .into_filtered_states(version)
        .into_iter()
        .map(|state| state as u32)
        .collect();
    resource.send_event(xdg_toplevel::Event::Configure { width, height, states });
    data.xdg_surface
        .send_event(xdg_surface::Event::Configure { serial: serial.into() });
    trace!(toplevel = ?resource, ?serial, "configure sent");
}

/// A handle to a popup surface
#[derive(Debug, Clone)]
pub struct PopupSurface {
    wl_surface: Resource<WlSurface>,
    shell_surface: Resource<XdgPopup>,
}

impl PartialEq for PopupSurface {
    fn eq(&self, other: &Self) -> bool {
        self.wl_surface == other.wl_surface
    }
}

impl PopupSurface {
    pub(crate) fn new(wl_surface: Resource<WlSurface>, shell_surface: Resource<XdgPopup>) -> Self {
        PopupSurface {
            wl_surface,
            shell_surface,
        }
    }

    /// Is the popup surface referred by this handle still alive?
    pub fn alive(&self) -> bool {
        self.wl_surface.is_alive() && self.shell_surface.is_alive()
    }

    /// Version of the `xdg_popup` object
    pub fn version(&self) -> u32 {
        self.shell_surface.version()
    }

    /// Retrieve the shell client owning this popup surface
    pub fn client(&self) -> Option<ShellClient> {
        self.shell_surface
            .data::<XdgShellSurfaceUserData>()
            .map(|data| data.shell.clone())
    }

    /// Access the underlying `wl_surface` of this popup surface
    pub fn wl_surface(&self) -> &Resource<WlSurface> {
        &self.wl_surface
    }

    /// Access the underlying `xdg_popup` object
    pub fn xdg_popup(&self) -> &Resource<XdgPopup> {
        &self.shell_surface
    }

    /// Gets the parent `wl_surface` of this popup, if it is still alive
    pub fn get_parent_surface(&self) -> Option<Resource<WlSurface>> {
        compositor::with_states(&self.wl_surface, |states| {
            popup_attributes(states)
                .parent
                .as_ref()
                .and_then(|parent| parent.upgrade().ok())
        })
    }

    /// Allows the pending state of this popup to be manipulated
    ///
    /// The state will be sent to the client when calling [`send_configure`](#method.send_configure).
    pub fn with_pending_state<F, T>(&self, f: F) -> T
    where
        F: FnOnce(&mut PopupState) -> T,
    {
        compositor::with_states(&self.wl_surface, |states| {
            let mut attributes = popup_attributes(states);
            let current = *attributes.current_server_state();
            f(attributes.server_pending.get_or_insert(current))
        })
    }

    /// Send a configure event to this popup surface
    ///
    /// A popup can only be configured again if its version supports repositioning and its
    /// positioner is reactive.
    pub fn send_configure(&self) -> Result<Serial, ConfigureError> {
        if !self.alive() {
            return Err(ConfigureError::DeadSurface);
        }
        let version = self.version();
        compositor::with_states(&self.wl_surface, |states| {
            let attributes = popup_attributes(states);
            if !attributes.initial_configure_sent {
                return Ok(());
            }
            if version < 3 {
                return Err(ConfigureError::AlreadyConfigured);
            }
            if !attributes.current_server_state().positioner.reactive {
                return Err(ConfigureError::NotReactive);
            }
            Ok(())
        })?;
        self.send_configure_internal(None)
    }

    /// Send a configure event in response to a `reposition` request
    ///
    /// The `repositioned` event carrying `token` is sent before the configure.
    pub fn send_repositioned(&self, token: u32) -> Result<Serial, ConfigureError> {
        if !self.alive() {
            return Err(ConfigureError::DeadSurface);
        }
        self.send_configure_internal(Some(token))
    }

    fn send_configure_internal(&self, reposition_token: Option<u32>) -> Result<Serial, ConfigureError> {
        let client = self.shell_surface.client().ok_or(ConfigureError::DeadSurface)?;
        let serial = client.next_serial();
        let configure = compositor::with_states(&self.wl_surface, |states| {
            let mut attributes = popup_attributes(states);
            let state = match attributes.server_pending.take() {
                Some(state) => state,
                None => *attributes.current_server_state(),
            };
            let configure = PopupConfigure {
                state,
                serial,
                reposition_token,
            };
            attributes.pending_configures.push(configure);
            attributes.initial_configure_sent = true;
            configure
        });
        send_popup_configure(&self.shell_surface, configure);
        Ok(serial)
    }

    /// Send a `popup_done` event to the popup surface
    ///
    /// It means that the user clicked outside of the popup and it should be dismissed.
    pub fn send_popup_done(&self) {
        self.shell_surface.send_event(xdg_popup::Event::PopupDone);
    }

    /// Whether the initial configure was sent
    pub fn is_initial_configure_sent(&self) -> bool {
        compositor::with_states(&self.wl_surface, |states| popup_attributes(states).initial_configure_sent)
    }

    /// Whether the client acknowledged at least one configure
    pub fn is_configured(&self) -> bool {
        compositor::with_states(&self.wl_surface, |states| popup_attributes(states).configured)
    }

    /// The state of the popup as of its last commit
    pub fn current_state(&self) -> PopupState {
        compositor::with_states(&self.wl_surface, |states| popup_attributes(states).current)
    }
}

fn send_popup_configure(resource: &Resource<XdgPopup>, configure: PopupConfigure) {
    let Some(data) = resource.data::<XdgShellSurfaceUserData>() else {
        return;
    };
    let geometry = configure.state.geometry;

    if let Some(token) = configure.reposition_token {
        resource.send_event(xdg_popup::Event::Repositioned { token });
    }
    resource.send_event(xdg_popup::Event::Configure {
        x: geometry.loc.x,
        y: geometry.loc.y,
        width: geometry.size.w,
        height: geometry.size.h,
    });
    data.xdg_surface.send_event(xdg_surface::Event::Configure {
        serial: configure.serial.into(),
    });
    trace!(popup = ?resource, serial = ?configure.serial, "configure sent");
}

/// Shell global state
///
/// This state allows you to retrieve a list of surfaces
/// currently known to the shell global.
#[derive(Debug)]
pub struct XdgShellState {
    globals: Vec<(ShellVariant, GlobalId)>,
    capabilities: Vec<xdg_toplevel::WmCapabilities>,
    known_toplevels: Vec<ToplevelSurface>,
    known_popups: Vec<PopupSurface>,
}

impl XdgShellState {
    /// Create a new `xdg_wm_base` and `zxdg_shell_v6` global
    pub fn new<D>(display: &DisplayHandle) -> XdgShellState
    where
        D: GlobalDispatch<XdgWmBase, ()> + GlobalDispatch<ZxdgShellV6, ()> + 'static,
    {
        Self::new_with_config::<D>(display, XdgShellConfig::default())
    }

    /// Create the shell globals listed in `config`
    pub fn new_with_config<D>(display: &DisplayHandle, config: XdgShellConfig) -> XdgShellState
    where
        D: GlobalDispatch<XdgWmBase, ()> + GlobalDispatch<ZxdgShellV6, ()> + 'static,
    {
        let mut globals = Vec::new();
        for variant in config.variants {
            if globals.iter().any(|(known, _)| *known == variant) {
                continue;
            }
            let global = match variant {
                ShellVariant::Stable => display.create_global::<D, XdgWmBase, _>(XdgWmBase::VERSION, ()),
                ShellVariant::V6 => display.create_global::<D, ZxdgShellV6, _>(ZxdgShellV6::VERSION, ()),
            };
            globals.push((variant, global));
        }
        let mut capabilities = Vec::new();
        for capability in config.capabilities {
            if !capabilities.contains(&capability) {
                capabilities.push(capability);
            }
        }

        XdgShellState {
            globals,
            capabilities,
            known_toplevels: Vec::new(),
            known_popups: Vec::new(),
        }
    }

    /// Access all the shell surfaces known by this handler
    pub fn toplevel_surfaces(&self) -> &[ToplevelSurface] {
        &self.known_toplevels
    }

    /// Returns a [`ToplevelSurface`] from an underlying toplevel surface.
    pub fn get_toplevel(&self, surface: &Resource<WlSurface>) -> Option<ToplevelSurface> {
        self.known_toplevels
            .iter()
            .find(|toplevel| toplevel.wl_surface() == surface)
            .cloned()
    }

    /// Access all the popup surfaces known by this handler
    pub fn popup_surfaces(&self) -> &[PopupSurface] {
        &self.known_popups
    }

    /// Returns a [`PopupSurface`] from an underlying popup surface.
    pub fn get_popup(&self, surface: &Resource<WlSurface>) -> Option<PopupSurface> {
        self.known_popups
            .iter()
            .find(|popup| popup.wl_surface() == surface)
            .cloned()
    }

    /// Returns the id of the global of the given variant, if it was created
    pub fn global(&self, variant: ShellVariant) -> Option<GlobalId> {
        self.globals
            .iter()
            .find(|(known, _)| *known == variant)
            .map(|(_, global)| *global)
    }
}

/// Xdg Shell handler type
#[allow(unused_variables)]
pub trait XdgShellHandler {
    /// [XdgShellState] getter
    fn xdg_shell_state(&mut self) -> &mut XdgShellState;

    /// A new shell client was instantiated
    fn new_client(&mut self, client: ShellClient) {}

    /// The pong for a pending ping of this shell client was received
    ///
    /// The `ShellHandler` already checked for you that the serial matches the one
    /// from the pending ping.
    fn client_pong(&mut self, client: ShellClient) {}

    /// A new toplevel surface was created
    ///
    /// You likely need to send a [`ToplevelConfigure`] to the surface, to hint the
    /// client as to how its window should be sized.
    fn new_toplevel(&mut self, surface: ToplevelSurface);

    /// A new popup surface was created
    ///
    /// You likely need to send a [`PopupConfigure`] to the surface, to hint the
    /// client as to how its popup should be sized.
    fn new_popup(&mut self, surface: PopupSurface, positioner: PositionerState);

    /// The client requested the start of an interactive move for this surface
    fn move_request(&mut self, surface: ToplevelSurface, seat: Resource<WlSeat>, serial: Serial) {}

    /// The client requested the start of an interactive resize for this surface
    fn resize_request(
        &mut self,
        surface: ToplevelSurface,
        seat: Resource<WlSeat>,
        serial: Serial,
        edges: xdg_toplevel::ResizeEdge,
    ) {
    }

    /// This popup requests a grab of the pointer
    ///
    /// This means it requests to be sent a `popup_done` event when the pointer leaves
    /// the grab area.
    fn grab(&mut self, surface: PopupSurface, seat: Resource<WlSeat>, serial: Serial);

    /// A toplevel surface requested to be maximized
    fn maximize_request(&mut self, surface: ToplevelSurface) {}

    /// A toplevel surface requested to stop being maximized
    fn unmaximize_request(&mut self, surface: ToplevelSurface) {}

    /// A toplevel surface requested to be set fullscreen
    fn fullscreen_request(&mut self, surface: ToplevelSurface) {}

    /// A toplevel surface request to stop being fullscreen
    fn unfullscreen_request(&mut self, surface: ToplevelSurface) {}

    /// A toplevel surface requested to be minimized
    fn minimize_request(&mut self, surface: ToplevelSurface) {}

    /// The client requests the window menu to be displayed on this surface at this location
    ///
    /// This menu belongs to the compositor. It is typically expected to contain options for
    /// control of the window (maximize/minimize/close/move/etc...).
    fn show_window_menu(
        &mut self,
        surface: ToplevelSurface,
        seat: Resource<WlSeat>,
        serial: Serial,
        location: Point<i32, Logical>,
    ) {
    }

    /// A surface has acknowledged a configure serial.
    ///
    /// Called once per consumed configure, oldest first, when a serial acknowledges several.
    fn ack_configure(&mut self, surface: Resource<WlSurface>, configure: Configure) {}

    /// A client requested a reposition, providing a new
    /// positioner, of a popup.
    fn reposition_request(&mut self, surface: PopupSurface, positioner: PositionerState, token: u32);

    /// A toplevel surface was destroyed.
    fn toplevel_destroyed(&mut self, surface: ToplevelSurface) {}

    /// A popup surface was destroyed.
    fn popup_destroyed(&mut self, surface: PopupSurface) {}

    /// The toplevel surface set a different app id.
    fn app_id_changed(&mut self, surface: ToplevelSurface) {}

    /// The toplevel surface set a different title.
    fn title_changed(&mut self, surface: ToplevelSurface) {}

    /// The parent of a toplevel surface has changed.
    fn parent_changed(&mut self, surface: ToplevelSurface) {}
}

/// Macro to delegate implementation of the xdg shell to [`XdgShellState`].
///
/// You must also implement [`XdgShellHandler`] to use this.
#[macro_export]
macro_rules! delegate_xdg_shell {
    ($ty: ty) => {
        $crate::delegate_global_dispatch!($ty: [$crate::protocol::xdg_wm_base::XdgWmBase: ()] => $crate::wayland::shell::xdg::XdgShellState);
        $crate::delegate_global_dispatch!($ty: [$crate::protocol::zxdg_shell_v6::ZxdgShellV6: ()] => $crate::wayland::shell::xdg::XdgShellState);
        $crate::delegate_dispatch!($ty: [$crate::protocol::xdg_wm_base::XdgWmBase: $crate::wayland::shell::xdg::XdgWmBaseUserData] => $crate::wayland::shell::xdg::XdgShellState);
        $crate::delegate_dispatch!($ty: [$crate::protocol::zxdg_shell_v6::ZxdgShellV6: $crate::wayland::shell::xdg::XdgWmBaseUserData] => $crate::wayland::shell::xdg::XdgShellState);
        $crate::delegate_dispatch!($ty: [$crate::protocol::xdg_positioner::XdgPositioner: $crate::wayland::shell::xdg::XdgPositionerUserData] => $crate::wayland::shell::xdg::XdgShellState);
        $crate::delegate_dispatch!($ty: [$crate::protocol::xdg_surface::XdgSurface: $crate::wayland::shell::xdg::XdgSurfaceUserData] => $crate::wayland::shell::xdg::XdgShellState);
        $crate::delegate_dispatch!($ty: [$crate::protocol::xdg_toplevel::XdgToplevel: $crate::wayland::shell::xdg::XdgShellSurfaceUserData] => $crate::wayland::shell::xdg::XdgShellState);
        $crate::delegate_dispatch!($ty: [$crate::protocol::xdg_popup::XdgPopup: $crate::wayland::shell::xdg::XdgShellSurfaceUserData] => $crate::wayland::shell::xdg::XdgShellState);
    };
}

#[cfg(test)]
mod tests;
