//! Handler utilities for the shell protocols
//!
//! Wayland, via its different protocol extensions, supports different kind of
//! shells. Here a shell represent the logic associated to displaying windows and
//! arranging them on the screen.
//!
//! The [`xdg`] module provides handlers for the `xdg_shell` protocol, the current standard for
//! desktop apps, and for its unstable v6 predecessor.

use thiserror::Error;

use crate::{protocol::wl_surface::WlSurface, server::Resource, utils::Serial, wayland::compositor};

pub mod xdg;

/// Represents the possible errors returned from
/// a client ping
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum PingError {
    /// The operation failed because the shell object of the client has been destroyed
    #[error("the ping failed cause the shell object has been destroyed")]
    DeadSurface,
    /// There is already a pending ping
    #[error("there is already a ping pending `{0:?}`")]
    PingAlreadyPending(Serial),
}

/// Returns true if the surface is toplevel equivalent.
///
/// Currently is method only checks if the surface roles is `xdg_toplevel`,
/// but may be extended to other shell-protocols in the future, if applicable.
pub fn is_toplevel_equivalent(surface: &Resource<WlSurface>) -> bool {
    matches!(compositor::get_role(surface), Some(xdg::XDG_TOPLEVEL_ROLE))
}
