//! Protocol-related utilities
//!
//! This module contains the handlers of the core protocols. Most of them work in the same way:
//!
//! - A state type (such as [`compositor::CompositorState`]) is created with the display handle and
//!   creates one or more globals.
//! - Your compositor state implements the handler trait of the module, and the requests of the
//!   protocol objects are delegated to the state type with
//!   [`delegate_dispatch!`](crate::delegate_dispatch).
//! - The per-object state is kept in the user data of the resources and is reachable through the
//!   functions of the module.

pub mod buffer;
pub mod compositor;
pub mod data_device;
pub mod seat;
pub mod shell;
