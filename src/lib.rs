#![cfg_attr(docsrs, feature(doc_auto_cfg))]
#![warn(missing_docs, missing_debug_implementations, rust_2018_idioms)]

//! # Waystate: protocol state machines for wayland-style compositors
//!
//! This crate implements the stateful core of a wayland-style display server, independently of
//! any socket or wire encoding: the object model tracking the protocol objects of every client,
//! the double-buffered surface state, the seat with its input devices and grabs, clipboard and
//! drag-and-drop, and the configure handshake of the xdg shell. A client side runtime, with its
//! reading thread and event queues, is available behind the `client` feature.
//!
//! ## Structure of the crate
//!
//! - [`server`] contains the object model: clients, resources, globals and the dispatching of
//!   requests to your state.
//! - [`protocol`] describes the interfaces, their requests, events and error codes.
//! - [`wayland`] contains the handlers of the core protocols, which you plug in your state with
//!   [`delegate_dispatch!`] and [`delegate_global_dispatch!`].
//! - [`input`] contains the seat abstraction, independent of any protocol object.
//! - `client` contains the client connection and its event queues.
//!
//! ## General principles
//!
//! ### State handling
//!
//! Every request is dispatched with a mutable reference to a single value holding the whole
//! state of your compositor. The handlers of this crate reach the part of the state they need
//! through small traits (such as [`wayland::compositor::CompositorHandler`]), and keep their
//! per-object data in the user data of the resources.
//!
//! ### Logging
//!
//! Waystate makes extensive use of [`tracing`] for its internal logging.
//!
//! For release builds it is recommended to limit the log level during compile time.
//! This can be done by adding a dependency to [`tracing`] and enabling the corresponding features:
//!
//! ```toml
//! [dependencies]
//! tracing = { version = "0.1", features = ["max_level_trace", "release_max_level_debug"] }
//! ```

pub mod input;
pub mod protocol;
pub mod server;
pub mod utils;
pub mod wayland;

#[cfg(feature = "client")]
pub mod client;

#[cfg(test)]
mod test_utils;
