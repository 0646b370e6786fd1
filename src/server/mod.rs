//! Server side object model
//!
//! This module provides the substrate every protocol module of this crate is built on:
//!
//! - the [`Display`], owning the client connections and the globals, and its cloneable
//!   [`DisplayHandle`];
//! - [`Client`] handles, each with its own [`SerialCounter`](crate::utils::SerialCounter);
//! - [`Resource`]s, the per-client protocol objects, and their [`Weak`] counterparts;
//! - the [`Dispatch`] and [`GlobalDispatch`] traits through which requests reach the
//!   compositor state.
//!
//! The byte-level wire format is not handled here. The transport decodes incoming messages
//! into the typed `Request` enums of the [`protocol`](crate::protocol) module and hands them to
//! [`Display::dispatch_request`], while outgoing events are given to the
//! [`ClientTransport`] of each connection as typed payloads.
//!
//! ```no_run
//! use std::sync::Arc;
//! use waystate::server::{ClientTransport, Display, EventMessage, NoClientData};
//! # struct Socket;
//! # impl ClientTransport for Socket {
//! #     fn send_event(&mut self, _: EventMessage) {}
//! #     fn flush(&mut self) -> std::io::Result<()> { Ok(()) }
//! # }
//! struct State;
//!
//! let mut display = Display::<State>::new();
//! let client = display.insert_client(Box::new(Socket), Arc::new(NoClientData));
//! // feed requests decoded from the socket with `display.dispatch_request(...)`
//! display.flush_clients();
//! # let _ = client;
//! ```

use std::fmt::Debug;

mod client;
mod dispatch;
mod display;
mod global;
mod id;
mod resource;

pub use self::client::{
    Client, ClientData, ClientTransport, DisconnectReason, EventMessage, EventPayload, NoClientData,
    ProtocolError,
};
pub use self::dispatch::{DataInit, Dispatch, GlobalDispatch};
pub use self::display::{Display, DisplayHandle, ObjectInfo, DISPLAY_ID};
pub use self::global::GlobalInfo;
pub use self::id::{ClientId, GlobalId, InvalidId, ObjectId, SERVER_ID_BASE};
pub use self::resource::{New, Resource, Weak};

/// A protocol interface
///
/// This is implemented by the marker types of the [`protocol`](crate::protocol) module.
pub trait Interface: 'static {
    /// Name of the interface, as advertised on the wire
    const NAME: &'static str;
    /// Highest version of the interface supported
    const VERSION: u32;
    /// Requests a client can send to objects of this interface
    type Request: Debug + Send + 'static;
    /// Events the server can send to objects of this interface
    type Event: Debug + Send + 'static;

    /// Whether this request destroys the object it is sent to
    fn is_destructor(request: &Self::Request) -> bool;
}

/// Error while dispatching a request
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DispatchError {
    /// The client is not known to this display
    #[error("unknown client {0:?}")]
    UnknownClient(ClientId),
    /// The request does not match the interface of the target object
    #[error("request for {expected} sent to an object of interface {found}")]
    InterfaceMismatch {
        /// Interface of the request
        expected: &'static str,
        /// Interface of the target object
        found: &'static str,
    },
}

/// Forward the handling of an interface to a delegate type
///
/// ```ignore
/// delegate_dispatch!(State: [WlSurface: SurfaceUserData] => CompositorState);
/// ```
#[macro_export]
macro_rules! delegate_dispatch {
    ($dispatch_from:ty : [$interface:ty : $udata:ty] => $dispatch_to:ty) => {
        impl $crate::server::Dispatch<$interface, $udata> for $dispatch_from {
            fn request(
                state: &mut Self,
                client: &$crate::server::Client,
                resource: &$crate::server::Resource<$interface>,
                request: <$interface as $crate::server::Interface>::Request,
                data: &$udata,
                dhandle: &$crate::server::DisplayHandle,
                data_init: &mut $crate::server::DataInit<'_, Self>,
            ) {
                <$dispatch_to as $crate::server::Dispatch<$interface, $udata, Self>>::request(
                    state, client, resource, request, data, dhandle, data_init,
                )
            }

            fn destroyed(
                state: &mut Self,
                client: $crate::server::ClientId,
                resource: &$crate::server::Resource<$interface>,
                data: &$udata,
            ) {
                <$dispatch_to as $crate::server::Dispatch<$interface, $udata, Self>>::destroyed(
                    state, client, resource, data,
                )
            }
        }
    };
}

/// Forward the binding of a global to a delegate type
///
/// ```ignore
/// delegate_global_dispatch!(State: [WlCompositor: ()] => CompositorState);
/// ```
#[macro_export]
macro_rules! delegate_global_dispatch {
    ($dispatch_from:ty : [$interface:ty : $gdata:ty] => $dispatch_to:ty) => {
        impl $crate::server::GlobalDispatch<$interface, $gdata> for $dispatch_from {
            fn bind(
                state: &mut Self,
                handle: &$crate::server::DisplayHandle,
                client: &$crate::server::Client,
                resource: $crate::server::New<$interface>,
                global_data: &$gdata,
                data_init: &mut $crate::server::DataInit<'_, Self>,
            ) {
                <$dispatch_to as $crate::server::GlobalDispatch<$interface, $gdata, Self>>::bind(
                    state,
                    handle,
                    client,
                    resource,
                    global_data,
                    data_init,
                )
            }

            fn can_view(client: &$crate::server::Client, global_data: &$gdata) -> bool {
                <$dispatch_to as $crate::server::GlobalDispatch<$interface, $gdata, Self>>::can_view(
                    client,
                    global_data,
                )
            }
        }
    };
}

#[cfg(test)]
mod tests;
