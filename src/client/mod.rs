//! Client side connection
//!
//! A [`Connection`] owns the [`Transport`] to the server and a background thread blocking on it.
//! Every event read by this thread is handed to the [`EventQueue`] of the object it is addressed
//! to, and the application drains each queue from the thread of its choice. Objects are
//! [`Proxy`] handles, created on a given queue with a [`Dispatch`] implementation receiving
//! their events.
//!
//! ```no_run
//! use waystate::client::{Connection, ConnectionConfig, Registry, Transport, Message};
//! # struct Socket;
//! # impl Transport for Socket {
//! #     fn send(&self, _: Message) -> std::io::Result<()> { Ok(()) }
//! #     fn recv(&self) -> std::io::Result<Option<Message>> { Ok(None) }
//! # }
//! struct App;
//!
//! let conn = Connection::new(Socket, ConnectionConfig::default()).unwrap();
//! let mut queue = conn.new_event_queue::<App>();
//! let registry = Registry::new(&conn, &queue.handle());
//! // wait for the server to advertise its globals
//! queue.roundtrip(&mut App).unwrap();
//! for global in registry.globals() {
//!     println!("{} v{}", global.interface, global.version);
//! }
//! ```
//!
//! Once the transport fails or the server hangs up, the connection is dead: the callbacks given
//! to [`Connection::on_death`] run once, requests are silently dropped and
//! [`EventQueue::blocking_dispatch`] returns the [`ConnectionError`] after the events that were
//! already queued have been dispatched.

use std::{io, sync::Arc};

use crate::server::ProtocolError;

mod connection;
mod event_queue;
mod proxy;
mod registry;
mod transport;

#[cfg(test)]
mod tests;

pub use self::connection::{Connection, ConnectionConfig};
pub use self::event_queue::{Dispatch, EventQueue, QueueHandle};
pub use self::proxy::{ObjectId, Proxy};
pub use self::registry::{BindError, GlobalEntry, Registry};
pub use self::transport::{Argument, Message, Transport};

/// Protocol id of the `wl_display` object
pub const DISPLAY_ID: u32 = 1;

/// Fatal error of a client connection
#[derive(Debug, Clone, thiserror::Error)]
pub enum ConnectionError {
    /// The server hung up
    #[error("the server closed the connection")]
    Died,
    /// The transport failed
    #[error("transport error")]
    Io(#[source] Arc<io::Error>),
    /// The server killed the connection with a protocol error
    #[error(transparent)]
    Protocol(ProtocolError),
}

impl From<io::Error> for ConnectionError {
    fn from(err: io::Error) -> Self {
        ConnectionError::Io(Arc::new(err))
    }
}
