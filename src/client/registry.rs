use std::{
    ops::RangeInclusive,
    sync::{Arc, Mutex},
};

use tracing::{debug, warn};

use super::{
    connection::DISPLAY_GET_REGISTRY, Argument, Connection, Dispatch, Message, Proxy, QueueHandle,
};

// wl_registry request
const REGISTRY_BIND: u16 = 0;
// wl_registry events
const REGISTRY_GLOBAL: u16 = 0;
const REGISTRY_GLOBAL_REMOVE: u16 = 1;

/// A global advertised by the server
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GlobalEntry {
    /// Numeric name of the global
    pub name: u32,
    /// Interface implemented by the global
    pub interface: String,
    /// Highest version of the interface supported by the server
    pub version: u32,
}

/// Error binding a global
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum BindError {
    /// The server does not advertise the interface
    #[error("the server does not advertise {0}")]
    NotPresent(&'static str),
    /// The server supports an older version of the interface than required
    #[error("{interface} is advertised at version {available}, version {required} is required")]
    UnsupportedVersion {
        /// The interface
        interface: &'static str,
        /// Version advertised by the server
        available: u32,
        /// Lowest version acceptable
        required: u32,
    },
}

type GlobalList = Arc<Mutex<Vec<GlobalEntry>>>;

struct RegistryHandler {
    globals: GlobalList,
}

impl<S> Dispatch<S> for RegistryHandler {
    fn event(&self, _state: &mut S, _proxy: &Proxy, event: Message, _conn: &Connection, _qh: &QueueHandle<S>) {
        let mut globals = self.globals.lock().unwrap();
        match (event.opcode, event.args.as_slice()) {
            (REGISTRY_GLOBAL, [Argument::Uint(name), Argument::Str(Some(interface)), Argument::Uint(version)]) => {
                debug!(name = *name, interface = interface.as_str(), version = *version, "new global");
                globals.push(GlobalEntry {
                    name: *name,
                    interface: interface.clone(),
                    version: *version,
                });
            }
            (REGISTRY_GLOBAL_REMOVE, [Argument::Uint(name)]) => {
                debug!(name = *name, "global removed");
                globals.retain(|global| global.name != *name);
            }
            _ => warn!(?event, "malformed wl_registry event"),
        }
    }
}

/// Mirror of the globals advertised by the server
///
/// The mirror is updated when the queue it was created on is dispatched.
#[derive(Debug)]
pub struct Registry {
    proxy: Proxy,
    conn: Connection,
    globals: GlobalList,
}

impl Registry {
    /// Create a `wl_registry` whose events are dispatched by the queue of `qh`
    pub fn new<S: 'static>(conn: &Connection, qh: &QueueHandle<S>) -> Registry {
        let globals = GlobalList::default();
        let proxy = conn.create_object(
            "wl_registry",
            1,
            qh,
            RegistryHandler {
                globals: globals.clone(),
            },
        );
        conn.send_request(
            &conn.display(),
            DISPLAY_GET_REGISTRY,
            [Argument::NewId(proxy.protocol_id())],
        );
        Registry {
            proxy,
            conn: conn.clone(),
            globals,
        }
    }

    /// The `wl_registry` object
    pub fn proxy(&self) -> &Proxy {
        &self.proxy
    }

    /// The globals currently advertised
    pub fn globals(&self) -> Vec<GlobalEntry> {
        self.globals.lock().unwrap().clone()
    }

    /// The first global implementing `interface`
    pub fn find(&self, interface: &str) -> Option<GlobalEntry> {
        self.globals
            .lock()
            .unwrap()
            .iter()
            .find(|global| global.interface == interface)
            .cloned()
    }

    /// Bind the first global implementing `interface`
    ///
    /// The object is created at the highest version in `versions` the server supports. Its
    /// events are delivered to `handler` through the queue of `qh`.
    pub fn bind<S: 'static>(
        &self,
        qh: &QueueHandle<S>,
        interface: &'static str,
        versions: RangeInclusive<u32>,
        handler: impl Dispatch<S>,
    ) -> Result<Proxy, BindError> {
        let global = self.find(interface).ok_or(BindError::NotPresent(interface))?;
        if global.version < *versions.start() {
            return Err(BindError::UnsupportedVersion {
                interface,
                available: global.version,
                required: *versions.start(),
            });
        }
        let version = global.version.min(*versions.end());
        let proxy = self.conn.create_object(interface, version, qh, handler);
        self.conn.send_request(
            &self.proxy,
            REGISTRY_BIND,
            [
                Argument::Uint(global.name),
                Argument::Str(Some(interface.into())),
                Argument::Uint(version),
                Argument::NewId(proxy.protocol_id()),
            ],
        );
        Ok(proxy)
    }
}
