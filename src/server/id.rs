use std::fmt;

/// First protocol id of the range allocated by the server
pub const SERVER_ID_BASE: u32 = 0xFF00_0000;

/// Identifier of a client connection, unique for the lifetime of a display
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ClientId(pub(crate) u32);

/// Identifier of a protocol object
///
/// Two ids only compare equal if they designate the very same object: the protocol id alone
/// can be reused by a client once the server acknowledged its destruction, but the
/// generation part never is.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct ObjectId {
    pub(crate) client: ClientId,
    pub(crate) protocol_id: u32,
    pub(crate) generation: u64,
}

impl ObjectId {
    /// The client this object belongs to
    pub fn client_id(&self) -> ClientId {
        self.client
    }

    /// The numeric id of this object on the wire
    pub fn protocol_id(&self) -> u32 {
        self.protocol_id
    }

    /// Whether this id was allocated by the server rather than the client
    pub fn is_server_allocated(&self) -> bool {
        self.protocol_id >= SERVER_ID_BASE
    }
}

impl fmt::Debug for ObjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "ObjectId({}, {}#{})",
            self.client.0, self.protocol_id, self.generation
        )
    }
}

impl fmt::Display for ObjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.protocol_id)
    }
}

/// Identifier of a global, which is also its advertised name
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct GlobalId(pub(crate) u32);

impl GlobalId {
    /// The name under which this global is advertised by registries
    pub fn name(&self) -> u32 {
        self.0
    }
}

/// The object or client referenced does not exist (anymore)
///
/// This is the normal outcome of a peer referencing something that was concurrently
/// destroyed, callers are expected to treat the reference as absent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("invalid or dead object id")]
pub struct InvalidId;
