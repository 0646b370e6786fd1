use std::io;

use smallvec::SmallVec;

/// An argument of a decoded message
#[derive(Debug, Clone, PartialEq)]
pub enum Argument {
    /// A signed integer
    Int(i32),
    /// An unsigned integer
    Uint(u32),
    /// A fixed point number, in its raw 24.8 representation
    Fixed(i32),
    /// A string, `None` for a null string
    Str(Option<String>),
    /// The protocol id of an existing object, `0` for a null object
    Object(u32),
    /// The protocol id of a newly created object
    NewId(u32),
    /// An opaque array
    Array(Vec<u8>),
}

impl Argument {
    /// The value of an `Int` argument
    pub fn as_int(&self) -> Option<i32> {
        match *self {
            Argument::Int(value) => Some(value),
            _ => None,
        }
    }

    /// The value of a `Uint` argument
    pub fn as_uint(&self) -> Option<u32> {
        match *self {
            Argument::Uint(value) => Some(value),
            _ => None,
        }
    }

    /// The value of a non-null `Str` argument
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Argument::Str(Some(value)) => Some(value),
            _ => None,
        }
    }

    /// The protocol id carried by an `Object` or `NewId` argument
    pub fn as_object(&self) -> Option<u32> {
        match *self {
            Argument::Object(id) | Argument::NewId(id) => Some(id),
            _ => None,
        }
    }
}

/// A decoded protocol message, request or event
#[derive(Debug, Clone, PartialEq)]
pub struct Message {
    /// Protocol id of the object the message is addressed to, or sent by
    pub sender_id: u32,
    /// Opcode of the message within the interface of its object
    pub opcode: u16,
    /// Arguments of the message
    pub args: SmallVec<[Argument; 4]>,
}

impl Message {
    /// Build a message from its parts
    pub fn new(sender_id: u32, opcode: u16, args: impl IntoIterator<Item = Argument>) -> Self {
        Message {
            sender_id,
            opcode,
            args: args.into_iter().collect(),
        }
    }

    /// Protocol ids of the objects this message creates
    pub fn new_ids(&self) -> impl Iterator<Item = u32> + '_ {
        self.args.iter().filter_map(|arg| match *arg {
            Argument::NewId(id) => Some(id),
            _ => None,
        })
    }
}

/// The socket of a client connection
///
/// The transport encodes requests and decodes events, the byte-level format is its own business.
/// It is shared between the reading thread of the [`Connection`](super::Connection), which blocks
/// in [`recv`](Transport::recv), and the threads sending requests.
pub trait Transport: Send + Sync + 'static {
    /// Send a request to the server
    fn send(&self, message: Message) -> io::Result<()>;

    /// Block until the next event arrives
    ///
    /// `Ok(None)` signals an orderly hang-up of the server.
    fn recv(&self) -> io::Result<Option<Message>>;

    /// Write the buffered requests to the server
    fn flush(&self) -> io::Result<()> {
        Ok(())
    }
}
