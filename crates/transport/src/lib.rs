//! External collaborator seams for the shoal engine: the real-time chat
//! wire client and the user/channel directory, plus an in-memory directory
//! implementation for tests and small embeddings.

pub mod directory;
pub mod memory;
pub mod transport;

pub use {
    directory::Directory,
    memory::MemoryDirectory,
    transport::{ChatTransport, Connector, TransportEvent, TransportEventReceiver},
};
