//! tinylink-services - connection state, flow-controlled I/O, and the
//! tokio TCP adapter. Shared between the daemon and the integration tests.

pub mod connection;
pub mod network;
pub mod pump;
pub mod registry;
pub mod socket;
pub mod stream;
pub mod tcp;
pub mod writer;

#[cfg(test)]
mod testing;

pub use connection::{Connection, ConnectionState, Transition};
pub use network::{NetError, Network, NetworkSettings};
pub use pump::{pump_fn, Pump};
pub use registry::InstanceRegistry;
pub use socket::{ByteChain, SendFlags, SocketError, SocketHandle};
pub use writer::WriteError;

pub use tinylink_core::{Chunk, ChunkQueue, ConnectionId};
