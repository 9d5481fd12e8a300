//! tinylink-core - the chunk queue, stream framing, and configuration.
//! All other tinylink crates depend on this one.

pub mod chunk;
pub mod config;
pub mod reader;

pub use chunk::{Chunk, ChunkQueue, ConnectionId};
pub use reader::{take_line, ExactRead, Line, ReadError};
