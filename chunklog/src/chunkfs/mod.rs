//! Chunk files and the machinery that guards access to them.
//!
//! - [`access`]: per-chunk state machine coordinating readers, a single
//!   writer and deletion.
//! - [`chunk`]: the on-disk chunk format and its cursor.
//! - [`provider`]: bounded cache of open chunks handing out guarded handles.

pub(crate) mod access;
pub(crate) mod chunk;
pub(crate) mod provider;

pub use access::ChunkAccessor;
pub use chunk::{AppendOutcome, Chunk, ChunkReader, RawRecord};
pub use provider::{AccessMode, ChunkHandle, ChunkListener, Provider};

/// Size of the fixed chunk file header.
pub const HEADER_SIZE: u64 = 8;
