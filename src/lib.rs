//! Lazy, replayable byte sources.
//!
//! A [`ByteSource`] describes how to produce a sequence of [`Chunk`]s and,
//! optionally, how long the sequence is. Nothing happens until the source
//! is consumed, and every consumption starts over with its own resources.
//! Sources are drained with [`ByteSource::write_to`] or collected with
//! [`ByteSource::read_all`]; [`materialize`] moves a source's content into a
//! self-deleting temporary file.
//!
//! Every operation reports failures as [`ByteSourceError`] values.

pub mod cancel;
pub mod chunk;
pub mod config;
pub mod detach;
mod errors;
pub mod named;
pub mod outcome;
pub mod pool;
pub mod pull;
mod read;
pub mod sink;
pub mod source;
pub mod uri;

pub use cancel::Cancellation;
pub use chunk::{Chunk, SharedBuffer};
pub use config::{CopyMode, ReadConfig, WriteOptions};
pub use detach::{detach, materialize};
pub use errors::{ByteSourceError, Result, TIMEOUT_MESSAGE};
pub use named::NamedByteSource;
pub use pool::{ChunkPool, PoolStats};
pub use sink::{
    ChunkWritten, DefensiveCopy, WriteStrategy, WriteSummary, ZeroCopy,
};
pub use source::{chunk_bytes, ByteSource, ChunkStream};

pub const KILOBYTE: usize = 1024;
pub const MEGABYTE: usize = 1024 * KILOBYTE;

/// Chunk size used when none is given.
pub const DEFAULT_BUFFER_SIZE: usize = MEGABYTE;
