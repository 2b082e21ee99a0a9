//! Core traits and types for fsio storage backends.
//!
//! This crate defines the abstractions shared by every backend and by the
//! sync engine:
//! - `Filesystem`: the uniform contract over one storage root
//! - `Location` / `Entry`: segment-based paths and enumeration results
//! - `Context`: cancellation and deadlines threaded through every call
//! - checksum strategies and the self-deleting `SpooledFile`

pub mod checksum;
mod context;
mod error;
mod filesystem;
pub mod io;
mod location;
pub mod mime;
mod spooled;

#[cfg(any(test, feature = "testing"))]
pub mod testing;

pub use checksum::{cheap_checksum, content_checksum};
pub use context::Context;
pub use error::FsError;
pub use filesystem::{entry_stream, EntryStream, FileReader, Filesystem, ENTRY_QUEUE_CAPACITY};
pub use location::{Entry, Location};
pub use spooled::SpooledFile;
