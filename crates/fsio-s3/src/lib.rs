//! S3-compatible object store backend.
//!
//! Objects carry their modification time in user metadata and a SHA-256
//! checksum computed at upload, so listings and checksums never need to
//! download content. Downloads land in a disk cache that expires on its own.

mod cache;
mod fs;
pub mod metadata;
mod retry;

pub use fs::S3Fs;
