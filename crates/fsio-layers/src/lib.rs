//! Decorator backends that wrap another [`fsio_core::Filesystem`].

mod gzip;
mod pathmod;

pub use gzip::GzipFs;
pub use pathmod::PathModFs;
