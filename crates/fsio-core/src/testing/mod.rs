//! Helpers shared by backend test suites.

pub mod conformance;
mod random;

pub use random::{generate_locations, RandomFs};
