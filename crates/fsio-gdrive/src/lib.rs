//! Federated Google Drive backend.
//!
//! One read-only namespace stitched from the current account's files, every
//! shared drive it can see, and the files of every user in its administered
//! domains:
//!
//! ```text
//! personal/files/<path>
//! drives/<drive name>/files/<path>
//! domains/<domain>/users/<email>/files/<path>
//! ```
//!
//! Google-native documents are exported on open, preferring Office formats.

pub mod auth;
mod client;
mod directory;
mod drive;
mod fs;
mod model;
mod namespace;
mod walk;

pub use auth::{ServiceAccountKey, ServiceAccountTokens, StaticToken, TokenProvider, SCOPES};
pub use client::{Endpoints, RetryPolicy, DIRECTORY_BASE_URL, DRIVE_BASE_URL};
pub use fs::{GoogleDriveConfig, GoogleDriveFs};
