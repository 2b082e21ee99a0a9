//! Copy and sync engine.
//!
//! Every mode enumerates the source lazily and, per entry, compares the
//! cheap checksums of source and destination. Equal non-empty checksums
//! skip the entry; anything else streams the source file into the
//! destination with the entry's modification time.
//!
//! | Mode | Concurrency | On item error |
//! |---|---|---|
//! | [`copy`] | sequential | abort |
//! | [`copy_workers`] | bounded | abort once any error surfaces |
//! | [`sync`] | sequential | log and continue |
//! | [`sync_workers`] | bounded | log and continue |
//!
//! Cancellation and deadline errors end every mode.

mod sequential;
mod transfer;
mod workers;

pub use sequential::{copy, sync};
pub use transfer::{Report, SyncOptions};
pub use workers::{copy_workers, sync_workers};
