use fsio_core::{Context, Filesystem, FsError};
use futures::StreamExt;
use tracing::{info, instrument};

use crate::transfer::{classify, transfer, Mode, Report, SyncOptions};

/// Copy every source entry to `dst`, one at a time. The first error aborts.
#[instrument(skip_all, level = "debug")]
pub async fn copy(ctx: &Context, dst: &dyn Filesystem, src: &dyn Filesystem) -> Result<Report, FsError> {
    run(ctx, dst, src, Mode::Copy, SyncOptions::default()).await
}

/// Like [`copy`] but keeps going past item failures, logging them. Context
/// cancellation and deadlines still end the run with an error.
#[instrument(skip_all, level = "debug")]
pub async fn sync(
    ctx: &Context,
    dst: &dyn Filesystem,
    src: &dyn Filesystem,
    options: SyncOptions,
) -> Result<Report, FsError> {
    run(ctx, dst, src, Mode::Sync, options).await
}

async fn run(
    ctx: &Context,
    dst: &dyn Filesystem,
    src: &dyn Filesystem,
    mode: Mode,
    options: SyncOptions,
) -> Result<Report, FsError> {
    let mut report = Report::default();
    let mut dispatched = 0u64;
    let mut entries = src.files(ctx);

    while let Some(entry) = entries.next().await {
        if options.reached(dispatched) {
            info!(dispatched, "file cap reached");
            return Ok(report);
        }
        dispatched += 1;

        match transfer(ctx, dst, src, &entry, mode).await {
            Ok(outcome) => report.record(outcome),
            Err(err) => {
                if let Some(fatal) = classify(mode, err.at(&entry.location), &mut report) {
                    return Err(fatal);
                }
            }
        }
    }

    // Enumeration ends quietly on cancellation; surface it here.
    ctx.check()?;
    Ok(report)
}
