use fsio_core::{Context, Entry, Filesystem, FsError};
use tracing::debug;

/// Whether per-item failures end the run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Mode {
    /// First error aborts.
    Copy,
    /// Errors are logged and skipped, except context errors.
    Sync,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Outcome {
    Skipped,
    Transferred,
}

/// Aggregate counts for one engine run.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct Report {
    pub transferred: u64,
    pub skipped: u64,
    pub failed: u64,
}

impl Report {
    pub(crate) fn record(&mut self, outcome: Outcome) {
        match outcome {
            Outcome::Skipped => self.skipped += 1,
            Outcome::Transferred => self.transferred += 1,
        }
    }
}

/// Options for the best-effort modes.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct SyncOptions {
    /// Stop dispatching after this many entries. `None` or `Some(0)` means no cap.
    pub max_files: Option<u64>,
}

impl SyncOptions {
    pub fn with_max_files(max_files: u64) -> Self {
        Self {
            max_files: Some(max_files),
        }
    }

    pub(crate) fn reached(&self, dispatched: u64) -> bool {
        matches!(self.max_files, Some(max) if max > 0 && dispatched >= max)
    }
}

/// Decide what a failed item means for the run.
///
/// Returns the error when it must end the run, otherwise logs it and counts
/// it as a failure.
pub(crate) fn classify(mode: Mode, err: FsError, report: &mut Report) -> Option<FsError> {
    if mode == Mode::Copy || err.is_context() {
        return Some(err);
    }
    tracing::warn!(error = %err, "sync item failed");
    report.failed += 1;
    None
}

/// Bring one entry up to date at the destination.
pub(crate) async fn transfer(
    ctx: &Context,
    dst: &dyn Filesystem,
    src: &dyn Filesystem,
    entry: &Entry,
    mode: Mode,
) -> Result<Outcome, FsError> {
    ctx.check()?;
    let location = &entry.location;

    let src_checksum = match src.checksum_cheap(ctx, location).await {
        Ok(checksum) => Some(checksum),
        Err(err) if mode == Mode::Copy || err.is_context() => return Err(err),
        Err(err) => {
            debug!(%location, error = %err, "source checksum unavailable, transferring");
            None
        }
    };
    let dst_checksum = match dst.checksum_cheap(ctx, location).await {
        Ok(checksum) => Some(checksum),
        Err(err) if err.is_context() => return Err(err),
        Err(_) => None,
    };

    if let (Some(src_checksum), Some(dst_checksum)) = (&src_checksum, &dst_checksum) {
        if !src_checksum.is_empty() && src_checksum == dst_checksum {
            debug!(%location, "unchanged, skipping");
            return Ok(Outcome::Skipped);
        }
    }

    let mut reader = src.open(ctx, location).await?;
    dst.write_file(ctx, location, &mut *reader, entry.mod_time)
        .await?;
    debug!(%location, "transferred");
    Ok(Outcome::Transferred)
}

#[cfg(test)]
mod tests {
    use super::*;
    use fsio_core::Location;

    #[test]
    fn test_max_files() {
        assert!(!SyncOptions::default().reached(1_000_000));
        assert!(!SyncOptions::with_max_files(0).reached(5));
        assert!(!SyncOptions::with_max_files(3).reached(2));
        assert!(SyncOptions::with_max_files(3).reached(3));
    }

    #[test]
    fn test_classify() {
        let location = Location::parse("x").unwrap();
        let mut report = Report::default();

        let err = FsError::Remote("boom".into()).at(&location);
        assert!(classify(Mode::Sync, err, &mut report).is_none());
        assert_eq!(report.failed, 1);

        let err = FsError::Cancelled.at(&location);
        assert!(classify(Mode::Sync, err, &mut report).is_some());

        let err = FsError::Remote("boom".into());
        assert!(classify(Mode::Copy, err, &mut report).is_some());
        assert_eq!(report.failed, 1);
    }
}
