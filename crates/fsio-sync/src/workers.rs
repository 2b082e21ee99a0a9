use std::sync::Arc;

use fsio_core::{Context, Filesystem, FsError};
use futures::StreamExt;
use tokio::sync::{mpsc, Semaphore};
use tokio::task::JoinSet;
use tracing::{info, instrument};

use crate::transfer::{classify, transfer, Mode, Outcome, Report, SyncOptions};

/// [`copy`](crate::copy) with up to `workers` items in flight. The first
/// error stops dispatch; items already started are awaited before returning.
#[instrument(skip(ctx, dst, src), level = "debug")]
pub async fn copy_workers(
    workers: usize,
    ctx: &Context,
    dst: Arc<dyn Filesystem>,
    src: Arc<dyn Filesystem>,
) -> Result<Report, FsError> {
    run(workers, ctx, dst, src, Mode::Copy, SyncOptions::default()).await
}

/// [`sync`](crate::sync) with up to `workers` items in flight.
#[instrument(skip(ctx, dst, src), level = "debug")]
pub async fn sync_workers(
    workers: usize,
    ctx: &Context,
    dst: Arc<dyn Filesystem>,
    src: Arc<dyn Filesystem>,
    options: SyncOptions,
) -> Result<Report, FsError> {
    run(workers, ctx, dst, src, Mode::Sync, options).await
}

type TaskResult = Option<Outcome>;

fn join_error(err: tokio::task::JoinError) -> FsError {
    FsError::Io(format!("transfer task failed: {err}"))
}

async fn run(
    workers: usize,
    ctx: &Context,
    dst: Arc<dyn Filesystem>,
    src: Arc<dyn Filesystem>,
    mode: Mode,
    options: SyncOptions,
) -> Result<Report, FsError> {
    let workers = workers.max(1);
    let permits = Arc::new(Semaphore::new(workers));
    let (err_tx, mut err_rx) = mpsc::channel::<FsError>(workers);
    let mut tasks: JoinSet<TaskResult> = JoinSet::new();
    let mut report = Report::default();
    let mut fatal: Option<FsError> = None;
    let mut dispatched = 0u64;
    let mut capped = false;

    let mut entries = src.files(ctx);
    'dispatch: while let Some(entry) = entries.next().await {
        if options.reached(dispatched) {
            info!(dispatched, "file cap reached");
            capped = true;
            break;
        }

        while let Some(done) = tasks.try_join_next() {
            match done {
                Ok(Some(outcome)) => report.record(outcome),
                Ok(None) => {}
                Err(err) => {
                    if let Some(err) = classify(mode, join_error(err), &mut report) {
                        fatal = Some(err);
                        break 'dispatch;
                    }
                }
            }
        }

        let permit = loop {
            tokio::select! {
                biased;
                _ = ctx.done() => {
                    fatal = ctx.err();
                    break 'dispatch;
                }
                Some(err) = err_rx.recv() => {
                    if let Some(err) = classify(mode, err, &mut report) {
                        fatal = Some(err);
                        break 'dispatch;
                    }
                }
                permit = permits.clone().acquire_owned() => match permit {
                    Ok(permit) => break permit,
                    Err(_) => {
                        fatal = Some(FsError::Io("worker pool closed".to_string()));
                        break 'dispatch;
                    }
                },
            }
        };
        dispatched += 1;

        let ctx = ctx.clone();
        let dst = Arc::clone(&dst);
        let src = Arc::clone(&src);
        let err_tx = err_tx.clone();
        tasks.spawn(async move {
            let _permit = permit;
            match transfer(&ctx, dst.as_ref(), src.as_ref(), &entry, mode).await {
                Ok(outcome) => Some(outcome),
                Err(err) => {
                    let _ = err_tx.send(err.at(&entry.location)).await;
                    None
                }
            }
        });
    }
    drop(entries);
    drop(err_tx);

    if fatal.is_none() && !capped {
        fatal = ctx.err();
    }

    // Wait for everything in flight, still draining errors so no task blocks
    // on a full channel.
    loop {
        tokio::select! {
            Some(err) = err_rx.recv() => {
                if let Some(err) = classify(mode, err, &mut report) {
                    fatal.get_or_insert(err);
                }
            }
            done = tasks.join_next() => match done {
                Some(Ok(Some(outcome))) => report.record(outcome),
                Some(Ok(None)) => {}
                Some(Err(err)) => {
                    if let Some(err) = classify(mode, join_error(err), &mut report) {
                        fatal.get_or_insert(err);
                    }
                }
                None => break,
            },
        }
    }
    while let Ok(err) = err_rx.try_recv() {
        if let Some(err) = classify(mode, err, &mut report) {
            fatal.get_or_insert(err);
        }
    }

    match fatal {
        Some(err) => Err(err),
        None => Ok(report),
    }
}
