mod config;

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context as _;
use aws_config::Region;
use aws_sdk_s3::config::{BehaviorVersion, Credentials};
use clap::Parser;
use fsio_core::{Context, Filesystem};
use fsio_gdrive::{GoogleDriveConfig, GoogleDriveFs, ServiceAccountKey, ServiceAccountTokens, SCOPES};
use fsio_s3::S3Fs;
use fsio_sync::{sync_workers, SyncOptions};
use tokio::signal;
use tokio::sync::watch as tokio_watch;
use tokio::time::MissedTickBehavior;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use config::Config;

/// Upper bound on the startup connectivity checks.
const CONNECT_TIMEOUT: Duration = Duration::from_secs(60);

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let config = Config::parse();
    config.validate()?;

    info!("Starting fsio-drive2s3");
    info!("  S3 bucket: {}", config.s3_bucket);
    info!("  Workers: {}", config.workers);
    info!("  Interval: {}s", config.interval().as_secs());

    let root = Context::new();

    let s3 = connect_s3(&config).await?;
    info!("Connected to S3 bucket {}", s3.bucket());

    let drive = connect_drive(&config, &root).await?;
    info!("Connected to Google Drive");

    // Create shutdown signal
    let mut shutdown_rx = create_shutdown_signal();
    {
        let root = root.clone();
        let mut shutdown_rx = shutdown_rx.clone();
        tokio::spawn(async move {
            let _ = shutdown_rx.wait_for(|&v| v).await;
            root.cancel();
        });
    }

    let dst: Arc<dyn Filesystem> = Arc::new(s3);
    let src: Arc<dyn Filesystem> = Arc::new(drive);

    let mut ticker = tokio::time::interval(config.interval());
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            biased;
            _ = shutdown_rx.wait_for(|&v| v) => break,
            _ = ticker.tick() => {}
        }

        info!("Sync run starting");
        match sync_workers(
            config.workers,
            &root,
            dst.clone(),
            src.clone(),
            SyncOptions::default(),
        )
        .await
        {
            Ok(report) if report.failed > 0 => warn!(
                transferred = report.transferred,
                skipped = report.skipped,
                failed = report.failed,
                "Sync run finished with failures"
            ),
            Ok(report) => info!(
                transferred = report.transferred,
                skipped = report.skipped,
                "Sync run finished"
            ),
            Err(e) if e.is_context() => break,
            Err(e) if config.once => return Err(e.into()),
            Err(e) => error!(error = %e, "Sync run aborted"),
        }

        if config.once {
            break;
        }
        info!("Next sync in {}s", config.interval().as_secs());
    }

    info!("Shutdown complete");
    Ok(())
}

/// Build the S3 destination and check that its bucket is reachable.
async fn connect_s3(config: &Config) -> anyhow::Result<S3Fs> {
    let credentials = Credentials::new(
        &config.s3_access_key_id,
        &config.s3_secret_access_key,
        None,
        None,
        "drive2s3",
    );

    let mut builder = aws_sdk_s3::Config::builder()
        .behavior_version(BehaviorVersion::latest())
        .credentials_provider(credentials)
        .region(Region::new(config.s3_region.clone()));
    if let Some(endpoint) = &config.s3_endpoint {
        builder = builder.endpoint_url(endpoint).force_path_style(true);
    }
    let client = aws_sdk_s3::Client::from_conf(builder.build());

    tokio::time::timeout(
        CONNECT_TIMEOUT,
        client.head_bucket().bucket(&config.s3_bucket).send(),
    )
    .await
    .context("S3 did not answer in time")?
    .with_context(|| format!("bucket {} is not reachable", config.s3_bucket))?;

    let mut s3 = S3Fs::new(client, config.s3_bucket.clone(), config.cache_expiry());
    if let Some(dir) = &config.s3_cache_dir {
        s3 = s3.with_cache_dir(dir.clone());
    }
    Ok(s3)
}

/// Build the Drive source and check that its credentials are accepted.
///
/// An account with no files is valid; the first sync simply copies nothing.
async fn connect_drive(config: &Config, root: &Context) -> anyhow::Result<GoogleDriveFs> {
    let key = ServiceAccountKey::from_file(&config.drive_account_file)
        .await
        .with_context(|| {
            format!(
                "failed to load service account from {}",
                config.drive_account_file.display()
            )
        })?;
    let tokens = Arc::new(ServiceAccountTokens::new(
        key,
        SCOPES,
        config.drive_subject.clone(),
    ));

    let drive = GoogleDriveFs::new(GoogleDriveConfig {
        current_account: config.drive_current_account,
        shared_drives: config.drive_shared_drives,
        other_users: config.drive_other_users,
        ..GoogleDriveConfig::new(tokens)
    });

    let check = root.with_timeout(CONNECT_TIMEOUT);
    let result = drive.check_access(&check).await;
    check.cancel();
    result.context("Google Drive rejected the service account")?;
    Ok(drive)
}

/// Create a shutdown signal that triggers on Ctrl+C or SIGTERM.
fn create_shutdown_signal() -> tokio_watch::Receiver<bool> {
    let (tx, rx) = tokio_watch::channel(false);

    tokio::spawn(async move {
        let ctrl_c = async {
            if let Err(e) = signal::ctrl_c().await {
                error!(error = %e, "Failed to install Ctrl+C handler");
                std::future::pending::<()>().await;
            }
            info!("Received Ctrl+C, initiating shutdown");
        };

        #[cfg(unix)]
        let terminate = async {
            match signal::unix::signal(signal::unix::SignalKind::terminate()) {
                Ok(mut sigterm) => {
                    sigterm.recv().await;
                }
                Err(e) => {
                    error!(error = %e, "Failed to install SIGTERM handler");
                    std::future::pending::<()>().await;
                }
            }
            info!("Received SIGTERM, initiating shutdown");
        };

        #[cfg(not(unix))]
        let terminate = std::future::pending::<()>();

        tokio::select! {
            _ = ctrl_c => {},
            _ = terminate => {},
        }

        let _ = tx.send(true);
    });

    rx
}
