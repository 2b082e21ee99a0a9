use std::path::PathBuf;
use std::time::Duration;

use clap::Parser;

/// Configuration for the fsio-drive2s3 sync daemon.
#[derive(Parser, Debug, Clone)]
#[command(name = "fsio-drive2s3")]
#[command(about = "Mirror a federated Google Drive namespace into an S3 bucket")]
pub struct Config {
    /// Transfers in flight per sync run
    #[arg(long, default_value = "100", env = "DRIVE2S3_WORKERS")]
    pub workers: usize,

    /// Seconds between the start of two sync runs
    #[arg(long, default_value = "86400", env = "DRIVE2S3_INTERVAL")]
    pub interval_secs: u64,

    /// Run a single sync and exit
    #[arg(long, env = "DRIVE2S3_ONCE")]
    pub once: bool,

    /// S3 endpoint URL (omit for AWS)
    #[arg(long, env = "S3_ENDPOINT")]
    pub s3_endpoint: Option<String>,

    /// S3 region
    #[arg(long, default_value = "us-east-1", env = "S3_REGION")]
    pub s3_region: String,

    /// Destination bucket
    #[arg(long, env = "S3_BUCKET")]
    pub s3_bucket: String,

    /// S3 access key ID
    #[arg(long, env = "S3_ACCESS_KEY_ID")]
    pub s3_access_key_id: String,

    /// S3 secret access key
    #[arg(long, env = "S3_SECRET_ACCESS_KEY")]
    pub s3_secret_access_key: String,

    /// Seconds a downloaded object stays in the local cache
    #[arg(long, default_value = "60", env = "S3_CACHE_EXPIRY")]
    pub s3_cache_expiry_secs: u64,

    /// Directory for the download cache (defaults to the system temp dir)
    #[arg(long, env = "S3_CACHE_DIR")]
    pub s3_cache_dir: Option<PathBuf>,

    /// Google service-account JSON key file
    #[arg(long, env = "DRIVE_ACCOUNT_FILE")]
    pub drive_account_file: PathBuf,

    /// User the service account impersonates
    #[arg(long, env = "DRIVE_SUBJECT")]
    pub drive_subject: Option<String>,

    /// Sync the subject's own files
    #[arg(long, env = "DRIVE_CURRENT_ACCOUNT")]
    pub drive_current_account: bool,

    /// Sync every shared drive the subject can see
    #[arg(long, env = "DRIVE_SHARED_DRIVES")]
    pub drive_shared_drives: bool,

    /// Sync the files of every user in the subject's domains
    #[arg(long, env = "DRIVE_OTHER_USERS")]
    pub drive_other_users: bool,
}

impl Config {
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs.max(1))
    }

    pub fn cache_expiry(&self) -> Duration {
        Duration::from_secs(self.s3_cache_expiry_secs)
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        if !(self.drive_current_account || self.drive_shared_drives || self.drive_other_users) {
            anyhow::bail!(
                "nothing to sync: enable at least one of --drive-current-account, \
                 --drive-shared-drives, --drive-other-users"
            );
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const REQUIRED: &[&str] = &[
        "fsio-drive2s3",
        "--s3-bucket",
        "backup",
        "--s3-access-key-id",
        "id",
        "--s3-secret-access-key",
        "secret",
        "--drive-account-file",
        "/etc/drive2s3/account.json",
    ];

    #[test]
    fn test_defaults() {
        let config = Config::try_parse_from(REQUIRED).unwrap();
        assert_eq!(config.workers, 100);
        assert_eq!(config.interval(), Duration::from_secs(86_400));
        assert_eq!(config.cache_expiry(), Duration::from_secs(60));
        assert!(!config.once);
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_namespace_flags() {
        let mut args = REQUIRED.to_vec();
        args.extend(["--drive-shared-drives", "--once", "--workers", "8"]);
        let config = Config::try_parse_from(args).unwrap();
        assert!(config.drive_shared_drives);
        assert!(config.once);
        assert_eq!(config.workers, 8);
        config.validate().unwrap();
    }

    #[test]
    fn test_bucket_is_required() {
        assert!(Config::try_parse_from(["fsio-drive2s3", "--drive-account-file", "k.json"]).is_err());
    }
}
