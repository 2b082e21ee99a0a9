use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use fsio_core::{
    cheap_checksum, content_checksum, entry_stream, mime, Context, Entry, EntryStream, FileReader,
    Filesystem, FsError, Location, SpooledFile, ENTRY_QUEUE_CAPACITY,
};
use futures::TryStreamExt;
use reqwest::Response;
use tokio::io::AsyncRead;
use tokio::sync::{mpsc, OnceCell};
use tokio_util::io::StreamReader;
use tracing::{debug, instrument, warn};

use crate::auth::TokenProvider;
use crate::client::{DriveClient, Endpoints, RetryPolicy};
use crate::drive::{Corpus, INFO_FIELDS};
use crate::model::{DriveFile, SharedDrive};
use crate::namespace::Scope;
use crate::walk::walk;

const READ_ONLY: &str = "the Google Drive backend is read-only";

/// Which parts of the federated namespace to expose, and how to reach them.
#[derive(Clone)]
pub struct GoogleDriveConfig {
    pub tokens: Arc<dyn TokenProvider>,
    /// Files owned by the token's default subject, under `personal/files`.
    pub current_account: bool,
    /// Every shared drive the default subject can see, under `drives/<name>/files`.
    pub shared_drives: bool,
    /// Every user of every administered domain, under
    /// `domains/<domain>/users/<email>/files`. Needs directory read scopes
    /// and domain-wide delegation.
    pub other_users: bool,
    pub endpoints: Endpoints,
    pub retry: RetryPolicy,
}

impl GoogleDriveConfig {
    /// Configuration exposing only the current account.
    pub fn new(tokens: Arc<dyn TokenProvider>) -> Self {
        Self {
            tokens,
            current_account: true,
            shared_drives: false,
            other_users: false,
            endpoints: Endpoints::default(),
            retry: RetryPolicy::default(),
        }
    }
}

/// Read-only backend over a federated Google Drive namespace.
#[derive(Clone)]
pub struct GoogleDriveFs {
    client: DriveClient,
    current_account: bool,
    shared_drives: bool,
    other_users: bool,
    export_formats: Arc<OnceCell<HashMap<String, Vec<String>>>>,
    /// Shared drive ids by name, refreshed whenever a name is missing.
    drive_ids: Arc<DashMap<String, String>>,
}

impl std::fmt::Debug for GoogleDriveFs {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GoogleDriveFs")
            .field("current_account", &self.current_account)
            .field("shared_drives", &self.shared_drives)
            .field("other_users", &self.other_users)
            .finish_non_exhaustive()
    }
}

/// Export target for a Google-native type, preferring an Office format.
fn pick_export(targets: &[String]) -> Option<&str> {
    targets
        .iter()
        .find(|t| t.contains("openxmlformats"))
        .or_else(|| targets.first())
        .map(String::as_str)
}

/// Materialise a response body so callers get a seekable, local reader.
async fn spool(ctx: &Context, response: Response) -> Result<SpooledFile, FsError> {
    let body = response.bytes_stream().map_err(std::io::Error::other);
    let mut reader = StreamReader::new(Box::pin(body));
    SpooledFile::from_reader(ctx, &mut reader).await
}

impl GoogleDriveFs {
    pub fn new(config: GoogleDriveConfig) -> Self {
        Self {
            client: DriveClient::new(config.tokens, config.endpoints, config.retry),
            current_account: config.current_account,
            shared_drives: config.shared_drives,
            other_users: config.other_users,
            export_formats: Arc::new(OnceCell::new()),
            drive_ids: Arc::new(DashMap::new()),
        }
    }

    /// Fetch the export-format table with the default subject's token.
    ///
    /// This is a single cheap request, so it doubles as a credentials check
    /// that does not depend on the account holding any files.
    pub async fn check_access(&self, ctx: &Context) -> Result<(), FsError> {
        self.export_formats
            .get_or_try_init(|| self.client.export_formats(ctx))
            .await?;
        Ok(())
    }

    /// List shared drives and replace the cached name-to-id map.
    async fn refresh_drive_ids(&self, ctx: &Context) -> Result<Vec<SharedDrive>, FsError> {
        let drives = self.client.shared_drives(ctx).await?;
        self.drive_ids.clear();
        for drive in &drives {
            self.drive_ids.insert(drive.name.clone(), drive.id.clone());
        }
        Ok(drives)
    }

    async fn shared_drive_id(&self, ctx: &Context, name: &str) -> Result<String, FsError> {
        if let Some(id) = self.drive_ids.get(name) {
            return Ok(id.value().clone());
        }
        self.refresh_drive_ids(ctx).await?;
        self.drive_ids
            .get(name)
            .map(|id| id.value().clone())
            .ok_or_else(|| FsError::NotFound(format!("shared drive {name:?}")))
    }

    fn enabled(&self, scope: &Scope) -> bool {
        match scope {
            Scope::Personal => self.current_account,
            Scope::SharedDrive(_) => self.shared_drives,
            Scope::DomainUser { .. } => self.other_users,
        }
    }

    /// Client, corpus and in-corpus path serving `location`.
    async fn resolve(
        &self,
        ctx: &Context,
        location: &Location,
    ) -> Result<(DriveClient, Corpus, Location), FsError> {
        let (scope, relative) = Scope::split(location)
            .filter(|(scope, _)| self.enabled(scope))
            .ok_or_else(|| FsError::NotFound(location.key()))?;

        match scope {
            Scope::Personal => Ok((self.client.clone(), Corpus::User, relative)),
            Scope::SharedDrive(name) => {
                let id = self.shared_drive_id(ctx, &name).await?;
                Ok((self.client.clone(), Corpus::Shared(id), relative))
            }
            Scope::DomainUser { user, .. } => {
                Ok((self.client.impersonate(&user), Corpus::User, relative))
            }
        }
    }

    /// Metadata for the file at `location`, plus the client that can read it.
    async fn stat(&self, ctx: &Context, location: &Location) -> Result<(DriveClient, DriveFile), FsError> {
        let (client, corpus, relative) = self.resolve(ctx, location).await?;
        let found = client.find_by_path(ctx, &corpus, &relative).await?;
        let info = client.get_file(ctx, &found.id, INFO_FIELDS).await?;
        Ok((client, info))
    }

    /// Download `file_id`, resolving shortcuts and exporting Google-native documents.
    async fn open_file(
        &self,
        ctx: &Context,
        client: &DriveClient,
        mime_type: &str,
        file_id: &str,
    ) -> Result<SpooledFile, FsError> {
        let (mime_type, file_id) = if mime_type == mime::GOOGLE_SHORTCUT {
            let shortcut = client.get_file(ctx, file_id, "shortcutDetails").await?;
            match shortcut.shortcut_details {
                Some(target)
                    if !target.target_id.is_empty()
                        && target.target_mime_type != mime::GOOGLE_FOLDER =>
                {
                    debug!(file_id, target = %target.target_id, "following shortcut");
                    (target.target_mime_type, target.target_id)
                }
                _ => return Err(FsError::Unsupported("shortcut does not point to a file")),
            }
        } else {
            (mime_type.to_string(), file_id.to_string())
        };

        if mime_type == mime::GOOGLE_FOLDER {
            return Err(FsError::Unsupported("folders cannot be opened"));
        }

        let formats = self
            .export_formats
            .get_or_try_init(|| client.export_formats(ctx))
            .await?;

        let response = match formats.get(&mime_type).and_then(|t| pick_export(t)) {
            Some(target) => {
                let links = client.get_file(ctx, &file_id, "exportLinks").await?;
                match links.export_links.as_ref().and_then(|l| l.get(target)) {
                    Some(link) => client.get(ctx, link, &[]).await?,
                    None => client.export(ctx, &file_id, target).await?,
                }
            }
            None if mime::is_google_native(&mime_type) => {
                return Err(FsError::Unsupported("document type has no export format"))
            }
            None => client.download(ctx, &file_id).await?,
        };
        spool(ctx, response).await
    }

    async fn produce(&self, ctx: &Context, tx: &mpsc::Sender<Entry>) -> Result<(), FsError> {
        if self.current_account
            && !walk(ctx, &self.client, &Corpus::User, &Scope::Personal, tx).await?
        {
            return Ok(());
        }

        if self.shared_drives {
            match self.refresh_drive_ids(ctx).await {
                Ok(drives) => {
                    for drive in drives {
                        let scope = Scope::SharedDrive(drive.name);
                        let corpus = Corpus::Shared(drive.id);
                        if !walk(ctx, &self.client, &corpus, &scope, tx).await? {
                            return Ok(());
                        }
                    }
                }
                Err(e) if e.is_context() => return Err(e),
                Err(e) => warn!(error = %e, "failed to list shared drives"),
            }
        }

        if self.other_users {
            let domains = match self.client.domains(ctx).await {
                Ok(domains) => domains,
                Err(e) if e.is_context() => return Err(e),
                Err(e) => {
                    warn!(error = %e, "failed to list domains");
                    return Ok(());
                }
            };
            for domain in domains {
                let users = match self.client.users(ctx, &domain).await {
                    Ok(users) => users,
                    Err(e) if e.is_context() => return Err(e),
                    Err(e) => {
                        warn!(domain, error = %e, "failed to list users");
                        continue;
                    }
                };
                for user in users {
                    let client = self.client.impersonate(&user);
                    let scope = Scope::DomainUser {
                        domain: domain.clone(),
                        user,
                    };
                    if !walk(ctx, &client, &Corpus::User, &scope, tx).await? {
                        return Ok(());
                    }
                }
            }
        }
        Ok(())
    }
}

#[async_trait]
impl Filesystem for GoogleDriveFs {
    #[instrument(skip(self, ctx), level = "debug")]
    async fn checksum_cheap(&self, ctx: &Context, location: &Location) -> Result<String, FsError> {
        let (_, info) = self.stat(ctx, location).await.map_err(|e| e.at(location))?;
        Ok(cheap_checksum(info.mod_time(), info.size()))
    }

    #[instrument(skip(self, ctx), level = "debug")]
    async fn checksum_content(&self, ctx: &Context, location: &Location) -> Result<String, FsError> {
        let (client, info) = self.stat(ctx, location).await.map_err(|e| e.at(location))?;
        if let Some(sha) = info.sha256_checksum.as_deref().filter(|s| !s.is_empty()) {
            if !mime::is_office(&info.mime_type) {
                return Ok(sha.to_lowercase());
            }
        }

        let mut file = self
            .open_file(ctx, &client, &info.mime_type, &info.id)
            .await
            .map_err(|e| e.at(location))?;
        content_checksum(ctx, &mut file, None)
            .await
            .map_err(|e| e.at(location))
    }

    fn files(&self, ctx: &Context) -> EntryStream {
        let (tx, rx) = mpsc::channel(ENTRY_QUEUE_CAPACITY);
        let this = self.clone();
        let producer_ctx = ctx.clone();

        tokio::spawn(async move {
            if let Err(e) = this.produce(&producer_ctx, &tx).await {
                if !e.is_context() {
                    warn!(error = %e, "Drive enumeration ended early");
                }
            }
        });

        entry_stream(ctx, rx)
    }

    #[instrument(skip(self, ctx), level = "debug")]
    async fn open(&self, ctx: &Context, location: &Location) -> Result<FileReader, FsError> {
        let (client, corpus, relative) =
            self.resolve(ctx, location).await.map_err(|e| e.at(location))?;
        let found = client
            .find_by_path(ctx, &corpus, &relative)
            .await
            .map_err(|e| e.at(location))?;
        let file = self
            .open_file(ctx, &client, &found.mime_type, &found.id)
            .await
            .map_err(|e| e.at(location))?;
        Ok(Box::new(file))
    }

    async fn write_file(
        &self,
        _ctx: &Context,
        _location: &Location,
        _src: &mut (dyn AsyncRead + Send + Unpin),
        _mod_time: DateTime<Utc>,
    ) -> Result<Location, FsError> {
        Err(FsError::Unsupported(READ_ONLY))
    }

    async fn remove_all(&self, _ctx: &Context, _location: &Location) -> Result<(), FsError> {
        Err(FsError::Unsupported(READ_ONLY))
    }

    async fn move_file(
        &self,
        _ctx: &Context,
        _old: &Location,
        _new: &Location,
    ) -> Result<Location, FsError> {
        Err(FsError::Unsupported(READ_ONLY))
    }
}
