use std::collections::HashMap;

use fsio_core::{Context, FsError, Location};
use reqwest::Response;
use tracing::{debug, instrument};

use crate::client::DriveClient;
use crate::model::{About, DriveFile, DriveList, FileList, SharedDrive};

const LIST_PAGE_SIZE: &str = "1000";
const DRIVES_PAGE_SIZE: &str = "100";
const LIST_FIELDS: &str = "nextPageToken,files(id,name,fullFileExtension,mimeType,modifiedTime)";
const FIND_FIELDS: &str = "nextPageToken,files(id,name,fullFileExtension,mimeType)";
pub(crate) const INFO_FIELDS: &str = "id,name,mimeType,sha256Checksum,modifiedTime,size";

/// Which file collection a query runs against.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Corpus {
    /// The acting subject's own "My Drive".
    User,
    /// A shared drive, by id.
    Shared(String),
}

impl Corpus {
    /// Folder id the collection's tree hangs from.
    pub(crate) fn root_id(&self) -> &str {
        match self {
            Corpus::User => "root",
            Corpus::Shared(id) => id,
        }
    }

    fn list_params(&self) -> Vec<(&'static str, &str)> {
        match self {
            Corpus::User => vec![("corpora", "user")],
            Corpus::Shared(id) => vec![
                ("corpora", "drive"),
                ("driveId", id.as_str()),
                ("supportsAllDrives", "true"),
                ("includeItemsFromAllDrives", "true"),
            ],
        }
    }
}

/// Quote a value for use inside a single-quoted Drive query literal.
pub(crate) fn escape_query(value: &str) -> String {
    value.replace('\\', "\\\\").replace('\'', "\\'")
}

impl DriveClient {
    /// One page of the non-trashed children of `parent_id`.
    #[instrument(skip(self, ctx), level = "debug")]
    pub(crate) async fn list_children(
        &self,
        ctx: &Context,
        corpus: &Corpus,
        parent_id: &str,
        page_token: Option<&str>,
    ) -> Result<FileList, FsError> {
        let q = format!("trashed=false and '{}' in parents", escape_query(parent_id));
        let mut query = corpus.list_params();
        query.extend([
            ("pageSize", LIST_PAGE_SIZE),
            ("q", q.as_str()),
            ("fields", LIST_FIELDS),
            ("orderBy", "name"),
        ]);
        if let Some(token) = page_token {
            query.push(("pageToken", token));
        }
        self.get_json(ctx, &self.drive_url("files"), &query).await
    }

    /// Walk `path` from the corpus root one name at a time.
    #[instrument(skip(self, ctx), level = "debug")]
    pub(crate) async fn find_by_path(
        &self,
        ctx: &Context,
        corpus: &Corpus,
        path: &Location,
    ) -> Result<DriveFile, FsError> {
        let mut parent = corpus.root_id().to_string();
        let mut found = None;
        for segment in path.segments() {
            let q = format!(
                "trashed=false and '{}' in parents and name='{}'",
                escape_query(&parent),
                escape_query(segment)
            );
            let mut query = corpus.list_params();
            query.extend([("pageSize", "1"), ("q", q.as_str()), ("fields", FIND_FIELDS)]);

            let list: FileList = self.get_json(ctx, &self.drive_url("files"), &query).await?;
            let file = list
                .files
                .into_iter()
                .next()
                .ok_or_else(|| FsError::NotFound(format!("no entry named {segment:?}")))?;
            parent = file.id.clone();
            found = Some(file);
        }
        found.ok_or_else(|| FsError::NotFound(path.key()))
    }

    pub(crate) async fn get_file(
        &self,
        ctx: &Context,
        file_id: &str,
        fields: &str,
    ) -> Result<DriveFile, FsError> {
        let url = self.drive_url(&file_path(file_id));
        self.get_json(
            ctx,
            &url,
            &[("fields", fields), ("supportsAllDrives", "true")],
        )
        .await
    }

    /// Shared drives visible to the acting subject, sorted by name.
    #[instrument(skip(self, ctx), level = "debug")]
    pub(crate) async fn shared_drives(&self, ctx: &Context) -> Result<Vec<SharedDrive>, FsError> {
        let url = self.drive_url("drives");
        let mut drives = Vec::new();
        let mut page_token: Option<String> = None;
        loop {
            let mut query = vec![("pageSize", DRIVES_PAGE_SIZE)];
            if let Some(token) = page_token.as_deref() {
                query.push(("pageToken", token));
            }
            let page: DriveList = self.get_json(ctx, &url, &query).await?;
            drives.extend(page.drives);
            match page.next_page_token {
                Some(token) if !token.is_empty() => page_token = Some(token),
                _ => break,
            }
        }
        drives.sort_by(|a, b| a.name.cmp(&b.name));
        debug!(count = drives.len(), "listed shared drives");
        Ok(drives)
    }

    /// Export targets per Google-native MIME type.
    pub(crate) async fn export_formats(
        &self,
        ctx: &Context,
    ) -> Result<HashMap<String, Vec<String>>, FsError> {
        let about: About = self
            .get_json(ctx, &self.drive_url("about"), &[("fields", "exportFormats")])
            .await?;
        Ok(about.export_formats)
    }

    pub(crate) async fn download(&self, ctx: &Context, file_id: &str) -> Result<Response, FsError> {
        let url = self.drive_url(&file_path(file_id));
        self.get(ctx, &url, &[("alt", "media"), ("supportsAllDrives", "true")])
            .await
    }

    pub(crate) async fn export(
        &self,
        ctx: &Context,
        file_id: &str,
        mime_type: &str,
    ) -> Result<Response, FsError> {
        let url = self.drive_url(&format!("{}/export", file_path(file_id)));
        self.get(ctx, &url, &[("mimeType", mime_type)]).await
    }
}

fn file_path(file_id: &str) -> String {
    format!("files/{}", urlencoding::encode(file_id))
}
