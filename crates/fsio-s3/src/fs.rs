use std::io::SeekFrom;
use std::path::PathBuf;
use std::time::Duration;

use async_trait::async_trait;
use aws_sdk_s3::operation::head_object::HeadObjectOutput;
use aws_sdk_s3::primitives::ByteStream;
use aws_sdk_s3::types::ChecksumMode;
use aws_sdk_s3::Client as S3Client;
use base64::Engine;
use chrono::{DateTime, Utc};
use fsio_core::io::{copy_with_context, read_prefix};
use fsio_core::{
    cheap_checksum, content_checksum, entry_stream, mime, Context, Entry, EntryStream, FileReader,
    Filesystem, FsError, Location, SpooledFile, ENTRY_QUEUE_CAPACITY,
};
use futures::StreamExt;
use tokio::io::{AsyncRead, AsyncSeekExt};
use tracing::{debug, instrument, warn};

use crate::cache::DiskCache;
use crate::metadata::{self, CUSTOM_MTIME_KEY, MTIME_KEY};
use crate::retry::send_with_retry;

/// HEAD requests issued concurrently while listing.
const LIST_HEAD_CONCURRENCY: usize = 16;

/// Backend bound to one S3 bucket.
///
/// Object keys are location segments joined with `/`. Reads go through a
/// local disk cache whose entries expire `cache_expiry` after each open.
#[derive(Clone)]
pub struct S3Fs {
    client: S3Client,
    bucket: String,
    cache: DiskCache,
}

impl std::fmt::Debug for S3Fs {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("S3Fs")
            .field("bucket", &self.bucket)
            .field("cache", &self.cache)
            .finish_non_exhaustive()
    }
}

impl S3Fs {
    /// Create a new S3 backend caching downloads under the platform temp dir.
    pub fn new(client: S3Client, bucket: impl Into<String>, cache_expiry: Duration) -> Self {
        Self {
            client,
            bucket: bucket.into(),
            cache: DiskCache::new(std::env::temp_dir(), cache_expiry),
        }
    }

    /// Keep cached downloads in `dir` instead of the platform temp dir.
    pub fn with_cache_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.cache = DiskCache::new(dir.into(), self.cache.expiry());
        self
    }

    pub fn bucket(&self) -> &str {
        &self.bucket
    }

    async fn head(&self, ctx: &Context, key: &str) -> Result<HeadObjectOutput, FsError> {
        send_with_retry(ctx, "head_object", key, || {
            self.client
                .head_object()
                .bucket(&self.bucket)
                .key(key)
                .checksum_mode(ChecksumMode::Enabled)
                .send()
        })
        .await
    }

    fn entry_from_head(key: &str, head: &HeadObjectOutput) -> Option<Entry> {
        let location = Location::parse(key).ok()?;
        let mod_time = metadata::mod_time(head.metadata(), head.last_modified())?;
        Some(Entry::new(location, mod_time))
    }

    /// Download `key` into the cache and return a handle positioned at the start.
    async fn fetch_into_cache(
        &self,
        ctx: &Context,
        key: &str,
        cache_path: PathBuf,
    ) -> Result<tokio::fs::File, FsError> {
        let output = send_with_retry(ctx, "get_object", key, || {
            self.client.get_object().bucket(&self.bucket).key(key).send()
        })
        .await?;
        let mut body = output.body.into_async_read();

        tokio::fs::create_dir_all(self.cache.dir()).await?;
        let (file, temp_path) = tempfile::NamedTempFile::new_in(self.cache.dir())?.into_parts();
        let mut file = tokio::fs::File::from_std(file);
        copy_with_context(ctx, &mut body, &mut file).await?;

        // Concurrent opens of the same key may both land here; the last rename wins.
        temp_path
            .persist(&cache_path)
            .map_err(|e| FsError::Io(format!("failed to persist cache file: {}", e.error)))?;
        file.seek(SeekFrom::Start(0)).await?;
        Ok(file)
    }

    async fn put(
        &self,
        ctx: &Context,
        key: &str,
        spooled: &SpooledFile,
        content_type: &str,
        checksum: &str,
        mod_time: DateTime<Utc>,
    ) -> Result<(), FsError> {
        let mtime = metadata::format_mtime(mod_time);
        let path = spooled.path().to_path_buf();
        send_with_retry(ctx, "put_object", key, || {
            let path = path.clone();
            let mtime = mtime.clone();
            async move {
                let body = match ByteStream::from_path(&path).await {
                    Ok(body) => body,
                    Err(e) => return Err(aws_sdk_s3::error::SdkError::construction_failure(e)),
                };
                self.client
                    .put_object()
                    .bucket(&self.bucket)
                    .key(key)
                    .body(body)
                    .content_type(content_type)
                    .checksum_sha256(checksum)
                    .metadata(MTIME_KEY, &mtime)
                    .metadata(CUSTOM_MTIME_KEY, &mtime)
                    .send()
                    .await
            }
        })
        .await?;
        Ok(())
    }

    async fn delete(&self, ctx: &Context, key: &str) -> Result<(), FsError> {
        send_with_retry(ctx, "delete_object", key, || {
            self.client.delete_object().bucket(&self.bucket).key(key).send()
        })
        .await?;
        self.cache.invalidate(key).await;
        Ok(())
    }

    /// One page of keys under `prefix` plus the token for the next page, if any.
    async fn list_page(
        &self,
        ctx: &Context,
        prefix: Option<&str>,
        token: Option<String>,
    ) -> Result<(Vec<String>, Option<String>), FsError> {
        let output = send_with_retry(ctx, "list_objects_v2", prefix.unwrap_or(""), || {
            self.client
                .list_objects_v2()
                .bucket(&self.bucket)
                .set_prefix(prefix.map(str::to_string))
                .set_continuation_token(token.clone())
                .send()
        })
        .await?;

        let keys = output
            .contents()
            .iter()
            .filter_map(|obj| obj.key())
            .map(str::to_string)
            .collect();
        let next = if output.is_truncated().unwrap_or(false) {
            output.next_continuation_token().map(str::to_string)
        } else {
            None
        };
        Ok((keys, next))
    }

    /// Keys under `prefix`, following continuation tokens.
    async fn list_keys(&self, ctx: &Context, prefix: &str) -> Result<Vec<String>, FsError> {
        let mut keys = Vec::new();
        let mut token = None;
        loop {
            let (page, next) = self.list_page(ctx, Some(prefix), token).await?;
            keys.extend(page);
            match next {
                Some(next) => token = Some(next),
                None => return Ok(keys),
            }
        }
    }

    /// HEAD each key of one listing page and forward the resulting entries.
    /// Returns false once the consumer is gone or the context is done.
    async fn emit_page(
        &self,
        ctx: &Context,
        keys: Vec<String>,
        tx: &tokio::sync::mpsc::Sender<Entry>,
    ) -> bool {
        let mut heads = futures::stream::iter(keys.into_iter().filter(|k| !k.ends_with('/')))
            .map(|key| async move {
                let head = self.head(ctx, &key).await;
                (key, head)
            })
            .buffered(LIST_HEAD_CONCURRENCY);

        while let Some((key, head)) = heads.next().await {
            if ctx.is_done() {
                return false;
            }
            let entry = match head {
                Ok(head) => Self::entry_from_head(&key, &head),
                Err(err) if err.is_context() => return false,
                Err(err) => {
                    warn!(key, error = %err, "skipping object without metadata");
                    continue;
                }
            };
            let Some(entry) = entry else {
                warn!(key, "skipping object with unusable key or timestamp");
                continue;
            };
            if tx.send(entry).await.is_err() {
                return false;
            }
        }
        true
    }
}

#[async_trait]
impl Filesystem for S3Fs {
    #[instrument(skip(self, ctx), level = "debug")]
    async fn checksum_cheap(&self, ctx: &Context, location: &Location) -> Result<String, FsError> {
        let key = location.key();
        let head = self.head(ctx, &key).await.map_err(|e| e.at(location))?;
        let mod_time = metadata::mod_time(head.metadata(), head.last_modified())
            .ok_or_else(|| FsError::Remote(format!("no modification time for {key}")).at(location))?;
        let size = head.content_length().unwrap_or(0).max(0) as u64;
        Ok(cheap_checksum(mod_time, size))
    }

    #[instrument(skip(self, ctx), level = "debug")]
    async fn checksum_content(&self, ctx: &Context, location: &Location) -> Result<String, FsError> {
        let key = location.key();
        let head = self.head(ctx, &key).await.map_err(|e| e.at(location))?;
        let content_type = head.content_type().map(str::to_string);

        let trusted = !content_type.as_deref().is_some_and(mime::is_office);
        if let (true, Some(stored)) = (trusted, head.checksum_sha256()) {
            match base64::engine::general_purpose::STANDARD.decode(stored) {
                Ok(raw) if raw.len() == 32 => return Ok(hex::encode(raw)),
                _ => debug!(key, stored, "stored checksum is not a plain SHA-256"),
            }
        }

        let mut reader = self.open(ctx, location).await?;
        content_checksum(ctx, &mut reader, content_type.as_deref())
            .await
            .map_err(|e| e.at(location))
    }

    fn files(&self, ctx: &Context) -> EntryStream {
        let (tx, rx) = tokio::sync::mpsc::channel(ENTRY_QUEUE_CAPACITY);
        let this = self.clone();
        let producer_ctx = ctx.clone();

        tokio::spawn(async move {
            let mut token = None;
            loop {
                let (keys, next) = match this.list_page(&producer_ctx, None, token).await {
                    Ok(page) => page,
                    Err(err) => {
                        if !err.is_context() {
                            warn!(bucket = %this.bucket, error = %err, "listing failed");
                        }
                        return;
                    }
                };
                if !this.emit_page(&producer_ctx, keys, &tx).await {
                    return;
                }
                match next {
                    Some(next) => token = Some(next),
                    None => return,
                }
            }
        });

        entry_stream(ctx, rx)
    }

    #[instrument(skip(self, ctx), level = "debug")]
    async fn open(&self, ctx: &Context, location: &Location) -> Result<FileReader, FsError> {
        ctx.check()?;
        let key = location.key();
        let cache_path = self.cache.path_for(&key);

        match tokio::fs::File::open(&cache_path).await {
            Ok(file) => {
                debug!(key, "cache hit");
                self.cache.schedule_eviction(cache_path);
                return Ok(Box::new(file));
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(FsError::from(e).at(location)),
        }

        let file = self
            .fetch_into_cache(ctx, &key, cache_path.clone())
            .await
            .map_err(|e| e.at(location))?;
        self.cache.schedule_eviction(cache_path);
        Ok(Box::new(file))
    }

    #[instrument(skip(self, ctx, src), level = "debug")]
    async fn write_file(
        &self,
        ctx: &Context,
        location: &Location,
        src: &mut (dyn AsyncRead + Send + Unpin),
        mod_time: DateTime<Utc>,
    ) -> Result<Location, FsError> {
        let key = location.key();
        let (mut spooled, digest) = SpooledFile::from_reader_hashed(ctx, src)
            .await
            .map_err(|e| e.at(location))?;

        let prefix = read_prefix(&mut spooled, mime::SNIFF_LEN)
            .await
            .map_err(|e| e.at(location))?;
        let content_type = mime::sniff(&prefix);
        let checksum = base64::engine::general_purpose::STANDARD.encode(digest);

        self.put(ctx, &key, &spooled, content_type, &checksum, mod_time)
            .await
            .map_err(|e| e.at(location))?;
        self.cache.invalidate(&key).await;
        debug!(key, bytes = spooled.len(), content_type, "stored object");
        Ok(location.clone())
    }

    #[instrument(skip(self, ctx), level = "debug")]
    async fn remove_all(&self, ctx: &Context, location: &Location) -> Result<(), FsError> {
        let key = location.key();
        self.delete(ctx, &key).await.map_err(|e| e.at(location))?;

        let nested = format!("{key}/");
        for child in self.list_keys(ctx, &nested).await.map_err(|e| e.at(location))? {
            match self.delete(ctx, &child).await {
                Ok(()) => {}
                Err(e) if e.is_not_found() => {}
                Err(e) => return Err(e.at(location)),
            }
        }
        Ok(())
    }

    #[instrument(skip(self, ctx), level = "debug")]
    async fn move_file(
        &self,
        ctx: &Context,
        old: &Location,
        new: &Location,
    ) -> Result<Location, FsError> {
        let old_key = old.key();
        let new_key = new.key();
        let copy_source = format!(
            "{}/{}",
            self.bucket,
            old.segments()
                .iter()
                .map(|s| urlencoding::encode(s).into_owned())
                .collect::<Vec<_>>()
                .join("/")
        );

        send_with_retry(ctx, "copy_object", &old_key, || {
            self.client
                .copy_object()
                .bucket(&self.bucket)
                .key(&new_key)
                .copy_source(&copy_source)
                .send()
        })
        .await
        .map_err(|e| e.at(old))?;
        self.cache.invalidate(&new_key).await;

        self.delete(ctx, &old_key).await.map_err(|e| e.at(old))?;
        Ok(new.clone())
    }
}
