use async_compression::tokio::bufread::{GzipDecoder, GzipEncoder};
use async_compression::Level;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use fsio_core::io::read_prefix;
use fsio_core::{
    content_checksum, mime, Context, EntryStream, FileReader, Filesystem, FsError, Location,
    SpooledFile,
};
use tokio::io::{AsyncRead, AsyncReadExt, BufReader};
use tracing::{debug, instrument};

/// Bytes read up front to recognise a gzip stream.
const MAGIC_PREFIX_LEN: usize = 512;

/// Stores whichever of the raw or gzip-compressed rendition is smaller and
/// transparently decompresses on read.
#[derive(Debug, Clone)]
pub struct GzipFs<F> {
    inner: F,
    level: i32,
}

impl<F: Filesystem> GzipFs<F> {
    /// Wrap `inner`, compressing at `level` (0-9).
    pub fn new(inner: F, level: i32) -> Self {
        Self { inner, level }
    }

    pub fn inner(&self) -> &F {
        &self.inner
    }
}

#[async_trait]
impl<F: Filesystem> Filesystem for GzipFs<F> {
    async fn checksum_cheap(&self, ctx: &Context, location: &Location) -> Result<String, FsError> {
        self.inner.checksum_cheap(ctx, location).await
    }

    /// Hash of the decompressed content, so it matches the uncompressed source.
    #[instrument(skip(self, ctx), level = "debug")]
    async fn checksum_content(&self, ctx: &Context, location: &Location) -> Result<String, FsError> {
        let mut reader = self.open(ctx, location).await?;
        content_checksum(ctx, &mut reader, None)
            .await
            .map_err(|e| e.at(location))
    }

    fn files(&self, ctx: &Context) -> EntryStream {
        self.inner.files(ctx)
    }

    #[instrument(skip(self, ctx), level = "debug")]
    async fn open(&self, ctx: &Context, location: &Location) -> Result<FileReader, FsError> {
        let mut file = self.inner.open(ctx, location).await?;
        let prefix = read_prefix(&mut file, MAGIC_PREFIX_LEN)
            .await
            .map_err(|e| e.at(location))?;
        let compressed = mime::is_gzip(&prefix);
        let reader = std::io::Cursor::new(prefix).chain(file);
        if !compressed {
            return Ok(Box::new(reader));
        }
        debug!("decompressing gzip content");
        Ok(Box::new(GzipDecoder::new(BufReader::new(reader))))
    }

    #[instrument(skip(self, ctx, src), level = "debug")]
    async fn write_file(
        &self,
        ctx: &Context,
        location: &Location,
        src: &mut (dyn AsyncRead + Send + Unpin),
        mod_time: DateTime<Utc>,
    ) -> Result<Location, FsError> {
        let mut raw = SpooledFile::from_reader(ctx, src)
            .await
            .map_err(|e| e.at(location))?;

        let mut compressed = {
            let mut encoder =
                GzipEncoder::with_quality(BufReader::new(&mut raw), Level::Precise(self.level));
            SpooledFile::from_reader(ctx, &mut encoder)
                .await
                .map_err(|e| e.at(location))?
        };

        debug!(
            raw = raw.len(),
            compressed = compressed.len(),
            "choosing smaller rendition"
        );
        if compressed.len() < raw.len() {
            drop(raw);
            self.inner
                .write_file(ctx, location, &mut compressed, mod_time)
                .await
        } else {
            drop(compressed);
            raw.rewind().await.map_err(|e| e.at(location))?;
            self.inner.write_file(ctx, location, &mut raw, mod_time).await
        }
    }

    async fn remove_all(&self, ctx: &Context, location: &Location) -> Result<(), FsError> {
        self.inner.remove_all(ctx, location).await
    }

    async fn move_file(
        &self,
        ctx: &Context,
        old: &Location,
        new: &Location,
    ) -> Result<Location, FsError> {
        self.inner.move_file(ctx, old, new).await
    }
}
