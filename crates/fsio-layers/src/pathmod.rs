use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use fsio_core::{Context, EntryStream, FileReader, Filesystem, FsError, Location};
use tokio::io::AsyncRead;

type Rewrite = Arc<dyn Fn(&Location) -> Location + Send + Sync>;

/// Rewrites the target of every write; reads, listing, removal and moves
/// see the inner backend unchanged.
#[derive(Clone)]
pub struct PathModFs<F> {
    inner: F,
    rewrite: Rewrite,
}

impl<F: Filesystem> PathModFs<F> {
    pub fn new(inner: F, rewrite: impl Fn(&Location) -> Location + Send + Sync + 'static) -> Self {
        Self {
            inner,
            rewrite: Arc::new(rewrite),
        }
    }

    /// Prefix every written location with `segments`.
    pub fn with_prefix<I, S>(inner: F, segments: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let prefix: Vec<String> = segments.into_iter().map(Into::into).collect();
        Self::new(inner, move |location| location.prefixed(prefix.iter().cloned()))
    }
}

impl<F: fmt::Debug> fmt::Debug for PathModFs<F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PathModFs")
            .field("inner", &self.inner)
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl<F: Filesystem> Filesystem for PathModFs<F> {
    async fn checksum_cheap(&self, ctx: &Context, location: &Location) -> Result<String, FsError> {
        self.inner.checksum_cheap(ctx, location).await
    }

    async fn checksum_content(&self, ctx: &Context, location: &Location) -> Result<String, FsError> {
        self.inner.checksum_content(ctx, location).await
    }

    fn files(&self, ctx: &Context) -> EntryStream {
        self.inner.files(ctx)
    }

    async fn open(&self, ctx: &Context, location: &Location) -> Result<FileReader, FsError> {
        self.inner.open(ctx, location).await
    }

    async fn write_file(
        &self,
        ctx: &Context,
        location: &Location,
        src: &mut (dyn AsyncRead + Send + Unpin),
        mod_time: DateTime<Utc>,
    ) -> Result<Location, FsError> {
        let target = (self.rewrite)(location);
        self.inner.write_file(ctx, &target, src, mod_time).await
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
