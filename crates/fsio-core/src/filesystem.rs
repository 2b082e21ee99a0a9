use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::stream::BoxStream;
use tokio::io::AsyncRead;

use crate::context::Context;
use crate::error::FsError;
use crate::location::{Entry, Location};

/// Readable stream returned by [`Filesystem::open`].
pub type FileReader = Box<dyn AsyncRead + Send + Unpin>;

/// Lazy sequence of entries returned by [`Filesystem::files`].
///
/// Dropping the stream stops the producer behind it.
pub type EntryStream = BoxStream<'static, Entry>;

/// Capacity of the queue between an enumeration producer and its consumer.
pub const ENTRY_QUEUE_CAPACITY: usize = 1000;

/// Uniform contract over a storage root.
///
/// Implementations are shared across concurrent transfer tasks, so every
/// method takes `&self`.
#[async_trait]
pub trait Filesystem: Send + Sync {
    /// Metadata-only change signal (modification time and size).
    async fn checksum_cheap(&self, ctx: &Context, location: &Location) -> Result<String, FsError>;

    /// Content-derived checksum. May download the file.
    async fn checksum_content(&self, ctx: &Context, location: &Location)
        -> Result<String, FsError>;

    /// Enumerate every file under the root, in no particular order.
    ///
    /// Ends early, without error, when `ctx` is cancelled. Each call returns
    /// a fresh stream.
    fn files(&self, ctx: &Context) -> EntryStream;

    /// Open a file for reading. Fails with [`FsError::NotFound`] when absent.
    async fn open(&self, ctx: &Context, location: &Location) -> Result<FileReader, FsError>;

    /// Persist `src` at `location` with the given modification time.
    ///
    /// # Returns
    /// The location actually written, which may differ from the requested one.
    async fn write_file(
        &self,
        ctx: &Context,
        location: &Location,
        src: &mut (dyn AsyncRead + Send + Unpin),
        mod_time: DateTime<Utc>,
    ) -> Result<Location, FsError>;

    /// Remove `location` and anything beneath it. Absent locations are not an error.
    async fn remove_all(&self, ctx: &Context, location: &Location) -> Result<(), FsError>;

    async fn move_file(
        &self,
        ctx: &Context,
        old: &Location,
        new: &Location,
    ) -> Result<Location, FsError>;
}

#[async_trait]
impl<T: Filesystem + ?Sized> Filesystem for Arc<T> {
    async fn checksum_cheap(&self, ctx: &Context, location: &Location) -> Result<String, FsError> {
        (**self).checksum_cheap(ctx, location).await
    }

    async fn checksum_content(
        &self,
        ctx: &Context,
        location: &Location,
    ) -> Result<String, FsError> {
        (**self).checksum_content(ctx, location).await
    }

    fn files(&self, ctx: &Context) -> EntryStream {
        (**self).files(ctx)
    }

    async fn open(&self, ctx: &Context, location: &Location) -> Result<FileReader, FsError> {
        (**self).open(ctx, location).await
    }

    async fn write_file(
        &self,
        ctx: &Context,
        location: &Location,
        src: &mut (dyn AsyncRead + Send + Unpin),
        mod_time: DateTime<Utc>,
    ) -> Result<Location, FsError> {
        (**self).write_file(ctx, location, src, mod_time).await
    }

    async fn remove_all(&self, ctx: &Context, location: &Location) -> Result<(), FsError> {
        (**self).remove_all(ctx, location).await
    }

    async fn move_file(
        &self,
        ctx: &Context,
        old: &Location,
        new: &Location,
    ) -> Result<Location, FsError> {
        (**self).move_file(ctx, old, new).await
    }
}

/// Turn the receiving half of a producer channel into an [`EntryStream`]
/// that also stops when `ctx` ends.
pub fn entry_stream(ctx: &Context, rx: tokio::sync::mpsc::Receiver<Entry>) -> EntryStream {
    use futures::StreamExt;

    let ctx = ctx.clone();
    let entries = tokio_stream::wrappers::ReceiverStream::new(rx);
    let stop = async move { ctx.done().await };
    entries.take_until(Box::pin(stop)).boxed()
}
