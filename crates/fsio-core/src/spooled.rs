use std::io::SeekFrom;
use std::path::Path;
use std::pin::Pin;
use std::task::{Context as TaskContext, Poll};

use sha2::{Digest, Sha256};
use tempfile::TempPath;
use tokio::fs::File;
use tokio::io::{AsyncRead, AsyncSeek, AsyncSeekExt, ReadBuf};
use tracing::debug;

use crate::context::Context;
use crate::error::FsError;
use crate::io::copy_inspect;

/// A stream materialised into a temporary file, readable and seekable.
///
/// The backing file is removed when the value is dropped or [`closed`],
/// whichever comes first, including when construction fails half way.
///
/// [`closed`]: SpooledFile::close
#[derive(Debug)]
pub struct SpooledFile {
    // Declared before `path` so the handle is closed before the file is unlinked.
    file: File,
    path: TempPath,
    len: u64,
}

impl SpooledFile {
    /// Copy `reader` into a new temp file and rewind it.
    pub async fn from_reader<R>(ctx: &Context, reader: &mut R) -> Result<Self, FsError>
    where
        R: AsyncRead + Unpin + ?Sized,
    {
        Self::spool(ctx, reader, |_| {}).await
    }

    /// Like [`from_reader`](Self::from_reader), also returning the SHA-256 of
    /// the bytes that were spooled.
    pub async fn from_reader_hashed<R>(
        ctx: &Context,
        reader: &mut R,
    ) -> Result<(Self, [u8; 32]), FsError>
    where
        R: AsyncRead + Unpin + ?Sized,
    {
        let mut hasher = Sha256::new();
        let spooled = Self::spool(ctx, reader, |chunk| hasher.update(chunk)).await?;
        Ok((spooled, hasher.finalize().into()))
    }

    async fn spool<R, F>(ctx: &Context, reader: &mut R, inspect: F) -> Result<Self, FsError>
    where
        R: AsyncRead + Unpin + ?Sized,
        F: FnMut(&[u8]),
    {
        let (file, path) = tempfile::NamedTempFile::new()?.into_parts();
        let mut file = File::from_std(file);
        let len = copy_inspect(ctx, reader, &mut file, inspect).await?;
        file.seek(SeekFrom::Start(0)).await?;
        debug!(path = %path.display(), len, "spooled stream to temp file");
        Ok(Self { file, path, len })
    }

    pub fn len(&self) -> u64 {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Rewind to the first byte.
    pub async fn rewind(&mut self) -> Result<(), FsError> {
        self.file.seek(SeekFrom::Start(0)).await?;
        Ok(())
    }

    /// Close the handle and remove the backing file.
    pub async fn close(self) -> Result<(), FsError> {
        let Self { file, path, .. } = self;
        drop(file);
        tokio::task::spawn_blocking(move || path.close())
            .await
            .map_err(|e| FsError::Io(e.to_string()))??;
        Ok(())
    }

    /// Hand out a blocking handle for synchronous readers such as archive
    /// parsers. The returned [`TempPath`] keeps the file alive.
    pub async fn into_std(self) -> (std::fs::File, TempPath) {
        let Self { file, path, .. } = self;
        (file.into_std().await, path)
    }
}

impl AsyncRead for SpooledFile {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut TaskContext<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<std::io::Result<()>> {
        Pin::new(&mut self.get_mut().file).poll_read(cx, buf)
    }
}

impl AsyncSeek for SpooledFile {
    fn start_seek(self: Pin<&mut Self>, position: SeekFrom) -> std::io::Result<()> {
        Pin::new(&mut self.get_mut().file).start_seek(position)
    }

    fn poll_complete(self: Pin<&mut Self>, cx: &mut TaskContext<'_>) -> Poll<std::io::Result<u64>> {
        Pin::new(&mut self.get_mut().file).poll_complete(cx)
    }
}
