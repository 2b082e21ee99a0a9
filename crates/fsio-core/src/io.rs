use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::context::Context;
use crate::error::FsError;

/// Chunk size for every context-aware copy.
pub const DEFAULT_BUFFER_SIZE: usize = 1024 * 1024;

/// Copy `src` into `dst` one chunk at a time, checking `ctx` before each
/// chunk so a cancelled run stops promptly. Returns the number of bytes copied.
pub async fn copy_with_context<R, W>(ctx: &Context, src: &mut R, dst: &mut W) -> Result<u64, FsError>
where
    R: AsyncRead + Unpin + ?Sized,
    W: AsyncWrite + Unpin + ?Sized,
{
    copy_inspect(ctx, src, dst, |_| {}).await
}

/// Like [`copy_with_context`], handing every chunk to `inspect` before it is written.
pub async fn copy_inspect<R, W, F>(
    ctx: &Context,
    src: &mut R,
    dst: &mut W,
    mut inspect: F,
) -> Result<u64, FsError>
where
    R: AsyncRead + Unpin + ?Sized,
    W: AsyncWrite + Unpin + ?Sized,
    F: FnMut(&[u8]),
{
    let mut buf = vec![0u8; DEFAULT_BUFFER_SIZE];
    let mut total = 0u64;
    loop {
        ctx.check()?;
        let n = ctx.run(async { Ok(src.read(&mut buf).await?) }).await?;
        if n == 0 {
            break;
        }
        inspect(&buf[..n]);
        dst.write_all(&buf[..n]).await?;
        total += n as u64;
    }
    dst.flush().await?;
    Ok(total)
}

/// Read up to `limit` bytes from the front of `src`.
pub async fn read_prefix<R>(src: &mut R, limit: usize) -> Result<Vec<u8>, FsError>
where
    R: AsyncRead + Unpin + ?Sized,
{
    let mut prefix = Vec::with_capacity(limit);
    src.take(limit as u64).read_to_end(&mut prefix).await?;
    Ok(prefix)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_copy_counts_bytes() {
        let data = vec![7u8; DEFAULT_BUFFER_SIZE + 10];
        let mut out = Vec::new();
        let n = copy_with_context(&Context::new(), &mut data.as_slice(), &mut out)
            .await
            .unwrap();
        assert_eq!(n as usize, data.len());
        assert_eq!(out, data);
    }

    #[tokio::test]
    async fn test_copy_refuses_cancelled_context() {
        let ctx = Context::new();
        ctx.cancel();
        let mut out = Vec::new();
        let err = copy_with_context(&ctx, &mut &b"abc"[..], &mut out)
            .await
            .unwrap_err();
        assert!(err.is_context());
        assert!(out.is_empty());
    }

    #[tokio::test]
    async fn test_read_prefix_short_input() {
        let prefix = read_prefix(&mut &b"hello"[..], 8192).await.unwrap();
        assert_eq!(prefix, b"hello");
    }
}
