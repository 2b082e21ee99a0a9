use std::future::Future;
use std::time::Duration;

use aws_sdk_s3::error::{DisplayErrorContext, SdkError};
use fsio_core::{Context, FsError};
use tracing::warn;

/// Maximum retries for transient errors (429 / 5xx).
pub(crate) const MAX_RETRIES: u32 = 5;
/// Base delay for exponential backoff.
const BASE_DELAY_MS: u64 = 200;

/// Sleep with exponential backoff + jitter.
async fn backoff_sleep(attempt: u32) {
    let base = Duration::from_millis(BASE_DELAY_MS * 2u64.pow(attempt));
    let jitter = Duration::from_millis(rand_jitter());
    tokio::time::sleep(base + jitter).await;
}

fn rand_jitter() -> u64 {
    use std::time::SystemTime;
    SystemTime::now()
        .duration_since(SystemTime::UNIX_EPOCH)
        .map(|d| d.subsec_nanos() as u64 % 50)
        .unwrap_or(0)
}

/// HTTP status carried by an SDK error, when the request got a response.
pub(crate) fn http_status<E>(err: &SdkError<E>) -> Option<u16> {
    match err {
        SdkError::ServiceError(e) => Some(e.raw().status().as_u16()),
        SdkError::ResponseError(e) => Some(e.raw().status().as_u16()),
        _ => None,
    }
}

/// Check if an S3 error is retryable (429, 5xx, timeouts, dispatch failures).
pub(crate) fn is_retryable<E>(err: &SdkError<E>) -> bool {
    match err {
        SdkError::TimeoutError(_) | SdkError::DispatchFailure(_) => true,
        _ => matches!(http_status(err), Some(429) | Some(500..=504)),
    }
}

/// Map an SDK error to the backend error taxonomy.
pub(crate) fn to_fs_error<E>(op: &str, key: &str, err: SdkError<E>) -> FsError
where
    E: std::error::Error + Send + Sync + 'static,
{
    match http_status(&err) {
        Some(404) => FsError::NotFound(format!("s3://{key}")),
        Some(429) => FsError::RateLimited(format!("S3 {op} {key}: {}", DisplayErrorContext(&err))),
        _ => FsError::Remote(format!("S3 {op} {key}: {}", DisplayErrorContext(&err))),
    }
}

/// Run `send` until it succeeds, fails permanently, or `ctx` ends.
///
/// `send` is called once per attempt so request bodies can be rebuilt.
pub(crate) async fn send_with_retry<T, E, F, Fut>(
    ctx: &Context,
    op: &'static str,
    key: &str,
    mut send: F,
) -> Result<T, FsError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, SdkError<E>>>,
    E: std::error::Error + Send + Sync + 'static,
{
    let mut attempt = 0;
    loop {
        ctx.check()?;
        let result = tokio::select! {
            biased;
            _ = ctx.done() => return Err(ctx.err().unwrap_or(FsError::Cancelled)),
            result = send() => result,
        };
        match result {
            Ok(output) => return Ok(output),
            Err(err) if is_retryable(&err) && attempt < MAX_RETRIES => {
                warn!(attempt, key, op, "S3 retryable error, retrying");
                tokio::select! {
                    biased;
                    _ = ctx.done() => return Err(ctx.err().unwrap_or(FsError::Cancelled)),
                    _ = backoff_sleep(attempt) => {}
                }
                attempt += 1;
            }
            Err(err) => return Err(to_fs_error(op, key, err)),
        }
    }
}
