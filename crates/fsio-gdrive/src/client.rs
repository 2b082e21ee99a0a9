use std::sync::Arc;
use std::time::Duration;

use fsio_core::{Context, FsError};
use reqwest::{Client as HttpClient, RequestBuilder, Response, StatusCode};
use serde::de::DeserializeOwned;
use tracing::{instrument, warn};

use crate::auth::TokenProvider;

pub const DRIVE_BASE_URL: &str = "https://www.googleapis.com/drive/v3";
pub const DIRECTORY_BASE_URL: &str = "https://admin.googleapis.com/admin/directory/v1";

/// Base URLs of the Google APIs in use.
#[derive(Debug, Clone)]
pub struct Endpoints {
    pub drive: String,
    pub directory: String,
}

impl Default for Endpoints {
    fn default() -> Self {
        Self {
            drive: DRIVE_BASE_URL.to_string(),
            directory: DIRECTORY_BASE_URL.to_string(),
        }
    }
}

/// Retry policy for 429 responses: attempt `n` (from zero) waits
/// `(n + 1) * min_sleep` before the next one.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub min_sleep: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 10,
            min_sleep: Duration::from_secs(60),
        }
    }
}

impl RetryPolicy {
    fn backoff(&self, attempt: u32) -> Duration {
        self.min_sleep * (attempt + 1)
    }
}

/// Authenticated client for the Drive and Directory APIs, acting as one
/// subject.
#[derive(Clone)]
pub(crate) struct DriveClient {
    http: HttpClient,
    tokens: Arc<dyn TokenProvider>,
    subject: Option<String>,
    endpoints: Arc<Endpoints>,
    retry: RetryPolicy,
}

impl DriveClient {
    pub(crate) fn new(tokens: Arc<dyn TokenProvider>, endpoints: Endpoints, retry: RetryPolicy) -> Self {
        Self {
            http: HttpClient::new(),
            tokens,
            subject: None,
            endpoints: Arc::new(endpoints),
            retry,
        }
    }

    /// Same client acting on behalf of `subject`.
    pub(crate) fn impersonate(&self, subject: &str) -> Self {
        Self {
            subject: Some(subject.to_string()),
            ..self.clone()
        }
    }

    pub(crate) fn drive_url(&self, path: &str) -> String {
        format!("{}/{}", self.endpoints.drive.trim_end_matches('/'), path)
    }

    pub(crate) fn directory_url(&self, path: &str) -> String {
        format!("{}/{}", self.endpoints.directory.trim_end_matches('/'), path)
    }

    /// Send a request, retrying 429 responses with linear backoff. Other
    /// non-success statuses become errors.
    async fn send_with_retry(
        &self,
        ctx: &Context,
        build_request: impl Fn(&HttpClient) -> RequestBuilder,
    ) -> Result<Response, FsError> {
        let attempts = self.retry.max_attempts.max(1);

        for attempt in 0..attempts {
            let token = self.tokens.token(self.subject.as_deref()).await?;
            let response = ctx
                .run(async {
                    build_request(&self.http)
                        .bearer_auth(&token)
                        .send()
                        .await
                        .map_err(|e| FsError::Remote(format!("Drive request failed: {}", e)))
                })
                .await?;

            let status = response.status();
            if status.is_success() {
                return Ok(response);
            }

            let url = response.url().to_string();
            if status == StatusCode::NOT_FOUND {
                return Err(FsError::NotFound(url));
            }
            if status != StatusCode::TOO_MANY_REQUESTS {
                let text = response.text().await.unwrap_or_default();
                return Err(FsError::Remote(format!("{} returned {}: {}", url, status, text)));
            }
            if attempt + 1 == attempts {
                break;
            }

            let delay = self.retry.backoff(attempt);
            warn!(
                attempt = attempt + 1,
                delay_ms = delay.as_millis() as u64,
                "Drive rate limited (429), retrying"
            );
            ctx.run(async {
                tokio::time::sleep(delay).await;
                Ok(())
            })
            .await?;
        }

        Err(FsError::RateLimited(format!(
            "still rate limited after {} attempts",
            attempts
        )))
    }

    /// GET `url` and return the raw response, for downloads.
    #[instrument(skip(self, ctx, query), level = "debug")]
    pub(crate) async fn get(
        &self,
        ctx: &Context,
        url: &str,
        query: &[(&str, &str)],
    ) -> Result<Response, FsError> {
        self.send_with_retry(ctx, |http| http.get(url).query(query))
            .await
    }

    /// GET `url` and decode the JSON body.
    pub(crate) async fn get_json<T: DeserializeOwned>(
        &self,
        ctx: &Context,
        url: &str,
        query: &[(&str, &str)],
    ) -> Result<T, FsError> {
        let response = self.get(ctx, url, query).await?;
        ctx.run(async {
            response
                .json::<T>()
                .await
                .map_err(|e| FsError::Remote(format!("invalid response from {}: {}", url, e)))
        })
        .await
    }
}
