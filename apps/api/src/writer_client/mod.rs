/// Writer client: the single point of entry for calls to the upstream
/// cover letter generation endpoint.
///
/// The upstream answers with a chunked body in the writer line format
/// (`0:"…"`, `e:…`, `d:…`). This module only opens the stream; decoding
/// lives in `crate::stream`.
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use futures_util::stream::BoxStream;
use futures_util::TryStreamExt;
use reqwest::{Client, StatusCode};
use serde::Serialize;
use thiserror::Error;
use tracing::{debug, warn};

pub mod prompts;

/// Attempts at opening the stream. Retries stop once a 2xx response arrives;
/// body reads are never retried.
const MAX_OPEN_ATTEMPTS: u32 = 3;

/// Response body as a stream of raw chunks.
pub type ByteStream = BoxStream<'static, Result<Bytes, WriterError>>;

#[derive(Debug, Error)]
pub enum WriterError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("upstream error (status {status}): {message}")]
    Api { status: u16, message: String },

    #[error("upstream rate limit hit")]
    RateLimited,

    #[error("stream interrupted: {0}")]
    Interrupted(String),
}

/// Source of writer streams. Implemented by `WriterClient`; swapped in tests.
#[async_trait]
pub trait WriterSource: Send + Sync {
    /// Opens a generation stream for `prompt`.
    ///
    /// Non-2xx responses are errors. `Ok(None)` means the upstream accepted
    /// the request but sent no body.
    async fn open_stream(&self, prompt: &str) -> Result<Option<ByteStream>, WriterError>;
}

#[derive(Debug, Serialize)]
struct CompletionRequest<'a> {
    prompt: &'a str,
}

#[derive(Clone)]
pub struct WriterClient {
    client: Client,
    endpoint: String,
    api_key: Option<String>,
}

impl WriterClient {
    pub fn new(
        endpoint: String,
        api_key: Option<String>,
        connect_timeout: Duration,
    ) -> Result<Self, WriterError> {
        // Connect timeout only: a total timeout would cut long generations.
        let client = Client::builder().connect_timeout(connect_timeout).build()?;
        Ok(Self {
            client,
            endpoint,
            api_key,
        })
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }
}

#[async_trait]
impl WriterSource for WriterClient {
    /// Retries connect failures and 5xx with exponential backoff (1s, 2s).
    /// 429 is returned immediately.
    async fn open_stream(&self, prompt: &str) -> Result<Option<ByteStream>, WriterError> {
        let body = CompletionRequest { prompt };
        let mut last_error: Option<WriterError> = None;

        for attempt in 0..MAX_OPEN_ATTEMPTS {
            if attempt > 0 {
                let delay = Duration::from_millis(1000 * (1 << (attempt - 1)));
                warn!(
                    "Writer stream attempt {} failed, retrying after {}ms...",
                    attempt,
                    delay.as_millis()
                );
                tokio::time::sleep(delay).await;
            }

            let mut request = self
                .client
                .post(&self.endpoint)
                .header("accept", "text/plain")
                .json(&body);
            if let Some(key) = &self.api_key {
                request = request.bearer_auth(key);
            }

            let response = match request.send().await {
                Ok(r) => r,
                Err(e) => {
                    last_error = Some(WriterError::Http(e));
                    continue;
                }
            };

            let status = response.status();

            if status == StatusCode::TOO_MANY_REQUESTS {
                return Err(WriterError::RateLimited);
            }

            if status.is_server_error() {
                let message = response.text().await.unwrap_or_default();
                warn!("Writer upstream returned {}: {}", status, message);
                last_error = Some(WriterError::Api {
                    status: status.as_u16(),
                    message,
                });
                continue;
            }

            if !status.is_success() {
                let message = response.text().await.unwrap_or_default();
                return Err(WriterError::Api {
                    status: status.as_u16(),
                    message,
                });
            }

            if status == StatusCode::NO_CONTENT || response.content_length() == Some(0) {
                debug!("Writer upstream returned {} with no body", status);
                return Ok(None);
            }

            debug!("Writer stream opened (status {})", status);
            let stream = response.bytes_stream().map_err(WriterError::Http);
            return Ok(Some(Box::pin(stream)));
        }

        Err(last_error.unwrap_or(WriterError::Api {
            status: StatusCode::BAD_GATEWAY.as_u16(),
            message: format!("no response after {MAX_OPEN_ATTEMPTS} attempts"),
        }))
    }
}
