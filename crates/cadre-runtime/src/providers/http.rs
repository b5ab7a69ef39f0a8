//! HTTP plumbing shared by the built-in capabilities.

use std::future::Future;
use std::sync::OnceLock;
use std::time::Duration;

use backon::{ExponentialBuilder, Retryable};
use serde_json::Value as JsonValue;

use super::ProviderError;

/// Upper bound for a single HTTP exchange. The engine's call timeout is
/// usually tighter and wins.
const CLIENT_TIMEOUT: Duration = Duration::from_secs(120);

static CLIENT: OnceLock<Result<reqwest::Client, String>> = OnceLock::new();

/// Process-wide pooled client.
pub(crate) fn client() -> Result<&'static reqwest::Client, ProviderError> {
    CLIENT
        .get_or_init(|| {
            reqwest::Client::builder()
                .timeout(CLIENT_TIMEOUT)
                .build()
                .map_err(|e| e.to_string())
        })
        .as_ref()
        .map_err(|e| ProviderError::HttpError(format!("failed to build HTTP client: {}", e)))
}

pub(crate) fn send_error(error: reqwest::Error) -> ProviderError {
    if error.is_timeout() {
        ProviderError::Timeout(CLIENT_TIMEOUT)
    } else {
        ProviderError::HttpError(error.to_string())
    }
}

/// Map the response status to a [`ProviderError`] or parse the JSON body.
pub(crate) async fn read_json(response: reqwest::Response) -> Result<JsonValue, ProviderError> {
    let status = response.status();

    if status.as_u16() == 429 {
        let retry_after = response
            .headers()
            .get("retry-after")
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.parse::<u64>().ok())
            .map(Duration::from_secs);
        return Err(ProviderError::RateLimited { retry_after });
    }

    if status.as_u16() == 401 || status.as_u16() == 403 {
        return Err(ProviderError::AuthError);
    }

    if !status.is_success() {
        let body = response.text().await.unwrap_or_default();
        return Err(ProviderError::ApiError {
            status: status.as_u16(),
            message: error_message(&body),
        });
    }

    response
        .json::<JsonValue>()
        .await
        .map_err(|e| ProviderError::ParseError(e.to_string()))
}

/// Pull `error.message` out of an error body, or return the body itself.
fn error_message(body: &str) -> String {
    serde_json::from_str::<JsonValue>(body)
        .ok()
        .and_then(|v| {
            v.get("error")
                .and_then(|e| e.get("message").or(Some(e)))
                .and_then(JsonValue::as_str)
                .map(str::to_string)
        })
        .unwrap_or_else(|| body.trim().to_string())
}

/// Run `op`, retrying transient failures with exponential backoff.
pub(crate) async fn with_retries<T, F, Fut>(
    provider: &str,
    max_retries: usize,
    op: F,
) -> Result<T, ProviderError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, ProviderError>>,
{
    op.retry(
        ExponentialBuilder::default()
            .with_min_delay(Duration::from_millis(250))
            .with_max_times(max_retries),
    )
    .when(ProviderError::is_retryable)
    .notify(|err: &ProviderError, delay: Duration| {
        tracing::debug!(provider = %provider, error = %err, delay = ?delay, "Retrying provider call");
    })
    .await
}
