use std::future::Future;
use std::time::Duration;

use reqwest::StatusCode;

use crate::error::LlmError;

const BASE_BACKOFF: Duration = Duration::from_millis(500);
const MAX_BACKOFF: Duration = Duration::from_secs(30);

/// Statuses worth another attempt: throttling and overloaded upstreams.
fn is_retryable(status: StatusCode) -> bool {
    matches!(
        status,
        StatusCode::TOO_MANY_REQUESTS
            | StatusCode::BAD_GATEWAY
            | StatusCode::SERVICE_UNAVAILABLE
            | StatusCode::GATEWAY_TIMEOUT
    )
}

fn backoff(attempt: u32) -> Duration {
    BASE_BACKOFF
        .saturating_mul(1 << attempt.min(8))
        .min(MAX_BACKOFF)
}

/// `Retry-After` in seconds when the server sent one, exponential backoff
/// otherwise. Both are capped.
fn retry_delay(response: &reqwest::Response, attempt: u32) -> Duration {
    response
        .headers()
        .get(reqwest::header::RETRY_AFTER)
        .and_then(|v| v.to_str().ok())
        .and_then(|s| s.trim().parse::<u64>().ok())
        .map_or_else(|| backoff(attempt), Duration::from_secs)
        .min(MAX_BACKOFF)
}

/// Send a request built by `f`, retrying throttled or overloaded responses
/// up to `max_retries` times.
///
/// Exhausted throttling becomes [`LlmError::RateLimited`]; an exhausted 5xx
/// response is handed back so the caller reports its body.
///
/// # Errors
///
/// Returns [`LlmError::Http`] on transport failure.
pub(crate) async fn send_with_retry<F, Fut>(
    provider: &'static str,
    max_retries: u32,
    mut f: F,
) -> Result<reqwest::Response, LlmError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<reqwest::Response, reqwest::Error>>,
{
    let mut attempt = 0;
    loop {
        let response = f().await?;
        let status = response.status();
        if !is_retryable(status) {
            return Ok(response);
        }
        if attempt >= max_retries {
            if status == StatusCode::TOO_MANY_REQUESTS {
                return Err(LlmError::RateLimited);
            }
            return Ok(response);
        }

        let delay = retry_delay(&response, attempt);
        tracing::warn!(
            provider,
            status = status.as_u16(),
            attempt = attempt + 1,
            max_retries,
            "retrying in {}ms",
            delay.as_millis()
        );
        tokio::time::sleep(delay).await;
        attempt += 1;
    }
}
