//! Deadline-bounded HTTP fetch helpers.
//!
//! Scraping runners talk to unreliable upstream hosts; every request here is
//! bounded by a per-attempt timeout and retried a fixed number of times with
//! linear backoff. Each call starts its own fresh retry budget.

use std::time::Duration;

use reqwest::{Client, StatusCode};
use thiserror::Error;
use url::Url;

use crate::config::FetchPolicy;

#[derive(Error, Debug)]
pub enum FetchError {
    #[error("request to {url} timed out after {timeout:?}")]
    Timeout { url: String, timeout: Duration },

    #[error("upstream returned {status} for {url}")]
    Status { status: StatusCode, url: String },

    #[error("transport error: {0}")]
    Transport(#[from] reqwest::Error),
}

pub type FetchResult<T> = std::result::Result<T, FetchError>;

/// Build the shared HTTP client used by all runners.
///
/// Per-request deadlines are enforced by [`fetch_with_timeout`], so only the
/// connect phase is bounded here.
pub fn http_client() -> FetchResult<Client> {
    let client = Client::builder()
        .connect_timeout(Duration::from_secs(10))
        .user_agent(concat!("marquee/", env!("CARGO_PKG_VERSION")))
        .build()?;
    Ok(client)
}

/// Issue a GET bound to a wall-clock deadline.
///
/// On expiry the in-flight request is dropped, which aborts it, and the call
/// fails with [`FetchError::Timeout`].
pub async fn fetch_with_timeout(
    client: &Client,
    url: &Url,
    timeout: Duration,
) -> FetchResult<reqwest::Response> {
    match tokio::time::timeout(timeout, client.get(url.clone()).send()).await {
        Ok(result) => Ok(result?),
        Err(_) => Err(FetchError::Timeout {
            url: url.to_string(),
            timeout,
        }),
    }
}

fn retryable(status: StatusCode) -> bool {
    status.is_server_error() || status == StatusCode::TOO_MANY_REQUESTS
}

/// Fetch with up to `policy.max_retries` additional attempts.
///
/// Attempt n waits `backoff_unit * n` before running (linear backoff).
/// Timeouts, transport errors, 5xx, and 429 are retried; any other
/// non-success status is returned immediately since repeating the request
/// cannot change the answer.
pub async fn retry_fetch(
    client: &Client,
    url: &Url,
    policy: &FetchPolicy,
) -> FetchResult<reqwest::Response> {
    let mut attempt: u32 = 0;
    loop {
        let error = match fetch_with_timeout(client, url, policy.timeout()).await {
            Ok(response) if response.status().is_success() => return Ok(response),
            Ok(response) => {
                let status = response.status();
                let error = FetchError::Status {
                    status,
                    url: url.to_string(),
                };
                if !retryable(status) {
                    return Err(error);
                }
                error
            }
            Err(error) => error,
        };

        if attempt >= policy.max_retries {
            return Err(error);
        }
        attempt += 1;
        tracing::debug!(
            url = %url,
            attempt,
            max_retries = policy.max_retries,
            error = %error,
            "upstream fetch failed, backing off"
        );
        tokio::time::sleep(policy.backoff_unit() * attempt).await;
    }
}
