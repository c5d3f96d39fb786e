use crate::utils::error::{AnalyticsError, Result};
use reqwest::header::LOCATION;
use reqwest::{Client, RequestBuilder, Response, Url};
use std::time::Duration;

#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub attempts: u32,
    pub delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            attempts: 3,
            delay: Duration::from_secs(2),
        }
    }
}

impl RetryPolicy {
    pub fn none() -> Self {
        Self {
            attempts: 1,
            delay: Duration::ZERO,
        }
    }
}

/// Converts a non-2xx response into [`AnalyticsError::ApiStatusError`].
pub fn check_status(response: Response) -> Result<Response> {
    let status = response.status();
    if status.is_success() {
        Ok(response)
    } else {
        Err(AnalyticsError::ApiStatusError {
            status: status.as_u16(),
            url: response.url().to_string(),
        })
    }
}

const MAX_REDIRECTS: usize = 10;

fn accept(response: Response, allow_redirect: bool) -> Result<Response> {
    if allow_redirect && response.status().is_redirection() {
        Ok(response)
    } else {
        check_status(response)
    }
}

/// Sends `request`, retrying transient failures with a fixed delay.
pub async fn send_with_retry(request: RequestBuilder, policy: &RetryPolicy) -> Result<Response> {
    send_inner(request, policy, false).await
}

async fn send_inner(
    request: RequestBuilder,
    policy: &RetryPolicy,
    allow_redirect: bool,
) -> Result<Response> {
    let attempts = policy.attempts.max(1);
    let mut attempt = 1;

    loop {
        // Bodies that cannot be cloned get a single shot.
        let Some(current) = request.try_clone() else {
            return accept(request.send().await?, allow_redirect);
        };

        let outcome = match current.send().await {
            Ok(response) => accept(response, allow_redirect),
            Err(e) => Err(AnalyticsError::from(e)),
        };

        match outcome {
            Err(e) if e.is_retryable() && attempt < attempts => {
                tracing::warn!(
                    "Request failed (attempt {}/{}): {}; retrying in {:?}",
                    attempt,
                    attempts,
                    e,
                    policy.delay
                );
                tokio::time::sleep(policy.delay).await;
                attempt += 1;
            }
            other => return other,
        }
    }
}

/// GET with a bearer token that survives cross-host redirects.
///
/// `client` must be built with redirects disabled; each hop is re-issued
/// with the token attached.
pub async fn get_with_bearer(
    client: &Client,
    url: &str,
    token: &str,
    policy: &RetryPolicy,
) -> Result<Response> {
    let mut current = Url::parse(url).map_err(|e| AnalyticsError::InvalidConfigValueError {
        field: "url".to_string(),
        value: url.to_string(),
        reason: e.to_string(),
    })?;

    for _ in 0..MAX_REDIRECTS {
        let request = client.get(current.clone()).bearer_auth(token);
        let response = send_inner(request, policy, true).await?;
        if !response.status().is_redirection() {
            return Ok(response);
        }

        let location = response
            .headers()
            .get(LOCATION)
            .and_then(|v| v.to_str().ok())
            .ok_or_else(|| AnalyticsError::ApiStatusError {
                status: response.status().as_u16(),
                url: current.to_string(),
            })?;
        let next = current
            .join(location)
            .map_err(|e| AnalyticsError::processing(format!("bad redirect '{}': {}", location, e)))?;
        tracing::debug!("Following redirect to {}", next);
        current = next;
    }

    Err(AnalyticsError::processing(format!(
        "too many redirects while fetching {}",
        url
    )))
}
