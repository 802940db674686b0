use std::time::Duration;

use reqwest::header::RETRY_AFTER;
use reqwest::{Client, Response, StatusCode};
use serde_json::Value;

use crate::error::{AppError, Result};

use super::range::DateRange;

pub const APOD_API_URL: &str = "https://api.nasa.gov/planetary/apod";

#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// Extra attempts after the first one.
    pub max_retries: u32,
    pub retry_wait: Duration,
    pub backoff_multiplier: f64,
    pub max_wait: Duration,
    pub request_timeout: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            retry_wait: Duration::from_secs(5),
            backoff_multiplier: 2.0,
            max_wait: Duration::from_secs(60),
            request_timeout: Duration::from_secs(30),
        }
    }
}

impl RetryPolicy {
    /// Wait before retry number `retry` (0-based).
    pub fn delay_for(&self, retry: u32) -> Duration {
        let factor = self.backoff_multiplier.max(1.0).powi(retry as i32);
        let secs = (self.retry_wait.as_secs_f64() * factor).min(self.max_wait.as_secs_f64());
        Duration::try_from_secs_f64(secs).unwrap_or(self.max_wait)
    }

    fn rate_limit_delay(&self, retry: u32, retry_after: Option<u64>) -> Duration {
        match retry_after {
            Some(secs) => Duration::from_secs(secs).min(self.max_wait),
            None => self.delay_for(retry),
        }
    }
}

/// Client for the APOD range endpoint.
pub struct ApodClient {
    client: Client,
    api_url: String,
    api_key: String,
    thumbs: bool,
    policy: RetryPolicy,
}

impl ApodClient {
    pub fn new(api_url: &str, api_key: String, policy: RetryPolicy) -> Result<Self> {
        if api_key.trim().is_empty() {
            return Err(AppError::Auth {
                status: 0,
                message: "no API key configured".to_string(),
            });
        }

        let client = Client::builder()
            .timeout(policy.request_timeout)
            .connect_timeout(policy.request_timeout.min(Duration::from_secs(10)))
            .user_agent(concat!("apod-collector/", env!("CARGO_PKG_VERSION")))
            .build()?;

        Ok(Self {
            client,
            api_url: api_url.to_string(),
            api_key,
            thumbs: true,
            policy,
        })
    }

    /// Ask the API to include `thumbnail_url` for videos itself.
    pub fn with_thumbs(mut self, thumbs: bool) -> Self {
        self.thumbs = thumbs;
        self
    }

    /// Fetch every entry the API reports for `range` in a single request,
    /// retrying transient failures according to the retry policy.
    pub async fn fetch_range(&self, range: &DateRange) -> Result<Vec<Value>> {
        let attempts = self.policy.max_retries + 1;
        let mut attempt = 0;

        loop {
            let err = match self.fetch_once(range).await {
                Ok(entries) => {
                    tracing::debug!(
                        "Fetched {} entries for {}..{} on attempt {}",
                        entries.len(),
                        range.start(),
                        range.end(),
                        attempt + 1
                    );
                    return Ok(entries);
                }
                Err(e) if e.is_transient() => e,
                Err(e) => return Err(e),
            };

            if attempt + 1 >= attempts {
                return Err(AppError::FetchExhausted {
                    attempts,
                    last: Box::new(err),
                });
            }

            let delay = match &err {
                AppError::RateLimited { retry_after } => {
                    self.policy.rate_limit_delay(attempt, *retry_after)
                }
                _ => self.policy.delay_for(attempt),
            };
            tracing::warn!(
                "Request failed (attempt {}/{}): {}; retrying in {:?}",
                attempt + 1,
                attempts,
                err,
                delay
            );
            tokio::time::sleep(delay).await;
            attempt += 1;
        }
    }

    async fn fetch_once(&self, range: &DateRange) -> Result<Vec<Value>> {
        let start = range.start().to_string();
        let end = range.end().to_string();
        let mut query = vec![
            ("api_key", self.api_key.as_str()),
            ("start_date", start.as_str()),
            ("end_date", end.as_str()),
        ];
        if self.thumbs {
            query.push(("thumbs", "true"));
        }

        let response = self.client.get(&self.api_url).query(&query).send().await?;
        let status = response.status();

        if status.is_success() {
            let text = response.text().await?;
            return parse_payload(&text);
        }

        Err(classify_failure(status, response).await)
    }
}

async fn classify_failure(status: StatusCode, response: Response) -> AppError {
    let retry_after = response
        .headers()
        .get(RETRY_AFTER)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.trim().parse::<u64>().ok());
    let message = response
        .text()
        .await
        .map(|body| error_message(&body))
        .unwrap_or_default();
    let code = status.as_u16();

    match status {
        StatusCode::TOO_MANY_REQUESTS => AppError::RateLimited { retry_after },
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => AppError::Auth {
            status: code,
            message,
        },
        s if s.is_server_error() => AppError::Server {
            status: code,
            message,
        },
        _ => AppError::Request {
            status: code,
            message,
        },
    }
}

/// Pull a readable message out of an api.nasa.gov error body.
///
/// The gateway answers `{"error": {"code", "message"}}`, the APOD service
/// itself `{"code", "msg"}`.
fn error_message(body: &str) -> String {
    let parsed: Option<Value> = serde_json::from_str(body).ok();
    parsed
        .as_ref()
        .and_then(|v| {
            v.pointer("/error/message")
                .or_else(|| v.get("msg"))
                .or_else(|| v.get("message"))
        })
        .and_then(Value::as_str)
        .map(str::to_string)
        .unwrap_or_else(|| body.chars().take(200).collect())
}

fn parse_payload(text: &str) -> Result<Vec<Value>> {
    let payload: Value = serde_json::from_str(text).map_err(|_| AppError::Request {
        status: 200,
        message: format!(
            "non-JSON response: {}",
            text.chars().take(200).collect::<String>()
        ),
    })?;

    match payload {
        Value::Array(entries) => Ok(entries),
        Value::Object(_) => Ok(vec![payload]),
        other => Err(AppError::Request {
            status: 200,
            message: format!("unexpected payload: {}", other),
        }),
    }
}
