use chrono::NaiveDate;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum AppError {
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Invalid date range: start {start} is after end {end}")]
    InvalidRange { start: NaiveDate, end: NaiveDate },

    #[error("APOD API rejected the credential (HTTP {status}): {message}")]
    Auth { status: u16, message: String },

    #[error("APOD API rejected the request (HTTP {status}): {message}")]
    Request { status: u16, message: String },

    #[error("APOD API rate limit reached")]
    RateLimited { retry_after: Option<u64> },

    #[error("APOD API server error (HTTP {status}): {message}")]
    Server { status: u16, message: String },

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Gave up after {attempts} attempts: {last}")]
    FetchExhausted {
        attempts: u32,
        #[source]
        last: Box<AppError>,
    },

    #[error("Malformed entry: {0}")]
    MalformedEntry(String),

    #[error("Failed to store entry for {date}: {source}")]
    StoreWrite {
        date: NaiveDate,
        #[source]
        source: tokio_rusqlite::Error,
    },

    #[error("No entries stored: all {skipped} fetched entries were skipped")]
    NothingStored { skipped: usize },

    #[error("Database error: {0}")]
    Database(#[from] tokio_rusqlite::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("TOML parse error: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("Config error: {0}")]
    Config(String),
}

impl AppError {
    /// Whether the fetcher should retry after this error.
    pub fn is_transient(&self) -> bool {
        match self {
            AppError::RateLimited { .. } | AppError::Server { .. } => true,
            // A body cut off mid-read surfaces as a body or decode error.
            AppError::Http(e) => {
                e.is_timeout() || e.is_connect() || e.is_request() || e.is_body() || e.is_decode()
            }
            _ => false,
        }
    }
}

pub type Result<T> = std::result::Result<T, AppError>;
