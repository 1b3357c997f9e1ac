use thiserror::Error;

/// Crawl-wide error types for webscour.
#[derive(Error, Debug)]
pub enum CrawlError {
    /// HTTP request failed (fetching a page).
    #[error("HTTP error: {0}")]
    HttpError(String),

    /// The server answered with a non-success status.
    #[error("HTTP {status} for {url}")]
    HttpStatus { status: u16, url: String },

    /// Request timed out.
    #[error("Request timed out after {0} seconds")]
    Timeout(u64),

    /// Network/connection error.
    #[error("Network error: {0}")]
    NetworkError(String),

    /// A task body or link could not be parsed as an absolute URL.
    #[error("Invalid URL: {0}")]
    InvalidUrl(String),

    /// The work queue (or its backing database) failed.
    #[error("Queue error: {0}")]
    QueueError(String),

    /// Persisting a page artifact failed.
    #[error("Storage error: {0}")]
    StorageError(String),

    /// Invalid or missing configuration.
    #[error("Configuration error: {0}")]
    ConfigError(String),

    /// JSON serialization/deserialization failed.
    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),

    /// Generic error.
    #[error("{0}")]
    Generic(String),
}

impl CrawlError {
    /// Returns true if this error is transient and worth retrying.
    pub fn is_retryable(&self) -> bool {
        match self {
            CrawlError::NetworkError(_) | CrawlError::Timeout(_) => true,
            CrawlError::HttpStatus { status, .. } => *status == 429 || *status >= 500,
            CrawlError::HttpError(msg) => {
                msg.contains("timeout") || msg.contains("connect") || msg.contains("reset")
            }
            _ => false,
        }
    }

    /// Returns true if this error must stop the worker that hit it.
    ///
    /// Losing the queue or the page store leaves the worker unable to settle
    /// or persist anything, so it exits instead of dropping the task.
    pub fn is_fatal(&self) -> bool {
        matches!(self, CrawlError::QueueError(_) | CrawlError::StorageError(_))
    }
}
