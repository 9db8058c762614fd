use thiserror::Error;

/// Error type shared by every Catena crate.
#[derive(Error, Debug)]
pub enum CrawlError {
    /// Transport-level HTTP failure (request could not be completed).
    #[error("HTTP error: {0}")]
    HttpError(String),

    /// Server answered with a non-success status.
    #[error("HTTP {status} for {url}")]
    HttpStatus { status: u16, url: String },

    /// Request timed out.
    #[error("Request timed out after {0} ms")]
    Timeout(u64),

    /// Network/connection error.
    #[error("Network error: {0}")]
    NetworkError(String),

    /// No usable proxy left, even after replenishment.
    #[error("Proxy pool exhausted: no usable proxies available")]
    ProxyExhausted,

    /// A proxy address could not be understood.
    #[error("Invalid proxy address '{address}': {reason}")]
    InvalidProxy { address: String, reason: String },

    /// A step parser rejected the fetched content.
    #[error("Parse error: {0}")]
    ParseError(String),

    /// Invalid chain, step, or fetch configuration.
    #[error("Configuration error: {0}")]
    ConfigError(String),

    /// A storage sink failed to persist or finalize.
    #[error("Storage error: {0}")]
    StorageError(String),

    /// JSON serialization/deserialization failed.
    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// The run was cancelled before this operation could finish.
    #[error("Cancelled")]
    Cancelled,

    /// Generic error.
    #[error("{0}")]
    Generic(String),
}

impl CrawlError {
    /// Returns true if this error is transient and the fetch is worth retrying.
    ///
    /// A rejected proxy address is retryable: the next attempt draws another
    /// proxy from the pool.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            CrawlError::HttpError(_)
                | CrawlError::HttpStatus { .. }
                | CrawlError::Timeout(_)
                | CrawlError::NetworkError(_)
                | CrawlError::ProxyExhausted
                | CrawlError::InvalidProxy { .. }
        )
    }

    /// Returns true if the proxy used for the failed attempt should be blamed.
    ///
    /// Any transport or status failure counts against the proxy. A broken
    /// proxy address counts too, since retrying it can never succeed.
    pub fn should_penalize_proxy(&self) -> bool {
        matches!(
            self,
            CrawlError::HttpError(_)
                | CrawlError::HttpStatus { .. }
                | CrawlError::Timeout(_)
                | CrawlError::NetworkError(_)
                | CrawlError::InvalidProxy { .. }
        )
    }
}
