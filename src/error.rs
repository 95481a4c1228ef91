use thiserror::Error;

/// Errors raised by the exchange client.
///
/// Transient conditions (429, timeouts) are retried once internally before
/// surfacing; anything that reaches the caller is final for that request.
#[derive(Debug, Error)]
pub enum ExchangeError {
    /// 429 received twice in a row.
    #[error("rate limited by exchange, retry after {retry_after_secs}s")]
    RateLimited { retry_after_secs: u64 },

    /// 418 means the client IP is banned. Never retried.
    #[error("banned by exchange (HTTP 418)")]
    Banned,

    #[error("exchange returned HTTP {status}")]
    Status { status: u16 },

    #[error("network error: {0}")]
    Network(#[from] reqwest::Error),

    #[error("malformed exchange response: {0}")]
    Malformed(String),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Errors from pure indicator math.
#[derive(Debug, Error, PartialEq)]
pub enum IndicatorError {
    #[error("period must be at least 1")]
    InvalidPeriod,

    #[error("not enough prices: got {got}, need at least {need}")]
    InsufficientData { got: usize, need: usize },
}

/// Errors from the cache layer.
///
/// The cache is best-effort: callers log these and return computed results
/// anyway rather than failing the refresh.
#[derive(Debug, Error)]
pub enum CacheError {
    /// Backend refused the write for capacity reasons (e.g. Redis OOM).
    #[error("cache write quota exceeded")]
    QuotaExceeded,

    #[error("cache backend error: {0}")]
    Backend(String),

    #[error("cache serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl From<redis::RedisError> for CacheError {
    fn from(e: redis::RedisError) -> Self {
        // Redis reports memory pressure as an OOM error string
        if e.to_string().contains("OOM") {
            CacheError::QuotaExceeded
        } else {
            CacheError::Backend(e.to_string())
        }
    }
}
