use std::time::Duration;
use thiserror::Error;

/// Everything that can leave a single screener cell without a value.
///
/// None of these abort a scan: the orchestrator records the error on the cell and
/// moves on.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ScanError {
    #[error("authentication failed: {0}")]
    Auth(String),

    #[error("rate limited: {0}")]
    RateLimited(String),

    #[error("request timed out after {}s", .0.as_secs())]
    Timeout(Duration),

    #[error("upstream error: {0}")]
    Upstream(String),

    #[error("no data: {0}")]
    NoData(String),

    #[error("malformed data: {0}")]
    MalformedData(String),

    #[error("insufficient data: {got} bars, need at least {need}")]
    InsufficientData { got: usize, need: usize },
}

impl ScanError {
    /// Maps a transport-level reqwest failure.
    pub fn from_transport(err: reqwest::Error, timeout: Duration) -> Self {
        if err.is_timeout() {
            ScanError::Timeout(timeout)
        } else if err.is_decode() {
            ScanError::Upstream(format!("undecodable response: {err}"))
        } else {
            ScanError::Upstream(err.to_string())
        }
    }

    /// Maps a non-2xx status with its body.
    pub fn from_status(status: reqwest::StatusCode, body: &str) -> Self {
        let body: String = body.trim().chars().take(200).collect();
        match status.as_u16() {
            401 | 403 => ScanError::Auth(format!("HTTP {status}: {body}")),
            418 | 429 => ScanError::RateLimited(format!("HTTP {status}: {body}")),
            _ => ScanError::Upstream(format!("HTTP {status}: {body}")),
        }
    }
}

pub type ScanResult<T> = std::result::Result<T, ScanError>;
