use std::path::PathBuf;

use serde::Serialize;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum AppError {
    #[error("HTTP request error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("HTTP {status} from {url}")]
    HttpStatus { status: u16, url: String },

    #[error("JSON parse error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Input file not found: {}", .0.display())]
    MissingInput(PathBuf),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, AppError>;

impl AppError {
    /// Rate-limit and server-side statuses are worth another attempt; everything else is final.
    pub fn is_retryable(&self) -> bool {
        match self {
            AppError::HttpStatus { status, .. } => *status == 429 || *status >= 500,
            AppError::Http(e) => e.is_timeout() || e.is_connect(),
            _ => false,
        }
    }
}

/// Non-2xx statuses become [`AppError::HttpStatus`] carrying `url` as given.
pub fn check_status(status: reqwest::StatusCode, url: &str) -> Result<()> {
    if status.is_success() {
        Ok(())
    } else {
        Err(AppError::HttpStatus { status: status.as_u16(), url: url.to_string() })
    }
}

/// Why a single contract or game was dropped from a batch run.
/// Recorded in the run report; never aborts the batch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", content = "detail", rename_all = "snake_case")]
pub enum FailureKind {
    /// Network or HTTP-status failure while looking the item up.
    Transport(String),
    /// Home/away teams could not be determined.
    Resolution(String),
    /// No sample or game near the target time.
    LookupMiss(String),
    /// Required field missing or unparseable (ticker, expiration, game start).
    InvalidContract(String),
}

impl std::fmt::Display for FailureKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FailureKind::Transport(d) => write!(f, "transport: {d}"),
            FailureKind::Resolution(d) => write!(f, "resolution: {d}"),
            FailureKind::LookupMiss(d) => write!(f, "lookup miss: {d}"),
            FailureKind::InvalidContract(d) => write!(f, "invalid contract: {d}"),
        }
    }
}

impl From<AppError> for FailureKind {
    fn from(e: AppError) -> Self {
        FailureKind::Transport(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use reqwest::StatusCode;

    #[test]
    fn success_statuses_pass() {
        assert!(check_status(StatusCode::OK, "/markets").is_ok());
        assert!(check_status(StatusCode::NO_CONTENT, "/markets").is_ok());
    }

    #[test]
    fn failing_statuses_map_to_http_status() {
        let err = check_status(StatusCode::TOO_MANY_REQUESTS, "/markets").unwrap_err();
        assert!(matches!(&err, AppError::HttpStatus { status: 429, url } if url == "/markets"));
        assert!(err.is_retryable());

        let err = check_status(StatusCode::NOT_FOUND, "/events/X").unwrap_err();
        assert_eq!(err.to_string(), "HTTP 404 from /events/X");
        assert!(!err.is_retryable());

        assert!(check_status(StatusCode::BAD_GATEWAY, "/markets").unwrap_err().is_retryable());
    }
}
