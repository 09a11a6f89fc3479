use std::time::Duration;

use thiserror::Error;

pub type Result<T> = std::result::Result<T, SyncError>;

/// Failures that can reach the top of a page-processing step.
#[derive(Debug, Error)]
pub enum SyncError {
    #[error("store unavailable: {0}")]
    StoreUnavailable(String),

    #[error("rate limited by source{}", retry_after_suffix(.retry_after))]
    RateLimited { retry_after: Option<Duration> },

    #[error("unauthorized: {0}")]
    Unauthorized(String),

    #[error("malformed record: {0}")]
    MalformedRecord(String),

    #[error("transport error: {0}")]
    Transport(String),

    #[error("bad request: {0}")]
    BadRequest(String),
}

fn retry_after_suffix(retry_after: &Option<Duration>) -> String {
    match retry_after {
        Some(d) => format!(" (retry after {}s)", d.as_secs()),
        None => String::new(),
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    Retryable,
    NonRetryable,
}

impl SyncError {
    pub fn code(&self) -> &'static str {
        match self {
            Self::StoreUnavailable(_) => "STORE_UNAVAILABLE",
            Self::RateLimited { .. } => "RATE_LIMIT",
            Self::Unauthorized(_) => "UNAUTHORIZED",
            Self::MalformedRecord(_) => "MALFORMED_RECORD",
            Self::Transport(_) => "TRANSPORT",
            Self::BadRequest(_) => "BAD_PAYLOAD",
        }
    }

    pub fn class(&self) -> ErrorClass {
        classify(self.code())
    }

    /// `CODE: message`, the form persisted as a job diagnostic.
    pub fn diagnostic(&self) -> String {
        format!("{}: {}", self.code(), self)
    }
}

pub fn classify(code: &str) -> ErrorClass {
    match code {
        "STORE_UNAVAILABLE" | "RATE_LIMIT" | "TRANSPORT" => ErrorClass::Retryable,
        "UNAUTHORIZED" | "MALFORMED_RECORD" | "BAD_PAYLOAD" => ErrorClass::NonRetryable,
        _ => ErrorClass::Retryable,
    }
}

impl From<sqlx::Error> for SyncError {
    fn from(e: sqlx::Error) -> Self {
        Self::StoreUnavailable(e.to_string())
    }
}

impl From<std::io::Error> for SyncError {
    fn from(e: std::io::Error) -> Self {
        Self::StoreUnavailable(e.to_string())
    }
}

impl From<parquet::errors::ParquetError> for SyncError {
    fn from(e: parquet::errors::ParquetError) -> Self {
        Self::StoreUnavailable(format!("parquet: {e}"))
    }
}

impl From<arrow::error::ArrowError> for SyncError {
    fn from(e: arrow::error::ArrowError) -> Self {
        Self::StoreUnavailable(format!("arrow: {e}"))
    }
}

impl From<reqwest::Error> for SyncError {
    fn from(e: reqwest::Error) -> Self {
        Self::Transport(e.to_string())
    }
}

impl From<serde_json::Error> for SyncError {
    fn from(e: serde_json::Error) -> Self {
        Self::BadRequest(e.to_string())
    }
}

impl From<tokio::task::JoinError> for SyncError {
    fn from(e: tokio::task::JoinError) -> Self {
        Self::StoreUnavailable(format!("blocking task failed: {e}"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classification_matches_redelivery_policy() {
        assert_eq!(
            SyncError::StoreUnavailable("x".into()).class(),
            ErrorClass::Retryable
        );
        assert_eq!(
            SyncError::RateLimited { retry_after: None }.class(),
            ErrorClass::Retryable
        );
        assert_eq!(
            SyncError::Transport("reset".into()).class(),
            ErrorClass::Retryable
        );
        assert_eq!(
            SyncError::Unauthorized("expired".into()).class(),
            ErrorClass::NonRetryable
        );
        assert_eq!(
            SyncError::MalformedRecord("item 3".into()).class(),
            ErrorClass::NonRetryable
        );
        assert_eq!(classify("SOMETHING_NEW"), ErrorClass::Retryable);
    }

    #[test]
    fn diagnostic_carries_code_and_hint() {
        let e = SyncError::RateLimited {
            retry_after: Some(Duration::from_secs(7)),
        };
        assert_eq!(
            e.diagnostic(),
            "RATE_LIMIT: rate limited by source (retry after 7s)"
        );
    }
}
