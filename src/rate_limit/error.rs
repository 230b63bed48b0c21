//! Rate Limit Error Types
//!
//! Admission-layer errors synthesized by the limiter, kept distinct from
//! whatever the submitted task itself returns.

use std::time::Duration;

/// Errors produced by the limiter itself (never by the submitted task)
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum LimiterError {
    /// The limiter has been cleaned up and admits no further work
    #[error("Limiter is closed")]
    Closed,

    /// The task waited in the queue longer than the configured max delay
    #[error("Task was not admitted within {0:?}")]
    Timeout(Duration),

    /// The task panicked or was cancelled by the runtime before producing output
    #[error("Task aborted before completion")]
    Aborted,
}

impl LimiterError {
    /// Whether resubmitting the same task may succeed
    pub fn is_retriable(&self) -> bool {
        matches!(self, LimiterError::Timeout(_))
    }
}

/// Errors found while validating or loading a [`Quota`](super::Quota)
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum QuotaError {
    /// Concurrency limit must allow at least one operation
    #[error("Invalid concurrency: {0} (must be at least 1)")]
    InvalidConcurrency(u32),

    /// Rate limit must allow at least one operation per interval
    #[error("Invalid rate: {0} (must be at least 1)")]
    InvalidRate(u32),

    /// Interval must be a positive number of milliseconds
    #[error("Invalid interval: {0}ms (must be at least 1)")]
    InvalidInterval(u64),

    /// `rate` and `interval` must be configured together
    #[error("Rate and interval must be set together")]
    MissingInterval,

    /// Neither concurrency nor rate is limited
    #[error("Quota sets neither concurrency nor rate")]
    Unbounded,

    /// An environment variable could not be parsed
    #[error("Invalid value for {var}: {value:?}")]
    InvalidEnv { var: String, value: String },
}
