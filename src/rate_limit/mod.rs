//! Rate Limiting and Admission Control Module
//!
//! This module throttles asynchronous work to a configured quota. Tasks are
//! admitted as fast as the quota allows; the rest wait in a FIFO queue and
//! are released as capacity frees up.
//!
//! # Features
//!
//! - Concurrency limits and sliding-window rate limits
//! - FIFO admission with an optional per-task queue deadline
//! - Pluggable admission policy through the [`QuotaManager`] trait
//! - Clean shutdown that rejects queued work
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                          Limiter                             │
//! │   submit() ──► Pending Queue ──► next() ──► spawned task     │
//! │                     ▲              │             │           │
//! │        deadline ────┘     fallback poll      Permit::release │
//! ├─────────────────────────────────────────────────────────────┤
//! │                QuotaManager (start / end / close)            │
//! │     ConcurrencyQuotaManager      RateQuotaManager            │
//! └─────────────────────────────────────────────────────────────┘
//! ```

pub mod error;
pub mod limiter;
pub mod manager;
mod queue;
pub mod quota;

pub use error::{LimiterError, QuotaError};
pub use limiter::{Limiter, LimiterStats, FALLBACK_POLL_INTERVAL};
pub use manager::{manager_for, ConcurrencyQuotaManager, QuotaManager, RateQuotaManager};
pub use quota::Quota;

use std::sync::{Mutex, MutexGuard, PoisonError};

/// Lock a mutex, recovering the data if a panicking holder poisoned it
pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
