//! Admission Gate Library
//!
//! In-process admission control for asynchronous work: submit tasks to a
//! [`Limiter`] and they run only as fast as the configured [`Quota`] allows.
//!
//! ```no_run
//! use admission_gate::{Limiter, Quota};
//! use std::time::Duration;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let quota = Quota::rate(10, Duration::from_secs(1))
//!         .with_concurrency(2)
//!         .with_max_delay(Duration::from_secs(5));
//!     let limiter = Limiter::new(quota)?;
//!
//!     let body = limiter.submit(|| async { "response" }).await?;
//!     println!("{}", body);
//!
//!     limiter.cleanup().await;
//!     Ok(())
//! }
//! ```

pub mod metrics;
pub mod rate_limit;

pub use rate_limit::{Limiter, LimiterError, LimiterStats, Quota, QuotaError, QuotaManager};
