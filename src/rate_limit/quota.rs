//! Quota Configuration
//!
//! An immutable description of the throttling policy: how many operations
//! may run at once, how many may start per interval, and how long a task may
//! wait in the queue before it is abandoned.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use std::time::Duration;

use super::error::QuotaError;

/// Environment variable names read by [`Quota::from_env`]
pub const ENV_CONCURRENCY: &str = "GATE_CONCURRENCY";
pub const ENV_RATE: &str = "GATE_RATE";
pub const ENV_INTERVAL_MS: &str = "GATE_INTERVAL_MS";
pub const ENV_MAX_DELAY_MS: &str = "GATE_MAX_DELAY_MS";

/// Throttling policy for a limiter
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Quota {
    /// Maximum number of operations running at the same time
    pub concurrency: Option<u32>,

    /// Maximum number of operations started per `interval_ms`
    pub rate: Option<u32>,

    /// Length of the rate window in milliseconds
    pub interval_ms: Option<u64>,

    /// Maximum time a task may wait in the queue (0 or unset = forever)
    pub max_delay_ms: Option<u64>,
}

impl Quota {
    /// A quota that only limits concurrency
    pub fn concurrency(limit: u32) -> Self {
        Self {
            concurrency: Some(limit),
            ..Self::default()
        }
    }

    /// A quota that only limits how many operations start per interval
    pub fn rate(limit: u32, interval: Duration) -> Self {
        Self {
            rate: Some(limit),
            interval_ms: Some(millis(interval)),
            ..Self::default()
        }
    }

    /// Also cap the number of concurrent operations
    pub fn with_concurrency(mut self, limit: u32) -> Self {
        self.concurrency = Some(limit);
        self
    }

    /// Abandon tasks that wait longer than `delay` to be admitted
    pub fn with_max_delay(mut self, delay: Duration) -> Self {
        self.max_delay_ms = Some(millis(delay));
        self
    }

    /// Rate window, if a rate limit is configured
    pub fn interval(&self) -> Option<Duration> {
        self.interval_ms.map(Duration::from_millis)
    }

    /// Maximum queue wait; `Duration::ZERO` means no deadline
    pub fn max_delay(&self) -> Duration {
        Duration::from_millis(self.max_delay_ms.unwrap_or(0))
    }

    /// Check that the numeric parameters describe a usable policy
    pub fn validate(&self) -> Result<(), QuotaError> {
        if let Some(concurrency) = self.concurrency {
            if concurrency == 0 {
                return Err(QuotaError::InvalidConcurrency(concurrency));
            }
        }

        match (self.rate, self.interval_ms) {
            (Some(0), _) => return Err(QuotaError::InvalidRate(0)),
            (_, Some(0)) => return Err(QuotaError::InvalidInterval(0)),
            (Some(_), None) | (None, Some(_)) => return Err(QuotaError::MissingInterval),
            _ => {}
        }

        if self.concurrency.is_none() && self.rate.is_none() {
            return Err(QuotaError::Unbounded);
        }

        Ok(())
    }

    /// Load a quota from environment variables
    ///
    /// Reads `GATE_CONCURRENCY`, `GATE_RATE`, `GATE_INTERVAL_MS` and
    /// `GATE_MAX_DELAY_MS`. Unset variables leave the field empty.
    pub fn from_env() -> Result<Self, QuotaError> {
        Self::from_lookup(|var| std::env::var(var).ok())
    }

    fn from_lookup<F>(lookup: F) -> Result<Self, QuotaError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let quota = Self {
            concurrency: parse_var(&lookup, ENV_CONCURRENCY)?,
            rate: parse_var(&lookup, ENV_RATE)?,
            interval_ms: parse_var(&lookup, ENV_INTERVAL_MS)?,
            max_delay_ms: parse_var(&lookup, ENV_MAX_DELAY_MS)?,
        };
        quota.validate()?;
        Ok(quota)
    }

    /// Load and validate a quota from a JSON file
    pub fn from_json_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();

        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read quota file from {:?}", path))?;

        let quota: Quota = serde_json::from_str(&content)
            .with_context(|| format!("Failed to parse quota file from {:?}", path))?;

        quota
            .validate()
            .with_context(|| format!("Invalid quota in {:?}", path))?;

        tracing::debug!(?quota, "Loaded quota from {:?}", path);
        Ok(quota)
    }
}

/// Whole milliseconds in `duration`, saturating at `u64::MAX`
pub(crate) fn millis(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}

fn parse_var<F, T>(lookup: &F, var: &str) -> Result<Option<T>, QuotaError>
where
    F: Fn(&str) -> Option<String>,
    T: std::str::FromStr,
{
    match lookup(var) {
        None => Ok(None),
        Some(value) => value
            .trim()
            .parse()
            .map(Some)
            .map_err(|_| QuotaError::InvalidEnv {
                var: var.to_string(),
                value,
            }),
    }
}
