//! Quota Managers
//!
//! Stateful admission controllers built from a [`Quota`]. The limiter asks a
//! manager "may one more operation start now?" and tells it when an admitted
//! operation has ended.

use std::collections::VecDeque;
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::time::Instant;
use tracing::warn;

use super::lock;
use super::quota::Quota;

/// Admission policy consumed by the limiter
///
/// Implementations use interior mutability so one manager can be shared by
/// several limiters through an `Arc`.
pub trait QuotaManager: Send + Sync + fmt::Debug {
    /// Try to admit one operation
    ///
    /// Returns `true` and counts the operation as active if admitted. Returns
    /// `false` without changing any state otherwise, and always once closed.
    fn start(&self) -> bool;

    /// Mark one admitted operation as finished
    ///
    /// Must be called once per successful [`start`](Self::start). Extra calls
    /// never drive the active count below zero.
    fn end(&self);

    /// Number of admitted operations that have not ended yet
    fn active_count(&self) -> usize;

    /// Maximum time a task may wait for admission (`ZERO` = no deadline)
    fn max_delay(&self) -> Duration;

    /// Stop admitting work permanently and release any held resources
    fn close(&self);

    /// Whether [`close`](Self::close) has been called
    fn is_closed(&self) -> bool;
}

/// Build the manager matching a quota: sliding-window rate limiting when a
/// rate is configured, plain concurrency limiting otherwise
pub fn manager_for(quota: &Quota) -> Arc<dyn QuotaManager> {
    if quota.rate.is_some() {
        Arc::new(RateQuotaManager::new(*quota))
    } else {
        Arc::new(ConcurrencyQuotaManager::new(*quota))
    }
}

fn decrement(active: &AtomicUsize) {
    if active
        .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
        .is_err()
    {
        warn!("Quota manager end() called with no active operations");
    }
}

/// Limits only the number of concurrently active operations
#[derive(Debug)]
pub struct ConcurrencyQuotaManager {
    quota: Quota,
    active: AtomicUsize,
    closed: AtomicBool,
}

impl ConcurrencyQuotaManager {
    /// Create a manager for the quota's concurrency limit (`None` = unlimited)
    pub fn new(quota: Quota) -> Self {
        Self {
            quota,
            active: AtomicUsize::new(0),
            closed: AtomicBool::new(false),
        }
    }

    /// The quota this manager enforces
    pub fn quota(&self) -> &Quota {
        &self.quota
    }
}

impl QuotaManager for ConcurrencyQuotaManager {
    fn start(&self) -> bool {
        if self.closed.load(Ordering::SeqCst) {
            return false;
        }

        let limit = self.quota.concurrency.map_or(usize::MAX, |c| c as usize);
        let mut current = self.active.load(Ordering::SeqCst);

        loop {
            if current >= limit {
                return false;
            }

            match self.active.compare_exchange_weak(
                current,
                current + 1,
                Ordering::SeqCst,
                Ordering::SeqCst,
            ) {
                Ok(_) => return true,
                Err(actual) => {
                    current = actual;
                }
            }
        }
    }

    fn end(&self) {
        decrement(&self.active);
    }

    fn active_count(&self) -> usize {
        self.active.load(Ordering::SeqCst)
    }

    fn max_delay(&self) -> Duration {
        self.quota.max_delay()
    }

    fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

#[derive(Debug, Default)]
struct Window {
    active: usize,
    /// Start times of admitted operations within the current interval
    starts: VecDeque<Instant>,
    closed: bool,
}

/// Limits how many operations start per sliding interval, and optionally how
/// many run at once
///
/// Capacity comes back purely through elapsed time, so the limiter's
/// fallback poll is what notices it when nothing is active.
pub struct RateQuotaManager {
    quota: Quota,
    window: Mutex<Window>,
}

impl RateQuotaManager {
    /// Create a manager for the quota's rate and concurrency limits
    pub fn new(quota: Quota) -> Self {
        Self {
            quota,
            window: Mutex::new(Window::default()),
        }
    }

    /// The quota this manager enforces
    pub fn quota(&self) -> &Quota {
        &self.quota
    }

    /// Starts recorded within the current interval
    pub fn starts_in_window(&self) -> usize {
        let mut window = lock(&self.window);
        self.prune(&mut window, Instant::now());
        window.starts.len()
    }

    fn prune(&self, window: &mut Window, now: Instant) {
        let Some(interval) = self.quota.interval() else {
            window.starts.clear();
            return;
        };

        while let Some(&oldest) = window.starts.front() {
            if now.duration_since(oldest) >= interval {
                window.starts.pop_front();
            } else {
                break;
            }
        }
    }
}

impl fmt::Debug for RateQuotaManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let window = lock(&self.window);
        f.debug_struct("RateQuotaManager")
            .field("quota", &self.quota)
            .field("active", &window.active)
            .field("starts", &window.starts.len())
            .field("closed", &window.closed)
            .finish()
    }
}

impl QuotaManager for RateQuotaManager {
    fn start(&self) -> bool {
        let mut window = lock(&self.window);
        if window.closed {
            return false;
        }

        if let Some(concurrency) = self.quota.concurrency {
            if window.active >= concurrency as usize {
                return false;
            }
        }

        let now = Instant::now();
        self.prune(&mut window, now);

        if let Some(rate) = self.quota.rate {
            if window.starts.len() >= rate as usize {
                return false;
            }
            window.starts.push_back(now);
        }

        window.active += 1;
        true
    }

    fn end(&self) {
        let mut window = lock(&self.window);
        match window.active.checked_sub(1) {
            Some(active) => window.active = active,
            None => warn!("Quota manager end() called with no active operations"),
        }
    }

    fn active_count(&self) -> usize {
        lock(&self.window).active
    }

    fn max_delay(&self) -> Duration {
        self.quota.max_delay()
    }

    fn close(&self) {
        let mut window = lock(&self.window);
        window.closed = true;
        window.starts.clear();
    }

    fn is_closed(&self) -> bool {
        lock(&self.window).closed
    }
}
