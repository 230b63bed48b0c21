//! Admission Limiter
//!
//! Callers submit asynchronous tasks; the limiter admits them as fast as its
//! [`QuotaManager`] allows and queues the rest in submission order.
//!
//! Admission is re-checked whenever it might have changed: after a task is
//! queued, after an admitted task finishes, after a queued task is abandoned,
//! and on a fallback poll. The poll only runs while work is queued and none of
//! this limiter's own tasks is active, because then no completion will
//! trigger a re-check: only elapsed time (rate windows) or work finishing on
//! another limiter sharing the manager can return capacity.

use serde::{Deserialize, Serialize};
use std::future::Future;
use std::sync::{Arc, Mutex, Weak};
use std::time::Duration;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio::time::{sleep, Instant};
use tracing::{debug, info, warn};

use super::error::{LimiterError, QuotaError};
use super::lock;
use super::manager::{manager_for, QuotaManager};
use super::queue::{Dispatch, PendingQueue, QueuedTask};
use super::quota::{millis, Quota};
use crate::metrics;

/// Delay before re-checking admission when work is queued but nothing is active
pub const FALLBACK_POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Throttles asynchronous tasks to a quota
///
/// Cloning a `Limiter` yields another handle to the same queue and manager.
#[derive(Debug, Clone)]
pub struct Limiter {
    shared: Arc<Shared>,
}

#[derive(Debug)]
struct Shared {
    manager: Arc<dyn QuotaManager>,
    max_delay: Duration,
    state: Mutex<State>,
}

#[derive(Debug, Default)]
struct State {
    queue: PendingQueue,
    next_id: u64,
    /// Tasks admitted by this limiter that have not finished
    in_flight: usize,
    /// The single outstanding fallback poll, if armed
    fallback: Option<JoinHandle<()>>,
    closed: bool,
}

/// Proof of admission for one running task
///
/// Releasing it (or dropping it, e.g. when the task panics) ends the
/// operation on the quota manager exactly once.
#[derive(Debug)]
pub(crate) struct Permit {
    shared: Arc<Shared>,
    released: bool,
}

/// A snapshot of the state of a [`Limiter`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LimiterStats {
    /// Admitted tasks that have not finished
    pub active: usize,

    /// Tasks waiting for admission
    pub queued: usize,

    /// Whether the limiter has been cleaned up
    pub closed: bool,

    /// Maximum queue wait in milliseconds (0 = no deadline)
    pub max_delay_ms: u64,
}

impl Limiter {
    /// Create a limiter for a quota
    ///
    /// Uses a sliding-window rate manager when the quota sets a rate, and a
    /// concurrency-only manager otherwise.
    pub fn new(quota: Quota) -> Result<Self, QuotaError> {
        quota.validate()?;
        Ok(Self::with_manager(manager_for(&quota)))
    }

    /// Create a limiter around an existing quota manager
    pub fn with_manager(manager: Arc<dyn QuotaManager>) -> Self {
        let max_delay = manager.max_delay();
        Self {
            shared: Arc::new(Shared {
                manager,
                max_delay,
                state: Mutex::new(State::default()),
            }),
        }
    }

    /// Submit a task for admission
    ///
    /// The task is queued immediately, so tasks are admitted in the order of
    /// `submit` calls. The returned future resolves with the task's output
    /// once it has run, or with a [`LimiterError`] if the limiter is closed,
    /// the task waited longer than the quota's max delay, or the task panicked.
    /// Dropping the returned future does not cancel the task.
    ///
    /// # Panics
    ///
    /// Must be called from within a Tokio runtime.
    pub fn submit<F, Fut, T>(
        &self,
        task: F,
    ) -> impl Future<Output = Result<T, LimiterError>> + Send + 'static
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = T> + Send + 'static,
        T: Send + 'static,
    {
        metrics::TASKS_SUBMITTED_TOTAL.inc();

        let (tx, rx) = oneshot::channel();
        self.shared.enqueue(task, tx);

        async move { rx.await.unwrap_or(Err(LimiterError::Aborted)) }
    }

    /// Close the limiter
    ///
    /// Closes the quota manager, rejects every queued task with
    /// [`LimiterError::Closed`] and refuses later submissions. Tasks already
    /// running are left to finish. Calling this more than once has no
    /// further effect.
    pub async fn cleanup(&self) {
        self.shared.close();
    }

    /// Whether [`cleanup`](Self::cleanup) has been called
    pub fn is_closed(&self) -> bool {
        lock(&self.shared.state).closed
    }

    /// The quota manager deciding admission
    pub fn manager(&self) -> &Arc<dyn QuotaManager> {
        &self.shared.manager
    }

    /// The current state of the limiter
    pub fn stats(&self) -> LimiterStats {
        let state = lock(&self.shared.state);
        LimiterStats {
            active: state.in_flight,
            queued: state.queue.len(),
            closed: state.closed,
            max_delay_ms: millis(self.shared.max_delay),
        }
    }
}

impl Shared {
    fn enqueue<F, Fut, T>(self: &Arc<Self>, task: F, tx: oneshot::Sender<Result<T, LimiterError>>)
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = T> + Send + 'static,
        T: Send + 'static,
    {
        let mut state = lock(&self.state);
        if state.closed {
            drop(state);
            debug!("Rejecting task submitted to closed limiter");
            metrics::TASKS_REJECTED_CLOSED_TOTAL.inc();
            let _ = tx.send(Err(LimiterError::Closed));
            return;
        }

        let id = state.next_id;
        state.next_id += 1;

        let enqueued_at = Instant::now();
        let mut queued = QueuedTask::new(id, move |dispatch| match dispatch {
            Dispatch::Start(permit) => {
                metrics::QUEUE_WAIT_SECONDS.observe(enqueued_at.elapsed().as_secs_f64());
                tokio::spawn(async move {
                    let output = task().await;
                    let shared = permit.release();
                    let _ = tx.send(Ok(output));
                    shared.next();
                });
            }
            Dispatch::Reject(error) => {
                let _ = tx.send(Err(error));
            }
        });

        if !self.max_delay.is_zero() {
            queued.set_deadline(self.arm_deadline(id));
        }

        state.queue.push_back(queued);
        metrics::TASKS_QUEUED.inc();
        debug!(task_id = id, queued = state.queue.len(), "Task queued");
        drop(state);

        self.next();
    }

    /// Admit queued tasks while the manager allows it
    fn next(self: &Arc<Self>) {
        let mut admitted = Vec::new();
        {
            let mut state = lock(&self.state);

            while !state.closed && !state.queue.is_empty() && self.manager.start() {
                match state.queue.pop_front() {
                    Some(task) => {
                        state.in_flight += 1;
                        admitted.push((task, Permit::new(Arc::clone(self))));
                    }
                    None => {
                        self.manager.end();
                        break;
                    }
                }
            }

            // The manager may be shared, so its active count can include work
            // whose completion never re-runs this loop
            if !state.closed
                && !state.queue.is_empty()
                && state.in_flight == 0
                && state.fallback.is_none()
            {
                debug!(
                    queued = state.queue.len(),
                    "Nothing active, polling admission in {:?}", FALLBACK_POLL_INTERVAL
                );
                state.fallback = Some(self.arm_fallback());
            }
        }

        for (task, permit) in admitted {
            debug!(task_id = task.id(), "Task admitted");
            metrics::TASKS_QUEUED.dec();
            metrics::TASKS_ADMITTED_TOTAL.inc();
            metrics::TASKS_ACTIVE.inc();
            task.start(permit);
        }
    }

    fn arm_fallback(self: &Arc<Self>) -> JoinHandle<()> {
        let shared = Arc::downgrade(self);
        tokio::spawn(async move {
            sleep(FALLBACK_POLL_INTERVAL).await;
            if let Some(shared) = shared.upgrade() {
                lock(&shared.state).fallback = None;
                shared.next();
            }
        })
    }

    fn arm_deadline(self: &Arc<Self>, id: u64) -> JoinHandle<()> {
        let shared: Weak<Self> = Arc::downgrade(self);
        let max_delay = self.max_delay;
        tokio::spawn(async move {
            sleep(max_delay).await;
            if let Some(shared) = shared.upgrade() {
                shared.expire(id);
            }
        })
    }

    /// Abandon a task that is still waiting once its deadline has passed
    fn expire(self: &Arc<Self>, id: u64) {
        let Some(task) = lock(&self.state).queue.remove(id) else {
            // Already admitted or rejected
            return;
        };

        warn!(
            task_id = id,
            max_delay_ms = millis(self.max_delay),
            "Task not admitted before its deadline, abandoning"
        );
        metrics::TASKS_QUEUED.dec();
        metrics::TASKS_TIMED_OUT_TOTAL.inc();
        task.expire(LimiterError::Timeout(self.max_delay));

        self.next();
    }

    fn close(&self) {
        let (queued, fallback) = {
            let mut state = lock(&self.state);
            if state.closed {
                return;
            }
            state.closed = true;
            (state.queue.drain(), state.fallback.take())
        };

        self.manager.close();
        if let Some(fallback) = fallback {
            fallback.abort();
        }

        info!(
            rejected = queued.len(),
            active = self.manager.active_count(),
            "Limiter closed"
        );

        metrics::TASKS_QUEUED.sub(queued.len() as i64);
        for task in queued {
            metrics::TASKS_REJECTED_CLOSED_TOTAL.inc();
            task.reject(LimiterError::Closed);
        }
    }
}

impl Drop for Shared {
    fn drop(&mut self) {
        let state = match self.state.get_mut() {
            Ok(state) => state,
            Err(poisoned) => poisoned.into_inner(),
        };
        metrics::TASKS_QUEUED.sub(state.queue.len() as i64);
        if let Some(fallback) = state.fallback.take() {
            fallback.abort();
        }
    }
}

impl Permit {
    fn new(shared: Arc<Shared>) -> Self {
        Self {
            shared,
            released: false,
        }
    }

    /// End the operation on the manager, handing back the limiter so the
    /// caller can settle its task before re-running admission
    fn release(mut self) -> Arc<Shared> {
        self.released = true;
        self.end();
        Arc::clone(&self.shared)
    }

    fn end(&self) {
        {
            let mut state = lock(&self.shared.state);
            state.in_flight = state.in_flight.saturating_sub(1);
        }
        self.shared.manager.end();
        metrics::TASKS_ACTIVE.dec();
    }
}

impl Drop for Permit {
    fn drop(&mut self) {
        if self.released {
            return;
        }

        warn!("Task ended without producing output, releasing its slot");
        self.end();
        if tokio::runtime::Handle::try_current().is_ok() {
            self.shared.next();
        }
    }
}
