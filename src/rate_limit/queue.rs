// Pending-work queue
//
// Tasks waiting for admission, in submission order. Each entry owns the only
// handle able to settle its caller, so an entry is settled exactly once: it is
// either dispatched to run or rejected, and then it is gone.

use std::collections::VecDeque;
use std::fmt;
use tokio::task::JoinHandle;

use super::error::LimiterError;
use super::limiter::Permit;

/// What to do with a task leaving the queue
pub(crate) enum Dispatch {
    /// Admitted: run the task while holding the permit
    Start(Permit),
    /// Not admitted: settle the caller with this error
    Reject(LimiterError),
}

/// A task waiting for admission
pub(crate) struct QueuedTask {
    id: u64,
    dispatch: Box<dyn FnOnce(Dispatch) + Send>,
    deadline: Option<JoinHandle<()>>,
}

impl QueuedTask {
    pub(crate) fn new<F>(id: u64, dispatch: F) -> Self
    where
        F: FnOnce(Dispatch) + Send + 'static,
    {
        Self {
            id,
            dispatch: Box::new(dispatch),
            deadline: None,
        }
    }

    pub(crate) fn id(&self) -> u64 {
        self.id
    }

    /// Attach the timer that abandons this task if it waits too long
    pub(crate) fn set_deadline(&mut self, deadline: JoinHandle<()>) {
        self.deadline = Some(deadline);
    }

    /// Admit the task: cancel its deadline and start it
    pub(crate) fn start(self, permit: Permit) {
        self.settle(Dispatch::Start(permit));
    }

    /// Settle the caller without running the task
    pub(crate) fn reject(self, error: LimiterError) {
        self.settle(Dispatch::Reject(error));
    }

    /// Settle the caller once its deadline has fired
    ///
    /// Called from the deadline timer itself, so the timer is detached
    /// rather than aborted.
    pub(crate) fn expire(mut self, error: LimiterError) {
        self.deadline = None;
        (self.dispatch)(Dispatch::Reject(error));
    }

    fn settle(mut self, dispatch: Dispatch) {
        if let Some(deadline) = self.deadline.take() {
            deadline.abort();
        }
        (self.dispatch)(dispatch);
    }
}

impl fmt::Debug for QueuedTask {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("QueuedTask")
            .field("id", &self.id)
            .field("has_deadline", &self.deadline.is_some())
            .finish()
    }
}

/// FIFO of tasks awaiting admission
#[derive(Debug, Default)]
pub(crate) struct PendingQueue {
    tasks: VecDeque<QueuedTask>,
}

impl PendingQueue {
    /// Append a task at the tail
    pub(crate) fn push_back(&mut self, task: QueuedTask) {
        self.tasks.push_back(task);
    }

    /// Take the task at the head
    pub(crate) fn pop_front(&mut self) -> Option<QueuedTask> {
        self.tasks.pop_front()
    }

    /// Take a task out of the queue if it is still waiting
    pub(crate) fn remove(&mut self, id: u64) -> Option<QueuedTask> {
        let index = self.tasks.iter().position(|task| task.id == id)?;
        self.tasks.remove(index)
    }

    /// Take every waiting task, head first
    pub(crate) fn drain(&mut self) -> Vec<QueuedTask> {
        self.tasks.drain(..).collect()
    }

    pub(crate) fn len(&self) -> usize {
        self.tasks.len()
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    fn recording_task(id: u64, log: &Arc<Mutex<Vec<String>>>) -> QueuedTask {
        let log = Arc::clone(log);
        QueuedTask::new(id, move |dispatch| {
            let entry = match dispatch {
                Dispatch::Start(_) => format!("start-{}", id),
                Dispatch::Reject(err) => format!("reject-{}: {}", id, err),
            };
            log.lock().unwrap().push(entry);
        })
    }

    #[test]
    fn test_queue_is_fifo() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let mut queue = PendingQueue::default();
        for id in 1..=3 {
            queue.push_back(recording_task(id, &log));
        }

        assert_eq!(queue.len(), 3);
        let ids: Vec<u64> = std::iter::from_fn(|| queue.pop_front())
            .map(|task| task.id())
            .collect();
        assert_eq!(ids, vec![1, 2, 3]);
        assert!(queue.is_empty());
    }

    #[test]
    fn test_remove_by_id() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let mut queue = PendingQueue::default();
        for id in 1..=3 {
            queue.push_back(recording_task(id, &log));
        }

        let removed = queue.remove(2).unwrap();
        assert_eq!(removed.id(), 2);
        assert!(queue.remove(2).is_none());
        assert_eq!(queue.pop_front().unwrap().id(), 1);
        assert_eq!(queue.pop_front().unwrap().id(), 3);
    }

    #[test]
    fn test_reject_settles_once() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let mut queue = PendingQueue::default();
        queue.push_back(recording_task(7, &log));
        queue.push_back(recording_task(8, &log));

        for task in queue.drain() {
            task.reject(LimiterError::Closed);
        }

        assert!(queue.is_empty());
        assert_eq!(
            *log.lock().unwrap(),
            vec![
                "reject-7: Limiter is closed".to_string(),
                "reject-8: Limiter is closed".to_string()
            ]
        );
    }

    #[tokio::test]
    async fn test_settle_aborts_deadline() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let mut task = recording_task(1, &log);

        let deadline = tokio::spawn(async {
            tokio::time::sleep(std::time::Duration::from_secs(3600)).await;
        });
        let abort = deadline.abort_handle();
        task.set_deadline(deadline);

        task.reject(LimiterError::Closed);
        for _ in 0..10 {
            if abort.is_finished() {
                break;
            }
            tokio::task::yield_now().await;
        }
        assert!(abort.is_finished());
        assert_eq!(log.lock().unwrap().len(), 1);
    }
}
