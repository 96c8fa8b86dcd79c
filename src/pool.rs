//! Bounded-concurrency task pool.
//!
//! Submissions go onto a FIFO queue. A dispatcher task pops them in order,
//! waits for a permit from a semaphore sized to the pool bound, and spawns the
//! unit of work holding that permit. A task's error or panic is logged here and
//! never reaches the submitter or its siblings.

use futures::FutureExt;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::pin::Pin;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::{Semaphore, mpsc, oneshot};

use crate::error::Result;

type BoxedTask = Pin<Box<dyn Future<Output = Result<()>> + Send + 'static>>;

/// A queued unit of work and the signal fired when it reaches a terminal state
struct QueuedTask {
    id: u64,
    task: BoxedTask,
    done: oneshot::Sender<()>,
}

/// Fire-and-forget executor running at most `size` tasks at once
///
/// Must be created inside a Tokio runtime; the dispatcher runs until the pool is dropped
/// and the queue has drained.
pub struct ConcurrencyPool {
    size: usize,
    queue_tx: mpsc::UnboundedSender<QueuedTask>,
    /// Completion signals of tasks not yet covered by a `join()`
    completions: Mutex<Vec<oneshot::Receiver<()>>>,
    next_id: AtomicU64,
    active: Arc<AtomicUsize>,
    pending: Arc<AtomicUsize>,
}

impl ConcurrencyPool {
    /// Create a pool running at most `size` tasks concurrently (a size of 0 is raised to 1)
    pub fn new(size: usize) -> Self {
        let size = size.max(1);
        let (queue_tx, queue_rx) = mpsc::unbounded_channel();
        let active = Arc::new(AtomicUsize::new(0));
        let pending = Arc::new(AtomicUsize::new(0));

        tokio::spawn(dispatch(
            queue_rx,
            Arc::new(Semaphore::new(size)),
            Arc::clone(&active),
            Arc::clone(&pending),
        ));

        Self {
            size,
            queue_tx,
            completions: Mutex::new(Vec::new()),
            next_id: AtomicU64::new(0),
            active,
            pending,
        }
    }

    /// The concurrency bound
    pub fn size(&self) -> usize {
        self.size
    }

    /// Tasks currently executing
    pub fn active(&self) -> usize {
        self.active.load(Ordering::SeqCst)
    }

    /// Tasks queued and waiting for a slot
    pub fn pending(&self) -> usize {
        self.pending.load(Ordering::SeqCst)
    }

    /// Queue a unit of work. It starts once every earlier submission has started
    /// and a slot is free.
    pub fn submit<F>(&self, task: F)
    where
        F: Future<Output = Result<()>> + Send + 'static,
    {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (done, done_rx) = oneshot::channel();

        self.pending.fetch_add(1, Ordering::SeqCst);
        let queued = QueuedTask {
            id,
            task: Box::pin(task),
            done,
        };
        if self.queue_tx.send(queued).is_err() {
            // Dispatcher gone (runtime shutting down); the dropped sender marks the task terminal
            self.pending.fetch_sub(1, Ordering::SeqCst);
            tracing::warn!(task_id = id, "pool dispatcher stopped, task dropped");
        }

        self.lock_completions().push(done_rx);
    }

    /// Wait until every task submitted before this call has finished.
    ///
    /// Tasks submitted while the join is in progress are left to a later join.
    pub async fn join(&self) {
        let waiting = std::mem::take(&mut *self.lock_completions());
        for done in waiting {
            // A dropped sender means the task ended without signalling (panic or shutdown)
            let _ = done.await;
        }
    }

    /// [`join`](Self::join) bounded by `timeout`; returns false if the deadline elapsed first.
    ///
    /// Unfinished tasks keep running; they are no longer awaited by this pool.
    pub async fn join_timeout(&self, timeout: Duration) -> bool {
        tokio::time::timeout(timeout, self.join()).await.is_ok()
    }

    fn lock_completions(&self) -> std::sync::MutexGuard<'_, Vec<oneshot::Receiver<()>>> {
        // A poisoned lock only means another thread panicked while pushing; the Vec is intact
        self.completions
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

/// Dispatcher loop: strict FIFO admission, one permit per running task
async fn dispatch(
    mut queue_rx: mpsc::UnboundedReceiver<QueuedTask>,
    limit: Arc<Semaphore>,
    active: Arc<AtomicUsize>,
    pending: Arc<AtomicUsize>,
) {
    while let Some(QueuedTask { id, task, done }) = queue_rx.recv().await {
        let permit = match Arc::clone(&limit).acquire_owned().await {
            Ok(p) => p,
            Err(_) => {
                // Semaphore closed, nothing more can run
                tracing::warn!(task_id = id, "pool semaphore closed, stopping dispatcher");
                break;
            }
        };
        pending.fetch_sub(1, Ordering::SeqCst);
        active.fetch_add(1, Ordering::SeqCst);

        let active = Arc::clone(&active);
        tokio::spawn(async move {
            let _permit = permit;
            match AssertUnwindSafe(task).catch_unwind().await {
                Ok(Ok(())) => {
                    tracing::trace!(task_id = id, "pool task finished");
                }
                Ok(Err(e)) => {
                    tracing::warn!(task_id = id, error = %e, "pool task failed");
                }
                Err(panic) => {
                    let msg = panic
                        .downcast_ref::<&str>()
                        .map(|s| s.to_string())
                        .or_else(|| panic.downcast_ref::<String>().cloned())
                        .unwrap_or_else(|| "unknown panic".to_string());
                    tracing::error!(task_id = id, panic = %msg, "pool task panicked");
                }
            }
            active.fetch_sub(1, Ordering::SeqCst);
            done.send(()).ok();
        });
    }
}
