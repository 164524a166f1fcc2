use std::collections::VecDeque;
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use tokio::sync::{oneshot, Semaphore};
use tracing::debug;

use crate::error::{ClientError, ClientResult};

/// Scheduling class of a submitted task.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Priority {
    /// Background work: directory refreshes, read-ahead, async deletes.
    Normal,
    /// Work a caller is blocked on.
    High,
}

/// Configuration for the task pool.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct ExecutorConfig {
    /// Number of concurrent workers.
    pub workers: usize,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self { workers: 5 }
    }
}

type Job = Pin<Box<dyn Future<Output = ()> + Send + 'static>>;

struct Shared {
    high: Mutex<VecDeque<Job>>,
    normal: Mutex<VecDeque<Job>>,
    items: Semaphore,
    shutdown: AtomicBool,
}

/// Future returned by [`Executor::submit`]; resolves to the task's
/// output once a worker has run it.
pub struct TaskFuture<T> {
    rx: oneshot::Receiver<T>,
}

impl<T> TaskFuture<T> {
    /// Await the task result. Fails with `Cancelled` when the pool was
    /// shut down before the task ran.
    pub async fn join(self) -> ClientResult<T> {
        self.rx.await.map_err(|_| ClientError::Cancelled {
            context: "task pool shut down before the task ran".to_string(),
        })
    }
}

/// Fixed-size task pool draining a two-level priority queue.
///
/// High-priority jobs always run before normal ones; within one level
/// submission order is preserved. Must be created inside a tokio
/// runtime; workers are tokio tasks.
pub struct Executor {
    shared: Arc<Shared>,
    workers: Mutex<Vec<tokio::task::JoinHandle<()>>>,
}

impl Executor {
    /// Spawn the worker tasks.
    pub fn new(config: ExecutorConfig) -> Arc<Executor> {
        let shared = Arc::new(Shared {
            high: Mutex::new(VecDeque::new()),
            normal: Mutex::new(VecDeque::new()),
            items: Semaphore::new(0),
            shutdown: AtomicBool::new(false),
        });
        let mut workers = Vec::with_capacity(config.workers.max(1));
        for worker in 0..config.workers.max(1) {
            let shared = Arc::clone(&shared);
            workers.push(tokio::spawn(async move {
                loop {
                    match shared.items.acquire().await {
                        Ok(permit) => permit.forget(),
                        Err(_) => break,
                    }
                    if shared.shutdown.load(Ordering::SeqCst) {
                        break;
                    }
                    let job = shared
                        .high
                        .lock()
                        .unwrap()
                        .pop_front()
                        .or_else(|| shared.normal.lock().unwrap().pop_front());
                    if let Some(job) = job {
                        job.await;
                    }
                }
                debug!(worker, "executor worker stopped");
            }));
        }
        Arc::new(Executor {
            shared,
            workers: Mutex::new(workers),
        })
    }

    /// Queue a future and get a handle to its eventual output.
    pub fn submit<T, F>(&self, priority: Priority, future: F) -> TaskFuture<T>
    where
        T: Send + 'static,
        F: Future<Output = T> + Send + 'static,
    {
        let (tx, rx) = oneshot::channel();
        let job: Job = Box::pin(async move {
            let _ = tx.send(future.await);
        });
        match priority {
            Priority::High => self.shared.high.lock().unwrap().push_back(job),
            Priority::Normal => self.shared.normal.lock().unwrap().push_back(job),
        }
        self.shared.items.add_permits(1);
        TaskFuture { rx }
    }

    /// Jobs queued but not yet picked up.
    pub fn queue_depth(&self) -> usize {
        self.shared.high.lock().unwrap().len() + self.shared.normal.lock().unwrap().len()
    }

    /// Stop the workers; queued jobs that never ran resolve their
    /// futures as cancelled.
    pub fn shutdown(&self) {
        self.shared.shutdown.store(true, Ordering::SeqCst);
        self.shared.items.close();
        self.shared.high.lock().unwrap().clear();
        self.shared.normal.lock().unwrap().clear();
        for handle in self.workers.lock().unwrap().drain(..) {
            handle.abort();
        }
    }
}

impl Drop for Executor {
    fn drop(&mut self) {
        self.shutdown();
    }
}
