use crate::error::{Result, SiftError};
use futures::future::join_all;
use serde::Serialize;
use std::{
    future::Future,
    pin::Pin,
    sync::{
        atomic::{AtomicU64, AtomicUsize, Ordering},
        Arc,
    },
    time::Instant,
};
use tokio::{
    sync::{mpsc, oneshot, Mutex},
    task::JoinHandle,
};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

pub type TaskFuture = Pin<Box<dyn Future<Output = Result<()>> + Send>>;

/// A unit of work: receives the pool's cancellation token and returns an
/// error on failure.
pub type Task = Box<dyn FnOnce(CancellationToken) -> TaskFuture + Send>;

#[derive(Debug, Default)]
struct PoolStats {
    submitted: AtomicU64,
    completed: AtomicU64,
    failed: AtomicU64,
    active: AtomicUsize,
    peak_active: AtomicUsize,
    busy_time_ms: AtomicU64,
}

/// Point-in-time view of the pool counters.
#[derive(Debug, Clone, Default, Serialize)]
pub struct PoolMetrics {
    pub submitted: u64,
    pub completed: u64,
    pub failed: u64,
    pub active_workers: usize,
    pub peak_workers: usize,
    pub total_execution_time_ms: u64,
    pub avg_execution_time_ms: f64,
}

/// Bounded shared task executor. All scanner tasks and intra-scanner
/// sub-queries run here; `submit` applies back-pressure once the input
/// queue fills.
pub struct WorkerPool {
    sender: Mutex<Option<mpsc::Sender<Task>>>,
    workers: Mutex<Vec<JoinHandle<()>>>,
    cancel: CancellationToken,
    stats: Arc<PoolStats>,
    size: usize,
}

impl WorkerPool {
    /// Default worker count assumes an I/O-bound workload.
    pub fn default_size() -> usize {
        num_cpus::get() * 8
    }

    pub fn new(size: usize) -> Self {
        let size = size.max(1);
        let (tx, rx) = mpsc::channel::<Task>(size * 2);
        let rx = Arc::new(Mutex::new(rx));
        let cancel = CancellationToken::new();
        let stats = Arc::new(PoolStats::default());

        let mut workers = Vec::with_capacity(size);
        for id in 0..size {
            let rx = rx.clone();
            let cancel = cancel.clone();
            let stats = stats.clone();
            workers.push(tokio::spawn(async move {
                loop {
                    let task = { rx.lock().await.recv().await };
                    let Some(task) = task else {
                        debug!(worker = id, "Worker pool input closed, worker exiting");
                        break;
                    };

                    let active = stats.active.fetch_add(1, Ordering::SeqCst) + 1;
                    stats.peak_active.fetch_max(active, Ordering::SeqCst);

                    let started = Instant::now();
                    let result = task(cancel.clone()).await;
                    stats
                        .busy_time_ms
                        .fetch_add(started.elapsed().as_millis() as u64, Ordering::SeqCst);
                    stats.active.fetch_sub(1, Ordering::SeqCst);

                    match result {
                        Ok(()) => {
                            stats.completed.fetch_add(1, Ordering::SeqCst);
                        }
                        Err(err) => {
                            stats.failed.fetch_add(1, Ordering::SeqCst);
                            stats.completed.fetch_add(1, Ordering::SeqCst);
                            debug!(worker = id, "Task returned error: {err}");
                        }
                    }
                }
            }));
        }

        info!(workers = size, "Worker pool started");
        Self {
            sender: Mutex::new(Some(tx)),
            workers: Mutex::new(workers),
            cancel,
            stats,
            size,
        }
    }

    pub fn size(&self) -> usize {
        self.size
    }

    /// Queue one task. Blocks only when the input channel is full; returns
    /// `PoolClosed` after `close`.
    pub async fn submit(&self, task: Task) -> Result<()> {
        let sender = {
            let guard = self.sender.lock().await;
            guard.clone().ok_or(SiftError::PoolClosed)?
        };
        self.stats.submitted.fetch_add(1, Ordering::SeqCst);
        sender
            .send(task)
            .await
            .map_err(|_| SiftError::PoolClosed)
    }

    /// Submit a batch and return once every task in it has finished.
    pub async fn execute_tasks(&self, tasks: Vec<Task>) -> Result<()> {
        let mut done = Vec::with_capacity(tasks.len());
        for task in tasks {
            let (tx, rx) = oneshot::channel::<()>();
            let wrapped: Task = Box::new(move |cancel| {
                Box::pin(async move {
                    let result = task(cancel).await;
                    let _ = tx.send(());
                    result
                })
            });
            self.submit(wrapped).await?;
            done.push(rx);
        }
        join_all(done).await;
        Ok(())
    }

    pub fn metrics(&self) -> PoolMetrics {
        let completed = self.stats.completed.load(Ordering::SeqCst);
        let busy = self.stats.busy_time_ms.load(Ordering::SeqCst);
        PoolMetrics {
            submitted: self.stats.submitted.load(Ordering::SeqCst),
            completed,
            failed: self.stats.failed.load(Ordering::SeqCst),
            active_workers: self.stats.active.load(Ordering::SeqCst),
            peak_workers: self.stats.peak_active.load(Ordering::SeqCst),
            total_execution_time_ms: busy,
            avg_execution_time_ms: if completed > 0 {
                busy as f64 / completed as f64
            } else {
                0.0
            },
        }
    }

    /// Graceful shutdown: refuse new submissions, signal cancellation to
    /// in-flight tasks, drain the queue, then return.
    pub async fn close(&self) {
        {
            let mut guard = self.sender.lock().await;
            guard.take();
        }
        self.cancel.cancel();

        let mut workers = self.workers.lock().await;
        for handle in workers.drain(..) {
            let _ = handle.await;
        }
        info!("Worker pool drained and closed");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn counting_task(counter: Arc<AtomicU64>) -> Task {
        Box::new(move |_cancel| {
            Box::pin(async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Ok(())
            })
        })
    }

    #[tokio::test]
    async fn execute_tasks_runs_every_task() {
        let pool = WorkerPool::new(4);
        let counter = Arc::new(AtomicU64::new(0));

        let tasks: Vec<Task> = (0..20).map(|_| counting_task(counter.clone())).collect();
        pool.execute_tasks(tasks).await.unwrap();

        assert_eq!(counter.load(Ordering::SeqCst), 20);
        let metrics = pool.metrics();
        assert_eq!(metrics.submitted, 20);
        assert_eq!(metrics.completed, 20);
        assert_eq!(metrics.failed, 0);
        assert!(metrics.peak_workers >= 1);
        pool.close().await;
    }

    #[tokio::test]
    async fn failed_tasks_are_counted_not_retried() {
        let pool = WorkerPool::new(2);
        let attempts = Arc::new(AtomicU64::new(0));

        let attempts_clone = attempts.clone();
        let failing: Task = Box::new(move |_| {
            Box::pin(async move {
                attempts_clone.fetch_add(1, Ordering::SeqCst);
                Err(SiftError::Provider("boom".to_string()))
            })
        });
        pool.execute_tasks(vec![failing]).await.unwrap();

        assert_eq!(attempts.load(Ordering::SeqCst), 1);
        let metrics = pool.metrics();
        assert_eq!(metrics.failed, 1);
        pool.close().await;
    }

    #[tokio::test]
    async fn submit_after_close_is_refused() {
        let pool = WorkerPool::new(1);
        pool.close().await;

        let counter = Arc::new(AtomicU64::new(0));
        let err = pool.submit(counting_task(counter)).await.unwrap_err();
        assert!(matches!(err, SiftError::PoolClosed));
    }

    #[tokio::test]
    async fn close_signals_cancellation_to_in_flight_tasks() {
        let pool = WorkerPool::new(1);
        let observed = Arc::new(AtomicU64::new(0));

        let observed_clone = observed.clone();
        let task: Task = Box::new(move |cancel| {
            Box::pin(async move {
                tokio::select! {
                    _ = cancel.cancelled() => {
                        observed_clone.fetch_add(1, Ordering::SeqCst);
                        Ok(())
                    }
                    _ = tokio::time::sleep(Duration::from_secs(30)) => Ok(()),
                }
            })
        });
        pool.submit(task).await.unwrap();
        tokio::time::sleep(Duration::from_millis(20)).await;

        pool.close().await;
        assert_eq!(observed.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn concurrent_tasks_raise_peak_workers() {
        let pool = WorkerPool::new(4);
        let tasks: Vec<Task> = (0..8)
            .map(|_| {
                let task: Task = Box::new(|_| {
                    Box::pin(async {
                        tokio::time::sleep(Duration::from_millis(30)).await;
                        Ok(())
                    })
                });
                task
            })
            .collect();
        pool.execute_tasks(tasks).await.unwrap();

        assert!(pool.metrics().peak_workers >= 2);
        pool.close().await;
    }
}
