//! Bounded worker pools with a caller-runs rejection policy: work beyond
//! the queue depth runs inline on the caller rather than being dropped,
//! mirroring a `ThreadPoolExecutor`-style core/max/queue executor.

use std::future::Future;
use std::sync::Arc;

use tokio::sync::Semaphore;

pub struct BoundedPool {
    running: Arc<Semaphore>,
    admission: Arc<Semaphore>,
}

impl BoundedPool {
    /// `max_size` bounds concurrently-running tasks; `queue_depth` is the
    /// additional backlog admitted before the pool starts running work
    /// on the caller instead.
    pub fn new(max_size: usize, queue_depth: usize) -> Self {
        Self {
            running: Arc::new(Semaphore::new(max_size)),
            admission: Arc::new(Semaphore::new(max_size + queue_depth)),
        }
    }

    /// Runs `task`, respecting the pool's bound. If the pool (running +
    /// queued) is saturated, `task` runs immediately on the caller.
    pub async fn run<F>(&self, task: F) -> F::Output
    where
        F: Future,
    {
        match Arc::clone(&self.admission).try_acquire_owned() {
            Ok(_admission_permit) => {
                let _run_permit = Arc::clone(&self.running)
                    .acquire_owned()
                    .await
                    .expect("pool semaphore is never closed");
                task.await
            }
            Err(_) => {
                tracing::warn!("worker pool saturated, running task on the caller");
                task.await
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[tokio::test]
    async fn runs_tasks_up_to_and_beyond_capacity() {
        let pool = BoundedPool::new(2, 1);
        let counter = Arc::new(AtomicUsize::new(0));

        for _ in 0..5 {
            let counter = counter.clone();
            pool.run(async move {
                counter.fetch_add(1, Ordering::SeqCst);
            })
            .await;
        }

        assert_eq!(counter.load(Ordering::SeqCst), 5);
    }
}
