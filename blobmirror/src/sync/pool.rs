use std::fmt::Display;
use std::future::Future;

use tokio::task::{JoinError, JoinSet};
use tracing::{debug, warn};

use super::queue::WorkQueue;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PoolReport {
    pub completed: u64,
    pub failed: u64,
    pub panicked: u64,
    pub peak_in_flight: usize,
}

/// Runs queued jobs as spawned tasks with a hard cap on how many are in
/// flight. A job's error or panic is logged and counted; it never stops the
/// pool or its sibling jobs.
#[derive(Debug, Clone, Copy)]
pub struct WorkerPool {
    max_in_flight: usize,
}

impl WorkerPool {
    pub fn new(max_in_flight: usize) -> Self {
        Self {
            max_in_flight: max_in_flight.max(1),
        }
    }

    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight
    }

    /// Pulls from `queue` until it is drained, then waits for every spawned
    /// job to finish.
    pub async fn run<T, F, Fut, E>(&self, queue: &WorkQueue<T>, handler: F) -> PoolReport
    where
        F: Fn(T) -> Fut,
        Fut: Future<Output = Result<(), E>> + Send + 'static,
        E: Display + Send + 'static,
    {
        let mut report = PoolReport::default();
        let mut in_flight = JoinSet::new();

        while let Some(job) = queue.pop().await {
            while in_flight.len() >= self.max_in_flight {
                match in_flight.join_next().await {
                    Some(result) => reap(result, &mut report),
                    None => break,
                }
            }
            in_flight.spawn(handler(job));
            report.peak_in_flight = report.peak_in_flight.max(in_flight.len());
        }

        while let Some(result) = in_flight.join_next().await {
            reap(result, &mut report);
        }
        debug!(
            completed = report.completed,
            failed = report.failed,
            panicked = report.panicked,
            "worker pool drained"
        );
        report
    }
}

fn reap<E: Display>(result: Result<Result<(), E>, JoinError>, report: &mut PoolReport) {
    match result {
        Ok(Ok(())) => report.completed += 1,
        Ok(Err(err)) => {
            report.failed += 1;
            warn!(error = %err, "job failed");
        }
        Err(err) if err.is_panic() => {
            report.panicked += 1;
            warn!(error = %err, "job panicked");
        }
        Err(err) => {
            report.failed += 1;
            warn!(error = %err, "job was cancelled");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;
    use tokio::sync::Semaphore;

    #[tokio::test]
    async fn never_exceeds_max_in_flight() {
        let queue = Arc::new(WorkQueue::new());
        for i in 0..10u32 {
            queue.add(i).unwrap();
        }
        queue.complete().unwrap();

        let gate = Arc::new(Semaphore::new(0));
        let running = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));

        let pool = WorkerPool::new(3);
        let run = {
            let queue = Arc::clone(&queue);
            let gate = Arc::clone(&gate);
            let running = Arc::clone(&running);
            let peak = Arc::clone(&peak);
            tokio::spawn(async move {
                pool.run(&*queue, move |_job| {
                    let gate = Arc::clone(&gate);
                    let running = Arc::clone(&running);
                    let peak = Arc::clone(&peak);
                    async move {
                        let now = running.fetch_add(1, Ordering::SeqCst) + 1;
                        peak.fetch_max(now, Ordering::SeqCst);
                        let permit = gate.acquire().await.map_err(|err| err.to_string())?;
                        permit.forget();
                        running.fetch_sub(1, Ordering::SeqCst);
                        Ok::<(), String>(())
                    }
                })
                .await
            })
        };

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(running.load(Ordering::SeqCst), 3);
        gate.add_permits(10);

        let report = run.await.unwrap();
        assert_eq!(report.completed, 10);
        assert_eq!(report.peak_in_flight, 3);
        assert_eq!(peak.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn failures_and_panics_are_isolated() {
        let queue = WorkQueue::new();
        for i in 0..6u32 {
            queue.add(i).unwrap();
        }
        queue.complete().unwrap();

        let report = WorkerPool::new(2)
            .run(&queue, |job| async move {
                match job % 3 {
                    0 => Ok(()),
                    1 => Err(format!("job {job} failed")),
                    _ => panic!("job {job} panicked"),
                }
            })
            .await;

        assert_eq!(report.completed, 2);
        assert_eq!(report.failed, 2);
        assert_eq!(report.panicked, 2);
    }

    #[tokio::test]
    async fn empty_completed_queue_returns_immediately() {
        let queue = WorkQueue::<u32>::new();
        queue.complete().unwrap();
        let report = WorkerPool::new(4)
            .run(&queue, |_| async { Ok::<(), String>(()) })
            .await;
        assert_eq!(report, PoolReport::default());
    }
}
