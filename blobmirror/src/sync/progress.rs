use std::sync::Arc;
use std::time::Duration;

use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::info;

use super::queue::WorkQueue;
use super::stats::{ActivityLog, RunStats, format_count};

const MARK_INTERVAL: Duration = Duration::from_secs(30);
const FULL_STATS_INTERVAL: Duration = Duration::from_secs(120);

/// Periodic progress lines while a run is in flight: a short `--MARK--` line
/// and, less often, the full statistics.
#[derive(Debug, Clone, Copy)]
pub struct ProgressReporter {
    mark_every: Duration,
    full_every: Duration,
}

impl Default for ProgressReporter {
    fn default() -> Self {
        Self::new(MARK_INTERVAL, FULL_STATS_INTERVAL)
    }
}

impl ProgressReporter {
    pub fn new(mark_every: Duration, full_every: Duration) -> Self {
        Self {
            mark_every: mark_every.max(Duration::from_millis(1)),
            full_every,
        }
    }

    pub fn spawn<T>(
        self,
        stats: Arc<RunStats>,
        activity: Arc<ActivityLog>,
        queue: Arc<WorkQueue<T>>,
    ) -> ProgressHandle
    where
        T: Send + 'static,
    {
        let (stop_tx, mut stop_rx) = oneshot::channel::<()>();
        let task = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(self.mark_every);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            ticker.tick().await;
            let mut last_full = Instant::now();
            loop {
                tokio::select! {
                    _ = &mut stop_rx => break,
                    _ = ticker.tick() => {
                        if last_full.elapsed() >= self.full_every {
                            last_full = Instant::now();
                            log_full(&stats, &activity);
                        } else {
                            log_mark(&stats, &activity, &queue);
                        }
                    }
                }
            }
            log_full(&stats, &activity);
        });
        ProgressHandle {
            stop: Some(stop_tx),
            task,
        }
    }
}

pub struct ProgressHandle {
    stop: Option<oneshot::Sender<()>>,
    task: JoinHandle<()>,
}

impl ProgressHandle {
    /// Stops the reporter after it prints the final statistics.
    pub async fn finish(mut self) {
        if let Some(stop) = self.stop.take() {
            let _ = stop.send(());
        }
        let _ = self.task.await;
    }
}

fn log_mark<T>(stats: &RunStats, activity: &ActivityLog, queue: &WorkQueue<T>) {
    info!(
        activity = %activity.take(),
        scanned = %format_count(stats.total.count()),
        queued = queue.len(),
        added = queue.total_added(),
        downloaded = %format_count(stats.downloaded.count()),
        "--MARK--"
    );
}

fn log_full(stats: &RunStats, activity: &ActivityLog) {
    let marks = activity.take();
    if !marks.is_empty() {
        info!(activity = %marks, "progress");
    }
    for line in stats.summary_lines() {
        info!("{line}");
    }
}
