use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use futures_util::StreamExt;
use futures_util::stream;
use thiserror::Error;
use tracing::{error, info, warn};

use super::classify::Classifier;
use super::index::IndexError;
use super::job::{JobContext, SyncJob};
use super::now_unix;
use super::paths::{PathError, local_name_for, local_path_for};
use super::pool::{PoolReport, WorkerPool};
use super::progress::ProgressReporter;
use super::queue::WorkQueue;
use super::reconcile::{DeletionReconciler, ReconcileReport};
use super::remote::{ListingError, RemoteListing};
use super::stats::RunStats;

const DEFAULT_MAX_TRANSFERS: usize = 40;
const DEFAULT_CLASSIFY_CONCURRENCY: usize = 16;

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("listing error: {0}")]
    Listing(#[from] ListingError),
    #[error("index error: {0}")]
    Index(#[from] IndexError),
    #[error("path error: {0}")]
    Path(#[from] PathError),
}

#[derive(Debug, Clone)]
pub struct EngineOptions {
    /// Remote container; its escaped name is the top directory of the mirror.
    pub container: String,
    pub max_transfers: usize,
    pub classify_concurrency: usize,
    pub progress: ProgressReporter,
}

impl EngineOptions {
    pub fn new(container: impl Into<String>) -> Self {
        Self {
            container: container.into(),
            max_transfers: DEFAULT_MAX_TRANSFERS,
            classify_concurrency: DEFAULT_CLASSIFY_CONCURRENCY,
            progress: ProgressReporter::default(),
        }
    }
}

#[derive(Debug)]
pub struct RunReport {
    /// Enumeration reached the end of the listing.
    pub scan_completed: bool,
    pub scan_error: Option<String>,
    /// Items that failed classification and were skipped.
    pub item_errors: u64,
    pub pool: PoolReport,
    /// `None` when deletion reconciliation was skipped or failed.
    pub reconcile: Option<ReconcileReport>,
    pub elapsed: Duration,
    pub stats: Arc<RunStats>,
}

impl RunReport {
    pub fn is_success(&self) -> bool {
        self.scan_completed
    }

    pub fn summary_lines(&self) -> Vec<String> {
        let mut lines = self.stats.summary_lines();
        lines.push(format!("Elapsed time {:.1?}", self.elapsed));
        lines
    }
}

#[derive(Default)]
struct ScanOutcome {
    error: Option<EngineError>,
    item_errors: u64,
}

/// One mirror run: enumerate and classify, transfer through the worker
/// pool, then reconcile deletions when the scan was clean.
pub struct SyncEngine {
    ctx: Arc<JobContext>,
    options: EngineOptions,
}

impl SyncEngine {
    pub fn new(ctx: Arc<JobContext>, options: EngineOptions) -> Self {
        Self { ctx, options }
    }

    pub fn context(&self) -> &Arc<JobContext> {
        &self.ctx
    }

    fn scan_root(&self) -> Result<PathBuf, PathError> {
        let container = local_name_for(&self.options.container)?;
        local_path_for(&self.ctx.local_root, &container)
    }

    pub async fn run<L>(&self, mut listing: L) -> Result<RunReport, EngineError>
    where
        L: RemoteListing,
    {
        let started = Instant::now();
        let run_started = now_unix();
        let scan_root = self.scan_root()?;
        let ctx = &self.ctx;

        let queue = Arc::new(WorkQueue::<SyncJob>::new());
        let classifier = Classifier::new(Arc::clone(ctx));
        let progress = self.options.progress.spawn(
            Arc::clone(&ctx.stats),
            Arc::clone(&ctx.activity),
            Arc::clone(&queue),
        );

        let pool = WorkerPool::new(self.options.max_transfers);
        let consumer = {
            let queue = Arc::clone(&queue);
            let ctx = Arc::clone(ctx);
            tokio::spawn(async move {
                pool.run(&*queue, move |job: SyncJob| {
                    let ctx = Arc::clone(&ctx);
                    async move { job.run(&ctx).await.map(|_| ()) }
                })
                .await
            })
        };

        info!(container = %self.options.container, "scanning and processing remote items");
        let scan = self.enumerate(&mut listing, &classifier, &queue).await;
        if let Err(err) = queue.complete() {
            warn!(error = %err, "work queue was already completed");
        }
        let scan_completed = scan.error.is_none();
        info!(
            scanned = ctx.stats.total.count(),
            queued = queue.total_added(),
            "fetch done"
        );

        let expected = classifier.take_expected();
        let reconcile = async {
            if !scan_completed || scan.item_errors > 0 {
                warn!("scan had errors, skipping deletion check");
                return None;
            }
            match DeletionReconciler::new(ctx, &expected, run_started)
                .run(&scan_root)
                .await
            {
                Ok(report) => Some(report),
                Err(err) => {
                    ctx.stats.add_exception();
                    error!(error = %err, "deletion check failed");
                    None
                }
            }
        };
        let (pool_result, reconcile) = tokio::join!(consumer, reconcile);
        let pool = pool_result.unwrap_or_else(|err| {
            error!(error = %err, "worker pool stopped unexpectedly");
            PoolReport::default()
        });
        progress.finish().await;

        Ok(RunReport {
            scan_completed,
            scan_error: scan.error.map(|err| err.to_string()),
            item_errors: scan.item_errors,
            pool,
            reconcile,
            elapsed: started.elapsed(),
            stats: Arc::clone(&ctx.stats),
        })
    }

    /// Classifies page after page; each page runs in one index batch.
    async fn enumerate<L>(
        &self,
        listing: &mut L,
        classifier: &Classifier,
        queue: &WorkQueue<SyncJob>,
    ) -> ScanOutcome
    where
        L: RemoteListing,
    {
        let ctx = &self.ctx;
        let item_errors = AtomicU64::new(0);
        let mut outcome = ScanOutcome::default();

        loop {
            let batch = match listing.next_batch().await {
                Ok(Some(batch)) => batch,
                Ok(None) => break,
                Err(err) => {
                    ctx.stats.add_exception();
                    error!(scanned = ctx.stats.total.count(), error = %err, "listing failed");
                    outcome.error = Some(err.into());
                    break;
                }
            };
            if let Err(err) = ctx.index.begin_batch().await {
                ctx.stats.add_exception();
                error!(error = %err, "cannot open index batch");
                outcome.error = Some(err.into());
                break;
            }

            stream::iter(batch)
                .for_each_concurrent(self.options.classify_concurrency.max(1), |item| {
                    let item_errors = &item_errors;
                    async move {
                        let path = item.path.clone();
                        match classifier.classify_item(item).await {
                            Ok(Some(job)) => {
                                if let Err(err) = queue.add(job) {
                                    item_errors.fetch_add(1, Ordering::Relaxed);
                                    ctx.stats.add_exception();
                                    warn!(path = %path, error = %err, "cannot queue job");
                                }
                            }
                            Ok(None) => {}
                            Err(err) => {
                                item_errors.fetch_add(1, Ordering::Relaxed);
                                ctx.stats.add_exception();
                                warn!(
                                    path = %path,
                                    scanned = ctx.stats.total.count(),
                                    error = %err,
                                    "failed to classify item"
                                );
                            }
                        }
                    }
                })
                .await;

            if let Err(err) = ctx.index.end_batch().await {
                ctx.stats.add_exception();
                error!(error = %err, "cannot commit index batch");
                outcome.error = Some(err.into());
                break;
            }
        }

        if let Err(err) = ctx.index.end_batch().await {
            error!(error = %err, "cannot commit index batch");
        }
        outcome.item_errors = item_errors.load(Ordering::Relaxed);
        outcome
    }
}

#[cfg(test)]
#[path = "engine_tests.rs"]
mod tests;
