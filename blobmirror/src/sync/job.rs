use std::collections::HashSet;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use thiserror::Error;
use tracing::{debug, error, warn};

use super::classify::{JobKind, SyncPolicy};
use super::index::{IndexError, IndexRecord, IndexStore};
use super::now_unix;
use super::paths::modified_marker_path;
use super::probe::{DiskFile, FileProbe, RemoteItem, diff_string, same_content};
use super::remote::{ContentFetcher, FetchError};
use super::stats::{ActivityLog, RunStats};
use super::wellknown::is_well_known;

#[derive(Debug, Error)]
pub enum JobError {
    #[error("index error: {0}")]
    Index(#[from] IndexError),
    #[error("fetch error: {0}")]
    Fetch(#[from] FetchError),
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobOutcome {
    /// Nothing to do.
    Skipped,
    /// Finished without moving data.
    ShortCircuited,
    Transferred,
    /// Downloaded content did not verify; retried on the next run.
    Failed,
    /// A tolerated error was logged and counted.
    Swallowed,
}

/// Directories known to exist, so each is created at most once per run.
#[derive(Debug, Default)]
pub struct DirectoryCache {
    created: Mutex<HashSet<PathBuf>>,
}

impl DirectoryCache {
    fn contains(&self, dir: &Path) -> bool {
        self.created
            .lock()
            .map(|created| created.contains(dir))
            .unwrap_or(false)
    }

    pub async fn ensure(&self, dir: &Path) -> io::Result<()> {
        if self.contains(dir) {
            return Ok(());
        }
        tokio::fs::create_dir_all(dir).await?;
        if let Ok(mut created) = self.created.lock() {
            created.insert(dir.to_path_buf());
        }
        Ok(())
    }

    pub fn clear(&self) {
        if let Ok(mut created) = self.created.lock() {
            created.clear();
        }
    }

    pub fn len(&self) -> usize {
        self.created.lock().map(|created| created.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// State shared by classification and every job of one run.
pub struct JobContext {
    pub local_root: PathBuf,
    pub index: Arc<IndexStore>,
    pub fetcher: Arc<dyn ContentFetcher>,
    pub policy: SyncPolicy,
    pub stats: Arc<RunStats>,
    pub activity: Arc<ActivityLog>,
    pub directories: DirectoryCache,
}

impl JobContext {
    pub fn new(
        local_root: impl Into<PathBuf>,
        index: Arc<IndexStore>,
        fetcher: Arc<dyn ContentFetcher>,
        policy: SyncPolicy,
    ) -> Self {
        Self {
            local_root: local_root.into(),
            index,
            fetcher,
            policy,
            stats: Arc::new(RunStats::default()),
            activity: Arc::new(ActivityLog::default()),
            directories: DirectoryCache::default(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct SyncJob {
    pub remote: RemoteItem,
    pub local_name: String,
    pub target: PathBuf,
    pub record: IndexRecord,
    pub kind: JobKind,
}

impl SyncJob {
    pub fn new(
        remote: RemoteItem,
        local_name: String,
        target: &Path,
        record: IndexRecord,
        kind: JobKind,
    ) -> Self {
        Self {
            remote,
            local_name,
            target: target.to_path_buf(),
            record,
            kind,
        }
    }

    /// Executes the job. Vanished objects and local I/O trouble are logged,
    /// counted and reported as [`JobOutcome::Swallowed`]; anything else is
    /// returned as an error after cleaning up an empty destination file.
    pub async fn run(mut self, ctx: &JobContext) -> Result<JobOutcome, JobError> {
        match self.execute(ctx).await {
            Ok(outcome) => Ok(outcome),
            Err(JobError::Fetch(FetchError::NotFound(reason))) => {
                ctx.stats.add_exception();
                warn!(local_name = %self.local_name, reason = %reason, "remote object vanished before download");
                Ok(JobOutcome::Swallowed)
            }
            Err(JobError::Io(err)) | Err(JobError::Fetch(FetchError::Io(err))) => {
                ctx.directories.clear();
                ctx.stats.add_exception();
                warn!(local_name = %self.local_name, error = %err, "local I/O error during job");
                Ok(JobOutcome::Swallowed)
            }
            Err(err) => {
                ctx.stats.add_exception();
                remove_if_empty(&self.target).await;
                error!(local_name = %self.local_name, error = %err, "job failed");
                Err(err)
            }
        }
    }

    async fn execute(&mut self, ctx: &JobContext) -> Result<JobOutcome, JobError> {
        match self.kind {
            JobKind::None => return Ok(JobOutcome::Skipped),
            JobKind::New => {
                ctx.activity.mark('N');
            }
            JobKind::Modified => {
                ctx.activity.mark('m');
                if let Some(outcome) = self.prepare_modified(ctx).await? {
                    return Ok(outcome);
                }
            }
        }

        let now = now_unix();
        if is_well_known(self.remote.size, &self.remote.content_hash) {
            self.record.update_from_remote(&self.remote);
            self.record.last_downloaded = Some(now);
            ctx.index.update(&self.record).await?;
            self.kind = JobKind::None;
            return Ok(JobOutcome::ShortCircuited);
        }

        if let Some(parent) = self.target.parent() {
            ctx.directories.ensure(parent).await?;
        }
        self.record.update_from_remote(&self.remote);
        ctx.fetcher.fetch_to(&self.remote, &self.target).await?;
        self.record.last_downloaded = Some(now);
        ctx.stats.downloaded.add(self.remote.size);

        let mut local = DiskFile::probe(&self.target).await?;
        local.set_modified(self.remote.last_modified).await?;
        if !same_content(&local, &self.remote).await? {
            let diff = diff_string(&local, &self.remote).await;
            if local.exists() && local.size() == 0 {
                local.remove().await?;
            }
            ctx.stats.add_failed_download();
            warn!(local_name = %self.local_name, diff = %diff, "download mismatch, changed during run?");
            return Ok(JobOutcome::Failed);
        }

        self.record.update_from_disk(&local).await?;
        self.record.delete_detected = None;
        ctx.index.update(&self.record).await?;
        self.kind = JobKind::None;
        Ok(JobOutcome::Transferred)
    }

    /// Returns an outcome when the transfer turned out to be unnecessary.
    /// Otherwise the superseded local copy has been archived or removed.
    async fn prepare_modified(&mut self, ctx: &JobContext) -> Result<Option<JobOutcome>, JobError> {
        let mut local = DiskFile::probe(&self.target).await?;
        let avoidable = same_content(&self.record, &self.remote).await?
            && (!local.exists() || same_content(&local, &self.remote).await?);

        if avoidable {
            if local.exists() {
                local.set_modified(self.remote.last_modified).await?;
                self.record.update_from_disk(&local).await?;
            } else {
                self.record.update_from_remote(&self.remote);
            }
            ctx.index.update(&self.record).await?;
            debug!(local_name = %self.local_name, "only metadata changed");
            return Ok(Some(JobOutcome::ShortCircuited));
        }

        if local.exists() {
            if let Err(err) = self.set_aside(ctx, &mut local).await {
                ctx.stats.add_exception();
                warn!(local_name = %self.local_name, error = %err, "could not set aside modified file");
            }
        }
        Ok(None)
    }

    /// Empty or recently touched files are deleted; older ones are kept
    /// under a `[MODIFIED <remote mtime>]` name.
    async fn set_aside(&self, ctx: &JobContext, local: &mut DiskFile) -> io::Result<()> {
        let recent_since = ctx.policy.recent_change_since(now_unix());
        if local.size() <= 0 || local.modified() > recent_since {
            return local.remove().await;
        }

        let archived = modified_marker_path(local.path(), self.remote.last_modified);
        match tokio::fs::remove_file(&archived).await {
            Ok(()) => {}
            Err(err) if err.kind() == io::ErrorKind::NotFound => {}
            Err(err) => return Err(err),
        }
        tokio::fs::rename(local.path(), &archived).await?;
        local.refresh().await
    }
}

async fn remove_if_empty(path: &Path) {
    if let Ok(mut local) = DiskFile::probe(path).await {
        if local.exists() && local.size() == 0 {
            let _ = local.remove().await;
        }
    }
}

#[cfg(test)]
#[path = "job_tests.rs"]
mod tests;
