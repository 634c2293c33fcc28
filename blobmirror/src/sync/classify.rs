use std::collections::HashSet;
use std::io;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use thiserror::Error;
use tracing::{info, warn};

use super::index::{IndexError, IndexRecord};
use super::job::{JobContext, SyncJob};
use super::now_unix;
use super::paths::{PathError, local_name_for, local_path_for};
use super::probe::{DiskFile, FileProbe, RemoteItem, is_same};
use super::wellknown::is_well_known;

const DEFAULT_FORCE_MISSING_DAYS: u64 = 30;
const DEFAULT_RECENT_CHANGE_HOURS: u64 = 24;
/// A `.` activity mark is emitted every this many scanned items.
const SCAN_MARK_EVERY: u64 = 5000;

#[derive(Debug, Error)]
pub enum ClassifyError {
    #[error("path error: {0}")]
    Path(#[from] PathError),
    #[error("index error: {0}")]
    Index(#[from] IndexError),
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SyncPolicy {
    /// A missing local file is re-fetched when its remote copy changed
    /// within this window.
    pub force_missing_window: Duration,
    /// Superseded local files younger than this are deleted instead of
    /// archived with a `[MODIFIED ...]` marker.
    pub recent_change_window: Duration,
    /// Remote items modified after this instant (unix seconds) are skipped.
    pub ignore_modified_after: Option<i64>,
}

impl Default for SyncPolicy {
    fn default() -> Self {
        Self {
            force_missing_window: Duration::from_secs(DEFAULT_FORCE_MISSING_DAYS * 24 * 3600),
            recent_change_window: Duration::from_secs(DEFAULT_RECENT_CHANGE_HOURS * 3600),
            ignore_modified_after: None,
        }
    }
}

impl SyncPolicy {
    pub fn is_ignored(&self, remote: &RemoteItem) -> bool {
        self.ignore_modified_after
            .is_some_and(|cutoff| remote.last_modified > cutoff)
    }

    /// Oldest remote mtime still eligible for the missing-file repair.
    pub fn force_missing_since(&self, now: i64) -> i64 {
        now.saturating_sub(window_secs(self.force_missing_window))
    }

    /// Local files modified after this instant count as recently changed.
    pub fn recent_change_since(&self, now: i64) -> i64 {
        now.saturating_sub(window_secs(self.recent_change_window))
    }
}

fn window_secs(window: Duration) -> i64 {
    i64::try_from(window.as_secs()).unwrap_or(i64::MAX)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobKind {
    None,
    New,
    Modified,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Classification {
    pub kind: JobKind,
    /// Set when a New classification came from the missing-file repair.
    pub forced: bool,
}

impl Classification {
    const UNCHANGED: Self = Self {
        kind: JobKind::None,
        forced: false,
    };
    const MODIFIED: Self = Self {
        kind: JobKind::Modified,
        forced: false,
    };

    fn new(forced: bool) -> Self {
        Self {
            kind: JobKind::New,
            forced,
        }
    }
}

/// Decides what a remote item needs, given what the index remembers and what
/// is on disk. Performs no writes.
pub async fn classify(
    remote: &RemoteItem,
    record: Option<&IndexRecord>,
    local: &DiskFile,
    policy: &SyncPolicy,
    now: i64,
) -> io::Result<Classification> {
    let Some(record) = record.filter(|record| record.exists()) else {
        return Ok(Classification::new(false));
    };
    if force_download_missing(remote, record, local, policy, now) {
        return Ok(Classification::new(true));
    }
    if !is_same(record, remote).await? {
        return Ok(Classification::MODIFIED);
    }
    Ok(Classification::UNCHANGED)
}

/// Repairs accidental local deletions of recently synced files. Only applies
/// while the remote content still matches the record, so a remote change is
/// left to the Modified path.
pub fn force_download_missing(
    remote: &RemoteItem,
    record: &IndexRecord,
    local: &DiskFile,
    policy: &SyncPolicy,
    now: i64,
) -> bool {
    if record.size != remote.size || !record.remote_hash.eq_ignore_ascii_case(&remote.content_hash)
    {
        return false;
    }
    remote.last_modified > policy.force_missing_since(now)
        && !local.exists()
        && !is_well_known(remote.size, &remote.content_hash)
}

/// When a downloaded file was changed on disk behind our back, the record
/// takes the disk's values so the item no longer compares as the same.
/// Returns whether the record changed and needs persisting.
pub async fn adopt_local_changes(record: &mut IndexRecord, local: &DiskFile) -> io::Result<bool> {
    if !record.exists() || !local.exists() {
        return Ok(false);
    }
    if record.size == local.size() && record.last_modified == local.modified() {
        return Ok(false);
    }
    record.update_from_disk(local).await
}

/// Runs [`classify`] over the listing with its bookkeeping: counters, the
/// index, the well-known shortcut and the set of names expected on disk.
pub struct Classifier {
    ctx: Arc<JobContext>,
    expected: Mutex<HashSet<String>>,
}

impl Classifier {
    pub fn new(ctx: Arc<JobContext>) -> Self {
        Self {
            ctx,
            expected: Mutex::new(HashSet::new()),
        }
    }

    fn expect(&self, local_name: &str) {
        if let Ok(mut expected) = self.expected.lock() {
            expected.insert(local_name.to_string());
        }
    }

    /// Local names seen during this run.
    pub fn take_expected(&self) -> HashSet<String> {
        self.expected
            .lock()
            .map(|mut expected| std::mem::take(&mut *expected))
            .unwrap_or_default()
    }

    /// Returns the job to queue, if the item needs one.
    pub async fn classify_item(&self, remote: RemoteItem) -> Result<Option<SyncJob>, ClassifyError> {
        let ctx = &self.ctx;
        let (scanned, _) = ctx.stats.total.add(remote.size);
        if scanned % SCAN_MARK_EVERY == 0 {
            ctx.activity.mark('.');
        }

        let local_name = local_name_for(&remote.path)?;
        self.expect(&local_name);
        if ctx.policy.is_ignored(&remote) {
            ctx.stats.ignored.add(remote.size);
            return Ok(None);
        }

        let target = local_path_for(&ctx.local_root, &local_name)?;
        let local = DiskFile::probe(target).await?;
        let mut record = ctx.index.get_or_insert(&local_name, &remote).await?;
        if adopt_local_changes(&mut record, &local).await? {
            warn!(local_name = %local_name, "local copy changed since last download");
            ctx.index.update(&record).await?;
        }

        let now = now_unix();
        let decision = classify(&remote, Some(&record), &local, &ctx.policy, now).await?;
        match decision.kind {
            JobKind::None => {
                ctx.stats.up_to_date.add(remote.size);
                Ok(None)
            }
            JobKind::New => {
                if decision.forced {
                    info!(local_name = %local_name, "re-fetching recently synced file missing locally");
                }
                if is_well_known(remote.size, &remote.content_hash) {
                    record.update_from_remote(&remote);
                    record.last_downloaded = Some(now);
                    ctx.index.update(&record).await?;
                    ctx.stats.ignored.add(remote.size);
                    return Ok(None);
                }
                ctx.stats.new.add(remote.size);
                Ok(Some(SyncJob::new(remote, local_name, local.path(), record, JobKind::New)))
            }
            JobKind::Modified => {
                ctx.stats.modified.add(remote.size);
                Ok(Some(SyncJob::new(
                    remote,
                    local_name,
                    local.path(),
                    record,
                    JobKind::Modified,
                )))
            }
        }
    }
}
