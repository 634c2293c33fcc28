use std::collections::HashSet;
use std::io;
use std::path::{Path, PathBuf};

use thiserror::Error;
use tracing::{debug, info, warn};
use walkdir::WalkDir;

use super::index::IndexError;
use super::job::JobContext;
use super::paths::{
    deleted_marker_path, empty_placeholder_path, has_marker, local_name_from_path,
    local_path_for,
};

#[derive(Debug, Error)]
pub enum ReconcileError {
    #[error("index error: {0}")]
    Index(#[from] IndexError),
    #[error("directory walk failed: {0}")]
    Walk(#[from] tokio::task::JoinError),
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReconcileReport {
    /// Index records stamped as deleted.
    pub tombstoned: u64,
    /// Of those, how many had no file left and got a `.empty` placeholder.
    pub placeholders: u64,
    /// Untracked files on disk that were renamed with the deleted marker.
    pub untracked: u64,
    pub errors: u64,
}

/// Tombstones everything the current listing no longer contains.
///
/// Must only run after a complete, error-free enumeration: `expected` is
/// taken as the full set of local names that still exist remotely.
pub struct DeletionReconciler<'a> {
    ctx: &'a JobContext,
    expected: &'a HashSet<String>,
    now: i64,
}

impl<'a> DeletionReconciler<'a> {
    pub fn new(ctx: &'a JobContext, expected: &'a HashSet<String>, now: i64) -> Self {
        Self { ctx, expected, now }
    }

    pub async fn run(&self, scan_root: &Path) -> Result<ReconcileReport, ReconcileError> {
        let mut report = ReconcileReport::default();
        info!("tombstoning indexed files missing from the listing");
        self.reconcile_index(&mut report).await?;
        info!(scan_root = %scan_root.display(), "renaming local files missing from the listing");
        self.reconcile_disk(scan_root, &mut report).await?;
        Ok(report)
    }

    /// Pass A: records not seen in this run.
    pub async fn reconcile_index(&self, report: &mut ReconcileReport) -> Result<(), IndexError> {
        let ctx = self.ctx;
        for mut record in ctx.index.list_all(true).await? {
            if self.expected.contains(&record.local_name) {
                continue;
            }
            ctx.activity.mark('d');
            record.delete_detected = Some(self.now);
            ctx.index.update(&record).await?;
            report.tombstoned += 1;

            let path = match local_path_for(&ctx.local_root, &record.local_name) {
                Ok(path) => path,
                Err(err) => {
                    warn!(local_name = %record.local_name, error = %err, "cannot map tombstoned record to a path");
                    report.errors += 1;
                    continue;
                }
            };
            match self.tombstone_file(&path).await {
                Ok(Tombstone::Moved(size)) => {
                    ctx.stats.deleted.add(size);
                }
                Ok(Tombstone::Placeholder) => {
                    ctx.stats.deleted.add(0);
                    report.placeholders += 1;
                }
                Ok(Tombstone::Nothing) => {
                    ctx.stats.deleted.add(0);
                }
                Err(err) => {
                    ctx.stats.add_exception();
                    report.errors += 1;
                    warn!(path = %path.display(), error = %err, "failed to tombstone file");
                }
            }
        }
        Ok(())
    }

    async fn tombstone_file(&self, path: &Path) -> io::Result<Tombstone> {
        let marker = deleted_marker_path(path, self.now);
        let size = match tokio::fs::metadata(path).await {
            Ok(meta) if meta.is_file() => Some(meta.len()),
            Ok(_) => None,
            Err(err) if err.kind() == io::ErrorKind::NotFound => None,
            Err(err) => return Err(err),
        };

        if let Some(size) = size {
            return match tokio::fs::rename(path, &marker).await {
                Ok(()) => Ok(Tombstone::Moved(i64::try_from(size).unwrap_or(i64::MAX))),
                Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(Tombstone::Nothing),
                Err(err) => Err(err),
            };
        }

        let parent_exists = match marker.parent() {
            Some(parent) => tokio::fs::try_exists(parent).await?,
            None => false,
        };
        if !parent_exists {
            return Ok(Tombstone::Nothing);
        }
        match tokio::fs::File::create(empty_placeholder_path(&marker)).await {
            Ok(_) => Ok(Tombstone::Placeholder),
            Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(Tombstone::Nothing),
            Err(err) => Err(err),
        }
    }

    /// Pass B: files on disk the listing did not mention, tracked or not.
    pub async fn reconcile_disk(
        &self,
        scan_root: &Path,
        report: &mut ReconcileReport,
    ) -> Result<(), ReconcileError> {
        let ctx = self.ctx;
        let root = ctx.local_root.clone();
        let scan = scan_root.to_path_buf();
        let files = tokio::task::spawn_blocking(move || collect_local_files(&root, &scan)).await?;

        for file in files {
            ctx.stats.local.add(file.size);
            if self.expected.contains(&file.local_name) {
                continue;
            }
            ctx.activity.mark('D');
            let marker = deleted_marker_path(&file.path, self.now);
            match tokio::fs::rename(&file.path, &marker).await {
                Ok(()) => {
                    ctx.stats.deleted.add(file.size);
                    report.untracked += 1;
                    debug!(path = %file.path.display(), "renamed untracked local file");
                }
                Err(err) if err.kind() == io::ErrorKind::NotFound => {}
                Err(err) => {
                    ctx.stats.add_exception();
                    report.errors += 1;
                    warn!(path = %file.path.display(), error = %err, "failed to rename untracked file");
                }
            }
        }
        Ok(())
    }
}

enum Tombstone {
    Moved(i64),
    Placeholder,
    Nothing,
}

struct LocalFile {
    path: PathBuf,
    local_name: String,
    size: i64,
}

/// Regular files under `scan_root`, minus marker and staging files.
fn collect_local_files(root: &Path, scan_root: &Path) -> Vec<LocalFile> {
    let mut files = Vec::new();
    for entry in WalkDir::new(scan_root).follow_links(false) {
        let entry = match entry {
            Ok(entry) => entry,
            Err(err) => {
                debug!(error = %err, "skipping unreadable entry");
                continue;
            }
        };
        if !entry.file_type().is_file() {
            continue;
        }
        if has_marker(&entry.file_name().to_string_lossy()) {
            continue;
        }
        let Some(local_name) = local_name_from_path(root, entry.path()) else {
            continue;
        };
        let size = entry
            .metadata()
            .map(|meta| i64::try_from(meta.len()).unwrap_or(i64::MAX))
            .unwrap_or(0);
        files.push(LocalFile {
            path: entry.into_path(),
            local_name,
            size,
        });
    }
    files
}
