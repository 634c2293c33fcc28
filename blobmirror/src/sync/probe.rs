//! The `{exists, size, hash, mtime}` capability shared by remote items,
//! index records and files on disk.

use std::io;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use filetime::FileTime;
use md5::Context as Md5Context;
use tokio::io::AsyncReadExt;
use tokio::sync::OnceCell;

use super::index::IndexRecord;

const HASH_BUF_SIZE: usize = 128 * 1024;

#[async_trait]
pub trait FileProbe: Send + Sync {
    fn exists(&self) -> bool;
    /// Size in bytes, `-1` when the file does not exist.
    fn size(&self) -> i64;
    /// Last modification time in unix seconds (UTC).
    fn modified(&self) -> i64;
    /// Lowercase hex MD5, `None` when there is no content to hash.
    async fn content_hash(&self) -> io::Result<Option<String>>;
}

/// Snapshot of one remote object as reported by the listing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteItem {
    pub path: String,
    pub size: i64,
    pub content_hash: String,
    pub last_modified: i64,
}

#[async_trait]
impl FileProbe for RemoteItem {
    fn exists(&self) -> bool {
        true
    }

    fn size(&self) -> i64 {
        self.size
    }

    fn modified(&self) -> i64 {
        self.last_modified
    }

    async fn content_hash(&self) -> io::Result<Option<String>> {
        Ok(Some(self.content_hash.clone()))
    }
}

#[async_trait]
impl FileProbe for IndexRecord {
    /// A record only describes real content once it has been materialized.
    fn exists(&self) -> bool {
        self.last_downloaded.is_some()
    }

    fn size(&self) -> i64 {
        self.size
    }

    fn modified(&self) -> i64 {
        self.last_modified
    }

    async fn content_hash(&self) -> io::Result<Option<String>> {
        Ok(Some(self.remote_hash.clone()))
    }
}

/// A path on the local filesystem. Metadata is captured when probed; the hash
/// is computed on first request and memoized for the lifetime of the probe.
#[derive(Debug)]
pub struct DiskFile {
    path: PathBuf,
    state: Option<DiskState>,
    hash: OnceCell<Option<String>>,
}

#[derive(Debug, Clone, Copy)]
struct DiskState {
    size: i64,
    modified: i64,
}

impl DiskFile {
    pub async fn probe(path: impl Into<PathBuf>) -> io::Result<Self> {
        let path = path.into();
        let state = match tokio::fs::metadata(&path).await {
            Ok(meta) if meta.is_file() => Some(DiskState {
                size: i64::try_from(meta.len()).unwrap_or(i64::MAX),
                modified: FileTime::from_last_modification_time(&meta).unix_seconds(),
            }),
            Ok(_) => None,
            Err(err) if err.kind() == io::ErrorKind::NotFound => None,
            Err(err) => return Err(err),
        };
        Ok(Self {
            path,
            state,
            hash: OnceCell::new(),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Re-reads metadata and forgets any memoized hash.
    pub async fn refresh(&mut self) -> io::Result<()> {
        *self = Self::probe(self.path.clone()).await?;
        Ok(())
    }

    /// Sets the file's mtime, leaving the content (and memoized hash) intact.
    pub async fn set_modified(&mut self, unix_secs: i64) -> io::Result<()> {
        let Some(state) = self.state.as_mut() else {
            return Ok(());
        };
        if state.modified == unix_secs {
            return Ok(());
        }
        let path = self.path.clone();
        tokio::task::spawn_blocking(move || {
            filetime::set_file_mtime(&path, FileTime::from_unix_time(unix_secs, 0))
        })
        .await
        .map_err(io::Error::other)??;
        state.modified = unix_secs;
        Ok(())
    }

    /// Removes the file; a file that is already gone counts as removed.
    pub async fn remove(&mut self) -> io::Result<()> {
        match tokio::fs::remove_file(&self.path).await {
            Ok(()) => {}
            Err(err) if err.kind() == io::ErrorKind::NotFound => {}
            Err(err) => return Err(err),
        }
        self.state = None;
        self.hash = OnceCell::new();
        Ok(())
    }

    async fn compute_hash(&self) -> io::Result<Option<String>> {
        if self.state.is_none() {
            return Ok(None);
        }
        let mut file = match tokio::fs::File::open(&self.path).await {
            Ok(file) => file,
            Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(err) => return Err(err),
        };
        let mut ctx = Md5Context::new();
        let mut buf = vec![0u8; HASH_BUF_SIZE];
        loop {
            let read = file.read(&mut buf).await?;
            if read == 0 {
                break;
            }
            ctx.consume(&buf[..read]);
        }
        Ok(Some(format!("{:x}", ctx.compute())))
    }
}

#[async_trait]
impl FileProbe for DiskFile {
    fn exists(&self) -> bool {
        self.state.is_some()
    }

    fn size(&self) -> i64 {
        self.state.map_or(-1, |s| s.size)
    }

    fn modified(&self) -> i64 {
        self.state.map_or(0, |s| s.modified)
    }

    async fn content_hash(&self) -> io::Result<Option<String>> {
        self.hash
            .get_or_try_init(|| self.compute_hash())
            .await
            .cloned()
    }
}

/// Two snapshots are the same when size, hash and mtime all match.
/// Size and mtime are checked first so a disk hash is only computed when needed.
pub async fn is_same<A, B>(a: &A, b: &B) -> io::Result<bool>
where
    A: FileProbe + ?Sized,
    B: FileProbe + ?Sized,
{
    if a.size() != b.size() || a.modified() != b.modified() {
        return Ok(false);
    }
    Ok(a.content_hash().await? == b.content_hash().await?)
}

/// Size and hash only; used where the mtime is expected to differ.
pub async fn same_content<A, B>(a: &A, b: &B) -> io::Result<bool>
where
    A: FileProbe + ?Sized,
    B: FileProbe + ?Sized,
{
    if a.size() != b.size() {
        return Ok(false);
    }
    Ok(a.content_hash().await? == b.content_hash().await?)
}

/// Human readable comparison for mismatch logs.
pub async fn diff_string<A, B>(a: &A, b: &B) -> String
where
    A: FileProbe + ?Sized,
    B: FileProbe + ?Sized,
{
    let hash_a = a.content_hash().await.ok().flatten().unwrap_or_default();
    let hash_b = b.content_hash().await.ok().flatten().unwrap_or_default();
    let mut out = format!("exists: {}", a.exists());
    if a.exists() != b.exists() {
        out.push_str(&format!(" vs {}", b.exists()));
    }
    out.push_str(&format!(", size: {}", a.size()));
    if a.size() != b.size() {
        out.push_str(&format!(" vs {}", b.size()));
    }
    out.push_str(&format!(", md5: {hash_a}"));
    if hash_a != hash_b {
        out.push_str(&format!(" vs {hash_b}"));
    }
    out.push_str(&format!(", modified: {}", a.modified()));
    if a.modified() != b.modified() {
        out.push_str(&format!(" vs {}", b.modified()));
    }
    out
}
