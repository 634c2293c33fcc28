//! Fakes shared by the engine-level test suites.

use std::collections::HashMap;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;

use super::classify::SyncPolicy;
use super::index::IndexStore;
use super::job::JobContext;
use super::probe::RemoteItem;
use super::remote::{ContentFetcher, FetchError, ListingError, RemoteListing};

pub const T0: i64 = 1_704_067_200;

pub fn remote_item(path: &str, content: &[u8], last_modified: i64) -> RemoteItem {
    RemoteItem {
        path: path.into(),
        size: content.len() as i64,
        content_hash: format!("{:x}", md5::compute(content)),
        last_modified,
    }
}

#[derive(Debug, Clone)]
pub enum FakeObject {
    Content(Vec<u8>),
    NotFound,
    Broken,
}

/// Serves object bodies from memory and counts every fetch.
#[derive(Debug, Default)]
pub struct FakeFetcher {
    objects: Mutex<HashMap<String, FakeObject>>,
    calls: AtomicUsize,
}

impl FakeFetcher {
    pub fn put(&self, path: &str, object: FakeObject) {
        self.objects.lock().unwrap().insert(path.into(), object);
    }

    pub fn put_content(&self, path: &str, content: &[u8]) {
        self.put(path, FakeObject::Content(content.to_vec()));
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ContentFetcher for FakeFetcher {
    async fn fetch_to(&self, remote: &RemoteItem, target: &Path) -> Result<(), FetchError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let object = self.objects.lock().unwrap().get(&remote.path).cloned();
        match object {
            Some(FakeObject::Content(bytes)) => {
                tokio::fs::write(target, bytes).await?;
                Ok(())
            }
            Some(FakeObject::Broken) => Err(FetchError::Transfer(
                super::transfer::TransferError::Io(std::io::Error::other("connection reset")),
            )),
            Some(FakeObject::NotFound) | None => Err(FetchError::NotFound(remote.path.clone())),
        }
    }
}

/// Hands out prepared pages, optionally failing after them.
pub struct FakeListing {
    pages: std::vec::IntoIter<Vec<RemoteItem>>,
    fail_at_end: bool,
}

impl FakeListing {
    pub fn new(pages: Vec<Vec<RemoteItem>>) -> Self {
        Self {
            pages: pages.into_iter(),
            fail_at_end: false,
        }
    }

    pub fn failing_after(pages: Vec<Vec<RemoteItem>>) -> Self {
        Self {
            pages: pages.into_iter(),
            fail_at_end: true,
        }
    }
}

#[async_trait]
impl RemoteListing for FakeListing {
    async fn next_batch(&mut self) -> Result<Option<Vec<RemoteItem>>, ListingError> {
        match self.pages.next() {
            Some(page) => Ok(Some(page)),
            None if self.fail_at_end => Err(ListingError::Size(u64::MAX)),
            None => Ok(None),
        }
    }
}

pub async fn memory_index() -> Arc<IndexStore> {
    Arc::new(IndexStore::new("sqlite::memory:").await.unwrap())
}

pub async fn context(root: &Path, fetcher: Arc<FakeFetcher>) -> Arc<JobContext> {
    Arc::new(JobContext::new(
        root,
        memory_index().await,
        fetcher,
        SyncPolicy::default(),
    ))
}
