//! Seams between the engine and the object store: a paged listing and a
//! content fetcher, plus their HTTP implementations.

use std::io;
use std::path::Path;

use async_trait::async_trait;
use blobmirror_core::{BlobStoreClient, BlobStoreError, ObjectInfo};
use thiserror::Error;
use time::OffsetDateTime;
use time::format_description::well_known::Rfc3339;

use super::probe::RemoteItem;
use super::transfer::{TransferClient, TransferError};

#[derive(Debug, Error)]
pub enum ListingError {
    #[error("remote error: {0}")]
    Remote(#[from] BlobStoreError),
    #[error("time parse error: {0}")]
    Time(#[from] time::error::Parse),
    #[error("object size out of range: {0}")]
    Size(u64),
}

#[derive(Debug, Error)]
pub enum FetchError {
    #[error("remote object not found: {0}")]
    NotFound(String),
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
    #[error("transfer failed: {0}")]
    Transfer(TransferError),
}

impl From<TransferError> for FetchError {
    fn from(err: TransferError) -> Self {
        if err.is_not_found() {
            return FetchError::NotFound(err.to_string());
        }
        match err {
            TransferError::Io(err) => FetchError::Io(err),
            other => FetchError::Transfer(other),
        }
    }
}

/// Finite, non-restartable sequence of listing pages.
#[async_trait]
pub trait RemoteListing: Send {
    /// The next page, or `None` once the listing is exhausted.
    async fn next_batch(&mut self) -> Result<Option<Vec<RemoteItem>>, ListingError>;
}

#[async_trait]
pub trait ContentFetcher: Send + Sync {
    /// Writes the remote item's content to `target`, replacing any file there.
    async fn fetch_to(&self, remote: &RemoteItem, target: &Path) -> Result<(), FetchError>;
}

pub struct HttpListing {
    client: BlobStoreClient,
    container: String,
    page_size: u32,
    marker: Option<String>,
    finished: bool,
}

impl HttpListing {
    pub fn new(client: BlobStoreClient, container: impl Into<String>, page_size: u32) -> Self {
        Self {
            client,
            container: container.into(),
            page_size: page_size.max(1),
            marker: None,
            finished: false,
        }
    }
}

#[async_trait]
impl RemoteListing for HttpListing {
    async fn next_batch(&mut self) -> Result<Option<Vec<RemoteItem>>, ListingError> {
        if self.finished {
            return Ok(None);
        }
        let page = self
            .client
            .list_objects(&self.container, self.marker.as_deref(), Some(self.page_size))
            .await?;
        match page.next_marker {
            Some(next) if !next.is_empty() => self.marker = Some(next),
            _ => self.finished = true,
        }
        let items = page
            .objects
            .iter()
            .map(|object| remote_item_from(&self.container, object))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Some(items))
    }
}

pub fn remote_item_from(container: &str, object: &ObjectInfo) -> Result<RemoteItem, ListingError> {
    let size = i64::try_from(object.size).map_err(|_| ListingError::Size(object.size))?;
    let last_modified = OffsetDateTime::parse(&object.last_modified, &Rfc3339)?.unix_timestamp();
    Ok(RemoteItem {
        path: format!("/{container}/{}", object.name.trim_start_matches('/')),
        size,
        content_hash: object.md5.to_ascii_lowercase(),
        last_modified,
    })
}

pub struct HttpFetcher {
    transfer: TransferClient,
    container: String,
}

impl HttpFetcher {
    pub fn new(client: BlobStoreClient, container: impl Into<String>) -> Self {
        Self {
            transfer: TransferClient::new(client),
            container: container.into(),
        }
    }

    fn object_name<'a>(&self, remote: &'a RemoteItem) -> &'a str {
        let path = remote.path.trim_start_matches('/');
        path.strip_prefix(self.container.as_str())
            .and_then(|rest| rest.strip_prefix('/'))
            .unwrap_or(path)
    }
}

#[async_trait]
impl ContentFetcher for HttpFetcher {
    async fn fetch_to(&self, remote: &RemoteItem, target: &Path) -> Result<(), FetchError> {
        let name = self.object_name(remote);
        self.transfer
            .download_to_path(&self.container, name, target)
            .await?;
        Ok(())
    }
}
