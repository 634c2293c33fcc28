use std::{io, path::Path};

use blobmirror_core::{BlobStoreClient, BlobStoreError};
use futures_util::StreamExt;
use thiserror::Error;
use tokio::io::AsyncWriteExt;

use super::paths::{FLAG_END, staging_prefix};

#[derive(Debug, Error)]
pub enum TransferError {
    #[error("request failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
    #[error("remote error: {0}")]
    Remote(#[from] BlobStoreError),
}

impl TransferError {
    pub fn is_not_found(&self) -> bool {
        match self {
            TransferError::Remote(err) => err.is_not_found(),
            TransferError::Request(err) => err.status() == Some(reqwest::StatusCode::NOT_FOUND),
            TransferError::Io(_) => false,
        }
    }
}

/// Streams object bodies to disk. The target's directory must already exist.
#[derive(Clone)]
pub struct TransferClient {
    client: BlobStoreClient,
}

impl TransferClient {
    pub fn new(client: BlobStoreClient) -> Self {
        Self { client }
    }

    /// Downloads `name` from `container` into a fresh
    /// `<file name>[PARTIAL <random>]` file beside `target`, then renames it
    /// over `target`. The staging file is created exclusively, so it never
    /// clobbers an existing file. Returns the number of bytes written.
    pub async fn download_to_path(
        &self,
        container: &str,
        name: &str,
        target: &Path,
    ) -> Result<u64, TransferError> {
        let response = self.client.download_object(container, name).await?;

        let parent = target.parent().ok_or_else(|| {
            io::Error::new(io::ErrorKind::InvalidInput, "target has no parent directory")
        })?;
        let staging = tempfile::Builder::new()
            .prefix(&staging_prefix(target))
            .suffix(FLAG_END)
            .tempfile_in(parent)?;
        // The staging file is removed when `staging_path` drops.
        let (file, staging_path) = staging.into_parts();
        let mut file = tokio::fs::File::from_std(file);
        let mut stream = response.bytes_stream();
        let mut written = 0u64;

        while let Some(chunk) = stream.next().await {
            let chunk = chunk?;
            file.write_all(&chunk).await?;
            written += chunk.len() as u64;
        }
        file.flush().await?;
        file.sync_all().await?;
        drop(file);

        staging_path
            .persist(target)
            .map_err(|err| TransferError::Io(err.error))?;
        Ok(written)
    }
}
