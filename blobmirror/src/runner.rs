use std::sync::Arc;

use anyhow::Context;
use blobmirror_core::{BlobStoreClient, Credentials};
use tracing::info;

use crate::config::MirrorConfig;
use crate::sync::engine::{EngineOptions, RunReport, SyncEngine};
use crate::sync::index::IndexStore;
use crate::sync::job::JobContext;
use crate::sync::remote::{HttpFetcher, HttpListing};

pub struct MirrorRuntime {
    config: MirrorConfig,
    client: BlobStoreClient,
    engine: SyncEngine,
}

impl MirrorRuntime {
    pub async fn bootstrap(config: MirrorConfig) -> anyhow::Result<Self> {
        tokio::fs::create_dir_all(&config.local_root)
            .await
            .with_context(|| format!("failed to create local root at {:?}", config.local_root))?;

        let credentials = Credentials::new(config.account.clone(), config.key.clone());
        let client = BlobStoreClient::with_base_url(&config.endpoint, credentials)
            .context("failed to build blob store client")?;
        let index = IndexStore::open(&config.index_path)
            .await
            .with_context(|| format!("failed to open index at {:?}", config.index_path))?;

        let fetcher = HttpFetcher::new(client.clone(), config.container.clone());
        let ctx = JobContext::new(
            config.local_root.clone(),
            Arc::new(index),
            Arc::new(fetcher),
            config.policy,
        );
        let mut options = EngineOptions::new(config.container.clone());
        options.max_transfers = config.max_transfers;
        options.classify_concurrency = config.classify_concurrency;
        let engine = SyncEngine::new(Arc::new(ctx), options);

        Ok(Self {
            config,
            client,
            engine,
        })
    }

    /// Runs a single mirror pass. Ctrl-C aborts the pass with an error.
    pub async fn run(self) -> anyhow::Result<RunReport> {
        info!(
            account = self.client.account(),
            container = %self.config.container,
            local_root = %self.config.local_root.display(),
            index = %self.config.index_path.display(),
            max_transfers = self.config.max_transfers,
            "mirror started"
        );

        let listing = HttpListing::new(
            self.client.clone(),
            self.config.container.clone(),
            self.config.page_size,
        );
        let report = tokio::select! {
            report = self.engine.run(listing) => report.context("mirror run failed")?,
            signal = tokio::signal::ctrl_c() => {
                signal.context("failed to listen for ctrl-c")?;
                anyhow::bail!("interrupted");
            }
        };

        for line in report.summary_lines() {
            info!("{line}");
        }
        if let Some(err) = &report.scan_error {
            tracing::error!(error = %err, "scan did not complete");
        }
        Ok(report)
    }
}
