use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::Context;
use time::OffsetDateTime;
use time::format_description::well_known::Rfc3339;

use crate::sync::classify::SyncPolicy;
use crate::sync::index::default_db_path;

const DEFAULT_ENDPOINT: &str = "https://blob.example.net";
const DEFAULT_MAX_TRANSFERS: u64 = 40;
const DEFAULT_CLASSIFY_CONCURRENCY: u64 = 16;
const DEFAULT_PAGE_SIZE: u64 = 5000;
const DEFAULT_FORCE_MISSING_DAYS: u64 = 30;
const DEFAULT_RECENT_CHANGE_HOURS: u64 = 24;

/// Run-level parameters, read from `BLOBMIRROR_*` environment variables.
#[derive(Clone)]
pub struct MirrorConfig {
    pub account: String,
    pub key: String,
    pub endpoint: String,
    pub container: String,
    pub local_root: PathBuf,
    pub index_path: PathBuf,
    pub max_transfers: usize,
    pub classify_concurrency: usize,
    pub page_size: u32,
    pub policy: SyncPolicy,
}

impl std::fmt::Debug for MirrorConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MirrorConfig")
            .field("account", &self.account)
            .field("key", &"<redacted>")
            .field("endpoint", &self.endpoint)
            .field("container", &self.container)
            .field("local_root", &self.local_root)
            .field("index_path", &self.index_path)
            .field("max_transfers", &self.max_transfers)
            .field("classify_concurrency", &self.classify_concurrency)
            .field("page_size", &self.page_size)
            .field("policy", &self.policy)
            .finish()
    }
}

impl MirrorConfig {
    pub fn from_env() -> anyhow::Result<Self> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Builds the config from any variable source; `from_env` passes the
    /// process environment.
    pub fn from_lookup<F>(lookup: F) -> anyhow::Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let required = |name: &str| {
            lookup(name)
                .filter(|value| !value.trim().is_empty())
                .with_context(|| format!("{name} is not set"))
        };
        let home = dirs::home_dir();

        let account = required("BLOBMIRROR_ACCOUNT")?;
        let key = required("BLOBMIRROR_KEY")?;
        let container = required("BLOBMIRROR_CONTAINER")?;
        let local_root = expand_with_home(&required("BLOBMIRROR_LOCAL_ROOT")?, home.as_deref());
        let endpoint =
            lookup("BLOBMIRROR_ENDPOINT").unwrap_or_else(|| DEFAULT_ENDPOINT.to_string());
        let index_path = match lookup("BLOBMIRROR_INDEX_PATH") {
            Some(value) => expand_with_home(&value, home.as_deref()),
            None => default_db_path(&container).context("cannot locate index database")?,
        };

        let read_u64 = |name: &str, default: u64| read_u64_var(lookup(name), default);
        let max_transfers = read_u64("BLOBMIRROR_MAX_TRANSFERS", DEFAULT_MAX_TRANSFERS);
        let classify_concurrency =
            read_u64("BLOBMIRROR_CLASSIFY_CONCURRENCY", DEFAULT_CLASSIFY_CONCURRENCY);
        let page_size = read_u64("BLOBMIRROR_PAGE_SIZE", DEFAULT_PAGE_SIZE);
        let force_missing_days =
            read_u64("BLOBMIRROR_FORCE_MISSING_DAYS", DEFAULT_FORCE_MISSING_DAYS);
        let recent_change_hours =
            read_u64("BLOBMIRROR_RECENT_CHANGE_HOURS", DEFAULT_RECENT_CHANGE_HOURS);
        let ignore_modified_after = lookup("BLOBMIRROR_IGNORE_MODIFIED_AFTER")
            .map(|value| parse_cutoff(&value))
            .transpose()?;

        Ok(Self {
            account,
            key,
            endpoint,
            container,
            local_root,
            index_path,
            max_transfers: usize::try_from(max_transfers).unwrap_or(usize::MAX),
            classify_concurrency: usize::try_from(classify_concurrency).unwrap_or(usize::MAX),
            page_size: u32::try_from(page_size).unwrap_or(u32::MAX),
            policy: SyncPolicy {
                force_missing_window: Duration::from_secs(
                    force_missing_days.saturating_mul(24 * 3600),
                ),
                recent_change_window: Duration::from_secs(recent_change_hours.saturating_mul(3600)),
                ignore_modified_after,
            },
        })
    }
}

fn parse_cutoff(value: &str) -> anyhow::Result<i64> {
    let parsed = OffsetDateTime::parse(value.trim(), &Rfc3339)
        .with_context(|| format!("BLOBMIRROR_IGNORE_MODIFIED_AFTER is not RFC 3339: {value}"))?;
    Ok(parsed.unix_timestamp())
}

fn expand_with_home(value: &str, home: Option<&Path>) -> PathBuf {
    match home {
        Some(home) if value == "~" => home.to_path_buf(),
        Some(home) => match value.strip_prefix("~/") {
            Some(rest) => home.join(rest),
            None => PathBuf::from(value),
        },
        None => PathBuf::from(value),
    }
}

fn read_u64_var(value: Option<String>, default: u64) -> u64 {
    value
        .and_then(|value| value.trim().parse::<u64>().ok())
        .filter(|value| *value > 0)
        .unwrap_or(default)
}
