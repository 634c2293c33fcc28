use std::{fs, io, path::Path, path::PathBuf};

use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions, SqliteRow};
use sqlx::{Row, Sqlite, SqlitePool, Transaction, migrate::Migrator};
use thiserror::Error;
use tokio::sync::Mutex;

use super::probe::{DiskFile, FileProbe, RemoteItem, is_same};

static MIGRATOR: Migrator = sqlx::migrate!("./migrations");

const RECORD_COLUMNS: &str = "local_name, remote_path, last_modified, size, remote_hash, last_downloaded, delete_detected";

#[derive(Debug, Error)]
pub enum IndexError {
    #[error("database error: {0}")]
    Sqlx(#[from] sqlx::Error),
    #[error("migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
    #[error("XDG data directory is unavailable")]
    MissingDataDir,
}

/// One row per destination path. Rows are never deleted, only tombstoned.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexRecord {
    pub local_name: String,
    pub remote_path: String,
    pub last_modified: i64,
    pub size: i64,
    pub remote_hash: String,
    pub last_downloaded: Option<i64>,
    pub delete_detected: Option<i64>,
}

impl IndexRecord {
    /// A fresh record for a remote item that was never materialized.
    pub fn from_remote(local_name: impl Into<String>, remote: &RemoteItem) -> Self {
        Self {
            local_name: local_name.into(),
            remote_path: remote.path.clone(),
            last_modified: remote.last_modified,
            size: remote.size,
            remote_hash: remote.content_hash.clone(),
            last_downloaded: None,
            delete_detected: None,
        }
    }

    pub fn update_from_remote(&mut self, remote: &RemoteItem) {
        self.remote_path = remote.path.clone();
        self.last_modified = remote.last_modified;
        self.size = remote.size;
        self.remote_hash = remote.content_hash.clone();
    }

    /// Adopts the local file's size, mtime and hash. Returns whether anything
    /// differed from what the record held before.
    pub async fn update_from_disk(&mut self, disk: &DiskFile) -> io::Result<bool> {
        if !disk.exists() {
            return Ok(false);
        }
        let same = is_same(disk, &*self).await?;
        self.last_modified = disk.modified();
        self.size = disk.size();
        if let Some(hash) = disk.content_hash().await? {
            self.remote_hash = hash;
        }
        Ok(!same)
    }

    pub fn is_tombstoned(&self) -> bool {
        self.delete_detected.is_some()
    }
}

/// Durable memory of prior runs, backed by a single SQLite connection.
///
/// Writes can be grouped with [`IndexStore::begin_batch`]/[`IndexStore::end_batch`];
/// while a batch is open every statement, reads included, runs inside it.
pub struct IndexStore {
    pool: SqlitePool,
    batch: Mutex<Option<Transaction<'static, Sqlite>>>,
}

impl IndexStore {
    pub fn from_pool(pool: SqlitePool) -> Self {
        Self {
            pool,
            batch: Mutex::new(None),
        }
    }

    pub async fn new(database_url: &str) -> Result<Self, IndexError> {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect(database_url)
            .await?;
        let store = Self::from_pool(pool);
        store.init().await?;
        Ok(store)
    }

    pub async fn open(db_path: &Path) -> Result<Self, IndexError> {
        if let Some(parent) = db_path.parent() {
            fs::create_dir_all(parent)?;
        }
        let options = SqliteConnectOptions::new()
            .filename(db_path)
            .create_if_missing(true);
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(options)
            .await?;
        let store = Self::from_pool(pool);
        store.init().await?;
        Ok(store)
    }

    pub async fn init(&self) -> Result<(), IndexError> {
        MIGRATOR.run(&self.pool).await?;
        Ok(())
    }

    /// Opens a write batch. Returns `false` if one is already open.
    pub async fn begin_batch(&self) -> Result<bool, IndexError> {
        let mut batch = self.batch.lock().await;
        if batch.is_some() {
            return Ok(false);
        }
        *batch = Some(self.pool.begin().await?);
        Ok(true)
    }

    /// Commits the open batch. Returns `false` if none was open.
    pub async fn end_batch(&self) -> Result<bool, IndexError> {
        let tx = self.batch.lock().await.take();
        match tx {
            Some(tx) => {
                tx.commit().await?;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    pub async fn get_record(&self, local_name: &str) -> Result<Option<IndexRecord>, IndexError> {
        let sql = format!("SELECT {RECORD_COLUMNS} FROM files WHERE local_name = ?1");
        let query = sqlx::query(&sql).bind(local_name);

        let mut batch = self.batch.lock().await;
        let row = match batch.as_mut() {
            Some(tx) => query.fetch_optional(&mut **tx).await?,
            None => query.fetch_optional(&self.pool).await?,
        };

        row.as_ref()
            .map(record_from_row)
            .transpose()
            .map_err(IndexError::from)
    }

    /// Inserts the record unless its `local_name` is already known.
    /// Returns whether a row was written.
    pub async fn insert_if_absent(&self, record: &IndexRecord) -> Result<bool, IndexError> {
        let query = sqlx::query(
            "INSERT INTO files (local_name, remote_path, last_modified, size, remote_hash, last_downloaded, delete_detected)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
             ON CONFLICT(local_name) DO NOTHING",
        )
        .bind(&record.local_name)
        .bind(&record.remote_path)
        .bind(record.last_modified)
        .bind(record.size)
        .bind(&record.remote_hash)
        .bind(record.last_downloaded)
        .bind(record.delete_detected);

        let mut batch = self.batch.lock().await;
        let result = match batch.as_mut() {
            Some(tx) => query.execute(&mut **tx).await?,
            None => query.execute(&self.pool).await?,
        };
        Ok(result.rows_affected() > 0)
    }

    pub async fn update(&self, record: &IndexRecord) -> Result<(), IndexError> {
        let query = sqlx::query(
            "UPDATE files
             SET remote_path = ?2,
                 last_modified = ?3,
                 size = ?4,
                 remote_hash = ?5,
                 last_downloaded = ?6,
                 delete_detected = ?7
             WHERE local_name = ?1",
        )
        .bind(&record.local_name)
        .bind(&record.remote_path)
        .bind(record.last_modified)
        .bind(record.size)
        .bind(&record.remote_hash)
        .bind(record.last_downloaded)
        .bind(record.delete_detected);

        let mut batch = self.batch.lock().await;
        match batch.as_mut() {
            Some(tx) => query.execute(&mut **tx).await?,
            None => query.execute(&self.pool).await?,
        };
        Ok(())
    }

    /// Loads the record for `remote`, inserting a never-downloaded one first
    /// when the local name is unknown.
    pub async fn get_or_insert(
        &self,
        local_name: &str,
        remote: &RemoteItem,
    ) -> Result<IndexRecord, IndexError> {
        if let Some(record) = self.get_record(local_name).await? {
            return Ok(record);
        }
        let record = IndexRecord::from_remote(local_name, remote);
        if self.insert_if_absent(&record).await? {
            return Ok(record);
        }
        // Another worker inserted it between our read and write.
        Ok(self.get_record(local_name).await?.unwrap_or(record))
    }

    pub async fn list_all(&self, exclude_deleted: bool) -> Result<Vec<IndexRecord>, IndexError> {
        let sql = if exclude_deleted {
            format!(
                "SELECT {RECORD_COLUMNS} FROM files WHERE delete_detected IS NULL ORDER BY local_name ASC"
            )
        } else {
            format!("SELECT {RECORD_COLUMNS} FROM files ORDER BY local_name ASC")
        };
        let query = sqlx::query(&sql);

        let mut batch = self.batch.lock().await;
        let rows = match batch.as_mut() {
            Some(tx) => query.fetch_all(&mut **tx).await?,
            None => query.fetch_all(&self.pool).await?,
        };

        rows.iter()
            .map(|row| record_from_row(row).map_err(IndexError::from))
            .collect()
    }

    pub async fn count(&self) -> Result<i64, IndexError> {
        let query = sqlx::query("SELECT COUNT(*) AS n FROM files");
        let mut batch = self.batch.lock().await;
        let row = match batch.as_mut() {
            Some(tx) => query.fetch_one(&mut **tx).await?,
            None => query.fetch_one(&self.pool).await?,
        };
        Ok(row.try_get("n")?)
    }
}

fn record_from_row(row: &SqliteRow) -> Result<IndexRecord, sqlx::Error> {
    Ok(IndexRecord {
        local_name: row.try_get("local_name")?,
        remote_path: row.try_get("remote_path")?,
        last_modified: row.try_get("last_modified")?,
        size: row.try_get("size")?,
        remote_hash: row.try_get("remote_hash")?,
        last_downloaded: row.try_get("last_downloaded")?,
        delete_detected: row.try_get("delete_detected")?,
    })
}

pub fn default_db_path(container: &str) -> Result<PathBuf, IndexError> {
    let mut path = dirs::data_dir().ok_or(IndexError::MissingDataDir)?;
    path.push("blobmirror");
    path.push(format!("{container}.sqlite"));
    Ok(path)
}

#[cfg(test)]
#[path = "index_tests.rs"]
mod tests;
