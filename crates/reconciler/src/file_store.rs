//! JSON file backed tables.
//!
//! Each table lives in its own file under a root directory. Writes replace the
//! file through a rename so readers never observe a half-written table.

use std::collections::BTreeMap;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::debug;

use crate::error::{Error, Result};
use crate::store::{
    BatchDeleteOutcome, MAX_BATCH_DELETE_KEYS, ScanPredicate, Store, StoreProvider,
    condition_failed, write_key,
};
use crate::types::SeedRecord;

#[derive(Debug, Serialize, Deserialize)]
struct TableFile {
    table: String,
    hash_key: String,
    #[serde(default)]
    items: Vec<SeedRecord>,
}

/// A table persisted as one JSON document.
#[derive(Debug)]
pub struct JsonFileStore {
    path: PathBuf,
    table_name: String,
    hash_key: String,
    write_lock: Mutex<()>,
}

impl JsonFileStore {
    /// Open a table file, which need not exist yet.
    ///
    /// # Errors
    ///
    /// Returns [`Error::StoreUnavailable`] if an existing file cannot be read
    /// and [`Error::KeySchemaMismatch`] if it is keyed on another attribute.
    pub async fn open(
        path: impl Into<PathBuf>,
        table_name: impl Into<String>,
        hash_key: impl Into<String>,
    ) -> Result<Self> {
        let store = Self {
            path: path.into(),
            table_name: table_name.into(),
            hash_key: hash_key.into(),
            write_lock: Mutex::new(()),
        };

        if let Some(existing) = store.read_file().await? {
            if existing.hash_key != store.hash_key {
                return Err(Error::key_schema_mismatch(
                    &store.table_name,
                    existing.hash_key,
                    &store.hash_key,
                ));
            }
        }

        Ok(store)
    }

    /// Path of the backing file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn read_file(&self) -> Result<Option<TableFile>> {
        match tokio::fs::read(&self.path).await {
            Ok(bytes) => serde_json::from_slice(&bytes).map(Some).map_err(|e| {
                Error::store_unavailable(format!("{}: {e}", self.path.display()))
            }),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(Error::store_unavailable(format!(
                "{}: {e}",
                self.path.display()
            ))),
        }
    }

    async fn load(&self) -> Result<BTreeMap<String, SeedRecord>> {
        let Some(file) = self.read_file().await? else {
            return Ok(BTreeMap::new());
        };

        file.items
            .into_iter()
            .enumerate()
            .map(|(index, record)| match record.key(&self.hash_key).map(str::to_string) {
                Some(key) => Ok((key, record)),
                None => Err(Error::store_unavailable(format!(
                    "{}: item {index} has no string '{}'",
                    self.path.display(),
                    self.hash_key
                ))),
            })
            .collect()
    }

    async fn save(&self, records: BTreeMap<String, SeedRecord>) -> Result<()> {
        let file = TableFile {
            table: self.table_name.clone(),
            hash_key: self.hash_key.clone(),
            items: records.into_values().collect(),
        };
        let bytes = serde_json::to_vec_pretty(&file)
            .map_err(|e| Error::store_write_failed(format!("encoding table: {e}")))?;

        let staging = self.path.with_extension("json.tmp");
        tokio::fs::write(&staging, bytes)
            .await
            .map_err(|e| Error::store_write_failed(format!("{}: {e}", staging.display())))?;
        tokio::fs::rename(&staging, &self.path)
            .await
            .map_err(|e| Error::store_write_failed(format!("{}: {e}", self.path.display())))?;

        debug!(path = %self.path.display(), items = file.items.len(), "Table saved");
        Ok(())
    }
}

#[async_trait]
impl Store for JsonFileStore {
    fn table_name(&self) -> &str {
        &self.table_name
    }

    fn hash_key(&self) -> &str {
        &self.hash_key
    }

    async fn scan(&self, predicate: &ScanPredicate<'_>) -> Result<Vec<SeedRecord>> {
        let records = self.load().await?;
        Ok(records.into_values().filter(|r| predicate(r)).collect())
    }

    async fn batch_delete(&self, keys: &[String]) -> Result<BatchDeleteOutcome> {
        if keys.len() > MAX_BATCH_DELETE_KEYS {
            return Err(Error::store_write_failed(format!(
                "batch of {} keys exceeds the limit of {MAX_BATCH_DELETE_KEYS}",
                keys.len()
            )));
        }

        let _guard = self.write_lock.lock().await;
        let mut records = self.load().await?;
        for key in keys {
            records.remove(key);
        }
        self.save(records).await?;

        Ok(BatchDeleteOutcome {
            deleted: keys.len(),
            unprocessed: Vec::new(),
        })
    }

    async fn put(&self, record: SeedRecord) -> Result<()> {
        self.write(record, None).await
    }

    async fn put_if(&self, record: SeedRecord, condition: &ScanPredicate<'_>) -> Result<()> {
        self.write(record, Some(condition)).await
    }
}

impl JsonFileStore {
    async fn write(
        &self,
        record: SeedRecord,
        condition: Option<&ScanPredicate<'_>>,
    ) -> Result<()> {
        let key = write_key(&record, &self.hash_key)?;

        let _guard = self.write_lock.lock().await;
        let mut records = self.load().await?;
        if let (Some(condition), Some(current)) = (condition, records.get(&key)) {
            if !condition(current) {
                return Err(condition_failed(key));
            }
        }
        records.insert(key.clone(), record);
        self.save(records).await.map_err(|e| e.with_key(key))
    }
}

/// Provider keeping one [`JsonFileStore`] per table in a directory.
#[derive(Debug, Clone)]
pub struct DirectoryStoreProvider {
    root: PathBuf,
}

impl DirectoryStoreProvider {
    /// Create a provider rooted at `root`.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Root directory.
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Path of the file backing a table.
    pub fn table_path(&self, table_name: &str) -> PathBuf {
        self.root.join(format!("{table_name}.json"))
    }
}

/// Table names follow the usual managed key-value store rules: 3 to 255
/// characters from `[A-Za-z0-9_.-]`.
fn validate_table_name(table_name: &str) -> Result<()> {
    let valid_len = (3..=255).contains(&table_name.len());
    let valid_chars = table_name
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '-' | '.'));

    if valid_len && valid_chars {
        Ok(())
    } else {
        Err(Error::store_unavailable(format!(
            "invalid table name '{table_name}'"
        )))
    }
}

#[async_trait]
impl StoreProvider for DirectoryStoreProvider {
    async fn open(&self, table_name: &str, hash_key: &str) -> Result<Arc<dyn Store>> {
        validate_table_name(table_name)?;
        tokio::fs::create_dir_all(&self.root).await.map_err(|e| {
            Error::store_unavailable(format!("{}: {e}", self.root.display()))
        })?;

        let store = JsonFileStore::open(self.table_path(table_name), table_name, hash_key).await?;
        Ok(Arc::new(store))
    }
}
