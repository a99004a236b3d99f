//! Store trait and implementations.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;

use crate::error::{Error, Result};
use crate::types::SeedRecord;

/// Most keys a single batch delete call accepts.
pub const MAX_BATCH_DELETE_KEYS: usize = 25;

/// Predicate applied to every record during a scan.
pub type ScanPredicate<'a> = dyn Fn(&SeedRecord) -> bool + Send + Sync + 'a;

/// A key the store did not delete, and why.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnprocessedKey {
    /// Hash-key value.
    pub key: String,
    /// Reason given by the store.
    pub reason: String,
}

/// Result of a batch delete call that reached the store.
///
/// A call can succeed as a whole and still leave individual keys behind.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchDeleteOutcome {
    /// Keys removed, absent keys included.
    pub deleted: usize,
    /// Keys left in place.
    pub unprocessed: Vec<UnprocessedKey>,
}

impl BatchDeleteOutcome {
    /// Whether every key in the call was processed.
    pub fn is_complete(&self) -> bool {
        self.unprocessed.is_empty()
    }
}

/// A single table keyed on one string attribute.
#[async_trait]
pub trait Store: Send + Sync {
    /// Name of the table.
    fn table_name(&self) -> &str;

    /// Attribute the table is keyed on.
    fn hash_key(&self) -> &str;

    /// Full-table scan returning the records that match the predicate.
    async fn scan(&self, predicate: &ScanPredicate<'_>) -> Result<Vec<SeedRecord>>;

    /// Delete up to [`MAX_BATCH_DELETE_KEYS`] records by key.
    async fn batch_delete(&self, keys: &[String]) -> Result<BatchDeleteOutcome>;

    /// Insert or overwrite a record by its key.
    async fn put(&self, record: SeedRecord) -> Result<()>;

    /// Write a record only if its key is free or the record currently under
    /// that key satisfies `condition`. The check and the write are atomic.
    ///
    /// Fails with [`Error::StoreWriteFailed`] naming the key when the
    /// current record does not satisfy `condition`.
    async fn put_if(&self, record: SeedRecord, condition: &ScanPredicate<'_>) -> Result<()>;
}

/// Hash-key value of a record about to be written.
pub(crate) fn write_key(record: &SeedRecord, hash_key: &str) -> Result<String> {
    record.key(hash_key).map(str::to_string).ok_or_else(|| {
        Error::store_write_failed(format!("record has no string '{hash_key}' attribute"))
    })
}

/// Error for a conditional write refused by the record already stored.
pub(crate) fn condition_failed(key: impl Into<String>) -> Error {
    Error::store_write_failed_for(key, "the stored record does not satisfy the write condition")
}

/// Resolves table names to store handles.
#[async_trait]
pub trait StoreProvider: Send + Sync {
    /// Open the named table, keyed on `hash_key`.
    async fn open(&self, table_name: &str, hash_key: &str) -> Result<Arc<dyn Store>>;
}

/// Call counters for an in-memory store.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StoreStats {
    /// Scan calls.
    pub scans: usize,
    /// Batch delete calls.
    pub batch_deletes: usize,
    /// Put calls.
    pub puts: usize,
}

#[derive(Debug, Default)]
struct Faults {
    scans_unavailable: bool,
    batch_deletes_unavailable: bool,
    rejected_deletes: HashSet<String>,
    failed_puts: HashSet<String>,
}

/// In-memory store for testing.
///
/// Supports fault injection so failure paths can be exercised.
#[derive(Debug)]
pub struct InMemoryStore {
    table_name: String,
    hash_key: String,
    records: RwLock<BTreeMap<String, SeedRecord>>,
    faults: RwLock<Faults>,
    scans: AtomicUsize,
    batch_deletes: AtomicUsize,
    puts: AtomicUsize,
}

impl InMemoryStore {
    /// Create an empty table.
    pub fn new(table_name: impl Into<String>, hash_key: impl Into<String>) -> Self {
        Self {
            table_name: table_name.into(),
            hash_key: hash_key.into(),
            records: RwLock::new(BTreeMap::new()),
            faults: RwLock::new(Faults::default()),
            scans: AtomicUsize::new(0),
            batch_deletes: AtomicUsize::new(0),
            puts: AtomicUsize::new(0),
        }
    }

    /// Create an empty table wrapped in an Arc.
    pub fn new_arc(table_name: impl Into<String>, hash_key: impl Into<String>) -> Arc<Self> {
        Arc::new(Self::new(table_name, hash_key))
    }

    /// Write records directly, as another writer sharing the table would.
    ///
    /// # Errors
    ///
    /// Returns [`Error::MissingKey`] if a record lacks a string hash key.
    pub async fn insert_raw(&self, records: impl IntoIterator<Item = SeedRecord>) -> Result<()> {
        let mut table = self.records.write().await;
        for (index, record) in records.into_iter().enumerate() {
            let key = record
                .key(&self.hash_key)
                .ok_or_else(|| Error::missing_key(&self.hash_key, index))?
                .to_string();
            table.insert(key, record);
        }
        Ok(())
    }

    /// Get a record by key.
    pub async fn get(&self, key: &str) -> Option<SeedRecord> {
        self.records.read().await.get(key).cloned()
    }

    /// All records, ordered by key.
    pub async fn snapshot(&self) -> Vec<SeedRecord> {
        self.records.read().await.values().cloned().collect()
    }

    /// Number of records.
    pub async fn len(&self) -> usize {
        self.records.read().await.len()
    }

    /// Whether the table is empty.
    pub async fn is_empty(&self) -> bool {
        self.records.read().await.is_empty()
    }

    /// Make scans fail with [`Error::StoreUnavailable`].
    pub async fn fail_scans(&self, fail: bool) {
        self.faults.write().await.scans_unavailable = fail;
    }

    /// Make whole batch delete calls fail.
    pub async fn fail_batch_deletes(&self, fail: bool) {
        self.faults.write().await.batch_deletes_unavailable = fail;
    }

    /// Leave this key unprocessed in every batch delete.
    pub async fn reject_delete(&self, key: impl Into<String>) {
        self.faults.write().await.rejected_deletes.insert(key.into());
    }

    /// Fail every put for this key.
    pub async fn fail_put(&self, key: impl Into<String>) {
        self.faults.write().await.failed_puts.insert(key.into());
    }

    /// Call counters.
    pub fn stats(&self) -> StoreStats {
        StoreStats {
            scans: self.scans.load(Ordering::Relaxed),
            batch_deletes: self.batch_deletes.load(Ordering::Relaxed),
            puts: self.puts.load(Ordering::Relaxed),
        }
    }
}

#[async_trait]
impl Store for InMemoryStore {
    fn table_name(&self) -> &str {
        &self.table_name
    }

    fn hash_key(&self) -> &str {
        &self.hash_key
    }

    async fn scan(&self, predicate: &ScanPredicate<'_>) -> Result<Vec<SeedRecord>> {
        self.scans.fetch_add(1, Ordering::Relaxed);
        if self.faults.read().await.scans_unavailable {
            return Err(Error::store_unavailable(format!(
                "table '{}' is not readable",
                self.table_name
            )));
        }

        let records = self.records.read().await;
        Ok(records.values().filter(|r| predicate(r)).cloned().collect())
    }

    async fn batch_delete(&self, keys: &[String]) -> Result<BatchDeleteOutcome> {
        self.batch_deletes.fetch_add(1, Ordering::Relaxed);
        if keys.len() > MAX_BATCH_DELETE_KEYS {
            return Err(Error::store_write_failed(format!(
                "batch of {} keys exceeds the limit of {MAX_BATCH_DELETE_KEYS}",
                keys.len()
            )));
        }

        let faults = self.faults.read().await;
        if faults.batch_deletes_unavailable {
            return Err(Error::store_write_failed(format!(
                "batch delete rejected by table '{}'",
                self.table_name
            )));
        }

        let mut records = self.records.write().await;
        let mut outcome = BatchDeleteOutcome::default();
        for key in keys {
            if faults.rejected_deletes.contains(key) {
                outcome.unprocessed.push(UnprocessedKey {
                    key: key.clone(),
                    reason: "delete rejected".to_string(),
                });
            } else {
                records.remove(key);
                outcome.deleted = outcome.deleted.saturating_add(1);
            }
        }

        Ok(outcome)
    }

    async fn put(&self, record: SeedRecord) -> Result<()> {
        self.write(record, None).await
    }

    async fn put_if(&self, record: SeedRecord, condition: &ScanPredicate<'_>) -> Result<()> {
        self.write(record, Some(condition)).await
    }
}

impl InMemoryStore {
    async fn write(
        &self,
        record: SeedRecord,
        condition: Option<&ScanPredicate<'_>>,
    ) -> Result<()> {
        self.puts.fetch_add(1, Ordering::Relaxed);
        let key = write_key(&record, &self.hash_key)?;

        if self.faults.read().await.failed_puts.contains(&key) {
            return Err(Error::store_write_failed_for(key, "put rejected"));
        }

        let mut records = self.records.write().await;
        if let (Some(condition), Some(current)) = (condition, records.get(&key)) {
            if !condition(current) {
                return Err(condition_failed(key));
            }
        }
        records.insert(key, record);
        Ok(())
    }
}

/// Provider handing out in-memory tables, creating them on first open.
#[derive(Debug, Default)]
pub struct InMemoryStoreProvider {
    tables: RwLock<HashMap<String, Arc<InMemoryStore>>>,
}

impl InMemoryStoreProvider {
    /// Create a provider with no tables.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an existing table.
    pub async fn insert(&self, store: Arc<InMemoryStore>) {
        self.tables
            .write()
            .await
            .insert(store.table_name().to_string(), store);
    }

    /// Look up a table without creating it.
    pub async fn table(&self, table_name: &str) -> Option<Arc<InMemoryStore>> {
        self.tables.read().await.get(table_name).cloned()
    }
}

#[async_trait]
impl StoreProvider for InMemoryStoreProvider {
    async fn open(&self, table_name: &str, hash_key: &str) -> Result<Arc<dyn Store>> {
        let mut tables = self.tables.write().await;
        let store = tables
            .entry(table_name.to_string())
            .or_insert_with(|| InMemoryStore::new_arc(table_name, hash_key))
            .clone();

        if store.hash_key() != hash_key {
            return Err(Error::key_schema_mismatch(
                table_name,
                store.hash_key(),
                hash_key,
            ));
        }

        Ok(store)
    }
}

/// A wrapper that adds tracing to a store.
pub struct TracingStore {
    inner: Arc<dyn Store>,
}

impl TracingStore {
    /// Create a new tracing store.
    pub fn new(inner: Arc<dyn Store>) -> Self {
        Self { inner }
    }
}

#[async_trait]
impl Store for TracingStore {
    fn table_name(&self) -> &str {
        self.inner.table_name()
    }

    fn hash_key(&self) -> &str {
        self.inner.hash_key()
    }

    async fn scan(&self, predicate: &ScanPredicate<'_>) -> Result<Vec<SeedRecord>> {
        tracing::debug!(table = self.table_name(), "Scanning table");
        let result = self.inner.scan(predicate).await;
        if let Ok(ref records) = result {
            tracing::trace!(matched = records.len(), "Scan complete");
        }
        result
    }

    async fn batch_delete(&self, keys: &[String]) -> Result<BatchDeleteOutcome> {
        tracing::debug!(table = self.table_name(), keys = keys.len(), "Batch delete");
        let result = self.inner.batch_delete(keys).await;
        if let Ok(ref outcome) = result {
            tracing::trace!(
                deleted = outcome.deleted,
                unprocessed = outcome.unprocessed.len(),
                "Batch delete complete"
            );
        }
        result
    }

    async fn put(&self, record: SeedRecord) -> Result<()> {
        tracing::debug!(
            table = self.table_name(),
            key = record.key(self.hash_key()).unwrap_or_default(),
            "Putting record"
        );
        self.inner.put(record).await
    }

    async fn put_if(&self, record: SeedRecord, condition: &ScanPredicate<'_>) -> Result<()> {
        tracing::debug!(
            table = self.table_name(),
            key = record.key(self.hash_key()).unwrap_or_default(),
            "Conditionally putting record"
        );
        self.inner.put_if(record, condition).await
    }
}

/// A provider wrapper whose stores are wrapped in [`TracingStore`].
pub struct TracingStoreProvider<P: StoreProvider> {
    inner: P,
}

impl<P: StoreProvider> TracingStoreProvider<P> {
    /// Create a new tracing provider.
    pub fn new(inner: P) -> Self {
        Self { inner }
    }
}

#[async_trait]
impl<P: StoreProvider> StoreProvider for TracingStoreProvider<P> {
    async fn open(&self, table_name: &str, hash_key: &str) -> Result<Arc<dyn Store>> {
        tracing::debug!(table = table_name, hash_key, "Opening table");
        let store = self.inner.open(table_name, hash_key).await?;
        Ok(Arc::new(TracingStore::new(store)))
    }
}
