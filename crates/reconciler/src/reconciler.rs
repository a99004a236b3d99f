//! Reconciler implementation.

use std::collections::HashSet;

use futures::stream::{self, StreamExt};
use itertools::Itertools;
use tracing::{debug, info, warn};

use crate::batch::DeleteBatch;
use crate::error::{Error, Result};
use crate::ownership::OwnershipMarker;
use crate::store::{MAX_BATCH_DELETE_KEYS, ScanPredicate, Store};
use crate::types::{Declaration, KeyedRecord, ReconcileSummary, SeedRecord};

/// Configuration for the reconciler.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReconcilerConfig {
    /// Keys per batch delete call.
    pub delete_batch_size: usize,
    /// Puts in flight at once.
    pub upsert_concurrency: usize,
}

impl Default for ReconcilerConfig {
    fn default() -> Self {
        Self {
            delete_batch_size: MAX_BATCH_DELETE_KEYS,
            upsert_concurrency: 8,
        }
    }
}

impl ReconcilerConfig {
    /// Check the values are usable.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidConfig`] for a batch size outside
    /// `1..=MAX_BATCH_DELETE_KEYS` or a zero concurrency.
    pub fn validate(&self) -> Result<()> {
        if !(1..=MAX_BATCH_DELETE_KEYS).contains(&self.delete_batch_size) {
            return Err(Error::invalid_config(format!(
                "delete_batch_size must be between 1 and {MAX_BATCH_DELETE_KEYS}, got {}",
                self.delete_batch_size
            )));
        }
        if self.upsert_concurrency == 0 {
            return Err(Error::invalid_config("upsert_concurrency must be at least 1"));
        }
        Ok(())
    }
}

/// Replaces the owned records of a table with a declared set.
///
/// Reconciliation is purge-then-install: every owned record is deleted, then
/// every declared record is written with the ownership marker. Records
/// without the marker are never touched.
#[derive(Debug, Clone, Default)]
pub struct Reconciler {
    marker: OwnershipMarker,
    config: ReconcilerConfig,
}

impl Reconciler {
    /// Create a new reconciler.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidConfig`] if the configuration does not validate.
    pub fn new(marker: OwnershipMarker, config: ReconcilerConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self { marker, config })
    }

    /// Make the table's owned records equal the declaration.
    ///
    /// The declaration is validated before the store is touched, so a
    /// malformed declaration never causes a partial purge. A declared key
    /// already held by a record without the ownership marker fails the whole
    /// reconciliation before anything is deleted; that record is never
    /// overwritten.
    ///
    /// # Errors
    ///
    /// - [`Error::KeySchemaMismatch`] if the table is keyed on another attribute
    /// - [`Error::MissingKey`] / [`Error::MalformedDeclaration`] for bad records
    /// - [`Error::StoreUnavailable`] if the scan fails or returns owned
    ///   records without a key
    /// - [`Error::StoreWriteFailed`] if a declared key belongs to a foreign
    ///   record, or any delete or put fails
    pub async fn reconcile(
        &self,
        store: &dyn Store,
        hash_key: &str,
        declaration: &Declaration,
    ) -> Result<ReconcileSummary> {
        check_schema(store, hash_key)?;
        let resolved = declaration.resolve(hash_key)?;
        let duplicates_collapsed = declaration.len().saturating_sub(resolved.len());

        info!(
            table = store.table_name(),
            declared = declaration.len(),
            distinct = resolved.len(),
            "Starting reconciliation"
        );

        let (owned, conflict) = self.scan_claims(store, &resolved).await?;
        if let Some(key) = conflict {
            warn!(table = store.table_name(), key = %key, "Declared key belongs to a foreign record");
            return Err(Error::store_write_failed_for(
                key,
                "key is held by a record without the ownership marker",
            ));
        }

        let purged = self.purge_keys(store, owned).await?;
        let installed = self.install(store, resolved).await?;

        let summary = ReconcileSummary {
            purged,
            installed,
            duplicates_collapsed,
        };
        info!(
            table = store.table_name(),
            purged = summary.purged,
            installed = summary.installed,
            duplicates = summary.duplicates_collapsed,
            "Reconciliation complete"
        );

        Ok(summary)
    }

    /// Delete every owned record, leaving the rest of the table alone.
    ///
    /// Returns the number of records deleted.
    ///
    /// # Errors
    ///
    /// Returns [`Error::StoreUnavailable`] if the scan fails and
    /// [`Error::StoreWriteFailed`] if any owned record could not be deleted.
    pub async fn purge(&self, store: &dyn Store) -> Result<usize> {
        let keys = self.owned_keys(store).await?;
        self.purge_keys(store, keys).await
    }

    async fn purge_keys(&self, store: &dyn Store, keys: Vec<String>) -> Result<usize> {
        debug!(table = store.table_name(), owned = keys.len(), "Purging owned records");

        let mut batch = DeleteBatch::new(store, self.config.delete_batch_size);
        let queued = enqueue_all(&mut batch, keys).await;
        let finished = batch.finish().await;
        queued?;
        finished
    }

    /// Keys of every owned record currently in the table.
    ///
    /// # Errors
    ///
    /// Returns [`Error::StoreUnavailable`] if the scan fails or an owned
    /// record has no string key, since such a record can never be purged.
    pub async fn owned_keys(&self, store: &dyn Store) -> Result<Vec<String>> {
        let marker = &self.marker;
        let owned = scan(store, &|record| marker.is_owned(record)).await?;
        owned_record_keys(store, &owned)
    }

    /// One scan for both the owned keys and the first declared key held by
    /// a foreign record.
    async fn scan_claims(
        &self,
        store: &dyn Store,
        declared: &[KeyedRecord],
    ) -> Result<(Vec<String>, Option<String>)> {
        let marker = &self.marker;
        let hash_key = store.hash_key();
        let claimed: HashSet<&str> = declared.iter().map(|r| r.key.as_str()).collect();

        let records = scan(store, &|record| {
            marker.is_owned(record) || record.key(hash_key).is_some_and(|k| claimed.contains(k))
        })
        .await?;

        let (owned, foreign): (Vec<SeedRecord>, Vec<SeedRecord>) =
            records.into_iter().partition(|record| marker.is_owned(record));
        let foreign_keys: HashSet<&str> = foreign.iter().filter_map(|r| r.key(hash_key)).collect();
        let conflict = declared
            .iter()
            .find(|r| foreign_keys.contains(r.key.as_str()))
            .map(|r| r.key.clone());

        Ok((owned_record_keys(store, &owned)?, conflict))
    }

    async fn install(&self, store: &dyn Store, records: Vec<KeyedRecord>) -> Result<usize> {
        let total = records.len();
        let marker = &self.marker;
        let results: Vec<Result<()>> = stream::iter(records)
            .map(|KeyedRecord { key, record }| {
                let record = marker.mark(record);
                async move {
                    let free_or_owned = |current: &SeedRecord| marker.is_owned(current);
                    store.put_if(record, &free_or_owned).await.map_err(|e| match e {
                        Error::StoreWriteFailed { .. } => e.with_key(key),
                        other => Error::store_write_failed_for(key, other.to_string()),
                    })
                }
            })
            .buffered(self.config.upsert_concurrency)
            .collect()
            .await;

        let failures = results.into_iter().filter_map(Result::err).collect_vec();
        match failures.into_iter().next() {
            None => Ok(total),
            Some(first) => {
                warn!(table = store.table_name(), error = %first, "Install failed");
                Err(first)
            }
        }
    }

    /// The ownership marker.
    pub fn marker(&self) -> &OwnershipMarker {
        &self.marker
    }

    /// Get the configuration.
    pub fn config(&self) -> &ReconcilerConfig {
        &self.config
    }
}

async fn scan(store: &dyn Store, predicate: &ScanPredicate<'_>) -> Result<Vec<SeedRecord>> {
    store.scan(predicate).await.map_err(|e| match e {
        Error::StoreUnavailable { .. } => e,
        other => Error::store_unavailable(other.to_string()),
    })
}

fn owned_record_keys(store: &dyn Store, owned: &[SeedRecord]) -> Result<Vec<String>> {
    let hash_key = store.hash_key();
    let (keys, unkeyed): (Vec<String>, Vec<usize>) = owned
        .iter()
        .enumerate()
        .map(|(index, record)| record.key(hash_key).map(str::to_string).ok_or(index))
        .partition_result();

    if unkeyed.is_empty() {
        return Ok(keys);
    }

    warn!(
        table = store.table_name(),
        count = unkeyed.len(),
        "Owned records without a key cannot be purged"
    );
    Err(Error::store_unavailable(format!(
        "{} owned records in table '{}' have no string '{hash_key}' attribute",
        unkeyed.len(),
        store.table_name()
    )))
}

fn check_schema(store: &dyn Store, hash_key: &str) -> Result<()> {
    if store.hash_key() == hash_key {
        Ok(())
    } else {
        Err(Error::key_schema_mismatch(
            store.table_name(),
            store.hash_key(),
            hash_key,
        ))
    }
}

async fn enqueue_all(batch: &mut DeleteBatch<'_>, keys: Vec<String>) -> Result<()> {
    for key in keys {
        batch.enqueue(key).await?;
    }
    Ok(())
}

/// Builder for Reconciler.
#[derive(Debug, Default)]
pub struct ReconcilerBuilder {
    marker: OwnershipMarker,
    config: ReconcilerConfig,
}

impl ReconcilerBuilder {
    /// Create a new builder.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the ownership marker attribute name.
    #[must_use]
    pub fn marker_attribute(mut self, attribute: impl Into<String>) -> Self {
        self.marker = OwnershipMarker::new(attribute);
        self
    }

    /// Set the configuration.
    #[must_use]
    pub fn with_config(mut self, config: ReconcilerConfig) -> Self {
        self.config = config;
        self
    }

    /// Set keys per batch delete call.
    #[must_use]
    pub const fn delete_batch_size(mut self, size: usize) -> Self {
        self.config.delete_batch_size = size;
        self
    }

    /// Set puts in flight at once.
    #[must_use]
    pub const fn upsert_concurrency(mut self, concurrency: usize) -> Self {
        self.config.upsert_concurrency = concurrency;
        self
    }

    /// Build the reconciler.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidConfig`] if the configuration does not validate.
    pub fn build(self) -> Result<Reconciler> {
        Reconciler::new(self.marker, self.config)
    }
}
