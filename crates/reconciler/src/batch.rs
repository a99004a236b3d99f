//! Scoped batch delete.
//!
//! Keys are queued and sent to the store in chunks. Callers must end the
//! scope with [`DeleteBatch::finish`], on the error path too, so queued keys
//! are always flushed before an error propagates.

use tracing::{debug, warn};

use crate::error::{Error, Result};
use crate::store::{MAX_BATCH_DELETE_KEYS, Store, UnprocessedKey};

/// Queue of keys to delete from one store.
pub struct DeleteBatch<'a> {
    store: &'a dyn Store,
    capacity: usize,
    pending: Vec<String>,
    deleted: usize,
    unprocessed: Vec<UnprocessedKey>,
    finished: bool,
}

impl<'a> DeleteBatch<'a> {
    /// Open a batch sending at most `capacity` keys per call.
    ///
    /// The capacity is clamped to `1..=MAX_BATCH_DELETE_KEYS`.
    pub fn new(store: &'a dyn Store, capacity: usize) -> Self {
        let capacity = capacity.clamp(1, MAX_BATCH_DELETE_KEYS);
        Self {
            store,
            capacity,
            pending: Vec::with_capacity(capacity),
            deleted: 0,
            unprocessed: Vec::new(),
            finished: false,
        }
    }

    /// Queue a key, flushing when the batch is full.
    ///
    /// # Errors
    ///
    /// Propagates a store error from the flush this call triggered.
    pub async fn enqueue(&mut self, key: String) -> Result<()> {
        self.pending.push(key);
        if self.pending.len() >= self.capacity {
            self.flush().await?;
        }
        Ok(())
    }

    /// Send all queued keys now.
    ///
    /// # Errors
    ///
    /// Propagates a store error. The keys of the failed call are not retried.
    pub async fn flush(&mut self) -> Result<()> {
        if self.pending.is_empty() {
            return Ok(());
        }

        let keys = std::mem::take(&mut self.pending);
        debug!(
            table = self.store.table_name(),
            keys = keys.len(),
            "Flushing delete batch"
        );

        let outcome = self.store.batch_delete(&keys).await?;
        self.deleted = self.deleted.saturating_add(outcome.deleted);
        self.unprocessed.extend(outcome.unprocessed);
        Ok(())
    }

    /// Flush what is left and close the batch.
    ///
    /// Returns the number of keys deleted.
    ///
    /// # Errors
    ///
    /// Returns the flush error, or [`Error::StoreWriteFailed`] naming the
    /// first key the store left behind in any call.
    pub async fn finish(mut self) -> Result<usize> {
        let flushed = self.flush().await;
        self.finished = true;
        flushed?;

        match self.unprocessed.first() {
            None => Ok(self.deleted),
            Some(first) => {
                warn!(
                    table = self.store.table_name(),
                    deleted = self.deleted,
                    unprocessed = self.unprocessed.len(),
                    "Purge left records behind"
                );
                Err(Error::store_write_failed_for(
                    first.key.clone(),
                    format!(
                        "{} of {} keys not deleted: {}",
                        self.unprocessed.len(),
                        self.unprocessed.len().saturating_add(self.deleted),
                        first.reason
                    ),
                ))
            }
        }
    }

    /// Keys queued but not yet sent.
    pub fn pending(&self) -> usize {
        self.pending.len()
    }
}

impl Drop for DeleteBatch<'_> {
    fn drop(&mut self) {
        if !self.finished && !self.pending.is_empty() {
            warn!(
                table = self.store.table_name(),
                pending = self.pending.len(),
                "Delete batch dropped without finish; queued keys were not deleted"
            );
        }
    }
}
