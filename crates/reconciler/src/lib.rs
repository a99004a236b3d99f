//! Purge-then-install reconciliation of seed records.
//!
//! This crate keeps a declared set of records in a key-value table while
//! sharing that table with other writers:
//!
//! - **Ownership**: records written here carry a boolean marker attribute
//! - **Purge**: every marked record is deleted in batches
//! - **Install**: every declared record is marked and written by key
//!
//! Records without the marker are never read back, deleted or overwritten.
//! Running the same declaration twice leaves the table unchanged.
//!
//! # Example
//!
//! ```ignore
//! use seedkeeper_reconciler::{Declaration, InMemoryStore, Reconciler};
//!
//! #[tokio::main]
//! async fn main() {
//!     let store = InMemoryStore::new("seeds", "Id");
//!     let reconciler = Reconciler::default();
//!
//!     let declaration = Declaration::parse(r#"[{"Id":"0","Name":"Foo"}]"#).unwrap();
//!     let summary = reconciler.reconcile(&store, "Id", &declaration).await.unwrap();
//!     println!("installed {}", summary.installed);
//! }
//! ```

#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![forbid(clippy::panic)]

pub mod batch;
pub mod error;
pub mod file_store;
pub mod ownership;
pub mod reconciler;
pub mod store;
pub mod types;

// Re-export main types
pub use batch::DeleteBatch;
pub use error::{Error, Result};
pub use file_store::{DirectoryStoreProvider, JsonFileStore};
pub use ownership::{DEFAULT_MARKER_ATTRIBUTE, OwnershipMarker};
pub use reconciler::{Reconciler, ReconcilerBuilder, ReconcilerConfig};
pub use store::{
    BatchDeleteOutcome, InMemoryStore, InMemoryStoreProvider, MAX_BATCH_DELETE_KEYS,
    ScanPredicate, Store, StoreProvider, StoreStats, TracingStore, TracingStoreProvider,
    UnprocessedKey,
};
pub use types::{Declaration, KeyedRecord, ReconcileSummary, SeedRecord};
