//! Lifecycle event dispatch for seedkeeper.
//!
//! An orchestrator announces that a managed resource is being created,
//! updated or deleted. This crate:
//!
//! - **Parses** the event envelope into a validated [`LifecycleEvent`]
//! - **Dispatches** Create/Update to the reconciler; Delete follows a [`DeletePolicy`]
//! - **Reports** exactly one [`OutcomeReport`] per event through a [`Reporter`]
//!
//! Failures are reported first and then returned, so the invoking runtime
//! still sees them.
//!
//! # Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use seedkeeper_events::{Dispatcher, DispatcherConfig, StdoutReporter};
//! use seedkeeper_reconciler::{InMemoryStoreProvider, Reconciler};
//!
//! #[tokio::main]
//! async fn main() {
//!     let dispatcher = Dispatcher::new(
//!         Reconciler::default(),
//!         Arc::new(InMemoryStoreProvider::new()),
//!         Arc::new(StdoutReporter),
//!         DispatcherConfig::default(),
//!     );
//!
//!     let raw = r#"{"RequestType":"Create","ResourceProperties":
//!         {"HashKey":"Id","TableName":"seeds","Items":"[{\"Id\":\"0\"}]"}}"#;
//!     dispatcher.dispatch(raw).await.unwrap();
//! }
//! ```

#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![forbid(clippy::panic)]

pub mod dispatcher;
pub mod error;
pub mod event;
pub mod outcome;
pub mod reporter;

// Re-export main types
pub use dispatcher::{DeletePolicy, DispatchReport, DispatchState, Dispatcher, DispatcherConfig};
pub use error::{Error, Result};
pub use event::{LifecycleEvent, LifecycleRequest, RequestType, ResponseContext, TableTarget};
pub use outcome::{OutcomeReport, OutcomeStatus};
pub use reporter::{
    HttpReporter, RecordedReport, RecordingReporter, Reporter, StdoutReporter, response_document,
};
