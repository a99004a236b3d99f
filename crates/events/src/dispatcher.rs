//! Lifecycle dispatcher.
//!
//! Turns one lifecycle event into at most one reconciliation and exactly one
//! outcome report.

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use seedkeeper_reconciler::{ReconcileSummary, Reconciler, StoreProvider};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, error, info, warn};

use crate::error::{Error, Result};
use crate::event::{LifecycleEvent, LifecycleRequest, RequestType, ResponseContext};
use crate::outcome::OutcomeReport;
use crate::reporter::Reporter;

/// Dispatch state machine.
///
/// `Received → {Creating, Updating, Deleting} → {Completed, Failed}`, plus
/// `Received → Failed` for events that never got as far as a handler.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DispatchState {
    /// Event accepted, not yet interpreted.
    Received,
    /// Handling a Create.
    Creating,
    /// Handling an Update.
    Updating,
    /// Handling a Delete.
    Deleting,
    /// Handled successfully.
    Completed,
    /// Handling failed.
    Failed,
}

impl DispatchState {
    /// Whether `next` may follow this state.
    pub const fn can_transition_to(self, next: Self) -> bool {
        matches!(
            (self, next),
            (
                Self::Received,
                Self::Creating | Self::Updating | Self::Deleting | Self::Failed
            ) | (
                Self::Creating | Self::Updating | Self::Deleting,
                Self::Completed | Self::Failed
            )
        )
    }

    /// Whether no further transition is possible.
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }

    /// The handling state for a request type.
    pub const fn for_request(request_type: RequestType) -> Self {
        match request_type {
            RequestType::Create => Self::Creating,
            RequestType::Update => Self::Updating,
            RequestType::Delete => Self::Deleting,
        }
    }
}

impl fmt::Display for DispatchState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Received => "received",
            Self::Creating => "creating",
            Self::Updating => "updating",
            Self::Deleting => "deleting",
            Self::Completed => "completed",
            Self::Failed => "failed",
        };
        f.write_str(name)
    }
}

/// What a Delete does to the owned records.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeletePolicy {
    /// Leave seeded records in the table.
    #[default]
    Retain,
    /// Delete every owned record. Records of other writers stay.
    Purge,
}

impl FromStr for DeletePolicy {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "retain" => Ok(Self::Retain),
            "purge" => Ok(Self::Purge),
            other => Err(format!("unknown delete policy '{other}' (expected retain or purge)")),
        }
    }
}

/// Configuration for the dispatcher.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DispatcherConfig {
    /// Behavior on Delete.
    pub delete_policy: DeletePolicy,
    /// Deadline for handling one event, report excluded.
    pub invocation_timeout: Option<Duration>,
}

/// Result of a successfully handled event.
#[derive(Debug, Clone, PartialEq)]
pub struct DispatchReport {
    /// Request type of the event.
    pub request_type: RequestType,
    /// States visited, in order.
    pub states: Vec<DispatchState>,
    /// The report that was delivered.
    pub outcome: OutcomeReport,
    /// What the store work did, if any was done.
    pub summary: Option<ReconcileSummary>,
}

impl DispatchReport {
    /// The state the dispatch ended in.
    pub fn final_state(&self) -> DispatchState {
        self.states
            .last()
            .copied()
            .unwrap_or(DispatchState::Received)
    }
}

struct StateMachine {
    states: Vec<DispatchState>,
}

impl StateMachine {
    fn new() -> Self {
        Self {
            states: vec![DispatchState::Received],
        }
    }

    fn current(&self) -> DispatchState {
        self.states
            .last()
            .copied()
            .unwrap_or(DispatchState::Received)
    }

    fn advance(&mut self, next: DispatchState) -> Result<()> {
        let current = self.current();
        if !current.can_transition_to(next) {
            return Err(Error::invalid_transition(current.to_string(), next.to_string()));
        }
        debug!(from = %current, to = %next, "State transition");
        self.states.push(next);
        Ok(())
    }

    fn fail(&mut self) {
        let current = self.current();
        if current.can_transition_to(DispatchState::Failed) {
            debug!(from = %current, to = %DispatchState::Failed, "State transition");
            self.states.push(DispatchState::Failed);
        }
    }
}

/// Interprets lifecycle events and reports their outcome.
pub struct Dispatcher {
    reconciler: Reconciler,
    stores: Arc<dyn StoreProvider>,
    reporter: Arc<dyn Reporter>,
    config: DispatcherConfig,
}

impl Dispatcher {
    /// Create a new dispatcher.
    pub fn new(
        reconciler: Reconciler,
        stores: Arc<dyn StoreProvider>,
        reporter: Arc<dyn Reporter>,
        config: DispatcherConfig,
    ) -> Self {
        Self {
            reconciler,
            stores,
            reporter,
            config,
        }
    }

    /// Handle a raw event envelope.
    ///
    /// Exactly one outcome is reported, whatever happens. On failure the
    /// `Failure` report is delivered first and the error is then returned.
    ///
    /// # Errors
    ///
    /// Returns the first error hit while parsing or handling the event, or
    /// [`Error::ReportFailed`] if handling succeeded but the report could not
    /// be delivered.
    pub async fn dispatch(&self, raw: &str) -> Result<DispatchReport> {
        match serde_json::from_str::<Value>(raw) {
            Ok(value) => self.dispatch_value(value).await,
            Err(e) => {
                let error = Error::malformed_event(format!("invalid JSON: {e}"));
                self.fail(StateMachine::new(), &ResponseContext::default(), error)
                    .await
            }
        }
    }

    /// Handle a decoded event envelope.
    ///
    /// # Errors
    ///
    /// Same as [`Dispatcher::dispatch`].
    pub async fn dispatch_value(&self, value: Value) -> Result<DispatchReport> {
        let context = ResponseContext::extract(&value);
        match LifecycleEvent::from_value(value) {
            Ok(event) => self.dispatch_event(event).await,
            Err(error) => self.fail(StateMachine::new(), &context, error).await,
        }
    }

    /// Handle an already validated event.
    ///
    /// # Errors
    ///
    /// Same as [`Dispatcher::dispatch`].
    pub async fn dispatch_event(&self, event: LifecycleEvent) -> Result<DispatchReport> {
        let request_type = event.request_type();
        let context = event
            .context
            .clone()
            .with_default_physical_id(event.physical_resource_id());

        info!(
            request_type = %request_type,
            table = %event.target.table_name,
            request_id = context.request_id.as_deref().unwrap_or_default(),
            "Dispatching lifecycle event"
        );

        let mut machine = StateMachine::new();
        let handled = self.handle(&mut machine, &event).await;
        let handled = handled.and_then(|summary| {
            machine.advance(DispatchState::Completed)?;
            Ok(summary)
        });

        match handled {
            Ok(summary) => {
                let outcome = OutcomeReport::success();
                self.reporter.report(&context, &outcome).await?;
                info!(request_type = %request_type, "Lifecycle event completed");
                Ok(DispatchReport {
                    request_type,
                    states: machine.states,
                    outcome,
                    summary,
                })
            }
            Err(error) => self.fail(machine, &context, error).await,
        }
    }

    async fn handle(
        &self,
        machine: &mut StateMachine,
        event: &LifecycleEvent,
    ) -> Result<Option<ReconcileSummary>> {
        machine.advance(DispatchState::for_request(event.request_type()))?;

        let work = self.perform(event);
        match self.config.invocation_timeout {
            Some(limit) => tokio::time::timeout(limit, work)
                .await
                .map_err(|_| Error::timed_out(limit))?,
            None => work.await,
        }
    }

    async fn perform(&self, event: &LifecycleEvent) -> Result<Option<ReconcileSummary>> {
        let target = &event.target;
        match &event.request {
            LifecycleRequest::Create { declaration } | LifecycleRequest::Update { declaration } => {
                let store = self.stores.open(&target.table_name, &target.hash_key).await?;
                let summary = self
                    .reconciler
                    .reconcile(store.as_ref(), &target.hash_key, declaration)
                    .await?;
                Ok(Some(summary))
            }
            LifecycleRequest::Delete => match self.config.delete_policy {
                DeletePolicy::Retain => {
                    info!(table = %target.table_name, "Delete requested; retaining seeded records");
                    Ok(None)
                }
                DeletePolicy::Purge => {
                    let store = self.stores.open(&target.table_name, &target.hash_key).await?;
                    let purged = self.reconciler.purge(store.as_ref()).await?;
                    info!(table = %target.table_name, purged, "Delete requested; owned records purged");
                    Ok(Some(ReconcileSummary {
                        purged,
                        ..ReconcileSummary::default()
                    }))
                }
            },
        }
    }

    /// Report the failure, then hand the error back.
    async fn fail(
        &self,
        mut machine: StateMachine,
        context: &ResponseContext,
        error: Error,
    ) -> Result<DispatchReport> {
        machine.fail();
        error!(
            code = error.code(),
            error = %error,
            states = ?machine.states,
            "Lifecycle event failed"
        );

        let outcome = OutcomeReport::failure(format!("{}: {error}", error.code()));
        if let Err(report_error) = self.reporter.report(context, &outcome).await {
            warn!(error = %report_error, "Failure report could not be delivered");
        }

        Err(error)
    }

    /// The reconciler.
    pub fn reconciler(&self) -> &Reconciler {
        &self.reconciler
    }

    /// Get the configuration.
    pub fn config(&self) -> &DispatcherConfig {
        &self.config
    }
}

#[cfg(test)]
#[allow(clippy::expect_used, clippy::unwrap_used, clippy::indexing_slicing)]
mod tests {
    use super::*;
    use crate::reporter::RecordingReporter;
    use seedkeeper_reconciler::{InMemoryStore, InMemoryStoreProvider, SeedRecord, Store};
    use serde_json::json;

    struct Harness {
        dispatcher: Dispatcher,
        provider: Arc<InMemoryStoreProvider>,
        reporter: Arc<RecordingReporter>,
    }

    fn harness(config: DispatcherConfig) -> Harness {
        let provider = Arc::new(InMemoryStoreProvider::new());
        let reporter = Arc::new(RecordingReporter::new());
        let dispatcher = Dispatcher::new(
            Reconciler::default(),
            provider.clone(),
            reporter.clone(),
            config,
        );
        Harness {
            dispatcher,
            provider,
            reporter,
        }
    }

    fn event(request_type: &str, items: &str) -> Value {
        json!({
            "RequestType": request_type,
            "RequestId": "req-1",
            "ResourceProperties": {
                "HashKey": "Id",
                "TableName": "seeds",
                "Items": items
            }
        })
    }

    async fn table(h: &Harness) -> Arc<InMemoryStore> {
        h.provider.table("seeds").await.unwrap()
    }

    #[tokio::test]
    async fn test_create_reports_success() {
        let h = harness(DispatcherConfig::default());
        let report = h
            .dispatcher
            .dispatch_value(event("Create", r#"[{"Id":"0","Name":"Foo"}]"#))
            .await
            .unwrap();

        assert_eq!(
            report.states,
            vec![
                DispatchState::Received,
                DispatchState::Creating,
                DispatchState::Completed
            ]
        );
        assert_eq!(report.outcome, OutcomeReport::success());
        assert_eq!(report.summary.map(|s| s.installed), Some(1));

        let recorded = h.reporter.reports().await;
        assert_eq!(recorded.len(), 1);
        assert!(recorded[0].outcome.is_success());
        assert_eq!(
            recorded[0].context.physical_resource_id.as_deref(),
            Some("seedkeeper-seeds")
        );
    }

    #[tokio::test]
    async fn test_update_uses_updating_state() {
        let h = harness(DispatcherConfig::default());
        let report = h
            .dispatcher
            .dispatch_value(event("Update", "[]"))
            .await
            .unwrap();
        assert!(report.states.contains(&DispatchState::Updating));
        assert_eq!(report.final_state(), DispatchState::Completed);
    }

    #[tokio::test]
    async fn test_unknown_request_type_fails_without_mutation() {
        let h = harness(DispatcherConfig::default());
        let err = h
            .dispatcher
            .dispatch_value(event("Foo", r#"[{"Id":"0"}]"#))
            .await
            .unwrap_err();

        assert_eq!(err, Error::unknown_request_type("Foo"));
        assert!(h.provider.table("seeds").await.is_none());

        let last = h.reporter.last().await.unwrap();
        assert_eq!(h.reporter.count().await, 1);
        assert!(!last.outcome.is_success());
        assert_eq!(last.context.request_id.as_deref(), Some("req-1"));
    }

    #[tokio::test]
    async fn test_invalid_json_still_reports() {
        let h = harness(DispatcherConfig::default());
        let err = h.dispatcher.dispatch("{not json").await.unwrap_err();

        assert_eq!(err.code(), "MalformedEvent");
        assert_eq!(h.reporter.count().await, 1);
    }

    #[tokio::test]
    async fn test_delete_retains_records() {
        let h = harness(DispatcherConfig::default());
        h.dispatcher
            .dispatch_value(event("Create", r#"[{"Id":"0"}]"#))
            .await
            .unwrap();
        let before = table(&h).await.snapshot().await;

        let report = h
            .dispatcher
            .dispatch_value(event("Delete", ""))
            .await
            .unwrap();

        assert_eq!(report.outcome, OutcomeReport::success());
        assert!(report.summary.is_none());
        assert_eq!(table(&h).await.snapshot().await, before);
        assert_eq!(h.reporter.count().await, 2);
    }

    #[tokio::test]
    async fn test_delete_purge_policy() {
        let h = harness(DispatcherConfig {
            delete_policy: DeletePolicy::Purge,
            ..DispatcherConfig::default()
        });
        h.dispatcher
            .dispatch_value(event("Create", r#"[{"Id":"0"},{"Id":"1"}]"#))
            .await
            .unwrap();
        let foreign = SeedRecord::new().with("Id", "user");
        table(&h).await.insert_raw(vec![foreign.clone()]).await.unwrap();

        let report = h
            .dispatcher
            .dispatch_value(event("Delete", ""))
            .await
            .unwrap();

        assert_eq!(report.summary.map(|s| s.purged), Some(2));
        assert_eq!(table(&h).await.snapshot().await, vec![foreign]);
    }

    #[tokio::test]
    async fn test_reconcile_failure_reports_then_returns_error() {
        let h = harness(DispatcherConfig::default());
        let store = InMemoryStore::new_arc("seeds", "Id");
        store.fail_put("0").await;
        h.provider.insert(store).await;

        let err = h
            .dispatcher
            .dispatch_value(event("Create", r#"[{"Id":"0"}]"#))
            .await
            .unwrap_err();

        assert_eq!(err.code(), "StoreWriteFailed");
        let last = h.reporter.last().await.unwrap();
        assert_eq!(h.reporter.count().await, 1);
        assert!(last.outcome.reason().unwrap().starts_with("StoreWriteFailed"));
    }

    #[tokio::test]
    async fn test_missing_key_fails_before_store_is_opened() {
        let h = harness(DispatcherConfig::default());
        let err = h
            .dispatcher
            .dispatch_value(event("Create", r#"[{"Name":"x"}]"#))
            .await
            .unwrap_err();

        assert_eq!(err.code(), "MissingKey");
        assert!(h.provider.table("seeds").await.is_none());
        assert_eq!(h.reporter.count().await, 1);
    }

    #[test]
    fn test_state_transitions() {
        use DispatchState::*;
        assert!(Received.can_transition_to(Creating));
        assert!(Received.can_transition_to(Failed));
        assert!(Deleting.can_transition_to(Completed));
        assert!(!Received.can_transition_to(Completed));
        assert!(!Completed.can_transition_to(Failed));
        assert!(!Failed.can_transition_to(Creating));
        assert!(Completed.is_terminal());
    }

    #[test]
    fn test_state_machine_rejects_invalid_transition() {
        let mut machine = StateMachine::new();
        assert!(machine.advance(DispatchState::Completed).is_err());
        machine.advance(DispatchState::Deleting).unwrap();
        machine.advance(DispatchState::Completed).unwrap();
        machine.fail();
        assert_eq!(machine.current(), DispatchState::Completed);
    }

    #[test]
    fn test_delete_policy_from_str() {
        assert_eq!("Purge".parse::<DeletePolicy>(), Ok(DeletePolicy::Purge));
        assert_eq!("retain".parse::<DeletePolicy>(), Ok(DeletePolicy::Retain));
        assert!("drop".parse::<DeletePolicy>().is_err());
    }

    #[tokio::test]
    async fn test_opened_store_is_keyed_on_event_hash_key() {
        let h = harness(DispatcherConfig::default());
        h.dispatcher
            .dispatch_value(event("Create", "[]"))
            .await
            .unwrap();
        assert_eq!(table(&h).await.hash_key(), "Id");
    }
}
