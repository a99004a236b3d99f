//! Integration tests for lifecycle dispatch.
//!
//! These tests verify that:
//! - Create then Update converges the table onto the latest declaration
//! - Every event produces exactly one outcome report
//! - Failures are reported before they are returned
//! - The invocation deadline turns a stuck store into a failure report

#![allow(clippy::unwrap_used, clippy::expect_used, clippy::indexing_slicing)]

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use proptest::prelude::*;
use seedkeeper_events::{
    DispatchState, Dispatcher, DispatcherConfig, Error, OutcomeReport, RecordingReporter,
    Reporter, ResponseContext,
};
use seedkeeper_reconciler::{
    BatchDeleteOutcome, InMemoryStore, InMemoryStoreProvider, Reconciler, ScanPredicate,
    SeedRecord, Store, StoreProvider,
};
use serde_json::json;

fn envelope(request_type: &str, items: &str) -> String {
    json!({
        "RequestType": request_type,
        "ResponseURL": "https://example.invalid/callback",
        "StackId": "stack-1",
        "RequestId": "req-1",
        "LogicalResourceId": "Seeds",
        "ResourceProperties": {
            "HashKey": "Id",
            "TableName": "seeds",
            "Items": items
        }
    })
    .to_string()
}

fn dispatcher(
    provider: Arc<dyn StoreProvider>,
    reporter: Arc<dyn Reporter>,
    config: DispatcherConfig,
) -> Dispatcher {
    Dispatcher::new(Reconciler::default(), provider, reporter, config)
}

/// Test the create-then-update scenario end to end.
///
/// # GIVEN
/// An empty table
///
/// # WHEN
/// A Create declares Id=0 and Id=1, then an Update declares only Id=1 renamed
///
/// # THEN
/// The table holds exactly one owned record, Id=1 with the new name
#[tokio::test]
async fn test_create_then_update_converges() {
    let provider = Arc::new(InMemoryStoreProvider::new());
    let reporter = Arc::new(RecordingReporter::new());
    let dispatcher = dispatcher(provider.clone(), reporter.clone(), DispatcherConfig::default());

    dispatcher
        .dispatch(&envelope(
            "Create",
            r#"[{"Id":"0","Name":"Foo"},{"Id":"1","Name":"Bar"}]"#,
        ))
        .await
        .unwrap();

    let table = provider.table("seeds").await.unwrap();
    let marker = dispatcher.reconciler().marker().clone();
    assert_eq!(table.len().await, 2);
    assert_eq!(
        table.get("0").await,
        Some(marker.mark(SeedRecord::new().with("Id", "0").with("Name", "Foo")))
    );

    let report = dispatcher
        .dispatch(&envelope("Update", r#"[{"Id":"1","Name":"Baz"}]"#))
        .await
        .unwrap();

    assert_eq!(report.final_state(), DispatchState::Completed);
    assert_eq!(
        table.snapshot().await,
        vec![marker.mark(SeedRecord::new().with("Id", "1").with("Name", "Baz"))]
    );

    let reports = reporter.reports().await;
    assert_eq!(reports.len(), 2);
    assert!(reports.iter().all(|r| r.outcome == OutcomeReport::success()));
    assert_eq!(
        reports[1].context.response_url.as_deref(),
        Some("https://example.invalid/callback")
    );
}

/// A store whose puts never finish in time.
struct SlowStore {
    inner: InMemoryStore,
    delay: Duration,
}

#[async_trait]
impl Store for SlowStore {
    fn table_name(&self) -> &str {
        self.inner.table_name()
    }

    fn hash_key(&self) -> &str {
        self.inner.hash_key()
    }

    async fn scan(
        &self,
        predicate: &ScanPredicate<'_>,
    ) -> seedkeeper_reconciler::Result<Vec<SeedRecord>> {
        self.inner.scan(predicate).await
    }

    async fn batch_delete(
        &self,
        keys: &[String],
    ) -> seedkeeper_reconciler::Result<BatchDeleteOutcome> {
        self.inner.batch_delete(keys).await
    }

    async fn put(&self, record: SeedRecord) -> seedkeeper_reconciler::Result<()> {
        tokio::time::sleep(self.delay).await;
        self.inner.put(record).await
    }

    async fn put_if(
        &self,
        record: SeedRecord,
        condition: &ScanPredicate<'_>,
    ) -> seedkeeper_reconciler::Result<()> {
        tokio::time::sleep(self.delay).await;
        self.inner.put_if(record, condition).await
    }
}

struct SlowProvider {
    store: Arc<SlowStore>,
}

#[async_trait]
impl StoreProvider for SlowProvider {
    async fn open(
        &self,
        _table_name: &str,
        _hash_key: &str,
    ) -> seedkeeper_reconciler::Result<Arc<dyn Store>> {
        Ok(self.store.clone())
    }
}

/// Test the invocation deadline.
///
/// # GIVEN
/// A store whose puts take a minute and a one second deadline
///
/// # WHEN
/// A Create is dispatched
///
/// # THEN
/// A failure is reported and a TimedOut error is returned
#[tokio::test(start_paused = true)]
async fn test_timeout_reports_failure() {
    let provider = Arc::new(SlowProvider {
        store: Arc::new(SlowStore {
            inner: InMemoryStore::new("seeds", "Id"),
            delay: Duration::from_secs(60),
        }),
    });
    let reporter = Arc::new(RecordingReporter::new());
    let dispatcher = dispatcher(
        provider,
        reporter.clone(),
        DispatcherConfig {
            invocation_timeout: Some(Duration::from_secs(1)),
            ..DispatcherConfig::default()
        },
    );

    let err = dispatcher
        .dispatch(&envelope("Create", r#"[{"Id":"0"}]"#))
        .await
        .unwrap_err();

    assert_eq!(err, Error::timed_out(Duration::from_secs(1)));
    let last = reporter.last().await.unwrap();
    assert!(last.outcome.reason().unwrap().starts_with("TimedOut"));
    assert_eq!(reporter.count().await, 1);
}

/// Reporter that always fails to deliver.
struct BrokenReporter;

#[async_trait]
impl Reporter for BrokenReporter {
    async fn report(
        &self,
        _context: &ResponseContext,
        _outcome: &OutcomeReport,
    ) -> seedkeeper_events::Result<()> {
        Err(Error::report_failed("callback unreachable"))
    }
}

/// Test delivery failure after a successful reconciliation.
///
/// # GIVEN
/// A reporter that cannot deliver
///
/// # WHEN
/// A valid Create is dispatched
///
/// # THEN
/// The records are installed and ReportFailed is returned
#[tokio::test]
async fn test_report_failure_surfaces_after_success() {
    let provider = Arc::new(InMemoryStoreProvider::new());
    let dispatcher = dispatcher(
        provider.clone(),
        Arc::new(BrokenReporter),
        DispatcherConfig::default(),
    );

    let err = dispatcher
        .dispatch(&envelope("Create", r#"[{"Id":"0"}]"#))
        .await
        .unwrap_err();

    assert_eq!(err.code(), "ReportFailed");
    assert_eq!(provider.table("seeds").await.unwrap().len().await, 1);
}

/// Test that a delivery failure does not mask the handling error.
#[tokio::test]
async fn test_report_failure_keeps_original_error() {
    let dispatcher = dispatcher(
        Arc::new(InMemoryStoreProvider::new()),
        Arc::new(BrokenReporter),
        DispatcherConfig::default(),
    );

    let err = dispatcher
        .dispatch(&envelope("Foo", "[]"))
        .await
        .unwrap_err();

    assert_eq!(err, Error::unknown_request_type("Foo"));
}

fn request_type_strategy() -> impl Strategy<Value = String> {
    prop_oneof![
        Just("Create".to_string()),
        Just("Update".to_string()),
        Just("Delete".to_string()),
        "[A-Za-z]{0,8}",
    ]
}

fn items_strategy() -> impl Strategy<Value = String> {
    prop_oneof![
        Just(r#"[{"Id":"0","Name":"Foo"}]"#.to_string()),
        Just("[]".to_string()),
        Just(r#"[{"Name":"no key"}]"#.to_string()),
        Just("[{".to_string()),
        Just(r#"{"Id":"0"}"#.to_string()),
    ]
}

proptest! {
    /// Property: every dispatch delivers exactly one report, and the report
    /// agrees with the returned result.
    #[test]
    fn prop_exactly_one_report(
        request_type in request_type_strategy(),
        items in items_strategy(),
    ) {
        let rt = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .unwrap();
        let reporter = Arc::new(RecordingReporter::new());
        let dispatcher = dispatcher(
            Arc::new(InMemoryStoreProvider::new()),
            reporter.clone(),
            DispatcherConfig::default(),
        );

        let (result, reports) = rt.block_on(async {
            let result = dispatcher.dispatch(&envelope(&request_type, &items)).await;
            (result, reporter.reports().await)
        });

        prop_assert_eq!(reports.len(), 1);
        prop_assert_eq!(result.is_ok(), reports[0].outcome.is_success());
    }
}
