//! Outcome delivery.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::CONTENT_TYPE;
use serde_json::{Value, json};
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;
use tracing::{debug, info};
use url::Url;

use crate::error::{Error, Result};
use crate::event::ResponseContext;
use crate::outcome::OutcomeReport;

/// Delivers an outcome report to whoever sent the lifecycle event.
#[async_trait]
pub trait Reporter: Send + Sync {
    /// Deliver one report.
    async fn report(&self, context: &ResponseContext, outcome: &OutcomeReport) -> Result<()>;
}

/// Reporter that writes each outcome as one JSON line on stdout.
#[derive(Debug, Default, Clone, Copy)]
pub struct StdoutReporter;

#[async_trait]
impl Reporter for StdoutReporter {
    async fn report(&self, context: &ResponseContext, outcome: &OutcomeReport) -> Result<()> {
        let mut line = serde_json::to_vec(&json!({
            "status": outcome.status(),
            "data": outcome.data(),
            "reason": outcome.reason(),
            "requestId": context.request_id,
        }))
        .map_err(|e| Error::report_failed(e.to_string()))?;
        line.push(b'\n');

        let mut stdout = tokio::io::stdout();
        stdout
            .write_all(&line)
            .await
            .map_err(|e| Error::report_failed(e.to_string()))?;
        stdout
            .flush()
            .await
            .map_err(|e| Error::report_failed(e.to_string()))
    }
}

/// A report captured by [`RecordingReporter`].
#[derive(Debug, Clone, PartialEq)]
pub struct RecordedReport {
    /// Correlation fields the report was addressed with.
    pub context: ResponseContext,
    /// The outcome.
    pub outcome: OutcomeReport,
}

/// Reporter that keeps every outcome in memory, for testing.
#[derive(Debug, Default)]
pub struct RecordingReporter {
    reports: Mutex<Vec<RecordedReport>>,
}

impl RecordingReporter {
    /// Create an empty recorder.
    pub fn new() -> Self {
        Self::default()
    }

    /// All reports so far.
    pub async fn reports(&self) -> Vec<RecordedReport> {
        self.reports.lock().await.clone()
    }

    /// Number of reports so far.
    pub async fn count(&self) -> usize {
        self.reports.lock().await.len()
    }

    /// The most recent report.
    pub async fn last(&self) -> Option<RecordedReport> {
        self.reports.lock().await.last().cloned()
    }
}

#[async_trait]
impl Reporter for RecordingReporter {
    async fn report(&self, context: &ResponseContext, outcome: &OutcomeReport) -> Result<()> {
        self.reports.lock().await.push(RecordedReport {
            context: context.clone(),
            outcome: outcome.clone(),
        });
        Ok(())
    }
}

/// Reporter that PUTs a custom-resource response document to the event's
/// `ResponseURL`.
#[derive(Debug, Clone)]
pub struct HttpReporter {
    client: reqwest::Client,
}

impl HttpReporter {
    /// Create a reporter whose requests give up after `timeout`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ReportFailed`] if the HTTP client cannot be built.
    pub fn new(timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| Error::report_failed(format!("building HTTP client: {e}")))?;
        Ok(Self { client })
    }
}

/// The response document the orchestrator expects at `ResponseURL`.
pub fn response_document(context: &ResponseContext, outcome: &OutcomeReport) -> Value {
    json!({
        "Status": outcome.status(),
        "Reason": outcome.reason().unwrap_or("See the invocation logs for details"),
        "PhysicalResourceId": context.physical_resource_id.as_deref().unwrap_or("seedkeeper"),
        "StackId": context.stack_id,
        "RequestId": context.request_id,
        "LogicalResourceId": context.logical_resource_id,
        "Data": outcome.data(),
    })
}

#[async_trait]
impl Reporter for HttpReporter {
    async fn report(&self, context: &ResponseContext, outcome: &OutcomeReport) -> Result<()> {
        let target = context
            .response_url
            .as_deref()
            .ok_or_else(|| Error::report_failed("event carries no ResponseURL"))?;
        let url = Url::parse(target)
            .map_err(|e| Error::report_failed(format!("invalid ResponseURL: {e}")))?;
        let body = serde_json::to_vec(&response_document(context, outcome))
            .map_err(|e| Error::report_failed(e.to_string()))?;

        debug!(host = url.host_str().unwrap_or_default(), bytes = body.len(), "Sending outcome");

        // Pre-signed response URLs reject any content type they were not signed with.
        let response = self
            .client
            .put(url)
            .header(CONTENT_TYPE, "")
            .body(body)
            .send()
            .await
            .map_err(|e| Error::report_failed(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(Error::report_failed(format!(
                "callback returned HTTP {status}"
            )));
        }

        info!(status = %outcome.status(), "Outcome delivered");
        Ok(())
    }
}

#[cfg(test)]
#[allow(clippy::expect_used, clippy::unwrap_used)]
mod tests {
    use super::*;

    fn context() -> ResponseContext {
        ResponseContext {
            response_url: None,
            stack_id: Some("stack-1".to_string()),
            request_id: Some("req-1".to_string()),
            logical_resource_id: Some("Seeds".to_string()),
            physical_resource_id: Some("seedkeeper-seeds".to_string()),
        }
    }

    #[test]
    fn test_response_document_success() {
        let doc = response_document(&context(), &OutcomeReport::success());
        assert_eq!(doc["Status"], "SUCCESS");
        assert_eq!(doc["PhysicalResourceId"], "seedkeeper-seeds");
        assert_eq!(doc["RequestId"], "req-1");
        assert_eq!(doc["Data"], json!({}));
    }

    #[test]
    fn test_response_document_failure_reason() {
        let doc = response_document(&context(), &OutcomeReport::failure("MissingKey: x"));
        assert_eq!(doc["Status"], "FAILED");
        assert_eq!(doc["Reason"], "MissingKey: x");
    }

    #[tokio::test]
    async fn test_http_reporter_requires_response_url() {
        let reporter = HttpReporter::new(Duration::from_secs(1)).unwrap();
        let err = reporter
            .report(&context(), &OutcomeReport::success())
            .await
            .unwrap_err();
        assert_eq!(err.code(), "ReportFailed");
    }

    #[tokio::test]
    async fn test_http_reporter_rejects_invalid_url() {
        let reporter = HttpReporter::new(Duration::from_secs(1)).unwrap();
        let mut ctx = context();
        ctx.response_url = Some("not a url".to_string());
        let err = reporter
            .report(&ctx, &OutcomeReport::success())
            .await
            .unwrap_err();
        assert!(err.to_string().contains("invalid ResponseURL"));
    }

    #[tokio::test]
    async fn test_recording_reporter() {
        let reporter = RecordingReporter::new();
        reporter
            .report(&context(), &OutcomeReport::failure("boom"))
            .await
            .unwrap();

        assert_eq!(reporter.count().await, 1);
        let last = reporter.last().await.unwrap();
        assert_eq!(last.outcome.reason(), Some("boom"));
        assert_eq!(last.context.request_id.as_deref(), Some("req-1"));
    }
}
