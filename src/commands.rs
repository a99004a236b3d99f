//! CLI command handlers.

use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};
use seedkeeper_events::{
    DispatchReport, Dispatcher, HttpReporter, Reporter, StdoutReporter,
};
use seedkeeper_reconciler::{
    Declaration, DirectoryStoreProvider, ReconcileSummary, Reconciler, SeedRecord, StoreProvider,
    TracingStoreProvider,
};
use tokio::io::AsyncReadExt;
use tracing::info;

use crate::cli::{Cli, Commands, ReporterKind};
use crate::config::SeedkeeperConfig;

/// Everything a command needs, built once from configuration.
pub struct App {
    config: SeedkeeperConfig,
    reconciler: Reconciler,
    stores: Arc<dyn StoreProvider>,
}

impl App {
    /// Build an app whose tables live under `config.store_dir`.
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration does not validate.
    pub fn new(config: SeedkeeperConfig) -> Result<Self> {
        let stores = Arc::new(TracingStoreProvider::new(DirectoryStoreProvider::new(
            config.store_dir.clone(),
        )));
        Self::with_stores(config, stores)
    }

    /// Build an app on top of an existing store provider.
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration does not validate.
    pub fn with_stores(config: SeedkeeperConfig, stores: Arc<dyn StoreProvider>) -> Result<Self> {
        let reconciler = config
            .build_reconciler()
            .context("Invalid seedkeeper configuration")?;
        Ok(Self {
            config,
            reconciler,
            stores,
        })
    }

    /// The loaded configuration.
    pub fn config(&self) -> &SeedkeeperConfig {
        &self.config
    }

    /// A dispatcher that reports through `reporter`.
    pub fn dispatcher(&self, reporter: Arc<dyn Reporter>) -> Dispatcher {
        Dispatcher::new(
            self.reconciler.clone(),
            Arc::clone(&self.stores),
            reporter,
            self.config.dispatcher_config(),
        )
    }

    /// Handle one raw lifecycle event.
    ///
    /// # Errors
    ///
    /// Returns the dispatch error after its failure report was attempted.
    pub async fn dispatch(
        &self,
        raw: &str,
        reporter: Arc<dyn Reporter>,
    ) -> Result<DispatchReport> {
        let report = self
            .dispatcher(reporter)
            .dispatch(raw)
            .await
            .context("Lifecycle event failed")?;
        Ok(report)
    }

    /// Reconcile a table against a declaration given as JSON text.
    ///
    /// # Errors
    ///
    /// Returns an error if the declaration is invalid or the store fails.
    pub async fn reconcile(
        &self,
        table: &str,
        hash_key: &str,
        items: &str,
    ) -> Result<ReconcileSummary> {
        let declaration = Declaration::parse(items).context("Invalid declaration")?;
        let store = self
            .stores
            .open(table, hash_key)
            .await
            .with_context(|| format!("Failed to open table '{table}'"))?;

        let summary = self
            .reconciler
            .reconcile(store.as_ref(), hash_key, &declaration)
            .await
            .with_context(|| format!("Failed to reconcile table '{table}'"))?;
        Ok(summary)
    }

    /// Records of a table, optionally only the owned ones.
    ///
    /// # Errors
    ///
    /// Returns an error if the table cannot be opened or scanned.
    pub async fn scan(&self, table: &str, hash_key: &str, owned: bool) -> Result<Vec<SeedRecord>> {
        let store = self
            .stores
            .open(table, hash_key)
            .await
            .with_context(|| format!("Failed to open table '{table}'"))?;

        let marker = self.reconciler.marker();
        let records = store
            .scan(&|record: &SeedRecord| !owned || marker.is_owned(record))
            .await
            .with_context(|| format!("Failed to scan table '{table}'"))?;
        Ok(records)
    }

    fn reporter(&self, kind: ReporterKind) -> Result<Arc<dyn Reporter>> {
        Ok(match kind {
            ReporterKind::Stdout => Arc::new(StdoutReporter),
            ReporterKind::Http => Arc::new(
                HttpReporter::new(self.config.report_timeout())
                    .context("Failed to build HTTP reporter")?,
            ),
        })
    }
}

/// Load configuration for a parsed command line. Flags win over the
/// environment, which wins over the config file.
///
/// # Errors
///
/// Returns an error if the config file or environment is unusable.
pub fn load_config(cli: &Cli) -> Result<SeedkeeperConfig> {
    let mut config = SeedkeeperConfig::load(cli.config.as_deref())
        .context("Failed to load configuration")?;
    if let Some(dir) = &cli.store_dir {
        config.store_dir.clone_from(dir);
    }
    Ok(config)
}

/// Execute a CLI command.
///
/// # Errors
///
/// Returns an error if the command failed. A failed lifecycle event is an
/// error even though its failure report was delivered.
pub async fn execute_command(cli: Cli) -> Result<()> {
    let app = App::new(load_config(&cli)?)?;

    match cli.command {
        Commands::Dispatch { event, reporter } => {
            let raw = read_event(&event).await?;
            let report = app.dispatch(&raw, app.reporter(reporter)?).await?;
            info!(
                request_type = %report.request_type,
                state = %report.final_state(),
                "Event handled"
            );
            Ok(())
        }

        Commands::Reconcile {
            table,
            hash_key,
            items,
        } => {
            let text = tokio::fs::read_to_string(&items)
                .await
                .with_context(|| format!("Failed to read {}", items.display()))?;
            let summary = app.reconcile(&table, &hash_key, &text).await?;
            print_json(&summary)
        }

        Commands::Scan {
            table,
            hash_key,
            owned,
        } => {
            let records = app.scan(&table, &hash_key, owned).await?;
            print_json(&records)
        }
    }
}

async fn read_event(source: &str) -> Result<String> {
    if source == "-" {
        let mut raw = String::new();
        tokio::io::stdin()
            .read_to_string(&mut raw)
            .await
            .context("Failed to read event from stdin")?;
        return Ok(raw);
    }

    tokio::fs::read_to_string(Path::new(source))
        .await
        .with_context(|| format!("Failed to read event file {source}"))
}

fn print_json<T: serde::Serialize>(value: &T) -> Result<()> {
    let text = serde_json::to_string_pretty(value).context("Failed to encode output")?;
    println!("{text}");
    Ok(())
}
