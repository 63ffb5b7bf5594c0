//! Image backfill driver
//!
//! Runs the importer over existing weapon and perk rows that still point at a
//! legacy image URL. Rows are fed through a bounded channel to a fixed number
//! of worker tasks, so at most `concurrency` rows are in flight at once. A row
//! that fails is logged and left out of the checkpoint; the batch carries on.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use parking_lot::Mutex;
use serde::Serialize;
use tokio::sync::{Mutex as AsyncMutex, mpsc};
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use super::checkpoint::Checkpoint;
use super::media_import::{ImportError, ImportRequest, MediaImport, MediaKind};
use super::retry::{RetryConfig, is_transient_status, retry_async};

/// Tables the backfill knows how to walk
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, clap::ValueEnum)]
#[serde(rename_all = "snake_case")]
pub enum BackfillTable {
    Weapons,
    Perks,
}

impl BackfillTable {
    pub fn as_str(&self) -> &'static str {
        match self {
            BackfillTable::Weapons => "weapons",
            BackfillTable::Perks => "perks",
        }
    }

    /// Default checkpoint location for this table
    pub fn default_checkpoint_path(&self) -> String {
        format!(".backfill-{}.json", self.as_str())
    }
}

impl std::fmt::Display for BackfillTable {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One legacy image on a row that still needs mirroring
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackfillItem {
    pub kind: MediaKind,
    pub source_url: String,
}

/// A row with at least one unlinked legacy image
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackfillRow {
    pub id: String,
    pub slug: Option<String>,
    pub items: Vec<BackfillItem>,
}

/// Where candidate rows come from and where media links are written back
#[async_trait]
pub trait BackfillSource: Send + Sync {
    async fn pending_rows(&self, table: BackfillTable, limit: i64) -> Result<Vec<BackfillRow>>;

    async fn link_media(
        &self,
        table: BackfillTable,
        row_id: &str,
        kind: MediaKind,
        media_id: Uuid,
    ) -> Result<()>;
}

#[derive(Debug, Clone)]
pub struct BackfillOptions {
    pub table: BackfillTable,
    pub concurrency: usize,
    pub limit: i64,
    /// Pause before each row, to go easy on the source host
    pub delay: Duration,
    pub dry_run: bool,
}

impl BackfillOptions {
    pub fn new(table: BackfillTable) -> Self {
        Self {
            table,
            concurrency: 4,
            limit: 500,
            delay: Duration::ZERO,
            dry_run: false,
        }
    }
}

/// Totals for one run
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct BackfillReport {
    pub candidates: usize,
    pub skipped: usize,
    pub succeeded: usize,
    pub failed: usize,
    /// Images that were already stored under the same content hash
    pub reused: usize,
}

#[derive(Debug, Default)]
struct WorkerTally {
    succeeded: usize,
    failed: usize,
    reused: usize,
}

struct WorkerContext {
    table: BackfillTable,
    delay: Duration,
    source: Arc<dyn BackfillSource>,
    importer: Arc<dyn MediaImport>,
    retry: RetryConfig,
    checkpoint: Arc<Mutex<Checkpoint>>,
}

pub struct BackfillDriver {
    source: Arc<dyn BackfillSource>,
    importer: Arc<dyn MediaImport>,
    retry: RetryConfig,
}

impl BackfillDriver {
    pub fn new(source: Arc<dyn BackfillSource>, importer: Arc<dyn MediaImport>) -> Self {
        Self {
            source,
            importer,
            retry: RetryConfig::default(),
        }
    }

    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    /// Run one batch. Returns `Err` only when the batch could not start;
    /// per-row failures are counted in the report.
    pub async fn run(&self, options: &BackfillOptions, checkpoint: Checkpoint) -> Result<BackfillReport> {
        let concurrency = options.concurrency.max(1);

        let rows = self
            .source
            .pending_rows(options.table, options.limit)
            .await
            .with_context(|| format!("Failed to load pending {} rows", options.table))?;

        let mut report = BackfillReport {
            candidates: rows.len(),
            ..Default::default()
        };

        let pending: Vec<BackfillRow> = rows
            .into_iter()
            .filter(|row| {
                let done = checkpoint.contains(&row.id);
                if done {
                    debug!(row_id = %row.id, "Already processed, skipping");
                }
                !done
            })
            .collect();
        report.skipped = report.candidates - pending.len();

        info!(
            table = %options.table,
            candidates = report.candidates,
            skipped = report.skipped,
            concurrency = concurrency,
            "Starting backfill"
        );

        if options.dry_run {
            for row in &pending {
                for item in &row.items {
                    info!(row_id = %row.id, kind = %item.kind, url = %item.source_url, "Would import");
                }
            }
            return Ok(report);
        }

        let context = Arc::new(WorkerContext {
            table: options.table,
            delay: options.delay,
            source: self.source.clone(),
            importer: self.importer.clone(),
            retry: self.retry.clone(),
            checkpoint: Arc::new(Mutex::new(checkpoint)),
        });

        let (sender, receiver) = mpsc::channel::<BackfillRow>(concurrency);
        let receiver = Arc::new(AsyncMutex::new(receiver));

        let mut workers = JoinSet::new();
        for worker_id in 0..concurrency {
            workers.spawn(run_worker(worker_id, context.clone(), receiver.clone()));
        }

        for row in pending {
            if sender.send(row).await.is_err() {
                error!("All backfill workers exited early");
                break;
            }
        }
        drop(sender);

        while let Some(joined) = workers.join_next().await {
            match joined {
                Ok(tally) => {
                    report.succeeded += tally.succeeded;
                    report.failed += tally.failed;
                    report.reused += tally.reused;
                }
                Err(e) => error!(error = %e, "Backfill worker panicked"),
            }
        }

        info!(
            table = %options.table,
            succeeded = report.succeeded,
            failed = report.failed,
            reused = report.reused,
            skipped = report.skipped,
            "Backfill finished"
        );

        Ok(report)
    }
}

async fn run_worker(
    worker_id: usize,
    context: Arc<WorkerContext>,
    receiver: Arc<AsyncMutex<mpsc::Receiver<BackfillRow>>>,
) -> WorkerTally {
    let mut tally = WorkerTally::default();

    loop {
        let next = receiver.lock().await.recv().await;
        let Some(row) = next else { break };

        if !context.delay.is_zero() {
            tokio::time::sleep(context.delay).await;
        }

        match context.process_row(&row).await {
            Ok(reused) => {
                tally.succeeded += 1;
                tally.reused += reused;
                if let Err(e) = context.checkpoint.lock().mark(&row.id) {
                    warn!(row_id = %row.id, error = %e, "Failed to write checkpoint");
                }
            }
            Err(e) => {
                tally.failed += 1;
                warn!(worker = worker_id, row_id = %row.id, error = %format!("{e:#}"), "Row failed, continuing");
            }
        }
    }

    debug!(worker = worker_id, "Backfill worker done");
    tally
}

impl WorkerContext {
    /// Import and link every item on the row; returns how many were deduplicated
    async fn process_row(&self, row: &BackfillRow) -> Result<usize> {
        let importer = self.importer.as_ref();
        let mut reused = 0;

        for item in &row.items {
            let request = ImportRequest {
                url: item.source_url.clone(),
                kind: item.kind,
                slug_or_id: row.slug.clone().or_else(|| Some(row.id.clone())),
                attribution: None,
            };
            let request = &request;
            let operation = format!("import {}/{} {}", self.table, row.id, item.kind);

            let outcome = retry_async(
                move || importer.import(request),
                &self.retry,
                &operation,
                is_retriable,
            )
            .await
            .with_context(|| format!("Failed to import {}", item.source_url))?;

            self.source
                .link_media(self.table, &row.id, item.kind, outcome.id)
                .await
                .with_context(|| format!("Failed to link media {}", outcome.id))?;

            debug!(row_id = %row.id, kind = %item.kind, media_id = %outcome.id, reused = outcome.reused, "Linked media");
            if outcome.reused {
                reused += 1;
            }
        }

        Ok(reused)
    }
}

fn is_retriable(error: &ImportError) -> bool {
    is_transient_status(error.status_hint())
}
