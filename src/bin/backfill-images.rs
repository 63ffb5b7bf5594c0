//! Mirror legacy weapon and perk images into the media bucket.
//!
//! ```text
//! backfill-images --table weapons --concurrency 4 --limit 500 --resume --delay-ms 250
//! ```

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use clap::Parser;
use loadout::config::Config;
use loadout::db::Database;
use loadout::services::{
    BackfillDriver, BackfillOptions, BackfillTable, Checkpoint, ImageImporter, LogFormat,
    StorageClient, init_tracing,
};

/// Bulk fetches are bounded by retries; this only stops a stalled connection from pinning a worker
const BULK_FETCH_TIMEOUT: Duration = Duration::from_secs(60);

#[derive(Parser, Debug)]
#[command(
    name = "backfill-images",
    author,
    version,
    about = "Mirror legacy weapon and perk images into the media bucket"
)]
struct Args {
    /// Table to backfill
    #[arg(long, value_enum)]
    table: BackfillTable,

    /// Rows processed at the same time
    #[arg(long, default_value_t = 4, value_parser = clap::value_parser!(u16).range(1..))]
    concurrency: u16,

    /// Maximum rows to load
    #[arg(long, default_value_t = 500, value_parser = clap::value_parser!(i64).range(1..))]
    limit: i64,

    /// Skip rows recorded in the checkpoint file
    #[arg(long)]
    resume: bool,

    /// Pause before each row, in milliseconds
    #[arg(long = "delay-ms", alias = "delayMs", default_value_t = 0)]
    delay_ms: u64,

    /// Checkpoint file (defaults to .backfill-<table>.json)
    #[arg(long)]
    checkpoint: Option<PathBuf>,

    /// List candidate rows without importing anything
    #[arg(long)]
    dry_run: bool,
}

impl Args {
    fn options(&self) -> BackfillOptions {
        BackfillOptions {
            table: self.table,
            concurrency: usize::from(self.concurrency),
            limit: self.limit,
            delay: Duration::from_millis(self.delay_ms),
            dry_run: self.dry_run,
        }
    }

    fn checkpoint_path(&self) -> PathBuf {
        self.checkpoint
            .clone()
            .unwrap_or_else(|| PathBuf::from(self.table.default_checkpoint_path()))
    }
}

#[tokio::main]
async fn main() {
    dotenvy::dotenv().ok();
    init_tracing(LogFormat::from_env());

    let args = Args::parse();

    if let Err(e) = run(args).await {
        tracing::error!(error = %format!("{e:#}"), "Backfill aborted");
        std::process::exit(1);
    }
}

async fn run(args: Args) -> Result<()> {
    let config = Config::from_env()?;

    let checkpoint_path = args.checkpoint_path();
    let checkpoint = if args.resume {
        Checkpoint::load(&checkpoint_path, args.table.as_str())?
    } else {
        Checkpoint::new(&checkpoint_path, args.table.as_str())
    };
    tracing::info!(
        path = %checkpoint.path().display(),
        processed = checkpoint.len(),
        resume = args.resume,
        "Checkpoint ready"
    );

    let db = Database::connect(&config.database_url, config.database_max_connections).await?;

    let storage = StorageClient::new(config.supabase_url.clone(), config.supabase_service_key.clone());
    let importer = ImageImporter::new(
        Arc::new(storage.bucket(&config.media_bucket)),
        Arc::new(db.media()),
        BULK_FETCH_TIMEOUT,
    )?;

    let driver = BackfillDriver::new(Arc::new(db.backfill()), Arc::new(importer));
    let report = driver.run(&args.options(), checkpoint).await?;

    let stored = db.media().count().await?;
    tracing::info!(
        table = %args.table,
        candidates = report.candidates,
        skipped = report.skipped,
        succeeded = report.succeeded,
        failed = report.failed,
        reused = report.reused,
        media_rows = stored,
        "Backfill complete"
    );

    Ok(())
}
