//! Sync command handler

use anyhow::{Context, Result};
use clap::Args;
use colored::*;
use log::info;

use crate::api::{RowSource, SheetsSource};
use crate::config::{SyncConfig, keys};
use crate::store;
use crate::sync::upsert::BATCH_SIZE;
use crate::sync::{LogSink, Orchestrator, SyncOptions, SyncSummary};

#[derive(Args, Debug, Clone)]
pub struct SyncCommands {
    /// Fetch, normalize and plan without writing to the store
    #[arg(long)]
    pub dry_run: bool,

    /// Spreadsheet id (overrides SHEET_ID)
    #[arg(long)]
    pub sheet_id: Option<String>,

    /// Cell range for the API strategies (overrides SHEET_RANGE)
    #[arg(long)]
    pub range: Option<String>,

    /// Tab id for the CSV export (overrides SHEET_GID)
    #[arg(long)]
    pub gid: Option<String>,

    /// Destination table (overrides STORE_TABLE)
    #[arg(long)]
    pub table: Option<String>,

    /// Rows per upsert batch
    #[arg(long, default_value_t = BATCH_SIZE, value_parser = clap::builder::RangedU64ValueParser::<usize>::new().range(1..))]
    pub batch_size: usize,

    /// Print the summary as JSON
    #[arg(long)]
    pub json: bool,
}

impl Default for SyncCommands {
    fn default() -> Self {
        Self {
            dry_run: false,
            sheet_id: None,
            range: None,
            gid: None,
            table: None,
            batch_size: BATCH_SIZE,
            json: false,
        }
    }
}

impl SyncCommands {
    /// Flag value standing in for an environment key
    fn override_for(&self, key: &str) -> Option<String> {
        match key {
            keys::SHEET_ID => self.sheet_id.clone(),
            keys::SHEET_RANGE => self.range.clone(),
            keys::SHEET_GID => self.gid.clone(),
            keys::STORE_TABLE => self.table.clone(),
            _ => None,
        }
    }

    fn config(&self) -> Result<SyncConfig> {
        SyncConfig::from_lookup(|key| {
            self.override_for(key)
                .or_else(|| std::env::var(key).ok())
        })
        .context("Invalid configuration")
    }
}

pub async fn handle_sync_command(args: SyncCommands) -> Result<()> {
    let config = args.config()?;

    let source = SheetsSource::new(&config).context("Failed to set up the sheet source")?;
    let store = store::connect(&config.store_config())
        .await
        .context("Failed to open the destination store")?;

    info!("Syncing {} into {}", source.describe(), store.describe());

    let options = SyncOptions {
        dry_run: args.dry_run,
        batch_size: args.batch_size,
    };
    let summary = Orchestrator::new(&source, store.as_ref(), &LogSink, options)
        .run()
        .await
        .map_err(|abort| {
            let after_deletion = abort.after_deletion;
            let err = anyhow::Error::new(abort);
            if after_deletion {
                err.context("Sync failed after stale rows were deleted; the store is incomplete until the next successful run")
            } else {
                err.context("Sync failed")
            }
        })?;

    if args.json {
        println!("{}", summary_json(&summary)?);
    } else {
        print_summary(&summary);
    }

    Ok(())
}

fn summary_json(summary: &SyncSummary) -> Result<String> {
    let value = serde_json::json!({
        "total_rows": summary.total_rows,
        "processed_rows": summary.processed_rows,
        "failed_rows": summary.failed_rows,
        "deleted_rows": summary.deleted_rows,
        "duration_ms": summary.duration.as_millis() as u64,
        "dry_run": summary.dry_run,
    });
    serde_json::to_string(&value).context("Failed to format summary")
}

fn print_summary(summary: &SyncSummary) {
    let title = if summary.dry_run {
        "Dry run complete (nothing written)".yellow().bold()
    } else {
        "Sync complete".bright_green().bold()
    };
    println!("{}", title);

    let (upsert_label, delete_label) = if summary.dry_run {
        ("Would upsert", "Would delete")
    } else {
        ("Upserted", "Deleted")
    };

    println!("  {:<14} {}", "Rows read:", summary.total_rows.to_string().cyan());
    println!(
        "  {:<14} {}",
        format!("{}:", upsert_label),
        summary.processed_rows.to_string().green()
    );

    let failed = summary.failed_rows.to_string();
    println!(
        "  {:<14} {}",
        "Failed:",
        if summary.failed_rows > 0 { failed.red() } else { failed.normal() }
    );
    println!(
        "  {:<14} {}",
        format!("{}:", delete_label),
        summary.deleted_rows.to_string().yellow()
    );
    println!(
        "  {:<14} {}",
        "Duration:",
        format!("{:.2}s", summary.duration.as_secs_f64()).dimmed()
    );
}
