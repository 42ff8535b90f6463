//! Read-only lookups against the destination store

use anyhow::{Context, Result};
use clap::Args;
use colored::*;

use super::OutputFormat;
use crate::config::StoreConfig;
use crate::store::{self, MatchMode};

#[derive(Args, Debug, Clone)]
pub struct LookupCommands {
    /// Exact register number
    pub register_no: String,

    #[arg(long, value_enum, default_value_t = OutputFormat::Json)]
    pub format: OutputFormat,
}

#[derive(Args, Debug, Clone)]
pub struct SearchCommands {
    /// Register number text, matched case-insensitively
    pub query: String,

    /// Match anywhere in the register number instead of at the start
    #[arg(long)]
    pub contains: bool,

    /// Maximum number of records
    #[arg(short, long, default_value_t = 20)]
    pub limit: usize,

    #[arg(long, value_enum, default_value_t = OutputFormat::Json)]
    pub format: OutputFormat,
}

pub async fn handle_lookup_command(args: LookupCommands) -> Result<()> {
    let register_no = args.register_no.trim();
    if register_no.is_empty() {
        anyhow::bail!("Register number must not be blank");
    }

    let config = StoreConfig::from_env().context("Invalid configuration")?;
    let store = store::connect(&config)
        .await
        .context("Failed to open the destination store")?;

    match store
        .find(register_no)
        .await
        .with_context(|| format!("Failed to look up {}", register_no))?
    {
        Some(record) => println!("{}", format_output(&record, args.format)?),
        None => anyhow::bail!("No record with register number {}", register_no.bold()),
    }

    Ok(())
}

impl SearchCommands {
    pub fn match_mode(&self) -> MatchMode {
        if self.contains {
            MatchMode::Contains
        } else {
            MatchMode::Prefix
        }
    }
}

pub async fn handle_search_command(args: SearchCommands) -> Result<()> {
    let query = args.query.trim();
    if query.is_empty() {
        anyhow::bail!("Search text must not be blank");
    }

    let config = StoreConfig::from_env().context("Invalid configuration")?;
    let store = store::connect(&config)
        .await
        .context("Failed to open the destination store")?;

    let records = store
        .search(query, args.match_mode(), args.limit)
        .await
        .with_context(|| format!("Failed to search for '{}'", query))?;

    if records.is_empty() {
        let relation = match args.match_mode() {
            MatchMode::Prefix => "start with",
            MatchMode::Contains => "contain",
        };
        eprintln!("{}", format!("No records {} '{}'", relation, query).dimmed());
    }
    println!("{}", format_output(&records, args.format)?);

    Ok(())
}

fn format_output<T: serde::Serialize + ?Sized>(data: &T, format: OutputFormat) -> Result<String> {
    match format {
        OutputFormat::Json => {
            serde_json::to_string_pretty(data).context("Failed to format JSON output")
        }
        OutputFormat::JsonCompact => {
            serde_json::to_string(data).context("Failed to format JSON output")
        }
    }
}
