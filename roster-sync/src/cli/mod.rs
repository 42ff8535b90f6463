pub mod commands;

use clap::{Parser, Subcommand};

use commands::lookup::{LookupCommands, SearchCommands};
use commands::sync::SyncCommands;

#[derive(Parser, Debug)]
#[command(name = "roster-sync")]
#[command(about = "Mirror a student roster spreadsheet into a database table")]
#[command(version)]
pub struct Cli {
    /// Debug-level logging (RUST_LOG still wins when set)
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Disable colored output
    #[arg(long, global = true)]
    pub no_color: bool,

    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Pull the sheet and reconcile the store with it (default)
    Sync(SyncCommands),
    /// Print one stored record by register number
    Lookup(LookupCommands),
    /// List stored records whose register number starts with (or contains) some text
    Search(SearchCommands),
}
