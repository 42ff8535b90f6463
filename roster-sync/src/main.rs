mod api;
mod cli;
mod config;
mod error;
mod store;
mod sync;

#[cfg(test)]
mod test_server;

use anyhow::Result;
use clap::Parser;
use colored::*;

use cli::commands::{lookup, sync as sync_command};
use cli::{Cli, Commands};

fn init_logging(verbose: bool) {
    let level = if verbose { "debug" } else { "info" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(level))
        .format_timestamp_secs()
        .init();
}

async fn run(command: Commands) -> Result<()> {
    match command {
        Commands::Sync(args) => sync_command::handle_sync_command(args).await,
        Commands::Lookup(args) => lookup::handle_lookup_command(args).await,
        Commands::Search(args) => lookup::handle_search_command(args).await,
    }
}

#[tokio::main]
async fn main() {
    // a missing .env is fine, the environment may already be set
    dotenvy::dotenv().ok();

    let cli = Cli::parse();
    init_logging(cli.verbose);

    if cli.no_color {
        colored::control::set_override(false);
    }

    let command = cli
        .command
        .unwrap_or_else(|| Commands::Sync(Default::default()));

    if let Err(e) = run(command).await {
        eprintln!("{} {:#}", "Error:".red().bold(), e);
        std::process::exit(1);
    }
}
