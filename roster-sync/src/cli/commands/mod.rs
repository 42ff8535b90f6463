pub mod lookup;
pub mod sync;

use clap::ValueEnum;

/// How records are printed
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    /// Pretty-printed JSON
    Json,
    /// Single-line JSON
    JsonCompact,
}
