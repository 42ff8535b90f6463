//! Error taxonomy for a sync run
//!
//! Every variant here aborts the run. Rows without a register number are not
//! errors: they are counted in the summary and the run continues.

use thiserror::Error;

pub type SyncResult<T> = std::result::Result<T, SyncError>;

/// Fatal errors, tagged by the part of the pipeline that raised them
#[derive(Debug, Error)]
pub enum SyncError {
    #[error("configuration error: {0}")]
    Configuration(String),

    #[error("source error: {0}")]
    Source(#[from] SourceError),

    #[error("parse error: {0}")]
    Parse(String),

    #[error("persistence error: {0}")]
    Persistence(String),
}

impl SyncError {
    /// Short tag used in log lines and the CLI exit message
    pub fn kind(&self) -> &'static str {
        match self {
            SyncError::Configuration(_) => "configuration",
            SyncError::Source(_) => "source",
            SyncError::Parse(_) => "parse",
            SyncError::Persistence(_) => "persistence",
        }
    }

    pub fn persistence(context: &str, err: impl std::fmt::Display) -> Self {
        SyncError::Persistence(format!("{}: {}", context, err))
    }
}

impl From<sqlx::Error> for SyncError {
    fn from(err: sqlx::Error) -> Self {
        SyncError::Persistence(err.to_string())
    }
}

/// Failures while pulling rows from the spreadsheet
#[derive(Debug, Clone, Error)]
pub enum SourceError {
    #[error("network error: {0}")]
    Network(String),

    #[error("HTTP {status} from {url}: {body}")]
    Status { status: u16, url: String, body: String },

    #[error(
        "service account was rejected (HTTP {status}); share the sheet with the service account email and check the key is still valid"
    )]
    ServiceAccountRejected { status: u16 },

    #[error(
        "API key was rejected (HTTP {status}); make sure the Sheets API is enabled for the key and the sheet is shared as 'anyone with the link'"
    )]
    ApiKeyRejected { status: u16 },

    #[error(
        "CSV export was refused (HTTP {status}); the sheet must be published or shared as 'anyone with the link' when no credentials are configured"
    )]
    ExportForbidden { status: u16 },

    #[error("invalid service account credential: {0}")]
    Credential(String),

    #[error("invalid source structure: {0}")]
    InvalidStructure(String),
}

impl From<reqwest::Error> for SourceError {
    fn from(err: reqwest::Error) -> Self {
        SourceError::Network(err.to_string())
    }
}
