//! Environment-driven configuration
//!
//! Values come from the process environment (after `.env` has been loaded)
//! with CLI flags layered on top. Everything required is checked here, before
//! any network call is made.

use std::path::PathBuf;
use std::time::Duration;

use crate::api::resilience::RetryConfig;
use crate::error::{SyncError, SyncResult};

pub const DEFAULT_RANGE: &str = "A1:Z10000";
pub const DEFAULT_GID: &str = "0";
pub const DEFAULT_TABLE: &str = "students";
pub const DEFAULT_HTTP_TIMEOUT_SECS: u64 = 60;
pub const DEFAULT_SHEETS_API_BASE: &str = "https://sheets.googleapis.com/v4/spreadsheets";
pub const DEFAULT_EXPORT_BASE: &str = "https://docs.google.com/spreadsheets/d";

/// Environment keys read by [`SyncConfig::from_lookup`]
pub mod keys {
    pub const STORE_URL: &str = "STORE_URL";
    pub const STORE_SERVICE_KEY: &str = "STORE_SERVICE_KEY";
    pub const STORE_TABLE: &str = "STORE_TABLE";
    pub const SHEET_ID: &str = "SHEET_ID";
    pub const SHEET_RANGE: &str = "SHEET_RANGE";
    pub const SHEET_GID: &str = "SHEET_GID";
    pub const SHEETS_API_KEY: &str = "SHEETS_API_KEY";
    pub const SERVICE_ACCOUNT_JSON: &str = "GOOGLE_SERVICE_ACCOUNT_JSON";
    pub const SERVICE_ACCOUNT_FILE: &str = "GOOGLE_SERVICE_ACCOUNT_FILE";
    pub const RETRY_ATTEMPTS: &str = "SYNC_RETRY_ATTEMPTS";
    pub const RETRY_BASE_MS: &str = "SYNC_RETRY_BASE_MS";
    pub const HTTP_TIMEOUT_SECS: &str = "SYNC_HTTP_TIMEOUT_SECS";
    pub const SHEETS_API_BASE_URL: &str = "SHEETS_API_BASE_URL";
    pub const SHEETS_EXPORT_BASE_URL: &str = "SHEETS_EXPORT_BASE_URL";
}

/// Where the service account credential comes from
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ServiceAccountSource {
    Inline(String),
    File(PathBuf),
}

/// Spreadsheet coordinates and credentials
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceConfig {
    pub sheet_id: String,
    pub range: String,
    pub gid: String,
    pub api_key: Option<String>,
    pub service_account: Option<ServiceAccountSource>,
    /// Values API root, ending before the sheet id
    pub api_base: String,
    /// CSV export root, ending before the sheet id
    pub export_base: String,
}

/// Destination the records are mirrored into
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreTarget {
    /// sqlx connection string, e.g. `sqlite://roster.db`
    Sqlite { url: String },
    /// PostgREST-compatible endpoint
    Rest { url: String, service_key: String },
}

/// Everything needed to open the destination, and nothing about the sheet.
/// The read-only commands load only this.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoreConfig {
    pub target: StoreTarget,
    pub table: String,
    pub http_timeout: Duration,
}

#[derive(Debug, Clone)]
pub struct SyncConfig {
    pub source: SourceConfig,
    pub store: StoreTarget,
    pub table: String,
    pub retry: RetryConfig,
    pub http_timeout: Duration,
}

/// Trimmed lookup where blank values count as unset
fn non_blank<F>(lookup: &F, key: &str) -> Option<String>
where
    F: Fn(&str) -> Option<String>,
{
    lookup(key)
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

fn required<F>(lookup: &F, key: &str) -> SyncResult<String>
where
    F: Fn(&str) -> Option<String>,
{
    non_blank(lookup, key)
        .ok_or_else(|| SyncError::Configuration(format!("missing required setting {}", key)))
}

impl StoreConfig {
    pub fn from_env() -> SyncResult<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> SyncResult<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| non_blank(&lookup, key);

        let target = store_target(
            required(&lookup, keys::STORE_URL)?,
            get(keys::STORE_SERVICE_KEY),
        )?;

        let table = get(keys::STORE_TABLE).unwrap_or_else(|| DEFAULT_TABLE.to_string());
        if !table
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_')
        {
            return Err(SyncError::Configuration(format!(
                "{} must be a plain identifier, got '{}'",
                keys::STORE_TABLE,
                table
            )));
        }

        let http_timeout = Duration::from_secs(parse_number(
            &get,
            keys::HTTP_TIMEOUT_SECS,
            DEFAULT_HTTP_TIMEOUT_SECS,
        )?);

        Ok(Self {
            target,
            table,
            http_timeout,
        })
    }
}

impl SyncConfig {
    /// Load through an arbitrary key lookup. Blank values count as unset.
    pub fn from_lookup<F>(lookup: F) -> SyncResult<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| non_blank(&lookup, key);

        let store = StoreConfig::from_lookup(&lookup)?;
        let sheet_id = required(&lookup, keys::SHEET_ID)?;

        let service_account = match (
            get(keys::SERVICE_ACCOUNT_JSON),
            get(keys::SERVICE_ACCOUNT_FILE),
        ) {
            (Some(json), _) => Some(ServiceAccountSource::Inline(json)),
            (None, Some(path)) => Some(ServiceAccountSource::File(PathBuf::from(path))),
            (None, None) => None,
        };

        let defaults = RetryConfig::default();
        let retry = RetryConfig::builder()
            .max_attempts(parse_number(&get, keys::RETRY_ATTEMPTS, defaults.max_attempts)?)
            .base_delay(Duration::from_millis(parse_number(
                &get,
                keys::RETRY_BASE_MS,
                defaults.base_delay.as_millis() as u64,
            )?))
            .build();

        Ok(Self {
            source: SourceConfig {
                sheet_id,
                range: get(keys::SHEET_RANGE).unwrap_or_else(|| DEFAULT_RANGE.to_string()),
                gid: get(keys::SHEET_GID).unwrap_or_else(|| DEFAULT_GID.to_string()),
                api_key: get(keys::SHEETS_API_KEY),
                service_account,
                api_base: base_url(&get, keys::SHEETS_API_BASE_URL, DEFAULT_SHEETS_API_BASE),
                export_base: base_url(&get, keys::SHEETS_EXPORT_BASE_URL, DEFAULT_EXPORT_BASE),
            },
            store: store.target,
            table: store.table,
            retry,
            http_timeout: store.http_timeout,
        })
    }

    pub fn store_config(&self) -> StoreConfig {
        StoreConfig {
            target: self.store.clone(),
            table: self.table.clone(),
            http_timeout: self.http_timeout,
        }
    }
}

fn store_target(url: String, service_key: Option<String>) -> SyncResult<StoreTarget> {
    if url.starts_with("sqlite:") {
        return Ok(StoreTarget::Sqlite { url });
    }

    if url.starts_with("http://") || url.starts_with("https://") {
        let service_key = service_key.ok_or_else(|| {
            SyncError::Configuration(format!(
                "{} is required for an HTTP store",
                keys::STORE_SERVICE_KEY
            ))
        })?;
        return Ok(StoreTarget::Rest {
            url: url.trim_end_matches('/').to_string(),
            service_key,
        });
    }

    Err(SyncError::Configuration(format!(
        "{} must start with sqlite:, http:// or https://, got '{}'",
        keys::STORE_URL,
        url
    )))
}

fn base_url<G>(get: &G, key: &str, default: &str) -> String
where
    G: Fn(&str) -> Option<String>,
{
    get(key)
        .unwrap_or_else(|| default.to_string())
        .trim_end_matches('/')
        .to_string()
}

fn parse_number<G, N>(get: &G, key: &str, default: N) -> SyncResult<N>
where
    G: Fn(&str) -> Option<String>,
    N: std::str::FromStr,
{
    match get(key) {
        None => Ok(default),
        Some(raw) => raw.parse().map_err(|_| {
            SyncError::Configuration(format!("{} must be a number, got '{}'", key, raw))
        }),
    }
}
