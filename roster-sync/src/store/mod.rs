//! Destination stores
//!
//! The sync engine only needs keyed upserts, a key listing and two kinds of
//! delete. The read-only lookups at the bottom of [`RecordStore`] serve the
//! dashboard side, which never writes.

pub mod rest;
pub mod sqlite;

#[cfg(test)]
pub mod memory;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::config::{StoreConfig, StoreTarget};
use crate::error::SyncResult;
use crate::sync::patch::RecordPatch;

pub use rest::RestStore;
pub use sqlite::SqliteStore;

/// How [`RecordStore::search`] matches the register number
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum MatchMode {
    #[default]
    Prefix,
    Contains,
}

/// A stored student row as returned to readers
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, sqlx::FromRow)]
pub struct StudentRecord {
    pub register_no: String,
    pub name: Option<String>,
    pub father_name: Option<String>,
    pub mother_name: Option<String>,
    pub address: Option<String>,
    pub class: Option<String>,
    pub year: Option<String>,
    pub department: Option<String>,
    pub email: Option<String>,
    pub phone: Option<String>,
    pub cia_1_mark: Option<f64>,
    pub cia_2_mark: Option<f64>,
    pub present_today: Option<f64>,
    pub leave_taken: Option<f64>,
    pub attendance_percentage: Option<f64>,
    #[serde(default)]
    pub updated_at: Option<String>,
}

/// Operations the sync engine and its readers need from a destination
#[async_trait]
pub trait RecordStore: Send + Sync {
    /// Insert or update every patch, keyed on `register_no`. Only the columns
    /// a patch sets are written.
    async fn upsert_batch(&self, batch: &[RecordPatch]) -> SyncResult<()>;

    /// Every stored `register_no`
    async fn select_all_keys(&self) -> SyncResult<Vec<String>>;

    /// Delete the rows with these keys, returning how many went away
    async fn delete_keys(&self, keys: &[String]) -> SyncResult<u64>;

    /// Delete every row
    async fn delete_all(&self) -> SyncResult<u64>;

    /// Exact key lookup
    async fn find(&self, register_no: &str) -> SyncResult<Option<StudentRecord>>;

    /// Records whose key matches `query` (case-insensitive), ordered by key
    async fn search(
        &self,
        query: &str,
        mode: MatchMode,
        limit: usize,
    ) -> SyncResult<Vec<StudentRecord>>;

    /// Human-readable destination name for logs
    fn describe(&self) -> String;
}

/// Open the store named by the configuration
pub async fn connect(config: &StoreConfig) -> SyncResult<Box<dyn RecordStore>> {
    match &config.target {
        StoreTarget::Sqlite { url } => {
            Ok(Box::new(SqliteStore::connect(url, &config.table).await?))
        }
        StoreTarget::Rest { url, service_key } => Ok(Box::new(RestStore::new(
            url,
            service_key,
            &config.table,
            config.http_timeout,
        )?)),
    }
}
