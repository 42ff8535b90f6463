//! SQLite destination via sqlx

use async_trait::async_trait;
use log::debug;
use sqlx::SqlitePool;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use std::str::FromStr;

use super::{MatchMode, RecordStore, StudentRecord};
use crate::error::{SyncError, SyncResult};
use crate::sync::patch::{ColumnValue, RecordPatch};

/// Keys per `IN (...)` clause, well under SQLite's bound parameter limit
const DELETE_CHUNK: usize = 500;

#[derive(Debug, Clone)]
pub struct SqliteStore {
    pool: SqlitePool,
    table: String,
}

impl SqliteStore {
    /// Open (creating if needed) the database and make sure the table exists.
    /// A single connection is used; this also keeps `sqlite::memory:` coherent.
    pub async fn connect(url: &str, table: &str) -> SyncResult<Self> {
        let options = SqliteConnectOptions::from_str(url)
            .map_err(|e| SyncError::Configuration(format!("invalid sqlite url '{}': {}", url, e)))?
            .create_if_missing(true);

        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect_with(options)
            .await
            .map_err(|e| SyncError::persistence("failed to open sqlite database", e))?;

        Self::with_pool(pool, table).await
    }

    pub async fn with_pool(pool: SqlitePool, table: &str) -> SyncResult<Self> {
        let store = Self {
            pool,
            table: table.to_string(),
        };
        store.ensure_schema().await?;
        Ok(store)
    }

    async fn ensure_schema(&self) -> SyncResult<()> {
        let sql = format!(
            "CREATE TABLE IF NOT EXISTS {} (
                register_no TEXT PRIMARY KEY NOT NULL,
                name TEXT,
                father_name TEXT,
                mother_name TEXT,
                address TEXT,
                class TEXT,
                year TEXT,
                department TEXT,
                email TEXT,
                phone TEXT,
                cia_1_mark REAL,
                cia_2_mark REAL,
                present_today REAL,
                leave_taken REAL,
                attendance_percentage REAL,
                updated_at TEXT
            )",
            self.table
        );

        sqlx::query(&sql)
            .execute(&self.pool)
            .await
            .map_err(|e| SyncError::persistence("failed to create table", e))?;

        Ok(())
    }
}

#[async_trait]
impl RecordStore for SqliteStore {
    async fn upsert_batch(&self, batch: &[RecordPatch]) -> SyncResult<()> {
        let updated_at = chrono::Utc::now().to_rfc3339();
        let mut tx = self.pool.begin().await?;

        for patch in batch {
            let columns = patch.columns();
            let names: Vec<&str> = columns.iter().map(|(name, _)| *name).collect();
            let sql = upsert_sql(&self.table, &names);

            let mut query = sqlx::query(&sql);
            for (_, value) in columns {
                query = match value {
                    ColumnValue::Text(text) => query.bind(text),
                    ColumnValue::Number(number) => query.bind(number),
                };
            }

            query
                .bind(updated_at.clone())
                .execute(&mut *tx)
                .await
                .map_err(|e| {
                    SyncError::persistence(&format!("upsert of {} failed", patch.register_no), e)
                })?;
        }

        tx.commit().await?;
        debug!("sqlite: upserted {} record(s) into {}", batch.len(), self.table);
        Ok(())
    }

    async fn select_all_keys(&self) -> SyncResult<Vec<String>> {
        let sql = format!("SELECT register_no FROM {} ORDER BY register_no", self.table);
        let keys: Vec<String> = sqlx::query_scalar(&sql)
            .fetch_all(&self.pool)
            .await
            .map_err(|e| SyncError::persistence("failed to list keys", e))?;
        Ok(keys)
    }

    async fn delete_keys(&self, keys: &[String]) -> SyncResult<u64> {
        let mut deleted = 0;

        for chunk in keys.chunks(DELETE_CHUNK) {
            let placeholders = vec!["?"; chunk.len()].join(", ");
            let sql = format!(
                "DELETE FROM {} WHERE register_no IN ({})",
                self.table, placeholders
            );

            let mut query = sqlx::query(&sql);
            for key in chunk {
                query = query.bind(key);
            }

            deleted += query
                .execute(&self.pool)
                .await
                .map_err(|e| SyncError::persistence("failed to delete stale rows", e))?
                .rows_affected();
        }

        Ok(deleted)
    }

    async fn delete_all(&self) -> SyncResult<u64> {
        let sql = format!("DELETE FROM {}", self.table);
        let result = sqlx::query(&sql)
            .execute(&self.pool)
            .await
            .map_err(|e| SyncError::persistence("failed to clear table", e))?;
        Ok(result.rows_affected())
    }

    async fn find(&self, register_no: &str) -> SyncResult<Option<StudentRecord>> {
        let sql = format!("SELECT * FROM {} WHERE register_no = ?", self.table);
        let record = sqlx::query_as::<_, StudentRecord>(&sql)
            .bind(register_no.trim())
            .fetch_optional(&self.pool)
            .await?;
        Ok(record)
    }

    async fn search(
        &self,
        query: &str,
        mode: MatchMode,
        limit: usize,
    ) -> SyncResult<Vec<StudentRecord>> {
        let escaped = escape_like(query.trim());
        let pattern = match mode {
            MatchMode::Prefix => format!("{}%", escaped),
            MatchMode::Contains => format!("%{}%", escaped),
        };
        let sql = format!(
            "SELECT * FROM {} WHERE register_no LIKE ? ESCAPE '\\'
             ORDER BY register_no LIMIT ?",
            self.table
        );
        let records = sqlx::query_as::<_, StudentRecord>(&sql)
            .bind(pattern)
            .bind(limit as i64)
            .fetch_all(&self.pool)
            .await?;
        Ok(records)
    }

    fn describe(&self) -> String {
        format!("sqlite table '{}'", self.table)
    }
}

/// `INSERT ... ON CONFLICT DO UPDATE` touching only `columns` (key first) and
/// `updated_at`. The update is skipped when every written column already holds
/// the incoming value, so an unchanged row keeps its timestamp.
fn upsert_sql(table: &str, columns: &[&str]) -> String {
    let placeholders = vec!["?"; columns.len() + 1].join(", ");
    let written = &columns[1.min(columns.len())..];

    let conflict = if written.is_empty() {
        "DO NOTHING".to_string()
    } else {
        let updates: Vec<String> = written
            .iter()
            .chain(std::iter::once(&"updated_at"))
            .map(|c| format!("{c} = excluded.{c}"))
            .collect();
        let changed: Vec<String> = written
            .iter()
            .map(|c| format!("{table}.{c} IS NOT excluded.{c}"))
            .collect();
        format!(
            "DO UPDATE SET {} WHERE {}",
            updates.join(", "),
            changed.join(" OR ")
        )
    };

    format!(
        "INSERT INTO {} ({}, updated_at) VALUES ({})
         ON CONFLICT(register_no) {}",
        table,
        columns.join(", "),
        placeholders,
        conflict
    )
}

fn escape_like(value: &str) -> String {
    let mut escaped = String::with_capacity(value.len());
    for c in value.chars() {
        if matches!(c, '%' | '_' | '\\') {
            escaped.push('\\');
        }
        escaped.push(c);
    }
    escaped
}
