//! PostgREST-style HTTP destination (Supabase and friends)

use async_trait::async_trait;
use log::debug;
use reqwest::{Client, RequestBuilder, Response};
use serde_json::Value;
use std::time::Duration;

use super::{MatchMode, RecordStore, StudentRecord};
use crate::api::http_client;
use crate::error::{SyncError, SyncResult};
use crate::sync::patch::RecordPatch;

/// Rows requested per page when listing keys. The server may cap pages
/// lower (`max-rows`), so only an empty page ends the listing.
const KEY_PAGE_SIZE: usize = 1000;
/// Keys per `in.(...)` filter, keeps request URLs short
const DELETE_CHUNK: usize = 100;

#[derive(Debug, Clone)]
pub struct RestStore {
    client: Client,
    endpoint: String,
    table: String,
    service_key: String,
}

impl RestStore {
    /// `base_url` is the project URL; `/rest/v1` is appended unless already present
    pub fn new(
        base_url: &str,
        service_key: &str,
        table: &str,
        timeout: Duration,
    ) -> SyncResult<Self> {
        let base = base_url.trim_end_matches('/');
        let rest_root = if base.ends_with("/rest/v1") {
            base.to_string()
        } else {
            format!("{}/rest/v1", base)
        };

        Ok(Self {
            client: http_client(timeout)
                .map_err(|e| SyncError::Configuration(format!("http client: {}", e)))?,
            endpoint: format!("{}/{}", rest_root, table),
            table: table.to_string(),
            service_key: service_key.to_string(),
        })
    }

    fn authorized(&self, builder: RequestBuilder) -> RequestBuilder {
        builder
            .header("apikey", &self.service_key)
            .bearer_auth(&self.service_key)
    }

    async fn send(&self, context: &str, builder: RequestBuilder) -> SyncResult<Response> {
        let response = self
            .authorized(builder)
            .send()
            .await
            .map_err(|e| SyncError::persistence(context, e))?;

        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }

        let body = response.text().await.unwrap_or_default();
        let reason = match status.as_u16() {
            401 | 403 => format!("store rejected the service key (HTTP {})", status.as_u16()),
            code => format!("HTTP {}: {}", code, body.trim()),
        };
        Err(SyncError::persistence(context, reason))
    }

    async fn post_run(&self, run: &[&RecordPatch]) -> SyncResult<()> {
        let body: Vec<Value> = run.iter().map(|p| Value::Object(p.to_json())).collect();

        let request = self
            .client
            .post(&self.endpoint)
            .query(&[("on_conflict", "register_no")])
            .header("Prefer", "resolution=merge-duplicates,return=minimal")
            .json(&body);

        self.send("upsert failed", request).await?;
        Ok(())
    }

    /// Returns the server-reported count when it sends one
    async fn delete_where(&self, context: &str, filter: &str) -> SyncResult<Option<u64>> {
        let url = format!("{}?{}", self.endpoint, filter);
        let request = self
            .client
            .delete(&url)
            .header("Prefer", "return=minimal,count=exact");

        let response = self.send(context, request).await?;
        Ok(content_range_total(&response))
    }

    async fn select(&self, context: &str, query: &[(&str, String)]) -> SyncResult<Vec<StudentRecord>> {
        let request = self.client.get(&self.endpoint).query(query);
        let response = self.send(context, request).await?;
        response
            .json::<Vec<StudentRecord>>()
            .await
            .map_err(|e| SyncError::persistence(context, e))
    }
}

#[async_trait]
impl RecordStore for RestStore {
    async fn upsert_batch(&self, batch: &[RecordPatch]) -> SyncResult<()> {
        for run in same_shape_runs(batch) {
            self.post_run(&run).await?;
        }
        debug!("rest: upserted {} record(s) into {}", batch.len(), self.table);
        Ok(())
    }

    async fn select_all_keys(&self) -> SyncResult<Vec<String>> {
        #[derive(serde::Deserialize)]
        struct KeyRow {
            register_no: String,
        }

        let mut keys = Vec::new();
        let mut offset = 0;
        loop {
            let request = self.client.get(&self.endpoint).query(&[
                ("select", "register_no".to_string()),
                ("order", "register_no".to_string()),
                ("limit", KEY_PAGE_SIZE.to_string()),
                ("offset", offset.to_string()),
            ]);
            let page: Vec<KeyRow> = self
                .send("failed to list keys", request)
                .await?
                .json()
                .await
                .map_err(|e| SyncError::persistence("failed to decode keys", e))?;

            if page.is_empty() {
                break;
            }
            offset += page.len();
            keys.extend(page.into_iter().map(|row| row.register_no));
        }

        Ok(keys)
    }

    async fn delete_keys(&self, keys: &[String]) -> SyncResult<u64> {
        let mut deleted = 0;
        for chunk in keys.chunks(DELETE_CHUNK) {
            let filter = format!("register_no={}", urlencoding::encode(&in_filter(chunk)));
            deleted += self
                .delete_where("failed to delete stale rows", &filter)
                .await?
                .unwrap_or(chunk.len() as u64);
        }
        Ok(deleted)
    }

    async fn delete_all(&self) -> SyncResult<u64> {
        // PostgREST refuses an unfiltered DELETE
        Ok(self
            .delete_where("failed to clear table", "register_no=not.is.null")
            .await?
            .unwrap_or(0))
    }

    async fn find(&self, register_no: &str) -> SyncResult<Option<StudentRecord>> {
        let records = self
            .select(
                "lookup failed",
                &[
                    ("select", "*".to_string()),
                    ("register_no", format!("eq.{}", register_no.trim())),
                    ("limit", "1".to_string()),
                ],
            )
            .await?;
        Ok(records.into_iter().next())
    }

    async fn search(
        &self,
        query: &str,
        mode: MatchMode,
        limit: usize,
    ) -> SyncResult<Vec<StudentRecord>> {
        let escaped = escape_pattern(query.trim());
        let pattern = match mode {
            MatchMode::Prefix => format!("ilike.{}*", escaped),
            MatchMode::Contains => format!("ilike.*{}*", escaped),
        };

        self.select(
            "search failed",
            &[
                ("select", "*".to_string()),
                ("register_no", pattern),
                ("order", "register_no".to_string()),
                ("limit", limit.to_string()),
            ],
        )
        .await
    }

    fn describe(&self) -> String {
        format!("REST table '{}' at {}", self.table, self.endpoint)
    }
}

/// Consecutive runs of patches that write the same columns. A bulk insert
/// takes its column list from the payload, so mixing shapes would null out
/// columns that one patch omits.
pub fn same_shape_runs(batch: &[RecordPatch]) -> Vec<Vec<&RecordPatch>> {
    let mut runs: Vec<(Vec<&'static str>, Vec<&RecordPatch>)> = Vec::new();

    for patch in batch {
        let shape = patch.shape();
        match runs.last_mut() {
            Some((run_shape, run)) if *run_shape == shape => run.push(patch),
            _ => runs.push((shape, vec![patch])),
        }
    }

    runs.into_iter().map(|(_, run)| run).collect()
}

/// `in.("a","b")` with PostgREST quoting
fn in_filter(keys: &[String]) -> String {
    let quoted: Vec<String> = keys
        .iter()
        .map(|k| format!("\"{}\"", k.replace('\\', "\\\\").replace('"', "\\\"")))
        .collect();
    format!("in.({})", quoted.join(","))
}

fn escape_pattern(value: &str) -> String {
    let mut escaped = String::with_capacity(value.len());
    for c in value.chars() {
        if matches!(c, '%' | '_' | '*' | '\\') {
            escaped.push('\\');
        }
        escaped.push(c);
    }
    escaped
}

/// Total from a `Content-Range: 0-9/10` or `*/10` header
fn content_range_total(response: &Response) -> Option<u64> {
    let header = response.headers().get("content-range")?.to_str().ok()?;
    parse_content_range(header)
}

fn parse_content_range(header: &str) -> Option<u64> {
    header.rsplit('/').next()?.trim().parse().ok()
}
