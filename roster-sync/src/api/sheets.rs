//! Sheet fetch strategies
//!
//! Exactly one strategy is used per run, picked by the credentials that are
//! configured: service account, then API key, then the public CSV export.

use async_trait::async_trait;
use log::debug;
use reqwest::{Client, Response};
use serde_json::Value;

use super::auth::{ServiceAccountKey, TokenProvider};
use super::http_client;
use super::resilience::RetryPolicy;
use crate::config::{ServiceAccountSource, SourceConfig, SyncConfig};
use crate::error::{SourceError, SyncError, SyncResult};
use crate::sync::events::{EventSink, SyncEvent};

/// Raw sheet content as delivered by a strategy
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SourcePayload {
    /// CSV export text, still to be parsed
    Csv(String),
    /// Value arrays from the API, header row first
    Values(Vec<Vec<String>>),
}

/// Anything the orchestrator can pull rows from
#[async_trait]
pub trait RowSource: Send + Sync {
    async fn fetch(&self, sink: &dyn EventSink) -> Result<SourcePayload, SourceError>;

    fn describe(&self) -> String;
}

/// How the sheet will be read
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FetchStrategy {
    ServiceAccount(ServiceAccountSource),
    ApiKey(String),
    CsvExport,
}

impl FetchStrategy {
    /// First available credential wins
    pub fn select(config: &SourceConfig) -> Self {
        if let Some(service_account) = &config.service_account {
            FetchStrategy::ServiceAccount(service_account.clone())
        } else if let Some(key) = &config.api_key {
            FetchStrategy::ApiKey(key.clone())
        } else {
            FetchStrategy::CsvExport
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            FetchStrategy::ServiceAccount(_) => "service account",
            FetchStrategy::ApiKey(_) => "API key",
            FetchStrategy::CsvExport => "public CSV export",
        }
    }
}

/// Google Sheets source
pub struct SheetsSource {
    client: Client,
    config: SourceConfig,
    strategy: FetchStrategy,
    retry: RetryPolicy,
}

impl SheetsSource {
    pub fn new(config: &SyncConfig) -> SyncResult<Self> {
        let client = http_client(config.http_timeout)
            .map_err(|e| SyncError::Configuration(format!("http client: {}", e)))?;

        Ok(Self {
            client,
            strategy: FetchStrategy::select(&config.source),
            config: config.source.clone(),
            retry: RetryPolicy::new(config.retry.clone()),
        })
    }

    pub fn values_url(&self) -> String {
        format!(
            "{}/{}/values/{}",
            self.config.api_base,
            urlencoding::encode(&self.config.sheet_id),
            urlencoding::encode(&self.config.range)
        )
    }

    pub fn export_url(&self) -> String {
        format!(
            "{}/{}/export?format=csv&gid={}",
            self.config.export_base,
            urlencoding::encode(&self.config.sheet_id),
            urlencoding::encode(&self.config.gid)
        )
    }

    async fn fetch_with_service_account(
        &self,
        source: &ServiceAccountSource,
        sink: &dyn EventSink,
    ) -> Result<SourcePayload, SourceError> {
        let key = ServiceAccountKey::load(source).await?;
        let token = TokenProvider::new(&self.client, &self.retry)
            .access_token(&key, |attempt, err| self.report_retry(sink, attempt, err))
            .await?;

        let url = self.values_url();
        let rows = self
            .retry
            .execute(
                "values fetch",
                || async {
                    let response = self.client.get(&url).bearer_auth(&token).send().await?;
                    let response = check_status(response, &self.strategy).await?;
                    Ok::<_, SourceError>(response.json::<Value>().await?)
                },
                |attempt, err| self.report_retry(sink, attempt, err),
            )
            .await?;

        Ok(SourcePayload::Values(value_rows(&rows)?))
    }

    async fn fetch_with_api_key(
        &self,
        key: &str,
        sink: &dyn EventSink,
    ) -> Result<SourcePayload, SourceError> {
        let url = self.values_url();
        let rows = self
            .retry
            .execute(
                "values fetch",
                || async {
                    let response = self.client.get(&url).query(&[("key", key)]).send().await?;
                    let response = check_status(response, &self.strategy).await?;
                    Ok::<_, SourceError>(response.json::<Value>().await?)
                },
                |attempt, err| self.report_retry(sink, attempt, err),
            )
            .await?;

        Ok(SourcePayload::Values(value_rows(&rows)?))
    }

    async fn fetch_csv(&self, sink: &dyn EventSink) -> Result<SourcePayload, SourceError> {
        let url = self.export_url();
        let text = self
            .retry
            .execute(
                "csv export",
                || async {
                    let response = self.client.get(&url).send().await?;
                    let response = check_status(response, &self.strategy).await?;
                    if is_html(&response) {
                        // a private sheet answers with the sign-in page
                        return Err(SourceError::ExportForbidden {
                            status: response.status().as_u16(),
                        });
                    }
                    Ok::<_, SourceError>(response.text().await?)
                },
                |attempt, err| self.report_retry(sink, attempt, err),
            )
            .await?;

        if text.trim().is_empty() {
            return Err(SourceError::InvalidStructure(
                "CSV export returned no content".to_string(),
            ));
        }
        Ok(SourcePayload::Csv(text))
    }

    fn report_retry(&self, sink: &dyn EventSink, attempt: u32, err: &SourceError) {
        sink.emit(SyncEvent::FetchRetry {
            attempt,
            max_attempts: self.retry.config().max_attempts,
            error: err.to_string(),
        });
    }
}

#[async_trait]
impl RowSource for SheetsSource {
    async fn fetch(&self, sink: &dyn EventSink) -> Result<SourcePayload, SourceError> {
        sink.emit(SyncEvent::FetchStarted {
            strategy: self.strategy.name(),
        });
        debug!("fetching sheet {} via {}", self.config.sheet_id, self.strategy.name());

        match &self.strategy {
            FetchStrategy::ServiceAccount(source) => {
                self.fetch_with_service_account(source, sink).await
            }
            FetchStrategy::ApiKey(key) => self.fetch_with_api_key(key, sink).await,
            FetchStrategy::CsvExport => self.fetch_csv(sink).await,
        }
    }

    fn describe(&self) -> String {
        format!("sheet {} ({})", self.config.sheet_id, self.strategy.name())
    }
}

/// Map non-success responses to source errors, naming auth failures
async fn check_status(response: Response, strategy: &FetchStrategy) -> Result<Response, SourceError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let code = status.as_u16();
    if code == 401 || code == 403 {
        return Err(match strategy {
            FetchStrategy::ServiceAccount(_) => SourceError::ServiceAccountRejected { status: code },
            FetchStrategy::ApiKey(_) => SourceError::ApiKeyRejected { status: code },
            FetchStrategy::CsvExport => SourceError::ExportForbidden { status: code },
        });
    }

    let url = response.url().to_string();
    let body = response.text().await.unwrap_or_default();
    Err(SourceError::Status {
        status: code,
        url: redact_key(&url),
        body: body.chars().take(500).collect(),
    })
}

fn is_html(response: &Response) -> bool {
    response
        .headers()
        .get(reqwest::header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|v| v.starts_with("text/html"))
}

/// Drop the `key=` query value so API keys never reach the logs
fn redact_key(url: &str) -> String {
    match url.find("key=") {
        Some(start) => {
            let end = url[start..].find('&').map(|i| start + i).unwrap_or(url.len());
            format!("{}key=REDACTED{}", &url[..start], &url[end..])
        }
        None => url.to_string(),
    }
}

/// Extract `values` from a values-get response as string cells.
/// A missing or empty `values` array is an invalid source.
pub fn value_rows(body: &Value) -> Result<Vec<Vec<String>>, SourceError> {
    let values = body
        .get("values")
        .and_then(Value::as_array)
        .ok_or_else(|| SourceError::InvalidStructure("response has no values array".to_string()))?;

    if values.is_empty() {
        return Err(SourceError::InvalidStructure(
            "sheet range is empty".to_string(),
        ));
    }

    values
        .iter()
        .enumerate()
        .map(|(i, row)| {
            let cells = row.as_array().ok_or_else(|| {
                SourceError::InvalidStructure(format!("row {} is not an array", i + 1))
            })?;
            Ok(cells.iter().map(cell_text).collect())
        })
        .collect()
}

fn cell_text(cell: &Value) -> String {
    match cell {
        Value::String(s) => s.clone(),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::resilience::RetryConfig;
    use crate::config::{DEFAULT_EXPORT_BASE, DEFAULT_SHEETS_API_BASE, StoreTarget};
    use crate::sync::events::RecordingSink;
    use crate::test_server::{Reply, TestServer};
    use serde_json::json;
    use std::time::Duration;

    fn source_config() -> SourceConfig {
        SourceConfig {
            sheet_id: "sheet-1".to_string(),
            range: "Sheet1!A1:Z100".to_string(),
            gid: "0".to_string(),
            api_key: None,
            service_account: None,
            api_base: DEFAULT_SHEETS_API_BASE.to_string(),
            export_base: DEFAULT_EXPORT_BASE.to_string(),
        }
    }

    fn sync_config(source: SourceConfig, retry: RetryConfig) -> SyncConfig {
        SyncConfig {
            source,
            store: StoreTarget::Sqlite {
                url: "sqlite::memory:".to_string(),
            },
            table: "students".to_string(),
            retry,
            http_timeout: Duration::from_secs(5),
        }
    }

    /// Source pointed at a local server, with a short retry schedule
    fn local_source(server: &TestServer, api_key: Option<&str>, attempts: u32) -> SheetsSource {
        let source = SourceConfig {
            api_key: api_key.map(str::to_string),
            api_base: format!("{}/v4/spreadsheets", server.url),
            export_base: format!("{}/d", server.url),
            ..source_config()
        };
        let retry = RetryConfig::builder()
            .max_attempts(attempts)
            .base_delay(Duration::from_millis(1))
            .build();
        SheetsSource::new(&sync_config(source, retry)).unwrap()
    }

    fn response(status: u16, content_type: &str, body: &'static str) -> Response {
        Response::from(
            axum::http::Response::builder()
                .status(status)
                .header("content-type", content_type)
                .body(body)
                .unwrap(),
        )
    }

    #[test]
    fn test_strategy_precedence() {
        let mut config = source_config();
        assert_eq!(FetchStrategy::select(&config), FetchStrategy::CsvExport);

        config.api_key = Some("k".to_string());
        assert_eq!(
            FetchStrategy::select(&config),
            FetchStrategy::ApiKey("k".to_string())
        );

        config.service_account = Some(ServiceAccountSource::Inline("{}".to_string()));
        assert!(matches!(
            FetchStrategy::select(&config),
            FetchStrategy::ServiceAccount(_)
        ));
    }

    #[test]
    fn test_value_rows_stringifies_cells() {
        let body = json!({
            "range": "Sheet1!A1:C3",
            "values": [
                ["Register No", "Name", "Present Today"],
                ["S1", "Alice", 18],
                ["S2", null]
            ]
        });

        let rows = value_rows(&body).unwrap();
        assert_eq!(rows[1], vec!["S1", "Alice", "18"]);
        assert_eq!(rows[2], vec!["S2", ""]);
    }

    #[test]
    fn test_missing_or_empty_values_is_invalid() {
        let err = value_rows(&json!({"range": "Sheet1!A1:Z10"})).unwrap_err();
        assert!(matches!(err, SourceError::InvalidStructure(_)));

        let err = value_rows(&json!({"values": []})).unwrap_err();
        assert!(matches!(err, SourceError::InvalidStructure(_)));

        let err = value_rows(&json!({"values": ["flat"]})).unwrap_err();
        assert!(matches!(err, SourceError::InvalidStructure(_)));
    }

    #[test]
    fn test_redact_key() {
        assert_eq!(
            redact_key("https://x/values/A1?key=secret&alt=json"),
            "https://x/values/A1?key=REDACTED&alt=json"
        );
        assert_eq!(
            redact_key("https://x/values/A1?key=secret"),
            "https://x/values/A1?key=REDACTED"
        );
        assert_eq!(redact_key("https://x/export"), "https://x/export");
    }

    #[test]
    fn test_urls_encode_range_and_gid() {
        let source =
            SheetsSource::new(&sync_config(source_config(), RetryConfig::disabled())).unwrap();

        assert_eq!(
            source.values_url(),
            "https://sheets.googleapis.com/v4/spreadsheets/sheet-1/values/Sheet1%21A1%3AZ100"
        );
        assert_eq!(
            source.export_url(),
            "https://docs.google.com/spreadsheets/d/sheet-1/export?format=csv&gid=0"
        );
        assert_eq!(source.strategy, FetchStrategy::CsvExport);
    }

    #[tokio::test]
    async fn test_auth_statuses_are_named_per_strategy() {
        let sa = FetchStrategy::ServiceAccount(ServiceAccountSource::Inline("{}".to_string()));
        let err = check_status(response(401, "application/json", "{}"), &sa)
            .await
            .unwrap_err();
        assert!(matches!(err, SourceError::ServiceAccountRejected { status: 401 }));

        let key = FetchStrategy::ApiKey("k".to_string());
        let err = check_status(response(403, "application/json", "{}"), &key)
            .await
            .unwrap_err();
        assert!(matches!(err, SourceError::ApiKeyRejected { status: 403 }));

        let err = check_status(response(403, "text/html", "<html>"), &FetchStrategy::CsvExport)
            .await
            .unwrap_err();
        assert!(matches!(err, SourceError::ExportForbidden { status: 403 }));
    }

    #[tokio::test]
    async fn test_other_failures_keep_status_and_body() {
        let err = check_status(response(500, "text/plain", "backend down"), &FetchStrategy::CsvExport)
            .await
            .unwrap_err();
        match err {
            SourceError::Status { status, body, .. } => {
                assert_eq!(status, 500);
                assert_eq!(body, "backend down");
            }
            other => panic!("unexpected error: {:?}", other),
        }

        assert!(check_status(response(200, "text/csv", "a,b"), &FetchStrategy::CsvExport)
            .await
            .is_ok());
    }

    #[test]
    fn test_is_html() {
        assert!(is_html(&response(200, "text/html; charset=utf-8", "")));
        assert!(!is_html(&response(200, "text/csv", "")));
    }

    #[tokio::test]
    async fn test_csv_export_fetch() {
        let server = TestServer::start(|_, _| {
            Reply::text(200, "text/csv", "Register No,Name\r\nS1,Alice\r\n")
        })
        .await;
        let source = local_source(&server, None, 3);

        let payload = source.fetch(&RecordingSink::default()).await.unwrap();
        assert_eq!(
            payload,
            SourcePayload::Csv("Register No,Name\r\nS1,Alice\r\n".to_string())
        );

        let requests = server.requests();
        assert_eq!(requests.len(), 1);
        assert_eq!(requests[0].path, "/d/sheet-1/export");
        assert_eq!(requests[0].param("format").as_deref(), Some("csv"));
        assert_eq!(requests[0].param("gid").as_deref(), Some("0"));
    }

    #[tokio::test]
    async fn test_csv_sign_in_page_is_export_forbidden() {
        let server =
            TestServer::start(|_, _| Reply::text(200, "text/html; charset=utf-8", "<html>")).await;
        let source = local_source(&server, None, 2);
        let sink = RecordingSink::default();

        let err = source.fetch(&sink).await.unwrap_err();

        assert!(matches!(err, SourceError::ExportForbidden { status: 200 }));
        assert_eq!(server.requests().len(), 2);
        assert!(sink.events().iter().any(|e| matches!(
            e,
            SyncEvent::FetchRetry {
                attempt: 1,
                max_attempts: 2,
                ..
            }
        )));
    }

    #[tokio::test]
    async fn test_blank_csv_export_is_invalid() {
        let server = TestServer::start(|_, _| Reply::text(200, "text/csv", " \r\n\n")).await;
        let source = local_source(&server, None, 1);

        let err = source.fetch(&RecordingSink::default()).await.unwrap_err();
        assert!(matches!(err, SourceError::InvalidStructure(_)));
    }

    #[tokio::test]
    async fn test_api_key_fetch_sends_key_and_reads_values() {
        let server = TestServer::start(|_, _| {
            Reply::json(
                200,
                json!({"values": [["Register No", "Present Today"], ["S1", 18]]}),
            )
        })
        .await;
        let source = local_source(&server, Some("secret"), 1);

        let payload = source.fetch(&RecordingSink::default()).await.unwrap();
        assert_eq!(
            payload,
            SourcePayload::Values(vec![
                vec!["Register No".to_string(), "Present Today".to_string()],
                vec!["S1".to_string(), "18".to_string()],
            ])
        );

        let requests = server.requests();
        assert_eq!(
            requests[0].path,
            "/v4/spreadsheets/sheet-1/values/Sheet1%21A1%3AZ100"
        );
        assert_eq!(requests[0].param("key").as_deref(), Some("secret"));
    }

    #[tokio::test]
    async fn test_rejected_api_key_is_translated() {
        let server = TestServer::start(|_, _| Reply::json(403, json!({"error": {}}))).await;
        let source = local_source(&server, Some("secret"), 1);

        let err = source.fetch(&RecordingSink::default()).await.unwrap_err();
        assert!(matches!(err, SourceError::ApiKeyRejected { status: 403 }));
    }

    #[tokio::test]
    async fn test_failing_status_is_retried() {
        let server = TestServer::start(|index, _| {
            if index == 0 {
                Reply::text(503, "text/plain", "try later")
            } else {
                Reply::json(200, json!({"values": [["Register No"], ["S1"]]}))
            }
        })
        .await;
        let source = local_source(&server, Some("secret"), 3);
        let sink = RecordingSink::default();

        let payload = source.fetch(&sink).await.unwrap();

        assert!(matches!(payload, SourcePayload::Values(rows) if rows.len() == 2));
        assert_eq!(server.requests().len(), 2);
        let retries: Vec<_> = sink
            .events()
            .into_iter()
            .filter(|e| matches!(e, SyncEvent::FetchRetry { .. }))
            .collect();
        assert_eq!(retries.len(), 1);
    }

    #[tokio::test]
    async fn test_exhausted_retries_return_redacted_status() {
        let server = TestServer::start(|_, _| Reply::text(500, "text/plain", "boom")).await;
        let source = local_source(&server, Some("secret"), 2);

        let err = source.fetch(&RecordingSink::default()).await.unwrap_err();

        assert_eq!(server.requests().len(), 2);
        match err {
            SourceError::Status { status, url, body } => {
                assert_eq!(status, 500);
                assert_eq!(body, "boom");
                assert!(url.contains("key=REDACTED"));
                assert!(!url.contains("secret"));
            }
            other => panic!("unexpected error: {:?}", other),
        }
    }
}
