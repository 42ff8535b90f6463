//! Spreadsheet API access
//!
//! Fetch strategies for the source sheet, the service-account token exchange
//! they may need, and the retry policy every request runs under.

pub mod auth;
pub mod resilience;
pub mod sheets;

use std::time::Duration;

pub use sheets::{RowSource, SheetsSource, SourcePayload};

const USER_AGENT: &str = concat!("roster-sync/", env!("CARGO_PKG_VERSION"));

/// Shared reqwest client settings; the timeout is the only bound on a hung request
pub fn http_client(timeout: Duration) -> reqwest::Result<reqwest::Client> {
    reqwest::Client::builder()
        .timeout(timeout)
        .user_agent(USER_AGENT)
        .build()
}
