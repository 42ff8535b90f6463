//! Retry handling for source requests
//!
//! Every network call made while fetching the sheet goes through a
//! [`RetryPolicy`]; exhausting it aborts the run with the last error.

pub mod config;
pub mod retry;

pub use config::RetryConfig;
pub use retry::RetryPolicy;
