//! The sheet-to-store pipeline
//!
//! Leaf stages (`table`, `headers`, `normalize`, `attendance`, `patch`) are
//! pure. `reconcile` and `upsert` talk to a [`crate::store::RecordStore`];
//! `orchestrator` sequences everything and reports through `events`.

pub mod attendance;
pub mod events;
pub mod headers;
pub mod normalize;
pub mod orchestrator;
pub mod patch;
pub mod reconcile;
pub mod table;
pub mod upsert;

pub use events::LogSink;
pub use orchestrator::{Orchestrator, SyncOptions, SyncSummary};
