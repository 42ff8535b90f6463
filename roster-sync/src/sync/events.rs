//! Structured run events
//!
//! The orchestrator and the source adapter report progress as [`SyncEvent`]s
//! through an [`EventSink`]. [`LogSink`] forwards them to the `log` facade.

use log::{debug, error, info, warn};
use serde::Serialize;

use super::normalize::RowWarning;
use super::orchestrator::{SyncStage, SyncSummary};

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum SyncEvent {
    StageEntered {
        stage: SyncStage,
    },
    FetchStarted {
        strategy: &'static str,
    },
    FetchRetry {
        attempt: u32,
        max_attempts: u32,
        error: String,
    },
    TableParsed {
        data_rows: usize,
    },
    HeadersResolved {
        fields: Vec<String>,
    },
    RowWarning {
        row_number: usize,
        register_no: String,
        warning: RowWarning,
    },
    FallbackApplied {
        row_number: usize,
        register_no: String,
        department: String,
    },
    RowSkipped {
        row_number: usize,
    },
    DeletionPlanned {
        stale: usize,
        full_wipe: bool,
    },
    RowsDeleted {
        count: u64,
    },
    BatchCommitted {
        index: usize,
        size: usize,
        committed: usize,
        total: usize,
    },
    RunSummary {
        summary: SyncSummary,
    },
    Aborted {
        stage: SyncStage,
        kind: &'static str,
        error: String,
    },
}

/// Receiver for run events
pub trait EventSink: Send + Sync {
    fn emit(&self, event: SyncEvent);
}

/// Writes each event as a log line at a level matching its severity
#[derive(Debug, Default, Clone, Copy)]
pub struct LogSink;

impl EventSink for LogSink {
    fn emit(&self, event: SyncEvent) {
        match event {
            SyncEvent::StageEntered { stage } => debug!("stage: {:?}", stage),
            SyncEvent::FetchStarted { strategy } => info!("Fetching sheet via {}", strategy),
            SyncEvent::FetchRetry {
                attempt,
                max_attempts,
                error,
            } => warn!(
                "Fetch attempt {}/{} failed: {}",
                attempt, max_attempts, error
            ),
            SyncEvent::TableParsed { data_rows } => {
                info!("Parsed {} data row(s) from the sheet", data_rows)
            }
            SyncEvent::HeadersResolved { fields } => {
                debug!("Resolved columns: {}", fields.join(", "))
            }
            SyncEvent::RowWarning {
                row_number,
                register_no,
                warning,
            } => warn!(
                "Row {} ({}): missing {}",
                row_number,
                if register_no.is_empty() { "no register number" } else { register_no.as_str() },
                warning.field()
            ),
            SyncEvent::FallbackApplied {
                row_number,
                register_no,
                department,
            } => info!(
                "Row {} ({}): department blank, using class '{}'",
                row_number, register_no, department
            ),
            SyncEvent::RowSkipped { row_number } => {
                warn!("Row {} skipped: no register number", row_number)
            }
            SyncEvent::DeletionPlanned { stale, full_wipe } => {
                if full_wipe {
                    warn!(
                        "Source has no register numbers: deleting ALL {} stored row(s) to mirror an empty sheet",
                        stale
                    );
                } else if stale > 0 {
                    info!("Deleting {} row(s) no longer in the sheet", stale);
                } else {
                    info!("No stale rows to delete");
                }
            }
            SyncEvent::RowsDeleted { count } => info!("Deleted {} row(s)", count),
            SyncEvent::BatchCommitted {
                index,
                size,
                committed,
                total,
            } => info!(
                "Batch {} committed ({} rows, {}/{})",
                index + 1,
                size,
                committed,
                total
            ),
            SyncEvent::RunSummary { summary } => info!(
                "Sync complete: total={} processed={} failed={} deleted={} in {:.2}s{}",
                summary.total_rows,
                summary.processed_rows,
                summary.failed_rows,
                summary.deleted_rows,
                summary.duration.as_secs_f64(),
                if summary.dry_run { " (dry run)" } else { "" }
            ),
            SyncEvent::Aborted { stage, kind, error } => {
                error!("Sync aborted during {:?} ({} error): {}", stage, kind, error)
            }
        }
    }
}

/// Collects events in memory
#[cfg(test)]
#[derive(Debug, Default)]
pub struct RecordingSink {
    events: std::sync::Mutex<Vec<SyncEvent>>,
}

#[cfg(test)]
impl RecordingSink {
    pub fn events(&self) -> Vec<SyncEvent> {
        self.events.lock().unwrap().clone()
    }
}

#[cfg(test)]
impl EventSink for RecordingSink {
    fn emit(&self, event: SyncEvent) {
        self.events.lock().unwrap().push(event);
    }
}
