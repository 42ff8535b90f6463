//! Run sequencing
//!
//! [`Orchestrator::run`] walks the stages in order:
//!
//! ```text
//! Fetching -> Parsing -> Normalizing -> Reconciling -> Upserting -> Summarizing -> Done
//! ```
//!
//! Any stage error ends the run in `Aborted` with the stage it happened in.
//! Rows without a register number are counted, not errors.

use log::{debug, error};
use serde::Serialize;
use std::collections::HashMap;
use std::fmt;
use std::time::{Duration, Instant};

use super::attendance::derive_attendance;
use super::events::{EventSink, SyncEvent};
use super::headers::HeaderIndex;
use super::normalize::{NormalizedRow, normalize_rows};
use super::patch::RecordPatch;
use super::reconcile;
use super::table::{RawTable, parse_table};
use super::upsert::{BATCH_SIZE, Batches, commit_batches};
use crate::api::{RowSource, SourcePayload};
use crate::error::{SourceError, SyncError, SyncResult};
use crate::store::RecordStore;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncStage {
    Fetching,
    Parsing,
    Normalizing,
    Reconciling,
    Upserting,
    Summarizing,
    Done,
    Aborted,
}

impl fmt::Display for SyncStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SyncStage::Fetching => "fetching",
            SyncStage::Parsing => "parsing",
            SyncStage::Normalizing => "normalizing",
            SyncStage::Reconciling => "reconciling",
            SyncStage::Upserting => "upserting",
            SyncStage::Summarizing => "summarizing",
            SyncStage::Done => "done",
            SyncStage::Aborted => "aborted",
        };
        f.write_str(name)
    }
}

/// Outcome of a completed run
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SyncSummary {
    /// Data rows read from the sheet (header excluded)
    pub total_rows: usize,
    /// Rows routed to the upsert
    pub processed_rows: usize,
    /// Rows dropped for a missing register number
    pub failed_rows: usize,
    pub deleted_rows: u64,
    pub duration: Duration,
    pub dry_run: bool,
}

/// A run that stopped early
#[derive(Debug)]
pub struct SyncAbort {
    pub stage: SyncStage,
    pub error: SyncError,
    /// Stale rows were already deleted when the run stopped
    pub after_deletion: bool,
}

impl fmt::Display for SyncAbort {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "sync aborted while {}: {}", self.stage, self.error)
    }
}

impl std::error::Error for SyncAbort {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        Some(&self.error)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SyncOptions {
    /// Read and plan only; the store is never written
    pub dry_run: bool,
    pub batch_size: usize,
}

impl Default for SyncOptions {
    fn default() -> Self {
        Self {
            dry_run: false,
            batch_size: BATCH_SIZE,
        }
    }
}

/// Rows split by whether they can be written
struct Partitioned {
    total: usize,
    valid: Vec<NormalizedRow>,
    failed: usize,
}

pub struct Orchestrator<'a> {
    source: &'a dyn RowSource,
    store: &'a dyn RecordStore,
    sink: &'a dyn EventSink,
    options: SyncOptions,
}

impl<'a> Orchestrator<'a> {
    pub fn new(
        source: &'a dyn RowSource,
        store: &'a dyn RecordStore,
        sink: &'a dyn EventSink,
        options: SyncOptions,
    ) -> Self {
        Self {
            source,
            store,
            sink,
            options,
        }
    }

    pub async fn run(&self) -> Result<SyncSummary, SyncAbort> {
        let started = Instant::now();
        debug!(
            "sync from {} into {}{}",
            self.source.describe(),
            self.store.describe(),
            if self.options.dry_run { " (dry run)" } else { "" }
        );

        self.enter(SyncStage::Fetching);
        let payload = self
            .source
            .fetch(self.sink)
            .await
            .map_err(|e| self.abort(SyncStage::Fetching, e.into(), false))?;

        self.enter(SyncStage::Parsing);
        let table = self
            .parse(payload)
            .map_err(|e| self.abort(SyncStage::Parsing, e, false))?;

        self.enter(SyncStage::Normalizing);
        let rows = self.normalize(&table);

        self.enter(SyncStage::Reconciling);
        let deleted_rows = self
            .reconcile(&rows.valid)
            .await
            .map_err(|e| self.abort(SyncStage::Reconciling, e, false))?;

        self.enter(SyncStage::Upserting);
        if !self.options.dry_run {
            let patches = latest_per_key(&rows.valid);
            let total = patches.len();
            commit_batches(
                self.store,
                Batches::new(patches, self.options.batch_size),
                total,
                self.sink,
            )
            .await
            .map_err(|e| self.abort(SyncStage::Upserting, e, deleted_rows > 0))?;
        }

        self.enter(SyncStage::Summarizing);
        let summary = SyncSummary {
            total_rows: rows.total,
            processed_rows: rows.valid.len(),
            failed_rows: rows.failed,
            deleted_rows,
            duration: started.elapsed(),
            dry_run: self.options.dry_run,
        };
        self.sink.emit(SyncEvent::RunSummary {
            summary: summary.clone(),
        });

        self.enter(SyncStage::Done);
        Ok(summary)
    }

    fn enter(&self, stage: SyncStage) {
        self.sink.emit(SyncEvent::StageEntered { stage });
    }

    fn abort(&self, stage: SyncStage, error: SyncError, after_deletion: bool) -> SyncAbort {
        self.sink.emit(SyncEvent::Aborted {
            stage,
            kind: error.kind(),
            error: error.to_string(),
        });
        if after_deletion {
            error!(
                "Stale rows were deleted before the upsert failed; they are not restored and rows of uncommitted batches may be missing until the next successful run"
            );
        }
        self.sink.emit(SyncEvent::StageEntered {
            stage: SyncStage::Aborted,
        });

        SyncAbort {
            stage,
            error,
            after_deletion,
        }
    }

    fn parse(&self, payload: SourcePayload) -> SyncResult<RawTable> {
        let table = match payload {
            SourcePayload::Csv(text) => parse_table(&text)?,
            SourcePayload::Values(values) => RawTable::from_rows(values),
        };

        if table.header.iter().all(|label| label.trim().is_empty()) {
            return Err(SourceError::InvalidStructure("sheet has no header row".to_string()).into());
        }

        self.sink.emit(SyncEvent::TableParsed {
            data_rows: table.rows.len(),
        });
        Ok(table)
    }

    fn normalize(&self, table: &RawTable) -> Partitioned {
        let index = HeaderIndex::resolve(&table.header);
        self.sink.emit(SyncEvent::HeadersResolved {
            fields: index.field_names().into_iter().map(str::to_string).collect(),
        });

        let mut valid = Vec::with_capacity(table.rows.len());
        let mut failed = 0;

        for report in normalize_rows(&index, &table.rows) {
            let row_number = report.row.row_number;
            for warning in &report.warnings {
                self.sink.emit(SyncEvent::RowWarning {
                    row_number,
                    register_no: report.row.register_no.clone(),
                    warning: *warning,
                });
            }
            if report.department_from_class {
                self.sink.emit(SyncEvent::FallbackApplied {
                    row_number,
                    register_no: report.row.register_no.clone(),
                    department: report.row.department.clone(),
                });
            }

            if report.row.has_register_no() {
                valid.push(report.row);
            } else {
                failed += 1;
                self.sink.emit(SyncEvent::RowSkipped { row_number });
            }
        }

        derive_attendance(&mut valid);

        Partitioned {
            total: table.rows.len(),
            valid,
            failed,
        }
    }

    async fn reconcile(&self, valid: &[NormalizedRow]) -> SyncResult<u64> {
        if !self.options.dry_run {
            return reconcile::reconcile(self.store, valid, self.sink).await;
        }

        let plan = reconcile::plan(self.store, &reconcile::source_keys(valid)).await?;
        self.sink.emit(SyncEvent::DeletionPlanned {
            stale: plan.len(),
            full_wipe: plan.is_full_wipe(),
        });
        Ok(plan.len() as u64)
    }
}

/// One patch per key, the last row for a key winning, in first-seen order
fn latest_per_key(rows: &[NormalizedRow]) -> Vec<RecordPatch> {
    let mut position: HashMap<&str, usize> = HashMap::new();
    let mut patches: Vec<RecordPatch> = Vec::with_capacity(rows.len());

    for row in rows {
        let patch = RecordPatch::from_row(row);
        match position.get(row.register_no.as_str()) {
            Some(&i) => patches[i] = patch,
            None => {
                position.insert(row.register_no.as_str(), patches.len());
                patches.push(patch);
            }
        }
    }

    if patches.len() < rows.len() {
        debug!(
            "{} duplicate register number(s) collapsed, last row wins",
            rows.len() - patches.len()
        );
    }
    patches
}
