//! Deletion of stored rows that left the sheet

use log::debug;
use std::collections::BTreeSet;

use super::events::{EventSink, SyncEvent};
use super::normalize::NormalizedRow;
use crate::error::SyncResult;
use crate::store::RecordStore;

/// What the deleter will do to the store
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeletionPlan {
    /// Every stored key is still in the sheet
    Nothing,
    /// The sheet has no keys at all, so the store is emptied
    All { stored: usize },
    /// Stored keys missing from the sheet
    Keys(Vec<String>),
}

impl DeletionPlan {
    /// Rows the plan expects to remove
    pub fn len(&self) -> usize {
        match self {
            DeletionPlan::Nothing => 0,
            DeletionPlan::All { stored } => *stored,
            DeletionPlan::Keys(keys) => keys.len(),
        }
    }

    pub fn is_full_wipe(&self) -> bool {
        matches!(self, DeletionPlan::All { .. })
    }
}

/// Trimmed, non-blank, deduplicated keys of the source rows
pub fn source_keys(rows: &[NormalizedRow]) -> BTreeSet<String> {
    rows.iter()
        .map(|row| row.register_no.trim())
        .filter(|key| !key.is_empty())
        .map(str::to_string)
        .collect()
}

/// Stored keys absent from the source, in stored order
pub fn stale_keys(stored: &[String], source: &BTreeSet<String>) -> Vec<String> {
    let mut seen = BTreeSet::new();
    stored
        .iter()
        .filter(|key| !source.contains(key.as_str()))
        .filter(|key| seen.insert(*key))
        .cloned()
        .collect()
}

/// Compare the source keys with what the store holds
pub async fn plan(store: &dyn RecordStore, source: &BTreeSet<String>) -> SyncResult<DeletionPlan> {
    let stored = store.select_all_keys().await?;
    debug!("store holds {} key(s), sheet has {}", stored.len(), source.len());

    if source.is_empty() {
        return Ok(DeletionPlan::All {
            stored: stored.len(),
        });
    }

    let stale = stale_keys(&stored, source);
    Ok(if stale.is_empty() {
        DeletionPlan::Nothing
    } else {
        DeletionPlan::Keys(stale)
    })
}

/// Carry out a plan, returning the number of rows removed
pub async fn execute(
    store: &dyn RecordStore,
    plan: &DeletionPlan,
    sink: &dyn EventSink,
) -> SyncResult<u64> {
    let deleted = match plan {
        DeletionPlan::Nothing => 0,
        DeletionPlan::All { .. } => store.delete_all().await?,
        DeletionPlan::Keys(keys) => store.delete_keys(keys).await?,
    };

    if deleted > 0 || plan.is_full_wipe() {
        sink.emit(SyncEvent::RowsDeleted { count: deleted });
    }
    Ok(deleted)
}

/// Plan, announce and delete
pub async fn reconcile(
    store: &dyn RecordStore,
    rows: &[NormalizedRow],
    sink: &dyn EventSink,
) -> SyncResult<u64> {
    let plan = plan(store, &source_keys(rows)).await?;
    sink.emit(SyncEvent::DeletionPlanned {
        stale: plan.len(),
        full_wipe: plan.is_full_wipe(),
    });
    execute(store, &plan, sink).await
}
