//! Sequential batch upserts

use log::debug;

use super::events::{EventSink, SyncEvent};
use super::patch::RecordPatch;
use crate::error::{SyncError, SyncResult};
use crate::store::RecordStore;

pub const BATCH_SIZE: usize = 500;

/// One-shot iterator that cuts patches into batches as they are pulled
pub struct Batches {
    patches: std::vec::IntoIter<RecordPatch>,
    size: usize,
}

impl Batches {
    pub fn new(patches: Vec<RecordPatch>, size: usize) -> Self {
        Self {
            patches: patches.into_iter(),
            size: size.max(1),
        }
    }
}

impl Iterator for Batches {
    type Item = Vec<RecordPatch>;

    fn next(&mut self) -> Option<Self::Item> {
        let batch: Vec<RecordPatch> = self.patches.by_ref().take(self.size).collect();
        if batch.is_empty() { None } else { Some(batch) }
    }
}

/// Commit batches one at a time. The first failure stops the run; batches
/// already committed stay committed. Returns the number of rows written.
pub async fn commit_batches(
    store: &dyn RecordStore,
    batches: Batches,
    total: usize,
    sink: &dyn EventSink,
) -> SyncResult<usize> {
    let mut committed = 0;

    for (index, batch) in batches.enumerate() {
        store.upsert_batch(&batch).await.map_err(|e| match e {
            SyncError::Persistence(msg) => SyncError::Persistence(format!(
                "batch {} failed with {}/{} row(s) committed: {}",
                index + 1,
                committed,
                total,
                msg
            )),
            other => other,
        })?;

        committed += batch.len();
        debug!("committed batch {} ({} rows)", index + 1, batch.len());
        sink.emit(SyncEvent::BatchCommitted {
            index,
            size: batch.len(),
            committed,
            total,
        });
    }

    Ok(committed)
}
