//! In-memory store for tests

use async_trait::async_trait;
use std::collections::BTreeMap;
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};

use super::{MatchMode, RecordStore, StudentRecord};
use crate::error::{SyncError, SyncResult};
use crate::sync::patch::{ColumnValue, RecordPatch};

impl StudentRecord {
    pub fn new(register_no: impl Into<String>) -> Self {
        Self {
            register_no: register_no.into(),
            ..Default::default()
        }
    }

    /// Merge a sparse patch: set columns overwrite, omitted columns stay
    pub fn apply(&mut self, patch: &RecordPatch) {
        for (column, value) in patch.columns() {
            match value {
                ColumnValue::Text(text) => {
                    if let Some(slot) = self.text_slot(column) {
                        *slot = Some(text);
                    }
                }
                ColumnValue::Number(number) => {
                    if let Some(slot) = self.number_slot(column) {
                        *slot = number;
                    }
                }
            }
        }
    }

    fn text_slot(&mut self, column: &str) -> Option<&mut Option<String>> {
        use crate::sync::headers::fields::*;
        Some(match column {
            NAME => &mut self.name,
            FATHER_NAME => &mut self.father_name,
            MOTHER_NAME => &mut self.mother_name,
            ADDRESS => &mut self.address,
            CLASS => &mut self.class,
            YEAR => &mut self.year,
            DEPARTMENT => &mut self.department,
            EMAIL => &mut self.email,
            PHONE => &mut self.phone,
            _ => return None,
        })
    }

    fn number_slot(&mut self, column: &str) -> Option<&mut Option<f64>> {
        use crate::sync::headers::fields::*;
        Some(match column {
            CIA_1_MARK => &mut self.cia_1_mark,
            CIA_2_MARK => &mut self.cia_2_mark,
            PRESENT_TODAY => &mut self.present_today,
            LEAVE_TAKEN => &mut self.leave_taken,
            ATTENDANCE_PERCENTAGE => &mut self.attendance_percentage,
            _ => return None,
        })
    }
}

#[derive(Debug, Default)]
pub struct MemoryStore {
    records: Mutex<BTreeMap<String, StudentRecord>>,
    upsert_calls: AtomicUsize,
    /// 1-based upsert call that fails, if any
    fail_on_upsert_call: Option<usize>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_keys(keys: &[&str]) -> Self {
        let store = Self::new();
        {
            let mut records = store.records.lock().unwrap();
            for key in keys {
                records.insert(key.to_string(), StudentRecord::new(*key));
            }
        }
        store
    }

    pub fn with_records(records: Vec<StudentRecord>) -> Self {
        let store = Self::new();
        store
            .records
            .lock()
            .unwrap()
            .extend(records.into_iter().map(|r| (r.register_no.clone(), r)));
        store
    }

    pub fn failing_on_upsert(mut self, call: usize) -> Self {
        self.fail_on_upsert_call = Some(call);
        self
    }

    pub fn keys(&self) -> Vec<String> {
        self.records.lock().unwrap().keys().cloned().collect()
    }

    pub fn get(&self, key: &str) -> Option<StudentRecord> {
        self.records.lock().unwrap().get(key).cloned()
    }

    pub fn upsert_calls(&self) -> usize {
        self.upsert_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl RecordStore for MemoryStore {
    async fn upsert_batch(&self, batch: &[RecordPatch]) -> SyncResult<()> {
        let call = self.upsert_calls.fetch_add(1, Ordering::SeqCst) + 1;
        if self.fail_on_upsert_call == Some(call) {
            return Err(SyncError::persistence(
                "upsert failed",
                format!("injected failure on call {}", call),
            ));
        }

        let mut records = self.records.lock().unwrap();
        for patch in batch {
            records
                .entry(patch.register_no.clone())
                .or_insert_with(|| StudentRecord::new(patch.register_no.clone()))
                .apply(patch);
        }
        Ok(())
    }

    async fn select_all_keys(&self) -> SyncResult<Vec<String>> {
        Ok(self.keys())
    }

    async fn delete_keys(&self, keys: &[String]) -> SyncResult<u64> {
        let mut records = self.records.lock().unwrap();
        Ok(keys.iter().filter(|k| records.remove(*k).is_some()).count() as u64)
    }

    async fn delete_all(&self) -> SyncResult<u64> {
        let mut records = self.records.lock().unwrap();
        let count = records.len() as u64;
        records.clear();
        Ok(count)
    }

    async fn find(&self, register_no: &str) -> SyncResult<Option<StudentRecord>> {
        Ok(self.get(register_no.trim()))
    }

    async fn search(
        &self,
        query: &str,
        mode: MatchMode,
        limit: usize,
    ) -> SyncResult<Vec<StudentRecord>> {
        let query = query.trim().to_lowercase();
        Ok(self
            .records
            .lock()
            .unwrap()
            .values()
            .filter(|r| {
                let key = r.register_no.to_lowercase();
                match mode {
                    MatchMode::Prefix => key.starts_with(&query),
                    MatchMode::Contains => key.contains(&query),
                }
            })
            .take(limit)
            .cloned()
            .collect())
    }

    fn describe(&self) -> String {
        "memory store".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sync::normalize::NormalizedRow;

    #[test]
    fn test_apply_keeps_omitted_columns() {
        let mut record = StudentRecord::new("S1");
        record.email = Some("old@example.com".to_string());
        record.present_today = Some(10.0);
        record.attendance_percentage = Some(100.0);

        let patch = RecordPatch::from_row(&NormalizedRow {
            register_no: "S1".to_string(),
            name: "Alice".to_string(),
            ..Default::default()
        });
        record.apply(&patch);

        assert_eq!(record.name.as_deref(), Some("Alice"));
        assert_eq!(record.email.as_deref(), Some("old@example.com"));
        assert_eq!(record.present_today, Some(10.0));
        assert_eq!(record.attendance_percentage, Some(100.0));
    }

    #[test]
    fn test_apply_overwrites_academic_group() {
        let mut record = StudentRecord::new("S1");
        record.cia_1_mark = Some(30.0);
        record.present_today = Some(10.0);

        let patch = RecordPatch::from_row(&NormalizedRow {
            register_no: "S1".to_string(),
            leave_taken: Some(5.0),
            ..Default::default()
        });
        record.apply(&patch);

        assert_eq!(record.cia_1_mark, None);
        assert_eq!(record.present_today, None);
        assert_eq!(record.leave_taken, Some(5.0));
        assert_eq!(record.attendance_percentage, Some(0.0));
    }
}
