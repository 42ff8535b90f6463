//! Sparse write payloads
//!
//! A [`RecordPatch`] lists, per column, either a value to write or
//! [`Patch::Omit`]. Omitted columns are left out of the write entirely so the
//! store keeps whatever it already holds for them.

use serde_json::{Map, Value, json};

use super::attendance::attendance_percentage;
use super::headers::fields;
use super::normalize::NormalizedRow;

/// One column slot of a write
#[derive(Debug, Clone, PartialEq)]
pub enum Patch<T> {
    Set(T),
    Omit,
}

impl Patch<String> {
    /// Blank text carries no information and is omitted
    pub fn text(value: &str) -> Self {
        let trimmed = value.trim();
        if trimmed.is_empty() {
            Patch::Omit
        } else {
            Patch::Set(trimmed.to_string())
        }
    }
}

/// The four academic inputs plus the derived percentage, written as a unit
#[derive(Debug, Clone, PartialEq)]
pub struct AcademicGroup {
    pub cia_1_mark: Option<f64>,
    pub cia_2_mark: Option<f64>,
    pub present_today: Option<f64>,
    pub leave_taken: Option<f64>,
    pub attendance_percentage: f64,
}

/// Column value as the stores see it
#[derive(Debug, Clone, PartialEq)]
pub enum ColumnValue {
    Text(String),
    Number(Option<f64>),
}

impl ColumnValue {
    pub fn to_json(&self) -> Value {
        match self {
            ColumnValue::Text(s) => Value::String(s.clone()),
            ColumnValue::Number(Some(n)) => json!(n),
            ColumnValue::Number(None) => Value::Null,
        }
    }
}

/// Sparse upsert payload for one record
#[derive(Debug, Clone, PartialEq)]
pub struct RecordPatch {
    pub register_no: String,
    pub name: Patch<String>,
    pub father_name: Patch<String>,
    pub mother_name: Patch<String>,
    pub address: Patch<String>,
    pub class: Patch<String>,
    pub year: Patch<String>,
    pub department: Patch<String>,
    pub email: Patch<String>,
    pub phone: Patch<String>,
    pub academic: Patch<AcademicGroup>,
}

impl RecordPatch {
    /// Build the write payload for a normalized row.
    ///
    /// Blank profile and contact values are omitted. The academic group is
    /// written whole (with a freshly computed percentage) when any of its four
    /// inputs is present, and omitted whole otherwise.
    pub fn from_row(row: &NormalizedRow) -> Self {
        let academic = if row.academic_supplied() {
            Patch::Set(AcademicGroup {
                cia_1_mark: row.cia_1_mark,
                cia_2_mark: row.cia_2_mark,
                present_today: row.present_today,
                leave_taken: row.leave_taken,
                attendance_percentage: row.attendance_percentage.unwrap_or_else(|| {
                    attendance_percentage(row.present_today, row.leave_taken)
                }),
            })
        } else {
            Patch::Omit
        };

        Self {
            register_no: row.register_no.trim().to_string(),
            name: Patch::text(&row.name),
            father_name: Patch::text(&row.father_name),
            mother_name: Patch::text(&row.mother_name),
            address: Patch::text(&row.address),
            class: Patch::text(&row.class),
            year: Patch::text(&row.year),
            department: Patch::text(&row.department),
            email: Patch::text(&row.email),
            phone: Patch::text(&row.phone),
            academic,
        }
    }

    /// Columns written by this patch, key first, in a stable order
    pub fn columns(&self) -> Vec<(&'static str, ColumnValue)> {
        let mut columns = vec![(
            fields::REGISTER_NO,
            ColumnValue::Text(self.register_no.clone()),
        )];

        let text_slots = [
            (fields::NAME, &self.name),
            (fields::FATHER_NAME, &self.father_name),
            (fields::MOTHER_NAME, &self.mother_name),
            (fields::ADDRESS, &self.address),
            (fields::CLASS, &self.class),
            (fields::YEAR, &self.year),
            (fields::DEPARTMENT, &self.department),
            (fields::EMAIL, &self.email),
            (fields::PHONE, &self.phone),
        ];
        for (column, slot) in text_slots {
            if let Patch::Set(value) = slot {
                columns.push((column, ColumnValue::Text(value.clone())));
            }
        }

        if let Patch::Set(group) = &self.academic {
            columns.push((fields::CIA_1_MARK, ColumnValue::Number(group.cia_1_mark)));
            columns.push((fields::CIA_2_MARK, ColumnValue::Number(group.cia_2_mark)));
            columns.push((
                fields::PRESENT_TODAY,
                ColumnValue::Number(group.present_today),
            ));
            columns.push((fields::LEAVE_TAKEN, ColumnValue::Number(group.leave_taken)));
            columns.push((
                fields::ATTENDANCE_PERCENTAGE,
                ColumnValue::Number(Some(group.attendance_percentage)),
            ));
        }

        columns
    }

    /// Names of the written columns; patches with equal shapes can share a bulk request
    pub fn shape(&self) -> Vec<&'static str> {
        self.columns().into_iter().map(|(name, _)| name).collect()
    }

    /// JSON object holding only the written columns
    pub fn to_json(&self) -> Map<String, Value> {
        self.columns()
            .into_iter()
            .map(|(name, value)| (name.to_string(), value.to_json()))
            .collect()
    }
}
