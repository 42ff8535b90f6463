//! Row normalization and soft validation

use serde::Serialize;

use super::headers::{HeaderIndex, fields};

/// One sheet row after coercion. Strings are trimmed and empty when the cell
/// is blank or absent; numbers are `None` when blank or unparseable.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct NormalizedRow {
    /// 1-based sheet row number (the header is row 1)
    pub row_number: usize,
    pub register_no: String,
    pub name: String,
    pub father_name: String,
    pub mother_name: String,
    pub address: String,
    pub class: String,
    pub year: String,
    pub department: String,
    pub email: String,
    pub phone: String,
    pub cia_1_mark: Option<f64>,
    pub cia_2_mark: Option<f64>,
    pub present_today: Option<f64>,
    pub leave_taken: Option<f64>,
    /// Filled by the attendance stage, only for rows with academic data
    pub attendance_percentage: Option<f64>,
}

impl NormalizedRow {
    pub fn has_register_no(&self) -> bool {
        !self.register_no.is_empty()
    }

    /// True when any of the four academic values is present
    pub fn academic_supplied(&self) -> bool {
        self.cia_1_mark.is_some()
            || self.cia_2_mark.is_some()
            || self.present_today.is_some()
            || self.leave_taken.is_some()
    }
}

/// Soft validation findings; none of these drop the row by themselves
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum RowWarning {
    MissingRegisterNo,
    MissingName,
    MissingDepartment,
}

impl RowWarning {
    pub fn field(&self) -> &'static str {
        match self {
            RowWarning::MissingRegisterNo => fields::REGISTER_NO,
            RowWarning::MissingName => fields::NAME,
            RowWarning::MissingDepartment => fields::DEPARTMENT,
        }
    }
}

/// Result of normalizing a single row
#[derive(Debug, Clone, PartialEq)]
pub struct RowReport {
    pub row: NormalizedRow,
    pub warnings: Vec<RowWarning>,
    /// Set when the department was copied from the class column
    pub department_from_class: bool,
}

/// Trimmed text for `field`, empty when missing
pub fn text_cell(index: &HeaderIndex, row: &[String], field: &str) -> String {
    index
        .cell(row, field)
        .map(|s| s.trim().to_string())
        .unwrap_or_default()
}

/// Finite number for `field`, `None` when blank or not a number.
/// Surrounding whitespace and a trailing `%` are tolerated.
pub fn number_cell(index: &HeaderIndex, row: &[String], field: &str) -> Option<f64> {
    parse_number(index.cell(row, field)?)
}

pub fn parse_number(raw: &str) -> Option<f64> {
    let trimmed = raw.trim();
    let trimmed = trimmed.strip_suffix('%').unwrap_or(trimmed).trim_end();
    if trimmed.is_empty() {
        return None;
    }
    trimmed.parse::<f64>().ok().filter(|n| n.is_finite())
}

/// Coerce one data row through the header index
pub fn normalize_row(index: &HeaderIndex, row: &[String], row_number: usize) -> RowReport {
    let text = |field: &str| text_cell(index, row, field);
    let number = |field: &str| number_cell(index, row, field);

    let mut normalized = NormalizedRow {
        row_number,
        register_no: text(fields::REGISTER_NO),
        name: text(fields::NAME),
        father_name: text(fields::FATHER_NAME),
        mother_name: text(fields::MOTHER_NAME),
        address: text(fields::ADDRESS),
        class: text(fields::CLASS),
        year: text(fields::YEAR),
        department: text(fields::DEPARTMENT),
        email: text(fields::EMAIL),
        phone: text(fields::PHONE),
        cia_1_mark: number(fields::CIA_1_MARK),
        cia_2_mark: number(fields::CIA_2_MARK),
        present_today: number(fields::PRESENT_TODAY),
        leave_taken: number(fields::LEAVE_TAKEN),
        attendance_percentage: None,
    };

    let mut department_from_class = false;
    if normalized.department.is_empty() && !normalized.class.is_empty() {
        normalized.department = normalized.class.clone();
        department_from_class = true;
    }

    let mut warnings = Vec::new();
    if normalized.register_no.is_empty() {
        warnings.push(RowWarning::MissingRegisterNo);
    }
    if normalized.name.is_empty() {
        warnings.push(RowWarning::MissingName);
    }
    if normalized.department.is_empty() {
        warnings.push(RowWarning::MissingDepartment);
    }

    RowReport {
        row: normalized,
        warnings,
        department_from_class,
    }
}

/// Normalize every data row. Sheet row numbers start at 2 (after the header).
pub fn normalize_rows(index: &HeaderIndex, rows: &[Vec<String>]) -> Vec<RowReport> {
    rows.iter()
        .enumerate()
        .map(|(i, row)| normalize_row(index, row, i + 2))
        .collect()
}
