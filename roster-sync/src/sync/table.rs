//! Delimited text parsing for the CSV export path

use crate::error::{SyncError, SyncResult};

/// Raw cells of a sheet: first row is the header row
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RawTable {
    pub header: Vec<String>,
    pub rows: Vec<Vec<String>>,
}

impl RawTable {
    /// Split value arrays (API paths) into header and data rows
    pub fn from_rows(mut rows: Vec<Vec<String>>) -> Self {
        if rows.is_empty() {
            return Self::default();
        }
        let header = rows.remove(0);
        Self { header, rows }
    }
}

/// Parse comma-delimited text into rows of cells.
///
/// Handles quoted fields, delimiters and line breaks inside quotes, and `""`
/// as an escaped quote. Line endings are normalized to `\n` first and blank
/// lines are dropped. A quoted field that is never closed is an error; the
/// reader would otherwise fold the rest of the text into one cell.
pub fn parse_csv(text: &str) -> SyncResult<Vec<Vec<String>>> {
    let normalized = text.replace("\r\n", "\n").replace('\r', "\n");

    if let Some(line) = unterminated_quote(&normalized) {
        return Err(SyncError::Parse(format!(
            "quoted field opened on line {} is never closed",
            line
        )));
    }

    let mut reader = csv::ReaderBuilder::new()
        .has_headers(false)
        .flexible(true)
        .from_reader(normalized.as_bytes());

    let mut rows = Vec::new();
    for (index, record) in reader.records().enumerate() {
        let record = record
            .map_err(|e| SyncError::Parse(format!("record {}: {}", index + 1, e)))?;

        if record.len() == 1 && record[0].trim().is_empty() {
            continue;
        }

        rows.push(record.iter().map(str::to_string).collect());
    }

    Ok(rows)
}

/// Line (1-based) of a quoted field left open at the end of the text.
/// A quote opens a field only at the start of a cell; inside one, `""` is
/// an escaped quote and a lone `"` closes it.
fn unterminated_quote(text: &str) -> Option<usize> {
    let mut line = 1;
    let mut opened_on = None;
    let mut at_cell_start = true;
    let mut chars = text.chars().peekable();

    while let Some(c) = chars.next() {
        match (opened_on, c) {
            (Some(_), '"') => {
                if chars.peek() == Some(&'"') {
                    chars.next();
                } else {
                    opened_on = None;
                }
            }
            (None, '"') if at_cell_start => opened_on = Some(line),
            _ => {}
        }

        if c == '\n' {
            line += 1;
        }
        at_cell_start = opened_on.is_none() && (c == ',' || c == '\n');
    }

    opened_on
}

/// Parse CSV text straight into a header/data split
pub fn parse_table(text: &str) -> SyncResult<RawTable> {
    Ok(RawTable::from_rows(parse_csv(text)?))
}
