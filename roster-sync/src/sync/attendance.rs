//! Attendance percentage derivation
//!
//! The percentage is always computed here from the present/leave counts. A
//! percentage column in the sheet is never read.

use super::normalize::NormalizedRow;

/// `present / (present + leave) * 100`, rounded to 2 decimals.
///
/// Missing or non-finite inputs count as unusable and yield 0, as does a
/// non-positive total. The result is clamped to `[0, 100]`.
pub fn attendance_percentage(present: Option<f64>, leave: Option<f64>) -> f64 {
    let (Some(present), Some(leave)) = (present, leave) else {
        return 0.0;
    };
    if !present.is_finite() || !leave.is_finite() {
        return 0.0;
    }

    let total = present + leave;
    if total <= 0.0 {
        return 0.0;
    }

    round2((present / total * 100.0).clamp(0.0, 100.0))
}

/// Fill `attendance_percentage` on rows whose academic group is supplied.
/// Rows without academic data get `None` so nothing is written for them.
pub fn derive_attendance(rows: &mut [NormalizedRow]) {
    for row in rows {
        row.attendance_percentage = row
            .academic_supplied()
            .then(|| attendance_percentage(row.present_today, row.leave_taken));
    }
}

/// Round half away from zero to 2 decimal places
pub fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}
