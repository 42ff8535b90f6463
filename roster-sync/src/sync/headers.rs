//! Header label resolution
//!
//! Maps the free-form labels of a sheet's first row onto canonical field
//! names through a static alias table.

use once_cell::sync::Lazy;
use regex::Regex;
use std::collections::HashMap;

/// Canonical field names
pub mod fields {
    pub const REGISTER_NO: &str = "register_no";
    pub const NAME: &str = "name";
    pub const FATHER_NAME: &str = "father_name";
    pub const MOTHER_NAME: &str = "mother_name";
    pub const ADDRESS: &str = "address";
    pub const CLASS: &str = "class";
    pub const YEAR: &str = "year";
    pub const DEPARTMENT: &str = "department";
    pub const EMAIL: &str = "email";
    pub const PHONE: &str = "phone";
    pub const CIA_1_MARK: &str = "cia_1_mark";
    pub const CIA_2_MARK: &str = "cia_2_mark";
    pub const PRESENT_TODAY: &str = "present_today";
    pub const LEAVE_TAKEN: &str = "leave_taken";
    pub const ATTENDANCE_PERCENTAGE: &str = "attendance_percentage";
}

use fields::*;

static SEPARATORS: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"[\s_\-.]+").expect("separator pattern is valid"));

/// Normalized label -> canonical field
static ALIASES: Lazy<HashMap<&'static str, &'static str>> = Lazy::new(|| {
    let table: &[(&'static str, &[&'static str])] = &[
        (
            REGISTER_NO,
            &[
                "register no",
                "reg no",
                "regno",
                "registration number",
                "registration no",
                "register number",
                "roll no",
            ],
        ),
        (NAME, &["name", "student name", "full name"]),
        (
            FATHER_NAME,
            &["father name", "father's name", "fathers name", "guardian name"],
        ),
        (
            MOTHER_NAME,
            &["mother name", "mother's name", "mothers name"],
        ),
        (ADDRESS, &["address", "residential address"]),
        (CLASS, &["class", "section", "class section"]),
        (YEAR, &["year", "academic year", "study year"]),
        (DEPARTMENT, &["department", "dept", "branch"]),
        (EMAIL, &["email", "email id", "email address", "mail id"]),
        (
            PHONE,
            &[
                "phone",
                "phone no",
                "phone number",
                "mobile",
                "mobile no",
                "mobile number",
                "contact",
                "contact no",
            ],
        ),
        (CIA_1_MARK, &["cia 1 mark", "cia 1", "cia1", "cia1 mark"]),
        (CIA_2_MARK, &["cia 2 mark", "cia 2", "cia2", "cia2 mark"]),
        (
            PRESENT_TODAY,
            &["present today", "present", "present days", "days present"],
        ),
        (
            LEAVE_TAKEN,
            &["leave taken", "leave", "leaves", "leave days", "days leave"],
        ),
        (
            ATTENDANCE_PERCENTAGE,
            &[
                "attendance percentage",
                "attendance %",
                "attendance",
                "percentage",
            ],
        ),
    ];

    table
        .iter()
        .flat_map(|(canonical, aliases)| aliases.iter().map(move |alias| (*alias, *canonical)))
        .collect()
});

/// Lower-case, collapse whitespace/underscore/dash/dot runs to one space, trim
pub fn normalize_label(label: &str) -> String {
    SEPARATORS
        .replace_all(&label.to_lowercase(), " ")
        .trim()
        .to_string()
}

/// Canonical name for one raw header label.
///
/// Unknown labels fall back to their normalized form with spaces replaced by
/// underscores. Returns `None` for blank labels.
pub fn canonical_name(label: &str) -> Option<String> {
    let normalized = normalize_label(label);
    if normalized.is_empty() {
        return None;
    }

    Some(match ALIASES.get(normalized.as_str()) {
        Some(canonical) => (*canonical).to_string(),
        None => normalized.replace(' ', "_"),
    })
}

/// Canonical field name -> column position
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HeaderIndex {
    columns: HashMap<String, usize>,
}

impl HeaderIndex {
    /// Build from the header row. When two labels resolve to the same
    /// canonical name the later column wins.
    pub fn resolve(header: &[String]) -> Self {
        let mut columns = HashMap::new();
        for (position, label) in header.iter().enumerate() {
            if let Some(canonical) = canonical_name(label) {
                columns.insert(canonical, position);
            }
        }
        Self { columns }
    }

    pub fn position(&self, field: &str) -> Option<usize> {
        self.columns.get(field).copied()
    }

    pub fn contains(&self, field: &str) -> bool {
        self.columns.contains_key(field)
    }

    /// Raw cell for `field` in `row`, if the column exists and the row reaches it
    pub fn cell<'a>(&self, row: &'a [String], field: &str) -> Option<&'a str> {
        self.position(field)
            .and_then(|i| row.get(i))
            .map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.columns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.columns.is_empty()
    }

    /// Resolved canonical names, sorted
    pub fn field_names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.columns.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }
}
