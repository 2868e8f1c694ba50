use crate::marks::{Leaf, MarkCell};
use serde::Serialize;
use std::collections::{HashMap, HashSet};

pub const ADMISSION_NO_HEADER: &str = "Admission No";
pub const STUDENT_NAME_HEADER: &str = "Student Name";
pub const ABSENT_TOKEN: &str = "AB";

/// Index of the first component column.
const FIRST_COMPONENT_COL: usize = 2;

/// Marks for one exam/subject: admission number -> leaf id -> cell.
pub type MarkSheet = HashMap<String, HashMap<String, MarkCell>>;

#[derive(Debug, Clone)]
pub struct RosterRow {
    pub admission_no: String,
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AppliedCell {
    pub admission_no: String,
    pub component: String,
    pub obtained: f64,
    pub absent: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SkippedRow {
    pub line: usize,
    pub admission_no: String,
    pub reason: &'static str,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SkippedCell {
    pub line: usize,
    pub admission_no: String,
    pub component: String,
    pub value: String,
    pub reason: &'static str,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ImportReport {
    pub rows_read: usize,
    pub applied: Vec<AppliedCell>,
    pub skipped_rows: Vec<SkippedRow>,
    pub skipped_cells: Vec<SkippedCell>,
}

pub fn parse_csv_record(line: &str) -> Vec<String> {
    let mut out: Vec<String> = Vec::new();
    let mut buf = String::new();
    let mut in_quotes = false;
    let mut chars = line.chars().peekable();
    while let Some(ch) = chars.next() {
        if ch == '"' {
            if in_quotes && chars.peek() == Some(&'"') {
                buf.push('"');
                chars.next();
                continue;
            }
            in_quotes = !in_quotes;
            continue;
        }
        if ch == ',' && !in_quotes {
            out.push(std::mem::take(&mut buf));
            continue;
        }
        buf.push(ch);
    }
    out.push(buf);
    out
}

/// Splits CSV text into records, keeping line breaks that sit inside quoted
/// fields. Each record carries the 1-based line it starts on.
pub fn split_csv_records(text: &str) -> Vec<(usize, String)> {
    let mut records: Vec<(usize, String)> = Vec::new();
    let mut buf = String::new();
    let mut in_quotes = false;
    let mut line = 1;
    let mut start = 1;
    for ch in text.chars() {
        if ch == '"' {
            in_quotes = !in_quotes;
        }
        if ch == '\n' {
            line += 1;
            if !in_quotes {
                if buf.ends_with('\r') {
                    buf.pop();
                }
                records.push((start, std::mem::take(&mut buf)));
                start = line;
                continue;
            }
        }
        buf.push(ch);
    }
    if !buf.is_empty() {
        if buf.ends_with('\r') {
            buf.pop();
        }
        records.push((start, buf));
    }
    records
}

pub fn csv_quote(s: &str) -> String {
    if s.contains(',') || s.contains('"') || s.contains('\n') || s.contains('\r') {
        format!("\"{}\"", s.replace('"', "\"\""))
    } else {
        s.to_string()
    }
}

fn format_mark(v: f64) -> String {
    if v.fract() == 0.0 {
        format!("{}", v as i64)
    } else {
        format!("{}", v)
    }
}

fn header_line(leaves: &[Leaf]) -> String {
    let mut fields = vec![
        ADMISSION_NO_HEADER.to_string(),
        STUDENT_NAME_HEADER.to_string(),
    ];
    fields.extend(leaves.iter().map(|l| csv_quote(&l.id)));
    fields.join(",")
}

/// Blank entry template: every mark is 0.
pub fn export_template(students: &[RosterRow], leaves: &[Leaf]) -> String {
    let mut csv = header_line(leaves);
    csv.push('\n');
    for s in students {
        let mut fields = vec![csv_quote(&s.admission_no), csv_quote(&s.name)];
        fields.extend(leaves.iter().map(|_| "0".to_string()));
        csv.push_str(&fields.join(","));
        csv.push('\n');
    }
    csv
}

/// Same layout as the template, filled with current marks. Absent cells are
/// written as `AB` and empty cells are left blank.
pub fn export_marks(students: &[RosterRow], leaves: &[Leaf], sheet: &MarkSheet) -> String {
    let mut csv = header_line(leaves);
    csv.push('\n');
    for s in students {
        let row = sheet.get(&s.admission_no);
        let mut fields = vec![csv_quote(&s.admission_no), csv_quote(&s.name)];
        for leaf in leaves {
            let cell = row.and_then(|r| r.get(&leaf.id));
            fields.push(match cell {
                Some(c) if c.absent => ABSENT_TOKEN.to_string(),
                Some(MarkCell {
                    obtained: Some(v), ..
                }) => format_mark(*v),
                _ => String::new(),
            });
        }
        csv.push_str(&fields.join(","));
        csv.push('\n');
    }
    csv
}

/// Applies a marks CSV onto `sheet`. The first record is always treated as
/// the header. Component columns map to `leaves` by position. `AB` marks the
/// student absent. Cells that are not integers, are negative, or exceed the
/// leaf's maximum keep their prior value.
pub fn import_marks(
    text: &str,
    known_students: &HashSet<String>,
    leaves: &[Leaf],
    sheet: &mut MarkSheet,
) -> ImportReport {
    let mut report = ImportReport::default();
    for (line_no, record) in split_csv_records(text).into_iter().skip(1) {
        if record.trim().is_empty() {
            continue;
        }
        report.rows_read += 1;
        let fields = parse_csv_record(&record);
        let admission_no = fields
            .first()
            .map(|s| s.trim().to_string())
            .unwrap_or_default();
        if admission_no.is_empty() {
            report.skipped_rows.push(SkippedRow {
                line: line_no,
                admission_no,
                reason: "missing_admission_no",
            });
            continue;
        }
        if !known_students.contains(&admission_no) {
            report.skipped_rows.push(SkippedRow {
                line: line_no,
                admission_no,
                reason: "unknown_student",
            });
            continue;
        }

        for (col, leaf) in leaves.iter().enumerate() {
            let Some(raw) = fields.get(FIRST_COMPONENT_COL + col) else {
                break;
            };
            let value = raw.trim();
            if value.is_empty() {
                continue;
            }
            let skip = |reason: &'static str| SkippedCell {
                line: line_no,
                admission_no: admission_no.clone(),
                component: leaf.id.clone(),
                value: value.to_string(),
                reason,
            };
            if value.eq_ignore_ascii_case(ABSENT_TOKEN) {
                sheet
                    .entry(admission_no.clone())
                    .or_default()
                    .insert(leaf.id.clone(), MarkCell::absent());
                report.applied.push(AppliedCell {
                    admission_no: admission_no.clone(),
                    component: leaf.id.clone(),
                    obtained: 0.0,
                    absent: true,
                });
                continue;
            }
            let Ok(parsed) = value.parse::<i64>() else {
                report.skipped_cells.push(skip("not_a_number"));
                continue;
            };
            let obtained = parsed as f64;
            if obtained < 0.0 {
                report.skipped_cells.push(skip("negative"));
                continue;
            }
            if obtained > leaf.max_marks {
                report.skipped_cells.push(skip("exceeds_max"));
                continue;
            }
            sheet
                .entry(admission_no.clone())
                .or_default()
                .insert(leaf.id.clone(), MarkCell::scored(obtained));
            report.applied.push(AppliedCell {
                admission_no: admission_no.clone(),
                component: leaf.id.clone(),
                obtained,
                absent: false,
            });
        }
    }
    report
}
