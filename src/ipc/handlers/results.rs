use crate::db;
use crate::ipc::handlers::students::{active_roster, load_student, StudentRow};
use crate::ipc::helpers::{
    get_optional_bool, get_optional_str, get_required_str, with_conn, HandlerErr,
};
use crate::ipc::types::{AppState, Request};
use crate::marks::{
    aggregate, default_scheme, find_leaf, round_2_decimals, summarize, validate_cell, Leaf,
    MarkCell, MarkingScheme, SchemeComponent, FAIL_GRADE, GRADE_BANDS,
};
use crate::marks_csv::{self, MarkSheet, RosterRow};
use rusqlite::{Connection, OptionalExtension, Row};
use serde_json::{json, Value};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::path::PathBuf;
use uuid::Uuid;

struct ExamRow {
    id: String,
    name: String,
    class_section: String,
    term: Option<String>,
    created_at: String,
}

impl ExamRow {
    fn to_json(&self) -> Value {
        json!({
            "id": self.id,
            "name": self.name,
            "classSection": self.class_section,
            "term": self.term,
            "createdAt": self.created_at
        })
    }
}

fn exam_from_row(r: &Row<'_>) -> rusqlite::Result<ExamRow> {
    Ok(ExamRow {
        id: r.get(0)?,
        name: r.get(1)?,
        class_section: r.get(2)?,
        term: r.get(3)?,
        created_at: r.get(4)?,
    })
}

fn load_exam(conn: &Connection, exam_id: &str) -> Result<ExamRow, HandlerErr> {
    conn.query_row(
        "SELECT id, name, class_section, term, created_at FROM exams WHERE id = ?",
        [exam_id],
        exam_from_row,
    )
    .optional()
    .map_err(HandlerErr::query_failed)?
    .ok_or_else(|| HandlerErr::not_found("exam not found"))
}

/// The stored scheme for a class/subject, or the default one.
fn load_scheme(
    conn: &Connection,
    class_section: &str,
    subject: &str,
) -> Result<(MarkingScheme, bool), HandlerErr> {
    let raw: Option<String> = conn
        .query_row(
            "SELECT components_json FROM marking_schemes WHERE class_section = ? AND subject = ?",
            (class_section, subject),
            |r| r.get(0),
        )
        .optional()
        .map_err(HandlerErr::query_failed)?;
    let Some(raw) = raw else {
        return Ok((default_scheme(), true));
    };
    let components: Vec<SchemeComponent> = serde_json::from_str(&raw).map_err(|e| {
        HandlerErr::new("db_query_failed", format!("stored marking scheme is invalid: {}", e))
    })?;
    Ok((MarkingScheme { components }, false))
}

fn load_sheet(conn: &Connection, exam_id: &str, subject: &str) -> Result<MarkSheet, HandlerErr> {
    let mut stmt = conn
        .prepare(
            "SELECT admission_no, component_id, obtained, absent
             FROM result_entries
             WHERE exam_id = ? AND subject = ?",
        )
        .map_err(HandlerErr::query_failed)?;
    let rows = stmt
        .query_map((exam_id, subject), |r| {
            Ok((
                r.get::<_, String>(0)?,
                r.get::<_, String>(1)?,
                MarkCell {
                    obtained: r.get::<_, Option<f64>>(2)?,
                    absent: r.get::<_, i64>(3)? != 0,
                },
            ))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(HandlerErr::query_failed)?;
    let mut sheet = MarkSheet::new();
    for (admission_no, component_id, cell) in rows {
        sheet
            .entry(admission_no)
            .or_default()
            .insert(component_id, cell);
    }
    Ok(sheet)
}

/// A stored mark for one class/subject across all of its exams.
struct StoredCell {
    exam_id: String,
    admission_no: String,
    component_id: String,
    cell: MarkCell,
}

fn load_class_cells(
    conn: &Connection,
    class_section: &str,
    subject: &str,
) -> Result<Vec<StoredCell>, HandlerErr> {
    let mut stmt = conn
        .prepare(
            "SELECT r.exam_id, r.admission_no, r.component_id, r.obtained, r.absent
             FROM result_entries r
             JOIN exams e ON e.id = r.exam_id
             WHERE e.class_section = ? AND r.subject = ?
             ORDER BY r.exam_id, r.admission_no, r.component_id",
        )
        .map_err(HandlerErr::query_failed)?;
    stmt.query_map((class_section, subject), |r| {
        Ok(StoredCell {
            exam_id: r.get(0)?,
            admission_no: r.get(1)?,
            component_id: r.get(2)?,
            cell: MarkCell {
                obtained: r.get::<_, Option<f64>>(3)?,
                absent: r.get::<_, i64>(4)? != 0,
            },
        })
    })
    .and_then(|it| it.collect::<Result<Vec<_>, _>>())
    .map_err(HandlerErr::query_failed)
}

#[allow(clippy::too_many_arguments)]
fn write_cell(
    conn: &Connection,
    exam_id: &str,
    subject: &str,
    admission_no: &str,
    component_id: &str,
    cell: MarkCell,
    entered_by: &str,
    now: &str,
) -> Result<(), HandlerErr> {
    conn.execute(
        "INSERT INTO result_entries(exam_id, subject, admission_no, component_id, obtained, absent, entered_by, updated_at)
         VALUES(?, ?, ?, ?, ?, ?, ?, ?)
         ON CONFLICT(exam_id, subject, admission_no, component_id) DO UPDATE SET
           obtained = excluded.obtained,
           absent = excluded.absent,
           entered_by = excluded.entered_by,
           updated_at = excluded.updated_at",
        (
            exam_id,
            subject,
            admission_no,
            component_id,
            cell.obtained,
            cell.absent as i64,
            entered_by,
            now,
        ),
    )
    .map_err(|e| HandlerErr::write_failed("db_insert_failed", "result_entries", e))?;
    Ok(())
}

fn cells_json(leaves: &[Leaf], cells: Option<&HashMap<String, MarkCell>>) -> Value {
    let mut out = serde_json::Map::new();
    for leaf in leaves {
        let cell = cells.and_then(|c| c.get(&leaf.id)).copied().unwrap_or_default();
        out.insert(
            leaf.id.clone(),
            json!({ "obtained": cell.obtained, "absent": cell.absent }),
        );
    }
    Value::Object(out)
}

fn exams_create(conn: &Connection, params: &Value) -> Result<Value, HandlerErr> {
    let name = get_required_str(params, "name")?;
    let class_section = get_required_str(params, "classSection")?;
    let term = get_optional_str(params, "term");
    let id = Uuid::new_v4().to_string();
    conn.execute(
        "INSERT INTO exams(id, name, class_section, term, created_at) VALUES(?, ?, ?, ?, ?)",
        (&id, &name, &class_section, &term, db::now_timestamp()),
    )
    .map_err(|e| HandlerErr::write_failed("db_insert_failed", "exams", e))?;
    tracing::info!(exam_id = %id, class_section = %class_section, "exam created");
    Ok(json!({ "examId": id }))
}

fn exams_list(conn: &Connection, params: &Value) -> Result<Value, HandlerErr> {
    let class_section = get_optional_str(params, "classSection");
    let mut stmt = conn
        .prepare(
            "SELECT id, name, class_section, term, created_at FROM exams
             WHERE (?1 IS NULL OR class_section = ?1)
             ORDER BY created_at, name",
        )
        .map_err(HandlerErr::query_failed)?;
    let exams = stmt
        .query_map([&class_section], exam_from_row)
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(HandlerErr::query_failed)?;
    let exams_json: Vec<Value> = exams.iter().map(ExamRow::to_json).collect();
    Ok(json!({ "exams": exams_json }))
}

fn scheme_get(conn: &Connection, params: &Value) -> Result<Value, HandlerErr> {
    let class_section = get_required_str(params, "classSection")?;
    let subject = get_required_str(params, "subject")?;
    let (scheme, is_default) = load_scheme(conn, &class_section, &subject)?;
    Ok(json!({
        "classSection": class_section,
        "subject": subject,
        "leaves": scheme.leaves(),
        "maxTotal": scheme.max_total(),
        "components": scheme.components,
        "isDefault": is_default
    }))
}

fn scheme_set(conn: &Connection, params: &Value) -> Result<Value, HandlerErr> {
    let class_section = get_required_str(params, "classSection")?;
    let subject = get_required_str(params, "subject")?;
    let Some(raw) = params.get("components") else {
        return Err(HandlerErr::bad_params("missing components"));
    };
    let components: Vec<SchemeComponent> = serde_json::from_value(raw.clone())
        .map_err(|e| HandlerErr::bad_params(format!("invalid components: {}", e)))?;
    let scheme = MarkingScheme { components };
    scheme
        .validate()
        .map_err(|e| HandlerErr::bad_params(e.to_string()))?;

    // Stored marks must still fit; marks for removed leaves are dropped.
    let leaves = scheme.leaves();
    let mut misfits: Vec<Value> = Vec::new();
    let mut orphaned: Vec<StoredCell> = Vec::new();
    for stored in load_class_cells(conn, &class_section, &subject)? {
        let Ok(leaf) = find_leaf(&leaves, &stored.component_id) else {
            orphaned.push(stored);
            continue;
        };
        if let Err(e) = validate_cell(leaf, stored.cell) {
            misfits.push(json!({
                "examId": stored.exam_id,
                "admissionNo": stored.admission_no,
                "component": stored.component_id,
                "obtained": stored.cell.obtained,
                "max": leaf.max_marks,
                "code": e.kind()
            }));
        }
    }
    if !misfits.is_empty() {
        return Err(HandlerErr::conflict(format!(
            "{} stored marks do not fit the new scheme",
            misfits.len()
        ))
        .with_details(json!({ "cells": misfits })));
    }

    let text = serde_json::to_string(&scheme.components)
        .map_err(|e| HandlerErr::new("internal", e.to_string()))?;
    let tx = conn
        .unchecked_transaction()
        .map_err(|e| HandlerErr::new("db_tx_failed", e.to_string()))?;
    tx.execute(
        "INSERT INTO marking_schemes(class_section, subject, components_json, updated_at)
         VALUES(?, ?, ?, ?)
         ON CONFLICT(class_section, subject) DO UPDATE SET
           components_json = excluded.components_json,
           updated_at = excluded.updated_at",
        (&class_section, &subject, &text, db::now_timestamp()),
    )
    .map_err(|e| HandlerErr::write_failed("db_insert_failed", "marking_schemes", e))?;
    for stored in &orphaned {
        tx.execute(
            "DELETE FROM result_entries
             WHERE exam_id = ? AND subject = ? AND admission_no = ? AND component_id = ?",
            (
                &stored.exam_id,
                &subject,
                &stored.admission_no,
                &stored.component_id,
            ),
        )
        .map_err(|e| HandlerErr::write_failed("db_delete_failed", "result_entries", e))?;
    }
    tx.commit()
        .map_err(|e| HandlerErr::new("db_commit_failed", e.to_string()))?;

    tracing::info!(
        class_section = %class_section,
        subject = %subject,
        dropped_cells = orphaned.len(),
        "marking scheme saved"
    );
    Ok(json!({
        "ok": true,
        "leaves": leaves,
        "maxTotal": scheme.max_total(),
        "droppedCells": orphaned.len()
    }))
}

fn results_get(conn: &Connection, params: &Value) -> Result<Value, HandlerErr> {
    let exam = load_exam(conn, &get_required_str(params, "examId")?)?;
    let subject = get_required_str(params, "subject")?;
    let (scheme, is_default) = load_scheme(conn, &exam.class_section, &subject)?;
    let leaves = scheme.leaves();
    let sheet = load_sheet(conn, &exam.id, &subject)?;
    let roster = active_roster(conn, &exam.class_section)?;

    let students: Vec<Value> = roster
        .iter()
        .map(|s| {
            let cells = sheet.get(&s.admission_no);
            let empty = HashMap::new();
            let summary = aggregate(cells.unwrap_or(&empty), &scheme);
            json!({
                "admissionNo": s.admission_no,
                "name": s.name,
                "rollNo": s.roll_no,
                "marks": cells_json(&leaves, cells),
                "summary": summary
            })
        })
        .collect();
    Ok(json!({
        "exam": exam.to_json(),
        "subject": subject,
        "leaves": leaves,
        "isDefaultScheme": is_default,
        "students": students
    }))
}

fn parse_cell(v: &Value) -> Result<MarkCell, &'static str> {
    let Some(obj) = v.as_object() else {
        return Err("cell must be an object");
    };
    let obtained = match obj.get("obtained") {
        None | Some(Value::Null) => None,
        Some(n) => Some(n.as_f64().ok_or("obtained must be a number or null")?),
    };
    let absent = match obj.get("absent") {
        None | Some(Value::Null) => false,
        Some(b) => b.as_bool().ok_or("absent must be a boolean")?,
    };
    Ok(MarkCell { obtained, absent })
}

fn results_upload(conn: &Connection, params: &Value) -> Result<Value, HandlerErr> {
    let exam = load_exam(conn, &get_required_str(params, "examId")?)?;
    let subject = get_required_str(params, "subject")?;
    let entered_by = get_required_str(params, "enteredBy")?;
    let Some(entries) = params.get("entries").and_then(|v| v.as_array()) else {
        return Err(HandlerErr::bad_params("missing entries"));
    };
    let (scheme, _) = load_scheme(conn, &exam.class_section, &subject)?;
    let leaves = scheme.leaves();
    let enrolled: HashSet<String> = active_roster(conn, &exam.class_section)?
        .into_iter()
        .map(|s| s.admission_no)
        .collect();

    let mut accepted: Vec<(String, String, MarkCell)> = Vec::new();
    let mut errors: Vec<Value> = Vec::new();
    for (i, entry) in entries.iter().enumerate() {
        let admission_no = entry
            .get("admissionNo")
            .and_then(|v| v.as_str())
            .map(|s| s.trim().to_string())
            .unwrap_or_default();
        if !enrolled.contains(&admission_no) {
            errors.push(json!({
                "index": i,
                "admissionNo": admission_no,
                "code": "unknown_student",
                "message": "student is not enrolled in the exam's class"
            }));
            continue;
        }
        let Some(marks) = entry.get("marks").and_then(|v| v.as_object()) else {
            errors.push(json!({
                "index": i,
                "admissionNo": admission_no,
                "code": "bad_marks",
                "message": "marks must be an object"
            }));
            continue;
        };
        for (component_id, raw_cell) in marks {
            let checked = find_leaf(&leaves, component_id)
                .map_err(|e| (e.kind(), e.to_string()))
                .and_then(|leaf| {
                    let cell = parse_cell(raw_cell).map_err(|m| ("bad_cell", m.to_string()))?;
                    validate_cell(leaf, cell).map_err(|e| (e.kind(), e.to_string()))
                });
            match checked {
                Ok(cell) => accepted.push((admission_no.clone(), component_id.clone(), cell)),
                Err((code, message)) => errors.push(json!({
                    "index": i,
                    "admissionNo": admission_no,
                    "component": component_id,
                    "code": code,
                    "message": message
                })),
            }
        }
    }

    if !errors.is_empty() {
        return Err(HandlerErr::new(
            "validation_failed",
            format!("{} invalid mark entries; nothing was saved", errors.len()),
        )
        .with_details(json!({ "errors": errors })));
    }

    let now = db::now_timestamp();
    let tx = conn
        .unchecked_transaction()
        .map_err(|e| HandlerErr::new("db_tx_failed", e.to_string()))?;
    for (admission_no, component_id, cell) in &accepted {
        write_cell(
            &tx,
            &exam.id,
            &subject,
            admission_no,
            component_id,
            *cell,
            &entered_by,
            &now,
        )?;
    }
    tx.commit()
        .map_err(|e| HandlerErr::new("db_commit_failed", e.to_string()))?;

    tracing::info!(exam_id = %exam.id, subject = %subject, cells = accepted.len(), "results uploaded");
    Ok(json!({ "ok": true, "saved": accepted.len() }))
}

fn grade_distribution(grades: &[String]) -> Vec<Value> {
    let mut counts: BTreeMap<&str, usize> = BTreeMap::new();
    for g in grades {
        *counts.entry(g.as_str()).or_default() += 1;
    }
    GRADE_BANDS
        .iter()
        .map(|(_, g)| *g)
        .chain(std::iter::once(FAIL_GRADE))
        .map(|g| json!({ "grade": g, "count": counts.get(g).copied().unwrap_or(0) }))
        .collect()
}

fn results_summary(conn: &Connection, params: &Value) -> Result<Value, HandlerErr> {
    let exam = load_exam(conn, &get_required_str(params, "examId")?)?;
    let subject = get_required_str(params, "subject")?;
    let (scheme, _) = load_scheme(conn, &exam.class_section, &subject)?;
    let sheet = load_sheet(conn, &exam.id, &subject)?;
    let roster = active_roster(conn, &exam.class_section)?;
    let leaf_ids: HashSet<String> = scheme.leaves().into_iter().map(|l| l.id).collect();

    let mut percentages: Vec<f64> = Vec::new();
    let mut grades: Vec<String> = Vec::new();
    let students: Vec<Value> = roster
        .iter()
        .map(|s| {
            let entered = sheet.get(&s.admission_no).filter(|cells| {
                cells
                    .iter()
                    .any(|(id, c)| leaf_ids.contains(id) && (c.absent || c.obtained.is_some()))
            });
            let Some(cells) = entered else {
                return json!({
                    "admissionNo": s.admission_no,
                    "name": s.name,
                    "summary": Value::Null
                });
            };
            let summary = aggregate(cells, &scheme);
            percentages.push(summary.percentage_value);
            grades.push(summary.grade.clone());
            json!({
                "admissionNo": s.admission_no,
                "name": s.name,
                "summary": summary
            })
        })
        .collect();

    let class_average = if percentages.is_empty() {
        None
    } else {
        let avg = percentages.iter().sum::<f64>() / percentages.len() as f64;
        Some(format!("{:.2}", round_2_decimals(avg)))
    };
    Ok(json!({
        "exam": exam.to_json(),
        "subject": subject,
        "maxTotal": scheme.max_total(),
        "students": students,
        "studentsWithMarks": percentages.len(),
        "classAverage": class_average,
        "gradeDistribution": grade_distribution(&grades)
    }))
}

fn results_report_card(conn: &Connection, params: &Value) -> Result<Value, HandlerErr> {
    let exam = load_exam(conn, &get_required_str(params, "examId")?)?;
    let admission_no = get_required_str(params, "admissionNo")?;
    let Some(student) = load_student(conn, &admission_no)? else {
        return Err(HandlerErr::not_found("student not found"));
    };

    let mut stmt = conn
        .prepare(
            "SELECT DISTINCT subject FROM result_entries
             WHERE exam_id = ? AND admission_no = ?
             ORDER BY subject",
        )
        .map_err(HandlerErr::query_failed)?;
    let subjects = stmt
        .query_map((&exam.id, &admission_no), |r| r.get::<_, String>(0))
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(HandlerErr::query_failed)?;

    let mut total_obtained = 0.0;
    let mut total_max = 0.0;
    let mut rows: Vec<Value> = Vec::with_capacity(subjects.len());
    for subject in subjects {
        let (scheme, _) = load_scheme(conn, &exam.class_section, &subject)?;
        let sheet = load_sheet(conn, &exam.id, &subject)?;
        let empty = HashMap::new();
        let cells = sheet.get(&admission_no).unwrap_or(&empty);
        let summary = aggregate(cells, &scheme);
        total_obtained += summary.obtained;
        total_max += summary.max;
        rows.push(json!({
            "subject": subject,
            "marks": cells_json(&scheme.leaves(), Some(cells)),
            "summary": summary
        }));
    }

    Ok(json!({
        "exam": exam.to_json(),
        "student": student.to_json(),
        "subjects": rows,
        "overall": summarize(total_obtained, total_max)
    }))
}

fn roster_rows(roster: &[StudentRow]) -> Vec<RosterRow> {
    roster
        .iter()
        .map(|s| RosterRow {
            admission_no: s.admission_no.clone(),
            name: s.name.clone(),
        })
        .collect()
}

fn results_export_template(conn: &Connection, params: &Value) -> Result<Value, HandlerErr> {
    let exam = load_exam(conn, &get_required_str(params, "examId")?)?;
    let subject = get_required_str(params, "subject")?;
    let include_marks = get_optional_bool(params, "includeMarks")?.unwrap_or(false);
    let out_path = get_optional_str(params, "outPath").map(PathBuf::from);

    let (scheme, _) = load_scheme(conn, &exam.class_section, &subject)?;
    let leaves = scheme.leaves();
    let students = roster_rows(&active_roster(conn, &exam.class_section)?);
    let csv = if include_marks {
        let sheet = load_sheet(conn, &exam.id, &subject)?;
        marks_csv::export_marks(&students, &leaves, &sheet)
    } else {
        marks_csv::export_template(&students, &leaves)
    };

    if let Some(path) = out_path.as_ref() {
        std::fs::write(path, &csv).map_err(|e| {
            HandlerErr::new("io_failed", e.to_string())
                .with_details(json!({ "path": path.to_string_lossy() }))
        })?;
        tracing::info!(path = %path.display(), rows = students.len(), "marks csv exported");
    }
    Ok(json!({
        "csv": csv,
        "rows": students.len(),
        "columns": leaves.iter().map(|l| l.id.clone()).collect::<Vec<_>>(),
        "path": out_path.map(|p| p.to_string_lossy().to_string())
    }))
}

fn results_import_csv(conn: &Connection, params: &Value) -> Result<Value, HandlerErr> {
    let exam = load_exam(conn, &get_required_str(params, "examId")?)?;
    let subject = get_required_str(params, "subject")?;
    let entered_by = get_required_str(params, "enteredBy")?;
    let text = match (
        params.get("csv").and_then(|v| v.as_str()),
        get_optional_str(params, "inPath"),
    ) {
        (Some(csv), None) => csv.to_string(),
        (None, Some(path)) => std::fs::read_to_string(&path).map_err(|e| {
            HandlerErr::new("io_failed", e.to_string()).with_details(json!({ "path": path }))
        })?,
        _ => return Err(HandlerErr::bad_params("exactly one of csv or inPath is required")),
    };

    let (scheme, _) = load_scheme(conn, &exam.class_section, &subject)?;
    let leaves = scheme.leaves();
    let known: HashSet<String> = active_roster(conn, &exam.class_section)?
        .into_iter()
        .map(|s| s.admission_no)
        .collect();
    let mut sheet = load_sheet(conn, &exam.id, &subject)?;
    let report = marks_csv::import_marks(&text, &known, &leaves, &mut sheet);

    let now = db::now_timestamp();
    let tx = conn
        .unchecked_transaction()
        .map_err(|e| HandlerErr::new("db_tx_failed", e.to_string()))?;
    for applied in &report.applied {
        let cell = if applied.absent {
            MarkCell::absent()
        } else {
            MarkCell::scored(applied.obtained)
        };
        write_cell(
            &tx,
            &exam.id,
            &subject,
            &applied.admission_no,
            &applied.component,
            cell,
            &entered_by,
            &now,
        )?;
    }
    tx.commit()
        .map_err(|e| HandlerErr::new("db_commit_failed", e.to_string()))?;

    tracing::info!(
        exam_id = %exam.id,
        subject = %subject,
        rows = report.rows_read,
        applied = report.applied.len(),
        skipped_rows = report.skipped_rows.len(),
        skipped_cells = report.skipped_cells.len(),
        "marks csv imported"
    );
    serde_json::to_value(&report).map_err(|e| HandlerErr::new("internal", e.to_string()))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    let f: fn(&Connection, &Value) -> Result<Value, HandlerErr> = match req.method.as_str() {
        "exams.create" => exams_create,
        "exams.list" => exams_list,
        "scheme.get" => scheme_get,
        "scheme.set" => scheme_set,
        "results.get" => results_get,
        "results.upload" => results_upload,
        "results.summary" => results_summary,
        "results.reportCard" => results_report_card,
        "results.exportTemplate" => results_export_template,
        "results.importCsv" => results_import_csv,
        _ => return None,
    };
    Some(with_conn(state, req, |conn| f(conn, &req.params)))
}
