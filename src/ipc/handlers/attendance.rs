use crate::db;
use crate::eligibility::{check_eligibility, Eligibility, WindowScope};
use crate::ipc::handlers::backlog::load_windows;
use crate::ipc::handlers::setup::load_attendance_setup;
use crate::ipc::handlers::students::active_roster;
use crate::ipc::helpers::{
    check_max_chars, format_date, get_optional_date, get_optional_str, get_required_date,
    get_required_str, student_section, teacher_exists, with_conn, HandlerErr,
};
use crate::ipc::types::{AppState, Request};
use crate::marks::round_2_decimals;
use chrono::NaiveDate;
use rusqlite::{Connection, OptionalExtension};
use serde_json::{json, Value};
use std::collections::HashMap;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum AttendanceStatus {
    Present,
    Absent,
    Late,
}

impl AttendanceStatus {
    fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "present" | "p" => Some(Self::Present),
            "absent" | "a" => Some(Self::Absent),
            "late" | "l" => Some(Self::Late),
            _ => None,
        }
    }

    fn as_str(self) -> &'static str {
        match self {
            Self::Present => "present",
            Self::Absent => "absent",
            Self::Late => "late",
        }
    }
}

fn get_required_status(params: &Value, key: &str) -> Result<AttendanceStatus, HandlerErr> {
    let raw = get_required_str(params, key)?;
    AttendanceStatus::parse(&raw)
        .ok_or_else(|| HandlerErr::bad_params(format!("{} must be present, absent or late", key)))
}

#[derive(Default)]
struct AttendanceTally {
    present: i64,
    absent: i64,
    late: i64,
}

impl AttendanceTally {
    fn add(&mut self, status: &str) {
        match AttendanceStatus::parse(status) {
            Some(AttendanceStatus::Present) => self.present += 1,
            Some(AttendanceStatus::Absent) => self.absent += 1,
            Some(AttendanceStatus::Late) => self.late += 1,
            None => {}
        }
    }

    fn to_json(&self, late_counts_as_present: bool) -> Value {
        let total = self.present + self.absent + self.late;
        let attended = if late_counts_as_present {
            self.present + self.late
        } else {
            self.present
        };
        let pct = if total > 0 {
            round_2_decimals(attended as f64 / total as f64 * 100.0)
        } else {
            0.0
        };
        json!({
            "present": self.present,
            "absent": self.absent,
            "late": self.late,
            "total": total,
            "percentage": format!("{:.2}", pct)
        })
    }
}

fn eligibility_for(
    conn: &Connection,
    scope: WindowScope,
    scope_id: &str,
    date: NaiveDate,
    today: NaiveDate,
) -> Result<Eligibility, HandlerErr> {
    let windows = load_windows(conn, scope, scope_id)?;
    Ok(check_eligibility(date, today, &windows))
}

fn require_eligible(eligibility: Eligibility, date: NaiveDate) -> Result<(), HandlerErr> {
    if eligibility.allowed {
        return Ok(());
    }
    Err(HandlerErr::new("not_allowed", eligibility.reason.clone()).with_details(json!({
        "date": format_date(date),
        "eligibility": eligibility
    })))
}

fn attendance_eligibility(
    conn: &Connection,
    params: &Value,
    today: NaiveDate,
) -> Result<Value, HandlerErr> {
    let date = get_required_date(params, "date")?;
    let today = get_optional_date(params, "today")?.unwrap_or(today);
    let class_section = get_optional_str(params, "classSection");
    let teacher_id = get_optional_str(params, "teacherId");
    let (scope, scope_id) = match (class_section, teacher_id) {
        (Some(section), None) => (WindowScope::Class, section),
        (None, Some(teacher)) => (WindowScope::Teacher, teacher),
        _ => {
            return Err(HandlerErr::bad_params(
                "exactly one of classSection or teacherId is required",
            ))
        }
    };
    let eligibility = eligibility_for(conn, scope, &scope_id, date, today)?;
    serde_json::to_value(eligibility).map_err(|e| HandlerErr::new("internal", e.to_string()))
}

fn attendance_get(conn: &Connection, params: &Value, today: NaiveDate) -> Result<Value, HandlerErr> {
    let class_section = get_required_str(params, "classSection")?;
    let date = get_required_date(params, "date")?;
    let date_key = format_date(date);
    let roster = active_roster(conn, &class_section)?;

    let mut stmt = conn
        .prepare(
            "SELECT admission_no, status, marked_by, updated_at
             FROM attendance_records
             WHERE class_section = ? AND date = ?",
        )
        .map_err(HandlerErr::query_failed)?;
    let rows = stmt
        .query_map((&class_section, &date_key), |r| {
            Ok((
                r.get::<_, String>(0)?,
                (
                    r.get::<_, String>(1)?,
                    r.get::<_, String>(2)?,
                    r.get::<_, String>(3)?,
                ),
            ))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(HandlerErr::query_failed)?;
    let by_student: HashMap<String, (String, String, String)> = rows.into_iter().collect();

    let mut tally = AttendanceTally::default();
    let mut unmarked = 0usize;
    let students: Vec<Value> = roster
        .iter()
        .map(|s| {
            let record = by_student.get(&s.admission_no);
            match record {
                Some((status, _, _)) => tally.add(status),
                None => unmarked += 1,
            }
            json!({
                "admissionNo": s.admission_no,
                "name": s.name,
                "rollNo": s.roll_no,
                "status": record.map(|r| r.0.clone()),
                "markedBy": record.map(|r| r.1.clone()),
                "updatedAt": record.map(|r| r.2.clone())
            })
        })
        .collect();
    let setup = load_attendance_setup(conn)
        .map_err(|e| HandlerErr::new("db_query_failed", e.to_string()))?;
    let eligibility = eligibility_for(conn, WindowScope::Class, &class_section, date, today)?;

    Ok(json!({
        "classSection": class_section,
        "date": date_key,
        "eligibility": eligibility,
        "students": students,
        "unmarked": unmarked,
        "summary": tally.to_json(setup.late_counts_as_present)
    }))
}

fn attendance_mark(conn: &Connection, params: &Value, today: NaiveDate) -> Result<Value, HandlerErr> {
    let class_section = get_required_str(params, "classSection")?;
    let date = get_required_date(params, "date")?;
    let marked_by = get_required_str(params, "markedBy")?;
    let Some(records_json) = params.get("records").and_then(|v| v.as_array()) else {
        return Err(HandlerErr::bad_params("missing records"));
    };
    let mut records: Vec<(String, AttendanceStatus)> = Vec::with_capacity(records_json.len());
    for (i, r) in records_json.iter().enumerate() {
        let admission_no = get_required_str(r, "admissionNo")
            .map_err(|e| e.with_details(json!({ "index": i })))?;
        let status =
            get_required_status(r, "status").map_err(|e| e.with_details(json!({ "index": i })))?;
        records.push((admission_no, status));
    }

    let eligibility = eligibility_for(conn, WindowScope::Class, &class_section, date, today)?;
    require_eligible(eligibility, date)?;

    let date_key = format_date(date);
    let now = db::now_timestamp();
    let mut inserted = 0usize;
    let mut already_marked: Vec<String> = Vec::new();
    let mut unknown_students: Vec<String> = Vec::new();

    let tx = conn
        .unchecked_transaction()
        .map_err(|e| HandlerErr::new("db_tx_failed", e.to_string()))?;
    for (admission_no, status) in &records {
        let enrolled = tx
            .query_row(
                "SELECT 1 FROM students WHERE admission_no = ? AND class_section = ? AND active = 1",
                (admission_no, &class_section),
                |r| r.get::<_, i64>(0),
            )
            .optional()
            .map_err(HandlerErr::query_failed)?
            .is_some();
        if !enrolled {
            unknown_students.push(admission_no.clone());
            continue;
        }
        let existing: Option<String> = tx
            .query_row(
                "SELECT status FROM attendance_records WHERE admission_no = ? AND date = ?",
                (admission_no, &date_key),
                |r| r.get(0),
            )
            .optional()
            .map_err(HandlerErr::query_failed)?;
        if existing.is_some() {
            already_marked.push(admission_no.clone());
            continue;
        }
        tx.execute(
            "INSERT INTO attendance_records(admission_no, date, class_section, status, marked_by, created_at, updated_at)
             VALUES(?, ?, ?, ?, ?, ?, ?)",
            (
                admission_no,
                &date_key,
                &class_section,
                status.as_str(),
                &marked_by,
                &now,
                &now,
            ),
        )
        .map_err(|e| HandlerErr::write_failed("db_insert_failed", "attendance_records", e))?;
        inserted += 1;
    }
    tx.commit()
        .map_err(|e| HandlerErr::new("db_commit_failed", e.to_string()))?;

    tracing::info!(
        class_section = %class_section,
        date = %date_key,
        inserted,
        already_marked = already_marked.len(),
        unknown = unknown_students.len(),
        "attendance marked"
    );
    Ok(json!({
        "inserted": inserted,
        "alreadyMarked": already_marked,
        "unknownStudents": unknown_students
    }))
}

fn attendance_edit(conn: &Connection, params: &Value, today: NaiveDate) -> Result<Value, HandlerErr> {
    let admission_no = get_required_str(params, "admissionNo")?;
    let date = get_required_date(params, "date")?;
    let status = get_required_status(params, "status")?;
    let edited_by = get_required_str(params, "editedBy")?;
    let reason = get_optional_str(params, "reason").unwrap_or_default();

    let setup = load_attendance_setup(conn)
        .map_err(|e| HandlerErr::new("db_query_failed", e.to_string()))?;
    if setup.require_edit_reason && reason.is_empty() {
        return Err(HandlerErr::bad_params("missing reason"));
    }
    check_max_chars(&reason, "reason", setup.edit_reason_max_chars)?;

    let date_key = format_date(date);
    let existing: Option<(String, String)> = conn
        .query_row(
            "SELECT status, class_section FROM attendance_records WHERE admission_no = ? AND date = ?",
            (&admission_no, &date_key),
            |r| Ok((r.get(0)?, r.get(1)?)),
        )
        .optional()
        .map_err(HandlerErr::query_failed)?;
    let Some((old_status, class_section)) = existing else {
        return Err(HandlerErr::not_found("attendance record not found"));
    };

    let eligibility = eligibility_for(conn, WindowScope::Class, &class_section, date, today)?;
    require_eligible(eligibility, date)?;

    if old_status == status.as_str() {
        return Ok(json!({ "changed": false, "status": old_status }));
    }

    let now = db::now_timestamp();
    let tx = conn
        .unchecked_transaction()
        .map_err(|e| HandlerErr::new("db_tx_failed", e.to_string()))?;
    tx.execute(
        "UPDATE attendance_records SET status = ?, updated_at = ? WHERE admission_no = ? AND date = ?",
        (status.as_str(), &now, &admission_no, &date_key),
    )
    .map_err(|e| HandlerErr::write_failed("db_update_failed", "attendance_records", e))?;
    tx.execute(
        "INSERT INTO attendance_edits(id, admission_no, date, old_status, new_status, reason, edited_by, edited_at)
         VALUES(?, ?, ?, ?, ?, ?, ?, ?)",
        (
            Uuid::new_v4().to_string(),
            &admission_no,
            &date_key,
            &old_status,
            status.as_str(),
            &reason,
            &edited_by,
            &now,
        ),
    )
    .map_err(|e| HandlerErr::write_failed("db_insert_failed", "attendance_edits", e))?;
    tx.commit()
        .map_err(|e| HandlerErr::new("db_commit_failed", e.to_string()))?;

    tracing::info!(
        admission_no = %admission_no,
        date = %date_key,
        from = %old_status,
        to = status.as_str(),
        "attendance edited"
    );
    Ok(json!({
        "changed": true,
        "previousStatus": old_status,
        "status": status.as_str()
    }))
}

fn attendance_edits(conn: &Connection, params: &Value) -> Result<Value, HandlerErr> {
    let admission_no = get_required_str(params, "admissionNo")?;
    let date = get_optional_date(params, "date")?.map(format_date);
    let mut stmt = conn
        .prepare(
            "SELECT id, date, old_status, new_status, reason, edited_by, edited_at
             FROM attendance_edits
             WHERE admission_no = ?1 AND (?2 IS NULL OR date = ?2)
             ORDER BY edited_at, rowid",
        )
        .map_err(HandlerErr::query_failed)?;
    let edits = stmt
        .query_map((&admission_no, &date), |r| {
            Ok(json!({
                "id": r.get::<_, String>(0)?,
                "date": r.get::<_, String>(1)?,
                "oldStatus": r.get::<_, String>(2)?,
                "newStatus": r.get::<_, String>(3)?,
                "reason": r.get::<_, String>(4)?,
                "editedBy": r.get::<_, String>(5)?,
                "editedAt": r.get::<_, String>(6)?
            }))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(HandlerErr::query_failed)?;
    Ok(json!({ "admissionNo": admission_no, "edits": edits }))
}

fn date_range(params: &Value) -> Result<(Option<String>, Option<String>), HandlerErr> {
    let from = get_optional_date(params, "from")?;
    let to = get_optional_date(params, "to")?;
    if let (Some(f), Some(t)) = (from, to) {
        if t < f {
            return Err(HandlerErr::bad_params("to must not be before from"));
        }
    }
    Ok((from.map(format_date), to.map(format_date)))
}

fn attendance_history(conn: &Connection, params: &Value) -> Result<Value, HandlerErr> {
    let admission_no = get_required_str(params, "admissionNo")?;
    let (from, to) = date_range(params)?;
    if student_section(conn, &admission_no)?.is_none() {
        return Err(HandlerErr::not_found("student not found"));
    }

    let mut stmt = conn
        .prepare(
            "SELECT date, status, class_section, marked_by
             FROM attendance_records
             WHERE admission_no = ?1
               AND (?2 IS NULL OR date >= ?2)
               AND (?3 IS NULL OR date <= ?3)
             ORDER BY date",
        )
        .map_err(HandlerErr::query_failed)?;
    let rows = stmt
        .query_map((&admission_no, &from, &to), |r| {
            Ok((
                r.get::<_, String>(0)?,
                r.get::<_, String>(1)?,
                r.get::<_, String>(2)?,
                r.get::<_, String>(3)?,
            ))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(HandlerErr::query_failed)?;

    let setup = load_attendance_setup(conn)
        .map_err(|e| HandlerErr::new("db_query_failed", e.to_string()))?;
    let mut tally = AttendanceTally::default();
    let records: Vec<Value> = rows
        .into_iter()
        .map(|(date, status, class_section, marked_by)| {
            tally.add(&status);
            json!({
                "date": date,
                "status": status,
                "classSection": class_section,
                "markedBy": marked_by
            })
        })
        .collect();

    Ok(json!({
        "admissionNo": admission_no,
        "records": records,
        "summary": tally.to_json(setup.late_counts_as_present)
    }))
}

fn teacher_attendance_mark(
    conn: &Connection,
    params: &Value,
    today: NaiveDate,
) -> Result<Value, HandlerErr> {
    let teacher_id = get_required_str(params, "teacherId")?;
    let date = get_required_date(params, "date")?;
    let status = get_required_status(params, "status")?;
    if !teacher_exists(conn, &teacher_id)? {
        return Err(HandlerErr::not_found("teacher not found"));
    }

    let eligibility = eligibility_for(conn, WindowScope::Teacher, &teacher_id, date, today)?;
    require_eligible(eligibility, date)?;

    let date_key = format_date(date);
    let existing: Option<String> = conn
        .query_row(
            "SELECT status FROM teacher_attendance WHERE teacher_id = ? AND date = ?",
            (&teacher_id, &date_key),
            |r| r.get(0),
        )
        .optional()
        .map_err(HandlerErr::query_failed)?;
    if let Some(existing) = existing {
        return Err(HandlerErr::conflict("attendance already marked for this date")
            .with_details(json!({ "date": date_key, "status": existing })));
    }

    conn.execute(
        "INSERT INTO teacher_attendance(teacher_id, date, status, created_at) VALUES(?, ?, ?, ?)",
        (&teacher_id, &date_key, status.as_str(), db::now_timestamp()),
    )
    .map_err(|e| HandlerErr::write_failed("db_insert_failed", "teacher_attendance", e))?;
    Ok(json!({ "ok": true, "date": date_key, "status": status.as_str() }))
}

fn teacher_attendance_list(conn: &Connection, params: &Value) -> Result<Value, HandlerErr> {
    let teacher_id = get_required_str(params, "teacherId")?;
    let (from, to) = date_range(params)?;
    if !teacher_exists(conn, &teacher_id)? {
        return Err(HandlerErr::not_found("teacher not found"));
    }
    let mut stmt = conn
        .prepare(
            "SELECT date, status FROM teacher_attendance
             WHERE teacher_id = ?1
               AND (?2 IS NULL OR date >= ?2)
               AND (?3 IS NULL OR date <= ?3)
             ORDER BY date",
        )
        .map_err(HandlerErr::query_failed)?;
    let rows = stmt
        .query_map((&teacher_id, &from, &to), |r| {
            Ok((r.get::<_, String>(0)?, r.get::<_, String>(1)?))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(HandlerErr::query_failed)?;

    let setup = load_attendance_setup(conn)
        .map_err(|e| HandlerErr::new("db_query_failed", e.to_string()))?;
    let mut tally = AttendanceTally::default();
    let records: Vec<Value> = rows
        .into_iter()
        .map(|(date, status)| {
            tally.add(&status);
            json!({ "date": date, "status": status })
        })
        .collect();
    Ok(json!({
        "teacherId": teacher_id,
        "records": records,
        "summary": tally.to_json(setup.late_counts_as_present)
    }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    let today = state.today();
    let resp = match req.method.as_str() {
        "attendance.eligibility" => {
            with_conn(state, req, |conn| attendance_eligibility(conn, &req.params, today))
        }
        "attendance.get" => with_conn(state, req, |conn| attendance_get(conn, &req.params, today)),
        "attendance.mark" => {
            with_conn(state, req, |conn| attendance_mark(conn, &req.params, today))
        }
        "attendance.edit" => {
            with_conn(state, req, |conn| attendance_edit(conn, &req.params, today))
        }
        "attendance.edits" => with_conn(state, req, |conn| attendance_edits(conn, &req.params)),
        "attendance.history" => {
            with_conn(state, req, |conn| attendance_history(conn, &req.params))
        }
        "teacherAttendance.mark" => {
            with_conn(state, req, |conn| teacher_attendance_mark(conn, &req.params, today))
        }
        "teacherAttendance.list" => {
            with_conn(state, req, |conn| teacher_attendance_list(conn, &req.params))
        }
        _ => return None,
    };
    Some(resp)
}
