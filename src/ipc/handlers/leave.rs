use crate::db;
use crate::ipc::helpers::{
    check_max_chars, format_date, get_optional_str, get_required_date, get_required_str,
    student_section, teacher_exists, with_conn, HandlerErr,
};
use crate::ipc::types::{AppState, Request};
use rusqlite::{Connection, OptionalExtension, Row};
use serde_json::{json, Value};
use uuid::Uuid;

const REASON_MAX_CHARS: usize = 1000;
const STATUS_PENDING: &str = "pending";

fn parse_role(raw: &str) -> Option<&'static str> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "teacher" => Some("teacher"),
        "student" => Some("student"),
        _ => None,
    }
}

fn parse_decision(raw: &str) -> Option<&'static str> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "approved" => Some("approved"),
        "rejected" => Some("rejected"),
        _ => None,
    }
}

const LEAVE_COLUMNS: &str = "id, requester_role, requester_id, start_date, end_date, reason, status, decided_by, decision_note, created_at, decided_at";

fn leave_from_row(r: &Row<'_>) -> rusqlite::Result<Value> {
    Ok(json!({
        "id": r.get::<_, String>(0)?,
        "requesterRole": r.get::<_, String>(1)?,
        "requesterId": r.get::<_, String>(2)?,
        "startDate": r.get::<_, String>(3)?,
        "endDate": r.get::<_, String>(4)?,
        "reason": r.get::<_, String>(5)?,
        "status": r.get::<_, String>(6)?,
        "decidedBy": r.get::<_, Option<String>>(7)?,
        "decisionNote": r.get::<_, Option<String>>(8)?,
        "createdAt": r.get::<_, String>(9)?,
        "decidedAt": r.get::<_, Option<String>>(10)?
    }))
}

fn leave_create(conn: &Connection, params: &Value) -> Result<Value, HandlerErr> {
    let role_raw = get_required_str(params, "requesterRole")?;
    let Some(role) = parse_role(&role_raw) else {
        return Err(HandlerErr::bad_params("requesterRole must be teacher or student"));
    };
    let requester_id = get_required_str(params, "requesterId")?;
    let start = get_required_date(params, "startDate")?;
    let end = get_required_date(params, "endDate")?;
    let reason = get_required_str(params, "reason")?;
    if end < start {
        return Err(HandlerErr::bad_params("endDate must not be before startDate"));
    }
    check_max_chars(&reason, "reason", REASON_MAX_CHARS)?;

    let exists = match role {
        "teacher" => teacher_exists(conn, &requester_id)?,
        _ => student_section(conn, &requester_id)?.is_some(),
    };
    if !exists {
        return Err(HandlerErr::not_found(format!("{} not found", role)));
    }

    let id = Uuid::new_v4().to_string();
    conn.execute(
        "INSERT INTO leave_requests(id, requester_role, requester_id, start_date, end_date, reason, status, created_at)
         VALUES(?, ?, ?, ?, ?, ?, ?, ?)",
        (
            &id,
            role,
            &requester_id,
            format_date(start),
            format_date(end),
            &reason,
            STATUS_PENDING,
            db::now_timestamp(),
        ),
    )
    .map_err(|e| HandlerErr::write_failed("db_insert_failed", "leave_requests", e))?;

    tracing::info!(leave_id = %id, role, requester_id = %requester_id, "leave requested");
    Ok(json!({ "leaveId": id, "status": STATUS_PENDING }))
}

fn leave_list(conn: &Connection, params: &Value) -> Result<Value, HandlerErr> {
    let role = match get_optional_str(params, "requesterRole") {
        Some(raw) => Some(
            parse_role(&raw)
                .ok_or_else(|| HandlerErr::bad_params("requesterRole must be teacher or student"))?,
        ),
        None => None,
    };
    let requester_id = get_optional_str(params, "requesterId");
    let status = get_optional_str(params, "status");

    let mut stmt = conn
        .prepare(&format!(
            "SELECT {} FROM leave_requests
             WHERE (?1 IS NULL OR requester_role = ?1)
               AND (?2 IS NULL OR requester_id = ?2)
               AND (?3 IS NULL OR status = ?3)
             ORDER BY created_at DESC, rowid DESC",
            LEAVE_COLUMNS
        ))
        .map_err(HandlerErr::query_failed)?;
    let requests = stmt
        .query_map((role, &requester_id, &status), leave_from_row)
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(HandlerErr::query_failed)?;
    Ok(json!({ "requests": requests }))
}

fn leave_decide(conn: &Connection, params: &Value) -> Result<Value, HandlerErr> {
    let leave_id = get_required_str(params, "leaveId")?;
    let decision_raw = get_required_str(params, "decision")?;
    let Some(decision) = parse_decision(&decision_raw) else {
        return Err(HandlerErr::bad_params("decision must be approved or rejected"));
    };
    let decided_by = get_required_str(params, "decidedBy")?;
    let note = get_optional_str(params, "note");
    if let Some(n) = note.as_deref() {
        check_max_chars(n, "note", REASON_MAX_CHARS)?;
    }

    let current: Option<String> = conn
        .query_row(
            "SELECT status FROM leave_requests WHERE id = ?",
            [&leave_id],
            |r| r.get(0),
        )
        .optional()
        .map_err(HandlerErr::query_failed)?;
    let Some(current) = current else {
        return Err(HandlerErr::not_found("leave request not found"));
    };
    if current != STATUS_PENDING {
        return Err(HandlerErr::conflict("leave request already decided")
            .with_details(json!({ "status": current })));
    }

    conn.execute(
        "UPDATE leave_requests
         SET status = ?, decided_by = ?, decision_note = ?, decided_at = ?
         WHERE id = ? AND status = ?",
        (
            decision,
            &decided_by,
            &note,
            db::now_timestamp(),
            &leave_id,
            STATUS_PENDING,
        ),
    )
    .map_err(|e| HandlerErr::write_failed("db_update_failed", "leave_requests", e))?;

    tracing::info!(leave_id = %leave_id, decision, "leave decided");
    Ok(json!({ "ok": true, "status": decision }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    let f: fn(&Connection, &Value) -> Result<Value, HandlerErr> = match req.method.as_str() {
        "leave.create" => leave_create,
        "leave.list" => leave_list,
        "leave.decide" => leave_decide,
        _ => return None,
    };
    Some(with_conn(state, req, |conn| f(conn, &req.params)))
}
