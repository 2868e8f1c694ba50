use crate::db;
use crate::eligibility::{open_window_for, BacklogWindow, WindowScope, WindowStatus};
use crate::ipc::helpers::{
    format_date, get_optional_date, get_optional_str, get_required_date, get_required_str,
    parse_date, teacher_exists, with_conn, HandlerErr,
};
use crate::ipc::types::{AppState, Request};
use rusqlite::{Connection, Row};
use serde_json::{json, Value};
use uuid::Uuid;

struct WindowRow {
    id: String,
    scope: String,
    scope_id: String,
    start_date: String,
    end_date: String,
    opened_by: String,
    status: String,
    created_at: String,
    updated_at: String,
}

impl WindowRow {
    fn to_json(&self) -> Value {
        json!({
            "id": self.id,
            "scope": self.scope,
            "scopeId": self.scope_id,
            "startDate": self.start_date,
            "endDate": self.end_date,
            "openedBy": self.opened_by,
            "status": self.status,
            "createdAt": self.created_at,
            "updatedAt": self.updated_at
        })
    }

    fn to_window(&self) -> Option<BacklogWindow> {
        Some(BacklogWindow {
            id: self.id.clone(),
            start: parse_date(&self.start_date)?,
            end: parse_date(&self.end_date)?,
            status: WindowStatus::parse(&self.status)?,
        })
    }
}

const WINDOW_COLUMNS: &str =
    "id, scope_kind, scope_id, start_date, end_date, opened_by, status, created_at, updated_at";

fn window_from_row(r: &Row<'_>) -> rusqlite::Result<WindowRow> {
    Ok(WindowRow {
        id: r.get(0)?,
        scope: r.get(1)?,
        scope_id: r.get(2)?,
        start_date: r.get(3)?,
        end_date: r.get(4)?,
        opened_by: r.get(5)?,
        status: r.get(6)?,
        created_at: r.get(7)?,
        updated_at: r.get(8)?,
    })
}

fn parse_scope(params: &Value, key: &str) -> Result<WindowScope, HandlerErr> {
    let raw = get_required_str(params, key)?;
    WindowScope::parse(&raw)
        .ok_or_else(|| HandlerErr::bad_params(format!("{} must be class or teacher", key)))
}

/// All windows of one scope. Rows that no longer parse are ignored.
pub fn load_windows(
    conn: &Connection,
    scope: WindowScope,
    scope_id: &str,
) -> Result<Vec<BacklogWindow>, HandlerErr> {
    let mut stmt = conn
        .prepare(&format!(
            "SELECT {} FROM backlog_windows
             WHERE scope_kind = ? AND scope_id = ?
             ORDER BY start_date, created_at",
            WINDOW_COLUMNS
        ))
        .map_err(HandlerErr::query_failed)?;
    let rows = stmt
        .query_map((scope.as_str(), scope_id), window_from_row)
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(HandlerErr::query_failed)?;
    Ok(rows.iter().filter_map(WindowRow::to_window).collect())
}

fn backlog_open(conn: &Connection, params: &Value) -> Result<Value, HandlerErr> {
    let scope = parse_scope(params, "scope")?;
    let scope_id = get_required_str(params, "scopeId")?;
    let start = get_required_date(params, "startDate")?;
    let end = get_optional_date(params, "endDate")?.unwrap_or(start);
    let opened_by = get_required_str(params, "openedBy")?;
    if end < start {
        return Err(HandlerErr::bad_params("endDate must not be before startDate"));
    }
    if scope == WindowScope::Teacher && !teacher_exists(conn, &scope_id)? {
        return Err(HandlerErr::not_found("teacher not found"));
    }

    let id = Uuid::new_v4().to_string();
    let now = db::now_timestamp();
    conn.execute(
        "INSERT INTO backlog_windows(id, scope_kind, scope_id, start_date, end_date, opened_by, status, created_at, updated_at)
         VALUES(?, ?, ?, ?, ?, ?, ?, ?, ?)",
        (
            &id,
            scope.as_str(),
            &scope_id,
            format_date(start),
            format_date(end),
            &opened_by,
            WindowStatus::Open.as_str(),
            &now,
            &now,
        ),
    )
    .map_err(|e| HandlerErr::write_failed("db_insert_failed", "backlog_windows", e))?;

    tracing::info!(
        window_id = %id,
        scope = scope.as_str(),
        scope_id = %scope_id,
        start = %start,
        end = %end,
        "backlog window opened"
    );
    Ok(json!({ "windowId": id, "status": WindowStatus::Open.as_str() }))
}

fn backlog_set_status(conn: &Connection, params: &Value) -> Result<Value, HandlerErr> {
    let window_id = get_required_str(params, "windowId")?;
    let raw_status = get_required_str(params, "status")?;
    let Some(status) = WindowStatus::parse(&raw_status) else {
        return Err(HandlerErr::bad_params("status must be open, closed or rejected"));
    };
    let changed = conn
        .execute(
            "UPDATE backlog_windows SET status = ?, updated_at = ? WHERE id = ?",
            (status.as_str(), db::now_timestamp(), &window_id),
        )
        .map_err(|e| HandlerErr::write_failed("db_update_failed", "backlog_windows", e))?;
    if changed == 0 {
        return Err(HandlerErr::not_found("backlog window not found"));
    }
    tracing::info!(window_id = %window_id, status = status.as_str(), "backlog window updated");
    Ok(json!({ "ok": true, "status": status.as_str() }))
}

fn backlog_list(conn: &Connection, params: &Value) -> Result<Value, HandlerErr> {
    let scope = match get_optional_str(params, "scope") {
        Some(raw) => Some(
            WindowScope::parse(&raw)
                .ok_or_else(|| HandlerErr::bad_params("scope must be class or teacher"))?
                .as_str(),
        ),
        None => None,
    };
    let scope_id = get_optional_str(params, "scopeId");
    let status = match get_optional_str(params, "status") {
        Some(raw) => Some(
            WindowStatus::parse(&raw)
                .ok_or_else(|| HandlerErr::bad_params("status must be open, closed or rejected"))?
                .as_str(),
        ),
        None => None,
    };

    let mut stmt = conn
        .prepare(&format!(
            "SELECT {} FROM backlog_windows
             WHERE (?1 IS NULL OR scope_kind = ?1)
               AND (?2 IS NULL OR scope_id = ?2)
               AND (?3 IS NULL OR status = ?3)
             ORDER BY created_at DESC",
            WINDOW_COLUMNS
        ))
        .map_err(HandlerErr::query_failed)?;
    let rows = stmt
        .query_map((scope, &scope_id, status), window_from_row)
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(HandlerErr::query_failed)?;
    let windows: Vec<Value> = rows.iter().map(WindowRow::to_json).collect();
    Ok(json!({ "windows": windows }))
}

fn backlog_status(conn: &Connection, params: &Value) -> Result<Value, HandlerErr> {
    let scope = parse_scope(params, "scope")?;
    let scope_id = get_required_str(params, "scopeId")?;
    let date = get_required_date(params, "date")?;
    let windows = load_windows(conn, scope, &scope_id)?;
    let open = open_window_for(date, &windows);
    Ok(json!({
        "open": open.is_some(),
        "windowId": open.map(|w| w.id.clone())
    }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    let f: fn(&Connection, &Value) -> Result<Value, HandlerErr> = match req.method.as_str() {
        "backlog.open" => backlog_open,
        "backlog.setStatus" => backlog_set_status,
        "backlog.list" => backlog_list,
        "backlog.status" => backlog_status,
        _ => return None,
    };
    Some(with_conn(state, req, |conn| f(conn, &req.params)))
}
