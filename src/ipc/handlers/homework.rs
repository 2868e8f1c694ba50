use crate::db;
use crate::ipc::helpers::{
    check_max_chars, format_date, get_optional_date, get_optional_str, get_required_date,
    get_required_str, with_conn, HandlerErr,
};
use crate::ipc::types::{AppState, Request};
use rusqlite::Connection;
use serde_json::{json, Value};
use uuid::Uuid;

const TITLE_MAX_CHARS: usize = 200;
const DESCRIPTION_MAX_CHARS: usize = 4000;

fn homework_create(conn: &Connection, params: &Value) -> Result<Value, HandlerErr> {
    let class_section = get_required_str(params, "classSection")?;
    let subject = get_required_str(params, "subject")?;
    let title = get_required_str(params, "title")?;
    let description = get_optional_str(params, "description");
    let due_date = get_required_date(params, "dueDate")?;
    let assigned_by = get_required_str(params, "assignedBy")?;
    check_max_chars(&title, "title", TITLE_MAX_CHARS)?;
    if let Some(d) = description.as_deref() {
        check_max_chars(d, "description", DESCRIPTION_MAX_CHARS)?;
    }

    let id = Uuid::new_v4().to_string();
    conn.execute(
        "INSERT INTO homework(id, class_section, subject, title, description, due_date, assigned_by, created_at)
         VALUES(?, ?, ?, ?, ?, ?, ?, ?)",
        (
            &id,
            &class_section,
            &subject,
            &title,
            &description,
            format_date(due_date),
            &assigned_by,
            db::now_timestamp(),
        ),
    )
    .map_err(|e| HandlerErr::write_failed("db_insert_failed", "homework", e))?;

    tracing::info!(homework_id = %id, class_section = %class_section, subject = %subject, "homework assigned");
    Ok(json!({ "homeworkId": id }))
}

fn homework_list(conn: &Connection, params: &Value) -> Result<Value, HandlerErr> {
    let class_section = get_required_str(params, "classSection")?;
    let subject = get_optional_str(params, "subject");
    let due_from = get_optional_date(params, "dueFrom")?.map(format_date);

    let mut stmt = conn
        .prepare(
            "SELECT id, subject, title, description, due_date, assigned_by, created_at
             FROM homework
             WHERE class_section = ?1
               AND (?2 IS NULL OR subject = ?2)
               AND (?3 IS NULL OR due_date >= ?3)
             ORDER BY due_date, created_at",
        )
        .map_err(HandlerErr::query_failed)?;
    let homework = stmt
        .query_map((&class_section, &subject, &due_from), |r| {
            Ok(json!({
                "id": r.get::<_, String>(0)?,
                "subject": r.get::<_, String>(1)?,
                "title": r.get::<_, String>(2)?,
                "description": r.get::<_, Option<String>>(3)?,
                "dueDate": r.get::<_, String>(4)?,
                "assignedBy": r.get::<_, String>(5)?,
                "createdAt": r.get::<_, String>(6)?
            }))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(HandlerErr::query_failed)?;
    Ok(json!({ "classSection": class_section, "homework": homework }))
}

fn homework_delete(conn: &Connection, params: &Value) -> Result<Value, HandlerErr> {
    let homework_id = get_required_str(params, "homeworkId")?;
    let deleted = conn
        .execute("DELETE FROM homework WHERE id = ?", [&homework_id])
        .map_err(|e| HandlerErr::write_failed("db_delete_failed", "homework", e))?;
    if deleted == 0 {
        return Err(HandlerErr::not_found("homework not found"));
    }
    Ok(json!({ "ok": true }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    let f: fn(&Connection, &Value) -> Result<Value, HandlerErr> = match req.method.as_str() {
        "homework.create" => homework_create,
        "homework.list" => homework_list,
        "homework.delete" => homework_delete,
        _ => return None,
    };
    Some(with_conn(state, req, |conn| f(conn, &req.params)))
}
