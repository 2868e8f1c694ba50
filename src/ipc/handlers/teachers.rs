use crate::db;
use crate::ipc::helpers::{
    get_optional_bool, get_optional_str, get_required_str, patch_nullable_str, with_conn,
    HandlerErr,
};
use crate::ipc::types::{AppState, Request};
use rusqlite::{Connection, OptionalExtension, Row};
use serde_json::{json, Value};
use uuid::Uuid;

#[derive(Debug, Clone)]
pub struct TeacherRow {
    pub id: String,
    pub employee_no: String,
    pub name: String,
    pub email: Option<String>,
    pub subject: Option<String>,
    pub class_section: Option<String>,
    pub active: bool,
    pub created_at: String,
    pub updated_at: String,
}

impl TeacherRow {
    pub fn to_json(&self) -> Value {
        json!({
            "id": self.id,
            "employeeNo": self.employee_no,
            "name": self.name,
            "email": self.email,
            "subject": self.subject,
            "classSection": self.class_section,
            "active": self.active,
            "createdAt": self.created_at,
            "updatedAt": self.updated_at
        })
    }
}

const TEACHER_COLUMNS: &str =
    "id, employee_no, name, email, subject, class_section, active, created_at, updated_at";

fn teacher_from_row(r: &Row<'_>) -> rusqlite::Result<TeacherRow> {
    Ok(TeacherRow {
        id: r.get(0)?,
        employee_no: r.get(1)?,
        name: r.get(2)?,
        email: r.get(3)?,
        subject: r.get(4)?,
        class_section: r.get(5)?,
        active: r.get::<_, i64>(6)? != 0,
        created_at: r.get(7)?,
        updated_at: r.get(8)?,
    })
}

pub fn load_teacher(conn: &Connection, teacher_id: &str) -> Result<Option<TeacherRow>, HandlerErr> {
    conn.query_row(
        &format!("SELECT {} FROM teachers WHERE id = ?", TEACHER_COLUMNS),
        [teacher_id],
        teacher_from_row,
    )
    .optional()
    .map_err(HandlerErr::query_failed)
}

fn employee_no_taken(
    conn: &Connection,
    employee_no: &str,
    except_id: Option<&str>,
) -> Result<bool, HandlerErr> {
    let found: Option<String> = conn
        .query_row(
            "SELECT id FROM teachers WHERE employee_no = ?",
            [employee_no],
            |r| r.get(0),
        )
        .optional()
        .map_err(HandlerErr::query_failed)?;
    Ok(match found {
        Some(id) => Some(id.as_str()) != except_id,
        None => false,
    })
}

fn teachers_list(conn: &Connection, params: &Value) -> Result<Value, HandlerErr> {
    let include_inactive = get_optional_bool(params, "includeInactive")?.unwrap_or(false);
    let mut stmt = conn
        .prepare(&format!(
            "SELECT {} FROM teachers WHERE active = 1 OR ? ORDER BY name, employee_no",
            TEACHER_COLUMNS
        ))
        .map_err(HandlerErr::query_failed)?;
    let teachers = stmt
        .query_map([include_inactive as i64], teacher_from_row)
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(HandlerErr::query_failed)?;
    let teachers_json: Vec<Value> = teachers.iter().map(TeacherRow::to_json).collect();
    Ok(json!({ "teachers": teachers_json }))
}

fn teachers_create(conn: &Connection, params: &Value) -> Result<Value, HandlerErr> {
    let employee_no = get_required_str(params, "employeeNo")?;
    let name = get_required_str(params, "name")?;
    let email = get_optional_str(params, "email");
    let subject = get_optional_str(params, "subject");
    let class_section = get_optional_str(params, "classSection");

    if employee_no_taken(conn, &employee_no, None)? {
        return Err(HandlerErr::conflict("employee number already in use")
            .with_details(json!({ "employeeNo": employee_no })));
    }

    let id = Uuid::new_v4().to_string();
    let now = db::now_timestamp();
    conn.execute(
        "INSERT INTO teachers(id, employee_no, name, email, subject, class_section, active, created_at, updated_at)
         VALUES(?, ?, ?, ?, ?, ?, 1, ?, ?)",
        (&id, &employee_no, &name, &email, &subject, &class_section, &now, &now),
    )
    .map_err(|e| HandlerErr::write_failed("db_insert_failed", "teachers", e))?;

    tracing::info!(teacher_id = %id, employee_no = %employee_no, "teacher created");
    Ok(json!({ "teacherId": id }))
}

fn teachers_update(conn: &Connection, params: &Value) -> Result<Value, HandlerErr> {
    let teacher_id = get_required_str(params, "teacherId")?;
    let (patch_value, patch) = match params.get("patch") {
        Some(v @ Value::Object(m)) => (v, m),
        _ => return Err(HandlerErr::bad_params("patch must be an object")),
    };
    let Some(mut teacher) = load_teacher(conn, &teacher_id)? else {
        return Err(HandlerErr::not_found("teacher not found"));
    };

    for key in patch.keys() {
        if !matches!(
            key.as_str(),
            "employeeNo" | "name" | "email" | "subject" | "classSection" | "active"
        ) {
            return Err(HandlerErr::bad_params(format!("unknown teacher field: {}", key)));
        }
    }
    if patch.contains_key("employeeNo") {
        let employee_no = get_required_str(patch_value, "employeeNo")?;
        if employee_no_taken(conn, &employee_no, Some(&teacher_id))? {
            return Err(HandlerErr::conflict("employee number already in use")
                .with_details(json!({ "employeeNo": employee_no })));
        }
        teacher.employee_no = employee_no;
    }
    if patch.contains_key("name") {
        teacher.name = get_required_str(patch_value, "name")?;
    }
    patch_nullable_str(patch, "email", &mut teacher.email)?;
    patch_nullable_str(patch, "subject", &mut teacher.subject)?;
    patch_nullable_str(patch, "classSection", &mut teacher.class_section)?;
    if let Some(active) = get_optional_bool(patch_value, "active")? {
        teacher.active = active;
    }

    teacher.updated_at = db::now_timestamp();
    conn.execute(
        "UPDATE teachers
         SET employee_no = ?, name = ?, email = ?, subject = ?, class_section = ?, active = ?, updated_at = ?
         WHERE id = ?",
        (
            &teacher.employee_no,
            &teacher.name,
            &teacher.email,
            &teacher.subject,
            &teacher.class_section,
            teacher.active as i64,
            &teacher.updated_at,
            &teacher.id,
        ),
    )
    .map_err(|e| HandlerErr::write_failed("db_update_failed", "teachers", e))?;

    Ok(json!({ "teacher": teacher.to_json() }))
}

fn teachers_delete(conn: &Connection, params: &Value) -> Result<Value, HandlerErr> {
    let teacher_id = get_required_str(params, "teacherId")?;
    if load_teacher(conn, &teacher_id)?.is_none() {
        return Err(HandlerErr::not_found("teacher not found"));
    }
    let attendance_days: i64 = conn
        .query_row(
            "SELECT COUNT(*) FROM teacher_attendance WHERE teacher_id = ?",
            [&teacher_id],
            |r| r.get(0),
        )
        .map_err(HandlerErr::query_failed)?;
    if attendance_days > 0 {
        return Err(HandlerErr::conflict(
            "teacher has attendance history; deactivate instead",
        )
        .with_details(json!({ "attendanceDays": attendance_days })));
    }

    let tx = conn
        .unchecked_transaction()
        .map_err(|e| HandlerErr::new("db_tx_failed", e.to_string()))?;
    let cleared = tx
        .execute(
            "UPDATE timetable_slots SET teacher_id = NULL WHERE teacher_id = ?",
            [&teacher_id],
        )
        .map_err(|e| HandlerErr::write_failed("db_update_failed", "timetable_slots", e))?;
    tx.execute("DELETE FROM teachers WHERE id = ?", [&teacher_id])
        .map_err(|e| HandlerErr::write_failed("db_delete_failed", "teachers", e))?;
    tx.commit()
        .map_err(|e| HandlerErr::new("db_commit_failed", e.to_string()))?;

    tracing::info!(teacher_id = %teacher_id, cleared_slots = cleared, "teacher deleted");
    Ok(json!({ "ok": true, "clearedTimetableSlots": cleared }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    let f: fn(&Connection, &Value) -> Result<Value, HandlerErr> = match req.method.as_str() {
        "teachers.list" => teachers_list,
        "teachers.create" => teachers_create,
        "teachers.update" => teachers_update,
        "teachers.delete" => teachers_delete,
        _ => return None,
    };
    Some(with_conn(state, req, |conn| f(conn, &req.params)))
}
