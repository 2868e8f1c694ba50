use crate::db;
use crate::ipc::helpers::{
    get_optional_bool, get_optional_str, get_required_str, patch_nullable_str, with_conn,
    HandlerErr,
};
use crate::ipc::types::{AppState, Request};
use rusqlite::{Connection, OptionalExtension, Row};
use serde_json::{json, Value};

#[derive(Debug, Clone)]
pub struct StudentRow {
    pub admission_no: String,
    pub name: String,
    pub class_section: String,
    pub roll_no: Option<i64>,
    pub guardian_name: Option<String>,
    pub active: bool,
    pub created_at: String,
    pub updated_at: String,
}

impl StudentRow {
    pub fn to_json(&self) -> Value {
        json!({
            "admissionNo": self.admission_no,
            "name": self.name,
            "classSection": self.class_section,
            "rollNo": self.roll_no,
            "guardianName": self.guardian_name,
            "active": self.active,
            "createdAt": self.created_at,
            "updatedAt": self.updated_at
        })
    }
}

const STUDENT_COLUMNS: &str =
    "admission_no, name, class_section, roll_no, guardian_name, active, created_at, updated_at";

const STUDENT_ORDER: &str = "ORDER BY class_section, roll_no IS NULL, roll_no, name";

fn student_from_row(r: &Row<'_>) -> rusqlite::Result<StudentRow> {
    Ok(StudentRow {
        admission_no: r.get(0)?,
        name: r.get(1)?,
        class_section: r.get(2)?,
        roll_no: r.get(3)?,
        guardian_name: r.get(4)?,
        active: r.get::<_, i64>(5)? != 0,
        created_at: r.get(6)?,
        updated_at: r.get(7)?,
    })
}

pub fn load_student(conn: &Connection, admission_no: &str) -> Result<Option<StudentRow>, HandlerErr> {
    conn.query_row(
        &format!("SELECT {} FROM students WHERE admission_no = ?", STUDENT_COLUMNS),
        [admission_no],
        student_from_row,
    )
    .optional()
    .map_err(HandlerErr::query_failed)
}

/// Active students of a section in register order.
pub fn active_roster(conn: &Connection, class_section: &str) -> Result<Vec<StudentRow>, HandlerErr> {
    let mut stmt = conn
        .prepare(&format!(
            "SELECT {} FROM students WHERE class_section = ? AND active = 1 {}",
            STUDENT_COLUMNS, STUDENT_ORDER
        ))
        .map_err(HandlerErr::query_failed)?;
    stmt.query_map([class_section], student_from_row)
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(HandlerErr::query_failed)
}

fn parse_roll_no(v: Option<&Value>) -> Result<Option<Option<i64>>, HandlerErr> {
    match v {
        None => Ok(None),
        Some(Value::Null) => Ok(Some(None)),
        Some(v) => match v.as_i64() {
            Some(n) if n > 0 => Ok(Some(Some(n))),
            _ => Err(HandlerErr::bad_params("rollNo must be a positive integer or null")),
        },
    }
}

fn students_list(conn: &Connection, params: &Value) -> Result<Value, HandlerErr> {
    let class_section = get_optional_str(params, "classSection");
    let include_inactive = get_optional_bool(params, "includeInactive")?.unwrap_or(false);
    let mut stmt = conn
        .prepare(&format!(
            "SELECT {} FROM students
             WHERE (?1 IS NULL OR class_section = ?1) AND (active = 1 OR ?2)
             {}",
            STUDENT_COLUMNS, STUDENT_ORDER
        ))
        .map_err(HandlerErr::query_failed)?;
    let students = stmt
        .query_map((&class_section, include_inactive as i64), student_from_row)
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(HandlerErr::query_failed)?;
    let students_json: Vec<Value> = students.iter().map(StudentRow::to_json).collect();
    Ok(json!({ "students": students_json }))
}

fn students_create(conn: &Connection, params: &Value) -> Result<Value, HandlerErr> {
    let admission_no = get_required_str(params, "admissionNo")?;
    let name = get_required_str(params, "name")?;
    let class_section = get_required_str(params, "classSection")?;
    let roll_no = parse_roll_no(params.get("rollNo"))?.flatten();
    let guardian_name = get_optional_str(params, "guardianName");

    if load_student(conn, &admission_no)?.is_some() {
        return Err(HandlerErr::conflict("admission number already in use")
            .with_details(json!({ "admissionNo": admission_no })));
    }

    let now = db::now_timestamp();
    conn.execute(
        "INSERT INTO students(admission_no, name, class_section, roll_no, guardian_name, active, created_at, updated_at)
         VALUES(?, ?, ?, ?, ?, 1, ?, ?)",
        (&admission_no, &name, &class_section, roll_no, &guardian_name, &now, &now),
    )
    .map_err(|e| HandlerErr::write_failed("db_insert_failed", "students", e))?;

    tracing::info!(admission_no = %admission_no, class_section = %class_section, "student enrolled");
    Ok(json!({ "admissionNo": admission_no }))
}

fn students_update(conn: &Connection, params: &Value) -> Result<Value, HandlerErr> {
    let admission_no = get_required_str(params, "admissionNo")?;
    let (patch_value, patch) = match params.get("patch") {
        Some(v @ Value::Object(m)) => (v, m),
        _ => return Err(HandlerErr::bad_params("patch must be an object")),
    };
    let Some(mut student) = load_student(conn, &admission_no)? else {
        return Err(HandlerErr::not_found("student not found"));
    };

    for key in patch.keys() {
        if !matches!(
            key.as_str(),
            "name" | "classSection" | "rollNo" | "guardianName" | "active"
        ) {
            return Err(HandlerErr::bad_params(format!("unknown student field: {}", key)));
        }
    }
    if patch.contains_key("name") {
        student.name = get_required_str(patch_value, "name")?;
    }
    if patch.contains_key("classSection") {
        student.class_section = get_required_str(patch_value, "classSection")?;
    }
    if let Some(roll_no) = parse_roll_no(patch.get("rollNo"))? {
        student.roll_no = roll_no;
    }
    patch_nullable_str(patch, "guardianName", &mut student.guardian_name)?;
    if let Some(active) = get_optional_bool(patch_value, "active")? {
        student.active = active;
    }

    student.updated_at = db::now_timestamp();
    conn.execute(
        "UPDATE students
         SET name = ?, class_section = ?, roll_no = ?, guardian_name = ?, active = ?, updated_at = ?
         WHERE admission_no = ?",
        (
            &student.name,
            &student.class_section,
            student.roll_no,
            &student.guardian_name,
            student.active as i64,
            &student.updated_at,
            &student.admission_no,
        ),
    )
    .map_err(|e| HandlerErr::write_failed("db_update_failed", "students", e))?;

    Ok(json!({ "student": student.to_json() }))
}

// Attendance records are permanent, so students are only ever deactivated.
fn students_delete(conn: &Connection, params: &Value) -> Result<Value, HandlerErr> {
    let admission_no = get_required_str(params, "admissionNo")?;
    let changed = conn
        .execute(
            "UPDATE students SET active = 0, updated_at = ? WHERE admission_no = ?",
            (db::now_timestamp(), &admission_no),
        )
        .map_err(|e| HandlerErr::write_failed("db_update_failed", "students", e))?;
    if changed == 0 {
        return Err(HandlerErr::not_found("student not found"));
    }
    tracing::info!(admission_no = %admission_no, "student deactivated");
    Ok(json!({ "ok": true, "deactivated": true }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    let f: fn(&Connection, &Value) -> Result<Value, HandlerErr> = match req.method.as_str() {
        "students.list" => students_list,
        "students.create" => students_create,
        "students.update" => students_update,
        "students.delete" => students_delete,
        _ => return None,
    };
    Some(with_conn(state, req, |conn| f(conn, &req.params)))
}
