use crate::ipc::handlers::setup::{load_section, SetupSection};
use crate::ipc::handlers::students::load_student;
use crate::ipc::handlers::teachers::load_teacher;
use crate::ipc::helpers::{get_optional_str, get_required_str, with_conn, HandlerErr};
use crate::ipc::types::{AppState, Request};
use rusqlite::{Connection, OptionalExtension};
use serde_json::{json, Value};

fn teacher_profile(conn: &Connection, teacher_id: &str) -> Result<Value, HandlerErr> {
    let Some(teacher) = load_teacher(conn, teacher_id)? else {
        return Err(HandlerErr::not_found("teacher not found"));
    };
    let mut stmt = conn
        .prepare(
            "SELECT DISTINCT class_section FROM timetable_slots
             WHERE teacher_id = ?
             ORDER BY class_section",
        )
        .map_err(HandlerErr::query_failed)?;
    let sections = stmt
        .query_map([teacher_id], |r| r.get::<_, String>(0))
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(HandlerErr::query_failed)?;
    let weekly_periods: i64 = conn
        .query_row(
            "SELECT COUNT(*) FROM timetable_slots WHERE teacher_id = ?",
            [teacher_id],
            |r| r.get(0),
        )
        .map_err(HandlerErr::query_failed)?;

    Ok(json!({
        "role": "teacher",
        "teacher": teacher.to_json(),
        "classTeacherOf": teacher.class_section,
        "sectionsTaught": sections,
        "weeklyPeriods": weekly_periods
    }))
}

fn student_profile(conn: &Connection, admission_no: &str) -> Result<Value, HandlerErr> {
    let Some(student) = load_student(conn, admission_no)? else {
        return Err(HandlerErr::not_found("student not found"));
    };
    let class_teacher: Option<(String, String)> = conn
        .query_row(
            "SELECT id, name FROM teachers
             WHERE class_section = ? AND active = 1
             ORDER BY name
             LIMIT 1",
            [&student.class_section],
            |r| Ok((r.get(0)?, r.get(1)?)),
        )
        .optional()
        .map_err(HandlerErr::query_failed)?;

    Ok(json!({
        "role": "student",
        "student": student.to_json(),
        "classTeacher": class_teacher.map(|(id, name)| json!({ "id": id, "name": name }))
    }))
}

fn profile_get(conn: &Connection, params: &Value) -> Result<Value, HandlerErr> {
    let role = get_required_str(params, "role")?;
    match role.as_str() {
        "admin" => {
            let school = load_section(conn, SetupSection::School)
                .map_err(|e| HandlerErr::new("db_query_failed", e.to_string()))?;
            Ok(json!({
                "role": "admin",
                "id": get_optional_str(params, "id"),
                "school": school
            }))
        }
        "teacher" => teacher_profile(conn, &get_required_str(params, "id")?),
        "student" => student_profile(conn, &get_required_str(params, "id")?),
        _ => Err(HandlerErr::bad_params("role must be admin, teacher or student")),
    }
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "profile.get" => Some(with_conn(state, req, |conn| profile_get(conn, &req.params))),
        _ => None,
    }
}
