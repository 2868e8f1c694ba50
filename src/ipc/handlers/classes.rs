use crate::ipc::helpers::{with_conn, HandlerErr};
use crate::ipc::types::{AppState, Request};
use rusqlite::Connection;
use serde_json::{json, Value};
use std::collections::BTreeMap;

#[derive(Default)]
struct SectionInfo {
    student_count: i64,
    class_teacher: Option<(String, String)>,
    timetable_slots: i64,
}

// Sections are not a table of their own: anything that names one
// (enrolment, class-teacher assignment, timetable) makes it visible here.
fn classes_list(conn: &Connection) -> Result<Value, HandlerErr> {
    let mut sections: BTreeMap<String, SectionInfo> = BTreeMap::new();

    let mut stmt = conn
        .prepare(
            "SELECT class_section, SUM(active) FROM students GROUP BY class_section",
        )
        .map_err(HandlerErr::query_failed)?;
    let counts = stmt
        .query_map([], |r| Ok((r.get::<_, String>(0)?, r.get::<_, i64>(1)?)))
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(HandlerErr::query_failed)?;
    for (section, count) in counts {
        sections.entry(section).or_default().student_count = count;
    }

    let mut stmt = conn
        .prepare(
            "SELECT class_section, id, name FROM teachers
             WHERE class_section IS NOT NULL AND active = 1
             ORDER BY name",
        )
        .map_err(HandlerErr::query_failed)?;
    let class_teachers = stmt
        .query_map([], |r| {
            Ok((
                r.get::<_, String>(0)?,
                r.get::<_, String>(1)?,
                r.get::<_, String>(2)?,
            ))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(HandlerErr::query_failed)?;
    for (section, id, name) in class_teachers {
        let info = sections.entry(section).or_default();
        if info.class_teacher.is_none() {
            info.class_teacher = Some((id, name));
        }
    }

    let mut stmt = conn
        .prepare("SELECT class_section, COUNT(*) FROM timetable_slots GROUP BY class_section")
        .map_err(HandlerErr::query_failed)?;
    let slots = stmt
        .query_map([], |r| Ok((r.get::<_, String>(0)?, r.get::<_, i64>(1)?)))
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(HandlerErr::query_failed)?;
    for (section, count) in slots {
        sections.entry(section).or_default().timetable_slots = count;
    }

    let classes: Vec<Value> = sections
        .into_iter()
        .map(|(section, info)| {
            json!({
                "classSection": section,
                "studentCount": info.student_count,
                "classTeacher": info.class_teacher.map(|(id, name)| json!({ "id": id, "name": name })),
                "timetableSlots": info.timetable_slots
            })
        })
        .collect();
    Ok(json!({ "classes": classes }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "classes.list" => Some(with_conn(state, req, classes_list)),
        _ => None,
    }
}
