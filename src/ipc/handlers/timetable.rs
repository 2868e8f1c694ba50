use crate::ipc::helpers::{
    get_optional_str, get_required_i64, get_required_str, teacher_exists, with_conn, HandlerErr,
};
use crate::ipc::types::{AppState, Request};
use rusqlite::{Connection, OptionalExtension};
use serde_json::{json, Value};

pub const MAX_WEEKDAY: i64 = 7;
pub const MAX_PERIOD: i64 = 12;

fn get_slot_key(params: &Value) -> Result<(String, i64, i64), HandlerErr> {
    let class_section = get_required_str(params, "classSection")?;
    let weekday = get_required_i64(params, "weekday")?;
    let period = get_required_i64(params, "period")?;
    if !(1..=MAX_WEEKDAY).contains(&weekday) {
        return Err(HandlerErr::bad_params(format!(
            "weekday must be between 1 and {}",
            MAX_WEEKDAY
        )));
    }
    if !(1..=MAX_PERIOD).contains(&period) {
        return Err(HandlerErr::bad_params(format!(
            "period must be between 1 and {}",
            MAX_PERIOD
        )));
    }
    Ok((class_section, weekday, period))
}

fn timetable_get(conn: &Connection, params: &Value) -> Result<Value, HandlerErr> {
    let class_section = get_optional_str(params, "classSection");
    let teacher_id = get_optional_str(params, "teacherId");
    if class_section.is_some() == teacher_id.is_some() {
        return Err(HandlerErr::bad_params(
            "exactly one of classSection or teacherId is required",
        ));
    }

    let mut stmt = conn
        .prepare(
            "SELECT s.class_section, s.weekday, s.period, s.subject, s.teacher_id, t.name
             FROM timetable_slots s
             LEFT JOIN teachers t ON t.id = s.teacher_id
             WHERE (?1 IS NULL OR s.class_section = ?1)
               AND (?2 IS NULL OR s.teacher_id = ?2)
             ORDER BY s.weekday, s.period, s.class_section",
        )
        .map_err(HandlerErr::query_failed)?;
    let slots = stmt
        .query_map((&class_section, &teacher_id), |r| {
            Ok(json!({
                "classSection": r.get::<_, String>(0)?,
                "weekday": r.get::<_, i64>(1)?,
                "period": r.get::<_, i64>(2)?,
                "subject": r.get::<_, String>(3)?,
                "teacherId": r.get::<_, Option<String>>(4)?,
                "teacherName": r.get::<_, Option<String>>(5)?
            }))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(HandlerErr::query_failed)?;
    Ok(json!({ "slots": slots }))
}

fn timetable_set_slot(conn: &Connection, params: &Value) -> Result<Value, HandlerErr> {
    let (class_section, weekday, period) = get_slot_key(params)?;
    let subject = get_required_str(params, "subject")?;
    let teacher_id = get_optional_str(params, "teacherId");

    if let Some(teacher_id) = teacher_id.as_deref() {
        if !teacher_exists(conn, teacher_id)? {
            return Err(HandlerErr::not_found("teacher not found"));
        }
        let clash: Option<String> = conn
            .query_row(
                "SELECT class_section FROM timetable_slots
                 WHERE teacher_id = ? AND weekday = ? AND period = ? AND class_section <> ?",
                (teacher_id, weekday, period, &class_section),
                |r| r.get(0),
            )
            .optional()
            .map_err(HandlerErr::query_failed)?;
        if let Some(other) = clash {
            return Err(HandlerErr::conflict("teacher already teaches in this period")
                .with_details(json!({
                    "classSection": other,
                    "weekday": weekday,
                    "period": period
                })));
        }
    }

    conn.execute(
        "INSERT INTO timetable_slots(class_section, weekday, period, subject, teacher_id)
         VALUES(?, ?, ?, ?, ?)
         ON CONFLICT(class_section, weekday, period) DO UPDATE SET
           subject = excluded.subject,
           teacher_id = excluded.teacher_id",
        (&class_section, weekday, period, &subject, &teacher_id),
    )
    .map_err(|e| HandlerErr::write_failed("db_insert_failed", "timetable_slots", e))?;
    Ok(json!({ "ok": true }))
}

fn timetable_clear_slot(conn: &Connection, params: &Value) -> Result<Value, HandlerErr> {
    let (class_section, weekday, period) = get_slot_key(params)?;
    let deleted = conn
        .execute(
            "DELETE FROM timetable_slots WHERE class_section = ? AND weekday = ? AND period = ?",
            (&class_section, weekday, period),
        )
        .map_err(|e| HandlerErr::write_failed("db_delete_failed", "timetable_slots", e))?;
    Ok(json!({ "ok": true, "cleared": deleted > 0 }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    let f: fn(&Connection, &Value) -> Result<Value, HandlerErr> = match req.method.as_str() {
        "timetable.get" => timetable_get,
        "timetable.setSlot" => timetable_set_slot,
        "timetable.clearSlot" => timetable_clear_slot,
        _ => return None,
    };
    Some(with_conn(state, req, |conn| f(conn, &req.params)))
}
