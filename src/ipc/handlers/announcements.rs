use crate::db;
use crate::ipc::helpers::{
    check_max_chars, get_optional_str, get_required_str, with_conn, HandlerErr,
};
use crate::ipc::types::{AppState, Request};
use rusqlite::Connection;
use serde_json::{json, Value};
use uuid::Uuid;

const TITLE_MAX_CHARS: usize = 200;
const BODY_MAX_CHARS: usize = 8000;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Audience {
    All,
    Teachers,
    Students,
    Class,
}

impl Audience {
    fn parse(s: &str) -> Option<Self> {
        match s {
            "all" => Some(Self::All),
            "teachers" => Some(Self::Teachers),
            "students" => Some(Self::Students),
            "class" => Some(Self::Class),
            _ => None,
        }
    }

    fn as_str(self) -> &'static str {
        match self {
            Self::All => "all",
            Self::Teachers => "teachers",
            Self::Students => "students",
            Self::Class => "class",
        }
    }
}

fn announcements_create(conn: &Connection, params: &Value) -> Result<Value, HandlerErr> {
    let title = get_required_str(params, "title")?;
    let body = get_required_str(params, "body")?;
    let posted_by = get_required_str(params, "postedBy")?;
    let audience_raw = get_required_str(params, "audience")?;
    let Some(audience) = Audience::parse(&audience_raw) else {
        return Err(HandlerErr::bad_params(
            "audience must be all, teachers, students or class",
        ));
    };
    let class_section = match audience {
        Audience::Class => Some(get_required_str(params, "classSection")?),
        _ => None,
    };
    check_max_chars(&title, "title", TITLE_MAX_CHARS)?;
    check_max_chars(&body, "body", BODY_MAX_CHARS)?;

    let id = Uuid::new_v4().to_string();
    conn.execute(
        "INSERT INTO announcements(id, title, body, audience, class_section, posted_by, created_at)
         VALUES(?, ?, ?, ?, ?, ?, ?)",
        (
            &id,
            &title,
            &body,
            audience.as_str(),
            &class_section,
            &posted_by,
            db::now_timestamp(),
        ),
    )
    .map_err(|e| HandlerErr::write_failed("db_insert_failed", "announcements", e))?;

    tracing::info!(announcement_id = %id, audience = audience.as_str(), "announcement posted");
    Ok(json!({ "announcementId": id }))
}

fn announcements_list(conn: &Connection, params: &Value) -> Result<Value, HandlerErr> {
    let role = get_optional_str(params, "role");
    let class_section = get_optional_str(params, "classSection");

    // Audiences visible to the caller; None means unrestricted.
    let visible: Option<&[&str]> = match role.as_deref() {
        None | Some("admin") => None,
        Some("teacher") => Some(&["all", "teachers"][..]),
        Some("student") => Some(&["all", "students", "class"][..]),
        Some(_) => return Err(HandlerErr::bad_params("role must be admin, teacher or student")),
    };

    let mut stmt = conn
        .prepare(
            "SELECT id, title, body, audience, class_section, posted_by, created_at
             FROM announcements
             ORDER BY created_at DESC, rowid DESC",
        )
        .map_err(HandlerErr::query_failed)?;
    let rows = stmt
        .query_map([], |r| {
            Ok((
                r.get::<_, String>(0)?,
                r.get::<_, String>(1)?,
                r.get::<_, String>(2)?,
                r.get::<_, String>(3)?,
                r.get::<_, Option<String>>(4)?,
                r.get::<_, String>(5)?,
                r.get::<_, String>(6)?,
            ))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(HandlerErr::query_failed)?;

    let announcements: Vec<Value> = rows
        .into_iter()
        .filter(|(_, _, _, audience, section, _, _)| {
            let Some(allowed) = visible else {
                return match (&class_section, audience.as_str()) {
                    (Some(want), "class") => section.as_deref() == Some(want.as_str()),
                    _ => true,
                };
            };
            if !allowed.contains(&audience.as_str()) {
                return false;
            }
            audience != "class" || (class_section.is_some() && *section == class_section)
        })
        .map(|(id, title, body, audience, section, posted_by, created_at)| {
            json!({
                "id": id,
                "title": title,
                "body": body,
                "audience": audience,
                "classSection": section,
                "postedBy": posted_by,
                "createdAt": created_at
            })
        })
        .collect();
    Ok(json!({ "announcements": announcements }))
}

fn announcements_delete(conn: &Connection, params: &Value) -> Result<Value, HandlerErr> {
    let announcement_id = get_required_str(params, "announcementId")?;
    let deleted = conn
        .execute("DELETE FROM announcements WHERE id = ?", [&announcement_id])
        .map_err(|e| HandlerErr::write_failed("db_delete_failed", "announcements", e))?;
    if deleted == 0 {
        return Err(HandlerErr::not_found("announcement not found"));
    }
    Ok(json!({ "ok": true }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    let f: fn(&Connection, &Value) -> Result<Value, HandlerErr> = match req.method.as_str() {
        "announcements.create" => announcements_create,
        "announcements.list" => announcements_list,
        "announcements.delete" => announcements_delete,
        _ => return None,
    };
    Some(with_conn(state, req, |conn| f(conn, &req.params)))
}
