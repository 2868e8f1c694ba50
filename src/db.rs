use chrono::{SecondsFormat, Utc};
use rusqlite::{Connection, OptionalExtension};
use std::path::Path;

pub const DB_FILE_NAME: &str = "school.sqlite3";

pub fn open_db(workspace: &Path) -> anyhow::Result<Connection> {
    std::fs::create_dir_all(workspace)?;
    let db_path = workspace.join(DB_FILE_NAME);
    let conn = Connection::open(db_path)?;
    conn.execute("PRAGMA foreign_keys = ON", [])?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS settings(
            key TEXT PRIMARY KEY,
            value_json TEXT NOT NULL
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS teachers(
            id TEXT PRIMARY KEY,
            employee_no TEXT NOT NULL UNIQUE,
            name TEXT NOT NULL,
            email TEXT,
            subject TEXT,
            class_section TEXT,
            active INTEGER NOT NULL DEFAULT 1,
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_teachers_class_section ON teachers(class_section)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS students(
            admission_no TEXT PRIMARY KEY,
            name TEXT NOT NULL,
            class_section TEXT NOT NULL,
            roll_no INTEGER,
            guardian_name TEXT,
            active INTEGER NOT NULL DEFAULT 1,
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_students_class_section ON students(class_section)",
        [],
    )?;
    if !table_has_column(&conn, "students", "guardian_name")? {
        conn.execute("ALTER TABLE students ADD COLUMN guardian_name TEXT", [])?;
    }

    conn.execute(
        "CREATE TABLE IF NOT EXISTS attendance_records(
            admission_no TEXT NOT NULL,
            date TEXT NOT NULL,
            class_section TEXT NOT NULL,
            status TEXT NOT NULL,
            marked_by TEXT NOT NULL,
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL,
            PRIMARY KEY(admission_no, date),
            FOREIGN KEY(admission_no) REFERENCES students(admission_no)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_attendance_records_section_date
         ON attendance_records(class_section, date)",
        [],
    )?;
    ensure_attendance_records_updated_at(&conn)?;
    conn.execute(
        "CREATE TABLE IF NOT EXISTS attendance_edits(
            id TEXT PRIMARY KEY,
            admission_no TEXT NOT NULL,
            date TEXT NOT NULL,
            old_status TEXT NOT NULL,
            new_status TEXT NOT NULL,
            reason TEXT NOT NULL,
            edited_by TEXT NOT NULL,
            edited_at TEXT NOT NULL,
            FOREIGN KEY(admission_no, date) REFERENCES attendance_records(admission_no, date)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_attendance_edits_student ON attendance_edits(admission_no, date)",
        [],
    )?;
    conn.execute(
        "CREATE TABLE IF NOT EXISTS teacher_attendance(
            teacher_id TEXT NOT NULL,
            date TEXT NOT NULL,
            status TEXT NOT NULL,
            created_at TEXT NOT NULL,
            PRIMARY KEY(teacher_id, date),
            FOREIGN KEY(teacher_id) REFERENCES teachers(id)
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS backlog_windows(
            id TEXT PRIMARY KEY,
            scope_kind TEXT NOT NULL,
            scope_id TEXT NOT NULL,
            start_date TEXT NOT NULL,
            end_date TEXT NOT NULL,
            opened_by TEXT NOT NULL,
            status TEXT NOT NULL,
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_backlog_windows_scope ON backlog_windows(scope_kind, scope_id)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS homework(
            id TEXT PRIMARY KEY,
            class_section TEXT NOT NULL,
            subject TEXT NOT NULL,
            title TEXT NOT NULL,
            description TEXT,
            due_date TEXT NOT NULL,
            assigned_by TEXT NOT NULL,
            created_at TEXT NOT NULL
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_homework_section_due ON homework(class_section, due_date)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS announcements(
            id TEXT PRIMARY KEY,
            title TEXT NOT NULL,
            body TEXT NOT NULL,
            audience TEXT NOT NULL,
            class_section TEXT,
            posted_by TEXT NOT NULL,
            created_at TEXT NOT NULL
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS leave_requests(
            id TEXT PRIMARY KEY,
            requester_role TEXT NOT NULL,
            requester_id TEXT NOT NULL,
            start_date TEXT NOT NULL,
            end_date TEXT NOT NULL,
            reason TEXT NOT NULL,
            status TEXT NOT NULL,
            decided_by TEXT,
            decision_note TEXT,
            created_at TEXT NOT NULL,
            decided_at TEXT
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_leave_requests_requester
         ON leave_requests(requester_role, requester_id)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS timetable_slots(
            class_section TEXT NOT NULL,
            weekday INTEGER NOT NULL,
            period INTEGER NOT NULL,
            subject TEXT NOT NULL,
            teacher_id TEXT,
            PRIMARY KEY(class_section, weekday, period),
            FOREIGN KEY(teacher_id) REFERENCES teachers(id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_timetable_slots_teacher ON timetable_slots(teacher_id)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS exams(
            id TEXT PRIMARY KEY,
            name TEXT NOT NULL,
            class_section TEXT NOT NULL,
            term TEXT,
            created_at TEXT NOT NULL
        )",
        [],
    )?;
    conn.execute(
        "CREATE TABLE IF NOT EXISTS marking_schemes(
            class_section TEXT NOT NULL,
            subject TEXT NOT NULL,
            components_json TEXT NOT NULL,
            updated_at TEXT NOT NULL,
            PRIMARY KEY(class_section, subject)
        )",
        [],
    )?;
    conn.execute(
        "CREATE TABLE IF NOT EXISTS result_entries(
            exam_id TEXT NOT NULL,
            subject TEXT NOT NULL,
            admission_no TEXT NOT NULL,
            component_id TEXT NOT NULL,
            obtained REAL,
            absent INTEGER NOT NULL DEFAULT 0,
            entered_by TEXT NOT NULL,
            updated_at TEXT NOT NULL,
            PRIMARY KEY(exam_id, subject, admission_no, component_id),
            FOREIGN KEY(exam_id) REFERENCES exams(id),
            FOREIGN KEY(admission_no) REFERENCES students(admission_no)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_result_entries_student ON result_entries(admission_no)",
        [],
    )?;

    Ok(conn)
}

// Early workspaces stored attendance without an update stamp.
fn ensure_attendance_records_updated_at(conn: &Connection) -> anyhow::Result<()> {
    if table_has_column(conn, "attendance_records", "updated_at")? {
        return Ok(());
    }
    conn.execute("ALTER TABLE attendance_records ADD COLUMN updated_at TEXT", [])?;
    conn.execute(
        "UPDATE attendance_records SET updated_at = created_at WHERE updated_at IS NULL",
        [],
    )?;
    Ok(())
}

fn table_has_column(conn: &Connection, table: &str, column: &str) -> anyhow::Result<bool> {
    let sql = format!("PRAGMA table_info({})", table);
    let mut stmt = conn.prepare(&sql)?;
    let mut rows = stmt.query([])?;
    while let Some(row) = rows.next()? {
        let name: String = row.get(1)?;
        if name == column {
            return Ok(true);
        }
    }
    Ok(false)
}

pub fn now_timestamp() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true)
}

pub fn settings_get_json(conn: &Connection, key: &str) -> anyhow::Result<Option<serde_json::Value>> {
    let raw: Option<String> = conn
        .query_row(
            "SELECT value_json FROM settings WHERE key = ?",
            [key],
            |r| r.get(0),
        )
        .optional()?;
    match raw {
        Some(text) => Ok(Some(serde_json::from_str(&text)?)),
        None => Ok(None),
    }
}

pub fn settings_set_json(
    conn: &Connection,
    key: &str,
    value: &serde_json::Value,
) -> anyhow::Result<()> {
    let text = serde_json::to_string(value)?;
    conn.execute(
        "INSERT INTO settings(key, value_json) VALUES(?, ?)
         ON CONFLICT(key) DO UPDATE SET value_json = excluded.value_json",
        (key, &text),
    )?;
    Ok(())
}
