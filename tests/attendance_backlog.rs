mod test_support;

use serde_json::json;
use test_support::{spawn_sidecar, Sidecar, TODAY};

fn seeded() -> Sidecar {
    let mut sidecar = spawn_sidecar();
    sidecar.open_workspace("schoold-attendance");
    sidecar.add_student("A-1", "Asha Rao", "7A", 1);
    sidecar.add_student("A-2", "Imran Rahman", "7A", 2);
    sidecar.add_student("B-1", "Kiran Das", "7B", 1);
    sidecar
}

#[test]
fn eligibility_follows_date_and_windows() {
    let mut sidecar = seeded();

    let future = sidecar.request_ok(
        "attendance.eligibility",
        json!({ "date": "2024-06-13", "classSection": "7A" }),
    );
    assert_eq!(future["allowed"].as_bool(), Some(false));
    assert_eq!(future["reason"].as_str(), Some("future date"));
    assert_eq!(future["isFuture"].as_bool(), Some(true));

    let today = sidecar.request_ok(
        "attendance.eligibility",
        json!({ "date": TODAY, "classSection": "7A" }),
    );
    assert_eq!(today["allowed"].as_bool(), Some(true));
    assert_eq!(today["reason"].as_str(), Some("today's attendance"));

    let past = sidecar.request_ok(
        "attendance.eligibility",
        json!({ "date": "2024-06-10", "classSection": "7A" }),
    );
    assert_eq!(past["allowed"].as_bool(), Some(false));
    assert_eq!(past["reason"].as_str(), Some("window closed, backlog required"));
    assert_eq!(past["isPast"].as_bool(), Some(true));

    // An explicit `today` overrides the service clock.
    let shifted = sidecar.request_ok(
        "attendance.eligibility",
        json!({ "date": "2024-06-10", "classSection": "7A", "today": "2024-06-10" }),
    );
    assert_eq!(shifted["allowed"].as_bool(), Some(true));

    sidecar.request_err(
        "attendance.eligibility",
        json!({ "date": TODAY }),
        "bad_params",
    );
}

#[test]
fn mark_creates_only_new_records_for_enrolled_students() {
    let mut sidecar = seeded();

    let first = sidecar.request_ok(
        "attendance.mark",
        json!({
            "classSection": "7A",
            "date": TODAY,
            "markedBy": "t-1",
            "records": [
                { "admissionNo": "A-1", "status": "present" },
                { "admissionNo": "A-2", "status": "absent" },
                { "admissionNo": "B-1", "status": "present" }
            ]
        }),
    );
    assert_eq!(first["inserted"].as_u64(), Some(2));
    assert_eq!(first["unknownStudents"], json!(["B-1"]));

    let second = sidecar.request_ok(
        "attendance.mark",
        json!({
            "classSection": "7A",
            "date": TODAY,
            "markedBy": "t-1",
            "records": [{ "admissionNo": "A-1", "status": "late" }]
        }),
    );
    assert_eq!(second["inserted"].as_u64(), Some(0));
    assert_eq!(second["alreadyMarked"], json!(["A-1"]));

    let sheet = sidecar.request_ok(
        "attendance.get",
        json!({ "classSection": "7A", "date": TODAY }),
    );
    let students = sheet["students"].as_array().expect("students");
    assert_eq!(students.len(), 2);
    assert_eq!(students[0]["status"].as_str(), Some("present"));
    assert_eq!(students[1]["status"].as_str(), Some("absent"));
    assert_eq!(sheet["unmarked"].as_u64(), Some(0));

    sidecar.request_err(
        "attendance.mark",
        json!({
            "classSection": "7A",
            "date": TODAY,
            "markedBy": "t-1",
            "records": [{ "admissionNo": "A-1", "status": "sick" }]
        }),
        "bad_params",
    );
}

#[test]
fn past_dates_need_an_open_backlog_window() {
    let mut sidecar = seeded();
    let past_mark = json!({
        "classSection": "7A",
        "date": "2024-06-10",
        "markedBy": "t-1",
        "records": [{ "admissionNo": "A-1", "status": "present" }]
    });

    let refused = sidecar.request_err("attendance.mark", past_mark.clone(), "not_allowed");
    assert_eq!(
        refused["details"]["eligibility"]["reason"].as_str(),
        Some("window closed, backlog required")
    );

    sidecar.request_err(
        "backlog.open",
        json!({
            "scope": "class",
            "scopeId": "7A",
            "startDate": "2024-06-11",
            "endDate": "2024-06-10",
            "openedBy": "admin"
        }),
        "bad_params",
    );
    let opened = sidecar.request_ok(
        "backlog.open",
        json!({
            "scope": "class",
            "scopeId": "7A",
            "startDate": "2024-06-10",
            "endDate": "2024-06-11",
            "openedBy": "admin"
        }),
    );
    let window_id = opened["windowId"].as_str().expect("windowId").to_string();

    let status = sidecar.request_ok(
        "backlog.status",
        json!({ "scope": "class", "scopeId": "7A", "date": "2024-06-11" }),
    );
    assert_eq!(status["open"].as_bool(), Some(true));
    assert_eq!(status["windowId"].as_str(), Some(window_id.as_str()));

    // Windows are scoped to their class.
    let other = sidecar.request_ok(
        "attendance.eligibility",
        json!({ "date": "2024-06-10", "classSection": "7B" }),
    );
    assert_eq!(other["allowed"].as_bool(), Some(false));

    let marked = sidecar.request_ok("attendance.mark", past_mark);
    assert_eq!(marked["inserted"].as_u64(), Some(1));

    sidecar.request_ok(
        "backlog.setStatus",
        json!({ "windowId": window_id, "status": "closed" }),
    );
    sidecar.request_err(
        "attendance.mark",
        json!({
            "classSection": "7A",
            "date": "2024-06-11",
            "markedBy": "t-1",
            "records": [{ "admissionNo": "A-1", "status": "present" }]
        }),
        "not_allowed",
    );

    let listed = sidecar.request_ok("backlog.list", json!({ "scopeId": "7A", "status": "closed" }));
    assert_eq!(listed["windows"].as_array().map(|a| a.len()), Some(1));
    sidecar.request_err(
        "backlog.setStatus",
        json!({ "windowId": "missing", "status": "open" }),
        "not_found",
    );
}

#[test]
fn edits_are_audited_and_summarized() {
    let mut sidecar = seeded();
    sidecar.request_ok(
        "attendance.mark",
        json!({
            "classSection": "7A",
            "date": TODAY,
            "markedBy": "t-1",
            "records": [
                { "admissionNo": "A-1", "status": "absent" },
                { "admissionNo": "A-2", "status": "present" }
            ]
        }),
    );

    sidecar.request_err(
        "attendance.edit",
        json!({ "admissionNo": "A-1", "date": TODAY, "status": "late", "editedBy": "t-1" }),
        "bad_params",
    );
    sidecar.request_err(
        "attendance.edit",
        json!({
            "admissionNo": "A-1",
            "date": "2024-06-11",
            "status": "late",
            "reason": "bus delay",
            "editedBy": "t-1"
        }),
        "not_found",
    );

    let edited = sidecar.request_ok(
        "attendance.edit",
        json!({
            "admissionNo": "A-1",
            "date": TODAY,
            "status": "late",
            "reason": "bus delay",
            "editedBy": "t-1"
        }),
    );
    assert_eq!(edited["changed"].as_bool(), Some(true));
    assert_eq!(edited["previousStatus"].as_str(), Some("absent"));

    let edits = sidecar.request_ok("attendance.edits", json!({ "admissionNo": "A-1" }));
    let edits = edits["edits"].as_array().expect("edits");
    assert_eq!(edits.len(), 1);
    assert_eq!(edits[0]["oldStatus"].as_str(), Some("absent"));
    assert_eq!(edits[0]["newStatus"].as_str(), Some("late"));
    assert_eq!(edits[0]["reason"].as_str(), Some("bus delay"));

    let history = sidecar.request_ok("attendance.history", json!({ "admissionNo": "A-1" }));
    assert_eq!(history["records"].as_array().map(|a| a.len()), Some(1));
    assert_eq!(history["summary"]["late"].as_i64(), Some(1));
    assert_eq!(history["summary"]["percentage"].as_str(), Some("100.00"));

    sidecar.request_ok(
        "setup.update",
        json!({ "section": "attendance", "patch": { "lateCountsAsPresent": false } }),
    );
    let strict = sidecar.request_ok("attendance.history", json!({ "admissionNo": "A-1" }));
    assert_eq!(strict["summary"]["percentage"].as_str(), Some("0.00"));

    sidecar.request_err("attendance.history", json!({ "admissionNo": "Z-9" }), "not_found");
}

#[test]
fn edit_reason_can_be_made_optional() {
    let mut sidecar = seeded();
    sidecar.request_ok(
        "attendance.mark",
        json!({
            "classSection": "7A",
            "date": TODAY,
            "markedBy": "t-1",
            "records": [{ "admissionNo": "A-1", "status": "absent" }]
        }),
    );
    sidecar.request_ok(
        "setup.update",
        json!({ "section": "attendance", "patch": { "requireEditReason": false, "editReasonMaxChars": 5 } }),
    );
    sidecar.request_ok(
        "attendance.edit",
        json!({ "admissionNo": "A-1", "date": TODAY, "status": "present", "editedBy": "t-1" }),
    );
    sidecar.request_err(
        "attendance.edit",
        json!({
            "admissionNo": "A-1",
            "date": TODAY,
            "status": "late",
            "reason": "far too long",
            "editedBy": "t-1"
        }),
        "bad_params",
    );
}
