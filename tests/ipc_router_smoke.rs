mod test_support;

use serde_json::json;
use test_support::{spawn_sidecar, spawn_sidecar_with, temp_dir, TODAY};

#[test]
fn health_reports_pinned_date_without_workspace() {
    let mut sidecar = spawn_sidecar();
    let health = sidecar.request_ok("health", json!({}));
    assert_eq!(health["today"].as_str(), Some(TODAY));
    assert!(health["workspacePath"].is_null());
    assert!(health["version"].as_str().is_some());
}

#[test]
fn workspace_flag_opens_database_at_startup() {
    let workspace = temp_dir("schoold-startup-workspace");
    let ws = workspace.to_string_lossy().to_string();
    let mut sidecar = spawn_sidecar_with(&["--today", TODAY, "--workspace", &ws]);
    let health = sidecar.request_ok("health", json!({}));
    assert_eq!(health["workspacePath"].as_str(), Some(ws.as_str()));
    let students = sidecar.request_ok("students.list", json!({}));
    assert_eq!(students["students"].as_array().map(|a| a.len()), Some(0));
}

#[test]
fn malformed_and_unknown_requests_get_error_envelopes() {
    let mut sidecar = spawn_sidecar();

    let bad = sidecar.send_raw("{not json");
    assert_eq!(bad["ok"].as_bool(), Some(false));
    assert_eq!(bad["error"]["code"].as_str(), Some("bad_json"));

    sidecar.request_err("nope.method", json!({}), "not_implemented");
    sidecar.request_err("students.list", json!({}), "no_workspace");
    sidecar.request_err("workspace.select", json!({}), "bad_params");
}

#[test]
fn router_dispatch_smoke_covers_handler_families() {
    let mut sidecar = spawn_sidecar();
    let workspace = sidecar.open_workspace("schoold-router-smoke");

    let methods = [
        ("setup.get", json!({})),
        ("teachers.list", json!({})),
        ("students.list", json!({})),
        ("classes.list", json!({})),
        ("profile.get", json!({ "role": "admin" })),
        ("attendance.eligibility", json!({ "date": TODAY, "classSection": "7A" })),
        ("attendance.get", json!({ "classSection": "7A", "date": TODAY })),
        ("backlog.list", json!({})),
        ("homework.list", json!({ "classSection": "7A" })),
        ("announcements.list", json!({})),
        ("leave.list", json!({})),
        ("timetable.get", json!({ "classSection": "7A" })),
        ("exams.list", json!({})),
        ("scheme.get", json!({ "classSection": "7A", "subject": "Maths" })),
        (
            "backup.exportWorkspaceBundle",
            json!({ "outPath": workspace.join("smoke.zip").to_string_lossy() }),
        ),
    ];
    for (method, params) in methods {
        sidecar.request_ok(method, params);
    }
}
