mod test_support;

use serde_json::{json, Value};
use test_support::spawn_sidecar;

fn titles(list: &Value) -> Vec<String> {
    list["announcements"]
        .as_array()
        .expect("announcements")
        .iter()
        .filter_map(|a| a["title"].as_str().map(str::to_string))
        .collect()
}

#[test]
fn announcements_are_filtered_by_audience() {
    let mut sidecar = spawn_sidecar();
    sidecar.open_workspace("schoold-announcements");

    for (title, audience, section) in [
        ("Holiday", "all", None),
        ("Staff meeting", "teachers", None),
        ("Sports day", "students", None),
        ("7A trip", "class", Some("7A")),
        ("7B trip", "class", Some("7B")),
    ] {
        sidecar.request_ok(
            "announcements.create",
            json!({
                "title": title,
                "body": "details",
                "audience": audience,
                "classSection": section,
                "postedBy": "admin"
            }),
        );
    }
    sidecar.request_err(
        "announcements.create",
        json!({ "title": "x", "body": "y", "audience": "class", "postedBy": "admin" }),
        "bad_params",
    );
    sidecar.request_err(
        "announcements.create",
        json!({ "title": "x", "body": "y", "audience": "parents", "postedBy": "admin" }),
        "bad_params",
    );

    let everything = sidecar.request_ok("announcements.list", json!({}));
    assert_eq!(titles(&everything).len(), 5);

    let mut teacher = titles(&sidecar.request_ok("announcements.list", json!({ "role": "teacher" })));
    teacher.sort();
    assert_eq!(teacher, vec!["Holiday", "Staff meeting"]);

    let mut student = titles(&sidecar.request_ok(
        "announcements.list",
        json!({ "role": "student", "classSection": "7A" }),
    ));
    student.sort();
    assert_eq!(student, vec!["7A trip", "Holiday", "Sports day"]);

    let id = everything["announcements"][0]["id"].as_str().expect("id").to_string();
    sidecar.request_ok("announcements.delete", json!({ "announcementId": id }));
    sidecar.request_err("announcements.delete", json!({ "announcementId": id }), "not_found");
}

#[test]
fn leave_requests_are_decided_once() {
    let mut sidecar = spawn_sidecar();
    sidecar.open_workspace("schoold-leave");
    sidecar.add_student("A-1", "Asha Rao", "7A", 1);
    let meera = sidecar.add_teacher("E-100", "Meera Iyer");

    sidecar.request_err(
        "leave.create",
        json!({ "requesterRole": "student", "requesterId": "Z-9", "startDate": "2024-06-20", "endDate": "2024-06-21", "reason": "fever" }),
        "not_found",
    );
    sidecar.request_err(
        "leave.create",
        json!({ "requesterRole": "student", "requesterId": "A-1", "startDate": "2024-06-21", "endDate": "2024-06-20", "reason": "fever" }),
        "bad_params",
    );

    let created = sidecar.request_ok(
        "leave.create",
        json!({ "requesterRole": "student", "requesterId": "A-1", "startDate": "2024-06-20", "endDate": "2024-06-21", "reason": "fever" }),
    );
    assert_eq!(created["status"].as_str(), Some("pending"));
    let leave_id = created["leaveId"].as_str().expect("leaveId").to_string();
    sidecar.request_ok(
        "leave.create",
        json!({ "requesterRole": "Teacher", "requesterId": meera, "startDate": "2024-06-25", "endDate": "2024-06-25", "reason": "conference" }),
    );

    let pending = sidecar.request_ok("leave.list", json!({ "status": "pending" }));
    assert_eq!(pending["requests"].as_array().map(|a| a.len()), Some(2));

    let decided = sidecar.request_ok(
        "leave.decide",
        json!({ "leaveId": leave_id, "decision": "Approved", "decidedBy": "admin", "note": "get well" }),
    );
    assert_eq!(decided["status"].as_str(), Some("approved"));
    sidecar.request_err(
        "leave.decide",
        json!({ "leaveId": leave_id, "decision": "rejected", "decidedBy": "admin" }),
        "conflict",
    );
    sidecar.request_err(
        "leave.decide",
        json!({ "leaveId": leave_id, "decision": "maybe", "decidedBy": "admin" }),
        "bad_params",
    );

    let mine = sidecar.request_ok(
        "leave.list",
        json!({ "requesterRole": "student", "requesterId": "A-1" }),
    );
    let mine = mine["requests"].as_array().expect("requests");
    assert_eq!(mine.len(), 1);
    assert_eq!(mine[0]["decisionNote"].as_str(), Some("get well"));
    assert_eq!(mine[0]["decidedBy"].as_str(), Some("admin"));
}

#[test]
fn homework_lists_by_due_date() {
    let mut sidecar = spawn_sidecar();
    sidecar.open_workspace("schoold-homework");

    for (subject, title, due) in [
        ("Maths", "Fractions", "2024-06-20"),
        ("English", "Essay", "2024-06-14"),
        ("Maths", "Decimals", "2024-06-10"),
    ] {
        sidecar.request_ok(
            "homework.create",
            json!({ "classSection": "7A", "subject": subject, "title": title, "dueDate": due, "assignedBy": "t-1" }),
        );
    }
    sidecar.request_err(
        "homework.create",
        json!({ "classSection": "7A", "subject": "Maths", "title": "Bad", "dueDate": "20/06/2024", "assignedBy": "t-1" }),
        "bad_params",
    );

    let all = sidecar.request_ok("homework.list", json!({ "classSection": "7A" }));
    let order: Vec<&str> = all["homework"]
        .as_array()
        .expect("homework")
        .iter()
        .filter_map(|h| h["title"].as_str())
        .collect();
    assert_eq!(order, vec!["Decimals", "Essay", "Fractions"]);

    let upcoming_maths = sidecar.request_ok(
        "homework.list",
        json!({ "classSection": "7A", "subject": "Maths", "dueFrom": "2024-06-12" }),
    );
    let items = upcoming_maths["homework"].as_array().expect("homework");
    assert_eq!(items.len(), 1);
    assert_eq!(items[0]["title"].as_str(), Some("Fractions"));

    let id = items[0]["id"].as_str().expect("id").to_string();
    sidecar.request_ok("homework.delete", json!({ "homeworkId": id }));
    sidecar.request_err("homework.delete", json!({ "homeworkId": id }), "not_found");
}
