mod test_support;

use serde_json::json;
use test_support::{spawn_sidecar, temp_dir, Sidecar};

fn seeded() -> (Sidecar, String) {
    let mut sidecar = spawn_sidecar();
    sidecar.open_workspace("schoold-marks-csv");
    sidecar.add_student("A-1", "Asha Rao", "7A", 1);
    sidecar.add_student("A-2", "Rahman, Imran", "7A", 2);
    let exam = sidecar.request_ok("exams.create", json!({ "name": "Unit 1", "classSection": "7A" }));
    let exam_id = exam["examId"].as_str().expect("examId").to_string();
    (sidecar, exam_id)
}

#[test]
fn template_export_and_reimport_yields_zero_marks() {
    let (mut sidecar, exam_id) = seeded();
    let out = temp_dir("schoold-csv-out").join("template.csv");

    let exported = sidecar.request_ok(
        "results.exportTemplate",
        json!({ "examId": exam_id, "subject": "Maths", "outPath": out.to_string_lossy() }),
    );
    let csv = exported["csv"].as_str().expect("csv").to_string();
    let lines: Vec<&str> = csv.lines().collect();
    assert_eq!(lines[0], "Admission No,Student Name,Theory,Practical");
    assert_eq!(lines[1], "A-1,Asha Rao,0,0");
    assert_eq!(lines[2], "A-2,\"Rahman, Imran\",0,0");
    assert_eq!(std::fs::read_to_string(&out).expect("written file"), csv);

    let report = sidecar.request_ok(
        "results.importCsv",
        json!({ "examId": exam_id, "subject": "Maths", "enteredBy": "t-1", "inPath": out.to_string_lossy() }),
    );
    assert_eq!(report["rowsRead"].as_u64(), Some(2));
    assert_eq!(report["applied"].as_array().map(|a| a.len()), Some(4));

    let results = sidecar.request_ok("results.get", json!({ "examId": exam_id, "subject": "Maths" }));
    for s in results["students"].as_array().expect("students") {
        for leaf in ["Theory", "Practical"] {
            assert_eq!(s["marks"][leaf]["obtained"].as_f64(), Some(0.0));
            assert_eq!(s["marks"][leaf]["absent"].as_bool(), Some(false));
        }
        assert_eq!(s["summary"]["percentage"].as_str(), Some("0.00"));
    }
}

#[test]
fn import_skips_unknown_rows_and_invalid_cells() {
    let (mut sidecar, exam_id) = seeded();
    sidecar.request_ok(
        "results.upload",
        json!({
            "examId": exam_id,
            "subject": "Maths",
            "enteredBy": "t-1",
            "entries": [{ "admissionNo": "A-2", "marks": { "Theory": { "obtained": 40 } } }]
        }),
    );

    let csv = "Admission No,Student Name,Theory,Practical\n\
               Z-9,Ghost,10,10\n\
               A-1,Asha Rao,65,12.5\n\
               A-2,\"Rahman, Imran\",71,AB\n";
    let report = sidecar.request_ok(
        "results.importCsv",
        json!({ "examId": exam_id, "subject": "Maths", "enteredBy": "t-1", "csv": csv }),
    );
    assert_eq!(report["rowsRead"].as_u64(), Some(3));
    assert_eq!(report["skippedRows"][0]["admissionNo"].as_str(), Some("Z-9"));
    assert_eq!(report["skippedRows"][0]["reason"].as_str(), Some("unknown_student"));
    let reasons: Vec<&str> = report["skippedCells"]
        .as_array()
        .expect("skippedCells")
        .iter()
        .filter_map(|c| c["reason"].as_str())
        .collect();
    assert_eq!(reasons, vec!["not_a_number", "exceeds_max"]);

    let results = sidecar.request_ok("results.get", json!({ "examId": exam_id, "subject": "Maths" }));
    let rows = results["students"].as_array().expect("students");
    assert_eq!(rows[0]["marks"]["Theory"]["obtained"].as_f64(), Some(65.0));
    assert!(rows[0]["marks"]["Practical"]["obtained"].is_null());
    // Prior value survives an over-max cell.
    assert_eq!(rows[1]["marks"]["Theory"]["obtained"].as_f64(), Some(40.0));
    assert_eq!(rows[1]["marks"]["Practical"]["absent"].as_bool(), Some(true));

    let filled = sidecar.request_ok(
        "results.exportTemplate",
        json!({ "examId": exam_id, "subject": "Maths", "includeMarks": true }),
    );
    let lines: Vec<String> = filled["csv"]
        .as_str()
        .expect("csv")
        .lines()
        .map(str::to_string)
        .collect();
    assert_eq!(lines[1], "A-1,Asha Rao,65,");
    assert_eq!(lines[2], "A-2,\"Rahman, Imran\",40,AB");

    sidecar.request_err(
        "results.importCsv",
        json!({ "examId": exam_id, "subject": "Maths", "enteredBy": "t-1" }),
        "bad_params",
    );
    sidecar.request_err(
        "results.importCsv",
        json!({ "examId": exam_id, "subject": "Maths", "enteredBy": "t-1", "inPath": "/nonexistent/marks.csv" }),
        "io_failed",
    );
}

#[test]
fn name_with_line_break_survives_template_round_trip() {
    let mut sidecar = spawn_sidecar();
    sidecar.open_workspace("schoold-marks-csv-multiline");
    sidecar.add_student("A-1", "Asha\nRao", "7A", 1);
    sidecar.add_student("A-2", "Imran", "7A", 2);
    let exam = sidecar.request_ok("exams.create", json!({ "name": "Unit 1", "classSection": "7A" }));
    let exam_id = exam["examId"].as_str().expect("examId").to_string();
    sidecar.request_ok(
        "results.upload",
        json!({
            "examId": exam_id,
            "subject": "Maths",
            "enteredBy": "t-1",
            "entries": [{ "admissionNo": "A-1", "marks": { "Theory": { "obtained": 50 } } }]
        }),
    );

    let exported = sidecar.request_ok(
        "results.exportTemplate",
        json!({ "examId": exam_id, "subject": "Maths" }),
    );
    let csv = exported["csv"].as_str().expect("csv").to_string();
    assert!(csv.contains("A-1,\"Asha\nRao\",0,0\n"));

    let report = sidecar.request_ok(
        "results.importCsv",
        json!({ "examId": exam_id, "subject": "Maths", "enteredBy": "t-1", "csv": csv }),
    );
    assert_eq!(report["rowsRead"].as_u64(), Some(2));
    assert_eq!(report["skippedRows"].as_array().map(|a| a.len()), Some(0));
    assert_eq!(report["applied"].as_array().map(|a| a.len()), Some(4));

    let results = sidecar.request_ok("results.get", json!({ "examId": exam_id, "subject": "Maths" }));
    for s in results["students"].as_array().expect("students") {
        for leaf in ["Theory", "Practical"] {
            assert_eq!(s["marks"][leaf]["obtained"].as_f64(), Some(0.0));
        }
    }
}
