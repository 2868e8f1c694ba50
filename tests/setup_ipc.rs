mod test_support;

use serde_json::json;
use test_support::spawn_sidecar;

#[test]
fn setup_sections_have_defaults_and_validate_patches() {
    let mut sidecar = spawn_sidecar();
    sidecar.open_workspace("schoold-setup");

    let defaults = sidecar.request_ok("setup.get", json!({}));
    assert_eq!(defaults["attendance"]["requireEditReason"].as_bool(), Some(true));
    assert_eq!(defaults["attendance"]["editReasonMaxChars"].as_i64(), Some(500));
    assert_eq!(defaults["attendance"]["lateCountsAsPresent"].as_bool(), Some(true));
    assert_eq!(defaults["school"]["schoolName"].as_str(), Some(""));

    let updated = sidecar.request_ok(
        "setup.update",
        json!({ "section": "school", "patch": { "schoolName": "  Hillview  ", "academicYear": "2024-25" } }),
    );
    assert_eq!(updated["section"]["schoolName"].as_str(), Some("Hillview"));

    for patch in [
        json!({ "section": "attendance", "patch": { "editReasonMaxChars": 0 } }),
        json!({ "section": "attendance", "patch": { "editReasonMaxChars": 2001 } }),
        json!({ "section": "attendance", "patch": { "requireEditReason": "yes" } }),
        json!({ "section": "attendance", "patch": { "colour": "blue" } }),
        json!({ "section": "school", "patch": { "academicYear": "x".repeat(21) } }),
        json!({ "section": "billing", "patch": {} }),
        json!({ "section": "school" }),
    ] {
        sidecar.request_err("setup.update", patch, "bad_params");
    }

    let saved = sidecar.request_ok("setup.get", json!({}));
    assert_eq!(saved["school"]["academicYear"].as_str(), Some("2024-25"));
    assert_eq!(saved["attendance"]["editReasonMaxChars"].as_i64(), Some(500));
}
