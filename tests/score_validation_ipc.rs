mod test_support;

use serde_json::json;
use test_support::{request, request_err, request_ok, spawn_sidecar, teacher, temp_dir};

#[test]
fn invalid_scores_and_slots_are_rejected_without_mutation() {
    let workspace = temp_dir("gradebook-validation");
    let (_child, mut stdin, mut reader) = spawn_sidecar();
    request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );
    let opened = request_ok(
        &mut stdin,
        &mut reader,
        "2",
        "datasets.open",
        json!({ "sectionId": "5A", "subjectId": "math", "term": "2025" }),
    );
    let dataset_id = opened["dataset"]["id"].as_str().expect("id").to_string();
    let block_id = opened["blocks"][0]["id"].as_str().expect("block").to_string();

    request_ok(
        &mut stdin,
        &mut reader,
        "3",
        "grades.setScore",
        json!({
            "datasetId": dataset_id, "actor": teacher(), "studentId": "stu-1",
            "blockId": block_id, "slot": "p1", "value": 80,
        }),
    );

    let cases = [
        (json!(100.5), "p1"),
        (json!(-1), "p1"),
        (json!(50), "p5"),
        (json!(50), "rp0"),
        (json!(50), "x1"),
    ];
    for (i, (value, slot)) in cases.iter().enumerate() {
        let resp = request(
            &mut stdin,
            &mut reader,
            &format!("bad{}", i),
            "grades.setScore",
            json!({
                "datasetId": dataset_id, "actor": teacher(), "studentId": "stu-1",
                "blockId": block_id, "slot": slot, "value": value,
            }),
        );
        assert_eq!(resp["ok"], json!(false), "case {} accepted: {}", i, resp);
        assert_eq!(
            resp.pointer("/error/code").and_then(|v| v.as_str()),
            Some("validation_failed"),
            "case {}: {}",
            i,
            resp
        );
    }

    // Boundaries are accepted.
    for (i, v) in [0.0, 100.0].iter().enumerate() {
        request_ok(
            &mut stdin,
            &mut reader,
            &format!("edge{}", i),
            "grades.setScore",
            json!({
                "datasetId": dataset_id, "actor": teacher(), "studentId": "stu-2",
                "blockId": block_id, "slot": format!("p{}", i + 1), "value": v,
            }),
        );
    }

    let got = request_ok(
        &mut stdin,
        &mut reader,
        "4",
        "grades.get",
        json!({ "datasetId": dataset_id, "studentId": "stu-1" }),
    );
    assert_eq!(got["record"]["blocks"][0]["average"].as_f64(), Some(80.0));

    let code = request_err(
        &mut stdin,
        &mut reader,
        "5",
        "grades.setScore",
        json!({
            "datasetId": dataset_id, "actor": teacher(), "studentId": "stu-1",
            "blockId": "no-such-block", "slot": "p1", "value": 50,
        }),
    );
    assert_eq!(code, "not_found");

    let code = request_err(
        &mut stdin,
        &mut reader,
        "6",
        "grades.setScore",
        json!({
            "datasetId": "no-such-dataset", "actor": teacher(), "studentId": "stu-1",
            "blockId": block_id, "slot": "p1", "value": 50,
        }),
    );
    assert_eq!(code, "not_found");

    let code = request_err(
        &mut stdin,
        &mut reader,
        "7",
        "grades.setScore",
        json!({
            "datasetId": dataset_id, "actor": { "id": "x", "role": "janitor" },
            "studentId": "stu-1", "blockId": block_id, "slot": "p1", "value": 50,
        }),
    );
    assert_eq!(code, "bad_params");

    let code = request_err(
        &mut stdin,
        &mut reader,
        "8",
        "grades.setScore",
        json!({
            "datasetId": dataset_id, "actor": teacher(), "studentId": "stu-1",
            "blockId": block_id, "slot": "p1",
        }),
    );
    assert_eq!(code, "bad_params");

    let _ = std::fs::remove_dir_all(workspace);
}

#[test]
fn requests_before_workspace_select_are_refused() {
    let (_child, mut stdin, mut reader) = spawn_sidecar();
    let code = request_err(
        &mut stdin,
        &mut reader,
        "1",
        "grades.list",
        json!({ "datasetId": "x" }),
    );
    assert_eq!(code, "no_workspace");
    let code = request_err(&mut stdin, &mut reader, "2", "no.such.method", json!({}));
    assert_eq!(code, "not_implemented");
}
