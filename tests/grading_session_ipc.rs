mod test_support;

use serde_json::json;
use test_support::{admin, request_err, request_ok, spawn_sidecar, teacher, temp_dir};

#[test]
fn reference_scores_produce_expected_block_and_final_grades() {
    let workspace = temp_dir("gradebook-grading");
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
    assert_eq!(opened["created"], json!(true));
    assert_eq!(opened["seededBlocks"], json!(4));
    let dataset_id = opened["dataset"]["id"].as_str().expect("dataset id").to_string();
    let block_ids: Vec<String> = opened["blocks"]
        .as_array()
        .expect("blocks")
        .iter()
        .map(|b| b["id"].as_str().expect("block id").to_string())
        .collect();
    let codes: Vec<&str> = opened["blocks"]
        .as_array()
        .expect("blocks")
        .iter()
        .map(|b| b["code"].as_str().expect("code"))
        .collect();
    assert_eq!(codes, vec!["PC1", "PC2", "PC3", "PC4"]);

    let scores = [
        [85.0, 78.0, 92.0, 88.0],
        [80.0, 85.0, 88.0, 90.0],
        [90.0, 87.0, 85.0, 92.0],
        [88.0, 90.0, 92.0, 85.0],
    ];
    let mut n = 0;
    let mut last = json!(null);
    for (block_id, row) in block_ids.iter().zip(scores.iter()) {
        for (i, v) in row.iter().enumerate() {
            n += 1;
            last = request_ok(
                &mut stdin,
                &mut reader,
                &format!("s{}", n),
                "grades.setScore",
                json!({
                    "datasetId": dataset_id,
                    "actor": teacher(),
                    "studentId": "stu-1",
                    "blockId": block_id,
                    "slot": format!("p{}", i + 1),
                    "value": v,
                }),
            );
        }
    }
    let averages: Vec<f64> = last["record"]["blocks"]
        .as_array()
        .expect("record blocks")
        .iter()
        .map(|b| b["average"].as_f64().expect("average"))
        .collect();
    assert_eq!(averages, vec![85.75, 85.75, 88.5, 88.75]);
    assert_eq!(last["record"]["finalGrade"].as_f64(), Some(87.19));

    // A lower recovery score leaves the average alone; a higher one replaces the period.
    let rec = request_ok(
        &mut stdin,
        &mut reader,
        "r1",
        "grades.setScore",
        json!({
            "datasetId": dataset_id, "actor": teacher(), "studentId": "stu-1",
            "blockId": block_ids[0], "slot": "rp2", "value": 60,
        }),
    );
    assert_eq!(rec["record"]["blocks"][0]["average"].as_f64(), Some(85.75));
    let rec = request_ok(
        &mut stdin,
        &mut reader,
        "r2",
        "grades.setScore",
        json!({
            "datasetId": dataset_id, "actor": teacher(), "studentId": "stu-1",
            "blockId": block_ids[0], "slot": "rp2", "value": 90,
        }),
    );
    assert_eq!(rec["record"]["blocks"][0]["average"].as_f64(), Some(88.75));

    // Clearing the recovery restores the original average.
    let rec = request_ok(
        &mut stdin,
        &mut reader,
        "r3",
        "grades.setScore",
        json!({
            "datasetId": dataset_id, "actor": teacher(), "studentId": "stu-1",
            "blockId": block_ids[0], "slot": "rp2", "value": null,
        }),
    );
    assert_eq!(rec["record"]["blocks"][0]["average"].as_f64(), Some(85.75));

    let got = request_ok(
        &mut stdin,
        &mut reader,
        "g1",
        "grades.get",
        json!({ "datasetId": dataset_id, "studentId": "stu-1" }),
    );
    assert_eq!(got["record"]["finalGrade"].as_f64(), Some(87.19));
    assert_eq!(
        got["record"]["blocks"][0]["scores"]["periods"],
        json!([85.0, 78.0, 92.0, 88.0])
    );

    let _ = std::fs::remove_dir_all(workspace);
}

#[test]
fn scores_survive_sidecar_restart() {
    let workspace = temp_dir("gradebook-restart");
    let dataset_id;
    let block_id;
    {
        let (mut child, mut stdin, mut reader) = spawn_sidecar();
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
            json!({ "sectionId": "6B", "subjectId": "science", "term": "2025" }),
        );
        dataset_id = opened["dataset"]["id"].as_str().expect("id").to_string();
        block_id = opened["blocks"][1]["id"].as_str().expect("block").to_string();
        request_ok(
            &mut stdin,
            &mut reader,
            "3",
            "grades.setScore",
            json!({
                "datasetId": dataset_id, "actor": teacher(), "studentId": "stu-9",
                "blockId": block_id, "slot": "p1", "value": 72.5,
            }),
        );
        drop(stdin);
        let _ = child.wait();
    }

    let (_child, mut stdin, mut reader) = spawn_sidecar();
    request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );
    let reopened = request_ok(
        &mut stdin,
        &mut reader,
        "2",
        "datasets.open",
        json!({ "sectionId": "6B", "subjectId": "science", "term": "2025" }),
    );
    assert_eq!(reopened["created"], json!(false));
    assert_eq!(reopened["dataset"]["id"].as_str(), Some(dataset_id.as_str()));

    let got = request_ok(
        &mut stdin,
        &mut reader,
        "3",
        "grades.get",
        json!({ "datasetId": dataset_id, "studentId": "stu-9" }),
    );
    assert_eq!(got["record"]["blocks"][1]["average"].as_f64(), Some(72.5));
    assert_eq!(got["record"]["finalGrade"].as_f64(), Some(72.5));

    let _ = std::fs::remove_dir_all(workspace);
}

#[test]
fn enroll_list_and_class_summary() {
    let workspace = temp_dir("gradebook-summary");
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
        json!({ "sectionId": "5A", "subjectId": "art", "term": "2025" }),
    );
    let dataset_id = opened["dataset"]["id"].as_str().expect("id").to_string();
    let block_id = opened["blocks"][0]["id"].as_str().expect("block").to_string();

    let enrolled = request_ok(
        &mut stdin,
        &mut reader,
        "3",
        "datasets.enroll",
        json!({ "datasetId": dataset_id, "studentIds": ["a", "b", "c"] }),
    );
    assert_eq!(enrolled["added"], json!(3));
    let again = request_ok(
        &mut stdin,
        &mut reader,
        "4",
        "datasets.enroll",
        json!({ "datasetId": dataset_id, "studentIds": ["a", "d"] }),
    );
    assert_eq!(again["added"], json!(1));
    assert_eq!(again["studentCount"], json!(4));

    for (i, (student, v)) in [("a", 70.0), ("b", 90.0), ("c", 80.0)].iter().enumerate() {
        request_ok(
            &mut stdin,
            &mut reader,
            &format!("s{}", i),
            "grades.setScore",
            json!({
                "datasetId": dataset_id, "actor": admin(), "studentId": student,
                "blockId": block_id, "slot": "p1", "value": v,
            }),
        );
    }

    let list = request_ok(
        &mut stdin,
        &mut reader,
        "5",
        "grades.list",
        json!({ "datasetId": dataset_id }),
    );
    assert_eq!(list["blocks"].as_array().map(|a| a.len()), Some(4));
    let students: Vec<&str> = list["students"]
        .as_array()
        .expect("students")
        .iter()
        .map(|s| s["studentId"].as_str().expect("student id"))
        .collect();
    assert_eq!(students, vec!["a", "b", "c", "d"]);

    let summary = request_ok(
        &mut stdin,
        &mut reader,
        "6",
        "grades.summary",
        json!({ "datasetId": dataset_id }),
    );
    let s = &summary["summary"];
    assert_eq!(s["studentCount"], json!(4));
    assert_eq!(s["blocks"][0]["average"].as_f64(), Some(80.0));
    assert_eq!(s["blocks"][0]["median"].as_f64(), Some(80.0));
    assert_eq!(s["blocks"][0]["gradedCount"], json!(3));
    assert_eq!(s["blocks"][0]["ungradedCount"], json!(1));
    assert_eq!(s["final"]["average"].as_f64(), Some(80.0));

    let code = request_err(
        &mut stdin,
        &mut reader,
        "7",
        "grades.get",
        json!({ "datasetId": dataset_id, "studentId": "nobody" }),
    );
    assert_eq!(code, "not_found");

    let _ = std::fs::remove_dir_all(workspace);
}
