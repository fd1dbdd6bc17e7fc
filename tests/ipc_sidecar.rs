mod test_support;

use serde_json::json;
use sha2::{Digest, Sha256};
use std::fs::File;
use std::io::Read;
use test_support::{error_code, fixture_path, request, request_ok, spawn_sidecar, temp_dir};

#[test]
fn requests_before_source_open_are_rejected() {
    let (mut child, mut stdin, mut reader) = spawn_sidecar();

    let health = request_ok(&mut stdin, &mut reader, "1", "health", json!({}));
    assert!(health.get("version").and_then(|v| v.as_str()).is_some());
    assert!(health.get("sourcePath").map(|v| v.is_null()).unwrap_or(false));

    let resp = request(&mut stdin, &mut reader, "2", "courses.list", json!({}));
    assert_eq!(error_code(&resp), Some("no_source"));

    let resp = request(
        &mut stdin,
        &mut reader,
        "3",
        "gradebook.build",
        json!({ "courseId": "42" }),
    );
    assert_eq!(error_code(&resp), Some("no_source"));

    let resp = request(&mut stdin, &mut reader, "4", "source.open", json!({}));
    assert_eq!(error_code(&resp), Some("bad_params"));

    let resp = request(&mut stdin, &mut reader, "5", "roster.sync", json!({}));
    assert_eq!(error_code(&resp), Some("not_implemented"));

    drop(stdin);
    let _ = child.wait();
}

#[test]
fn build_query_and_export_over_ipc() {
    let out_dir = temp_dir("gradebookd-ipc");
    let snapshot = fixture_path("moodle_snapshot.json");
    let (mut child, mut stdin, mut reader) = spawn_sidecar();

    let opened = request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "source.open",
        json!({ "path": snapshot.to_string_lossy() }),
    );
    assert_eq!(opened["courseCount"], 2);
    assert_eq!(opened["sourceSystem"], "Moodle");

    let courses = request_ok(&mut stdin, &mut reader, "2", "courses.list", json!({}));
    let courses = courses["courses"].as_array().expect("courses");
    assert_eq!(courses.len(), 2);
    assert!(courses.iter().all(|c| c["built"] == false));

    let missing = request(
        &mut stdin,
        &mut reader,
        "3",
        "gradebook.build",
        json!({ "courseId": "404" }),
    );
    assert_eq!(error_code(&missing), Some("course_not_found"));

    let built = request_ok(
        &mut stdin,
        &mut reader,
        "4",
        "gradebook.build",
        json!({ "courseId": "42", "config": { "maxConcurrentStudents": 2 } }),
    );
    assert_eq!(built["gradebookId"], "moodle_course_42");
    assert_eq!(built["students"], 3);
    assert_eq!(built["assignments"], 3);
    assert_eq!(built["categories"], 2);
    assert_eq!(built["grades"], 4);
    assert!(built["report"]["runId"].as_str().is_some());

    let bad_config = request(
        &mut stdin,
        &mut reader,
        "5",
        "gradebook.build",
        json!({ "courseId": "42", "config": { "maxConcurrentStudents": "many" } }),
    );
    assert_eq!(error_code(&bad_config), Some("bad_params"));

    let summary = request_ok(
        &mut stdin,
        &mut reader,
        "6",
        "gradebook.summary",
        json!({ "courseId": "42" }),
    );
    let text = summary["text"].as_str().expect("summary text");
    assert!(text.contains("Intro Biology (moodle_course_42)"));
    assert!(text.contains("Lab 1: 9.00 ✓"));

    let grid = request_ok(
        &mut stdin,
        &mut reader,
        "7",
        "gradebook.grid",
        json!({ "courseId": "42" }),
    );
    assert_eq!(
        grid["header"],
        json!(["Student", "Lab 1", "Essay & Reflection", "Assignment 103"])
    );
    assert_eq!(grid["rows"][1], json!(["Ada Lovelace", "9.00", "", "-"]));

    let json_out = out_dir.join("gradebook.json");
    let exported = request_ok(
        &mut stdin,
        &mut reader,
        "8",
        "gradebook.exportJson",
        json!({ "courseId": "42", "outPath": json_out.to_string_lossy() }),
    );
    assert!(exported["bytes"].as_u64().unwrap_or(0) > 0);
    let doc: serde_json::Value =
        serde_json::from_str(&std::fs::read_to_string(&json_out).expect("read json export"))
            .expect("parse json export");
    let ada = &doc["students"][1];
    assert_eq!(ada["username"], "ada");
    let ada_id = ada["id"].as_u64().expect("ada id");
    let lab1_id = doc["assignments"][0]["id"].as_u64().expect("lab 1 id");

    let grade = request_ok(
        &mut stdin,
        &mut reader,
        "9",
        "gradebook.grade",
        json!({ "courseId": "42", "studentId": ada_id, "assignmentId": lab1_id }),
    );
    assert_eq!(grade["cell"]["grade"], "9.00");
    assert_eq!(grade["cell"]["status"], "Graded");

    let student_grades = request_ok(
        &mut stdin,
        &mut reader,
        "10",
        "gradebook.studentGrades",
        json!({ "courseId": "42", "studentId": ada_id.to_string() }),
    );
    assert_eq!(student_grades["cells"].as_array().map(|c| c.len()), Some(2));

    let assignment_grades = request_ok(
        &mut stdin,
        &mut reader,
        "11",
        "gradebook.assignmentGrades",
        json!({ "courseId": "42", "assignmentId": lab1_id }),
    );
    assert_eq!(assignment_grades["cells"].as_array().map(|c| c.len()), Some(2));

    let unknown = request(
        &mut stdin,
        &mut reader,
        "12",
        "gradebook.studentGrades",
        json!({ "courseId": "42", "studentId": 999_999 }),
    );
    assert_eq!(error_code(&unknown), Some("not_found"));

    let csv_out = out_dir.join("grades.csv");
    let csv = request_ok(
        &mut stdin,
        &mut reader,
        "13",
        "gradebook.exportCsv",
        json!({ "courseId": "42", "outPath": csv_out.to_string_lossy() }),
    );
    assert_eq!(csv["rowsExported"], 4);
    let csv_text = std::fs::read_to_string(&csv_out).expect("read csv");
    assert!(csv_text.starts_with("student_id,username,family_name,given_name,"));

    let bundle_out = out_dir.join("bundle.zip");
    let bundle = request_ok(
        &mut stdin,
        &mut reader,
        "14",
        "gradebook.exportBundle",
        json!({ "courseId": "42", "outPath": bundle_out.to_string_lossy() }),
    );
    assert_eq!(bundle["entryCount"], 3);

    let mut archive = zip::ZipArchive::new(File::open(&bundle_out).expect("open bundle"))
        .expect("zip archive");
    let mut manifest_text = String::new();
    archive
        .by_name("manifest.json")
        .expect("manifest entry")
        .read_to_string(&mut manifest_text)
        .expect("read manifest");
    let manifest: serde_json::Value = serde_json::from_str(&manifest_text).expect("manifest json");
    assert_eq!(manifest["courseId"], "moodle_course_42");
    for entry in manifest["entries"].as_array().expect("entries") {
        let name = entry["name"].as_str().expect("entry name");
        let mut bytes = Vec::new();
        archive
            .by_name(name)
            .expect("bundle entry")
            .read_to_end(&mut bytes)
            .expect("read entry");
        let digest = format!("{:x}", Sha256::digest(&bytes));
        assert_eq!(entry["sha256"].as_str(), Some(digest.as_str()));
    }

    let courses = request_ok(&mut stdin, &mut reader, "15", "courses.list", json!({}));
    let bio = courses["courses"]
        .as_array()
        .and_then(|c| c.iter().find(|c| c["id"] == "42"))
        .expect("course 42");
    assert_eq!(bio["built"], true);

    drop(stdin);
    let _ = child.wait();
    let _ = std::fs::remove_dir_all(out_dir);
}

#[test]
fn reopening_a_source_drops_cached_gradebooks() {
    let snapshot = fixture_path("moodle_snapshot.json");
    let (mut child, mut stdin, mut reader) = spawn_sidecar();

    let open = json!({ "path": snapshot.to_string_lossy() });
    request_ok(&mut stdin, &mut reader, "1", "source.open", open.clone());
    // Queries build on first use.
    request_ok(&mut stdin, &mut reader, "2", "gradebook.grid", json!({ "courseId": "42" }));
    let health = request_ok(&mut stdin, &mut reader, "3", "health", json!({}));
    assert_eq!(health["cachedCourses"], 1);

    request_ok(&mut stdin, &mut reader, "4", "source.open", open);
    let health = request_ok(&mut stdin, &mut reader, "5", "health", json!({}));
    assert_eq!(health["cachedCourses"], 0);

    drop(stdin);
    let _ = child.wait();
}
