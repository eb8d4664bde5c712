use serde_json::json;
use std::io::{BufRead, BufReader, Write};
use std::path::PathBuf;
use std::process::{Child, ChildStdin, ChildStdout, Command, Stdio};
use std::time::{SystemTime, UNIX_EPOCH};

fn temp_dir(prefix: &str) -> PathBuf {
    let p = std::env::temp_dir().join(format!(
        "{}-{}",
        prefix,
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .expect("clock")
            .as_nanos()
    ));
    std::fs::create_dir_all(&p).expect("create temp dir");
    p
}

fn spawn_sidecar() -> (Child, ChildStdin, BufReader<ChildStdout>) {
    let exe = env!("CARGO_BIN_EXE_recordsd");
    let mut child = Command::new(exe)
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .spawn()
        .expect("spawn recordsd");
    let stdin = child.stdin.take().expect("child stdin");
    let stdout = child.stdout.take().expect("child stdout");
    (child, stdin, BufReader::new(stdout))
}

fn request(
    stdin: &mut ChildStdin,
    reader: &mut BufReader<ChildStdout>,
    id: &str,
    method: &str,
    params: serde_json::Value,
) -> serde_json::Value {
    let payload = json!({
        "id": id,
        "method": method,
        "params": params,
    });
    writeln!(stdin, "{}", payload).expect("write request");
    stdin.flush().expect("flush request");

    let mut line = String::new();
    reader.read_line(&mut line).expect("read response line");
    let value: serde_json::Value = serde_json::from_str(line.trim()).expect("parse response json");
    assert_eq!(value.get("id").and_then(|v| v.as_str()), Some(id));
    value
}

fn request_ok(
    stdin: &mut ChildStdin,
    reader: &mut BufReader<ChildStdout>,
    id: &str,
    method: &str,
    params: serde_json::Value,
) -> serde_json::Value {
    let value = request(stdin, reader, id, method, params);
    assert!(
        value.get("ok").and_then(|v| v.as_bool()).unwrap_or(false),
        "{} failed: {}",
        method,
        value
    );
    value.get("result").cloned().unwrap_or_else(|| json!({}))
}

fn request_err(
    stdin: &mut ChildStdin,
    reader: &mut BufReader<ChildStdout>,
    id: &str,
    method: &str,
    params: serde_json::Value,
) -> String {
    let value = request(stdin, reader, id, method, params);
    assert_eq!(
        value.get("ok").and_then(|v| v.as_bool()),
        Some(false),
        "{} unexpectedly succeeded: {}",
        method,
        value
    );
    value
        .pointer("/error/code")
        .and_then(|v| v.as_str())
        .unwrap_or("")
        .to_string()
}

fn seed(stdin: &mut ChildStdin, reader: &mut BufReader<ChildStdout>, workspace: &PathBuf) {
    let calls = vec![
        ("workspace.select", json!({ "path": workspace.to_string_lossy() })),
        (
            "gradeBands.set",
            json!({ "bands": [
                { "code": "P", "name": "Pass", "lowerLimit": 40, "upperLimit": 100, "gradePoints": 6 },
                { "code": "F", "name": "Fail", "lowerLimit": 0, "upperLimit": 39.99, "gradePoints": 0 }
            ]}),
        ),
        (
            "semesters.upsert",
            json!({ "id": "sem1", "number": 1, "startDate": "2025-01-01", "endDate": "2025-06-30" }),
        ),
        ("courses.upsert", json!({ "id": "c1", "code": "MA101", "name": "Calculus", "credits": 4 })),
        ("courses.upsert", json!({ "id": "c2", "code": "PH101", "name": "Physics", "credits": 3 })),
        ("examTypes.upsert", json!({ "id": "see", "name": "Semester End", "weightage": 100 })),
        (
            "exams.upsert",
            json!({ "id": "e1", "courseId": "c1", "examTypeId": "see", "semesterId": "sem1",
                    "totalMarks": 100, "passingMarks": 40 }),
        ),
        (
            "exams.upsert",
            json!({ "id": "e2", "courseId": "c2", "examTypeId": "see", "semesterId": "sem1",
                    "totalMarks": 100, "passingMarks": 40 }),
        ),
    ];
    for (i, (method, params)) in calls.into_iter().enumerate() {
        request_ok(stdin, reader, &format!("seed-{i}"), method, params);
    }
}

fn publish_marks(
    stdin: &mut ChildStdin,
    reader: &mut BufReader<ChildStdout>,
    student_id: &str,
    exam_id: &str,
    marks: f64,
) {
    let tag = format!("{student_id}-{exam_id}");
    let entered = request_ok(
        stdin,
        reader,
        &format!("{tag}-enter"),
        "results.enter",
        json!({ "studentId": student_id, "examId": exam_id, "marksObtained": marks }),
    );
    let result_id = entered
        .pointer("/result/id")
        .and_then(|v| v.as_str())
        .expect("result id")
        .to_string();
    for (step, (method, params)) in [
        ("results.process", json!({ "resultId": result_id })),
        ("results.verify", json!({ "resultId": result_id, "evaluatorId": "t1" })),
        ("results.publish", json!({ "resultId": result_id, "publisherId": "admin" })),
    ]
    .into_iter()
    .enumerate()
    {
        request_ok(stdin, reader, &format!("{tag}-{step}"), method, params);
    }
}

fn student_ids(import: &serde_json::Value) -> Vec<String> {
    import
        .get("items")
        .and_then(|v| v.as_array())
        .expect("items")
        .iter()
        .filter_map(|i| i.pointer("/outcome/studentId").and_then(|v| v.as_str()))
        .map(|s| s.to_string())
        .collect()
}

#[test]
fn import_reports_bad_rows_and_keeps_good_ones() {
    let workspace = temp_dir("recordsd-import");
    let (_child, mut stdin, mut reader) = spawn_sidecar();
    seed(&mut stdin, &mut reader, &workspace);

    let report = request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "batch.importStudents",
        json!({ "rows": [
            { "usn": "1XX25CS001", "displayName": "Asha", "email": "asha@college.edu" },
            { "usn": "1XX25CS002", "displayName": "Ravi", "email": "ravi@college.edu" },
            { "usn": "1xx25cs001", "displayName": "Asha Again", "email": "asha2@college.edu" },
            { "usn": "1XX25CS003", "displayName": "Meera", "email": "RAVI@college.edu" },
            { "usn": "1XX25CS004", "displayName": "", "email": "x@college.edu" }
        ]}),
    );
    assert_eq!(report.get("succeeded").and_then(|v| v.as_u64()), Some(2));
    assert_eq!(report.get("failed").and_then(|v| v.as_u64()), Some(3));
    assert_eq!(
        report.pointer("/items/2/error/code").and_then(|v| v.as_str()),
        Some("duplicate")
    );
    assert_eq!(
        report.pointer("/items/3/error/code").and_then(|v| v.as_str()),
        Some("duplicate")
    );
    assert_eq!(
        report.pointer("/items/4/error/code").and_then(|v| v.as_str()),
        Some("bad_params")
    );

    // Existing records count as duplicates in later batches.
    let again = request_ok(
        &mut stdin,
        &mut reader,
        "2",
        "batch.importStudents",
        json!({ "rows": [
            { "usn": "1XX25CS002", "displayName": "Ravi", "email": "new@college.edu" }
        ]}),
    );
    assert_eq!(again.get("succeeded").and_then(|v| v.as_u64()), Some(0));

    let code = request_err(
        &mut stdin,
        &mut reader,
        "3",
        "batch.importStudents",
        json!({ "rows": [{ "usn": "1XX25CS009" }] }),
    );
    assert_eq!(code, "bad_params");
}

#[test]
fn promotion_skips_students_over_the_backlog_threshold() {
    let workspace = temp_dir("recordsd-promote");
    let (_child, mut stdin, mut reader) = spawn_sidecar();
    seed(&mut stdin, &mut reader, &workspace);

    let import = request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "batch.importStudents",
        json!({ "rows": [
            { "usn": "1XX25CS001", "displayName": "Asha", "email": "asha@college.edu" },
            { "usn": "1XX25CS002", "displayName": "Ravi", "email": "ravi@college.edu" }
        ]}),
    );
    let ids = student_ids(&import);
    assert_eq!(ids.len(), 2);
    let (asha, ravi) = (ids[0].clone(), ids[1].clone());

    publish_marks(&mut stdin, &mut reader, &asha, "e1", 75.0);
    publish_marks(&mut stdin, &mut reader, &asha, "e2", 35.0);
    publish_marks(&mut stdin, &mut reader, &ravi, "e1", 20.0);
    publish_marks(&mut stdin, &mut reader, &ravi, "e2", 10.0);

    let single = request_ok(
        &mut stdin,
        &mut reader,
        "2",
        "eligibility.promotion",
        json!({ "studentId": ravi, "fromSemester": 1, "toSemester": 2, "backlogThreshold": 1 }),
    );
    assert_eq!(single.get("decision").and_then(|v| v.as_str()), Some("ineligible"));
    assert_eq!(single.get("backlogCount").and_then(|v| v.as_u64()), Some(2));

    let skip = request_ok(
        &mut stdin,
        &mut reader,
        "3",
        "eligibility.promotion",
        json!({ "studentId": asha, "fromSemester": 1, "toSemester": 3 }),
    );
    assert_eq!(skip.get("decision").and_then(|v| v.as_str()), Some("ineligible"));
    assert!(skip
        .get("reason")
        .and_then(|v| v.as_str())
        .map(|r| r.contains("sequential"))
        .unwrap_or(false));

    let report = request_ok(
        &mut stdin,
        &mut reader,
        "4",
        "batch.promote",
        json!({
            "studentIds": [asha, ravi, "ghost"],
            "fromSemester": 1,
            "toSemester": 2,
            "backlogThreshold": 1
        }),
    );
    assert_eq!(report.get("succeeded").and_then(|v| v.as_u64()), Some(1));
    assert_eq!(report.pointer("/items/0/ok").and_then(|v| v.as_bool()), Some(true));
    assert_eq!(
        report.pointer("/items/0/outcome/backlogCount").and_then(|v| v.as_u64()),
        Some(1)
    );
    assert_eq!(
        report.pointer("/items/1/error/code").and_then(|v| v.as_str()),
        Some("ineligible")
    );
    assert_eq!(
        report.pointer("/items/2/error/code").and_then(|v| v.as_str()),
        Some("not_found")
    );

    // Asha is now in semester 2, so a repeat promotion from 1 is refused.
    let repeat = request_ok(
        &mut stdin,
        &mut reader,
        "5",
        "eligibility.promotion",
        json!({ "studentId": asha, "fromSemester": 1, "toSemester": 2 }),
    );
    assert_eq!(repeat.get("decision").and_then(|v| v.as_str()), Some("ineligible"));
    let next = request_ok(
        &mut stdin,
        &mut reader,
        "6",
        "eligibility.promotion",
        json!({ "studentId": asha, "fromSemester": 2, "toSemester": 3 }),
    );
    assert_eq!(next.get("decision").and_then(|v| v.as_str()), Some("eligible"));
}

#[test]
fn default_threshold_comes_from_policy() {
    let workspace = temp_dir("recordsd-promote-policy");
    let (_child, mut stdin, mut reader) = spawn_sidecar();
    seed(&mut stdin, &mut reader, &workspace);
    request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "students.upsert",
        json!({ "id": "s1", "usn": "1XX25CS001", "displayName": "Asha", "currentSemester": 1 }),
    );
    publish_marks(&mut stdin, &mut reader, "s1", "e1", 10.0);

    let lenient = request_ok(
        &mut stdin,
        &mut reader,
        "2",
        "eligibility.promotion",
        json!({ "studentId": "s1", "fromSemester": 1, "toSemester": 2 }),
    );
    assert_eq!(lenient.get("decision").and_then(|v| v.as_str()), Some("eligible"));

    request_ok(
        &mut stdin,
        &mut reader,
        "3",
        "policy.set",
        json!({ "policy": { "backlogThreshold": 0 } }),
    );
    let strict = request_ok(
        &mut stdin,
        &mut reader,
        "4",
        "batch.promote",
        json!({ "studentIds": ["s1"], "fromSemester": 1, "toSemester": 2 }),
    );
    assert_eq!(strict.get("succeeded").and_then(|v| v.as_u64()), Some(0));
}
