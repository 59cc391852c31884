use serde_json::json;
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};
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

fn spawn_sidecar(dir: &Path) -> (Child, ChildStdin, BufReader<ChildStdout>) {
    let config = dir.join("edufaced.toml");
    std::fs::write(
        &config,
        "[scanner]\nmatch_dwell_ms = 20\nno_match_delay_ms = 20\n",
    )
    .expect("write config");
    let exe = env!("CARGO_BIN_EXE_edufaced");
    let mut child = Command::new(exe)
        .arg("--config")
        .arg(&config)
        .env_remove("EDUFACED_CONFIG")
        .env_remove("EDUFACED_WORKSPACE")
        .env_remove("EDUFACED_API_KEY")
        .env_remove("GEMINI_API_KEY")
        .env_remove("EDUFACED_REMOTE_URL")
        .env_remove("RUST_LOG")
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .spawn()
        .expect("spawn edufaced");
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
    assert!(!line.trim().is_empty(), "empty response for {}", method);
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
    assert_eq!(
        value.get("ok").and_then(|v| v.as_bool()),
        Some(true),
        "{} failed: {}",
        method,
        value
    );
    value.get("result").cloned().unwrap_or(serde_json::Value::Null)
}

fn error_code(value: &serde_json::Value) -> &str {
    value
        .get("error")
        .and_then(|e| e.get("code"))
        .and_then(|v| v.as_str())
        .unwrap_or("")
}

const FACE: &str = "data:image/png;base64,iVBORw0KGgoAAAANSUhEUgAAAAEAAAABCAYAAAAfFcSJAAAADUlEQVR42mP8z8BQDwAEhQGAhKmMIQAAAABJRU5ErkJggg==";

fn signed_in(dir: &Path) -> (Child, ChildStdin, BufReader<ChildStdout>) {
    let (child, mut stdin, mut reader) = spawn_sidecar(dir);
    request_ok(
        &mut stdin,
        &mut reader,
        "ws",
        "workspace.select",
        json!({ "path": dir.join("ws").to_string_lossy() }),
    );
    request_ok(
        &mut stdin,
        &mut reader,
        "reg",
        "session.register",
        json!({ "schoolName": "Greenwood High", "handle": "admin1", "secret": "pa55" }),
    );
    (child, stdin, reader)
}

fn asha_form() -> serde_json::Value {
    json!({
        "fullName": "Asha Verma",
        "gender": "Female",
        "dateOfBirth": "2015-04-02",
        "classId": "1",
        "section": "A",
        "fatherName": "Ravi Verma",
        "motherName": "Meena Verma",
    })
}

fn enroll(
    stdin: &mut ChildStdin,
    reader: &mut BufReader<ChildStdout>,
    form: serde_json::Value,
) -> serde_json::Value {
    request_ok(stdin, reader, "b", "enrollment.begin", json!({}));
    request_ok(stdin, reader, "c", "enrollment.capture", json!({ "imageData": FACE }));
    request_ok(stdin, reader, "s", "enrollment.submit", form)
}

#[test]
fn enrollment_commits_student_with_fee_record() {
    let dir = temp_dir("edufaced-enroll-commit");
    let (mut child, mut stdin, mut reader) = signed_in(&dir);

    let begun = request_ok(&mut stdin, &mut reader, "1", "enrollment.begin", json!({}));
    assert_eq!(begun["state"], json!("capturing"));
    assert_eq!(begun["hasCapture"], json!(false));

    let early = request(&mut stdin, &mut reader, "2", "enrollment.submit", asha_form());
    assert_eq!(error_code(&early), "validation_failed");

    let captured = request_ok(
        &mut stdin,
        &mut reader,
        "3",
        "enrollment.capture",
        json!({ "imageData": FACE }),
    );
    assert_eq!(captured["state"], json!("captured"));
    assert_eq!(captured["hasCapture"], json!(true));

    let done = request_ok(&mut stdin, &mut reader, "4", "enrollment.submit", asha_form());
    let student_id = done["student"]["id"].as_str().expect("student id").to_string();
    assert!(student_id.starts_with("STU-"));
    assert_eq!(done["student"]["faceReference"], json!(FACE));
    assert_eq!(done["fee"]["totalFees"], json!(50000));
    assert_eq!(done["fee"]["paidAmount"], json!(0));
    assert_eq!(done["fee"]["academicYear"], json!("2024-25"));

    let status = request_ok(&mut stdin, &mut reader, "5", "enrollment.status", json!({}));
    assert_eq!(status["state"], json!("committed"));
    let resubmit = request(&mut stdin, &mut reader, "6", "enrollment.submit", asha_form());
    assert_eq!(error_code(&resubmit), "invalid_state");

    let listed = request_ok(&mut stdin, &mut reader, "7", "students.list", json!({ "classId": "1" }));
    assert_eq!(listed["students"].as_array().map(|a| a.len()), Some(1));
    let other = request_ok(&mut stdin, &mut reader, "8", "students.list", json!({ "classId": "2" }));
    assert_eq!(other["students"].as_array().map(|a| a.len()), Some(0));

    let profile = request_ok(
        &mut stdin,
        &mut reader,
        "9",
        "students.get",
        json!({ "studentId": student_id }),
    );
    assert_eq!(profile["student"]["fullName"], json!("Asha Verma"));
    assert_eq!(profile["class"]["className"], json!("Class 1"));
    assert_eq!(profile["fee"]["totalFees"], json!(50000));

    drop(stdin);
    let _ = child.wait();
}

#[test]
fn enrollment_rejects_bad_forms_without_writing() {
    let dir = temp_dir("edufaced-enroll-invalid");
    let (mut child, mut stdin, mut reader) = signed_in(&dir);

    request_ok(&mut stdin, &mut reader, "1", "enrollment.begin", json!({}));
    let bad_image = request(
        &mut stdin,
        &mut reader,
        "2",
        "enrollment.capture",
        json!({ "imageData": "data:image/png;base64,@@@" }),
    );
    assert_eq!(error_code(&bad_image), "validation_failed");
    request_ok(&mut stdin, &mut reader, "3", "enrollment.capture", json!({ "imageData": FACE }));

    let mut unborn = asha_form();
    unborn["dateOfBirth"] = json!("2999-01-01");
    let r = request(&mut stdin, &mut reader, "4", "enrollment.submit", unborn);
    assert_eq!(error_code(&r), "validation_failed");

    let mut no_section = asha_form();
    no_section["section"] = json!("Z");
    let r = request(&mut stdin, &mut reader, "5", "enrollment.submit", no_section);
    assert_eq!(error_code(&r), "validation_failed");

    let mut nameless = asha_form();
    nameless["fullName"] = json!("   ");
    let r = request(&mut stdin, &mut reader, "6", "enrollment.submit", nameless);
    assert_eq!(error_code(&r), "validation_failed");

    let listed = request_ok(&mut stdin, &mut reader, "7", "students.list", json!({}));
    assert_eq!(listed["students"].as_array().map(|a| a.len()), Some(0));

    let retake = request_ok(&mut stdin, &mut reader, "8", "enrollment.retake", json!({}));
    assert_eq!(retake["state"], json!("capturing"));
    assert_eq!(retake["hasCapture"], json!(false));

    drop(stdin);
    let _ = child.wait();
}

#[test]
fn payments_reduce_balance_and_issue_receipts() {
    let dir = temp_dir("edufaced-fees-collect");
    let (mut child, mut stdin, mut reader) = signed_in(&dir);
    let done = enroll(&mut stdin, &mut reader, asha_form());
    let student_id = done["student"]["id"].as_str().expect("student id").to_string();

    let first = request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "fees.collect",
        json!({ "studentId": student_id, "amount": 20000, "paymentMode": "Online", "paymentDate": "2024-06-01" }),
    );
    let receipt = &first["receipt"];
    assert!(receipt["receiptNumber"].as_str().expect("receipt").starts_with("REC-"));
    assert_eq!(receipt["amountPaid"], json!(20000));
    assert_eq!(receipt["paidAmount"], json!(20000));
    assert_eq!(receipt["balance"], json!(30000));
    assert_eq!(receipt["paymentMode"], json!("Online"));

    let too_much = request(
        &mut stdin,
        &mut reader,
        "2",
        "fees.collect",
        json!({ "studentId": student_id, "amount": 40000 }),
    );
    assert_eq!(error_code(&too_much), "exceeds_balance");
    let zero = request(
        &mut stdin,
        &mut reader,
        "3",
        "fees.collect",
        json!({ "studentId": student_id, "amount": 0 }),
    );
    assert_eq!(error_code(&zero), "validation_failed");
    let vague = request(
        &mut stdin,
        &mut reader,
        "3a",
        "fees.collect",
        json!({ "studentId": student_id, "amount": 100, "paymentDate": "yesterday" }),
    );
    assert_eq!(error_code(&vague), "bad_params");
    let ghost = request(
        &mut stdin,
        &mut reader,
        "4",
        "fees.collect",
        json!({ "studentId": "STU-NOBODY", "amount": 100 }),
    );
    assert_eq!(error_code(&ghost), "no_fee_record");

    let rest = request_ok(
        &mut stdin,
        &mut reader,
        "5",
        "fees.collect",
        json!({ "studentId": student_id, "amount": 30000, "paymentDate": "2024-07-01" }),
    );
    assert_eq!(rest["receipt"]["balance"], json!(0));
    assert_ne!(rest["receipt"]["receiptNumber"], receipt["receiptNumber"]);

    let history = request_ok(
        &mut stdin,
        &mut reader,
        "6",
        "fees.history",
        json!({ "studentId": student_id }),
    );
    let payments = history["payments"].as_array().expect("payments");
    assert_eq!(payments.len(), 2);
    assert_eq!(payments[0]["amountPaid"], json!(30000));

    let ledger = request_ok(&mut stdin, &mut reader, "7", "fees.ledger", json!({}));
    let rows = ledger["rows"].as_array().expect("rows");
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0]["status"], json!("Paid"));
    assert_eq!(rows[0]["className"], json!("Class 1"));

    let report = request_ok(&mut stdin, &mut reader, "8", "reports.fees", json!({}));
    assert_eq!(report["rows"][0]["paid"], json!(50000));
    assert_eq!(report["rows"][0]["pending"], json!(0));

    let dash = request_ok(&mut stdin, &mut reader, "9", "reports.dashboard", json!({}));
    assert_eq!(dash["totalStudents"], json!(1));
    assert_eq!(dash["feesCollected"], json!(50000));
    assert_eq!(dash["feesPending"], json!(0));
    assert_eq!(dash["defaulters"], json!(0));
    assert_eq!(dash["schoolName"], json!("Greenwood High"));

    drop(stdin);
    let _ = child.wait();
}

#[test]
fn fee_structures_and_classes_are_editable() {
    let dir = temp_dir("edufaced-fees-structures");
    let (mut child, mut stdin, mut reader) = signed_in(&dir);

    let saved = request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "classes.upsert",
        json!({ "className": "Class 3", "sections": "A, B, C", "classTeacherName": "Mr. Das" }),
    );
    let class_id = saved["class"]["id"].as_str().expect("class id").to_string();
    assert_eq!(saved["class"]["sections"], json!(["A", "B", "C"]));

    request_ok(
        &mut stdin,
        &mut reader,
        "2",
        "feeStructures.upsert",
        json!({ "classId": class_id, "academicYear": "2025-26", "totalFees": 62000 }),
    );
    let listed = request_ok(&mut stdin, &mut reader, "3", "feeStructures.list", json!({}));
    let rows = listed["feeStructures"].as_array().expect("fee structures");
    assert_eq!(rows.len(), 3);
    assert!(rows
        .iter()
        .any(|r| r["classId"] == json!(class_id) && r["className"] == json!("Class 3")));

    let fractional = request(
        &mut stdin,
        &mut reader,
        "4",
        "feeStructures.upsert",
        json!({ "classId": class_id, "academicYear": "2025-26", "totalFees": 10.5 }),
    );
    assert_eq!(error_code(&fractional), "bad_params");

    let mut form = asha_form();
    form["classId"] = json!(class_id);
    form["section"] = json!("C");
    let done = enroll(&mut stdin, &mut reader, form);
    assert_eq!(done["fee"]["totalFees"], json!(62000));
    assert_eq!(done["fee"]["dueDate"], json!("2025-12-31"));

    let in_use = request(&mut stdin, &mut reader, "5", "classes.delete", json!({ "classId": class_id }));
    assert_eq!(error_code(&in_use), "class_in_use");

    let drop_section = request(
        &mut stdin,
        &mut reader,
        "5a",
        "classes.upsert",
        json!({ "id": class_id, "className": "Class 3", "sections": ["A", "B"], "classTeacherName": "Mr. Das" }),
    );
    assert_eq!(error_code(&drop_section), "class_in_use");
    assert_eq!(drop_section["error"]["details"]["students"], json!(1));
    let kept = request_ok(&mut stdin, &mut reader, "5b", "classes.list", json!({}));
    let class3 = kept["classes"]
        .as_array()
        .expect("classes")
        .iter()
        .find(|c| c["id"] == json!(class_id))
        .cloned()
        .expect("class 3");
    assert_eq!(class3["sections"], json!(["A", "B", "C"]));

    let steal = request(
        &mut stdin,
        &mut reader,
        "5c",
        "feeStructures.upsert",
        json!({ "id": "1", "classId": "2", "academicYear": "2024-25", "totalFees": 51000 }),
    );
    assert_eq!(error_code(&steal), "validation_failed");
    let spare = request_ok(
        &mut stdin,
        &mut reader,
        "6",
        "classes.upsert",
        json!({ "className": "Class 4", "sections": ["A"], "classTeacherName": "Ms. Iyer" }),
    );
    let spare_id = spare["class"]["id"].as_str().expect("class id").to_string();
    let deleted = request_ok(&mut stdin, &mut reader, "7", "classes.delete", json!({ "classId": spare_id }));
    assert_eq!(deleted["deleted"], json!(spare_id));
    let missing = request(&mut stdin, &mut reader, "8", "classes.delete", json!({ "classId": spare_id }));
    assert_eq!(error_code(&missing), "not_found");

    drop(stdin);
    let _ = child.wait();
}
