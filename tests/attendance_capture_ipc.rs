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

fn with_student(dir: &Path) -> (Child, ChildStdin, BufReader<ChildStdout>, String) {
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
    request_ok(&mut stdin, &mut reader, "eb", "enrollment.begin", json!({}));
    request_ok(&mut stdin, &mut reader, "ec", "enrollment.capture", json!({ "imageData": FACE }));
    let done = request_ok(
        &mut stdin,
        &mut reader,
        "es",
        "enrollment.submit",
        json!({
            "fullName": "Asha Verma",
            "gender": "Female",
            "dateOfBirth": "2015-04-02",
            "classId": "1",
            "section": "A",
            "fatherName": "Ravi Verma",
            "motherName": "Meena Verma",
        }),
    );
    let id = done["student"]["id"].as_str().expect("student id").to_string();
    (child, stdin, reader, id)
}

#[test]
fn manual_marking_is_once_per_day() {
    let dir = temp_dir("edufaced-attendance-manual");
    let (mut child, mut stdin, mut reader, student_id) = with_student(&dir);

    let first = request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "attendance.mark",
        json!({ "studentId": student_id, "date": "2024-06-03" }),
    );
    assert_eq!(first["alreadyMarked"], json!(false));
    assert_eq!(first["attendance"]["markedBy"], json!("Manual"));
    assert_eq!(first["attendance"]["status"], json!("Present"));

    let second = request_ok(
        &mut stdin,
        &mut reader,
        "2",
        "attendance.mark",
        json!({ "studentId": student_id, "date": "2024-06-03", "status": "Absent" }),
    );
    assert_eq!(second["alreadyMarked"], json!(true));
    assert_eq!(second["attendance"]["status"], json!("Present"));
    assert_eq!(second["attendance"]["id"], first["attendance"]["id"]);

    request_ok(
        &mut stdin,
        &mut reader,
        "3",
        "attendance.mark",
        json!({ "studentId": student_id, "date": "2024-06-04", "status": "Absent" }),
    );
    let slashed = request(
        &mut stdin,
        &mut reader,
        "3a",
        "attendance.mark",
        json!({ "studentId": student_id, "date": "06/05/2024" }),
    );
    assert_eq!(error_code(&slashed), "bad_params");
    let impossible = request(
        &mut stdin,
        &mut reader,
        "3b",
        "attendance.today",
        json!({ "date": "2024-13-01" }),
    );
    assert_eq!(error_code(&impossible), "bad_params");

    let unknown = request(
        &mut stdin,
        &mut reader,
        "4",
        "attendance.mark",
        json!({ "studentId": "STU-NOBODY" }),
    );
    assert_eq!(error_code(&unknown), "not_found");

    let day = request_ok(
        &mut stdin,
        &mut reader,
        "5",
        "attendance.today",
        json!({ "date": "2024-06-03" }),
    );
    let records = day["records"].as_array().expect("records");
    assert_eq!(records.len(), 1);
    assert_eq!(records[0]["fullName"], json!("Asha Verma"));

    let summary = request_ok(&mut stdin, &mut reader, "6", "reports.attendanceSummary", json!({}));
    assert_eq!(summary["rows"][0]["presents"], json!(1));
    assert_eq!(summary["rows"][0]["absents"], json!(1));
    assert_eq!(summary["rows"][0]["total"], json!(2));

    let dash = request_ok(
        &mut stdin,
        &mut reader,
        "7",
        "reports.dashboard",
        json!({ "date": "2024-06-03" }),
    );
    assert_eq!(dash["presentToday"], json!(1));

    drop(stdin);
    let _ = child.wait();
}

#[test]
fn scanner_needs_an_announced_camera() {
    let dir = temp_dir("edufaced-scanner-nodevice");
    let (mut child, mut stdin, mut reader, _) = with_student(&dir);

    let none = request(&mut stdin, &mut reader, "1", "scanner.start", json!({}));
    assert_eq!(error_code(&none), "capture_unavailable");
    assert_eq!(none["error"]["details"]["reason"], json!("no_device"));

    request_ok(
        &mut stdin,
        &mut reader,
        "2",
        "capture.announce",
        json!({ "facings": ["front"], "denied": true }),
    );
    let denied = request(&mut stdin, &mut reader, "3", "scanner.start", json!({}));
    assert_eq!(error_code(&denied), "capture_unavailable");
    assert_eq!(denied["error"]["details"]["reason"], json!("permission_denied"));

    let status = request_ok(&mut stdin, &mut reader, "4", "scanner.status", json!({}));
    assert_eq!(status["phase"], json!("stopped"));
    assert_eq!(status["running"], json!(false));
    assert_eq!(status["liveCaptureStreams"], json!(0));

    drop(stdin);
    let _ = child.wait();
}

#[test]
fn scanner_start_switch_stop_releases_camera() {
    let dir = temp_dir("edufaced-scanner-lifecycle");
    let (mut child, mut stdin, mut reader, _) = with_student(&dir);

    let announced = request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "capture.announce",
        json!({ "facings": ["front", "rear"] }),
    );
    assert_eq!(announced["denied"], json!(false));

    let started = request_ok(&mut stdin, &mut reader, "2", "scanner.start", json!({ "facing": "front" }));
    assert_eq!(started["running"], json!(true));
    assert_eq!(started["facing"], json!("front"));
    assert_eq!(started["liveCaptureStreams"], json!(1));

    let busy = request(&mut stdin, &mut reader, "3", "scanner.start", json!({}));
    assert_eq!(error_code(&busy), "scanner_busy");

    let frame = request_ok(
        &mut stdin,
        &mut reader,
        "4",
        "capture.frame",
        json!({ "facing": "front", "imageData": FACE }),
    );
    assert_eq!(frame["accepted"], json!(true));

    let switched = request_ok(&mut stdin, &mut reader, "5", "scanner.switchCamera", json!({}));
    assert_eq!(switched["facing"], json!("rear"));
    assert_eq!(switched["running"], json!(true));
    assert_eq!(switched["liveCaptureStreams"], json!(1));

    let stopped = request_ok(&mut stdin, &mut reader, "6", "scanner.stop", json!({}));
    assert_eq!(stopped["running"], json!(false));
    assert_eq!(stopped["phase"], json!("stopped"));
    assert_eq!(stopped["liveCaptureStreams"], json!(0));

    let health = request_ok(&mut stdin, &mut reader, "7", "health", json!({}));
    assert_eq!(health["liveCaptureStreams"], json!(0));

    drop(stdin);
    let _ = child.wait();
}

#[test]
fn signing_out_stops_the_scanner() {
    let dir = temp_dir("edufaced-scanner-logout");
    let (mut child, mut stdin, mut reader, _) = with_student(&dir);

    request_ok(&mut stdin, &mut reader, "1", "capture.announce", json!({ "facings": ["front"] }));
    request_ok(&mut stdin, &mut reader, "2", "scanner.start", json!({}));
    request_ok(&mut stdin, &mut reader, "3", "session.logout", json!({}));

    let health = request_ok(&mut stdin, &mut reader, "4", "health", json!({}));
    assert_eq!(health["liveCaptureStreams"], json!(0));
    assert_eq!(health["signedIn"], json!(false));

    drop(stdin);
    let _ = child.wait();
}
