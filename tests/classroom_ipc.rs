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
    let exe = env!("CARGO_BIN_EXE_ledgerd");
    let mut child = Command::new(exe)
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .spawn()
        .expect("spawn ledgerd");
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
    assert_eq!(
        value.get("ok").and_then(|v| v.as_bool()),
        Some(true),
        "{} failed: {}",
        method,
        value
    );
    value.get("result").cloned().unwrap_or_else(|| json!({}))
}

fn register(stdin: &mut ChildStdin, reader: &mut BufReader<ChildStdout>, name: &str, email: &str) -> String {
    let res = request_ok(
        stdin,
        reader,
        "register",
        "auth.register",
        json!({ "name": name, "email": email, "password": "secret9" }),
    );
    res["user"]["id"].as_str().expect("user id").to_string()
}

fn login(stdin: &mut ChildStdin, reader: &mut BufReader<ChildStdout>, email: &str, password: &str) {
    request_ok(
        stdin,
        reader,
        "login",
        "auth.login",
        json!({ "email": email, "password": password }),
    );
}

fn visible_tasks(stdin: &mut ChildStdin, reader: &mut BufReader<ChildStdout>, student_id: &str) -> usize {
    let res = request_ok(
        stdin,
        reader,
        "visible",
        "assignments.forStudent",
        json!({ "studentId": student_id }),
    );
    res["tasks"].as_array().map(|t| t.len()).unwrap_or(0)
}

#[test]
fn group_targeting_follows_membership() {
    let workspace = temp_dir("ledgerd-groups");
    let (_child, mut stdin, mut reader) = spawn_sidecar();
    request_ok(
        &mut stdin,
        &mut reader,
        "select",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );
    let sardor = register(&mut stdin, &mut reader, "Sardor", "sardor@example.com");
    let nilufar = register(&mut stdin, &mut reader, "Nilufar", "nilufar@example.com");
    login(&mut stdin, &mut reader, "admin@ledger.local", "admin123");

    let group = request_ok(
        &mut stdin,
        &mut reader,
        "group",
        "groups.create",
        json!({ "name": "Morning", "studentIds": [sardor] }),
    );
    let group_id = group["group"]["id"].as_str().expect("group id").to_string();
    assert_eq!(group["group"]["studentCount"], 1);

    request_ok(
        &mut stdin,
        &mut reader,
        "task",
        "tasks.create",
        json!({ "title": "Morning drill", "groupId": group_id, "reward": 80 }),
    );
    assert_eq!(visible_tasks(&mut stdin, &mut reader, &sardor), 1);
    assert_eq!(visible_tasks(&mut stdin, &mut reader, &nilufar), 0);

    request_ok(
        &mut stdin,
        &mut reader,
        "assign",
        "groups.assignStudent",
        json!({ "groupId": group_id, "studentId": nilufar }),
    );
    request_ok(
        &mut stdin,
        &mut reader,
        "remove",
        "groups.removeStudent",
        json!({ "groupId": group_id, "studentId": sardor }),
    );
    assert_eq!(visible_tasks(&mut stdin, &mut reader, &sardor), 0);
    assert_eq!(visible_tasks(&mut stdin, &mut reader, &nilufar), 1);

    let groups = request_ok(&mut stdin, &mut reader, "groups", "groups.list", json!({}));
    assert_eq!(groups["groups"][0]["studentIds"], json!([nilufar]));

    request_ok(
        &mut stdin,
        &mut reader,
        "delete",
        "groups.delete",
        json!({ "groupId": group_id }),
    );
    let students = request_ok(&mut stdin, &mut reader, "students", "students.list", json!({}));
    for s in students["students"].as_array().expect("students array") {
        assert!(s["groupId"].is_null(), "student still grouped: {}", s);
    }

    let _ = std::fs::remove_dir_all(workspace);
}

#[test]
fn attendance_fines_lock_and_notify() {
    let workspace = temp_dir("ledgerd-attendance");
    let (_child, mut stdin, mut reader) = spawn_sidecar();
    request_ok(
        &mut stdin,
        &mut reader,
        "select",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );
    let sardor = register(&mut stdin, &mut reader, "Sardor", "sardor@example.com");
    login(&mut stdin, &mut reader, "admin@ledger.local", "admin123");
    request_ok(
        &mut stdin,
        &mut reader,
        "seed",
        "coins.adjust",
        json!({ "studentId": sardor, "amount": 1000, "reason": "starting balance" }),
    );

    let absent = request_ok(
        &mut stdin,
        &mut reader,
        "absent",
        "attendance.mark",
        json!({ "studentId": sardor, "date": "2026-10-05", "status": "absent" }),
    );
    assert_eq!(absent["record"]["fineAmount"], 500);
    assert_eq!(absent["record"]["id"], format!("{}_2026-10-05", sardor));

    request_ok(
        &mut stdin,
        &mut reader,
        "late",
        "attendance.mark",
        json!({ "studentId": sardor, "date": "2026-10-05", "status": "late" }),
    );
    let report = request_ok(
        &mut stdin,
        &mut reader,
        "reconcile",
        "students.reconcile",
        json!({ "studentId": sardor }),
    );
    assert_eq!(report["rating"], 900);
    assert_eq!(report["consistent"], true);

    let wrong = request(
        &mut stdin,
        &mut reader,
        "confirm-wrong",
        "attendance.confirm",
        json!({ "date": "2026-10-05", "password": "guess" }),
    );
    assert_eq!(wrong["error"]["code"], "wrong_password");
    let confirmed = request_ok(
        &mut stdin,
        &mut reader,
        "confirm",
        "attendance.confirm",
        json!({ "date": "2026-10-05", "password": "admin123" }),
    );
    assert_eq!(confirmed["confirmation"]["recordsCount"], 1);

    let locked = request(
        &mut stdin,
        &mut reader,
        "locked",
        "attendance.mark",
        json!({ "studentId": sardor, "date": "2026-10-05", "status": "present" }),
    );
    assert_eq!(locked["error"]["code"], "invalid_state");
    let listed = request_ok(
        &mut stdin,
        &mut reader,
        "list",
        "attendance.list",
        json!({ "date": "2026-10-05" }),
    );
    assert_eq!(listed["lockedDates"], json!(["2026-10-05"]));
    assert_eq!(listed["records"][0]["status"], "late");

    login(&mut stdin, &mut reader, "sardor@example.com", "secret9");
    let inbox = request_ok(&mut stdin, &mut reader, "inbox", "notifications.list", json!({}));
    let unread = inbox["unread"].as_u64().expect("unread count");
    assert!(unread >= 2, "expected fine notifications: {}", inbox);
    let first_id = inbox["notifications"][0]["id"].as_str().expect("notification id").to_string();
    request_ok(
        &mut stdin,
        &mut reader,
        "read",
        "notifications.markRead",
        json!({ "notificationId": first_id }),
    );
    let inbox = request_ok(&mut stdin, &mut reader, "inbox-2", "notifications.list", json!({}));
    assert_eq!(inbox["unread"].as_u64(), Some(unread - 1));

    let _ = std::fs::remove_dir_all(workspace);
}
