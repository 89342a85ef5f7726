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

fn send(
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

/// Like `send`, but fails the test when the method has no route.
fn request(
    stdin: &mut ChildStdin,
    reader: &mut BufReader<ChildStdout>,
    id: &str,
    method: &str,
    params: serde_json::Value,
) -> serde_json::Value {
    let value = send(stdin, reader, id, method, params);
    if value.get("ok").and_then(|v| v.as_bool()) == Some(false) {
        let code = value
            .get("error")
            .and_then(|e| e.get("code"))
            .and_then(|v| v.as_str())
            .unwrap_or("unknown");
        assert_ne!(
            code, "not_implemented",
            "method {} is not routed: {}",
            method, value
        );
    }
    value
}

#[test]
fn every_method_is_routed() {
    let workspace = temp_dir("ledgerd-router-smoke");
    let (_child, mut stdin, mut reader) = spawn_sidecar();

    let selected = request(
        &mut stdin,
        &mut reader,
        "select",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );
    assert_eq!(selected["ok"], true);
    let login = request(
        &mut stdin,
        &mut reader,
        "login",
        "auth.login",
        json!({ "email": "admin@ledger.local", "password": "admin123" }),
    );
    assert_eq!(login["ok"], true);
    assert_eq!(login["result"]["user"]["role"], "admin");
    assert!(login["result"]["user"].get("passwordHash").is_none());

    let methods = [
        "health",
        "workspace.select",
        "connection.status",
        "connection.set",
        "settings.get",
        "settings.update",
        "data.get",
        "data.list",
        "data.set",
        "data.push",
        "data.update",
        "data.delete",
        "auth.whoami",
        "auth.register",
        "students.list",
        "students.rename",
        "students.remove",
        "students.reconcile",
        "groups.list",
        "groups.create",
        "groups.assignStudent",
        "groups.removeStudent",
        "groups.delete",
        "tasks.list",
        "tasks.create",
        "tasks.setStatus",
        "tasks.delete",
        "tasks.clear",
        "tasks.submit",
        "tasks.grade",
        "tasks.submissions",
        "tests.list",
        "tests.create",
        "tests.setStatus",
        "tests.delete",
        "tests.clear",
        "tests.submit",
        "tests.results",
        "projects.list",
        "projects.create",
        "projects.setStatus",
        "projects.delete",
        "projects.clear",
        "projects.submit",
        "projects.grade",
        "projects.submissions",
        "assignments.forStudent",
        "coins.adjust",
        "coins.fine",
        "coins.taskPenalty",
        "coins.transactions",
        "attendance.mark",
        "attendance.markMany",
        "attendance.confirm",
        "attendance.list",
        "payments.create",
        "payments.payWithCoins",
        "payments.confirm",
        "payments.penalty",
        "payments.list",
        "withdrawals.request",
        "withdrawals.approve",
        "withdrawals.reject",
        "withdrawals.list",
        "referrals.list",
        "referrals.approve",
        "referrals.reject",
        "notifications.list",
        "notifications.markRead",
        "notifications.send",
        "activity.list",
        "chat.send",
        "chat.list",
        "stats.overview",
        "stats.payments",
        "backup.export",
        "backup.import",
        "auth.login",
        "auth.logout",
    ];
    for (i, method) in methods.iter().enumerate() {
        request(&mut stdin, &mut reader, &format!("m{}", i), method, json!({}));
    }

    let unknown = send(&mut stdin, &mut reader, "unknown", "ledger.frobnicate", json!({}));
    assert_eq!(unknown["ok"], false);
    assert_eq!(unknown["error"]["code"], "not_implemented");

    let _ = std::fs::remove_dir_all(workspace);
}

#[test]
fn bad_json_and_missing_workspace_are_reported() {
    let (_child, mut stdin, mut reader) = spawn_sidecar();

    writeln!(stdin, "{{not json").expect("write garbage");
    stdin.flush().expect("flush");
    let mut line = String::new();
    reader.read_line(&mut line).expect("read response line");
    let value: serde_json::Value = serde_json::from_str(line.trim()).expect("parse response json");
    assert_eq!(value["error"]["code"], "bad_json");

    let health = request(&mut stdin, &mut reader, "1", "health", json!({}));
    assert_eq!(health["ok"], true);
    assert!(health["result"]["workspacePath"].is_null());

    let students = request(&mut stdin, &mut reader, "2", "students.list", json!({}));
    assert_eq!(students["error"]["code"], "no_workspace");
}
