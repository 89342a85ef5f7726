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

fn login_admin(stdin: &mut ChildStdin, reader: &mut BufReader<ChildStdout>) {
    request_ok(
        stdin,
        reader,
        "login",
        "auth.login",
        json!({ "email": "admin@ledger.local", "password": "admin123" }),
    );
}

#[test]
fn export_then_import_restores_balances_and_ends_session() {
    let workspace = temp_dir("ledgerd-backup-ipc");
    let out_dir = temp_dir("ledgerd-backup-ipc-out");
    let (_child, mut stdin, mut reader) = spawn_sidecar();

    request_ok(
        &mut stdin,
        &mut reader,
        "select",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );
    let student = request_ok(
        &mut stdin,
        &mut reader,
        "reg",
        "auth.register",
        json!({ "name": "Malika", "email": "malika@example.com", "password": "secret5" }),
    );
    let student_id = student["user"]["id"].as_str().expect("student id").to_string();

    let denied = request(
        &mut stdin,
        &mut reader,
        "export-denied",
        "backup.export",
        json!({ "outPath": out_dir.join("denied.zip").to_string_lossy() }),
    );
    assert_eq!(denied["error"]["code"], "forbidden");

    login_admin(&mut stdin, &mut reader);
    request_ok(
        &mut stdin,
        &mut reader,
        "adjust-1",
        "coins.adjust",
        json!({ "studentId": student_id, "amount": 250, "reason": "welcome" }),
    );

    let bundle = out_dir.join("ledger-backup.zip");
    let export = request_ok(
        &mut stdin,
        &mut reader,
        "export",
        "backup.export",
        json!({ "outPath": bundle.to_string_lossy() }),
    );
    assert_eq!(export["bundleFormat"], "ledger-workspace-v1");
    assert_eq!(export["entryCount"], 3);
    assert!(bundle.is_file());

    request_ok(
        &mut stdin,
        &mut reader,
        "adjust-2",
        "coins.adjust",
        json!({ "studentId": student_id, "amount": 700, "reason": "after backup" }),
    );

    let missing = request(
        &mut stdin,
        &mut reader,
        "import-missing",
        "backup.import",
        json!({ "inPath": out_dir.join("nope.zip").to_string_lossy() }),
    );
    assert_eq!(missing["error"]["code"], "not_found");

    let import = request_ok(
        &mut stdin,
        &mut reader,
        "import",
        "backup.import",
        json!({ "inPath": bundle.to_string_lossy() }),
    );
    assert_eq!(import["bundleFormatDetected"], "ledger-workspace-v1");
    assert!(import["collections"].as_u64().unwrap_or(0) > 0);

    let me = request_ok(&mut stdin, &mut reader, "whoami", "auth.whoami", json!({}));
    assert!(me["user"].is_null());

    login_admin(&mut stdin, &mut reader);
    let txs = request_ok(
        &mut stdin,
        &mut reader,
        "txs",
        "coins.transactions",
        json!({ "studentId": student_id }),
    );
    let txs = txs["transactions"].as_array().expect("transactions array");
    assert_eq!(txs.len(), 1);
    assert_eq!(txs[0]["amount"], 250);
    let report = request_ok(
        &mut stdin,
        &mut reader,
        "reconcile",
        "students.reconcile",
        json!({ "studentId": student_id }),
    );
    assert_eq!(report["rating"], 250);
    assert_eq!(report["consistent"], true);

    let _ = std::fs::remove_dir_all(workspace);
    let _ = std::fs::remove_dir_all(out_dir);
}
