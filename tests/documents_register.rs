use serde_json::json;
use sha2::{Digest, Sha256};
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
    let exe = env!("CARGO_BIN_EXE_dernekd");
    let mut child = Command::new(exe)
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .spawn()
        .expect("spawn dernekd");
    let stdin = child.stdin.take().expect("child stdin");
    let stdout = child.stdout.take().expect("child stdout");
    (child, stdin, BufReader::new(stdout))
}

fn request_ok(
    stdin: &mut ChildStdin,
    reader: &mut BufReader<ChildStdout>,
    id: &str,
    method: &str,
    params: serde_json::Value,
    actor: Option<serde_json::Value>,
) -> serde_json::Value {
    let mut payload = json!({ "id": id, "method": method, "params": params });
    if let Some(actor) = actor {
        payload["actor"] = actor;
    }
    writeln!(stdin, "{}", payload).expect("write request");
    stdin.flush().expect("flush request");
    let mut line = String::new();
    reader.read_line(&mut line).expect("read response line");
    let value: serde_json::Value = serde_json::from_str(line.trim()).expect("parse response json");
    assert!(
        value.get("ok").and_then(|v| v.as_bool()).unwrap_or(false),
        "{} failed: {}",
        method,
        value
    );
    value.get("result").cloned().unwrap_or_else(|| json!({}))
}

#[test]
fn registered_document_digest_matches_and_role_scoping_filters_lists() {
    let workspace = temp_dir("dernek-documents");
    let (mut child, mut stdin, mut reader) = spawn_sidecar();
    let admin = json!({ "memberId": "operator", "roles": ["admin"] });

    request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
        None,
    );

    let body = b"2026 bahar donemi faaliyet raporu";
    let doc_path = workspace.join("faaliyet-raporu.pdf");
    std::fs::write(&doc_path, body).expect("write document");
    let expected_digest = {
        let mut hasher = Sha256::new();
        hasher.update(body);
        hasher
            .finalize()
            .iter()
            .map(|b| format!("{:02x}", b))
            .collect::<String>()
    };

    let registered = request_ok(
        &mut stdin,
        &mut reader,
        "2",
        "documents.register",
        json!({
            "path": doc_path.to_string_lossy(),
            "title": "Faaliyet Raporu",
            "sharedWithRole": "board"
        }),
        Some(admin.clone()),
    );
    assert_eq!(
        registered.get("sha256").and_then(|v| v.as_str()),
        Some(expected_digest.as_str())
    );
    assert_eq!(
        registered.get("byteSize").and_then(|v| v.as_i64()),
        Some(body.len() as i64)
    );
    assert_eq!(
        registered.get("fileName").and_then(|v| v.as_str()),
        Some("faaliyet-raporu.pdf")
    );

    // Board members see the board-scoped document; students don't.
    let board_view = request_ok(
        &mut stdin,
        &mut reader,
        "3",
        "documents.list",
        json!({}),
        Some(json!({ "memberId": "board-1", "roles": ["board"] })),
    );
    assert_eq!(
        board_view
            .get("documents")
            .and_then(|v| v.as_array())
            .expect("documents")
            .len(),
        1
    );

    let student_view = request_ok(
        &mut stdin,
        &mut reader,
        "4",
        "documents.list",
        json!({}),
        Some(json!({ "memberId": "student-1", "roles": ["student"] })),
    );
    assert_eq!(
        student_view
            .get("documents")
            .and_then(|v| v.as_array())
            .expect("documents")
            .len(),
        0
    );

    let admin_view = request_ok(
        &mut stdin,
        &mut reader,
        "5",
        "documents.list",
        json!({}),
        Some(admin),
    );
    assert_eq!(
        admin_view
            .get("documents")
            .and_then(|v| v.as_array())
            .expect("documents")
            .len(),
        1
    );

    drop(stdin);
    let _ = child.wait();
    let _ = std::fs::remove_dir_all(workspace);
}
