use serde_json::json;
use std::fs::File;
use std::io::{BufRead, BufReader, Read, Write};
use std::path::PathBuf;
use std::process::{Child, ChildStdin, ChildStdout, Command, Stdio};
use std::time::{SystemTime, UNIX_EPOCH};
use zip::ZipArchive;

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
fn bundle_round_trip_preserves_attendance() {
    let source = temp_dir("dernek-backup-src");
    let restored = temp_dir("dernek-backup-dst");
    let bundle = source.join("backup.dernekbackup.zip");
    let (mut child, mut stdin, mut reader) = spawn_sidecar();
    let admin = json!({ "memberId": "operator", "roles": ["admin"] });

    request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "workspace.select",
        json!({ "path": source.to_string_lossy() }),
        None,
    );
    let member = request_ok(
        &mut stdin,
        &mut reader,
        "2",
        "members.create",
        json!({ "firstName": "Elif", "lastName": "Aydın", "role": "student" }),
        Some(admin.clone()),
    );
    let member_id = member
        .get("memberId")
        .and_then(|v| v.as_str())
        .expect("memberId")
        .to_string();
    let session = request_ok(
        &mut stdin,
        &mut reader,
        "3",
        "sessions.create",
        json!({ "title": "Yedekleme Dersi", "kind": "lesson" }),
        Some(admin.clone()),
    );
    let session_id = session
        .get("sessionId")
        .and_then(|v| v.as_str())
        .expect("sessionId")
        .to_string();
    let token = session
        .get("checkInToken")
        .and_then(|v| v.as_str())
        .expect("checkInToken")
        .to_string();
    request_ok(
        &mut stdin,
        &mut reader,
        "4",
        "checkin.scan",
        json!({ "token": token }),
        Some(json!({ "memberId": member_id, "roles": ["student"] })),
    );

    let exported = request_ok(
        &mut stdin,
        &mut reader,
        "5",
        "backup.exportWorkspaceBundle",
        json!({
            "workspacePath": source.to_string_lossy(),
            "outPath": bundle.to_string_lossy()
        }),
        None,
    );
    assert_eq!(
        exported.get("bundleFormat").and_then(|v| v.as_str()),
        Some("dernek-workspace-v1")
    );
    assert_eq!(
        exported
            .get("counts")
            .and_then(|c| c.get("attendance"))
            .and_then(|v| v.as_i64()),
        Some(1)
    );

    // The bundle is a plain zip with a manifest, the database, and metadata.
    {
        let file = File::open(&bundle).expect("open bundle");
        let mut archive = ZipArchive::new(file).expect("read zip");
        let mut names: Vec<String> = (0..archive.len())
            .map(|i| archive.by_index(i).expect("entry").name().to_string())
            .collect();
        names.sort();
        assert_eq!(
            names,
            vec![
                "db/dernek.sqlite3".to_string(),
                "manifest.json".to_string(),
                "meta/workspace.json".to_string(),
            ]
        );
        let mut manifest_text = String::new();
        archive
            .by_name("manifest.json")
            .expect("manifest entry")
            .read_to_string(&mut manifest_text)
            .expect("read manifest");
        let manifest: serde_json::Value =
            serde_json::from_str(&manifest_text).expect("parse manifest");
        assert_eq!(
            manifest.get("format").and_then(|v| v.as_str()),
            Some("dernek-workspace-v1")
        );
        assert_eq!(
            manifest
                .get("counts")
                .and_then(|c| c.get("members"))
                .and_then(|v| v.as_i64()),
            Some(1)
        );
    }

    // Import into a fresh workspace and verify the data survived.
    request_ok(
        &mut stdin,
        &mut reader,
        "6",
        "backup.importWorkspaceBundle",
        json!({
            "workspacePath": restored.to_string_lossy(),
            "inPath": bundle.to_string_lossy()
        }),
        None,
    );
    request_ok(
        &mut stdin,
        &mut reader,
        "7",
        "workspace.select",
        json!({ "path": restored.to_string_lossy() }),
        None,
    );
    let attendance = request_ok(
        &mut stdin,
        &mut reader,
        "8",
        "attendance.list",
        json!({ "sessionId": session_id }),
        None,
    );
    let attendees = attendance
        .get("attendees")
        .and_then(|v| v.as_array())
        .expect("attendees");
    assert_eq!(attendees.len(), 1);
    assert_eq!(
        attendees[0].get("memberId").and_then(|v| v.as_str()),
        Some(member_id.as_str())
    );

    drop(stdin);
    let _ = child.wait();
    let _ = std::fs::remove_dir_all(source);
    let _ = std::fs::remove_dir_all(restored);
}
