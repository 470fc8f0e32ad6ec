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
fn workshop_scan_toggles_between_join_and_leave() {
    let workspace = temp_dir("dernek-toggle-flow");
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
    let member = request_ok(
        &mut stdin,
        &mut reader,
        "2",
        "members.create",
        json!({ "firstName": "Zeynep", "lastName": "Arslan", "role": "student" }),
        Some(admin.clone()),
    );
    let member_id = member
        .get("memberId")
        .and_then(|v| v.as_str())
        .expect("memberId")
        .to_string();

    // Workshops default to the toggle policy without asking for it.
    let session = request_ok(
        &mut stdin,
        &mut reader,
        "3",
        "sessions.create",
        json!({ "title": "Robotik Atölyesi", "kind": "workshop" }),
        Some(admin),
    );
    assert_eq!(
        session.get("checkinPolicy").and_then(|v| v.as_str()),
        Some("toggle")
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

    let actor = json!({ "memberId": member_id, "roles": ["student"] });
    let join = request_ok(
        &mut stdin,
        &mut reader,
        "4",
        "checkin.scan",
        json!({ "token": token }),
        Some(actor.clone()),
    );
    assert_eq!(join.get("attended").and_then(|v| v.as_bool()), Some(true));

    let after_join = request_ok(
        &mut stdin,
        &mut reader,
        "5",
        "attendance.list",
        json!({ "sessionId": session_id }),
        None,
    );
    assert_eq!(
        after_join
            .get("attendees")
            .and_then(|v| v.as_array())
            .expect("attendees")
            .len(),
        1
    );

    // Second scan reverses the first: join becomes leave, zero rows remain.
    let leave = request_ok(
        &mut stdin,
        &mut reader,
        "6",
        "checkin.scan",
        json!({ "token": token }),
        Some(actor.clone()),
    );
    assert_eq!(leave.get("attended").and_then(|v| v.as_bool()), Some(false));

    let after_leave = request_ok(
        &mut stdin,
        &mut reader,
        "7",
        "attendance.list",
        json!({ "sessionId": session_id }),
        None,
    );
    assert_eq!(
        after_leave
            .get("attendees")
            .and_then(|v| v.as_array())
            .expect("attendees")
            .len(),
        0
    );

    // A third scan joins again.
    let rejoin = request_ok(
        &mut stdin,
        &mut reader,
        "8",
        "checkin.scan",
        json!({ "token": token }),
        Some(actor),
    );
    assert_eq!(rejoin.get("attended").and_then(|v| v.as_bool()), Some(true));

    drop(stdin);
    let _ = child.wait();
    let _ = std::fs::remove_dir_all(workspace);
}
