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
fn decisions_keep_insertion_order_and_track_status() {
    let workspace = temp_dir("dernek-meetings");
    let (mut child, mut stdin, mut reader) = spawn_sidecar();
    let board = json!({ "memberId": "board-1", "roles": ["admin", "board"] });

    request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
        None,
    );
    let owner = request_ok(
        &mut stdin,
        &mut reader,
        "2",
        "members.create",
        json!({ "firstName": "Hasan", "lastName": "Koç", "role": "board" }),
        Some(board.clone()),
    )
    .get("memberId")
    .and_then(|v| v.as_str())
    .expect("memberId")
    .to_string();

    let meeting = request_ok(
        &mut stdin,
        &mut reader,
        "3",
        "meetings.create",
        json!({ "title": "Yönetim Kurulu Mart", "heldAt": "2026-03-05T19:00:00+00:00" }),
        Some(board.clone()),
    );
    let meeting_id = meeting
        .get("meetingId")
        .and_then(|v| v.as_str())
        .expect("meetingId")
        .to_string();

    let mut decision_ids = Vec::new();
    for (id, desc) in [
        ("4", "Bahar şenliği bütçesi onaylandı"),
        ("5", "Yeni atölye malzemeleri alınacak"),
        ("6", "Bağış kampanyası başlatılacak"),
    ] {
        let added = request_ok(
            &mut stdin,
            &mut reader,
            id,
            "meetings.decisions.add",
            json!({
                "meetingId": meeting_id,
                "description": desc,
                "ownerMemberId": owner
            }),
            Some(board.clone()),
        );
        decision_ids.push(
            added
                .get("decisionId")
                .and_then(|v| v.as_str())
                .expect("decisionId")
                .to_string(),
        );
    }

    request_ok(
        &mut stdin,
        &mut reader,
        "7",
        "meetings.decisions.setStatus",
        json!({ "decisionId": decision_ids[1], "status": "done" }),
        Some(board.clone()),
    );

    let listed = request_ok(
        &mut stdin,
        &mut reader,
        "8",
        "meetings.decisions.list",
        json!({ "meetingId": meeting_id }),
        None,
    );
    let decisions = listed
        .get("decisions")
        .and_then(|v| v.as_array())
        .expect("decisions");
    assert_eq!(decisions.len(), 3);
    for (i, decision) in decisions.iter().enumerate() {
        assert_eq!(
            decision.get("sortOrder").and_then(|v| v.as_i64()),
            Some(i as i64)
        );
        assert_eq!(
            decision.get("id").and_then(|v| v.as_str()),
            Some(decision_ids[i].as_str())
        );
    }
    assert_eq!(
        decisions[1].get("status").and_then(|v| v.as_str()),
        Some("done")
    );
    assert_eq!(
        decisions[0].get("status").and_then(|v| v.as_str()),
        Some("open")
    );

    let meetings = request_ok(
        &mut stdin,
        &mut reader,
        "9",
        "meetings.list",
        json!({}),
        None,
    );
    let rows = meetings
        .get("meetings")
        .and_then(|v| v.as_array())
        .expect("meetings");
    assert_eq!(rows.len(), 1);
    assert_eq!(
        rows[0].get("decisionCount").and_then(|v| v.as_i64()),
        Some(3)
    );
    assert_eq!(
        rows[0].get("openDecisionCount").and_then(|v| v.as_i64()),
        Some(2)
    );

    drop(stdin);
    let _ = child.wait();
    let _ = std::fs::remove_dir_all(workspace);
}
