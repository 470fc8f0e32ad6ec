use crate::backup;
use crate::db;
use crate::ipc::error::{err, ok};
use crate::ipc::helpers::{get_required_str, session_exists, HandlerErr};
use crate::ipc::types::{AppState, Request};
use rusqlite::Connection;
use serde_json::json;
use std::io::Write;
use std::path::PathBuf;

fn handle_export_bundle(_state: &mut AppState, req: &Request) -> serde_json::Value {
    let workspace_path = match get_required_str(&req.params, "workspacePath") {
        Ok(v) => PathBuf::from(v),
        Err(e) => return e.response(&req.id),
    };
    let out_path = match get_required_str(&req.params, "outPath") {
        Ok(v) => PathBuf::from(v),
        Err(e) => return e.response(&req.id),
    };

    match backup::export_workspace_bundle(&workspace_path, &out_path) {
        Ok(summary) => ok(
            &req.id,
            json!({
                "bundleFormat": summary.bundle_format,
                "entryCount": summary.entry_count,
                "counts": {
                    "members": summary.member_count,
                    "sessions": summary.session_count,
                    "attendance": summary.attendance_count,
                },
                "outPath": out_path.to_string_lossy(),
            }),
        ),
        Err(e) => err(&req.id, "io_failed", format!("{e:#}"), None),
    }
}

fn handle_import_bundle(state: &mut AppState, req: &Request) -> serde_json::Value {
    let workspace_path = match get_required_str(&req.params, "workspacePath") {
        Ok(v) => PathBuf::from(v),
        Err(e) => return e.response(&req.id),
    };
    let in_path = match get_required_str(&req.params, "inPath") {
        Ok(v) => PathBuf::from(v),
        Err(e) => return e.response(&req.id),
    };

    // Drop the open handle before the database file is replaced underneath it.
    if state.workspace.as_deref() == Some(workspace_path.as_path()) {
        state.db = None;
    }

    let summary = match backup::import_workspace_bundle(&in_path, &workspace_path) {
        Ok(s) => s,
        Err(e) => return err(&req.id, "io_failed", format!("{e:#}"), None),
    };

    if state.workspace.as_deref() == Some(workspace_path.as_path()) {
        match db::open_db(&workspace_path) {
            Ok(conn) => state.db = Some(conn),
            Err(e) => return err(&req.id, "db_open_failed", format!("{e:?}"), None),
        }
    }

    ok(
        &req.id,
        json!({ "bundleFormatDetected": summary.bundle_format_detected }),
    )
}

fn export_attendance_csv(
    conn: &Connection,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let session_id = get_required_str(params, "sessionId")?;
    let out_path = PathBuf::from(get_required_str(params, "outPath")?);
    if !session_exists(conn, &session_id)? {
        return Err(HandlerErr::new("not_found", "session not found"));
    }

    let mut stmt = conn
        .prepare(
            "SELECT m.last_name, m.first_name, m.role, a.check_in_method, a.checked_in_at
             FROM attendance a
             JOIN members m ON m.id = a.member_id
             WHERE a.session_id = ?
             ORDER BY m.last_name, m.first_name",
        )
        .map_err(HandlerErr::db)?;
    let rows = stmt
        .query_map([&session_id], |r| {
            Ok((
                r.get::<_, String>(0)?,
                r.get::<_, String>(1)?,
                r.get::<_, String>(2)?,
                r.get::<_, String>(3)?,
                r.get::<_, String>(4)?,
            ))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(HandlerErr::db)?;

    let mut out = std::fs::File::create(&out_path).map_err(|e| HandlerErr {
        code: "io_failed",
        message: format!("failed to create {}: {}", out_path.to_string_lossy(), e),
        details: None,
    })?;
    let mut write_line = |line: &str| -> Result<(), HandlerErr> {
        writeln!(out, "{}", line).map_err(|e| HandlerErr {
            code: "io_failed",
            message: format!("failed to write {}: {}", out_path.to_string_lossy(), e),
            details: None,
        })
    };

    write_line("lastName,firstName,role,checkInMethod,checkInTime")?;
    let row_count = rows.len();
    for (last, first, role, method, time) in rows {
        write_line(&format!(
            "{},{},{},{},{}",
            csv_field(&last),
            csv_field(&first),
            role,
            method,
            time
        ))?;
    }

    Ok(json!({
        "outPath": out_path.to_string_lossy(),
        "rowCount": row_count,
    }))
}

fn csv_field(raw: &str) -> String {
    if raw.contains(',') || raw.contains('"') || raw.contains('\n') {
        format!("\"{}\"", raw.replace('"', "\"\""))
    } else {
        raw.to_string()
    }
}

fn handle_export_csv(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    match export_attendance_csv(conn, &req.params) {
        Ok(result) => ok(&req.id, result),
        Err(error) => error.response(&req.id),
    }
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "backup.exportWorkspaceBundle" => Some(handle_export_bundle(state, req)),
        "backup.importWorkspaceBundle" => Some(handle_import_bundle(state, req)),
        "exchange.exportAttendanceCsv" => Some(handle_export_csv(state, req)),
        _ => None,
    }
}
