use crate::ipc::error::{err, ok};
use crate::ipc::helpers::{
    get_opt_str, get_required_str, member_exists, require_actor, require_privileged, validate_role,
    HandlerErr,
};
use crate::ipc::types::{Actor, AppState, Request};
use chrono::Utc;
use rusqlite::Connection;
use serde_json::json;
use sha2::{Digest, Sha256};
use std::fs::File;
use std::io::Read;
use std::path::Path;
use uuid::Uuid;

/// Streaming SHA-256 so large files don't get pulled into memory at once.
fn file_digest(path: &Path) -> Result<(String, i64), HandlerErr> {
    let mut file = File::open(path).map_err(|e| HandlerErr {
        code: "io_failed",
        message: format!("failed to open {}: {}", path.to_string_lossy(), e),
        details: None,
    })?;
    let mut hasher = Sha256::new();
    let mut buf = [0u8; 64 * 1024];
    let mut size: i64 = 0;
    loop {
        let n = file.read(&mut buf).map_err(|e| HandlerErr {
            code: "io_failed",
            message: format!("failed to read {}: {}", path.to_string_lossy(), e),
            details: None,
        })?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
        size += n as i64;
    }
    let digest = hasher
        .finalize()
        .iter()
        .map(|b| format!("{:02x}", b))
        .collect::<String>();
    Ok((digest, size))
}

fn documents_register(
    conn: &Connection,
    actor: &Actor,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let path_raw = get_required_str(params, "path")?;
    let title = get_required_str(params, "title")?;
    if title.trim().is_empty() {
        return Err(HandlerErr::new("bad_params", "title must not be empty"));
    }
    let shared_with_role = get_opt_str(params, "sharedWithRole");
    if let Some(role) = shared_with_role.as_deref() {
        validate_role(role)?;
    }

    let path = Path::new(&path_raw);
    if !path.is_file() {
        return Err(HandlerErr::new("not_found", "file not found"));
    }
    let file_name = path
        .file_name()
        .map(|s| s.to_string_lossy().to_string())
        .unwrap_or_else(|| path_raw.clone());
    let (sha256, byte_size) = file_digest(path)?;

    // Host operators aren't always member rows; only link when they are.
    let uploaded_by = if member_exists(conn, &actor.member_id)? {
        Some(actor.member_id.clone())
    } else {
        None
    };

    let document_id = Uuid::new_v4().to_string();
    let uploaded_at = Utc::now().to_rfc3339();
    conn.execute(
        "INSERT INTO documents(id, title, file_name, sha256, byte_size, uploaded_by, uploaded_at, shared_with_role)
         VALUES(?, ?, ?, ?, ?, ?, ?, ?)",
        (
            &document_id,
            title.trim(),
            &file_name,
            &sha256,
            byte_size,
            &uploaded_by,
            &uploaded_at,
            &shared_with_role,
        ),
    )
    .map_err(|e| HandlerErr {
        code: "db_insert_failed",
        message: e.to_string(),
        details: Some(json!({ "table": "documents" })),
    })?;

    Ok(json!({
        "documentId": document_id,
        "fileName": file_name,
        "sha256": sha256,
        "byteSize": byte_size,
    }))
}

/// A document shared with a role is visible to that role; unscoped documents
/// are visible to everyone; admins and the uploader always see theirs.
fn documents_list(
    conn: &Connection,
    actor: &Actor,
    _params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let mut stmt = conn
        .prepare(
            "SELECT id, title, file_name, sha256, byte_size, uploaded_by, uploaded_at, shared_with_role
             FROM documents
             ORDER BY uploaded_at DESC",
        )
        .map_err(HandlerErr::db)?;
    let rows = stmt
        .query_map([], |r| {
            Ok((
                r.get::<_, String>(0)?,
                r.get::<_, String>(1)?,
                r.get::<_, String>(2)?,
                r.get::<_, String>(3)?,
                r.get::<_, i64>(4)?,
                r.get::<_, Option<String>>(5)?,
                r.get::<_, String>(6)?,
                r.get::<_, Option<String>>(7)?,
            ))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(HandlerErr::db)?;

    let is_admin = actor.has_role("admin");
    let documents: Vec<serde_json::Value> = rows
        .into_iter()
        .filter(|(_, _, _, _, _, uploaded_by, _, shared_with_role)| {
            if is_admin {
                return true;
            }
            if uploaded_by.as_deref() == Some(actor.member_id.as_str()) {
                return true;
            }
            match shared_with_role.as_deref() {
                None => true,
                Some(role) => actor.has_role(role),
            }
        })
        .map(
            |(id, title, file_name, sha256, byte_size, uploaded_by, uploaded_at, shared_with_role)| {
                json!({
                    "id": id,
                    "title": title,
                    "fileName": file_name,
                    "sha256": sha256,
                    "byteSize": byte_size,
                    "uploadedBy": uploaded_by,
                    "uploadedAt": uploaded_at,
                    "sharedWithRole": shared_with_role,
                })
            },
        )
        .collect();

    Ok(json!({ "documents": documents }))
}

fn handle_register(state: &mut AppState, req: &Request) -> serde_json::Value {
    let actor = match require_privileged(req) {
        Ok(a) => a.clone(),
        Err(e) => return e.response(&req.id),
    };
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    match documents_register(conn, &actor, &req.params) {
        Ok(result) => ok(&req.id, result),
        Err(error) => error.response(&req.id),
    }
}

fn handle_list(state: &mut AppState, req: &Request) -> serde_json::Value {
    let actor = match require_actor(req) {
        Ok(a) => a.clone(),
        Err(e) => return e.response(&req.id),
    };
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    match documents_list(conn, &actor, &req.params) {
        Ok(result) => ok(&req.id, result),
        Err(error) => error.response(&req.id),
    }
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "documents.register" => Some(handle_register(state, req)),
        "documents.list" => Some(handle_list(state, req)),
        _ => None,
    }
}
