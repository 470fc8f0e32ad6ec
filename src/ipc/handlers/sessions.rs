use crate::checkin::CheckInPolicy;
use crate::ipc::error::{err, ok};
use crate::ipc::helpers::{
    get_opt_str, get_required_str, require_privileged, session_exists, HandlerErr,
};
use crate::ipc::types::{AppState, Request};
use chrono::{DateTime, Utc};
use rusqlite::Connection;
use serde_json::json;
use uuid::Uuid;

const SESSION_KINDS: &[&str] = &["lesson", "workshop", "event"];

/// Tokens are the hex form of a v4 UUID: opaque, unguessable enough for a
/// QR code that is only valid while the session is live.
fn new_token() -> String {
    Uuid::new_v4().simple().to_string()
}

fn parse_rfc3339(params: &serde_json::Value, key: &str) -> Result<Option<String>, HandlerErr> {
    let Some(raw) = get_opt_str(params, key) else {
        return Ok(None);
    };
    let parsed = DateTime::parse_from_rfc3339(&raw)
        .map_err(|_| HandlerErr::new("bad_params", format!("{} must be RFC 3339", key)))?;
    Ok(Some(parsed.with_timezone(&Utc).to_rfc3339()))
}

fn sessions_create(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let title = get_required_str(params, "title")?;
    if title.trim().is_empty() {
        return Err(HandlerErr::new("bad_params", "title must not be empty"));
    }
    let kind = get_opt_str(params, "kind").unwrap_or_else(|| "lesson".to_string());
    if !SESSION_KINDS.contains(&kind.as_str()) {
        return Err(HandlerErr {
            code: "bad_params",
            message: format!("unknown kind: {}", kind),
            details: Some(json!({ "kinds": SESSION_KINDS })),
        });
    }

    // Workshops toggle on rescan (join/leave); everything else is
    // idempotent. An explicit policy param overrides the default.
    let default_policy = if kind == "workshop" {
        CheckInPolicy::Toggle
    } else {
        CheckInPolicy::Idempotent
    };
    let policy = match get_opt_str(params, "checkinPolicy") {
        Some(raw) => CheckInPolicy::parse(&raw).ok_or_else(|| {
            HandlerErr::new("bad_params", format!("unknown checkinPolicy: {}", raw))
        })?,
        None => default_policy,
    };

    let starts_at = parse_rfc3339(params, "startsAt")?.unwrap_or_else(|| Utc::now().to_rfc3339());
    let token_expires_at = parse_rfc3339(params, "tokenExpiresAt")?;

    let session_id = Uuid::new_v4().to_string();
    let token = new_token();
    let created_at = Utc::now().to_rfc3339();
    conn.execute(
        "INSERT INTO sessions(id, title, kind, starts_at, check_in_token, token_expires_at, checkin_policy, created_at)
         VALUES(?, ?, ?, ?, ?, ?, ?, ?)",
        (
            &session_id,
            title.trim(),
            &kind,
            &starts_at,
            &token,
            &token_expires_at,
            policy.as_str(),
            &created_at,
        ),
    )
    .map_err(|e| HandlerErr {
        code: "db_insert_failed",
        message: e.to_string(),
        details: Some(json!({ "table": "sessions" })),
    })?;

    Ok(json!({
        "sessionId": session_id,
        "checkInToken": token,
        "kind": kind,
        "checkinPolicy": policy.as_str(),
        "startsAt": starts_at,
        "tokenExpiresAt": token_expires_at,
    }))
}

fn sessions_list(conn: &Connection, _params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let mut stmt = conn
        .prepare(
            "SELECT
               s.id,
               s.title,
               s.kind,
               s.starts_at,
               s.check_in_token,
               s.token_expires_at,
               s.checkin_policy,
               (SELECT COUNT(*) FROM attendance a WHERE a.session_id = s.id) AS attendee_count
             FROM sessions s
             ORDER BY s.starts_at DESC",
        )
        .map_err(HandlerErr::db)?;
    let sessions = stmt
        .query_map([], |r| {
            Ok(json!({
                "id": r.get::<_, String>(0)?,
                "title": r.get::<_, String>(1)?,
                "kind": r.get::<_, String>(2)?,
                "startsAt": r.get::<_, String>(3)?,
                "checkInToken": r.get::<_, String>(4)?,
                "tokenExpiresAt": r.get::<_, Option<String>>(5)?,
                "checkinPolicy": r.get::<_, String>(6)?,
                "attendeeCount": r.get::<_, i64>(7)?,
            }))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(HandlerErr::db)?;

    Ok(json!({ "sessions": sessions }))
}

fn sessions_regenerate_token(
    conn: &Connection,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let session_id = get_required_str(params, "sessionId")?;
    if !session_exists(conn, &session_id)? {
        return Err(HandlerErr::new("not_found", "session not found"));
    }
    let token_expires_at = parse_rfc3339(params, "tokenExpiresAt")?;

    // Single UPDATE so the old token is never valid alongside the new one.
    let token = new_token();
    conn.execute(
        "UPDATE sessions SET check_in_token = ?, token_expires_at = ? WHERE id = ?",
        (&token, &token_expires_at, &session_id),
    )
    .map_err(|e| HandlerErr {
        code: "db_update_failed",
        message: e.to_string(),
        details: Some(json!({ "table": "sessions" })),
    })?;

    Ok(json!({
        "sessionId": session_id,
        "checkInToken": token,
        "tokenExpiresAt": token_expires_at,
    }))
}

fn sessions_delete(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let session_id = get_required_str(params, "sessionId")?;
    if !session_exists(conn, &session_id)? {
        return Err(HandlerErr::new("not_found", "session not found"));
    }

    let tx = conn
        .unchecked_transaction()
        .map_err(|e| HandlerErr::new("db_tx_failed", e.to_string()))?;
    for (sql, table) in [
        ("DELETE FROM attendance WHERE session_id = ?", "attendance"),
        (
            "UPDATE point_entries SET session_id = NULL WHERE session_id = ?",
            "point_entries",
        ),
        ("DELETE FROM sessions WHERE id = ?", "sessions"),
    ] {
        if let Err(e) = tx.execute(sql, [&session_id]) {
            let _ = tx.rollback();
            return Err(HandlerErr {
                code: "db_delete_failed",
                message: e.to_string(),
                details: Some(json!({ "table": table })),
            });
        }
    }
    tx.commit()
        .map_err(|e| HandlerErr::new("db_commit_failed", e.to_string()))?;

    Ok(json!({ "ok": true }))
}

fn dispatch(
    state: &mut AppState,
    req: &Request,
    privileged: bool,
    f: impl FnOnce(&Connection, &serde_json::Value) -> Result<serde_json::Value, HandlerErr>,
) -> serde_json::Value {
    if privileged {
        if let Err(e) = require_privileged(req) {
            return e.response(&req.id);
        }
    }
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    match f(conn, &req.params) {
        Ok(result) => ok(&req.id, result),
        Err(error) => error.response(&req.id),
    }
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "sessions.create" => Some(dispatch(state, req, true, sessions_create)),
        "sessions.list" => Some(dispatch(state, req, false, sessions_list)),
        "sessions.regenerateToken" => Some(dispatch(state, req, true, sessions_regenerate_token)),
        "sessions.delete" => Some(dispatch(state, req, true, sessions_delete)),
        _ => None,
    }
}
