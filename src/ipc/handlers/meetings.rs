use crate::ipc::error::{err, ok};
use crate::ipc::helpers::{
    get_opt_str, get_required_str, member_exists, require_privileged, HandlerErr,
};
use crate::ipc::types::{AppState, Request};
use chrono::Utc;
use rusqlite::{Connection, OptionalExtension};
use serde_json::json;
use uuid::Uuid;

fn meeting_exists(conn: &Connection, meeting_id: &str) -> Result<bool, HandlerErr> {
    conn.query_row("SELECT 1 FROM meetings WHERE id = ?", [meeting_id], |r| {
        r.get::<_, i64>(0)
    })
    .optional()
    .map(|v| v.is_some())
    .map_err(HandlerErr::db)
}

fn meetings_create(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let title = get_required_str(params, "title")?;
    if title.trim().is_empty() {
        return Err(HandlerErr::new("bad_params", "title must not be empty"));
    }
    let held_at = get_opt_str(params, "heldAt").unwrap_or_else(|| Utc::now().to_rfc3339());
    let notes = get_opt_str(params, "notes");

    let meeting_id = Uuid::new_v4().to_string();
    conn.execute(
        "INSERT INTO meetings(id, title, held_at, notes) VALUES(?, ?, ?, ?)",
        (&meeting_id, title.trim(), &held_at, &notes),
    )
    .map_err(|e| HandlerErr {
        code: "db_insert_failed",
        message: e.to_string(),
        details: Some(json!({ "table": "meetings" })),
    })?;

    Ok(json!({ "meetingId": meeting_id }))
}

fn meetings_list(conn: &Connection, _params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let mut stmt = conn
        .prepare(
            "SELECT
               m.id,
               m.title,
               m.held_at,
               m.notes,
               (SELECT COUNT(*) FROM meeting_decisions d WHERE d.meeting_id = m.id) AS decision_count,
               (SELECT COUNT(*) FROM meeting_decisions d WHERE d.meeting_id = m.id AND d.status = 'open') AS open_count
             FROM meetings m
             ORDER BY m.held_at DESC",
        )
        .map_err(HandlerErr::db)?;
    let meetings = stmt
        .query_map([], |r| {
            Ok(json!({
                "id": r.get::<_, String>(0)?,
                "title": r.get::<_, String>(1)?,
                "heldAt": r.get::<_, String>(2)?,
                "notes": r.get::<_, Option<String>>(3)?,
                "decisionCount": r.get::<_, i64>(4)?,
                "openDecisionCount": r.get::<_, i64>(5)?,
            }))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(HandlerErr::db)?;

    Ok(json!({ "meetings": meetings }))
}

fn decisions_add(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let meeting_id = get_required_str(params, "meetingId")?;
    let description = get_required_str(params, "description")?;
    if description.trim().is_empty() {
        return Err(HandlerErr::new("bad_params", "description must not be empty"));
    }
    if !meeting_exists(conn, &meeting_id)? {
        return Err(HandlerErr::new("not_found", "meeting not found"));
    }
    let owner_member_id = get_opt_str(params, "ownerMemberId");
    if let Some(owner) = owner_member_id.as_deref() {
        if !member_exists(conn, owner)? {
            return Err(HandlerErr::new("not_found", "owner member not found"));
        }
    }
    let due_date = get_opt_str(params, "dueDate");

    let next_order: i64 = conn
        .query_row(
            "SELECT COALESCE(MAX(sort_order), -1) + 1 FROM meeting_decisions WHERE meeting_id = ?",
            [&meeting_id],
            |r| r.get(0),
        )
        .map_err(HandlerErr::db)?;

    let decision_id = Uuid::new_v4().to_string();
    conn.execute(
        "INSERT INTO meeting_decisions(id, meeting_id, description, owner_member_id, due_date, status, sort_order)
         VALUES(?, ?, ?, ?, ?, 'open', ?)",
        (
            &decision_id,
            &meeting_id,
            description.trim(),
            &owner_member_id,
            &due_date,
            next_order,
        ),
    )
    .map_err(|e| HandlerErr {
        code: "db_insert_failed",
        message: e.to_string(),
        details: Some(json!({ "table": "meeting_decisions" })),
    })?;

    Ok(json!({ "decisionId": decision_id, "sortOrder": next_order }))
}

fn decisions_list(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let meeting_id = get_required_str(params, "meetingId")?;
    if !meeting_exists(conn, &meeting_id)? {
        return Err(HandlerErr::new("not_found", "meeting not found"));
    }
    let mut stmt = conn
        .prepare(
            "SELECT id, description, owner_member_id, due_date, status, sort_order
             FROM meeting_decisions
             WHERE meeting_id = ?
             ORDER BY sort_order",
        )
        .map_err(HandlerErr::db)?;
    let decisions = stmt
        .query_map([&meeting_id], |r| {
            Ok(json!({
                "id": r.get::<_, String>(0)?,
                "description": r.get::<_, String>(1)?,
                "ownerMemberId": r.get::<_, Option<String>>(2)?,
                "dueDate": r.get::<_, Option<String>>(3)?,
                "status": r.get::<_, String>(4)?,
                "sortOrder": r.get::<_, i64>(5)?,
            }))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(HandlerErr::db)?;

    Ok(json!({ "meetingId": meeting_id, "decisions": decisions }))
}

fn decisions_set_status(
    conn: &Connection,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let decision_id = get_required_str(params, "decisionId")?;
    let status = get_required_str(params, "status")?;
    if status != "open" && status != "done" {
        return Err(HandlerErr::new("bad_params", "status must be open or done"));
    }

    let updated = conn
        .execute(
            "UPDATE meeting_decisions SET status = ? WHERE id = ?",
            (&status, &decision_id),
        )
        .map_err(|e| HandlerErr {
            code: "db_update_failed",
            message: e.to_string(),
            details: Some(json!({ "table": "meeting_decisions" })),
        })?;
    if updated == 0 {
        return Err(HandlerErr::new("not_found", "decision not found"));
    }

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
        "meetings.create" => Some(dispatch(state, req, true, meetings_create)),
        "meetings.list" => Some(dispatch(state, req, false, meetings_list)),
        "meetings.decisions.add" => Some(dispatch(state, req, true, decisions_add)),
        "meetings.decisions.list" => Some(dispatch(state, req, false, decisions_list)),
        "meetings.decisions.setStatus" => Some(dispatch(state, req, true, decisions_set_status)),
        _ => None,
    }
}
