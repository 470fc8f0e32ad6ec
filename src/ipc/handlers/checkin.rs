use crate::checkin::{
    record_attendance, resolve_check_in, CheckInError, CheckInOutcome, CheckInPolicy,
};
use crate::ipc::error::{err, ok};
use crate::ipc::helpers::{
    get_required_str, member_exists, require_actor, require_privileged, HandlerErr,
};
use crate::ipc::types::{AppState, Request};
use chrono::Utc;
use rusqlite::{Connection, OptionalExtension};
use serde_json::json;

fn check_in_error(e: CheckInError) -> HandlerErr {
    let user_message = e.user_message();
    match e {
        CheckInError::Db(db) => HandlerErr::db(db),
        other => HandlerErr {
            code: other.code(),
            message: other.user_message().to_string(),
            details: Some(json!({ "userMessage": user_message })),
        },
    }
}

fn outcome_json(outcome: &CheckInOutcome) -> serde_json::Value {
    match outcome {
        CheckInOutcome::CheckedIn(record) => json!({
            "attended": true,
            "alreadyCheckedIn": false,
            "checkInMethod": record.check_in_method,
            "checkInTime": record.checked_in_at,
            "message": outcome.user_message(),
        }),
        CheckInOutcome::AlreadyCheckedIn(record) => json!({
            "attended": true,
            "alreadyCheckedIn": true,
            "checkInMethod": record.check_in_method,
            "checkInTime": record.checked_in_at,
            "message": outcome.user_message(),
        }),
        CheckInOutcome::Left { .. } => json!({
            "attended": false,
            "alreadyCheckedIn": false,
            "checkInMethod": serde_json::Value::Null,
            "checkInTime": serde_json::Value::Null,
            "message": outcome.user_message(),
        }),
    }
}

fn handle_scan(state: &mut AppState, req: &Request) -> serde_json::Value {
    let actor = match require_actor(req) {
        Ok(a) => a.clone(),
        Err(e) => return e.response(&req.id),
    };
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    let token = match get_required_str(&req.params, "token") {
        Ok(v) => v,
        Err(e) => return e.response(&req.id),
    };
    match member_exists(conn, &actor.member_id) {
        Ok(true) => {}
        Ok(false) => return err(&req.id, "not_found", "member not found", None),
        Err(e) => return e.response(&req.id),
    }

    match resolve_check_in(conn, &token, &actor.member_id, "qr", Utc::now()) {
        Ok(outcome) => ok(&req.id, outcome_json(&outcome)),
        Err(e) => check_in_error(e).response(&req.id),
    }
}

fn handle_manual(state: &mut AppState, req: &Request) -> serde_json::Value {
    if let Err(e) = require_privileged(req) {
        return e.response(&req.id);
    }
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    let (session_id, member_id) = match (
        get_required_str(&req.params, "sessionId"),
        get_required_str(&req.params, "memberId"),
    ) {
        (Ok(s), Ok(m)) => (s, m),
        (Err(e), _) | (_, Err(e)) => return e.response(&req.id),
    };
    match member_exists(conn, &member_id) {
        Ok(true) => {}
        Ok(false) => return err(&req.id, "not_found", "member not found", None),
        Err(e) => return e.response(&req.id),
    }

    let policy_raw: Option<String> = match conn
        .query_row(
            "SELECT checkin_policy FROM sessions WHERE id = ?",
            [&session_id],
            |r| r.get(0),
        )
        .optional()
    {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    let Some(policy_raw) = policy_raw else {
        return err(&req.id, "not_found", "session not found", None);
    };
    let policy = CheckInPolicy::parse(&policy_raw).unwrap_or(CheckInPolicy::Idempotent);

    // Manual entry bypasses the token (and its expiry): a tutor fixing the
    // sheet after the fact is not scanning a QR code.
    match record_attendance(conn, &session_id, &member_id, "manual", policy, Utc::now()) {
        Ok(outcome) => ok(&req.id, outcome_json(&outcome)),
        Err(e) => check_in_error(e).response(&req.id),
    }
}

fn attendance_list(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let session_id = get_required_str(params, "sessionId")?;
    let mut stmt = conn
        .prepare(
            "SELECT a.member_id, m.first_name, m.last_name, a.check_in_method, a.checked_in_at
             FROM attendance a
             JOIN members m ON m.id = a.member_id
             WHERE a.session_id = ?
             ORDER BY a.checked_in_at",
        )
        .map_err(HandlerErr::db)?;
    let rows = stmt
        .query_map([&session_id], |r| {
            Ok(json!({
                "memberId": r.get::<_, String>(0)?,
                "firstName": r.get::<_, String>(1)?,
                "lastName": r.get::<_, String>(2)?,
                "checkInMethod": r.get::<_, String>(3)?,
                "checkInTime": r.get::<_, String>(4)?,
            }))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(HandlerErr::db)?;

    Ok(json!({ "sessionId": session_id, "attendees": rows }))
}

fn attendance_for_member(
    conn: &Connection,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let member_id = get_required_str(params, "memberId")?;
    if !member_exists(conn, &member_id)? {
        return Err(HandlerErr::new("not_found", "member not found"));
    }
    let mut stmt = conn
        .prepare(
            "SELECT a.session_id, s.title, s.kind, s.starts_at, a.check_in_method, a.checked_in_at
             FROM attendance a
             JOIN sessions s ON s.id = a.session_id
             WHERE a.member_id = ?
             ORDER BY s.starts_at DESC",
        )
        .map_err(HandlerErr::db)?;
    let rows = stmt
        .query_map([&member_id], |r| {
            Ok(json!({
                "sessionId": r.get::<_, String>(0)?,
                "title": r.get::<_, String>(1)?,
                "kind": r.get::<_, String>(2)?,
                "startsAt": r.get::<_, String>(3)?,
                "checkInMethod": r.get::<_, String>(4)?,
                "checkInTime": r.get::<_, String>(5)?,
            }))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(HandlerErr::db)?;

    Ok(json!({ "memberId": member_id, "attendance": rows }))
}

fn with_conn(
    state: &mut AppState,
    req: &Request,
    f: impl FnOnce(&Connection, &serde_json::Value) -> Result<serde_json::Value, HandlerErr>,
) -> serde_json::Value {
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
        "checkin.scan" => Some(handle_scan(state, req)),
        "checkin.manual" => Some(handle_manual(state, req)),
        "attendance.list" => Some(with_conn(state, req, attendance_list)),
        "attendance.forMember" => Some(with_conn(state, req, attendance_for_member)),
        _ => None,
    }
}
