use crate::ipc::error::{err, ok};
use crate::ipc::helpers::{
    get_opt_str, get_required_i64, get_required_str, member_exists, require_privileged,
    session_exists, HandlerErr,
};
use crate::ipc::types::{AppState, Request};
use crate::level;
use chrono::Utc;
use rusqlite::Connection;
use serde_json::json;
use uuid::Uuid;

fn total_points(conn: &Connection, member_id: &str) -> Result<i64, HandlerErr> {
    conn.query_row(
        "SELECT COALESCE(SUM(points), 0) FROM point_entries WHERE member_id = ?",
        [member_id],
        |r| r.get(0),
    )
    .map_err(HandlerErr::db)
}

fn points_award(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let member_id = get_required_str(params, "memberId")?;
    let points = get_required_i64(params, "points")?;
    let reason = get_required_str(params, "reason")?;
    if points == 0 {
        return Err(HandlerErr::new("bad_params", "points must be non-zero"));
    }
    if !member_exists(conn, &member_id)? {
        return Err(HandlerErr::new("not_found", "member not found"));
    }
    let session_id = get_opt_str(params, "sessionId");
    if let Some(session_id) = session_id.as_deref() {
        if !session_exists(conn, session_id)? {
            return Err(HandlerErr::new("not_found", "session not found"));
        }
    }

    let entry_id = Uuid::new_v4().to_string();
    let awarded_at = Utc::now().to_rfc3339();
    conn.execute(
        "INSERT INTO point_entries(id, member_id, points, reason, session_id, awarded_at)
         VALUES(?, ?, ?, ?, ?, ?)",
        (&entry_id, &member_id, points, reason.trim(), &session_id, &awarded_at),
    )
    .map_err(|e| HandlerErr {
        code: "db_insert_failed",
        message: e.to_string(),
        details: Some(json!({ "table": "point_entries" })),
    })?;

    let total = total_points(conn, &member_id)?;
    let info = level::level_info(total);
    Ok(json!({
        "entryId": entry_id,
        "totalPoints": total,
        "levelInfo": info,
    }))
}

fn points_history(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let member_id = get_required_str(params, "memberId")?;
    if !member_exists(conn, &member_id)? {
        return Err(HandlerErr::new("not_found", "member not found"));
    }
    let mut stmt = conn
        .prepare(
            "SELECT id, points, reason, session_id, awarded_at
             FROM point_entries
             WHERE member_id = ?
             ORDER BY awarded_at DESC",
        )
        .map_err(HandlerErr::db)?;
    let entries = stmt
        .query_map([&member_id], |r| {
            Ok(json!({
                "id": r.get::<_, String>(0)?,
                "points": r.get::<_, i64>(1)?,
                "reason": r.get::<_, String>(2)?,
                "sessionId": r.get::<_, Option<String>>(3)?,
                "awardedAt": r.get::<_, String>(4)?,
            }))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(HandlerErr::db)?;

    let total = total_points(conn, &member_id)?;
    Ok(json!({
        "memberId": member_id,
        "totalPoints": total,
        "entries": entries,
    }))
}

/// Accepts either raw `points` (UI previews) or a `memberId` whose ledger
/// total is used.
fn level_info(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let (points, member_id) = match params.get("points").and_then(|v| v.as_i64()) {
        Some(p) => (p, None),
        None => {
            let member_id = get_required_str(params, "memberId")
                .map_err(|_| HandlerErr::new("bad_params", "missing points or memberId"))?;
            if !member_exists(conn, &member_id)? {
                return Err(HandlerErr::new("not_found", "member not found"));
            }
            (total_points(conn, &member_id)?, Some(member_id))
        }
    };

    let info = level::level_info(points);
    Ok(json!({
        "memberId": member_id,
        "points": points.max(0),
        "levelInfo": info,
    }))
}

fn leaderboard(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let limit = params.get("limit").and_then(|v| v.as_i64()).unwrap_or(20);
    let mut stmt = conn
        .prepare(
            "SELECT
               m.id,
               m.first_name,
               m.last_name,
               (SELECT COALESCE(SUM(pe.points), 0) FROM point_entries pe WHERE pe.member_id = m.id) AS total_points
             FROM members m
             WHERE m.active = 1
             ORDER BY total_points DESC, m.last_name, m.first_name
             LIMIT ?",
        )
        .map_err(HandlerErr::db)?;
    let rows = stmt
        .query_map([limit], |r| {
            Ok((
                r.get::<_, String>(0)?,
                r.get::<_, String>(1)?,
                r.get::<_, String>(2)?,
                r.get::<_, i64>(3)?,
            ))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(HandlerErr::db)?;

    let entries: Vec<serde_json::Value> = rows
        .into_iter()
        .enumerate()
        .map(|(i, (id, first, last, total))| {
            let info = level::level_info(total);
            json!({
                "rank": (i + 1) as i64,
                "memberId": id,
                "firstName": first,
                "lastName": last,
                "totalPoints": total,
                "levelInfo": info,
            })
        })
        .collect();

    Ok(json!({ "leaderboard": entries }))
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
        "points.award" => Some(dispatch(state, req, true, points_award)),
        "points.history" => Some(dispatch(state, req, false, points_history)),
        "gamification.levelInfo" => Some(dispatch(state, req, false, level_info)),
        "gamification.leaderboard" => Some(dispatch(state, req, false, leaderboard)),
        _ => None,
    }
}
