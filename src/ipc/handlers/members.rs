use crate::ipc::error::{err, ok};
use crate::ipc::helpers::{
    get_opt_str, get_required_str, member_exists, require_privileged, validate_role, HandlerErr,
};
use crate::ipc::types::{AppState, Request};
use chrono::Utc;
use rusqlite::Connection;
use serde_json::json;
use uuid::Uuid;

fn members_list(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let role_filter = get_opt_str(params, "role");
    if let Some(role) = role_filter.as_deref() {
        validate_role(role)?;
    }

    // Point totals ride along so dashboards don't need a second round trip.
    let mut stmt = conn
        .prepare(
            "SELECT
               m.id,
               m.first_name,
               m.last_name,
               m.role,
               m.active,
               m.joined_at,
               (SELECT COALESCE(SUM(pe.points), 0) FROM point_entries pe WHERE pe.member_id = m.id) AS total_points
             FROM members m
             WHERE (?1 IS NULL OR m.role = ?1)
             ORDER BY m.last_name, m.first_name",
        )
        .map_err(HandlerErr::db)?;
    let members = stmt
        .query_map([&role_filter], |r| {
            Ok(json!({
                "id": r.get::<_, String>(0)?,
                "firstName": r.get::<_, String>(1)?,
                "lastName": r.get::<_, String>(2)?,
                "role": r.get::<_, String>(3)?,
                "active": r.get::<_, i64>(4)? != 0,
                "joinedAt": r.get::<_, String>(5)?,
                "totalPoints": r.get::<_, i64>(6)?,
            }))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(HandlerErr::db)?;

    Ok(json!({ "members": members }))
}

fn members_create(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let first_name = get_required_str(params, "firstName")?;
    let last_name = get_required_str(params, "lastName")?;
    let role = get_required_str(params, "role")?;
    validate_role(&role)?;
    if first_name.trim().is_empty() || last_name.trim().is_empty() {
        return Err(HandlerErr::new("bad_params", "name must not be empty"));
    }

    let member_id = Uuid::new_v4().to_string();
    let joined_at = Utc::now().to_rfc3339();
    conn.execute(
        "INSERT INTO members(id, first_name, last_name, role, active, joined_at)
         VALUES(?, ?, ?, ?, 1, ?)",
        (&member_id, first_name.trim(), last_name.trim(), &role, &joined_at),
    )
    .map_err(|e| HandlerErr {
        code: "db_insert_failed",
        message: e.to_string(),
        details: Some(json!({ "table": "members" })),
    })?;

    Ok(json!({ "memberId": member_id }))
}

fn members_update(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let member_id = get_required_str(params, "memberId")?;
    if !member_exists(conn, &member_id)? {
        return Err(HandlerErr::new("not_found", "member not found"));
    }
    let Some(patch) = params.get("patch") else {
        return Err(HandlerErr::new("bad_params", "missing patch"));
    };

    if let Some(first_name) = get_opt_str(patch, "firstName") {
        conn.execute(
            "UPDATE members SET first_name = ? WHERE id = ?",
            (first_name.trim(), &member_id),
        )
        .map_err(HandlerErr::db)?;
    }
    if let Some(last_name) = get_opt_str(patch, "lastName") {
        conn.execute(
            "UPDATE members SET last_name = ? WHERE id = ?",
            (last_name.trim(), &member_id),
        )
        .map_err(HandlerErr::db)?;
    }
    if let Some(role) = get_opt_str(patch, "role") {
        validate_role(&role)?;
        conn.execute(
            "UPDATE members SET role = ? WHERE id = ?",
            (&role, &member_id),
        )
        .map_err(HandlerErr::db)?;
    }
    if let Some(active) = patch.get("active").and_then(|v| v.as_bool()) {
        conn.execute(
            "UPDATE members SET active = ? WHERE id = ?",
            (active as i64, &member_id),
        )
        .map_err(HandlerErr::db)?;
    }

    Ok(json!({ "ok": true }))
}

fn members_delete(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let member_id = get_required_str(params, "memberId")?;
    if !member_exists(conn, &member_id)? {
        return Err(HandlerErr::new("not_found", "member not found"));
    }

    let tx = conn
        .unchecked_transaction()
        .map_err(|e| HandlerErr::new("db_tx_failed", e.to_string()))?;

    // Explicitly delete in dependency order (no ON DELETE CASCADE). Rows
    // that merely reference the member keep their data with the link nulled.
    for (sql, table) in [
        (
            "DELETE FROM attendance WHERE member_id = ?",
            "attendance",
        ),
        (
            "DELETE FROM point_entries WHERE member_id = ?",
            "point_entries",
        ),
        (
            "UPDATE meeting_decisions SET owner_member_id = NULL WHERE owner_member_id = ?",
            "meeting_decisions",
        ),
        (
            "UPDATE donations SET donor_member_id = NULL WHERE donor_member_id = ?",
            "donations",
        ),
        (
            "UPDATE documents SET uploaded_by = NULL WHERE uploaded_by = ?",
            "documents",
        ),
        ("DELETE FROM members WHERE id = ?", "members"),
    ] {
        if let Err(e) = tx.execute(sql, [&member_id]) {
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

fn with_privileged_conn(
    state: &mut AppState,
    req: &Request,
    f: impl FnOnce(&Connection, &serde_json::Value) -> Result<serde_json::Value, HandlerErr>,
) -> serde_json::Value {
    if let Err(e) = require_privileged(req) {
        return e.response(&req.id);
    }
    with_conn(state, req, f)
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "members.list" => Some(with_conn(state, req, members_list)),
        "members.create" => Some(with_privileged_conn(state, req, members_create)),
        "members.update" => Some(with_privileged_conn(state, req, members_update)),
        "members.delete" => Some(with_privileged_conn(state, req, members_delete)),
        _ => None,
    }
}
