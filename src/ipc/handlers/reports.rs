use crate::ipc::error::{err, ok};
use crate::ipc::helpers::{get_required_str, member_exists, HandlerErr};
use crate::ipc::types::{AppState, Request};
use chrono::{Duration, NaiveDate, TimeZone, Utc};
use rusqlite::Connection;
use serde_json::json;
use std::collections::HashMap;

/// Parses a YYYY-MM-DD week start (a Monday) into the UTC RFC 3339 bounds
/// [start, start+7d). Stored timestamps are normalized UTC RFC 3339, so
/// string comparison in SQL is chronological.
fn week_bounds(week_start: &str) -> Result<(String, String), HandlerErr> {
    let date = NaiveDate::parse_from_str(week_start, "%Y-%m-%d")
        .map_err(|_| HandlerErr::new("bad_params", "weekStart must be YYYY-MM-DD"))?;
    let midnight = |d: NaiveDate| {
        d.and_hms_opt(0, 0, 0)
            .ok_or_else(|| HandlerErr::new("bad_params", "weekStart out of range"))
    };
    let start = Utc.from_utc_datetime(&midnight(date)?).to_rfc3339();
    let end = Utc
        .from_utc_datetime(&midnight(date + Duration::days(7))?)
        .to_rfc3339();
    Ok((start, end))
}

fn weekly_attendance(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let week_start = get_required_str(params, "weekStart")?;
    let (start, end) = week_bounds(&week_start)?;

    let mut stmt = conn
        .prepare(
            "SELECT s.id, s.title, s.kind, s.starts_at, a.check_in_method
             FROM sessions s
             LEFT JOIN attendance a ON a.session_id = s.id
             WHERE s.starts_at >= ? AND s.starts_at < ?
             ORDER BY s.starts_at",
        )
        .map_err(HandlerErr::db)?;
    let rows = stmt
        .query_map((&start, &end), |r| {
            Ok((
                r.get::<_, String>(0)?,
                r.get::<_, String>(1)?,
                r.get::<_, String>(2)?,
                r.get::<_, String>(3)?,
                r.get::<_, Option<String>>(4)?,
            ))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(HandlerErr::db)?;

    struct SessionAgg {
        title: String,
        kind: String,
        starts_at: String,
        attendees: i64,
        by_qr: i64,
        by_manual: i64,
    }

    let mut order: Vec<String> = Vec::new();
    let mut by_session: HashMap<String, SessionAgg> = HashMap::new();
    for (id, title, kind, starts_at, method) in rows {
        let agg = by_session.entry(id.clone()).or_insert_with(|| {
            order.push(id);
            SessionAgg {
                title,
                kind,
                starts_at,
                attendees: 0,
                by_qr: 0,
                by_manual: 0,
            }
        });
        match method.as_deref() {
            Some("qr") => {
                agg.attendees += 1;
                agg.by_qr += 1;
            }
            Some(_) => {
                agg.attendees += 1;
                agg.by_manual += 1;
            }
            None => {}
        }
    }

    let mut total_attendance = 0;
    let sessions: Vec<serde_json::Value> = order
        .iter()
        .map(|id| {
            let agg = &by_session[id];
            total_attendance += agg.attendees;
            json!({
                "sessionId": id,
                "title": agg.title,
                "kind": agg.kind,
                "startsAt": agg.starts_at,
                "attendeeCount": agg.attendees,
                "byQr": agg.by_qr,
                "byManual": agg.by_manual,
            })
        })
        .collect();

    Ok(json!({
        "weekStart": week_start,
        "sessionCount": sessions.len(),
        "totalAttendance": total_attendance,
        "sessions": sessions,
    }))
}

fn member_attendance(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let member_id = get_required_str(params, "memberId")?;
    if !member_exists(conn, &member_id)? {
        return Err(HandlerErr::new("not_found", "member not found"));
    }

    // Only sessions that have started count toward the rate; a member can't
    // have missed a session that hasn't happened yet.
    let now = Utc::now().to_rfc3339();
    let mut stmt = conn
        .prepare(
            "SELECT
               s.kind,
               COUNT(*) AS total,
               SUM(CASE WHEN a.member_id IS NOT NULL THEN 1 ELSE 0 END) AS attended
             FROM sessions s
             LEFT JOIN attendance a ON a.session_id = s.id AND a.member_id = ?
             WHERE s.starts_at <= ?
             GROUP BY s.kind
             ORDER BY s.kind",
        )
        .map_err(HandlerErr::db)?;
    let rows = stmt
        .query_map((&member_id, &now), |r| {
            Ok((
                r.get::<_, String>(0)?,
                r.get::<_, i64>(1)?,
                r.get::<_, i64>(2)?,
            ))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(HandlerErr::db)?;

    let mut total = 0;
    let mut attended = 0;
    let by_kind: Vec<serde_json::Value> = rows
        .into_iter()
        .map(|(kind, kind_total, kind_attended)| {
            total += kind_total;
            attended += kind_attended;
            json!({
                "kind": kind,
                "totalSessions": kind_total,
                "attended": kind_attended,
            })
        })
        .collect();
    let rate = if total > 0 {
        100 * attended / total
    } else {
        0
    };

    Ok(json!({
        "memberId": member_id,
        "totalSessions": total,
        "attended": attended,
        "attendanceRate": rate,
        "byKind": by_kind,
    }))
}

fn donation_totals(conn: &Connection, _params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let mut stmt = conn
        .prepare(
            "SELECT currency, SUM(amount), COUNT(*)
             FROM donations
             GROUP BY currency
             ORDER BY currency",
        )
        .map_err(HandlerErr::db)?;
    let totals = stmt
        .query_map([], |r| {
            Ok(json!({
                "currency": r.get::<_, String>(0)?,
                "total": r.get::<_, f64>(1)?,
                "count": r.get::<_, i64>(2)?,
            }))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(HandlerErr::db)?;

    Ok(json!({ "totals": totals }))
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
        "reports.weeklyAttendance" => Some(with_conn(state, req, weekly_attendance)),
        "reports.memberAttendance" => Some(with_conn(state, req, member_attendance)),
        "reports.donationTotals" => Some(with_conn(state, req, donation_totals)),
        _ => None,
    }
}
