use crate::ipc::error::{err, ok};
use crate::ipc::helpers::{
    get_opt_str, get_required_f64, get_required_str, member_exists, require_privileged, HandlerErr,
};
use crate::ipc::types::{AppState, Request};
use chrono::Utc;
use rusqlite::Connection;
use serde_json::json;
use uuid::Uuid;

fn donations_record(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let donor_name = get_required_str(params, "donorName")?;
    if donor_name.trim().is_empty() {
        return Err(HandlerErr::new("bad_params", "donorName must not be empty"));
    }
    let amount = get_required_f64(params, "amount")?;
    if amount <= 0.0 {
        return Err(HandlerErr::new("bad_params", "amount must be positive"));
    }
    let currency = get_opt_str(params, "currency").unwrap_or_else(|| "TRY".to_string());
    let note = get_opt_str(params, "note");
    let donor_member_id = get_opt_str(params, "donorMemberId");
    if let Some(member_id) = donor_member_id.as_deref() {
        if !member_exists(conn, member_id)? {
            return Err(HandlerErr::new("not_found", "donor member not found"));
        }
    }

    let donation_id = Uuid::new_v4().to_string();
    let donated_at = get_opt_str(params, "donatedAt").unwrap_or_else(|| Utc::now().to_rfc3339());
    conn.execute(
        "INSERT INTO donations(id, donor_member_id, donor_name, amount, currency, donated_at, note)
         VALUES(?, ?, ?, ?, ?, ?, ?)",
        (
            &donation_id,
            &donor_member_id,
            donor_name.trim(),
            amount,
            currency.to_uppercase(),
            &donated_at,
            &note,
        ),
    )
    .map_err(|e| HandlerErr {
        code: "db_insert_failed",
        message: e.to_string(),
        details: Some(json!({ "table": "donations" })),
    })?;

    Ok(json!({ "donationId": donation_id }))
}

fn donations_list(conn: &Connection, _params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let mut stmt = conn
        .prepare(
            "SELECT id, donor_member_id, donor_name, amount, currency, donated_at, note
             FROM donations
             ORDER BY donated_at DESC",
        )
        .map_err(HandlerErr::db)?;
    let donations = stmt
        .query_map([], |r| {
            Ok(json!({
                "id": r.get::<_, String>(0)?,
                "donorMemberId": r.get::<_, Option<String>>(1)?,
                "donorName": r.get::<_, String>(2)?,
                "amount": r.get::<_, f64>(3)?,
                "currency": r.get::<_, String>(4)?,
                "donatedAt": r.get::<_, String>(5)?,
                "note": r.get::<_, Option<String>>(6)?,
            }))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(HandlerErr::db)?;

    let mut totals_stmt = conn
        .prepare(
            "SELECT currency, SUM(amount), COUNT(*)
             FROM donations
             GROUP BY currency
             ORDER BY currency",
        )
        .map_err(HandlerErr::db)?;
    let totals = totals_stmt
        .query_map([], |r| {
            Ok(json!({
                "currency": r.get::<_, String>(0)?,
                "total": r.get::<_, f64>(1)?,
                "count": r.get::<_, i64>(2)?,
            }))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(HandlerErr::db)?;

    Ok(json!({ "donations": donations, "totals": totals }))
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
        "donations.record" => Some(dispatch(state, req, true, donations_record)),
        "donations.list" => Some(dispatch(state, req, false, donations_list)),
        _ => None,
    }
}
