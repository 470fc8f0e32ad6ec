use crate::ipc::error::err;
use crate::ipc::types::{Actor, Request};
use rusqlite::{Connection, OptionalExtension};
use serde_json::json;

pub const ROLES: &[&str] = &["admin", "tutor", "student", "board", "donor"];

/// Shared per-handler error carrier, mapped to the JSON error envelope at
/// the dispatch boundary.
pub struct HandlerErr {
    pub code: &'static str,
    pub message: String,
    pub details: Option<serde_json::Value>,
}

impl HandlerErr {
    pub fn new(code: &'static str, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            details: None,
        }
    }

    pub fn db(e: rusqlite::Error) -> Self {
        Self::new("db_query_failed", e.to_string())
    }

    pub fn response(self, id: &str) -> serde_json::Value {
        err(id, self.code, self.message, self.details)
    }
}

pub fn get_required_str(params: &serde_json::Value, key: &str) -> Result<String, HandlerErr> {
    params
        .get(key)
        .and_then(|v| v.as_str())
        .map(|s| s.to_string())
        .ok_or_else(|| HandlerErr::new("bad_params", format!("missing {}", key)))
}

pub fn get_opt_str(params: &serde_json::Value, key: &str) -> Option<String> {
    params
        .get(key)
        .and_then(|v| v.as_str())
        .map(|s| s.to_string())
        .filter(|s| !s.trim().is_empty())
}

pub fn get_required_i64(params: &serde_json::Value, key: &str) -> Result<i64, HandlerErr> {
    params
        .get(key)
        .and_then(|v| v.as_i64())
        .ok_or_else(|| HandlerErr::new("bad_params", format!("missing {}", key)))
}

pub fn get_required_f64(params: &serde_json::Value, key: &str) -> Result<f64, HandlerErr> {
    params
        .get(key)
        .and_then(|v| v.as_f64())
        .ok_or_else(|| HandlerErr::new("bad_params", format!("missing {}", key)))
}

pub fn validate_role(role: &str) -> Result<(), HandlerErr> {
    if ROLES.contains(&role) {
        return Ok(());
    }
    Err(HandlerErr {
        code: "bad_params",
        message: format!("unknown role: {}", role),
        details: Some(json!({ "roles": ROLES })),
    })
}

/// Operations that mutate on behalf of others require a tutor or admin actor.
pub fn require_privileged(req: &Request) -> Result<&Actor, HandlerErr> {
    let Some(actor) = req.actor.as_ref() else {
        return Err(HandlerErr::new("forbidden", "actor context required"));
    };
    if !actor.is_privileged() {
        return Err(HandlerErr::new(
            "forbidden",
            "requires tutor or admin role",
        ));
    }
    Ok(actor)
}

pub fn require_actor(req: &Request) -> Result<&Actor, HandlerErr> {
    req.actor
        .as_ref()
        .ok_or_else(|| HandlerErr::new("forbidden", "actor context required"))
}

pub fn member_exists(conn: &Connection, member_id: &str) -> Result<bool, HandlerErr> {
    conn.query_row("SELECT 1 FROM members WHERE id = ?", [member_id], |r| {
        r.get::<_, i64>(0)
    })
    .optional()
    .map(|v| v.is_some())
    .map_err(HandlerErr::db)
}

pub fn session_exists(conn: &Connection, session_id: &str) -> Result<bool, HandlerErr> {
    conn.query_row("SELECT 1 FROM sessions WHERE id = ?", [session_id], |r| {
        r.get::<_, i64>(0)
    })
    .optional()
    .map(|v| v.is_some())
    .map_err(HandlerErr::db)
}
