use std::path::PathBuf;

use rusqlite::Connection;
use serde::Deserialize;

/// Authenticated caller context supplied by the host application. The host
/// owns authentication; the daemon only enforces role checks.
#[derive(Debug, Deserialize, Clone, Default)]
#[serde(rename_all = "camelCase")]
pub struct Actor {
    pub member_id: String,
    #[serde(default)]
    pub roles: Vec<String>,
}

impl Actor {
    pub fn has_role(&self, role: &str) -> bool {
        self.roles.iter().any(|r| r == role)
    }

    pub fn is_privileged(&self) -> bool {
        self.has_role("admin") || self.has_role("tutor")
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct Request {
    pub id: String,
    pub method: String,
    #[serde(default)]
    pub params: serde_json::Value,
    #[serde(default)]
    pub actor: Option<Actor>,
}

pub struct AppState {
    pub workspace: Option<PathBuf>,
    pub db: Option<Connection>,
}
