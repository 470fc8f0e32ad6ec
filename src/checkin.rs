use chrono::{DateTime, Utc};
use rusqlite::{Connection, OptionalExtension};

/// What a second scan of the same (session, member) pair does. Two named
/// policies; flows never infer one from the other.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CheckInPolicy {
    /// Repeat check-in returns the existing record unchanged.
    Idempotent,
    /// Repeat check-in deletes the record (workshop join/leave).
    Toggle,
}

impl CheckInPolicy {
    pub fn as_str(self) -> &'static str {
        match self {
            CheckInPolicy::Idempotent => "idempotent",
            CheckInPolicy::Toggle => "toggle",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "idempotent" => Some(CheckInPolicy::Idempotent),
            "toggle" => Some(CheckInPolicy::Toggle),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct AttendanceRecord {
    pub session_id: String,
    pub member_id: String,
    pub check_in_method: String,
    pub checked_in_at: String,
}

#[derive(Debug, Clone, PartialEq)]
pub enum CheckInOutcome {
    CheckedIn(AttendanceRecord),
    AlreadyCheckedIn(AttendanceRecord),
    Left { session_id: String, member_id: String },
}

impl CheckInOutcome {
    /// Message shown verbatim by the host UI.
    pub fn user_message(&self) -> &'static str {
        match self {
            CheckInOutcome::CheckedIn(_) => "Giriş başarılı.",
            CheckInOutcome::AlreadyCheckedIn(_) => "Zaten giriş yapmışsınız.",
            CheckInOutcome::Left { .. } => "Katılımınız geri alındı.",
        }
    }
}

#[derive(Debug)]
pub enum CheckInError {
    InvalidToken,
    TokenExpired,
    Db(rusqlite::Error),
}

impl CheckInError {
    pub fn code(&self) -> &'static str {
        match self {
            CheckInError::InvalidToken => "invalid_token",
            CheckInError::TokenExpired => "token_expired",
            CheckInError::Db(_) => "db_query_failed",
        }
    }

    /// Message shown verbatim by the host UI.
    pub fn user_message(&self) -> &'static str {
        match self {
            CheckInError::InvalidToken => "Geçersiz QR kodu.",
            CheckInError::TokenExpired => "QR kodunun süresi dolmuş.",
            CheckInError::Db(_) => "Bir hata oluştu, lütfen tekrar deneyin.",
        }
    }
}

impl From<rusqlite::Error> for CheckInError {
    fn from(e: rusqlite::Error) -> Self {
        CheckInError::Db(e)
    }
}

/// Resolves a scanned token to its session and records attendance for the
/// member. Exactly one row is inserted or deleted per call; the composite
/// primary key on attendance collapses racing duplicates into the
/// already-exists branch.
pub fn resolve_check_in(
    conn: &Connection,
    token: &str,
    member_id: &str,
    method: &str,
    now: DateTime<Utc>,
) -> Result<CheckInOutcome, CheckInError> {
    let session: Option<(String, Option<String>, String)> = conn
        .query_row(
            "SELECT id, token_expires_at, checkin_policy
             FROM sessions
             WHERE check_in_token = ?",
            [token],
            |r| Ok((r.get(0)?, r.get(1)?, r.get(2)?)),
        )
        .optional()?;

    let Some((session_id, expires_at, policy_raw)) = session else {
        return Err(CheckInError::InvalidToken);
    };

    if let Some(expires_at) = expires_at.as_deref() {
        if let Ok(expiry) = DateTime::parse_from_rfc3339(expires_at) {
            if now > expiry.with_timezone(&Utc) {
                return Err(CheckInError::TokenExpired);
            }
        }
    }

    let policy = CheckInPolicy::parse(&policy_raw).unwrap_or(CheckInPolicy::Idempotent);
    record_attendance(conn, &session_id, member_id, method, policy, now)
}

/// Records attendance directly against a known session (manual entry by a
/// tutor or admin). Same duplicate semantics as the scan path.
pub fn record_attendance(
    conn: &Connection,
    session_id: &str,
    member_id: &str,
    method: &str,
    policy: CheckInPolicy,
    now: DateTime<Utc>,
) -> Result<CheckInOutcome, CheckInError> {
    let checked_in_at = now.to_rfc3339();
    let inserted = conn.execute(
        "INSERT INTO attendance(session_id, member_id, check_in_method, checked_in_at)
         VALUES(?, ?, ?, ?)
         ON CONFLICT(session_id, member_id) DO NOTHING",
        (session_id, member_id, method, &checked_in_at),
    )?;

    if inserted == 1 {
        return Ok(CheckInOutcome::CheckedIn(AttendanceRecord {
            session_id: session_id.to_string(),
            member_id: member_id.to_string(),
            check_in_method: method.to_string(),
            checked_in_at,
        }));
    }

    match policy {
        CheckInPolicy::Idempotent => {
            let existing: Option<AttendanceRecord> = conn
                .query_row(
                    "SELECT check_in_method, checked_in_at
                     FROM attendance
                     WHERE session_id = ? AND member_id = ?",
                    (session_id, member_id),
                    |r| {
                        Ok(AttendanceRecord {
                            session_id: session_id.to_string(),
                            member_id: member_id.to_string(),
                            check_in_method: r.get(0)?,
                            checked_in_at: r.get(1)?,
                        })
                    },
                )
                .optional()?;
            match existing {
                Some(record) => Ok(CheckInOutcome::AlreadyCheckedIn(record)),
                // The row vanished between insert and read; record afresh.
                None => record_attendance(conn, session_id, member_id, method, policy, now),
            }
        }
        CheckInPolicy::Toggle => {
            conn.execute(
                "DELETE FROM attendance WHERE session_id = ? AND member_id = ?",
                (session_id, member_id),
            )?;
            Ok(CheckInOutcome::Left {
                session_id: session_id.to_string(),
                member_id: member_id.to_string(),
            })
        }
    }
}
