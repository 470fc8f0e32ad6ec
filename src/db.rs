use rusqlite::Connection;
use std::path::Path;

pub fn open_db(workspace: &Path) -> anyhow::Result<Connection> {
    std::fs::create_dir_all(workspace)?;
    let db_path = workspace.join("dernek.sqlite3");
    let conn = Connection::open(db_path)?;
    conn.execute("PRAGMA foreign_keys = ON", [])?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS members(
            id TEXT PRIMARY KEY,
            first_name TEXT NOT NULL,
            last_name TEXT NOT NULL,
            role TEXT NOT NULL,
            active INTEGER NOT NULL DEFAULT 1,
            joined_at TEXT NOT NULL
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_members_role ON members(role)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS sessions(
            id TEXT PRIMARY KEY,
            title TEXT NOT NULL,
            kind TEXT NOT NULL,
            starts_at TEXT NOT NULL,
            check_in_token TEXT NOT NULL UNIQUE,
            token_expires_at TEXT,
            checkin_policy TEXT NOT NULL,
            created_at TEXT NOT NULL
        )",
        [],
    )?;
    // Existing workspaces may predate token expiry windows. Add if needed.
    ensure_sessions_token_expiry(&conn)?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_sessions_starts_at ON sessions(starts_at)",
        [],
    )?;

    // The (session_id, member_id) primary key is the only guard against
    // duplicate check-ins; the resolver relies on it under races.
    conn.execute(
        "CREATE TABLE IF NOT EXISTS attendance(
            session_id TEXT NOT NULL,
            member_id TEXT NOT NULL,
            check_in_method TEXT NOT NULL,
            checked_in_at TEXT NOT NULL,
            PRIMARY KEY(session_id, member_id),
            FOREIGN KEY(session_id) REFERENCES sessions(id),
            FOREIGN KEY(member_id) REFERENCES members(id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_attendance_member ON attendance(member_id)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS point_entries(
            id TEXT PRIMARY KEY,
            member_id TEXT NOT NULL,
            points INTEGER NOT NULL,
            reason TEXT NOT NULL,
            session_id TEXT,
            awarded_at TEXT NOT NULL,
            FOREIGN KEY(member_id) REFERENCES members(id),
            FOREIGN KEY(session_id) REFERENCES sessions(id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_point_entries_member ON point_entries(member_id)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS meetings(
            id TEXT PRIMARY KEY,
            title TEXT NOT NULL,
            held_at TEXT NOT NULL,
            notes TEXT
        )",
        [],
    )?;
    conn.execute(
        "CREATE TABLE IF NOT EXISTS meeting_decisions(
            id TEXT PRIMARY KEY,
            meeting_id TEXT NOT NULL,
            description TEXT NOT NULL,
            owner_member_id TEXT,
            due_date TEXT,
            status TEXT NOT NULL DEFAULT 'open',
            sort_order INTEGER NOT NULL,
            FOREIGN KEY(meeting_id) REFERENCES meetings(id),
            FOREIGN KEY(owner_member_id) REFERENCES members(id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_meeting_decisions_meeting ON meeting_decisions(meeting_id)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS donations(
            id TEXT PRIMARY KEY,
            donor_member_id TEXT,
            donor_name TEXT NOT NULL,
            amount REAL NOT NULL,
            currency TEXT NOT NULL DEFAULT 'TRY',
            donated_at TEXT NOT NULL,
            note TEXT,
            FOREIGN KEY(donor_member_id) REFERENCES members(id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_donations_member ON donations(donor_member_id)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS documents(
            id TEXT PRIMARY KEY,
            title TEXT NOT NULL,
            file_name TEXT NOT NULL,
            sha256 TEXT NOT NULL,
            byte_size INTEGER NOT NULL,
            uploaded_by TEXT,
            uploaded_at TEXT NOT NULL,
            shared_with_role TEXT,
            FOREIGN KEY(uploaded_by) REFERENCES members(id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_documents_role ON documents(shared_with_role)",
        [],
    )?;

    Ok(conn)
}

fn ensure_sessions_token_expiry(conn: &Connection) -> anyhow::Result<()> {
    if table_has_column(conn, "sessions", "token_expires_at")? {
        return Ok(());
    }
    conn.execute("ALTER TABLE sessions ADD COLUMN token_expires_at TEXT", [])?;
    Ok(())
}

fn table_has_column(conn: &Connection, table: &str, column: &str) -> anyhow::Result<bool> {
    let sql = format!("PRAGMA table_info({})", table);
    let mut stmt = conn.prepare(&sql)?;
    let mut rows = stmt.query([])?;
    while let Some(row) = rows.next()? {
        let name: String = row.get(1)?;
        if name == column {
            return Ok(true);
        }
    }
    Ok(false)
}
