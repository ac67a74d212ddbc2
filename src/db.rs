use anyhow::Context;
use rusqlite::{Connection, OptionalExtension};
use std::path::Path;
use tracing::warn;

pub const DB_FILE_NAME: &str = "classhub.sqlite3";

pub fn open_db(workspace: &Path) -> anyhow::Result<Connection> {
    std::fs::create_dir_all(workspace)
        .with_context(|| format!("create workspace {}", workspace.to_string_lossy()))?;
    let db_path = workspace.join(DB_FILE_NAME);
    let conn = Connection::open(&db_path)
        .with_context(|| format!("open {}", db_path.to_string_lossy()))?;
    init_schema(&conn).context("initialise schema")?;
    Ok(conn)
}

pub fn init_schema(conn: &Connection) -> anyhow::Result<()> {
    conn.execute("PRAGMA foreign_keys = ON", [])?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS classes(
            id TEXT PRIMARY KEY,
            name TEXT NOT NULL UNIQUE
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS users(
            id TEXT PRIMARY KEY,
            username TEXT NOT NULL UNIQUE,
            password_hash TEXT NOT NULL,
            class_id TEXT,
            paid INTEGER NOT NULL DEFAULT 0,
            banned INTEGER NOT NULL DEFAULT 0,
            created_at TEXT,
            FOREIGN KEY(class_id) REFERENCES classes(id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_users_class ON users(class_id)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS resources(
            id TEXT PRIMARY KEY,
            filename TEXT NOT NULL,
            class_id TEXT NOT NULL,
            filepath TEXT NOT NULL,
            title TEXT NOT NULL,
            description TEXT NOT NULL DEFAULT '',
            category TEXT NOT NULL,
            paid_status TEXT NOT NULL DEFAULT 'all',
            uploaded_by TEXT,
            uploaded_at TEXT NOT NULL,
            download_count INTEGER NOT NULL DEFAULT 0,
            is_active INTEGER NOT NULL DEFAULT 1,
            FOREIGN KEY(class_id) REFERENCES classes(id)
        )",
        [],
    )?;
    // Workspaces created before soft delete and uploader tracking lack these columns.
    ensure_resources_is_active(conn)?;
    ensure_resources_uploaded_by(conn)?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_resources_class ON resources(class_id)",
        [],
    )?;
    retire_duplicate_active_resources(conn)?;
    conn.execute(
        "CREATE UNIQUE INDEX IF NOT EXISTS idx_resources_active_title_class
         ON resources(title, class_id) WHERE is_active = 1",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS notifications(
            id TEXT PRIMARY KEY,
            title TEXT NOT NULL,
            message TEXT NOT NULL,
            target TEXT NOT NULL CHECK(target IN ('all', 'paid')),
            class_id TEXT,
            resource_id TEXT,
            created_by TEXT,
            created_at TEXT NOT NULL,
            FOREIGN KEY(class_id) REFERENCES classes(id),
            FOREIGN KEY(resource_id) REFERENCES resources(id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_notifications_class ON notifications(class_id)",
        [],
    )?;
    conn.execute(
        "CREATE TABLE IF NOT EXISTS user_notifications(
            user_id TEXT NOT NULL,
            notification_id TEXT NOT NULL,
            read_at TEXT NOT NULL,
            PRIMARY KEY(user_id, notification_id),
            FOREIGN KEY(user_id) REFERENCES users(id),
            FOREIGN KEY(notification_id) REFERENCES notifications(id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE TABLE IF NOT EXISTS mention_notifications(
            id TEXT PRIMARY KEY,
            user_id TEXT NOT NULL,
            source TEXT NOT NULL,
            message TEXT NOT NULL,
            created_at TEXT NOT NULL,
            is_read INTEGER NOT NULL DEFAULT 0,
            FOREIGN KEY(user_id) REFERENCES users(id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_mention_notifications_user ON mention_notifications(user_id)",
        [],
    )?;

    // Admissions are written by the intake forms; only the shape lives here.
    conn.execute(
        "CREATE TABLE IF NOT EXISTS admissions(
            id TEXT PRIMARY KEY,
            student_name TEXT NOT NULL,
            guardian_name TEXT,
            phone TEXT,
            email TEXT,
            class_applied TEXT,
            status TEXT NOT NULL DEFAULT 'pending'
                CHECK(status IN ('pending', 'approved', 'disapproved')),
            submitted_at TEXT NOT NULL,
            reviewed_at TEXT
        )",
        [],
    )?;
    conn.execute(
        "CREATE TABLE IF NOT EXISTS admission_access(
            id TEXT PRIMARY KEY,
            admission_id TEXT NOT NULL,
            user_id TEXT NOT NULL,
            granted_at TEXT NOT NULL,
            FOREIGN KEY(admission_id) REFERENCES admissions(id),
            FOREIGN KEY(user_id) REFERENCES users(id)
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS settings(
            key TEXT PRIMARY KEY,
            value_json TEXT NOT NULL
        )",
        [],
    )?;

    Ok(())
}

pub fn settings_get_json(conn: &Connection, key: &str) -> anyhow::Result<Option<serde_json::Value>> {
    let raw: Option<String> = conn
        .query_row(
            "SELECT value_json FROM settings WHERE key = ?",
            [key],
            |r| r.get(0),
        )
        .optional()?;
    match raw {
        Some(text) => Ok(Some(serde_json::from_str(&text)?)),
        None => Ok(None),
    }
}

pub fn settings_set_json(
    conn: &Connection,
    key: &str,
    value: &serde_json::Value,
) -> anyhow::Result<()> {
    conn.execute(
        "INSERT INTO settings(key, value_json) VALUES(?, ?)
         ON CONFLICT(key) DO UPDATE SET value_json = excluded.value_json",
        (key, serde_json::to_string(value)?),
    )?;
    Ok(())
}

fn ensure_resources_is_active(conn: &Connection) -> anyhow::Result<()> {
    if table_has_column(conn, "resources", "is_active")? {
        return Ok(());
    }
    conn.execute(
        "ALTER TABLE resources ADD COLUMN is_active INTEGER NOT NULL DEFAULT 1",
        [],
    )?;
    Ok(())
}

fn ensure_resources_uploaded_by(conn: &Connection) -> anyhow::Result<()> {
    if table_has_column(conn, "resources", "uploaded_by")? {
        return Ok(());
    }
    conn.execute("ALTER TABLE resources ADD COLUMN uploaded_by TEXT", [])?;
    Ok(())
}

/// Older workspaces may hold several active rows for one title and class.
/// The newest one stays active; the rest are soft-deleted so the unique index can be built.
fn retire_duplicate_active_resources(conn: &Connection) -> anyhow::Result<()> {
    let retired = conn.execute(
        "UPDATE resources SET is_active = 0
         WHERE is_active = 1
           AND EXISTS (
             SELECT 1 FROM resources newer
             WHERE newer.is_active = 1
               AND newer.title = resources.title
               AND newer.class_id = resources.class_id
               AND (newer.uploaded_at > resources.uploaded_at
                    OR (newer.uploaded_at = resources.uploaded_at AND newer.rowid > resources.rowid))
           )",
        [],
    )?;
    if retired > 0 {
        warn!(retired, "deactivated duplicate active resources");
    }
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
