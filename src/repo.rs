//! Typed data access for the tables the upload pipeline and notification
//! feed touch. Everything here borrows a connection (or a transaction,
//! which derefs to one) and returns `rusqlite` errors untouched.

use chrono::{SecondsFormat, Utc};
use rusqlite::{params_from_iter, Connection, OptionalExtension};
use serde::Serialize;
use uuid::Uuid;

pub fn now_rfc3339() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true)
}

/// Who may see a resource or notification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Access {
    All,
    Paid,
}

impl Access {
    pub fn as_str(self) -> &'static str {
        match self {
            Access::All => "all",
            Access::Paid => "paid",
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ClassRow {
    pub id: String,
    pub name: String,
    pub resource_count: i64,
}

#[derive(Debug, Clone)]
pub struct NewResource<'a> {
    pub filename: &'a str,
    pub class_id: &'a str,
    pub filepath: &'a str,
    pub title: &'a str,
    pub description: &'a str,
    pub category: &'a str,
    pub paid_status: Access,
    pub uploaded_by: &'a str,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ResourceRow {
    pub id: String,
    pub filename: String,
    pub class_id: String,
    pub class_name: String,
    pub filepath: String,
    pub title: String,
    pub description: String,
    pub category: String,
    pub paid_status: String,
    pub uploaded_by: Option<String>,
    pub uploaded_at: String,
    pub download_count: i64,
    pub is_active: bool,
}

#[derive(Debug, Clone)]
pub struct NewNotification<'a> {
    pub title: &'a str,
    pub message: &'a str,
    pub target: Access,
    pub class_id: Option<&'a str>,
    pub resource_id: Option<&'a str>,
    pub created_by: Option<&'a str>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NotificationRow {
    pub id: String,
    pub title: String,
    pub message: String,
    pub target: String,
    pub class_id: Option<String>,
    pub resource_id: Option<String>,
    pub created_at: String,
    pub read: bool,
}

#[derive(Debug, Clone)]
pub struct UserRow {
    pub id: String,
    pub class_id: Option<String>,
    pub paid: bool,
    pub banned: bool,
}

pub struct Repository<'c> {
    conn: &'c Connection,
}

impl<'c> Repository<'c> {
    pub fn new(conn: &'c Connection) -> Self {
        Self { conn }
    }

    pub fn find_class_id_by_name(&self, name: &str) -> rusqlite::Result<Option<String>> {
        self.conn
            .query_row("SELECT id FROM classes WHERE name = ?", [name], |r| r.get(0))
            .optional()
    }

    pub fn create_class(&self, name: &str) -> rusqlite::Result<String> {
        let id = Uuid::new_v4().to_string();
        self.conn
            .execute("INSERT INTO classes(id, name) VALUES(?, ?)", (&id, name))?;
        Ok(id)
    }

    pub fn list_classes(&self) -> rusqlite::Result<Vec<ClassRow>> {
        let mut stmt = self.conn.prepare(
            "SELECT
               c.id,
               c.name,
               (SELECT COUNT(*) FROM resources r WHERE r.class_id = c.id AND r.is_active = 1)
             FROM classes c
             ORDER BY c.name",
        )?;
        let rows = stmt.query_map([], |r| {
            Ok(ClassRow {
                id: r.get(0)?,
                name: r.get(1)?,
                resource_count: r.get(2)?,
            })
        })?;
        rows.collect()
    }

    pub fn find_active_resource(&self, title: &str, class_id: &str) -> rusqlite::Result<Option<String>> {
        self.conn
            .query_row(
                "SELECT id FROM resources WHERE title = ? AND class_id = ? AND is_active = 1",
                [title, class_id],
                |r| r.get(0),
            )
            .optional()
    }

    pub fn insert_resource(&self, res: &NewResource<'_>) -> rusqlite::Result<String> {
        let id = Uuid::new_v4().to_string();
        self.conn.execute(
            "INSERT INTO resources(
               id, filename, class_id, filepath, title, description, category,
               paid_status, uploaded_by, uploaded_at, download_count, is_active)
             VALUES(?, ?, ?, ?, ?, ?, ?, ?, ?, ?, 0, 1)",
            (
                &id,
                res.filename,
                res.class_id,
                res.filepath,
                res.title,
                res.description,
                res.category,
                res.paid_status.as_str(),
                res.uploaded_by,
                now_rfc3339(),
            ),
        )?;
        Ok(id)
    }

    pub fn list_resources(
        &self,
        class_id: Option<&str>,
        include_inactive: bool,
    ) -> rusqlite::Result<Vec<ResourceRow>> {
        let mut sql = String::from(
            "SELECT r.id, r.filename, r.class_id, c.name, r.filepath, r.title, r.description,
                    r.category, r.paid_status, r.uploaded_by, r.uploaded_at, r.download_count,
                    r.is_active
             FROM resources r
             JOIN classes c ON c.id = r.class_id
             WHERE 1 = 1",
        );
        let mut binds: Vec<String> = Vec::new();
        if let Some(cid) = class_id {
            sql.push_str(" AND r.class_id = ?");
            binds.push(cid.to_string());
        }
        if !include_inactive {
            sql.push_str(" AND r.is_active = 1");
        }
        sql.push_str(" ORDER BY r.uploaded_at DESC, r.title");

        let mut stmt = self.conn.prepare(&sql)?;
        let rows = stmt.query_map(params_from_iter(binds.iter()), |r| {
            Ok(ResourceRow {
                id: r.get(0)?,
                filename: r.get(1)?,
                class_id: r.get(2)?,
                class_name: r.get(3)?,
                filepath: r.get(4)?,
                title: r.get(5)?,
                description: r.get(6)?,
                category: r.get(7)?,
                paid_status: r.get(8)?,
                uploaded_by: r.get(9)?,
                uploaded_at: r.get(10)?,
                download_count: r.get(11)?,
                is_active: r.get::<_, i64>(12)? != 0,
            })
        })?;
        rows.collect()
    }

    /// Soft delete. Returns false when no active resource has that id.
    pub fn deactivate_resource(&self, resource_id: &str) -> rusqlite::Result<bool> {
        let changed = self.conn.execute(
            "UPDATE resources SET is_active = 0 WHERE id = ? AND is_active = 1",
            [resource_id],
        )?;
        Ok(changed > 0)
    }

    pub fn record_download(&self, resource_id: &str) -> rusqlite::Result<Option<(String, i64)>> {
        let changed = self.conn.execute(
            "UPDATE resources SET download_count = download_count + 1
             WHERE id = ? AND is_active = 1",
            [resource_id],
        )?;
        if changed == 0 {
            return Ok(None);
        }
        self.conn
            .query_row(
                "SELECT filepath, download_count FROM resources WHERE id = ?",
                [resource_id],
                |r| Ok((r.get(0)?, r.get(1)?)),
            )
            .optional()
    }

    pub fn insert_notification(&self, n: &NewNotification<'_>) -> rusqlite::Result<String> {
        let id = Uuid::new_v4().to_string();
        self.conn.execute(
            "INSERT INTO notifications(id, title, message, target, class_id, resource_id, created_by, created_at)
             VALUES(?, ?, ?, ?, ?, ?, ?, ?)",
            (
                &id,
                n.title,
                n.message,
                n.target.as_str(),
                n.class_id,
                n.resource_id,
                n.created_by,
                now_rfc3339(),
            ),
        )?;
        Ok(id)
    }

    pub fn find_user(&self, user_id: &str) -> rusqlite::Result<Option<UserRow>> {
        self.conn
            .query_row(
                "SELECT id, class_id, paid, banned FROM users WHERE id = ?",
                [user_id],
                |r| {
                    Ok(UserRow {
                        id: r.get(0)?,
                        class_id: r.get(1)?,
                        paid: r.get::<_, i64>(2)? != 0,
                        banned: r.get::<_, i64>(3)? != 0,
                    })
                },
            )
            .optional()
    }

    /// Notifications visible to `user`: `all` targets for everyone, `paid` only for
    /// paying users, and class-scoped ones only for members of that class.
    pub fn notifications_for_user(
        &self,
        user: &UserRow,
        unread_only: bool,
    ) -> rusqlite::Result<Vec<NotificationRow>> {
        let mut sql = String::from(
            "SELECT n.id, n.title, n.message, n.target, n.class_id, n.resource_id, n.created_at,
                    un.read_at IS NOT NULL
             FROM notifications n
             LEFT JOIN user_notifications un
               ON un.notification_id = n.id AND un.user_id = ?1
             WHERE (n.target = 'all' OR (n.target = 'paid' AND ?2 = 1))
               AND (n.class_id IS NULL OR n.class_id = ?3)",
        );
        if unread_only {
            sql.push_str(" AND un.read_at IS NULL");
        }
        sql.push_str(" ORDER BY n.created_at DESC, n.rowid DESC");

        let mut stmt = self.conn.prepare(&sql)?;
        let rows = stmt.query_map(
            (&user.id, if user.paid { 1 } else { 0 }, &user.class_id),
            |r| {
                Ok(NotificationRow {
                    id: r.get(0)?,
                    title: r.get(1)?,
                    message: r.get(2)?,
                    target: r.get(3)?,
                    class_id: r.get(4)?,
                    resource_id: r.get(5)?,
                    created_at: r.get(6)?,
                    read: r.get::<_, i64>(7)? != 0,
                })
            },
        )?;
        rows.collect()
    }

    /// Returns false when the notification does not exist.
    pub fn mark_notification_read(&self, user_id: &str, notification_id: &str) -> rusqlite::Result<bool> {
        let exists = self
            .conn
            .query_row(
                "SELECT 1 FROM notifications WHERE id = ?",
                [notification_id],
                |r| r.get::<_, i64>(0),
            )
            .optional()?
            .is_some();
        if !exists {
            return Ok(false);
        }
        self.conn.execute(
            "INSERT OR IGNORE INTO user_notifications(user_id, notification_id, read_at)
             VALUES(?, ?, ?)",
            (user_id, notification_id, now_rfc3339()),
        )?;
        Ok(true)
    }
}
