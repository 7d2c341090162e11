use rusqlite::Connection;
use uuid::Uuid;

use tradehall_types::models::{Notification, NotificationPayload};

use crate::{Database, StoreError, StoreResult, get_ts, get_uuid, now, ts};

impl Database {
    /// Creates an unread notification outside any other workflow.
    pub fn notify(&self, recipient_id: Uuid, payload: NotificationPayload) -> StoreResult<Notification> {
        self.with_conn(|conn| insert_notification(conn, recipient_id, payload))
    }

    /// Newest first.
    pub fn list_notifications(&self, recipient_id: Uuid) -> StoreResult<Vec<Notification>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT id, recipient_id, payload, read, created_at FROM notifications
                 WHERE recipient_id = ?1
                 ORDER BY created_at DESC, rowid DESC",
            )?;
            let rows = stmt
                .query_map([recipient_id.to_string()], |row| {
                    Ok((
                        get_uuid(row, 0)?,
                        get_uuid(row, 1)?,
                        row.get::<_, String>(2)?,
                        row.get::<_, bool>(3)?,
                        get_ts(row, 4)?,
                    ))
                })?
                .collect::<Result<Vec<_>, _>>()?;

            rows.into_iter()
                .map(|(id, recipient_id, payload, read, created_at)| -> StoreResult<Notification> {
                    Ok(Notification {
                        id,
                        recipient_id,
                        payload: serde_json::from_str(&payload)?,
                        read,
                        created_at,
                    })
                })
                .collect()
        })
    }

    pub fn unread_count(&self, recipient_id: Uuid) -> StoreResult<usize> {
        self.with_conn(|conn| {
            let count: i64 = conn.query_row(
                "SELECT COUNT(*) FROM notifications WHERE recipient_id = ?1 AND read = 0",
                [recipient_id.to_string()],
                |row| row.get(0),
            )?;
            Ok(count as usize)
        })
    }

    /// Idempotent. Someone else's notification reads as not found.
    pub fn mark_read(&self, id: Uuid, recipient_id: Uuid) -> StoreResult<()> {
        self.with_conn(|conn| {
            let changed = conn.execute(
                "UPDATE notifications SET read = 1 WHERE id = ?1 AND recipient_id = ?2",
                (id.to_string(), recipient_id.to_string()),
            )?;
            if changed == 0 {
                return Err(StoreError::NotFound("notification"));
            }
            Ok(())
        })
    }
}

/// Inserts an unread notification using the caller's connection or transaction.
pub(crate) fn insert_notification(
    conn: &Connection,
    recipient_id: Uuid,
    payload: NotificationPayload,
) -> StoreResult<Notification> {
    let id = Uuid::new_v4();
    let created_at = now();

    conn.execute(
        "INSERT INTO notifications (id, recipient_id, kind, payload, read, created_at)
         VALUES (?1, ?2, ?3, ?4, 0, ?5)",
        (
            id.to_string(),
            recipient_id.to_string(),
            payload.kind(),
            serde_json::to_string(&payload)?,
            ts(&created_at),
        ),
    )?;

    Ok(Notification {
        id,
        recipient_id,
        payload,
        read: false,
        created_at,
    })
}
