use rusqlite::{Connection, Row};
use tracing::info;
use uuid::Uuid;

use tradehall_types::api::QueueView;
use tradehall_types::models::{NotificationPayload, QueueEntry, QueueStatus, Role};

use crate::models::Assignment;
use crate::notifications::insert_notification;
use crate::rooms::insert_room;
use crate::users::{find_user_by_identifier, query_user_by_id};
use crate::{Database, OptionalExt, StoreError, StoreResult};
use crate::{get_opt_ts, get_opt_uuid, get_parsed, get_ts, get_uuid, now, ts};

const ENTRY_COLUMNS: &str = "id, requester_id, requester_display_name, counterparty_hint, status,
     requested_at, accepted_at, cancelled_at, broker_id";

impl Database {
    /// Puts the requester in line. Fails with `AlreadyQueued` while they have a waiting entry.
    pub fn submit_request(&self, requester_id: Uuid, counterparty_hint: &str) -> StoreResult<QueueEntry> {
        let hint = counterparty_hint.trim().to_string();

        self.with_tx(|tx| {
            let requester = query_user_by_id(tx, requester_id)?.ok_or(StoreError::NotFound("user"))?;

            let waiting = tx
                .query_row(
                    "SELECT id FROM queue_entries WHERE requester_id = ?1 AND status = 'waiting'",
                    [requester_id.to_string()],
                    |row| row.get::<_, String>(0),
                )
                .optional()?;
            if waiting.is_some() {
                return Err(StoreError::AlreadyQueued);
            }

            let entry = QueueEntry {
                id: Uuid::new_v4(),
                requester_id,
                requester_display_name: requester.username,
                counterparty_hint: hint,
                status: QueueStatus::Waiting,
                requested_at: now(),
                accepted_at: None,
                cancelled_at: None,
                broker_id: None,
            };

            tx.execute(
                "INSERT INTO queue_entries
                    (id, requester_id, requester_display_name, counterparty_hint, status, requested_at)
                 VALUES (?1, ?2, ?3, ?4, 'waiting', ?5)",
                (
                    entry.id.to_string(),
                    requester_id.to_string(),
                    &entry.requester_display_name,
                    &entry.counterparty_hint,
                    ts(&entry.requested_at),
                ),
            )?;
            bump_queue_version(tx)?;

            info!("{} joined the middleman queue", entry.requester_display_name);
            Ok(entry)
        })
    }

    /// Cancels a waiting entry. Allowed for the requester and for any broker.
    pub fn cancel_request(&self, entry_id: Uuid, by: Uuid) -> StoreResult<QueueEntry> {
        self.with_tx(|tx| {
            let entry = query_entry(tx, entry_id)?.ok_or(StoreError::NotFound("queue entry"))?;

            if entry.requester_id != by {
                let actor = query_user_by_id(tx, by)?.ok_or(StoreError::NotFound("user"))?;
                if actor.role != Role::Broker {
                    return Err(StoreError::Permission("only the requester or a broker can cancel"));
                }
            }
            if entry.status != QueueStatus::Waiting {
                return Err(StoreError::AlreadyProcessed);
            }

            let cancelled_at = now();
            tx.execute(
                "UPDATE queue_entries SET status = 'cancelled', cancelled_at = ?1 WHERE id = ?2",
                (ts(&cancelled_at), entry_id.to_string()),
            )?;
            bump_queue_version(tx)?;

            info!("Queue entry {} cancelled by {}", entry_id, by);
            Ok(QueueEntry {
                status: QueueStatus::Cancelled,
                cancelled_at: Some(cancelled_at),
                ..entry
            })
        })
    }

    /// Waiting entries, oldest request first. Insertion order breaks timestamp ties.
    pub fn list_waiting(&self) -> StoreResult<Vec<QueueEntry>> {
        self.with_conn(query_waiting)
    }

    /// The waiting list together with the version it was read at.
    pub fn queue_view(&self) -> StoreResult<QueueView> {
        self.with_conn(|conn| {
            let version: i64 =
                conn.query_row("SELECT version FROM queue_state WHERE id = 1", [], |row| row.get(0))?;
            Ok(QueueView {
                version: version as u64,
                entries: query_waiting(conn)?,
            })
        })
    }

    pub fn get_queue_entry(&self, id: Uuid) -> StoreResult<Option<QueueEntry>> {
        self.with_conn(|conn| query_entry(conn, id))
    }

    /// Claims a waiting entry for `broker_id`, resolves the counterparty, creates the
    /// trade room and notifies both traders. All of it commits or none of it does.
    pub fn accept_request(
        &self,
        entry_id: Uuid,
        broker_id: Uuid,
        counterparty: &str,
    ) -> StoreResult<Assignment> {
        let counterparty = counterparty.trim();
        if counterparty.is_empty() {
            return Err(StoreError::validation("enter the other trader's username"));
        }

        self.with_tx(|tx| {
            let broker = query_user_by_id(tx, broker_id)?.ok_or(StoreError::NotFound("user"))?;
            if broker.role != Role::Broker {
                return Err(StoreError::Permission("only brokers can accept queue entries"));
            }

            let entry = query_entry(tx, entry_id)?.ok_or(StoreError::NotFound("queue entry"))?;
            if entry.status != QueueStatus::Waiting {
                return Err(StoreError::AlreadyProcessed);
            }

            let other = find_user_by_identifier(tx, counterparty)?
                .ok_or_else(|| StoreError::CounterpartyNotFound(counterparty.to_string()))?;
            if other.id == entry.requester_id || other.id == broker_id {
                return Err(StoreError::validation(
                    "the counterparty must be someone other than the requester and the broker",
                ));
            }

            let accepted_at = now();
            tx.execute(
                "UPDATE queue_entries SET status = 'accepted', accepted_at = ?1, broker_id = ?2
                 WHERE id = ?3 AND status = 'waiting'",
                (ts(&accepted_at), broker_id.to_string(), entry_id.to_string()),
            )?;
            bump_queue_version(tx)?;

            let entry = QueueEntry {
                status: QueueStatus::Accepted,
                accepted_at: Some(accepted_at),
                broker_id: Some(broker_id),
                ..entry
            };

            let room = insert_room(tx, &entry, &broker, &other)?;

            let mut notifications = Vec::with_capacity(2);
            for trader in &room.traders {
                notifications.push(insert_notification(
                    tx,
                    trader.uid,
                    NotificationPayload::TradeRoomReady {
                        room_id: room.id,
                        broker_name: broker.username.clone(),
                    },
                )?);
            }

            info!(
                "Broker {} accepted queue entry {}: room {} for {} and {}",
                broker.username, entry.id, room.id, entry.requester_display_name, other.username
            );

            Ok(Assignment {
                entry,
                room,
                notifications,
            })
        })
    }
}

fn map_entry(row: &Row<'_>) -> rusqlite::Result<QueueEntry> {
    Ok(QueueEntry {
        id: get_uuid(row, 0)?,
        requester_id: get_uuid(row, 1)?,
        requester_display_name: row.get(2)?,
        counterparty_hint: row.get(3)?,
        status: get_parsed(row, 4)?,
        requested_at: get_ts(row, 5)?,
        accepted_at: get_opt_ts(row, 6)?,
        cancelled_at: get_opt_ts(row, 7)?,
        broker_id: get_opt_uuid(row, 8)?,
    })
}

fn query_waiting(conn: &Connection) -> StoreResult<Vec<QueueEntry>> {
    let sql = format!(
        "SELECT {} FROM queue_entries WHERE status = 'waiting' ORDER BY requested_at ASC, rowid ASC",
        ENTRY_COLUMNS
    );
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt
        .query_map([], map_entry)?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

fn bump_queue_version(conn: &Connection) -> StoreResult<()> {
    conn.execute("UPDATE queue_state SET version = version + 1 WHERE id = 1", [])?;
    Ok(())
}

fn query_entry(conn: &Connection, id: Uuid) -> StoreResult<Option<QueueEntry>> {
    let sql = format!("SELECT {} FROM queue_entries WHERE id = ?1", ENTRY_COLUMNS);
    Ok(conn.query_row(&sql, [id.to_string()], map_entry).optional()?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{broker, db, user};
    use tradehall_types::models::queue_position;

    #[test]
    fn one_waiting_entry_per_requester() {
        let db = db();
        let r = user(&db, "requester");

        let first = db.submit_request(r.id, "Bob").unwrap();
        assert!(matches!(
            db.submit_request(r.id, "Bob"),
            Err(StoreError::AlreadyQueued)
        ));

        // Once resolved, the requester may queue again
        db.cancel_request(first.id, r.id).unwrap();
        db.submit_request(r.id, "Bob").unwrap();
        assert_eq!(db.list_waiting().unwrap().len(), 1);
    }

    #[test]
    fn waiting_list_is_fifo_and_positions_follow() {
        let db = db();
        let a = user(&db, "alice");
        let b = user(&db, "bob");
        let c = user(&db, "carol");

        db.submit_request(a.id, "").unwrap();
        db.submit_request(b.id, "").unwrap();
        db.submit_request(c.id, "").unwrap();

        let waiting = db.list_waiting().unwrap();
        let order: Vec<Uuid> = waiting.iter().map(|e| e.requester_id).collect();
        assert_eq!(order, vec![a.id, b.id, c.id]);

        let pos = queue_position(&waiting, c.id).unwrap();
        assert_eq!(pos.position, 3);
        assert_eq!(pos.ahead, 2);
        assert_eq!(pos.total, 3);
    }

    #[test]
    fn cancel_permissions() {
        let db = db();
        let r = user(&db, "requester");
        let stranger = user(&db, "stranger");
        let mm = broker(&db, "midman");

        let entry = db.submit_request(r.id, "").unwrap();
        assert!(matches!(
            db.cancel_request(entry.id, stranger.id),
            Err(StoreError::Permission(_))
        ));

        let cancelled = db.cancel_request(entry.id, mm.id).unwrap();
        assert_eq!(cancelled.status, QueueStatus::Cancelled);
        assert!(cancelled.cancelled_at.is_some());

        // History is kept
        let stored = db.get_queue_entry(entry.id).unwrap().unwrap();
        assert_eq!(stored.status, QueueStatus::Cancelled);

        assert!(matches!(
            db.cancel_request(entry.id, r.id),
            Err(StoreError::AlreadyProcessed)
        ));
        assert!(matches!(
            db.cancel_request(Uuid::new_v4(), r.id),
            Err(StoreError::NotFound(_))
        ));
    }

    #[test]
    fn accept_creates_room_and_notifies_both_traders() {
        let db = db();
        let r = user(&db, "requester");
        let bob = user(&db, "Bob");
        let mm = broker(&db, "midman");

        let entry = db.submit_request(r.id, "Bob").unwrap();
        let assignment = db.accept_request(entry.id, mm.id, "Bob").unwrap();

        assert_eq!(assignment.entry.status, QueueStatus::Accepted);
        assert_eq!(assignment.entry.broker_id, Some(mm.id));
        assert!(assignment.entry.accepted_at.is_some());

        let mut participants = assignment.room.participant_ids();
        participants.sort();
        let mut expected = vec![r.id, bob.id, mm.id];
        expected.sort();
        assert_eq!(participants, expected);

        let mut notified: Vec<Uuid> = assignment
            .notifications
            .iter()
            .map(|n| n.recipient_id)
            .collect();
        notified.sort();
        let mut traders = vec![r.id, bob.id];
        traders.sort();
        assert_eq!(notified, traders);
        for n in &assignment.notifications {
            assert_eq!(n.payload.kind(), "tradeRoomReady");
        }
        assert!(db.list_notifications(mm.id).unwrap().is_empty());
        assert!(db.list_waiting().unwrap().is_empty());
    }

    #[test]
    fn accepting_twice_fails_the_second_time() {
        let db = db();
        let r = user(&db, "requester");
        user(&db, "Bob");
        let mm = broker(&db, "midman");
        let other_mm = broker(&db, "midman2");

        let entry = db.submit_request(r.id, "Bob").unwrap();
        db.accept_request(entry.id, mm.id, "Bob").unwrap();
        assert!(matches!(
            db.accept_request(entry.id, other_mm.id, "Bob"),
            Err(StoreError::AlreadyProcessed)
        ));
        assert!(matches!(
            db.accept_request(Uuid::new_v4(), mm.id, "Bob"),
            Err(StoreError::NotFound(_))
        ));
        assert_eq!(db.list_rooms_for_user(r.id).unwrap().len(), 1);
    }

    #[test]
    fn unknown_counterparty_leaves_entry_waiting() {
        let db = db();
        let r = user(&db, "requester");
        let mm = broker(&db, "midman");

        let entry = db.submit_request(r.id, "Nobody").unwrap();
        assert!(matches!(
            db.accept_request(entry.id, mm.id, "Nobody"),
            Err(StoreError::CounterpartyNotFound(_))
        ));

        let stored = db.get_queue_entry(entry.id).unwrap().unwrap();
        assert_eq!(stored.status, QueueStatus::Waiting);
        assert!(db.list_rooms_for_user(r.id).unwrap().is_empty());
    }

    #[test]
    fn only_brokers_accept_and_counterparty_must_differ() {
        let db = db();
        let r = user(&db, "requester");
        let plain = user(&db, "plain");
        let mm = broker(&db, "midman");

        let entry = db.submit_request(r.id, "").unwrap();
        assert!(matches!(
            db.accept_request(entry.id, plain.id, "requester"),
            Err(StoreError::Permission(_))
        ));
        assert!(matches!(
            db.accept_request(entry.id, mm.id, "requester"),
            Err(StoreError::Validation(_))
        ));
        assert!(matches!(
            db.accept_request(entry.id, mm.id, "midman"),
            Err(StoreError::Validation(_))
        ));
    }

    #[test]
    fn every_queue_change_bumps_the_version() {
        let db = db();
        let r = user(&db, "requester");
        let other = user(&db, "other");
        user(&db, "Bob");
        let mm = broker(&db, "midman");

        let start = db.queue_view().unwrap().version;

        let first = db.submit_request(r.id, "Bob").unwrap();
        let after_submit = db.queue_view().unwrap();
        assert!(after_submit.version > start);
        assert_eq!(after_submit.entries.len(), 1);

        // Rejected changes leave it alone
        assert!(db.submit_request(r.id, "Bob").is_err());
        assert!(db.accept_request(first.id, mm.id, "Nobody").is_err());
        assert_eq!(db.queue_view().unwrap().version, after_submit.version);

        let second = db.submit_request(other.id, "").unwrap();
        db.cancel_request(second.id, other.id).unwrap();
        let after_cancel = db.queue_view().unwrap().version;
        assert!(after_cancel > after_submit.version + 1);

        db.accept_request(first.id, mm.id, "Bob").unwrap();
        let after_accept = db.queue_view().unwrap();
        assert!(after_accept.version > after_cancel);
        assert!(after_accept.entries.is_empty());
    }
}
