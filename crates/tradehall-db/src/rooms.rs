use rusqlite::Connection;
use tracing::info;
use uuid::Uuid;

use tradehall_types::models::{BrokerRef, QueueEntry, RoomStatus, TradeRoom, Trader, User};

use crate::{Database, OptionalExt, StoreError, StoreResult};
use crate::{get_parsed, get_ts, get_uuid, now, ts};

/// Longest item list a trader may put on the table.
const MAX_ITEMS: usize = 50;

impl Database {
    pub fn get_room(&self, id: Uuid) -> StoreResult<Option<TradeRoom>> {
        self.with_conn(|conn| query_room(conn, id))
    }

    /// Loads a room for one of its participants. Anyone else gets `Permission`.
    pub fn get_room_for(&self, id: Uuid, viewer: Uuid) -> StoreResult<TradeRoom> {
        self.with_conn(|conn| load_room_for(conn, id, viewer))
    }

    /// Rooms the user is currently part of, as broker or trader. Newest first.
    pub fn list_rooms_for_user(&self, user_id: Uuid) -> StoreResult<Vec<TradeRoom>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT r.id FROM trade_rooms r
                 WHERE r.broker_id = ?1
                    OR EXISTS (SELECT 1 FROM room_traders t WHERE t.room_id = r.id AND t.user_id = ?1)
                 ORDER BY r.created_at DESC, r.rowid DESC",
            )?;
            let ids = stmt
                .query_map([user_id.to_string()], |row| get_uuid(row, 0))?
                .collect::<Result<Vec<_>, _>>()?;

            let mut rooms = Vec::with_capacity(ids.len());
            for id in ids {
                if let Some(room) = query_room(conn, id)? {
                    rooms.push(room);
                }
            }
            Ok(rooms)
        })
    }

    /// Removes a trader from the room. Broker only. Messages stay.
    pub fn kick(&self, room_id: Uuid, trader_id: Uuid, by: Uuid) -> StoreResult<TradeRoom> {
        self.with_tx(|tx| {
            let room = query_room(tx, room_id)?.ok_or(StoreError::NotFound("room"))?;
            if !room.is_broker(by) {
                return Err(StoreError::Permission("only the room's broker can remove traders"));
            }

            let removed = tx.execute(
                "DELETE FROM room_traders WHERE room_id = ?1 AND user_id = ?2",
                (room_id.to_string(), trader_id.to_string()),
            )?;
            if removed == 0 {
                return Err(StoreError::NotFound("trader"));
            }

            info!("Trader {} removed from room {} by {}", trader_id, room_id, by);
            query_room(tx, room_id)?.ok_or(StoreError::NotFound("room"))
        })
    }

    /// Replaces the items a trader is offering. Only that trader may do this.
    pub fn set_items(
        &self,
        room_id: Uuid,
        trader_id: Uuid,
        items: &[String],
    ) -> StoreResult<TradeRoom> {
        let items: Vec<&str> = items
            .iter()
            .map(|i| i.trim())
            .filter(|i| !i.is_empty())
            .collect();
        if items.len() > MAX_ITEMS {
            return Err(StoreError::validation(format!(
                "at most {} items per trader",
                MAX_ITEMS
            )));
        }
        let encoded = serde_json::to_string(&items)?;

        self.with_tx(|tx| {
            let room = load_room_for(tx, room_id, trader_id)?;
            if !room.traders.iter().any(|t| t.uid == trader_id) {
                return Err(StoreError::Permission("only traders list items"));
            }

            tx.execute(
                "UPDATE room_traders SET items = ?1 WHERE room_id = ?2 AND user_id = ?3",
                (&encoded, room_id.to_string(), trader_id.to_string()),
            )?;
            query_room(tx, room_id)?.ok_or(StoreError::NotFound("room"))
        })
    }

    /// Deletes the room and every message in it. Broker only.
    /// Returns the room as it was, so callers can tell its participants.
    pub fn close_room(&self, room_id: Uuid, by: Uuid) -> StoreResult<TradeRoom> {
        self.with_tx(|tx| {
            let room = query_room(tx, room_id)?.ok_or(StoreError::NotFound("room"))?;
            if !room.is_broker(by) {
                return Err(StoreError::Permission("only the room's broker can close it"));
            }

            let messages = tx.execute(
                "DELETE FROM messages WHERE conversation_kind = 'room' AND conversation_id = ?1",
                [room_id.to_string()],
            )?;
            tx.execute("DELETE FROM trade_rooms WHERE id = ?1", [room_id.to_string()])?;

            info!("Room {} closed by {} ({} messages removed)", room_id, by, messages);
            Ok(TradeRoom {
                status: RoomStatus::Closed,
                ..room
            })
        })
    }
}

/// Creates the room for an accepted entry: requester first, then the counterparty.
pub(crate) fn insert_room(
    conn: &Connection,
    entry: &QueueEntry,
    broker: &User,
    counterparty: &User,
) -> StoreResult<TradeRoom> {
    let room = TradeRoom {
        id: Uuid::new_v4(),
        queue_entry_id: entry.id,
        traders: vec![
            Trader {
                uid: entry.requester_id,
                display_name: entry.requester_display_name.clone(),
                items: Vec::new(),
            },
            Trader {
                uid: counterparty.id,
                display_name: counterparty.username.clone(),
                items: Vec::new(),
            },
        ],
        broker: BrokerRef {
            uid: broker.id,
            display_name: broker.username.clone(),
        },
        status: RoomStatus::Active,
        created_at: now(),
    };

    conn.execute(
        "INSERT INTO trade_rooms (id, queue_entry_id, broker_id, broker_name, status, created_at)
         VALUES (?1, ?2, ?3, ?4, 'active', ?5)",
        (
            room.id.to_string(),
            entry.id.to_string(),
            broker.id.to_string(),
            &broker.username,
            ts(&room.created_at),
        ),
    )?;

    for (position, trader) in room.traders.iter().enumerate() {
        conn.execute(
            "INSERT INTO room_traders (room_id, user_id, display_name, position)
             VALUES (?1, ?2, ?3, ?4)",
            (
                room.id.to_string(),
                trader.uid.to_string(),
                &trader.display_name,
                position as i64,
            ),
        )?;
    }

    Ok(room)
}

pub(crate) fn load_room_for(conn: &Connection, id: Uuid, viewer: Uuid) -> StoreResult<TradeRoom> {
    let room = query_room(conn, id)?.ok_or(StoreError::NotFound("room"))?;
    if !room.is_participant(viewer) {
        return Err(StoreError::Permission("not a participant of this room"));
    }
    Ok(room)
}

pub(crate) fn query_room(conn: &Connection, id: Uuid) -> StoreResult<Option<TradeRoom>> {
    let head = conn
        .query_row(
            "SELECT queue_entry_id, broker_id, broker_name, status, created_at
             FROM trade_rooms WHERE id = ?1",
            [id.to_string()],
            |row| {
                Ok((
                    get_uuid(row, 0)?,
                    BrokerRef {
                        uid: get_uuid(row, 1)?,
                        display_name: row.get(2)?,
                    },
                    get_parsed::<RoomStatus>(row, 3)?,
                    get_ts(row, 4)?,
                ))
            },
        )
        .optional()?;

    let Some((queue_entry_id, broker, status, created_at)) = head else {
        return Ok(None);
    };

    let mut stmt = conn.prepare(
        "SELECT user_id, display_name, items FROM room_traders
         WHERE room_id = ?1 ORDER BY position",
    )?;
    let raw = stmt
        .query_map([id.to_string()], |row| {
            Ok((get_uuid(row, 0)?, row.get::<_, String>(1)?, row.get::<_, String>(2)?))
        })?
        .collect::<Result<Vec<_>, _>>()?;

    let mut traders = Vec::with_capacity(raw.len());
    for (uid, display_name, items) in raw {
        traders.push(Trader {
            uid,
            display_name,
            items: serde_json::from_str(&items)?,
        });
    }

    Ok(Some(TradeRoom {
        id,
        queue_entry_id,
        traders,
        broker,
        status,
        created_at,
    }))
}
