use rusqlite::{Connection, Row};
use uuid::Uuid;

use tradehall_types::models::{ChatKey, Conversation, Message};

use crate::friends::friendship_exists;
use crate::rooms::load_room_for;
use crate::users::query_user_by_id;
use crate::{Database, OptionalExt, StoreError, StoreResult};
use crate::{clean_text, get_opt_ts, get_ts, get_uuid, now, ts};

const MESSAGE_SELECT: &str = "SELECT m.id, m.conversation_kind, m.conversation_id, m.sender_id, u.username,
            m.text, m.sent_at, m.edited_at
     FROM messages m JOIN users u ON u.id = m.sender_id";

impl Database {
    pub fn post_message(
        &self,
        conversation: &Conversation,
        sender_id: Uuid,
        text: &str,
    ) -> StoreResult<Message> {
        let text = clean_text(text)?;

        self.with_tx(|tx| {
            check_access(tx, conversation, sender_id, Access::Write)?;
            let sender = query_user_by_id(tx, sender_id)?.ok_or(StoreError::NotFound("user"))?;

            let (kind, conversation_id) = conversation_columns(conversation);
            let message = Message {
                id: Uuid::new_v4(),
                conversation: conversation.clone(),
                sender_id,
                sender_name: sender.username,
                text,
                sent_at: now(),
                edited_at: None,
            };

            tx.execute(
                "INSERT INTO messages (id, conversation_kind, conversation_id, sender_id, text, sent_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                (
                    message.id.to_string(),
                    kind,
                    &conversation_id,
                    sender_id.to_string(),
                    &message.text,
                    ts(&message.sent_at),
                ),
            )?;

            Ok(message)
        })
    }

    /// Oldest first.
    pub fn list_messages(&self, conversation: &Conversation, viewer: Uuid) -> StoreResult<Vec<Message>> {
        self.with_conn(|conn| {
            check_access(conn, conversation, viewer, Access::Read)?;

            let (kind, conversation_id) = conversation_columns(conversation);
            let sql = format!(
                "{} WHERE m.conversation_kind = ?1 AND m.conversation_id = ?2
                 ORDER BY m.sent_at ASC, m.rowid ASC",
                MESSAGE_SELECT
            );
            let mut stmt = conn.prepare(&sql)?;
            let rows = stmt
                .query_map((kind, &conversation_id), map_message)?
                .collect::<Result<Vec<_>, _>>()?;
            Ok(rows)
        })
    }

    /// Rewrites a message's text. Only its sender may do this.
    pub fn edit_message(&self, id: Uuid, by: Uuid, text: &str) -> StoreResult<Message> {
        let text = clean_text(text)?;

        self.with_tx(|tx| {
            let message = query_message(tx, id)?.ok_or(StoreError::NotFound("message"))?;
            check_access(tx, &message.conversation, by, Access::Read)?;
            if message.sender_id != by {
                return Err(StoreError::Permission("only the sender can edit a message"));
            }

            let edited_at = now();
            tx.execute(
                "UPDATE messages SET text = ?1, edited_at = ?2 WHERE id = ?3",
                (&text, ts(&edited_at), id.to_string()),
            )?;

            Ok(Message {
                text,
                edited_at: Some(edited_at),
                ..message
            })
        })
    }

    /// Removes a message. In a direct chat only the sender may; in a trade
    /// room the room's broker may too.
    pub fn delete_message(&self, id: Uuid, by: Uuid) -> StoreResult<Message> {
        self.with_tx(|tx| {
            let message = query_message(tx, id)?.ok_or(StoreError::NotFound("message"))?;

            let allowed = match &message.conversation {
                Conversation::Chat(key) => {
                    if !key.contains(by) {
                        return Err(StoreError::Permission("not part of this chat"));
                    }
                    message.sender_id == by
                }
                Conversation::Room(room_id) => {
                    let room = load_room_for(tx, *room_id, by)?;
                    message.sender_id == by || room.is_broker(by)
                }
            };
            if !allowed {
                return Err(StoreError::Permission("cannot delete someone else's message"));
            }

            tx.execute("DELETE FROM messages WHERE id = ?1", [id.to_string()])?;
            Ok(message)
        })
    }

    pub fn get_message(&self, id: Uuid) -> StoreResult<Option<Message>> {
        self.with_conn(|conn| query_message(conn, id))
    }
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum Access {
    Read,
    Write,
}

/// Rooms admit their current participants. Chats admit the pair, and
/// posting additionally requires them to still be friends.
fn check_access(
    conn: &Connection,
    conversation: &Conversation,
    user_id: Uuid,
    access: Access,
) -> StoreResult<()> {
    match conversation {
        Conversation::Room(room_id) => {
            load_room_for(conn, *room_id, user_id)?;
        }
        Conversation::Chat(key) => {
            let (a, b) = key
                .members()
                .ok_or_else(|| StoreError::validation("malformed chat key"))?;
            if a != user_id && b != user_id {
                return Err(StoreError::Permission("not part of this chat"));
            }
            let other = if a == user_id { b } else { a };
            if access == Access::Write && !friendship_exists(conn, user_id, other)? {
                return Err(StoreError::Permission("only friends can chat"));
            }
        }
    }
    Ok(())
}

fn conversation_columns(conversation: &Conversation) -> (&'static str, String) {
    match conversation {
        Conversation::Room(id) => ("room", id.to_string()),
        Conversation::Chat(key) => ("chat", key.as_str().to_string()),
    }
}

fn map_message(row: &Row<'_>) -> rusqlite::Result<Message> {
    let kind: String = row.get(1)?;
    let raw_id: String = row.get(2)?;

    let conversation = match kind.as_str() {
        "room" => raw_id
            .parse()
            .map(Conversation::Room)
            .map_err(|e| conversion_error(2, e))?,
        _ => raw_id
            .parse::<ChatKey>()
            .map(Conversation::Chat)
            .map_err(|e| conversion_error(2, e))?,
    };

    Ok(Message {
        id: get_uuid(row, 0)?,
        conversation,
        sender_id: get_uuid(row, 3)?,
        sender_name: row.get(4)?,
        text: row.get(5)?,
        sent_at: get_ts(row, 6)?,
        edited_at: get_opt_ts(row, 7)?,
    })
}

fn conversion_error<E>(idx: usize, e: E) -> rusqlite::Error
where
    E: std::error::Error + Send + Sync + 'static,
{
    rusqlite::Error::FromSqlConversionFailure(idx, rusqlite::types::Type::Text, Box::new(e))
}

fn query_message(conn: &Connection, id: Uuid) -> StoreResult<Option<Message>> {
    let sql = format!("{} WHERE m.id = ?1", MESSAGE_SELECT);
    Ok(conn.query_row(&sql, [id.to_string()], map_message).optional()?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{broker, db, user};
    use tradehall_types::models::{TradeRoom, User};

    fn befriend(db: &Database, a: &User, b: &User) {
        db.send_friend_request(a.id, b.id).unwrap();
        db.accept_friend_request(b.id, a.id).unwrap();
    }

    fn room(db: &Database) -> (TradeRoom, User, User, User) {
        let r = user(db, "requester");
        let bob = user(db, "bob");
        let mm = broker(db, "midman");
        let entry = db.submit_request(r.id, "bob").unwrap();
        let room = db.accept_request(entry.id, mm.id, "bob").unwrap().room;
        (room, r, bob, mm)
    }

    #[test]
    fn blank_text_is_rejected() {
        let db = db();
        let (room, r, _, _) = room(&db);
        let err = db
            .post_message(&Conversation::Room(room.id), r.id, "   \n")
            .unwrap_err();
        assert!(matches!(err, StoreError::Validation(ref m) if m == "EmptyText"));
    }

    #[test]
    fn messages_come_back_in_send_order() {
        let db = db();
        let (room, r, bob, mm) = room(&db);
        let conv = Conversation::Room(room.id);

        db.post_message(&conv, r.id, "first").unwrap();
        db.post_message(&conv, bob.id, "second").unwrap();
        db.post_message(&conv, mm.id, "third").unwrap();

        let texts: Vec<String> = db
            .list_messages(&conv, r.id)
            .unwrap()
            .into_iter()
            .map(|m| m.text)
            .collect();
        assert_eq!(texts, vec!["first", "second", "third"]);
    }

    #[test]
    fn only_the_broker_deletes_others_messages_in_a_room() {
        let db = db();
        let (room, r, bob, mm) = room(&db);
        let conv = Conversation::Room(room.id);
        let msg = db.post_message(&conv, r.id, "deal?").unwrap();

        assert!(matches!(
            db.delete_message(msg.id, bob.id),
            Err(StoreError::Permission(_))
        ));
        assert!(matches!(
            db.edit_message(msg.id, mm.id, "edited by broker"),
            Err(StoreError::Permission(_))
        ));

        let removed = db.delete_message(msg.id, mm.id).unwrap();
        assert_eq!(removed.id, msg.id);
        assert!(db.get_message(msg.id).unwrap().is_none());
    }

    #[test]
    fn kicked_trader_loses_access() {
        let db = db();
        let (room, _, bob, mm) = room(&db);
        let conv = Conversation::Room(room.id);

        db.kick(room.id, bob.id, mm.id).unwrap();
        assert!(matches!(
            db.post_message(&conv, bob.id, "still here?"),
            Err(StoreError::Permission(_))
        ));
        assert!(matches!(
            db.list_messages(&conv, bob.id),
            Err(StoreError::Permission(_))
        ));
    }

    #[test]
    fn chat_requires_friendship_and_sender_owns_edits() {
        let db = db();
        let a = user(&db, "alice");
        let b = user(&db, "bob");
        let conv = Conversation::Chat(ChatKey::for_pair(a.id, b.id));

        assert!(matches!(
            db.post_message(&conv, a.id, "hi"),
            Err(StoreError::Permission(_))
        ));

        befriend(&db, &a, &b);
        let msg = db.post_message(&conv, a.id, "hi").unwrap();
        assert_eq!(msg.sender_name, "alice");

        let edited = db.edit_message(msg.id, a.id, "hi there").unwrap();
        assert_eq!(edited.text, "hi there");
        assert!(edited.edited_at.is_some());

        // The other side of the chat cannot delete it
        assert!(matches!(
            db.delete_message(msg.id, b.id),
            Err(StoreError::Permission(_))
        ));
        db.delete_message(msg.id, a.id).unwrap();
        assert!(db.list_messages(&conv, b.id).unwrap().is_empty());

        let outsider = user(&db, "outsider");
        assert!(matches!(
            db.list_messages(&conv, outsider.id),
            Err(StoreError::Permission(_))
        ));
    }
}
