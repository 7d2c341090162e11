use chrono::{DateTime, Utc};
use rusqlite::Connection;
use tracing::info;
use uuid::Uuid;

use tradehall_types::models::{FriendRequest, FriendRequestStatus, Friendship};

use crate::users::query_user_by_id;
use crate::{Database, OptionalExt, StoreError, StoreResult, get_parsed, get_ts, get_uuid, now, ts};

impl Database {
    /// Stores a pending request under the recipient, keyed by the sender.
    pub fn send_friend_request(&self, from: Uuid, to: Uuid) -> StoreResult<FriendRequest> {
        if from == to {
            return Err(StoreError::validation("you cannot send a friend request to yourself"));
        }

        self.with_tx(|tx| {
            let sender = query_user_by_id(tx, from)?.ok_or(StoreError::NotFound("user"))?;
            query_user_by_id(tx, to)?.ok_or(StoreError::NotFound("user"))?;

            if friendship_exists(tx, from, to)? {
                return Err(StoreError::Conflict("already friends".into()));
            }
            match request_status(tx, to, from)? {
                Some(FriendRequestStatus::Pending) => {
                    return Err(StoreError::Conflict("friend request already sent".into()));
                }
                Some(FriendRequestStatus::Accepted) => {
                    return Err(StoreError::Conflict("already friends".into()));
                }
                None => {}
            }

            let created_at = now();
            tx.execute(
                "INSERT INTO friend_requests (recipient_id, sender_id, status, created_at)
                 VALUES (?1, ?2, 'pending', ?3)",
                (to.to_string(), from.to_string(), ts(&created_at)),
            )?;

            Ok(FriendRequest {
                from,
                to,
                from_username: sender.username,
                status: FriendRequestStatus::Pending,
                created_at,
            })
        })
    }

    /// Marks the request accepted and writes both friendship records in one
    /// transaction. Returns (recipient's view, sender's view).
    pub fn accept_friend_request(
        &self,
        recipient: Uuid,
        from: Uuid,
    ) -> StoreResult<(Friendship, Friendship)> {
        self.with_tx(|tx| {
            match request_status(tx, recipient, from)? {
                None => return Err(StoreError::NotFound("friend request")),
                Some(FriendRequestStatus::Accepted) => return Err(StoreError::AlreadyProcessed),
                Some(FriendRequestStatus::Pending) => {}
            }

            let sender = query_user_by_id(tx, from)?.ok_or(StoreError::NotFound("sender account"))?;
            let me = query_user_by_id(tx, recipient)?.ok_or(StoreError::NotFound("user"))?;

            tx.execute(
                "UPDATE friend_requests SET status = 'accepted'
                 WHERE recipient_id = ?1 AND sender_id = ?2",
                (recipient.to_string(), from.to_string()),
            )?;

            let since = now();
            insert_friendship(tx, recipient, from, &since)?;
            insert_friendship(tx, from, recipient, &since)?;

            // A crossing request in the other direction is moot now
            tx.execute(
                "DELETE FROM friend_requests
                 WHERE recipient_id = ?1 AND sender_id = ?2 AND status = 'pending'",
                (from.to_string(), recipient.to_string()),
            )?;

            info!("{} and {} are now friends", me.username, sender.username);

            Ok((
                Friendship {
                    friend_id: from,
                    username: sender.username,
                    since,
                },
                Friendship {
                    friend_id: recipient,
                    username: me.username,
                    since,
                },
            ))
        })
    }

    pub fn reject_friend_request(&self, recipient: Uuid, from: Uuid) -> StoreResult<()> {
        self.with_conn(|conn| {
            let changed = conn.execute(
                "DELETE FROM friend_requests
                 WHERE recipient_id = ?1 AND sender_id = ?2 AND status = 'pending'",
                (recipient.to_string(), from.to_string()),
            )?;
            if changed == 0 {
                return Err(StoreError::NotFound("friend request"));
            }
            Ok(())
        })
    }

    pub fn list_pending_requests(&self, recipient: Uuid) -> StoreResult<Vec<FriendRequest>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT r.sender_id, r.recipient_id, u.username, r.status, r.created_at
                 FROM friend_requests r
                 JOIN users u ON u.id = r.sender_id
                 WHERE r.recipient_id = ?1 AND r.status = 'pending'
                 ORDER BY r.created_at",
            )?;
            let rows = stmt
                .query_map([recipient.to_string()], |row| {
                    Ok(FriendRequest {
                        from: get_uuid(row, 0)?,
                        to: get_uuid(row, 1)?,
                        from_username: row.get(2)?,
                        status: get_parsed(row, 3)?,
                        created_at: get_ts(row, 4)?,
                    })
                })?
                .collect::<Result<Vec<_>, _>>()?;
            Ok(rows)
        })
    }

    pub fn list_friends(&self, owner: Uuid) -> StoreResult<Vec<Friendship>> {
        self.with_conn(|conn| query_friends(conn, owner))
    }

    pub fn are_friends(&self, a: Uuid, b: Uuid) -> StoreResult<bool> {
        self.with_conn(|conn| friendship_exists(conn, a, b))
    }

    /// Deletes pending requests created before `cutoff`, across every recipient.
    pub fn cleanup_stale_requests(&self, cutoff: DateTime<Utc>) -> StoreResult<usize> {
        self.with_conn(|conn| {
            let removed = conn.execute(
                "DELETE FROM friend_requests WHERE status = 'pending' AND created_at < ?1",
                [ts(&cutoff)],
            )?;
            Ok(removed)
        })
    }
}

pub(crate) fn friendship_exists(conn: &Connection, a: Uuid, b: Uuid) -> StoreResult<bool> {
    let found = conn
        .query_row(
            "SELECT 1 FROM friendships WHERE owner_id = ?1 AND friend_id = ?2",
            (a.to_string(), b.to_string()),
            |_| Ok(()),
        )
        .optional()?;
    Ok(found.is_some())
}

fn request_status(
    conn: &Connection,
    recipient: Uuid,
    sender: Uuid,
) -> StoreResult<Option<FriendRequestStatus>> {
    Ok(conn
        .query_row(
            "SELECT status FROM friend_requests WHERE recipient_id = ?1 AND sender_id = ?2",
            (recipient.to_string(), sender.to_string()),
            |row| get_parsed(row, 0),
        )
        .optional()?)
}

fn insert_friendship(conn: &Connection, owner: Uuid, friend: Uuid, since: &DateTime<Utc>) -> StoreResult<()> {
    conn.execute(
        "INSERT OR REPLACE INTO friendships (owner_id, friend_id, since) VALUES (?1, ?2, ?3)",
        (owner.to_string(), friend.to_string(), ts(since)),
    )?;
    Ok(())
}

pub(crate) fn query_friends(conn: &Connection, owner: Uuid) -> StoreResult<Vec<Friendship>> {
    // Username comes from the live user row so renames show up
    let mut stmt = conn.prepare(
        "SELECT f.friend_id, u.username, f.since
         FROM friendships f
         JOIN users u ON u.id = f.friend_id
         WHERE f.owner_id = ?1
         ORDER BY u.username",
    )?;
    let rows = stmt
        .query_map([owner.to_string()], |row| {
            Ok(Friendship {
                friend_id: get_uuid(row, 0)?,
                username: row.get(1)?,
                since: get_ts(row, 2)?,
            })
        })?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{db, user};
    use chrono::Duration;

    #[test]
    fn accepted_request_creates_symmetric_friendship() {
        let db = db();
        let a = user(&db, "alice");
        let b = user(&db, "bob");

        db.send_friend_request(a.id, b.id).unwrap();
        assert_eq!(db.list_pending_requests(b.id).unwrap().len(), 1);

        let (b_view, a_view) = db.accept_friend_request(b.id, a.id).unwrap();
        assert_eq!(b_view.friend_id, a.id);
        assert_eq!(a_view.friend_id, b.id);
        assert_eq!(a_view.since, b_view.since);

        assert!(db.are_friends(a.id, b.id).unwrap());
        assert!(db.are_friends(b.id, a.id).unwrap());
        assert_eq!(db.list_friends(a.id).unwrap()[0].friend_id, b.id);
        assert_eq!(db.list_friends(b.id).unwrap()[0].friend_id, a.id);

        // The request is kept, marked accepted, and no longer pending
        assert!(db.list_pending_requests(b.id).unwrap().is_empty());
        let status = db
            .with_conn(|conn| request_status(conn, b.id, a.id))
            .unwrap();
        assert_eq!(status, Some(FriendRequestStatus::Accepted));
    }

    #[test]
    fn accepting_twice_reports_already_processed() {
        let db = db();
        let a = user(&db, "alice");
        let b = user(&db, "bob");

        db.send_friend_request(a.id, b.id).unwrap();
        db.accept_friend_request(b.id, a.id).unwrap();
        assert!(matches!(
            db.accept_friend_request(b.id, a.id),
            Err(StoreError::AlreadyProcessed)
        ));
        assert!(matches!(
            db.accept_friend_request(a.id, b.id),
            Err(StoreError::NotFound(_))
        ));
    }

    #[test]
    fn duplicate_self_and_existing_friend_requests_are_rejected() {
        let db = db();
        let a = user(&db, "alice");
        let b = user(&db, "bob");

        assert!(matches!(
            db.send_friend_request(a.id, a.id),
            Err(StoreError::Validation(_))
        ));

        db.send_friend_request(a.id, b.id).unwrap();
        assert!(matches!(
            db.send_friend_request(a.id, b.id),
            Err(StoreError::Conflict(_))
        ));

        db.accept_friend_request(b.id, a.id).unwrap();
        assert!(matches!(
            db.send_friend_request(b.id, a.id),
            Err(StoreError::Conflict(_))
        ));
    }

    #[test]
    fn crossing_request_is_cleared_on_accept() {
        let db = db();
        let a = user(&db, "alice");
        let b = user(&db, "bob");

        db.send_friend_request(a.id, b.id).unwrap();
        db.send_friend_request(b.id, a.id).unwrap();
        db.accept_friend_request(b.id, a.id).unwrap();

        assert!(db.list_pending_requests(a.id).unwrap().is_empty());
    }

    #[test]
    fn rejected_request_can_be_sent_again() {
        let db = db();
        let a = user(&db, "alice");
        let b = user(&db, "bob");

        db.send_friend_request(a.id, b.id).unwrap();
        db.reject_friend_request(b.id, a.id).unwrap();
        assert!(matches!(
            db.reject_friend_request(b.id, a.id),
            Err(StoreError::NotFound(_))
        ));
        db.send_friend_request(a.id, b.id).unwrap();
    }

    #[test]
    fn cleanup_removes_only_stale_pending_requests() {
        let db = db();
        let a = user(&db, "alice");
        let b = user(&db, "bob");
        let c = user(&db, "carol");

        db.send_friend_request(a.id, b.id).unwrap();
        db.send_friend_request(c.id, b.id).unwrap();
        db.accept_friend_request(b.id, c.id).unwrap();

        // Nothing is older than a day ago
        assert_eq!(db.cleanup_stale_requests(Utc::now() - Duration::days(1)).unwrap(), 0);

        // Everything is older than a minute from now; only the pending one goes
        assert_eq!(db.cleanup_stale_requests(Utc::now() + Duration::minutes(1)).unwrap(), 1);
        assert!(db.are_friends(b.id, c.id).unwrap());
    }
}
