use rusqlite::{Connection, Row};
use tracing::info;
use uuid::Uuid;

use tradehall_types::models::{Comment, Notification, NotificationPayload, Reply, TradePost};

use crate::notifications::insert_notification;
use crate::users::query_user_by_id;
use crate::{Database, OptionalExt, StoreError, StoreResult, clean_text, get_ts, get_uuid, now, ts};

const TRADE_SELECT: &str = "SELECT t.id, t.owner_id, u.username, t.game_name, t.item_name, t.description, t.price, t.created_at
     FROM trades t JOIN users u ON u.id = t.owner_id";

pub struct NewTrade<'a> {
    pub game_name: &'a str,
    pub item_name: &'a str,
    pub description: &'a str,
    pub price: Option<&'a str>,
}

impl Database {
    pub fn create_trade(&self, owner_id: Uuid, new: NewTrade<'_>) -> StoreResult<TradePost> {
        let game_name = new.game_name.trim();
        let item_name = new.item_name.trim();
        let description = new.description.trim();
        if game_name.is_empty() || item_name.is_empty() || description.is_empty() {
            return Err(StoreError::validation("please fill in all required fields"));
        }
        let price = new.price.map(str::trim).filter(|p| !p.is_empty());

        self.with_tx(|tx| {
            let owner = query_user_by_id(tx, owner_id)?.ok_or(StoreError::NotFound("user"))?;
            let id = Uuid::new_v4();
            let created_at = now();

            tx.execute(
                "INSERT INTO trades (id, owner_id, game_name, item_name, description, price, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                (
                    id.to_string(),
                    owner_id.to_string(),
                    game_name,
                    item_name,
                    description,
                    price,
                    ts(&created_at),
                ),
            )?;

            Ok(TradePost {
                id,
                owner_id,
                owner_username: owner.username,
                game_name: game_name.to_string(),
                item_name: item_name.to_string(),
                description: description.to_string(),
                price: price.map(str::to_string),
                created_at,
            })
        })
    }

    pub fn get_trade(&self, id: Uuid) -> StoreResult<Option<TradePost>> {
        self.with_conn(|conn| query_trade(conn, id))
    }

    /// The owner's own posts, newest first.
    pub fn list_trades_by_owner(&self, owner_id: Uuid) -> StoreResult<Vec<TradePost>> {
        self.with_conn(|conn| {
            let sql = format!("{} WHERE t.owner_id = ?1 ORDER BY t.created_at DESC, t.rowid DESC", TRADE_SELECT);
            let mut stmt = conn.prepare(&sql)?;
            let rows = stmt
                .query_map([owner_id.to_string()], map_trade)?
                .collect::<Result<Vec<_>, _>>()?;
            Ok(rows)
        })
    }

    /// Everyone else's posts, newest first.
    pub fn browse_trades(&self, viewer: Uuid) -> StoreResult<Vec<TradePost>> {
        self.with_conn(|conn| {
            let sql = format!("{} WHERE t.owner_id != ?1 ORDER BY t.created_at DESC, t.rowid DESC", TRADE_SELECT);
            let mut stmt = conn.prepare(&sql)?;
            let rows = stmt
                .query_map([viewer.to_string()], map_trade)?
                .collect::<Result<Vec<_>, _>>()?;
            Ok(rows)
        })
    }

    /// Owner only. Comments and their replies go with it.
    pub fn delete_trade(&self, id: Uuid, by: Uuid) -> StoreResult<()> {
        self.with_tx(|tx| {
            let trade = query_trade(tx, id)?.ok_or(StoreError::NotFound("trade"))?;
            if trade.owner_id != by {
                return Err(StoreError::Permission("only the owner can delete a trade"));
            }
            tx.execute("DELETE FROM trades WHERE id = ?1", [id.to_string()])?;
            info!("Trade {} deleted by owner", id);
            Ok(())
        })
    }

    /// Adds a comment and, unless the author owns the trade, notifies the owner.
    pub fn post_comment(
        &self,
        trade_id: Uuid,
        author_id: Uuid,
        text: &str,
    ) -> StoreResult<(Comment, Option<Notification>)> {
        let text = clean_text(text)?;

        self.with_tx(|tx| {
            let trade = query_trade(tx, trade_id)?.ok_or(StoreError::NotFound("trade"))?;
            let author = query_user_by_id(tx, author_id)?.ok_or(StoreError::NotFound("user"))?;

            let id = Uuid::new_v4();
            let created_at = now();
            tx.execute(
                "INSERT INTO comments (id, trade_id, author_id, text, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                (
                    id.to_string(),
                    trade_id.to_string(),
                    author_id.to_string(),
                    &text,
                    ts(&created_at),
                ),
            )?;

            let notification = if trade.owner_id != author_id {
                Some(insert_notification(
                    tx,
                    trade.owner_id,
                    NotificationPayload::Comment {
                        trade_id,
                        comment_id: id,
                        comment_text: text.clone(),
                        from_user: author.username.clone(),
                    },
                )?)
            } else {
                None
            };

            Ok((
                Comment {
                    id,
                    trade_id,
                    author_id,
                    author_username: author.username,
                    text,
                    created_at,
                },
                notification,
            ))
        })
    }

    /// Newest first.
    pub fn list_comments(&self, trade_id: Uuid) -> StoreResult<Vec<Comment>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT c.id, c.trade_id, c.author_id, u.username, c.text, c.created_at
                 FROM comments c JOIN users u ON u.id = c.author_id
                 WHERE c.trade_id = ?1
                 ORDER BY c.created_at DESC, c.rowid DESC",
            )?;
            let rows = stmt
                .query_map([trade_id.to_string()], map_comment)?
                .collect::<Result<Vec<_>, _>>()?;
            Ok(rows)
        })
    }

    pub fn get_comment(&self, id: Uuid) -> StoreResult<Option<Comment>> {
        self.with_conn(|conn| query_comment(conn, id))
    }

    /// Adds a reply and, unless replying to oneself, notifies the comment's author.
    pub fn post_reply(
        &self,
        comment_id: Uuid,
        author_id: Uuid,
        text: &str,
    ) -> StoreResult<(Reply, Option<Notification>)> {
        let text = clean_text(text)?;

        self.with_tx(|tx| {
            let parent = query_comment(tx, comment_id)?.ok_or(StoreError::NotFound("comment"))?;
            let author = query_user_by_id(tx, author_id)?.ok_or(StoreError::NotFound("user"))?;

            let id = Uuid::new_v4();
            let created_at = now();
            tx.execute(
                "INSERT INTO replies (id, comment_id, author_id, text, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                (
                    id.to_string(),
                    comment_id.to_string(),
                    author_id.to_string(),
                    &text,
                    ts(&created_at),
                ),
            )?;

            let notification = if parent.author_id != author_id {
                Some(insert_notification(
                    tx,
                    parent.author_id,
                    NotificationPayload::Reply {
                        trade_id: parent.trade_id,
                        comment_id,
                        reply_text: text.clone(),
                        from_user: author.username.clone(),
                    },
                )?)
            } else {
                None
            };

            Ok((
                Reply {
                    id,
                    comment_id,
                    author_id,
                    author_username: author.username,
                    text,
                    created_at,
                },
                notification,
            ))
        })
    }

    /// Oldest first.
    pub fn list_replies(&self, comment_id: Uuid) -> StoreResult<Vec<Reply>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT r.id, r.comment_id, r.author_id, u.username, r.text, r.created_at
                 FROM replies r JOIN users u ON u.id = r.author_id
                 WHERE r.comment_id = ?1
                 ORDER BY r.created_at ASC, r.rowid ASC",
            )?;
            let rows = stmt
                .query_map([comment_id.to_string()], |row| {
                    Ok(Reply {
                        id: get_uuid(row, 0)?,
                        comment_id: get_uuid(row, 1)?,
                        author_id: get_uuid(row, 2)?,
                        author_username: row.get(3)?,
                        text: row.get(4)?,
                        created_at: get_ts(row, 5)?,
                    })
                })?
                .collect::<Result<Vec<_>, _>>()?;
            Ok(rows)
        })
    }
}

fn map_trade(row: &Row<'_>) -> rusqlite::Result<TradePost> {
    Ok(TradePost {
        id: get_uuid(row, 0)?,
        owner_id: get_uuid(row, 1)?,
        owner_username: row.get(2)?,
        game_name: row.get(3)?,
        item_name: row.get(4)?,
        description: row.get(5)?,
        price: row.get(6)?,
        created_at: get_ts(row, 7)?,
    })
}

fn map_comment(row: &Row<'_>) -> rusqlite::Result<Comment> {
    Ok(Comment {
        id: get_uuid(row, 0)?,
        trade_id: get_uuid(row, 1)?,
        author_id: get_uuid(row, 2)?,
        author_username: row.get(3)?,
        text: row.get(4)?,
        created_at: get_ts(row, 5)?,
    })
}

fn query_trade(conn: &Connection, id: Uuid) -> StoreResult<Option<TradePost>> {
    let sql = format!("{} WHERE t.id = ?1", TRADE_SELECT);
    Ok(conn.query_row(&sql, [id.to_string()], map_trade).optional()?)
}

fn query_comment(conn: &Connection, id: Uuid) -> StoreResult<Option<Comment>> {
    Ok(conn
        .query_row(
            "SELECT c.id, c.trade_id, c.author_id, u.username, c.text, c.created_at
             FROM comments c JOIN users u ON u.id = c.author_id
             WHERE c.id = ?1",
            [id.to_string()],
            map_comment,
        )
        .optional()?)
}
