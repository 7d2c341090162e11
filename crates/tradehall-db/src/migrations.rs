use anyhow::Result;
use rusqlite::Connection;
use tracing::info;

pub fn run(conn: &Connection) -> Result<()> {
    conn.execute_batch("CREATE TABLE IF NOT EXISTS schema_version (version INTEGER NOT NULL);")?;

    let version: i64 = conn.query_row(
        "SELECT COALESCE(MAX(version), 0) FROM schema_version",
        [],
        |r| r.get(0),
    )?;

    if version < 1 {
        info!("Running migration v1 (initial schema)");
        conn.execute_batch(
            "
            CREATE TABLE users (
                id              TEXT PRIMARY KEY,
                email           TEXT NOT NULL UNIQUE,
                username        TEXT NOT NULL UNIQUE,
                password        TEXT NOT NULL,
                role            TEXT NOT NULL DEFAULT 'user',
                online          INTEGER NOT NULL DEFAULT 0,
                token_version   INTEGER NOT NULL DEFAULT 0,
                created_at      TEXT NOT NULL
            );

            CREATE TABLE friend_requests (
                recipient_id    TEXT NOT NULL REFERENCES users(id),
                sender_id       TEXT NOT NULL REFERENCES users(id),
                status          TEXT NOT NULL DEFAULT 'pending',
                created_at      TEXT NOT NULL,
                PRIMARY KEY (recipient_id, sender_id)
            );

            CREATE INDEX idx_friend_requests_pending
                ON friend_requests(status, created_at);

            CREATE TABLE friendships (
                owner_id    TEXT NOT NULL REFERENCES users(id),
                friend_id   TEXT NOT NULL REFERENCES users(id),
                since       TEXT NOT NULL,
                PRIMARY KEY (owner_id, friend_id)
            );

            CREATE TABLE trades (
                id          TEXT PRIMARY KEY,
                owner_id    TEXT NOT NULL REFERENCES users(id),
                game_name   TEXT NOT NULL,
                item_name   TEXT NOT NULL,
                description TEXT NOT NULL,
                price       TEXT,
                created_at  TEXT NOT NULL
            );

            CREATE INDEX idx_trades_owner ON trades(owner_id, created_at);

            CREATE TABLE comments (
                id          TEXT PRIMARY KEY,
                trade_id    TEXT NOT NULL REFERENCES trades(id) ON DELETE CASCADE,
                author_id   TEXT NOT NULL REFERENCES users(id),
                text        TEXT NOT NULL,
                created_at  TEXT NOT NULL
            );

            CREATE INDEX idx_comments_trade ON comments(trade_id, created_at);

            CREATE TABLE replies (
                id          TEXT PRIMARY KEY,
                comment_id  TEXT NOT NULL REFERENCES comments(id) ON DELETE CASCADE,
                author_id   TEXT NOT NULL REFERENCES users(id),
                text        TEXT NOT NULL,
                created_at  TEXT NOT NULL
            );

            CREATE INDEX idx_replies_comment ON replies(comment_id, created_at);

            CREATE TABLE notifications (
                id              TEXT PRIMARY KEY,
                recipient_id    TEXT NOT NULL REFERENCES users(id),
                kind            TEXT NOT NULL,
                payload         TEXT NOT NULL,
                read            INTEGER NOT NULL DEFAULT 0,
                created_at      TEXT NOT NULL
            );

            CREATE INDEX idx_notifications_recipient
                ON notifications(recipient_id, created_at);

            CREATE TABLE queue_entries (
                id                      TEXT PRIMARY KEY,
                requester_id            TEXT NOT NULL REFERENCES users(id),
                requester_display_name  TEXT NOT NULL,
                counterparty_hint       TEXT NOT NULL DEFAULT '',
                status                  TEXT NOT NULL DEFAULT 'waiting',
                requested_at            TEXT NOT NULL,
                accepted_at             TEXT,
                cancelled_at            TEXT,
                broker_id               TEXT REFERENCES users(id)
            );

            -- At most one waiting entry per requester
            CREATE UNIQUE INDEX idx_queue_one_waiting
                ON queue_entries(requester_id) WHERE status = 'waiting';

            CREATE INDEX idx_queue_status ON queue_entries(status, requested_at);

            CREATE TABLE trade_rooms (
                id              TEXT PRIMARY KEY,
                queue_entry_id  TEXT NOT NULL UNIQUE REFERENCES queue_entries(id),
                broker_id       TEXT NOT NULL REFERENCES users(id),
                broker_name     TEXT NOT NULL,
                status          TEXT NOT NULL DEFAULT 'active',
                created_at      TEXT NOT NULL
            );

            CREATE TABLE room_traders (
                room_id         TEXT NOT NULL REFERENCES trade_rooms(id) ON DELETE CASCADE,
                user_id         TEXT NOT NULL REFERENCES users(id),
                display_name    TEXT NOT NULL,
                items           TEXT NOT NULL DEFAULT '[]',
                position        INTEGER NOT NULL,
                PRIMARY KEY (room_id, user_id)
            );

            CREATE INDEX idx_room_traders_user ON room_traders(user_id);

            CREATE TABLE messages (
                id                  TEXT PRIMARY KEY,
                conversation_kind   TEXT NOT NULL,
                conversation_id     TEXT NOT NULL,
                sender_id           TEXT NOT NULL REFERENCES users(id),
                text                TEXT NOT NULL,
                sent_at             TEXT NOT NULL,
                edited_at           TEXT
            );

            CREATE INDEX idx_messages_conversation
                ON messages(conversation_kind, conversation_id, sent_at);

            INSERT INTO schema_version (version) VALUES (1);
            ",
        )?;
    }

    if version < 2 {
        info!("Running migration v2 (queue version counter)");
        conn.execute_batch(
            "
            CREATE TABLE queue_state (
                id          INTEGER PRIMARY KEY CHECK (id = 1),
                version     INTEGER NOT NULL
            );

            INSERT INTO queue_state (id, version) VALUES (1, 0);

            INSERT INTO schema_version (version) VALUES (2);
            ",
        )?;
    }

    info!("Database migrations complete");
    Ok(())
}
