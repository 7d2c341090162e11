//! Store-only row types. Everything that crosses the API boundary lives in
//! tradehall-types; these carry columns that must never leave the server.
use tradehall_types::models::{Notification, QueueEntry, TradeRoom, User};

pub struct CredentialsRow {
    pub user: User,
    pub password_hash: String,
    pub token_version: i64,
}

/// Everything a successful accept produced, for fan-out by the caller.
#[derive(Debug, Clone)]
pub struct Assignment {
    pub entry: QueueEntry,
    pub room: TradeRoom,
    pub notifications: Vec<Notification>,
}
