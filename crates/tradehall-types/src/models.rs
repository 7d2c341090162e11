use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

// -- Users --

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    /// Trusted middleman: sees the queue, claims requests, moderates rooms.
    Broker,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::User => "user",
            Self::Broker => "broker",
        }
    }
}

impl FromStr for Role {
    type Err = UnknownVariant;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "user" => Ok(Self::User),
            "broker" => Ok(Self::Broker),
            other => Err(UnknownVariant(other.to_string())),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct User {
    pub id: Uuid,
    pub email: String,
    pub username: String,
    pub role: Role,
    pub online: bool,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserSummary {
    pub id: Uuid,
    pub username: String,
}

/// Returned when a stored enum column holds a value this build doesn't know.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnknownVariant(pub String);

impl fmt::Display for UnknownVariant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "unknown variant '{}'", self.0)
    }
}

impl std::error::Error for UnknownVariant {}

// -- Middleman queue --

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum QueueStatus {
    Waiting,
    Accepted,
    Cancelled,
}

impl QueueStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Waiting => "waiting",
            Self::Accepted => "accepted",
            Self::Cancelled => "cancelled",
        }
    }
}

impl FromStr for QueueStatus {
    type Err = UnknownVariant;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "waiting" => Ok(Self::Waiting),
            "accepted" => Ok(Self::Accepted),
            "cancelled" => Ok(Self::Cancelled),
            other => Err(UnknownVariant(other.to_string())),
        }
    }
}

/// A request for brokering. Entries are never deleted; resolved ones stay as history.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueueEntry {
    pub id: Uuid,
    pub requester_id: Uuid,
    pub requester_display_name: String,
    /// Free text typed by the requester, not verified against the user directory.
    pub counterparty_hint: String,
    pub status: QueueStatus,
    pub requested_at: DateTime<Utc>,
    pub accepted_at: Option<DateTime<Utc>>,
    pub cancelled_at: Option<DateTime<Utc>>,
    pub broker_id: Option<Uuid>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueuePosition {
    pub position: usize,
    pub total: usize,
    pub ahead: usize,
}

/// 1-based position of `user_id` among `waiting` entries: one plus the number
/// of waiting entries requested strictly earlier. Entries sharing a timestamp
/// share a position.
pub fn queue_position(entries: &[QueueEntry], user_id: Uuid) -> Option<QueuePosition> {
    let waiting: Vec<&QueueEntry> = entries
        .iter()
        .filter(|e| e.status == QueueStatus::Waiting)
        .collect();

    let mine = waiting.iter().find(|e| e.requester_id == user_id)?;
    let ahead = waiting
        .iter()
        .filter(|e| e.requested_at < mine.requested_at)
        .count();

    Some(QueuePosition {
        position: ahead + 1,
        total: waiting.len(),
        ahead,
    })
}

// -- Trade rooms --

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Trader {
    pub uid: Uuid,
    pub display_name: String,
    pub items: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BrokerRef {
    pub uid: Uuid,
    pub display_name: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RoomStatus {
    Active,
    Closed,
}

impl RoomStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Active => "active",
            Self::Closed => "closed",
        }
    }
}

impl FromStr for RoomStatus {
    type Err = UnknownVariant;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "active" => Ok(Self::Active),
            "closed" => Ok(Self::Closed),
            other => Err(UnknownVariant(other.to_string())),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TradeRoom {
    pub id: Uuid,
    pub queue_entry_id: Uuid,
    pub traders: Vec<Trader>,
    pub broker: BrokerRef,
    pub status: RoomStatus,
    pub created_at: DateTime<Utc>,
}

impl TradeRoom {
    /// The broker followed by every trader still in the room.
    pub fn participant_ids(&self) -> Vec<Uuid> {
        std::iter::once(self.broker.uid)
            .chain(self.traders.iter().map(|t| t.uid))
            .collect()
    }

    pub fn is_participant(&self, user_id: Uuid) -> bool {
        self.is_broker(user_id) || self.traders.iter().any(|t| t.uid == user_id)
    }

    pub fn is_broker(&self, user_id: Uuid) -> bool {
        self.broker.uid == user_id
    }
}

// -- Messages --

/// Direct-chat key: the two participant ids, sorted, joined by `_`.
/// Both sides of a friendship derive the same key.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ChatKey(String);

impl ChatKey {
    pub fn for_pair(a: Uuid, b: Uuid) -> Self {
        let (lo, hi) = if a <= b { (a, b) } else { (b, a) };
        Self(format!("{}_{}", lo, hi))
    }

    pub fn members(&self) -> Option<(Uuid, Uuid)> {
        let (a, b) = self.0.split_once('_')?;
        Some((a.parse().ok()?, b.parse().ok()?))
    }

    pub fn contains(&self, user_id: Uuid) -> bool {
        self.members()
            .is_some_and(|(a, b)| a == user_id || b == user_id)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl FromStr for ChatKey {
    type Err = UnknownVariant;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let key = Self(s.to_string());
        match key.members() {
            Some((a, b)) if a < b => Ok(key),
            _ => Err(UnknownVariant(s.to_string())),
        }
    }
}

impl fmt::Display for ChatKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", content = "id", rename_all = "lowercase")]
pub enum Conversation {
    Room(Uuid),
    Chat(ChatKey),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub id: Uuid,
    pub conversation: Conversation,
    pub sender_id: Uuid,
    pub sender_name: String,
    pub text: String,
    pub sent_at: DateTime<Utc>,
    pub edited_at: Option<DateTime<Utc>>,
}

// -- Friends --

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FriendRequestStatus {
    Pending,
    Accepted,
}

impl FriendRequestStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Accepted => "accepted",
        }
    }
}

impl FromStr for FriendRequestStatus {
    type Err = UnknownVariant;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(Self::Pending),
            "accepted" => Ok(Self::Accepted),
            other => Err(UnknownVariant(other.to_string())),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FriendRequest {
    pub from: Uuid,
    pub to: Uuid,
    pub from_username: String,
    pub status: FriendRequestStatus,
    pub created_at: DateTime<Utc>,
}

/// One side of a symmetric friendship, as seen by its owner.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Friendship {
    pub friend_id: Uuid,
    pub username: String,
    pub since: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Profile {
    pub user: UserSummary,
    pub member_since: DateTime<Utc>,
    pub role: Role,
    /// Only meaningful for brokers.
    pub online: bool,
    pub friends: Vec<Friendship>,
    pub is_self: bool,
    pub is_friend: bool,
}

// -- Notifications --

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum NotificationPayload {
    Comment {
        trade_id: Uuid,
        comment_id: Uuid,
        comment_text: String,
        from_user: String,
    },
    Reply {
        trade_id: Uuid,
        comment_id: Uuid,
        reply_text: String,
        from_user: String,
    },
    TradeRoomReady {
        room_id: Uuid,
        broker_name: String,
    },
}

impl NotificationPayload {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Comment { .. } => "comment",
            Self::Reply { .. } => "reply",
            Self::TradeRoomReady { .. } => "tradeRoomReady",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Notification {
    pub id: Uuid,
    pub recipient_id: Uuid,
    #[serde(flatten)]
    pub payload: NotificationPayload,
    pub read: bool,
    pub created_at: DateTime<Utc>,
}

impl Notification {
    /// Page link the notification points at, carrying the deep-link query
    /// parameters the web client understands.
    pub fn deep_link(&self) -> String {
        match &self.payload {
            NotificationPayload::Comment { trade_id, comment_id, .. } => {
                format!("trade.html?tradeId={}&commentId={}", trade_id, comment_id)
            }
            NotificationPayload::Reply { trade_id, comment_id, .. } => {
                format!("trade.html?tradeId={}&commentId={}&reply=1", trade_id, comment_id)
            }
            NotificationPayload::TradeRoomReady { room_id, .. } => {
                format!("midman.html?roomId={}", room_id)
            }
        }
    }
}

// -- Trade posts --

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TradePost {
    pub id: Uuid,
    pub owner_id: Uuid,
    pub owner_username: String,
    pub game_name: String,
    pub item_name: String,
    pub description: String,
    pub price: Option<String>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Comment {
    pub id: Uuid,
    pub trade_id: Uuid,
    pub author_id: Uuid,
    pub author_username: String,
    pub text: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Reply {
    pub id: Uuid,
    pub comment_id: Uuid,
    pub author_id: Uuid,
    pub author_username: String,
    pub text: String,
    pub created_at: DateTime<Utc>,
}
