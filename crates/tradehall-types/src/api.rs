use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::models::{Notification, QueueEntry, Role};

// -- JWT Claims --

/// JWT claims shared by the REST middleware and the gateway upgrade.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    pub sub: Uuid,
    pub username: String,
    /// Token version; bumped on logout and password change to revoke old tokens.
    pub ver: i64,
    pub exp: usize,
}

// -- Auth --

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RegisterRequest {
    pub email: String,
    pub username: String,
    pub password: String,
    pub confirm_password: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct AuthResponse {
    pub user_id: Uuid,
    pub username: String,
    pub token: String,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct LoginRequest {
    pub email: String,
    pub password: String,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ChangePasswordRequest {
    pub current_password: String,
    pub new_password: String,
    pub confirm_password: String,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct UpdateUsernameRequest {
    pub username: String,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SetOnlineRequest {
    pub online: bool,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SetRoleRequest {
    pub role: Role,
}

#[derive(Debug, Deserialize)]
pub struct FindUserQuery {
    pub identifier: String,
}

// -- Trades --

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CreateTradeRequest {
    pub game_name: String,
    pub item_name: String,
    pub description: String,
    #[serde(default)]
    pub price: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PostTextRequest {
    pub text: String,
}

// -- Friends --

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SendFriendRequest {
    /// E-mail (anything containing `@`) or username.
    pub identifier: String,
}

// -- Queue / rooms --

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SubmitQueueRequest {
    #[serde(default)]
    pub counterparty_hint: String,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct AcceptQueueRequest {
    /// Username (or e-mail) of the other trader.
    pub counterparty: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct QueueView {
    /// Bumped by every change to the waiting list. Clients ignore views
    /// older than the newest one they have applied.
    pub version: u64,
    pub entries: Vec<QueueEntry>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct MyQueueStatus {
    pub in_queue: bool,
    pub position: Option<usize>,
    pub total: usize,
    pub ahead: Option<usize>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct KickRequest {
    pub trader_id: Uuid,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SetItemsRequest {
    pub items: Vec<String>,
}

// -- Notifications --

#[derive(Debug, Serialize, Deserialize)]
pub struct NotificationView {
    #[serde(flatten)]
    pub notification: Notification,
    pub link: String,
}

impl From<Notification> for NotificationView {
    fn from(notification: Notification) -> Self {
        let link = notification.deep_link();
        Self { notification, link }
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct UnreadCount {
    pub unread: usize,
}

// -- Errors --

#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorBody {
    pub error: String,
    pub message: String,
}
