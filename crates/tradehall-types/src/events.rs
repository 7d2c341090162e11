use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::models::{
    ChatKey, Comment, Conversation, FriendRequest, Friendship, Message, Notification, QueueEntry,
    Reply, TradeRoom,
};

/// A stream of change events a client can subscribe to.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", content = "id", rename_all = "lowercase")]
pub enum Topic {
    /// The waiting list of the middleman queue.
    Queue,
    Room(Uuid),
    Chat(ChatKey),
    /// Comments on a trade post.
    Trade(Uuid),
    /// Replies to a comment.
    Comment(Uuid),
}

impl From<&Conversation> for Topic {
    fn from(conversation: &Conversation) -> Self {
        match conversation {
            Conversation::Room(id) => Self::Room(*id),
            Conversation::Chat(key) => Self::Chat(key.clone()),
        }
    }
}

/// Events sent over the WebSocket gateway.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum GatewayEvent {
    /// Server confirms successful authentication
    Ready { user_id: Uuid, username: String },

    /// Full list of waiting entries, oldest request first
    QueueSnapshot { version: u64, entries: Vec<QueueEntry> },

    /// A room the recipient belongs to was created
    RoomReady { room: TradeRoom },

    /// Participants or item lists changed
    RoomUpdated { room: TradeRoom },

    /// The recipient was removed from a room
    RoomKicked { room_id: Uuid },

    /// The broker closed the room; it no longer exists
    RoomClosed { room_id: Uuid },

    MessageCreate { message: Message },

    MessageUpdate { message: Message },

    MessageDelete {
        conversation: Conversation,
        message_id: Uuid,
    },

    CommentCreate { comment: Comment },

    ReplyCreate { trade_id: Uuid, reply: Reply },

    NotificationCreate { notification: Notification },

    FriendRequestReceived { request: FriendRequest },

    FriendAdded { friend: Friendship },

    /// A broker toggled availability
    BrokerPresence {
        user_id: Uuid,
        username: String,
        online: bool,
    },

    Pong,
}

impl GatewayEvent {
    /// Returns the topic if this event is scoped to one.
    /// Events that return `None` are either global or delivered to a specific user.
    pub fn topic(&self) -> Option<Topic> {
        match self {
            Self::QueueSnapshot { .. } => Some(Topic::Queue),
            Self::RoomUpdated { room } => Some(Topic::Room(room.id)),
            Self::RoomClosed { room_id } => Some(Topic::Room(*room_id)),
            Self::MessageCreate { message } | Self::MessageUpdate { message } => {
                Some(Topic::from(&message.conversation))
            }
            Self::MessageDelete { conversation, .. } => Some(Topic::from(conversation)),
            Self::CommentCreate { comment } => Some(Topic::Trade(comment.trade_id)),
            Self::ReplyCreate { reply, .. } => Some(Topic::Comment(reply.comment_id)),
            _ => None,
        }
    }
}

/// Commands sent FROM client TO server over WebSocket.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum GatewayCommand {
    /// Replace the connection's whole subscription set.
    /// Screens send this on entry, which drops whatever the previous screen listened to.
    Subscribe { topics: Vec<Topic> },

    /// Drop specific topics, keeping the rest.
    Unsubscribe { topics: Vec<Topic> },

    Ping,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn subscribe_command_wire_format() {
        let room = Uuid::new_v4();
        let raw = format!(
            r#"{{"type":"Subscribe","data":{{"topics":[{{"kind":"queue"}},{{"kind":"room","id":"{}"}}]}}}}"#,
            room
        );
        let cmd: GatewayCommand = serde_json::from_str(&raw).unwrap();
        match cmd {
            GatewayCommand::Subscribe { topics } => {
                assert_eq!(topics, vec![Topic::Queue, Topic::Room(room)]);
            }
            other => panic!("unexpected command {:?}", other),
        }
    }

    #[test]
    fn message_events_are_scoped_to_their_conversation() {
        let key = ChatKey::for_pair(Uuid::new_v4(), Uuid::new_v4());
        let event = GatewayEvent::MessageDelete {
            conversation: Conversation::Chat(key.clone()),
            message_id: Uuid::new_v4(),
        };
        assert_eq!(event.topic(), Some(Topic::Chat(key)));

        let targeted = GatewayEvent::RoomKicked { room_id: Uuid::new_v4() };
        assert_eq!(targeted.topic(), None);
    }
}
