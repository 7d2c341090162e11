use std::collections::HashSet;

use tracing::warn;
use uuid::Uuid;

use tradehall_db::Database;
use tradehall_types::events::{GatewayEvent, Topic};

/// Per-connection state: who is connected and which topics they listen to.
/// Owned by the connection, dropped with it.
#[derive(Debug)]
pub struct Session {
    pub user_id: Uuid,
    pub username: String,
    topics: HashSet<Topic>,
}

impl Session {
    pub fn new(user_id: Uuid, username: String) -> Self {
        Self {
            user_id,
            username,
            topics: HashSet::new(),
        }
    }

    /// Swaps in a whole new subscription set.
    pub fn replace(&mut self, topics: impl IntoIterator<Item = Topic>) {
        self.topics = topics.into_iter().collect();
    }

    pub fn remove(&mut self, topics: &[Topic]) {
        for topic in topics {
            self.topics.remove(topic);
        }
    }

    pub fn is_subscribed(&self, topic: &Topic) -> bool {
        self.topics.contains(topic)
    }

    pub fn topic_count(&self) -> usize {
        self.topics.len()
    }

    /// Whether a published event should be forwarded to this connection.
    pub fn wants(&self, event: &GatewayEvent) -> bool {
        match event.topic() {
            Some(topic) => self.topics.contains(&topic),
            None => true,
        }
    }
}

/// Keeps the topics `user_id` may listen to. Rooms need current
/// participation, chats need the user to be one of the pair.
pub fn authorize_topics(db: &Database, user_id: Uuid, topics: Vec<Topic>) -> Vec<Topic> {
    topics
        .into_iter()
        .filter(|topic| {
            let allowed = match topic {
                Topic::Queue | Topic::Trade(_) | Topic::Comment(_) => true,
                Topic::Room(room_id) => db.get_room_for(*room_id, user_id).is_ok(),
                Topic::Chat(key) => key.contains(user_id),
            };
            if !allowed {
                warn!("User {} not allowed on topic {:?}, dropping it", user_id, topic);
            }
            allowed
        })
        .collect()
}
