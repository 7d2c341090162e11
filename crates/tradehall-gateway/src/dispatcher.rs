use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::{RwLock, broadcast, mpsc};
use uuid::Uuid;

use tradehall_types::events::{GatewayEvent, Topic};

/// What the server pushes down a user's targeted channel.
#[derive(Debug, Clone)]
pub enum UserMessage {
    Event(GatewayEvent),
    /// The user lost access to a topic (kicked from a room). The connection
    /// drops it from its subscriptions.
    Revoke(Topic),
}

/// Fans events out to every connected client.
#[derive(Clone)]
pub struct Dispatcher {
    inner: Arc<DispatcherInner>,
}

struct DispatcherInner {
    /// Every connection receives every published event and filters by its own topics
    broadcast_tx: broadcast::Sender<GatewayEvent>,

    /// Per-user targeted send channels: user_id -> (conn_id, sender)
    user_channels: RwLock<HashMap<Uuid, (Uuid, mpsc::UnboundedSender<UserMessage>)>>,
}

impl Default for Dispatcher {
    fn default() -> Self {
        Self::new()
    }
}

impl Dispatcher {
    pub fn new() -> Self {
        let (broadcast_tx, _) = broadcast::channel(1024);
        Self {
            inner: Arc::new(DispatcherInner {
                broadcast_tx,
                user_channels: RwLock::new(HashMap::new()),
            }),
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<GatewayEvent> {
        self.inner.broadcast_tx.subscribe()
    }

    /// Publishes an event. Topic-scoped events only reach connections
    /// subscribed to that topic; the rest reach everyone.
    pub fn publish(&self, event: GatewayEvent) {
        let _ = self.inner.broadcast_tx.send(event);
    }

    /// Register a per-user targeted channel. A newer connection replaces the
    /// older one. Returns (conn_id, receiver).
    pub async fn register_user_channel(
        &self,
        user_id: Uuid,
    ) -> (Uuid, mpsc::UnboundedReceiver<UserMessage>) {
        let conn_id = Uuid::new_v4();
        let (tx, rx) = mpsc::unbounded_channel();
        self.inner
            .user_channels
            .write()
            .await
            .insert(user_id, (conn_id, tx));
        (conn_id, rx)
    }

    /// Unregister a per-user targeted channel, but only if conn_id matches.
    pub async fn unregister_user_channel(&self, user_id: Uuid, conn_id: Uuid) {
        let mut channels = self.inner.user_channels.write().await;
        if let Some((stored_conn_id, _)) = channels.get(&user_id) {
            if *stored_conn_id == conn_id {
                channels.remove(&user_id);
            }
        }
    }

    pub async fn is_connected(&self, user_id: Uuid) -> bool {
        self.inner.user_channels.read().await.contains_key(&user_id)
    }

    /// Send a targeted event to a specific user. Dropped if they are offline.
    pub async fn send_to_user(&self, user_id: Uuid, event: GatewayEvent) {
        let channels = self.inner.user_channels.read().await;
        if let Some((_, tx)) = channels.get(&user_id) {
            let _ = tx.send(UserMessage::Event(event));
        }
    }

    pub async fn send_to_users<I>(&self, user_ids: I, event: GatewayEvent)
    where
        I: IntoIterator<Item = Uuid>,
    {
        let channels = self.inner.user_channels.read().await;
        for user_id in user_ids {
            if let Some((_, tx)) = channels.get(&user_id) {
                let _ = tx.send(UserMessage::Event(event.clone()));
            }
        }
    }

    /// Strips a topic from the user's live subscriptions.
    pub async fn revoke_topic(&self, user_id: Uuid, topic: Topic) {
        let channels = self.inner.user_channels.read().await;
        if let Some((_, tx)) = channels.get(&user_id) {
            let _ = tx.send(UserMessage::Revoke(topic));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ready(name: &str) -> GatewayEvent {
        GatewayEvent::Ready {
            user_id: Uuid::nil(),
            username: name.to_string(),
        }
    }

    #[tokio::test]
    async fn targeted_events_reach_only_their_user() {
        let dispatcher = Dispatcher::new();
        let alice = Uuid::new_v4();
        let bob = Uuid::new_v4();
        let (_, mut alice_rx) = dispatcher.register_user_channel(alice).await;
        let (_, mut bob_rx) = dispatcher.register_user_channel(bob).await;

        dispatcher.send_to_user(alice, ready("for-alice")).await;

        match alice_rx.try_recv().unwrap() {
            UserMessage::Event(GatewayEvent::Ready { username, .. }) => {
                assert_eq!(username, "for-alice")
            }
            other => panic!("unexpected {:?}", other),
        }
        assert!(bob_rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn newer_connection_keeps_channel_when_old_one_leaves() {
        let dispatcher = Dispatcher::new();
        let user = Uuid::new_v4();

        let (old_conn, _old_rx) = dispatcher.register_user_channel(user).await;
        let (_new_conn, mut new_rx) = dispatcher.register_user_channel(user).await;

        dispatcher.unregister_user_channel(user, old_conn).await;
        assert!(dispatcher.is_connected(user).await);

        dispatcher.revoke_topic(user, Topic::Queue).await;
        assert!(matches!(
            new_rx.try_recv().unwrap(),
            UserMessage::Revoke(Topic::Queue)
        ));
    }

    #[tokio::test]
    async fn published_events_reach_every_receiver() {
        let dispatcher = Dispatcher::new();
        let mut a = dispatcher.subscribe();
        let mut b = dispatcher.subscribe();

        dispatcher.publish(GatewayEvent::Pong);

        assert!(matches!(a.recv().await.unwrap(), GatewayEvent::Pong));
        assert!(matches!(b.recv().await.unwrap(), GatewayEvent::Pong));
    }
}
