use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use axum::extract::ws::{Message, WebSocket};
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use tokio::sync::{broadcast, mpsc};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use tradehall_db::Database;
use tradehall_types::events::{GatewayCommand, GatewayEvent, Topic};

use crate::dispatcher::{Dispatcher, UserMessage};
use crate::session::{Session, authorize_topics};

/// Heartbeat interval: server sends a Ping every 15 seconds.
/// If 2 consecutive Pongs are missed (~30s), the connection is dropped.
const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(15);

/// Subscription changes and replies produced by the read half, applied by the write half.
enum Control {
    Replace(Vec<Topic>),
    Remove(Vec<Topic>),
    Pong,
}

/// Drives one WebSocket connection. The token was validated at the HTTP
/// upgrade, so the client gets `Ready` straight away.
pub async fn handle_connection(
    socket: WebSocket,
    dispatcher: Dispatcher,
    db: Arc<Database>,
    user_id: Uuid,
    username: String,
) {
    let (mut sender, receiver) = socket.split();

    info!("{} ({}) connected to gateway", username, user_id);

    let ready = GatewayEvent::Ready {
        user_id,
        username: username.clone(),
    };
    if send_event(&mut sender, &ready).await.is_err() {
        return;
    }

    let (conn_id, user_rx) = dispatcher.register_user_channel(user_id).await;
    let broadcast_rx = dispatcher.subscribe();
    let (control_tx, control_rx) = mpsc::unbounded_channel();

    let pong_received = Arc::new(AtomicBool::new(true));
    let session = Session::new(user_id, username.clone());

    let mut send_task = tokio::spawn(write_loop(
        sender,
        session,
        broadcast_rx,
        user_rx,
        control_rx,
        pong_received.clone(),
    ));
    let mut recv_task = tokio::spawn(read_loop(
        receiver,
        db,
        user_id,
        username.clone(),
        control_tx,
        pong_received,
    ));

    // Wait for either task to finish
    tokio::select! {
        _ = &mut send_task => recv_task.abort(),
        _ = &mut recv_task => send_task.abort(),
    }

    dispatcher.unregister_user_channel(user_id, conn_id).await;
    info!("{} ({}) disconnected from gateway", username, user_id);
}

/// Everything the write half waits on.
struct Inbox {
    user_rx: mpsc::UnboundedReceiver<UserMessage>,
    broadcast_rx: broadcast::Receiver<GatewayEvent>,
    control_rx: mpsc::UnboundedReceiver<Control>,
    heartbeat: tokio::time::Interval,
}

enum Incoming {
    User(Option<UserMessage>),
    Broadcast(Result<GatewayEvent, broadcast::error::RecvError>),
    Control(Option<Control>),
    Heartbeat,
}

impl Inbox {
    /// Targeted messages win over published ones, so a revoke lands before
    /// any room event already queued on the broadcast side.
    async fn next(&mut self) -> Incoming {
        tokio::select! {
            biased;

            msg = self.user_rx.recv() => Incoming::User(msg),
            control = self.control_rx.recv() => Incoming::Control(control),
            result = self.broadcast_rx.recv() => Incoming::Broadcast(result),
            _ = self.heartbeat.tick() => Incoming::Heartbeat,
        }
    }
}

/// Forwards published and targeted events to the client, filtered by the
/// session's topics, and keeps the heartbeat going.
async fn write_loop(
    mut sender: SplitSink<WebSocket, Message>,
    mut session: Session,
    broadcast_rx: broadcast::Receiver<GatewayEvent>,
    user_rx: mpsc::UnboundedReceiver<UserMessage>,
    control_rx: mpsc::UnboundedReceiver<Control>,
    pong_received: Arc<AtomicBool>,
) {
    let mut heartbeat = tokio::time::interval(HEARTBEAT_INTERVAL);
    heartbeat.tick().await;
    let mut inbox = Inbox {
        user_rx,
        broadcast_rx,
        control_rx,
        heartbeat,
    };
    let mut missed_heartbeats: u8 = 0;

    loop {
        match inbox.next().await {
            Incoming::User(Some(UserMessage::Event(event))) => {
                if send_event(&mut sender, &event).await.is_err() {
                    break;
                }
            }
            Incoming::User(Some(UserMessage::Revoke(topic))) => {
                debug!("{} lost access to {:?}", session.username, topic);
                session.remove(&[topic]);
            }
            // Superseded by a newer connection
            Incoming::User(None) => break,
            Incoming::Broadcast(result) => {
                let event = match result {
                    Ok(event) => event,
                    Err(broadcast::error::RecvError::Lagged(n)) => {
                        warn!("Broadcast receiver lagged by {} messages", n);
                        continue;
                    }
                    Err(_) => break,
                };
                if !session.wants(&event) {
                    continue;
                }
                if send_event(&mut sender, &event).await.is_err() {
                    break;
                }
            }
            Incoming::Control(Some(Control::Replace(topics))) => {
                info!(
                    "{} ({}) subscribing to {} topics",
                    session.username,
                    session.user_id,
                    topics.len()
                );
                session.replace(topics);
            }
            Incoming::Control(Some(Control::Remove(topics))) => session.remove(&topics),
            Incoming::Control(Some(Control::Pong)) => {
                if send_event(&mut sender, &GatewayEvent::Pong).await.is_err() {
                    break;
                }
            }
            Incoming::Control(None) => break,
            Incoming::Heartbeat => {
                if pong_received.swap(false, Ordering::Acquire) {
                    missed_heartbeats = 0;
                } else {
                    missed_heartbeats += 1;
                    if missed_heartbeats >= 2 {
                        warn!("Heartbeat timeout (missed {} pongs), dropping connection", missed_heartbeats);
                        break;
                    }
                }
                if sender.send(Message::Ping(vec![].into())).await.is_err() {
                    break;
                }
            }
        }
    }
}

/// Reads client commands. Subscriptions are checked against the store
/// before they are handed to the write half.
async fn read_loop(
    mut receiver: SplitStream<WebSocket>,
    db: Arc<Database>,
    user_id: Uuid,
    username: String,
    control_tx: mpsc::UnboundedSender<Control>,
    pong_received: Arc<AtomicBool>,
) {
    while let Some(Ok(msg)) = receiver.next().await {
        match msg {
            Message::Text(text) => {
                let cmd = match serde_json::from_str::<GatewayCommand>(&text) {
                    Ok(cmd) => cmd,
                    Err(e) => {
                        warn!(
                            "{} ({}) bad command: {} -- raw: {}",
                            username,
                            user_id,
                            e,
                            text.chars().take(200).collect::<String>()
                        );
                        continue;
                    }
                };

                let control = match cmd {
                    GatewayCommand::Subscribe { topics } => {
                        let db = db.clone();
                        let allowed = tokio::task::spawn_blocking(move || {
                            authorize_topics(&db, user_id, topics)
                        })
                        .await;
                        match allowed {
                            Ok(topics) => Control::Replace(topics),
                            Err(e) => {
                                error!("Topic check for {} failed: {}", user_id, e);
                                continue;
                            }
                        }
                    }
                    GatewayCommand::Unsubscribe { topics } => Control::Remove(topics),
                    GatewayCommand::Ping => Control::Pong,
                };
                if control_tx.send(control).is_err() {
                    break;
                }
            }
            Message::Pong(_) => {
                pong_received.store(true, Ordering::Release);
            }
            Message::Close(_) => break,
            _ => {}
        }
    }
}

async fn send_event(
    sender: &mut SplitSink<WebSocket, Message>,
    event: &GatewayEvent,
) -> Result<(), ()> {
    let text = match serde_json::to_string(event) {
        Ok(text) => text,
        Err(e) => {
            error!("Failed to encode gateway event: {}", e);
            return Ok(());
        }
    };
    sender.send(Message::Text(text.into())).await.map_err(|_| ())
}
