pub mod auth;
pub mod error;
pub mod friends;
pub mod messages;
pub mod middleware;
pub mod notifications;
pub mod queue;
pub mod rooms;
pub mod trades;
pub mod users;

use std::sync::Arc;

use axum::{
    Router, middleware as axum_middleware,
    routing::{get, patch, post, put},
};
use tracing::error;

use tradehall_db::{Database, StoreResult};
use tradehall_gateway::Dispatcher;

use crate::error::{ApiError, ApiResult};

pub type AppState = Arc<AppStateInner>;

pub struct AppStateInner {
    pub db: Arc<Database>,
    pub dispatcher: Dispatcher,
    pub jwt_secret: String,
    pub token_ttl_days: i64,
}

/// Runs a store call on the blocking pool.
pub(crate) async fn blocking<F, T>(state: &AppState, f: F) -> ApiResult<T>
where
    F: FnOnce(&Database) -> StoreResult<T> + Send + 'static,
    T: Send + 'static,
{
    let db = state.db.clone();
    tokio::task::spawn_blocking(move || f(&db))
        .await
        .map_err(|e| {
            error!("spawn_blocking join error: {}", e);
            ApiError::Internal(e.into())
        })?
        .map_err(ApiError::from)
}

/// Every HTTP route. The WebSocket gateway is mounted by the server binary.
pub fn router(state: AppState) -> Router {
    let public_routes = Router::new()
        .route("/auth/register", post(auth::register))
        .route("/auth/login", post(auth::login))
        .with_state(state.clone());

    let protected_routes = Router::new()
        // Account
        .route("/auth/session", get(auth::session))
        .route("/auth/logout", post(auth::logout))
        .route("/auth/password", post(auth::change_password))
        .route("/me/username", put(users::update_username))
        .route("/me/online", put(users::set_online))
        .route("/users/find", get(users::find_user))
        .route("/users/{uid}/profile", get(users::profile))
        .route("/users/{uid}/role", put(users::set_role))
        .route("/brokers/online", get(users::online_brokers))
        // Trades
        .route("/trades", get(trades::browse).post(trades::create))
        .route("/trades/mine", get(trades::mine))
        .route("/trades/{id}", get(trades::get_one).delete(trades::delete))
        .route(
            "/trades/{id}/comments",
            get(trades::list_comments).post(trades::post_comment),
        )
        .route(
            "/comments/{id}/replies",
            get(trades::list_replies).post(trades::post_reply),
        )
        // Notifications
        .route("/notifications", get(notifications::list))
        .route("/notifications/unread", get(notifications::unread))
        .route("/notifications/{id}/read", post(notifications::mark_read))
        // Friends and direct chat
        .route("/friends", get(friends::list_friends))
        .route(
            "/friends/requests",
            get(friends::list_requests).post(friends::send_request),
        )
        .route("/friends/requests/{from}/accept", post(friends::accept))
        .route("/friends/requests/{from}/reject", post(friends::reject))
        .route(
            "/chats/{friend_id}/messages",
            get(messages::list_chat).post(messages::post_chat),
        )
        // Middleman queue and trade rooms
        .route("/queue", get(queue::list).post(queue::submit))
        .route("/queue/me", get(queue::my_status))
        .route("/queue/{id}/cancel", post(queue::cancel))
        .route("/queue/{id}/accept", post(queue::accept))
        .route("/rooms", get(rooms::list))
        .route("/rooms/{id}", get(rooms::get_one).delete(rooms::close))
        .route("/rooms/{id}/kick", post(rooms::kick))
        .route("/rooms/{id}/items", put(rooms::set_items))
        .route(
            "/rooms/{id}/messages",
            get(messages::list_room).post(messages::post_room),
        )
        .route(
            "/messages/{id}",
            patch(messages::edit).delete(messages::delete),
        )
        .layer(axum_middleware::from_fn_with_state(
            state.clone(),
            middleware::require_auth,
        ))
        .with_state(state);

    Router::new()
        .merge(public_routes)
        .merge(protected_routes)
        .route("/health", get(|| async { "ok" }))
}
