use axum::{
    Extension, Json,
    extract::{Path, State},
    http::StatusCode,
};
use uuid::Uuid;

use tradehall_types::api::{Claims, NotificationView, UnreadCount};
use tradehall_types::events::GatewayEvent;
use tradehall_types::models::Notification;

use crate::error::ApiResult;
use crate::{AppState, blocking};

/// Newest first, each with the page link it points at.
pub async fn list(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
) -> ApiResult<Json<Vec<NotificationView>>> {
    let uid = claims.sub;
    let notifications = blocking(&state, move |db| db.list_notifications(uid)).await?;
    Ok(Json(notifications.into_iter().map(NotificationView::from).collect()))
}

pub async fn unread(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
) -> ApiResult<Json<UnreadCount>> {
    let uid = claims.sub;
    let unread = blocking(&state, move |db| db.unread_count(uid)).await?;
    Ok(Json(UnreadCount { unread }))
}

pub async fn mark_read(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Path(id): Path<Uuid>,
) -> ApiResult<StatusCode> {
    let uid = claims.sub;
    blocking(&state, move |db| db.mark_read(id, uid)).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// Delivers freshly stored notifications to their recipients if connected.
pub(crate) async fn push(state: &AppState, notifications: impl IntoIterator<Item = Notification>) {
    for notification in notifications {
        state
            .dispatcher
            .send_to_user(
                notification.recipient_id,
                GatewayEvent::NotificationCreate { notification },
            )
            .await;
    }
}
