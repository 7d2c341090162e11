use axum::{
    Extension, Json,
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
};
use tracing::{info, warn};
use uuid::Uuid;

use tradehall_types::api::{
    AcceptQueueRequest, Claims, MyQueueStatus, QueueView, SubmitQueueRequest,
};
use tradehall_types::events::GatewayEvent;
use tradehall_types::models::{QueueEntry, TradeRoom, queue_position};

use crate::error::ApiResult;
use crate::notifications::push;
use crate::{AppState, blocking};

/// Waiting entries, oldest request first.
pub async fn list(State(state): State<AppState>) -> ApiResult<Json<QueueView>> {
    let view = blocking(&state, |db| db.queue_view()).await?;
    Ok(Json(view))
}

pub async fn submit(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Json(req): Json<SubmitQueueRequest>,
) -> ApiResult<impl IntoResponse> {
    let uid = claims.sub;
    let (entry, view) = blocking(&state, move |db| {
        let entry = db.submit_request(uid, &req.counterparty_hint)?;
        Ok((entry, db.queue_view()?))
    })
    .await?;

    publish_snapshot(&state, view);
    Ok((StatusCode::CREATED, Json(entry)))
}

/// The caller's place in line.
pub async fn my_status(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
) -> ApiResult<Json<MyQueueStatus>> {
    let waiting = blocking(&state, |db| db.list_waiting()).await?;
    let status = match queue_position(&waiting, claims.sub) {
        Some(pos) => MyQueueStatus {
            in_queue: true,
            position: Some(pos.position),
            total: pos.total,
            ahead: Some(pos.ahead),
        },
        None => MyQueueStatus {
            in_queue: false,
            position: None,
            total: waiting.len(),
            ahead: None,
        },
    };
    Ok(Json(status))
}

pub async fn cancel(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<QueueEntry>> {
    let uid = claims.sub;
    let (entry, view) = blocking(&state, move |db| {
        let entry = db.cancel_request(id, uid)?;
        Ok((entry, db.queue_view()?))
    })
    .await?;

    publish_snapshot(&state, view);
    Ok(Json(entry))
}

/// A broker claims the entry. The room is announced to all three
/// participants and the two traders get their notifications.
pub async fn accept(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Path(id): Path<Uuid>,
    Json(req): Json<AcceptQueueRequest>,
) -> ApiResult<Json<TradeRoom>> {
    let uid = claims.sub;
    let (assignment, view) = blocking(&state, move |db| {
        let assignment = db.accept_request(id, uid, &req.counterparty)?;
        Ok((assignment, db.queue_view()?))
    })
    .await
    .inspect_err(|e| warn!("{} could not accept queue entry {}: {}", claims.username, id, e))?;

    info!("Room {} opened for queue entry {}", assignment.room.id, id);

    publish_snapshot(&state, view);
    state
        .dispatcher
        .send_to_users(
            assignment.room.participant_ids(),
            GatewayEvent::RoomReady {
                room: assignment.room.clone(),
            },
        )
        .await;
    push(&state, assignment.notifications).await;

    Ok(Json(assignment.room))
}

/// Snapshots can reach the dispatcher out of order when mutations race.
/// The version lets subscribers discard the stale one.
fn publish_snapshot(state: &AppState, view: QueueView) {
    state.dispatcher.publish(GatewayEvent::QueueSnapshot {
        version: view.version,
        entries: view.entries,
    });
}
