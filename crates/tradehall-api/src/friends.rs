use axum::{
    Extension, Json,
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
};
use tracing::info;
use uuid::Uuid;

use tradehall_db::StoreError;
use tradehall_types::api::{Claims, SendFriendRequest};
use tradehall_types::events::GatewayEvent;
use tradehall_types::models::{FriendRequest, Friendship};

use crate::error::ApiResult;
use crate::{AppState, blocking};

pub async fn list_friends(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
) -> ApiResult<Json<Vec<Friendship>>> {
    let uid = claims.sub;
    let friends = blocking(&state, move |db| db.list_friends(uid)).await?;
    Ok(Json(friends))
}

/// Pending requests addressed to the caller.
pub async fn list_requests(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
) -> ApiResult<Json<Vec<FriendRequest>>> {
    let uid = claims.sub;
    let requests = blocking(&state, move |db| db.list_pending_requests(uid)).await?;
    Ok(Json(requests))
}

/// Looks the recipient up by e-mail or username and files the request.
pub async fn send_request(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Json(req): Json<SendFriendRequest>,
) -> ApiResult<impl IntoResponse> {
    let uid = claims.sub;
    let request = blocking(&state, move |db| {
        let target = db
            .find_user(&req.identifier)?
            .ok_or(StoreError::NotFound("user"))?;
        db.send_friend_request(uid, target.id)
    })
    .await?;

    state
        .dispatcher
        .send_to_user(
            request.to,
            GatewayEvent::FriendRequestReceived {
                request: request.clone(),
            },
        )
        .await;

    Ok((StatusCode::CREATED, Json(request)))
}

pub async fn accept(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Path(from): Path<Uuid>,
) -> ApiResult<Json<Friendship>> {
    let uid = claims.sub;
    let (mine, theirs) = blocking(&state, move |db| db.accept_friend_request(uid, from)).await?;

    info!("{} accepted a friend request from {}", claims.username, mine.username);
    state
        .dispatcher
        .send_to_user(from, GatewayEvent::FriendAdded { friend: theirs })
        .await;

    Ok(Json(mine))
}

pub async fn reject(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Path(from): Path<Uuid>,
) -> ApiResult<StatusCode> {
    let uid = claims.sub;
    blocking(&state, move |db| db.reject_friend_request(uid, from)).await?;
    Ok(StatusCode::NO_CONTENT)
}
