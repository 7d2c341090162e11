use axum::{
    Extension, Json,
    extract::{Path, State},
    http::StatusCode,
};
use uuid::Uuid;

use tradehall_types::api::{Claims, KickRequest, SetItemsRequest};
use tradehall_types::events::{GatewayEvent, Topic};
use tradehall_types::models::TradeRoom;

use crate::error::ApiResult;
use crate::{AppState, blocking};

pub async fn list(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
) -> ApiResult<Json<Vec<TradeRoom>>> {
    let uid = claims.sub;
    let rooms = blocking(&state, move |db| db.list_rooms_for_user(uid)).await?;
    Ok(Json(rooms))
}

pub async fn get_one(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<TradeRoom>> {
    let uid = claims.sub;
    let room = blocking(&state, move |db| db.get_room_for(id, uid)).await?;
    Ok(Json(room))
}

pub async fn kick(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Path(id): Path<Uuid>,
    Json(req): Json<KickRequest>,
) -> ApiResult<Json<TradeRoom>> {
    let uid = claims.sub;
    let trader_id = req.trader_id;
    let room = blocking(&state, move |db| db.kick(id, trader_id, uid)).await?;

    // Cut the kicked trader off before the remaining participants hear about it
    state.dispatcher.revoke_topic(trader_id, Topic::Room(id)).await;
    state
        .dispatcher
        .send_to_user(trader_id, GatewayEvent::RoomKicked { room_id: id })
        .await;
    state
        .dispatcher
        .publish(GatewayEvent::RoomUpdated { room: room.clone() });

    Ok(Json(room))
}

pub async fn set_items(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Path(id): Path<Uuid>,
    Json(req): Json<SetItemsRequest>,
) -> ApiResult<Json<TradeRoom>> {
    let uid = claims.sub;
    let room = blocking(&state, move |db| db.set_items(id, uid, &req.items)).await?;

    state
        .dispatcher
        .publish(GatewayEvent::RoomUpdated { room: room.clone() });
    Ok(Json(room))
}

/// Hard-deletes the room and its messages. Every participant is told,
/// whether or not they have the room open.
pub async fn close(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Path(id): Path<Uuid>,
) -> ApiResult<StatusCode> {
    let uid = claims.sub;
    let room = blocking(&state, move |db| db.close_room(id, uid)).await?;

    let participants = room.participant_ids();
    for participant in &participants {
        state
            .dispatcher
            .revoke_topic(*participant, Topic::Room(id))
            .await;
    }
    state
        .dispatcher
        .send_to_users(participants, GatewayEvent::RoomClosed { room_id: id })
        .await;

    Ok(StatusCode::NO_CONTENT)
}
