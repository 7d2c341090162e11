use axum::{
    Extension, Json,
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
};
use uuid::Uuid;

use tradehall_types::api::{Claims, PostTextRequest};
use tradehall_types::events::GatewayEvent;
use tradehall_types::models::{ChatKey, Conversation, Message};

use crate::error::ApiResult;
use crate::{AppState, blocking};

pub async fn list_chat(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Path(friend_id): Path<Uuid>,
) -> ApiResult<Json<Vec<Message>>> {
    let conversation = Conversation::Chat(ChatKey::for_pair(claims.sub, friend_id));
    list(&state, conversation, claims.sub).await
}

pub async fn post_chat(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Path(friend_id): Path<Uuid>,
    Json(req): Json<PostTextRequest>,
) -> ApiResult<impl IntoResponse> {
    let conversation = Conversation::Chat(ChatKey::for_pair(claims.sub, friend_id));
    post(&state, conversation, claims.sub, req.text).await
}

pub async fn list_room(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Path(room_id): Path<Uuid>,
) -> ApiResult<Json<Vec<Message>>> {
    list(&state, Conversation::Room(room_id), claims.sub).await
}

pub async fn post_room(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Path(room_id): Path<Uuid>,
    Json(req): Json<PostTextRequest>,
) -> ApiResult<impl IntoResponse> {
    post(&state, Conversation::Room(room_id), claims.sub, req.text).await
}

pub async fn edit(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Path(id): Path<Uuid>,
    Json(req): Json<PostTextRequest>,
) -> ApiResult<Json<Message>> {
    let uid = claims.sub;
    let message = blocking(&state, move |db| db.edit_message(id, uid, &req.text)).await?;

    state.dispatcher.publish(GatewayEvent::MessageUpdate {
        message: message.clone(),
    });
    Ok(Json(message))
}

pub async fn delete(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Path(id): Path<Uuid>,
) -> ApiResult<StatusCode> {
    let uid = claims.sub;
    let message = blocking(&state, move |db| db.delete_message(id, uid)).await?;

    state.dispatcher.publish(GatewayEvent::MessageDelete {
        conversation: message.conversation,
        message_id: message.id,
    });
    Ok(StatusCode::NO_CONTENT)
}

async fn list(
    state: &AppState,
    conversation: Conversation,
    viewer: Uuid,
) -> ApiResult<Json<Vec<Message>>> {
    let messages = blocking(state, move |db| db.list_messages(&conversation, viewer)).await?;
    Ok(Json(messages))
}

async fn post(
    state: &AppState,
    conversation: Conversation,
    sender: Uuid,
    text: String,
) -> ApiResult<(StatusCode, Json<Message>)> {
    let message = blocking(state, move |db| db.post_message(&conversation, sender, &text)).await?;

    state.dispatcher.publish(GatewayEvent::MessageCreate {
        message: message.clone(),
    });
    Ok((StatusCode::CREATED, Json(message)))
}
