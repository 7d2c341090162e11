use axum::{
    Extension, Json,
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
};
use tracing::info;
use uuid::Uuid;

use tradehall_db::StoreError;
use tradehall_db::trades::NewTrade;
use tradehall_types::api::{Claims, CreateTradeRequest, PostTextRequest};
use tradehall_types::events::GatewayEvent;
use tradehall_types::models::{Comment, Reply, TradePost};

use crate::error::ApiResult;
use crate::notifications::push;
use crate::{AppState, blocking};

/// Everyone else's trades.
pub async fn browse(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
) -> ApiResult<Json<Vec<TradePost>>> {
    let uid = claims.sub;
    let trades = blocking(&state, move |db| db.browse_trades(uid)).await?;
    Ok(Json(trades))
}

pub async fn mine(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
) -> ApiResult<Json<Vec<TradePost>>> {
    let uid = claims.sub;
    let trades = blocking(&state, move |db| db.list_trades_by_owner(uid)).await?;
    Ok(Json(trades))
}

pub async fn create(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Json(req): Json<CreateTradeRequest>,
) -> ApiResult<impl IntoResponse> {
    let uid = claims.sub;
    let trade = blocking(&state, move |db| {
        db.create_trade(
            uid,
            NewTrade {
                game_name: &req.game_name,
                item_name: &req.item_name,
                description: &req.description,
                price: req.price.as_deref(),
            },
        )
    })
    .await?;

    info!("{} posted trade {} ({})", claims.username, trade.id, trade.item_name);
    Ok((StatusCode::CREATED, Json(trade)))
}

pub async fn get_one(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<TradePost>> {
    let trade = blocking(&state, move |db| {
        db.get_trade(id)?.ok_or(StoreError::NotFound("trade"))
    })
    .await?;
    Ok(Json(trade))
}

pub async fn delete(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Path(id): Path<Uuid>,
) -> ApiResult<StatusCode> {
    let uid = claims.sub;
    blocking(&state, move |db| db.delete_trade(id, uid)).await?;
    Ok(StatusCode::NO_CONTENT)
}

pub async fn list_comments(
    State(state): State<AppState>,
    Path(trade_id): Path<Uuid>,
) -> ApiResult<Json<Vec<Comment>>> {
    let comments = blocking(&state, move |db| db.list_comments(trade_id)).await?;
    Ok(Json(comments))
}

pub async fn post_comment(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Path(trade_id): Path<Uuid>,
    Json(req): Json<PostTextRequest>,
) -> ApiResult<impl IntoResponse> {
    let uid = claims.sub;
    let (comment, notification) =
        blocking(&state, move |db| db.post_comment(trade_id, uid, &req.text)).await?;

    state.dispatcher.publish(GatewayEvent::CommentCreate {
        comment: comment.clone(),
    });
    push(&state, notification).await;

    Ok((StatusCode::CREATED, Json(comment)))
}

pub async fn list_replies(
    State(state): State<AppState>,
    Path(comment_id): Path<Uuid>,
) -> ApiResult<Json<Vec<Reply>>> {
    let replies = blocking(&state, move |db| db.list_replies(comment_id)).await?;
    Ok(Json(replies))
}

pub async fn post_reply(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Path(comment_id): Path<Uuid>,
    Json(req): Json<PostTextRequest>,
) -> ApiResult<impl IntoResponse> {
    let uid = claims.sub;
    let (trade_id, reply, notification) = blocking(&state, move |db| {
        let parent = db
            .get_comment(comment_id)?
            .ok_or(StoreError::NotFound("comment"))?;
        let (reply, notification) = db.post_reply(comment_id, uid, &req.text)?;
        Ok((parent.trade_id, reply, notification))
    })
    .await?;

    state.dispatcher.publish(GatewayEvent::ReplyCreate {
        trade_id,
        reply: reply.clone(),
    });
    push(&state, notification).await;

    Ok((StatusCode::CREATED, Json(reply)))
}
