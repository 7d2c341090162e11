use axum::{
    Extension, Json,
    extract::{Path, Query, State},
    http::StatusCode,
};
use tracing::info;
use uuid::Uuid;

use tradehall_db::StoreError;
use tradehall_types::api::{
    Claims, FindUserQuery, SetOnlineRequest, SetRoleRequest, UpdateUsernameRequest,
};
use tradehall_types::events::GatewayEvent;
use tradehall_types::models::{Profile, Role, User, UserSummary};

use crate::error::ApiResult;
use crate::{AppState, blocking};

pub async fn update_username(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Json(req): Json<UpdateUsernameRequest>,
) -> ApiResult<Json<User>> {
    let uid = claims.sub;
    let user = blocking(&state, move |db| db.update_username(uid, &req.username)).await?;
    info!("{} is now known as {}", claims.username, user.username);
    Ok(Json(user))
}

/// Broker availability toggle. Everyone hears about it.
pub async fn set_online(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Json(req): Json<SetOnlineRequest>,
) -> ApiResult<Json<User>> {
    let uid = claims.sub;
    let user = blocking(&state, move |db| db.set_online(uid, req.online)).await?;

    state.dispatcher.publish(GatewayEvent::BrokerPresence {
        user_id: user.id,
        username: user.username.clone(),
        online: user.online,
    });
    Ok(Json(user))
}

/// Brokers promote or demote other accounts.
pub async fn set_role(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Path(uid): Path<Uuid>,
    Json(req): Json<SetRoleRequest>,
) -> ApiResult<StatusCode> {
    let caller = claims.sub;
    let was_online = blocking(&state, move |db| {
        let me = db.get_user(caller)?.ok_or(StoreError::NotFound("user"))?;
        if me.role != Role::Broker {
            return Err(StoreError::Permission("only brokers can change roles"));
        }
        let target = db.get_user(uid)?.ok_or(StoreError::NotFound("user"))?;
        db.set_role(uid, req.role)?;
        Ok((target.online && req.role != Role::Broker).then_some(target.username))
    })
    .await?;

    // A demoted broker disappears from the online list
    if let Some(username) = was_online {
        state.dispatcher.publish(GatewayEvent::BrokerPresence {
            user_id: uid,
            username,
            online: false,
        });
    }
    Ok(StatusCode::NO_CONTENT)
}

pub async fn find_user(
    State(state): State<AppState>,
    Query(query): Query<FindUserQuery>,
) -> ApiResult<Json<UserSummary>> {
    let user = blocking(&state, move |db| {
        db.find_user(&query.identifier)?
            .ok_or(StoreError::NotFound("user"))
    })
    .await?;
    Ok(Json(UserSummary {
        id: user.id,
        username: user.username,
    }))
}

pub async fn profile(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Path(uid): Path<Uuid>,
) -> ApiResult<Json<Profile>> {
    let viewer = claims.sub;
    let profile = blocking(&state, move |db| db.profile(viewer, uid)).await?;
    Ok(Json(profile))
}

/// The "midmen online" list.
pub async fn online_brokers(State(state): State<AppState>) -> ApiResult<Json<Vec<UserSummary>>> {
    let brokers = blocking(&state, |db| db.list_online_brokers()).await?;
    Ok(Json(brokers))
}
