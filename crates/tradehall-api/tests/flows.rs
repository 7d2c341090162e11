use std::sync::Arc;

use axum::{
    Router,
    body::Body,
    http::{Method, Request, StatusCode, header},
};
use http_body_util::BodyExt;
use serde_json::{Value, json};
use tower::ServiceExt;

use tradehall_api::{AppState, AppStateInner, auth::verify_token, router};
use tradehall_db::Database;
use tradehall_gateway::Dispatcher;
use tradehall_types::events::GatewayEvent;
use tradehall_types::models::Role;

fn app() -> (Router, AppState) {
    let state = Arc::new(AppStateInner {
        db: Arc::new(Database::open_in_memory().unwrap()),
        dispatcher: Dispatcher::new(),
        jwt_secret: "integration-test-secret".into(),
        token_ttl_days: 1,
    });
    (router(state.clone()), state)
}

async fn call(
    app: &Router,
    method: Method,
    uri: &str,
    token: Option<&str>,
    body: Option<Value>,
) -> (StatusCode, Value) {
    let mut builder = Request::builder().method(method).uri(uri);
    if let Some(token) = token {
        builder = builder.header(header::AUTHORIZATION, format!("Bearer {}", token));
    }
    let request = match body {
        Some(body) => builder
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(body.to_string()))
            .unwrap(),
        None => builder.body(Body::empty()).unwrap(),
    };

    let response = app.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    let value = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap()
    };
    (status, value)
}

/// Registers an account and returns (user id, token).
async fn register(app: &Router, name: &str) -> (String, String) {
    let (status, body) = call(
        app,
        Method::POST,
        "/auth/register",
        None,
        Some(json!({
            "email": format!("{}@example.com", name),
            "username": name,
            "password": "correct horse",
            "confirm_password": "correct horse",
        })),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED, "register {}: {}", name, body);
    (
        body["user_id"].as_str().unwrap().to_string(),
        body["token"].as_str().unwrap().to_string(),
    )
}

#[tokio::test]
async fn logout_revokes_existing_tokens() {
    let (app, _) = app();
    let (_, token) = register(&app, "alice").await;

    let (status, body) = call(&app, Method::GET, "/auth/session", Some(&token), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["username"], "alice");

    let (status, _) = call(&app, Method::POST, "/auth/logout", Some(&token), None).await;
    assert_eq!(status, StatusCode::NO_CONTENT);

    let (status, body) = call(&app, Method::GET, "/auth/session", Some(&token), None).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["error"], "unauthorized");

    let (status, body) = call(
        &app,
        Method::POST,
        "/auth/login",
        None,
        Some(json!({ "email": "ALICE@example.com", "password": "correct horse" })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    let fresh = body["token"].as_str().unwrap();
    let (status, _) = call(&app, Method::GET, "/auth/session", Some(fresh), None).await;
    assert_eq!(status, StatusCode::OK);
}

#[tokio::test]
async fn bad_credentials_and_forms_are_rejected() {
    let (app, _) = app();
    register(&app, "alice").await;

    let (status, _) = call(
        &app,
        Method::POST,
        "/auth/login",
        None,
        Some(json!({ "email": "alice@example.com", "password": "wrong password" })),
    )
    .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    let (status, body) = call(
        &app,
        Method::POST,
        "/auth/register",
        None,
        Some(json!({
            "email": "bob@example.com",
            "username": "bob",
            "password": "correct horse",
            "confirm_password": "battery staple",
        })),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "validation");

    let (status, _) = call(&app, Method::GET, "/trades", None, None).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn comment_notifies_trade_owner_with_deep_link() {
    let (app, _) = app();
    let (_, owner) = register(&app, "owner").await;
    let (_, visitor) = register(&app, "visitor").await;

    let (status, trade) = call(
        &app,
        Method::POST,
        "/trades",
        Some(&owner),
        Some(json!({
            "game_name": "Skyforge",
            "item_name": "Ember Blade",
            "description": "Barely used",
        })),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    let trade_id = trade["id"].as_str().unwrap();

    // Own comment: no notification
    let uri = format!("/trades/{}/comments", trade_id);
    call(&app, Method::POST, &uri, Some(&owner), Some(json!({ "text": "bump" }))).await;
    let (_, unread) = call(&app, Method::GET, "/notifications/unread", Some(&owner), None).await;
    assert_eq!(unread["unread"], 0);

    let (status, comment) = call(
        &app,
        Method::POST,
        &uri,
        Some(&visitor),
        Some(json!({ "text": "Still available?" })),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);

    let (_, list) = call(&app, Method::GET, "/notifications", Some(&owner), None).await;
    let list = list.as_array().unwrap();
    assert_eq!(list.len(), 1);
    assert_eq!(list[0]["type"], "comment");
    assert_eq!(
        list[0]["link"],
        format!(
            "trade.html?tradeId={}&commentId={}",
            trade_id,
            comment["id"].as_str().unwrap()
        )
    );

    let (status, _) = call(
        &app,
        Method::POST,
        &uri,
        Some(&visitor),
        Some(json!({ "text": "   " })),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn brokered_trade_from_queue_to_closed_room() {
    let (app, state) = app();
    let (requester_id, requester) = register(&app, "requester").await;
    let (bob_id, bob) = register(&app, "bob").await;
    let (midman_id, midman) = register(&app, "midman").await;
    state
        .db
        .set_role(midman_id.parse().unwrap(), Role::Broker)
        .unwrap();

    let (status, entry) = call(
        &app,
        Method::POST,
        "/queue",
        Some(&requester),
        Some(json!({ "counterparty_hint": "bob" })),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    let entry_id = entry["id"].as_str().unwrap().to_string();

    let (status, body) = call(&app, Method::POST, "/queue", Some(&requester), Some(json!({}))).await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["error"], "already_queued");

    let (_, me) = call(&app, Method::GET, "/queue/me", Some(&requester), None).await;
    assert_eq!(me["position"], 1);
    assert_eq!(me["total"], 1);

    // Plain users cannot claim entries
    let accept_uri = format!("/queue/{}/accept", entry_id);
    let (status, _) = call(
        &app,
        Method::POST,
        &accept_uri,
        Some(&bob),
        Some(json!({ "counterparty": "bob" })),
    )
    .await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let (status, body) = call(
        &app,
        Method::POST,
        &accept_uri,
        Some(&midman),
        Some(json!({ "counterparty": "nobody" })),
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["error"], "counterparty_not_found");

    let (status, room) = call(
        &app,
        Method::POST,
        &accept_uri,
        Some(&midman),
        Some(json!({ "counterparty": "bob" })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    let room_id = room["id"].as_str().unwrap().to_string();

    let (status, _) = call(
        &app,
        Method::POST,
        &accept_uri,
        Some(&midman),
        Some(json!({ "counterparty": "bob" })),
    )
    .await;
    assert_eq!(status, StatusCode::CONFLICT);

    for token in [&requester, &bob] {
        let (_, list) = call(&app, Method::GET, "/notifications", Some(token), None).await;
        assert_eq!(list[0]["type"], "tradeRoomReady");
        assert_eq!(list[0]["link"], format!("midman.html?roomId={}", room_id));
    }

    // Chat in the room; only the broker may remove someone else's message
    let messages_uri = format!("/rooms/{}/messages", room_id);
    let (status, msg) = call(
        &app,
        Method::POST,
        &messages_uri,
        Some(&requester),
        Some(json!({ "text": "Ready when you are" })),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    let message_uri = format!("/messages/{}", msg["id"].as_str().unwrap());

    let (status, _) = call(&app, Method::DELETE, &message_uri, Some(&bob), None).await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    let (status, _) = call(&app, Method::DELETE, &message_uri, Some(&midman), None).await;
    assert_eq!(status, StatusCode::NO_CONTENT);

    // Kick bob
    let (status, room) = call(
        &app,
        Method::POST,
        &format!("/rooms/{}/kick", room_id),
        Some(&midman),
        Some(json!({ "trader_id": bob_id })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    let traders: Vec<&str> = room["traders"]
        .as_array()
        .unwrap()
        .iter()
        .map(|t| t["uid"].as_str().unwrap())
        .collect();
    assert_eq!(traders, vec![requester_id.as_str()]);

    let (status, _) = call(&app, Method::GET, &messages_uri, Some(&bob), None).await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    // Only the broker closes
    let room_uri = format!("/rooms/{}", room_id);
    let (status, _) = call(&app, Method::DELETE, &room_uri, Some(&requester), None).await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    let (status, _) = call(&app, Method::DELETE, &room_uri, Some(&midman), None).await;
    assert_eq!(status, StatusCode::NO_CONTENT);
    let (status, _) = call(&app, Method::GET, &room_uri, Some(&midman), None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn friends_can_chat_strangers_cannot() {
    let (app, _) = app();
    let (alice_id, alice) = register(&app, "alice").await;
    let (bob_id, bob) = register(&app, "bob").await;

    let chat_uri = format!("/chats/{}/messages", bob_id);
    let (status, _) = call(
        &app,
        Method::POST,
        &chat_uri,
        Some(&alice),
        Some(json!({ "text": "hi" })),
    )
    .await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let (status, _) = call(
        &app,
        Method::POST,
        "/friends/requests",
        Some(&alice),
        Some(json!({ "identifier": "bob@example.com" })),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);

    let (_, pending) = call(&app, Method::GET, "/friends/requests", Some(&bob), None).await;
    assert_eq!(pending.as_array().unwrap().len(), 1);

    let (status, friend) = call(
        &app,
        Method::POST,
        &format!("/friends/requests/{}/accept", alice_id),
        Some(&bob),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(friend["username"], "alice");

    let (status, _) = call(
        &app,
        Method::POST,
        &chat_uri,
        Some(&alice),
        Some(json!({ "text": "hi" })),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);

    // Bob reads the same conversation from his side
    let (_, messages) = call(
        &app,
        Method::GET,
        &format!("/chats/{}/messages", alice_id),
        Some(&bob),
        None,
    )
    .await;
    assert_eq!(messages.as_array().unwrap().len(), 1);
    assert_eq!(messages[0]["sender_name"], "alice");

    let (_, profile) = call(
        &app,
        Method::GET,
        &format!("/users/{}/profile", alice_id),
        Some(&bob),
        None,
    )
    .await;
    assert_eq!(profile["is_friend"], true);
    assert_eq!(profile["is_self"], false);
}

#[tokio::test]
async fn queue_snapshots_carry_increasing_versions() {
    let (app, state) = app();
    let (_, alice) = register(&app, "alice").await;
    let (_, bob) = register(&app, "bob").await;
    let mut rx = state.dispatcher.subscribe();

    let (_, before) = call(&app, Method::GET, "/queue", Some(&alice), None).await;
    let start = before["version"].as_u64().unwrap();

    let (_, entry) = call(&app, Method::POST, "/queue", Some(&alice), Some(json!({}))).await;
    call(&app, Method::POST, "/queue", Some(&bob), Some(json!({}))).await;
    let cancel_uri = format!("/queue/{}/cancel", entry["id"].as_str().unwrap());
    let (status, _) = call(&app, Method::POST, &cancel_uri, Some(&alice), None).await;
    assert_eq!(status, StatusCode::OK);

    let mut versions = Vec::new();
    while let Ok(event) = rx.try_recv() {
        if let GatewayEvent::QueueSnapshot { version, entries } = event {
            versions.push((version, entries.len()));
        }
    }
    assert_eq!(versions.len(), 3);
    assert!(versions[0].0 > start);
    assert!(versions.windows(2).all(|w| w[0].0 < w[1].0));
    assert_eq!(versions.last().map(|v| v.1), Some(1));

    let (_, after) = call(&app, Method::GET, "/queue", Some(&bob), None).await;
    assert_eq!(after["version"].as_u64(), Some(versions[2].0));
    assert_eq!(after["entries"].as_array().unwrap().len(), 1);
}

#[tokio::test]
async fn renamed_user_is_known_by_the_new_name() {
    let (app, state) = app();
    let (_, token) = register(&app, "oldname").await;

    let (status, _) = call(
        &app,
        Method::PUT,
        "/me/username",
        Some(&token),
        Some(json!({ "username": "newname" })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);

    let claims = verify_token(&state, &token).await.unwrap();
    assert_eq!(claims.username, "newname");
}
