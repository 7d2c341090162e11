use argon2::{
    Argon2, PasswordHash, PasswordHasher, PasswordVerifier,
    password_hash::{SaltString, rand_core::OsRng},
};
use axum::{Extension, Json, extract::State, http::StatusCode, response::IntoResponse};
use jsonwebtoken::{DecodingKey, EncodingKey, Header, Validation, decode, encode};
use tracing::{info, warn};
use uuid::Uuid;

use tradehall_db::StoreError;
use tradehall_types::api::{
    AuthResponse, ChangePasswordRequest, Claims, LoginRequest, RegisterRequest,
};

use crate::error::{ApiError, ApiResult};
use crate::{AppState, blocking};

const MIN_PASSWORD_LEN: usize = 8;

pub async fn register(
    State(state): State<AppState>,
    Json(req): Json<RegisterRequest>,
) -> ApiResult<impl IntoResponse> {
    if req.password != req.confirm_password {
        return Err(ApiError::BadRequest("passwords do not match".into()));
    }
    check_password_strength(&req.password)?;

    let user_id = Uuid::new_v4();
    let user = blocking(&state, move |db| {
        let password_hash = hash_password(&req.password)?;
        db.create_user(user_id, &req.email, &req.username, &password_hash)
    })
    .await?;

    info!("Registered {} ({})", user.username, user.id);

    let token = create_token(&state, user.id, &user.username, 0)?;
    Ok((
        StatusCode::CREATED,
        Json(AuthResponse {
            user_id: user.id,
            username: user.username,
            token,
        }),
    ))
}

pub async fn login(
    State(state): State<AppState>,
    Json(req): Json<LoginRequest>,
) -> ApiResult<Json<AuthResponse>> {
    // Unknown e-mail and wrong password look the same to the caller
    let creds = blocking(&state, move |db| {
        let Some(creds) = db.get_credentials_by_email(&req.email)? else {
            return Ok(None);
        };
        Ok(verify_password(&req.password, &creds.password_hash).then_some(creds))
    })
    .await?
    .ok_or(ApiError::Unauthorized)?;

    let token = create_token(&state, creds.user.id, &creds.user.username, creds.token_version)?;
    Ok(Json(AuthResponse {
        user_id: creds.user.id,
        username: creds.user.username,
        token,
    }))
}

/// Revokes every token issued to the caller, including the current one.
pub async fn logout(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
) -> ApiResult<StatusCode> {
    let uid = claims.sub;
    blocking(&state, move |db| db.bump_token_version(uid)).await?;
    info!("{} logged out", claims.username);
    Ok(StatusCode::NO_CONTENT)
}

pub async fn session(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
) -> ApiResult<impl IntoResponse> {
    let uid = claims.sub;
    let user = blocking(&state, move |db| {
        db.get_user(uid)?.ok_or(StoreError::NotFound("user"))
    })
    .await?;
    Ok(Json(user))
}

/// Re-authenticates with the current password, stores the new one and
/// hands back a fresh token. Older tokens stop working.
pub async fn change_password(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Json(req): Json<ChangePasswordRequest>,
) -> ApiResult<Json<AuthResponse>> {
    if req.new_password != req.confirm_password {
        return Err(ApiError::BadRequest("passwords do not match".into()));
    }
    check_password_strength(&req.new_password)?;

    let uid = claims.sub;
    let changed = blocking(&state, move |db| {
        let creds = db.get_credentials(uid)?.ok_or(StoreError::NotFound("user"))?;
        if !verify_password(&req.current_password, &creds.password_hash) {
            return Ok(None);
        }
        let password_hash = hash_password(&req.new_password)?;
        let version = db.update_password(uid, &password_hash)?;
        Ok(Some((creds.user, version)))
    })
    .await?;

    let Some((user, version)) = changed else {
        warn!("{} failed password re-authentication", claims.username);
        return Err(ApiError::Unauthorized);
    };

    info!("{} changed their password", user.username);
    let token = create_token(&state, user.id, &user.username, version)?;
    Ok(Json(AuthResponse {
        user_id: user.id,
        username: user.username,
        token,
    }))
}

fn check_password_strength(password: &str) -> ApiResult<()> {
    if password.chars().count() < MIN_PASSWORD_LEN {
        return Err(ApiError::BadRequest(format!(
            "password must be at least {} characters",
            MIN_PASSWORD_LEN
        )));
    }
    Ok(())
}

/// Argon2id with a fresh salt.
fn hash_password(password: &str) -> Result<String, StoreError> {
    let salt = SaltString::generate(&mut OsRng);
    Argon2::default()
        .hash_password(password.as_bytes(), &salt)
        .map(|hash| hash.to_string())
        .map_err(|e| StoreError::Internal(anyhow::anyhow!("password hashing failed: {}", e)))
}

fn verify_password(password: &str, hash: &str) -> bool {
    PasswordHash::new(hash)
        .map(|parsed| {
            Argon2::default()
                .verify_password(password.as_bytes(), &parsed)
                .is_ok()
        })
        .unwrap_or(false)
}

pub fn create_token(
    state: &AppState,
    user_id: Uuid,
    username: &str,
    version: i64,
) -> anyhow::Result<String> {
    let claims = Claims {
        sub: user_id,
        username: username.to_string(),
        ver: version,
        exp: (chrono::Utc::now() + chrono::Duration::days(state.token_ttl_days)).timestamp()
            as usize,
    };

    let token = encode(
        &Header::default(),
        &claims,
        &EncodingKey::from_secret(state.jwt_secret.as_bytes()),
    )?;

    Ok(token)
}

/// Checks signature and expiry, then that the token has not been revoked.
pub async fn verify_token(state: &AppState, token: &str) -> ApiResult<Claims> {
    let claims = decode::<Claims>(
        token,
        &DecodingKey::from_secret(state.jwt_secret.as_bytes()),
        &Validation::default(),
    )
    .map_err(|_| ApiError::Unauthorized)?
    .claims;

    let uid = claims.sub;
    let (version, username) = blocking(state, move |db| db.token_identity(uid))
        .await?
        .ok_or(ApiError::Unauthorized)?;
    if version != claims.ver {
        return Err(ApiError::Unauthorized);
    }

    // The name baked into the token goes stale after a rename
    Ok(Claims { username, ..claims })
}
