use axum::{
    extract::{Request, State},
    middleware::Next,
    response::Response,
};
use axum_extra::headers::{Authorization, HeaderMapExt, authorization::Bearer};

use crate::AppState;
use crate::auth::verify_token;
use crate::error::{ApiError, ApiResult};

/// Extract and validate the JWT from the Authorization header, then make the
/// claims available to handlers as an `Extension<Claims>`.
pub async fn require_auth(
    State(state): State<AppState>,
    mut req: Request,
    next: Next,
) -> ApiResult<Response> {
    let bearer = req
        .headers()
        .typed_get::<Authorization<Bearer>>()
        .ok_or(ApiError::Unauthorized)?;

    let claims = verify_token(&state, bearer.token()).await?;

    req.extensions_mut().insert(claims);
    Ok(next.run(req).await)
}
