pub mod admin;
pub mod client;
pub mod health;
pub mod webhook;

use axum::{
    http::{header, HeaderMap, StatusCode},
    Json,
};

use crate::error::CoreError;
use crate::models::{ApiResponse, TelegramUser};

/// Error half of every handler's return type.
pub type ApiError = (StatusCode, Json<ApiResponse<()>>);

/// Map a core error onto the HTTP envelope. Internal failures are logged
/// here so handlers don't have to.
pub fn core_err(e: CoreError) -> ApiError {
    if e.status_code().is_server_error() {
        tracing::error!("Request failed: {}", e);
    }
    (e.status_code(), Json(ApiResponse::error(e.user_message())))
}

fn unauthorized(msg: &str) -> ApiError {
    (StatusCode::UNAUTHORIZED, Json(ApiResponse::error(msg)))
}

/// Authenticated Telegram user from the `Authorization: tma <initData>`
/// header.
pub fn extract_user(headers: &HeaderMap, bot_token: &str) -> Result<TelegramUser, ApiError> {
    let auth_header = headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .ok_or_else(|| unauthorized("Missing Authorization header"))?;
    crate::auth::extract_user_from_header(auth_header, bot_token)
        .ok_or_else(|| unauthorized("Invalid Telegram auth"))
}

/// Same as [`extract_user`], but the caller must be the operator.
pub fn extract_admin(
    headers: &HeaderMap,
    bot_token: &str,
    admin_tg_id: i64,
) -> Result<TelegramUser, ApiError> {
    let user = extract_user(headers, bot_token)?;
    if !crate::auth::is_admin(&user, admin_tg_id) {
        return Err((
            StatusCode::FORBIDDEN,
            Json(ApiResponse::error("Admin access required")),
        ));
    }
    Ok(user)
}
