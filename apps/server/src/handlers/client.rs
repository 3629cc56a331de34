use axum::{
    extract::State,
    http::HeaderMap,
    Json,
};
use std::sync::Arc;

use super::{core_err, extract_user, ApiError};
use crate::calendar::msk_today;
use crate::models::*;
use crate::{availability, booking, AppState};

/// GET /api/dates — offerable dates grouped by month.
pub async fn list_dates(
    State(state): State<Arc<AppState>>,
) -> Result<Json<ApiResponse<Vec<MonthDates>>>, ApiError> {
    let dates = availability::list_offerable_dates(&state.pool, &state.mirror, msk_today())
        .await
        .map_err(core_err)?;
    Ok(Json(ApiResponse::success(availability::group_by_month(
        &dates,
    ))))
}

/// POST /api/bookings — reserve a date; answers with the deposit payment link.
pub async fn reserve(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(req): Json<ReserveRequest>,
) -> Result<Json<ApiResponse<ReserveResponse>>, ApiError> {
    let user = extract_user(&headers, &state.cfg.bot_token)?;
    let (booking, payment_url) = booking::reserve(
        &state.pool,
        &state.gateway,
        &state.mirror,
        &state.cfg,
        &user,
        req.date,
        msk_today(),
    )
    .await
    .map_err(core_err)?;

    Ok(Json(ApiResponse::success(ReserveResponse {
        booking,
        payment_url,
        deposit_amount: state.cfg.deposit_amount,
    })))
}

/// DELETE /api/bookings/current — withdraw an unpaid reservation.
pub async fn cancel_current(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
) -> Result<Json<ApiResponse<Booking>>, ApiError> {
    let user = extract_user(&headers, &state.cfg.bot_token)?;
    let cancelled = booking::cancel_tentative(&state.pool, user.id)
        .await
        .map_err(core_err)?;
    Ok(Json(ApiResponse::success(cancelled)))
}

/// POST /api/bookings/final-payment — payment link for the remaining balance.
pub async fn request_final_payment(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
) -> Result<Json<ApiResponse<FinalPaymentResponse>>, ApiError> {
    let user = extract_user(&headers, &state.cfg.bot_token)?;
    let (booking_date, payment_url) =
        booking::request_final_payment(&state.pool, &state.gateway, &state.cfg, user.id)
            .await
            .map_err(core_err)?;

    Ok(Json(ApiResponse::success(FinalPaymentResponse {
        booking_date,
        payment_url,
        amount: state.cfg.final_amount,
    })))
}

/// GET /api/bookings/my — the caller's bookings, newest first.
pub async fn my_bookings(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
) -> Result<Json<ApiResponse<Vec<Booking>>>, ApiError> {
    let user = extract_user(&headers, &state.cfg.bot_token)?;
    let bookings = booking::list_user_bookings(&state.pool, user.id)
        .await
        .map_err(core_err)?;
    Ok(Json(ApiResponse::success(bookings)))
}

/// POST /api/brief/complete — the client finished the project brief.
pub async fn complete_brief(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
) -> Result<Json<ApiResponse<()>>, ApiError> {
    let user = extract_user(&headers, &state.cfg.bot_token)?;
    booking::mark_brief_completed(&state.pool, user.id)
        .await
        .map_err(core_err)?;
    state
        .notifier
        .send_operator(&format!("📝 Бриф заполнен: {}", user.display_name()))
        .await;
    Ok(Json(ApiResponse::success(())))
}
