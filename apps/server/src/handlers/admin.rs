use axum::{
    extract::{Path, Query, State},
    http::HeaderMap,
    Json,
};
use std::sync::Arc;

use super::{core_err, extract_admin, ApiError};
use crate::calendar::{self, msk_today, DEFAULT_WORK_WEEKDAYS};
use crate::error::CoreError;
use crate::models::*;
use crate::{booking, delivery, AppState};

/// GET /api/admin/workdays — the full calendar.
pub async fn list_workdays(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
) -> Result<Json<ApiResponse<Vec<WorkDay>>>, ApiError> {
    extract_admin(&headers, &state.cfg.bot_token, state.cfg.admin_tg_id)?;
    let days = calendar::list_work_days(&state.pool)
        .await
        .map_err(core_err)?;
    Ok(Json(ApiResponse::success(days)))
}

/// POST /api/admin/workdays — open a single date.
pub async fn add_workday(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(req): Json<AddWorkDayRequest>,
) -> Result<Json<ApiResponse<bool>>, ApiError> {
    extract_admin(&headers, &state.cfg.bot_token, state.cfg.admin_tg_id)?;
    let added = calendar::add_work_day(&state.pool, req.date)
        .await
        .map_err(core_err)?;
    Ok(Json(ApiResponse::success(added)))
}

/// DELETE /api/admin/workdays — close a date; refused while it is held.
pub async fn remove_workday(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(req): Json<RemoveWorkDayRequest>,
) -> Result<Json<ApiResponse<()>>, ApiError> {
    extract_admin(&headers, &state.cfg.bot_token, state.cfg.admin_tg_id)?;
    calendar::remove_work_day(&state.pool, req.date)
        .await
        .map_err(core_err)?;
    Ok(Json(ApiResponse::success(())))
}

/// POST /api/admin/workdays/month — open the default weekdays of a month.
pub async fn expand_month(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(req): Json<ExpandMonthRequest>,
) -> Result<Json<ApiResponse<u32>>, ApiError> {
    extract_admin(&headers, &state.cfg.bot_token, state.cfg.admin_tg_id)?;
    let added = calendar::expand_month(
        &state.pool,
        req.year,
        req.month,
        &DEFAULT_WORK_WEEKDAYS,
        msk_today(),
    )
    .await
    .map_err(core_err)?;
    Ok(Json(ApiResponse::success(added)))
}

/// GET /api/admin/bookings?date=&status= — the operator's day view.
pub async fn list_bookings(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Query(query): Query<BookingsQuery>,
) -> Result<Json<ApiResponse<Vec<Booking>>>, ApiError> {
    extract_admin(&headers, &state.cfg.bot_token, state.cfg.admin_tg_id)?;
    let bookings = booking::list_bookings(&state.pool, query.date, query.status)
        .await
        .map_err(core_err)?;
    Ok(Json(ApiResponse::success(bookings)))
}

/// POST /api/admin/bookings/{id}/delivery — hand the next part to the client.
pub async fn deliver_part(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(booking_id): Path<i64>,
    Json(req): Json<DeliveryRequest>,
) -> Result<Json<ApiResponse<i64>>, ApiError> {
    extract_admin(&headers, &state.cfg.bot_token, state.cfg.admin_tg_id)?;
    let part = delivery::record_delivery_part(
        &state.pool,
        &state.mirror,
        &state.notifier,
        booking_id,
        &req.message,
    )
    .await
    .map_err(core_err)?;
    Ok(Json(ApiResponse::success(part)))
}

/// POST /api/admin/payments/{payment_id}/refund — operator-triggered refund.
///
/// Refunds the intent's full amount unless a partial amount is given. The
/// payment is closed as refunded; the booking lifecycle is not reverted —
/// what to do with the date stays an operator decision.
pub async fn refund_payment(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(payment_id): Path<String>,
    Json(req): Json<RefundRequest>,
) -> Result<Json<ApiResponse<()>>, ApiError> {
    extract_admin(&headers, &state.cfg.bot_token, state.cfg.admin_tg_id)?;

    let intent = sqlx::query_as::<_, PaymentIntent>(
        "SELECT id, payment_id, user_id, kind, amount, status, booking_date, created_at
         FROM payments WHERE payment_id = ?",
    )
    .bind(&payment_id)
    .fetch_optional(&state.pool)
    .await
    .map_err(|e| core_err(CoreError::Db(e)))?
    .ok_or_else(|| core_err(CoreError::PaymentNotFound))?;

    let amount = req.amount.unwrap_or(intent.amount);
    state
        .gateway
        .create_refund(&payment_id, amount)
        .await
        .map_err(core_err)?;

    sqlx::query("UPDATE payments SET status = ? WHERE payment_id = ?")
        .bind(PaymentStatus::Refunded)
        .bind(&payment_id)
        .execute(&state.pool)
        .await
        .map_err(|e| core_err(CoreError::Db(e)))?;

    tracing::info!("Refunded {} RUB on payment {}", amount, payment_id);
    Ok(Json(ApiResponse::success(())))
}
