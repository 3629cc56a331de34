//! Shared test fixtures: in-memory databases with real migrations applied,
//! plus small builders for the rows most tests need.

use chrono::NaiveDate;
use sqlx::sqlite::SqlitePoolOptions;
use sqlx::SqlitePool;

use crate::db;
use crate::models::{BookingStatus, TelegramUser};
use crate::AppConfig;

/// Fresh in-memory database with the full schema.
pub async fn pool() -> SqlitePool {
    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .connect("sqlite::memory:")
        .await
        .unwrap();
    db::run_migrations(&pool).await.unwrap();
    pool
}

pub fn date(s: &str) -> NaiveDate {
    s.parse().unwrap()
}

pub fn cfg() -> AppConfig {
    AppConfig {
        bot_token: "test:token".into(),
        admin_tg_id: 1,
        deposit_amount: 4000,
        final_amount: 11000,
        reminder_hour: 12,
    }
}

pub fn user(id: i64) -> TelegramUser {
    TelegramUser {
        id,
        first_name: format!("User{}", id),
        last_name: None,
        username: Some(format!("user{}", id)),
    }
}

/// Insert a booking row directly, bypassing the reserve flow.
/// Returns the booking id.
pub async fn insert_booking(
    pool: &SqlitePool,
    user_id: i64,
    booking_date: NaiveDate,
    status: BookingStatus,
) -> i64 {
    sqlx::query(
        "INSERT INTO bookings (user_id, username, display_name, booking_date, status, created_at)
         VALUES (?, ?, ?, ?, ?, '2025-03-01 10:00:00')",
    )
    .bind(user_id)
    .bind(format!("user{}", user_id))
    .bind(format!("User{}", user_id))
    .bind(booking_date)
    .bind(status)
    .execute(pool)
    .await
    .unwrap()
    .last_insert_rowid()
}
