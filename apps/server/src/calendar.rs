//! Work-day calendar: which dates the operator has opened for booking.
//!
//! The business runs on a fixed weekly cadence (Mon/Wed/Fri by default);
//! admin actions open single dates or expand a whole month over that set.

use chrono::{Datelike, FixedOffset, NaiveDate, Utc, Weekday};
use sqlx::SqlitePool;

use crate::error::CoreError;
use crate::models::{BookingStatus, WorkDay};

/// Moscow timezone offset (UTC+3) — the business timezone.
const MSK_OFFSET_SECS: i32 = 3 * 3600;

/// Default working weekdays: Monday, Wednesday, Friday.
pub const DEFAULT_WORK_WEEKDAYS: [Weekday; 3] = [Weekday::Mon, Weekday::Wed, Weekday::Fri];

/// How many months ahead the calendar is seeded on first run.
const INIT_MONTHS_AHEAD: u32 = 3;

pub fn msk_now() -> chrono::DateTime<FixedOffset> {
    let msk = FixedOffset::east_opt(MSK_OFFSET_SECS).unwrap();
    Utc::now().with_timezone(&msk)
}

pub fn msk_today() -> NaiveDate {
    msk_now().date_naive()
}

/// Open a single date for booking. Idempotent; returns true if newly added.
pub async fn add_work_day(pool: &SqlitePool, date: NaiveDate) -> Result<bool, CoreError> {
    let added = sqlx::query("INSERT OR IGNORE INTO work_days (work_date) VALUES (?)")
        .bind(date)
        .execute(pool)
        .await?
        .rows_affected();

    if added > 0 {
        tracing::info!("Work day opened: {}", date);
    }
    Ok(added > 0)
}

/// Open every matching weekday of a month. Past dates (before `today`) are
/// skipped. Returns how many dates were newly added.
pub async fn expand_month(
    pool: &SqlitePool,
    year: i32,
    month: u32,
    weekdays: &[Weekday],
    today: NaiveDate,
) -> Result<u32, CoreError> {
    let mut added = 0;
    for day in 1..=31 {
        let Some(date) = NaiveDate::from_ymd_opt(year, month, day) else {
            continue;
        };
        if date < today || !weekdays.contains(&date.weekday()) {
            continue;
        }
        if add_work_day(pool, date).await? {
            added += 1;
        }
    }
    tracing::info!("Opened {} work days for {:04}-{:02}", added, year, month);
    Ok(added)
}

/// First-run seeding: when the calendar is empty, open the default weekdays
/// for the next few months. No-op once any work day exists.
pub async fn initialize_work_days(pool: &SqlitePool, today: NaiveDate) -> Result<u32, CoreError> {
    let existing: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM work_days")
        .fetch_one(pool)
        .await?;
    if existing > 0 {
        return Ok(0);
    }

    let mut added = 0;
    let mut year = today.year();
    let mut month = today.month();
    for _ in 0..INIT_MONTHS_AHEAD {
        added += expand_month(pool, year, month, &DEFAULT_WORK_WEEKDAYS, today).await?;
        month += 1;
        if month > 12 {
            month = 1;
            year += 1;
        }
    }
    tracing::info!("Calendar seeded with {} work days", added);
    Ok(added)
}

/// Delete a work day. Refused while any booking on that date holds it
/// (deposit confirmed or finalized); completed and cancelled bookings are
/// history and do not block deletion.
pub async fn remove_work_day(pool: &SqlitePool, date: NaiveDate) -> Result<(), CoreError> {
    let holders: i64 = sqlx::query_scalar(
        "SELECT COUNT(*) FROM bookings WHERE booking_date = ? AND status IN (?, ?)",
    )
    .bind(date)
    .bind(BookingStatus::DepositConfirmed)
    .bind(BookingStatus::Finalized)
    .fetch_one(pool)
    .await?;

    if holders > 0 {
        return Err(CoreError::DateStillBooked(date));
    }

    sqlx::query("DELETE FROM work_days WHERE work_date = ?")
        .bind(date)
        .execute(pool)
        .await?;
    tracing::info!("Work day removed: {}", date);
    Ok(())
}

pub async fn list_work_days(pool: &SqlitePool) -> Result<Vec<WorkDay>, CoreError> {
    let days = sqlx::query_as::<_, WorkDay>(
        "SELECT id, work_date, is_available, created_at FROM work_days ORDER BY work_date ASC",
    )
    .fetch_all(pool)
    .await?;
    Ok(days)
}

pub async fn is_work_day(pool: &SqlitePool, date: NaiveDate) -> Result<bool, CoreError> {
    let found: bool = sqlx::query_scalar(
        "SELECT COUNT(*) > 0 FROM work_days WHERE work_date = ? AND is_available = 1",
    )
    .bind(date)
    .fetch_one(pool)
    .await?;
    Ok(found)
}

// ── Tests ──

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil;

    #[tokio::test]
    async fn add_work_day_is_idempotent() {
        let pool = testutil::pool().await;
        let d = testutil::date("2025-03-03");
        assert!(add_work_day(&pool, d).await.unwrap());
        assert!(!add_work_day(&pool, d).await.unwrap());
        assert!(is_work_day(&pool, d).await.unwrap());
    }

    #[tokio::test]
    async fn expand_month_opens_only_working_weekdays() {
        let pool = testutil::pool().await;
        // March 2025: Mondays 3,10,17,24,31; Wednesdays 5,12,19,26; Fridays 7,14,21,28.
        let today = testutil::date("2025-03-01");
        let added = expand_month(&pool, 2025, 3, &DEFAULT_WORK_WEEKDAYS, today)
            .await
            .unwrap();
        assert_eq!(added, 13);
        assert!(is_work_day(&pool, testutil::date("2025-03-03")).await.unwrap());
        assert!(!is_work_day(&pool, testutil::date("2025-03-04")).await.unwrap()); // Tuesday
    }

    #[tokio::test]
    async fn expand_month_skips_past_dates() {
        let pool = testutil::pool().await;
        let today = testutil::date("2025-03-20");
        let added = expand_month(&pool, 2025, 3, &DEFAULT_WORK_WEEKDAYS, today)
            .await
            .unwrap();
        // Remaining: 21, 24, 26, 28, 31.
        assert_eq!(added, 5);
        assert!(!is_work_day(&pool, testutil::date("2025-03-03")).await.unwrap());
    }

    #[tokio::test]
    async fn initialize_runs_only_on_empty_calendar() {
        let pool = testutil::pool().await;
        let today = testutil::date("2025-03-01");
        let first = initialize_work_days(&pool, today).await.unwrap();
        assert!(first > 0);
        let second = initialize_work_days(&pool, today).await.unwrap();
        assert_eq!(second, 0);
    }

    #[tokio::test]
    async fn remove_refused_while_date_is_held() {
        let pool = testutil::pool().await;
        let d = testutil::date("2025-03-03");
        add_work_day(&pool, d).await.unwrap();
        testutil::insert_booking(&pool, 10, d, BookingStatus::DepositConfirmed).await;

        let err = remove_work_day(&pool, d).await.unwrap_err();
        assert!(matches!(err, CoreError::DateStillBooked(_)));
        assert!(is_work_day(&pool, d).await.unwrap());
    }

    #[tokio::test]
    async fn remove_allowed_for_tentative_and_history() {
        let pool = testutil::pool().await;
        let d = testutil::date("2025-03-03");
        add_work_day(&pool, d).await.unwrap();
        testutil::insert_booking(&pool, 10, d, BookingStatus::Tentative).await;
        testutil::insert_booking(&pool, 11, d, BookingStatus::Cancelled).await;
        testutil::insert_booking(&pool, 12, d, BookingStatus::Completed).await;

        remove_work_day(&pool, d).await.unwrap();
        assert!(!is_work_day(&pool, d).await.unwrap());
    }
}
