//! Availability projector: merges the work-day calendar, the booking ledger
//! and the spreadsheet mirror into the set of dates a new client may book.
//!
//! Pure read — no side effects. The mirror is consulted defensively (it may
//! know of confirmed bookings the local store lost track of) but its outage
//! degrades to local-only projection and never fails the call.

use chrono::{Datelike, NaiveDate};
use sqlx::SqlitePool;

use crate::error::CoreError;
use crate::mirror::Mirror;
use crate::models::{BookingStatus, MonthDates};

/// Offerable dates, ascending. A date qualifies when it is an open work day
/// on or after `today`, no local booking holds it, and the mirror does not
/// list it as confirmed.
pub async fn list_offerable_dates(
    pool: &SqlitePool,
    mirror: &Mirror,
    today: NaiveDate,
) -> Result<Vec<NaiveDate>, CoreError> {
    let work_days: Vec<NaiveDate> = sqlx::query_scalar(
        "SELECT work_date FROM work_days
         WHERE is_available = 1 AND work_date >= ?
         ORDER BY work_date ASC",
    )
    .bind(today)
    .fetch_all(pool)
    .await?;

    let held: Vec<NaiveDate> = sqlx::query_scalar(
        "SELECT DISTINCT booking_date FROM bookings WHERE status IN (?, ?, ?)",
    )
    .bind(BookingStatus::DATE_HOLDING[0])
    .bind(BookingStatus::DATE_HOLDING[1])
    .bind(BookingStatus::DATE_HOLDING[2])
    .fetch_all(pool)
    .await?;

    let mirror_confirmed = match mirror.list_confirmed_dates().await {
        Ok(dates) => dates,
        Err(e) => {
            tracing::warn!("Mirror read failed, projecting from local data only: {}", e);
            Vec::new()
        }
    };

    let mut offerable: Vec<NaiveDate> = work_days
        .into_iter()
        .filter(|d| !held.contains(d) && !mirror_confirmed.contains(d))
        .collect();
    offerable.dedup();
    Ok(offerable)
}

/// The same predicate for a single date. Re-evaluated at reservation time to
/// close the race between listing the calendar and picking a day.
pub async fn is_date_offerable(
    pool: &SqlitePool,
    mirror: &Mirror,
    date: NaiveDate,
    today: NaiveDate,
) -> Result<bool, CoreError> {
    if date < today || !crate::calendar::is_work_day(pool, date).await? {
        return Ok(false);
    }

    let held: bool = sqlx::query_scalar(
        "SELECT COUNT(*) > 0 FROM bookings WHERE booking_date = ? AND status IN (?, ?, ?)",
    )
    .bind(date)
    .bind(BookingStatus::DATE_HOLDING[0])
    .bind(BookingStatus::DATE_HOLDING[1])
    .bind(BookingStatus::DATE_HOLDING[2])
    .fetch_one(pool)
    .await?;
    if held {
        return Ok(false);
    }

    match mirror.list_confirmed_dates().await {
        Ok(dates) if dates.contains(&date) => Ok(false),
        Ok(_) => Ok(true),
        Err(e) => {
            tracing::warn!("Mirror read failed, trusting local data: {}", e);
            Ok(true)
        }
    }
}

/// Group an ascending date list by calendar month for menu rendering.
pub fn group_by_month(dates: &[NaiveDate]) -> Vec<MonthDates> {
    let mut months: Vec<MonthDates> = Vec::new();
    for &date in dates {
        let key = format!("{:04}-{:02}", date.year(), date.month());
        match months.last_mut() {
            Some(m) if m.month == key => m.dates.push(date),
            _ => months.push(MonthDates {
                month: key,
                dates: vec![date],
            }),
        }
    }
    months
}

// ── Tests ──
