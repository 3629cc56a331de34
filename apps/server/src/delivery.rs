//! Staged delivery of finished work. The project is handed over in a fixed
//! number of parts; the last part closes the booking out.

use sqlx::SqlitePool;

use crate::error::CoreError;
use crate::mirror::{Mirror, MirrorStatus};
use crate::models::{Booking, BookingStatus};
use crate::notify::Notifier;

pub const DELIVERY_PARTS_TOTAL: i64 = 4;

/// Deliver the next part of the project for a booking. Only a fully paid
/// booking is eligible; the fourth part completes the booking.
/// Returns the part number just delivered.
pub async fn record_delivery_part(
    pool: &SqlitePool,
    mirror: &Mirror,
    notifier: &Notifier,
    booking_id: i64,
    message: &str,
) -> Result<i64, CoreError> {
    let mut tx = pool.begin().await?;

    let booking = sqlx::query_as::<_, Booking>(
        "SELECT id, user_id, username, display_name, booking_date, status, deposit_paid,
                final_paid, brief_completed, delivered_parts, created_at
         FROM bookings WHERE id = ?",
    )
    .bind(booking_id)
    .fetch_optional(&mut *tx)
    .await?
    .ok_or(CoreError::BookingNotFound)?;

    if booking.status == BookingStatus::Completed || booking.delivered_parts >= DELIVERY_PARTS_TOTAL
    {
        return Err(CoreError::AlreadyCompleted);
    }
    if booking.status != BookingStatus::Finalized {
        return Err(CoreError::FinalPaymentRequired);
    }

    let part = booking.delivered_parts + 1;
    let completes = part == DELIVERY_PARTS_TOTAL;

    // Conditional on the part count we read, so two interleaved calls can
    // never both record the same part.
    let claimed = if completes {
        sqlx::query(
            "UPDATE bookings SET delivered_parts = ?, status = ?
             WHERE id = ? AND delivered_parts = ?",
        )
        .bind(part)
        .bind(BookingStatus::Completed)
        .bind(booking.id)
        .bind(booking.delivered_parts)
        .execute(&mut *tx)
        .await?
        .rows_affected()
    } else {
        sqlx::query("UPDATE bookings SET delivered_parts = ? WHERE id = ? AND delivered_parts = ?")
            .bind(part)
            .bind(booking.id)
            .bind(booking.delivered_parts)
            .execute(&mut *tx)
            .await?
            .rows_affected()
    };
    if claimed == 0 {
        tx.rollback().await?;
        return Err(CoreError::AlreadyCompleted);
    }
    tx.commit().await?;

    tracing::info!(
        "Delivered part {}/{} to user {} (booking {})",
        part,
        DELIVERY_PARTS_TOTAL,
        booking.user_id,
        booking.id
    );

    notifier
        .send_user(
            booking.user_id,
            &format!(
                "📦 Часть {}/{} вашего проекта готова!\n\n{}",
                part, DELIVERY_PARTS_TOTAL, message
            ),
        )
        .await;

    if completes {
        if let Err(e) = mirror
            .update_status_cell(booking.user_id, booking.booking_date, MirrorStatus::Completed)
            .await
        {
            tracing::warn!("Mirror status update failed for booking {}: {}", booking.id, e);
        }
        notifier
            .send_user(
                booking.user_id,
                "🎉 Проект полностью передан! Спасибо, что выбрали нас.",
            )
            .await;
        notifier
            .send_operator(&format!(
                "✅ Проект завершён: {} ({}).",
                booking.display_name,
                booking.booking_date.format("%d.%m.%Y")
            ))
            .await;
    }

    Ok(part)
}

// ── Tests ──

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mirror::memory::MemoryMirror;
    use crate::notify::recording::RecordingNotifier;
    use crate::testutil;

    #[tokio::test]
    async fn delivery_requires_full_payment() {
        let pool = testutil::pool().await;
        let d = testutil::date("2025-03-03");
        let id = testutil::insert_booking(&pool, 10, d, BookingStatus::DepositConfirmed).await;
        let notifier = Notifier::Recording(RecordingNotifier::default());

        let err = record_delivery_part(&pool, &Mirror::Disabled, &notifier, id, "часть 1")
            .await
            .unwrap_err();
        assert!(matches!(err, CoreError::FinalPaymentRequired));
    }

    #[tokio::test]
    async fn fourth_part_completes_the_booking() {
        let pool = testutil::pool().await;
        let d = testutil::date("2025-03-03");
        let id = testutil::insert_booking(&pool, 10, d, BookingStatus::Finalized).await;
        let mirror = Mirror::Memory(MemoryMirror::default());
        let notifier = Notifier::Recording(RecordingNotifier::default());

        for expected in 1..=3 {
            let part = record_delivery_part(&pool, &mirror, &notifier, id, "материалы")
                .await
                .unwrap();
            assert_eq!(part, expected);
        }
        let status: BookingStatus =
            sqlx::query_scalar("SELECT status FROM bookings WHERE user_id = 10")
                .fetch_one(&pool)
                .await
                .unwrap();
        assert_eq!(status, BookingStatus::Finalized);

        let part = record_delivery_part(&pool, &mirror, &notifier, id, "финал")
            .await
            .unwrap();
        assert_eq!(part, DELIVERY_PARTS_TOTAL);

        let (status, parts): (BookingStatus, i64) =
            sqlx::query_as("SELECT status, delivered_parts FROM bookings WHERE user_id = 10")
                .fetch_one(&pool)
                .await
                .unwrap();
        assert_eq!(status, BookingStatus::Completed);
        assert_eq!(parts, DELIVERY_PARTS_TOTAL);

        let memory = match &mirror {
            Mirror::Memory(m) => m,
            _ => unreachable!(),
        };
        assert_eq!(
            memory.status_updates(),
            vec![(10, d, MirrorStatus::Completed)]
        );
    }

    #[tokio::test]
    async fn interleaved_deliveries_never_repeat_a_part() {
        let pool = testutil::pool().await;
        let d = testutil::date("2025-03-03");
        let id = testutil::insert_booking(&pool, 10, d, BookingStatus::Finalized).await;
        let notifier = Notifier::Recording(RecordingNotifier::default());

        let (a, b) = tokio::join!(
            record_delivery_part(&pool, &Mirror::Disabled, &notifier, id, "часть"),
            record_delivery_part(&pool, &Mirror::Disabled, &notifier, id, "часть"),
        );
        let mut parts = vec![a.unwrap(), b.unwrap()];
        parts.sort();
        assert_eq!(parts, vec![1, 2]);

        let recorded: i64 =
            sqlx::query_scalar("SELECT delivered_parts FROM bookings WHERE id = ?")
                .bind(id)
                .fetch_one(&pool)
                .await
                .unwrap();
        assert_eq!(recorded, 2);
    }

    #[tokio::test]
    async fn completed_booking_refuses_further_parts() {
        let pool = testutil::pool().await;
        let d = testutil::date("2025-03-03");
        let id = testutil::insert_booking(&pool, 10, d, BookingStatus::Completed).await;
        let notifier = Notifier::Recording(RecordingNotifier::default());

        let err = record_delivery_part(&pool, &Mirror::Disabled, &notifier, id, "ещё")
            .await
            .unwrap_err();
        assert!(matches!(err, CoreError::AlreadyCompleted));
    }

    #[tokio::test]
    async fn each_part_notifies_the_client() {
        let pool = testutil::pool().await;
        let d = testutil::date("2025-03-03");
        let id = testutil::insert_booking(&pool, 10, d, BookingStatus::Finalized).await;
        let notifier = Notifier::Recording(RecordingNotifier::default());

        record_delivery_part(&pool, &Mirror::Disabled, &notifier, id, "страницы 1-3")
            .await
            .unwrap();

        let recording = match &notifier {
            Notifier::Recording(rec) => rec,
            _ => unreachable!(),
        };
        let msgs = recording.user_messages(10);
        assert_eq!(msgs.len(), 1);
        assert!(msgs[0].contains("1/4"));
        assert!(msgs[0].contains("страницы 1-3"));
    }
}
