//! Background loops: the daily final-payment reminder and the pending
//! payment poll. Each runs in its own task so a slow gateway cannot delay
//! the reminder clock.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, FixedOffset, NaiveDate, Timelike};
use sqlx::SqlitePool;

use crate::booking;
use crate::calendar::msk_now;
use crate::error::CoreError;
use crate::gateway::Gateway;
use crate::mirror::Mirror;
use crate::models::PaymentStatus;
use crate::notify::Notifier;
use crate::reconcile::Reconciler;
use crate::AppState;

const REMINDER_TICK: Duration = Duration::from_secs(60);
const POLL_INTERVAL: Duration = Duration::from_secs(120);

pub fn spawn_reminder_loop(state: Arc<AppState>) {
    tokio::spawn(async move {
        let mut last_fired: Option<NaiveDate> = None;
        loop {
            tokio::time::sleep(REMINDER_TICK).await;
            let now = msk_now();
            if !reminder_due(now, last_fired, state.cfg.reminder_hour) {
                continue;
            }
            let today = now.date_naive();
            last_fired = Some(today);
            match send_final_reminders(&state.pool, &state.notifier, today).await {
                Ok(0) => {}
                Ok(n) => tracing::info!("Sent {} final-payment reminders for {}", n, today),
                Err(e) => tracing::error!("Reminder pass failed: {}", e),
            }
        }
    });
}

pub fn spawn_payment_poll(state: Arc<AppState>) {
    tokio::spawn(async move {
        loop {
            tokio::time::sleep(POLL_INTERVAL).await;
            match poll_pending_payments(&state.pool, &state.gateway, &state.mirror, &state.notifier)
                .await
            {
                Ok(0) => {}
                Ok(n) => tracing::debug!("Polled {} pending payments", n),
                Err(e) => tracing::error!("Payment poll failed: {}", e),
            }
        }
    });
}

fn reminder_due(now: DateTime<FixedOffset>, last_fired: Option<NaiveDate>, hour: u32) -> bool {
    now.hour() == hour && last_fired != Some(now.date_naive())
}

/// Remind every client whose booking happens today and still owes the final
/// payment. Returns how many reminders went out.
pub async fn send_final_reminders(
    pool: &SqlitePool,
    notifier: &Notifier,
    today: NaiveDate,
) -> Result<usize, CoreError> {
    let due = booking::today_unfinalized(pool, today).await?;
    for b in &due {
        notifier
            .send_user(
                b.user_id,
                &format!(
                    "⏰ Напоминание: сегодня ({}) день вашего проекта.\n\
                     Пожалуйста, внесите финальную оплату, чтобы получить материалы.",
                    today.format("%d.%m.%Y")
                ),
            )
            .await;
    }
    Ok(due.len())
}

/// Query the gateway for every pending intent and feed each answer into
/// reconciliation. One bad payment must not stall the rest of the batch.
pub async fn poll_pending_payments(
    pool: &SqlitePool,
    gateway: &Gateway,
    mirror: &Mirror,
    notifier: &Notifier,
) -> Result<usize, CoreError> {
    let pending: Vec<String> =
        sqlx::query_scalar("SELECT payment_id FROM payments WHERE status = ?")
            .bind(PaymentStatus::Pending)
            .fetch_all(pool)
            .await?;

    let reconciler = Reconciler {
        pool,
        mirror,
        notifier,
    };
    let mut processed = 0;
    for payment_id in &pending {
        let status = match gateway.query_status(payment_id).await {
            Ok(s) => s,
            Err(e) => {
                tracing::warn!("Status query failed for {}: {}", payment_id, e);
                continue;
            }
        };
        if let Err(e) = reconciler.reconcile(payment_id, status).await {
            tracing::warn!("Reconcile failed for {}: {}", payment_id, e);
            continue;
        }
        processed += 1;
    }
    Ok(processed)
}

// ── Tests ──
