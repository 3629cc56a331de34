//! Payment reconciliation: the single place a gateway status report is
//! allowed to advance a booking. Webhook deliveries and the poll loop both
//! funnel through [`Reconciler::reconcile`], so duplicate, replayed, and
//! out-of-order reports all hit the same claim logic.

use sqlx::SqlitePool;

use crate::error::CoreError;
use crate::mirror::{Mirror, MirrorStatus};
use crate::models::{Booking, BookingStatus, PaymentIntent, PaymentKind, PaymentStatus};
use crate::notify::Notifier;

/// What a single reconciliation pass decided.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReconcileOutcome {
    /// No local intent for this payment id.
    UnknownPayment,
    /// The intent is already terminal; nothing to do.
    AlreadyProcessed,
    /// Gateway still reports the payment in flight.
    StillPending,
    /// The report cannot be applied yet (final before deposit, or a
    /// conflicting paid booking on the date); the intent stays pending.
    Deferred,
    /// Deposit confirmed; the booking now holds its date.
    DepositConfirmed { user_id: i64 },
    /// Final payment landed; the booking is fully paid.
    Finalized { user_id: i64 },
    /// Gateway reported failure or cancellation; intent closed.
    MarkedFailed,
}

pub struct Reconciler<'a> {
    pub pool: &'a SqlitePool,
    pub mirror: &'a Mirror,
    pub notifier: &'a Notifier,
}

impl<'a> Reconciler<'a> {
    /// Apply one gateway status report. Safe to call any number of times
    /// with the same report: the terminal transition is claimed with a
    /// conditional UPDATE, and only the caller whose claim takes effect
    /// performs the booking transition and side effects.
    pub async fn reconcile(
        &self,
        payment_id: &str,
        reported: PaymentStatus,
    ) -> Result<ReconcileOutcome, CoreError> {
        let intent = match self.fetch_intent(payment_id).await? {
            Some(i) => i,
            None => {
                tracing::warn!("Status report for unknown payment {}", payment_id);
                return Ok(ReconcileOutcome::UnknownPayment);
            }
        };
        if intent.status.is_terminal() {
            return Ok(ReconcileOutcome::AlreadyProcessed);
        }

        match reported {
            PaymentStatus::Pending => Ok(ReconcileOutcome::StillPending),
            PaymentStatus::Succeeded => match intent.kind {
                PaymentKind::Deposit => self.confirm_deposit(&intent).await,
                PaymentKind::Final => self.finalize(&intent).await,
            },
            PaymentStatus::Failed | PaymentStatus::Canceled | PaymentStatus::Refunded => {
                self.mark_failed(&intent, reported).await
            }
        }
    }

    async fn fetch_intent(&self, payment_id: &str) -> Result<Option<PaymentIntent>, CoreError> {
        let intent = sqlx::query_as::<_, PaymentIntent>(
            "SELECT id, payment_id, user_id, kind, amount, status, booking_date, created_at
             FROM payments WHERE payment_id = ?",
        )
        .bind(payment_id)
        .fetch_optional(self.pool)
        .await?;
        Ok(intent)
    }

    async fn confirm_deposit(
        &self,
        intent: &PaymentIntent,
    ) -> Result<ReconcileOutcome, CoreError> {
        let mut tx = self.pool.begin().await?;

        let claimed = sqlx::query(
            "UPDATE payments SET status = ? WHERE payment_id = ? AND status = ?",
        )
        .bind(PaymentStatus::Succeeded)
        .bind(&intent.payment_id)
        .bind(PaymentStatus::Pending)
        .execute(&mut *tx)
        .await?
        .rows_affected();
        if claimed == 0 {
            tx.rollback().await?;
            return Ok(ReconcileOutcome::AlreadyProcessed);
        }

        let booking = sqlx::query_as::<_, Booking>(
            "SELECT id, user_id, username, display_name, booking_date, status, deposit_paid,
                    final_paid, brief_completed, delivered_parts, created_at
             FROM bookings WHERE user_id = ? AND booking_date = ? AND status = ?",
        )
        .bind(intent.user_id)
        .bind(intent.booking_date)
        .bind(BookingStatus::Tentative)
        .fetch_optional(&mut *tx)
        .await?;
        let booking = match booking {
            Some(b) => b,
            None => {
                tx.rollback().await?;
                tracing::warn!(
                    "Deposit {} succeeded but no tentative booking for user {} on {}",
                    intent.payment_id,
                    intent.user_id,
                    intent.booking_date
                );
                if self.claim_deferral_alert(&intent.payment_id).await? {
                    self.notifier
                        .send_operator(&format!(
                            "⚠️ Оплачен задаток за {}, но активного бронирования нет \
                             (возможно, клиент отменил бронь).\n\
                             Пользователь {} — требуется возврат вручную.",
                            intent.booking_date.format("%d.%m.%Y"),
                            intent.user_id
                        ))
                        .await;
                }
                return Ok(ReconcileOutcome::Deferred);
            }
        };

        // Two users can both pay a deposit for the same date before either
        // report arrives. First report in wins; the loser stays tentative
        // and the operator refunds by hand.
        let conflicts: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM bookings
             WHERE booking_date = ? AND id != ? AND status IN (?, ?, ?)",
        )
        .bind(intent.booking_date)
        .bind(booking.id)
        .bind(BookingStatus::DATE_HOLDING[0])
        .bind(BookingStatus::DATE_HOLDING[1])
        .bind(BookingStatus::DATE_HOLDING[2])
        .fetch_one(&mut *tx)
        .await?;
        if conflicts > 0 {
            tx.rollback().await?;
            tracing::error!(
                "Deposit {} succeeded but {} is already held by another booking",
                intent.payment_id,
                intent.booking_date
            );
            if self.claim_deferral_alert(&intent.payment_id).await? {
                self.notifier
                    .send_operator(&format!(
                        "⚠️ Конфликт бронирования: оплачен задаток за {}, но дата уже занята.\n\
                         Пользователь {} — требуется возврат вручную.",
                        intent.booking_date.format("%d.%m.%Y"),
                        intent.user_id
                    ))
                    .await;
            }
            return Ok(ReconcileOutcome::Deferred);
        }

        sqlx::query("UPDATE bookings SET status = ?, deposit_paid = 1 WHERE id = ?")
            .bind(BookingStatus::DepositConfirmed)
            .bind(booking.id)
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;

        tracing::info!(
            "Deposit {} confirmed: booking {} ({}) now holds its date",
            intent.payment_id,
            booking.id,
            intent.booking_date
        );
        self.notifier
            .send_user(
                intent.user_id,
                &format!(
                    "✅ Предоплата получена! Ваша дата {} забронирована.\n\n\
                     Пожалуйста, заполните бриф проекта до начала работы.",
                    intent.booking_date.format("%d.%m.%Y")
                ),
            )
            .await;
        self.notifier
            .send_operator(&format!(
                "💰 Новая бронь: {} ({}), предоплата получена.",
                booking.display_name,
                intent.booking_date.format("%d.%m.%Y")
            ))
            .await;
        self.push_mirror_status(intent, MirrorStatus::DepositReceived)
            .await;
        Ok(ReconcileOutcome::DepositConfirmed {
            user_id: intent.user_id,
        })
    }

    async fn finalize(&self, intent: &PaymentIntent) -> Result<ReconcileOutcome, CoreError> {
        let mut tx = self.pool.begin().await?;

        // The deposit must have landed first. If it hasn't, leave the
        // intent pending so a later pass can apply this report in order.
        let booking = sqlx::query_as::<_, Booking>(
            "SELECT id, user_id, username, display_name, booking_date, status, deposit_paid,
                    final_paid, brief_completed, delivered_parts, created_at
             FROM bookings WHERE user_id = ? AND booking_date = ? AND status = ?",
        )
        .bind(intent.user_id)
        .bind(intent.booking_date)
        .bind(BookingStatus::DepositConfirmed)
        .fetch_optional(&mut *tx)
        .await?;
        let booking = match booking {
            Some(b) => b,
            None => {
                tx.rollback().await?;
                tracing::warn!(
                    "Final payment {} succeeded before deposit for user {} on {}; deferring",
                    intent.payment_id,
                    intent.user_id,
                    intent.booking_date
                );
                return Ok(ReconcileOutcome::Deferred);
            }
        };

        let claimed = sqlx::query(
            "UPDATE payments SET status = ? WHERE payment_id = ? AND status = ?",
        )
        .bind(PaymentStatus::Succeeded)
        .bind(&intent.payment_id)
        .bind(PaymentStatus::Pending)
        .execute(&mut *tx)
        .await?
        .rows_affected();
        if claimed == 0 {
            tx.rollback().await?;
            return Ok(ReconcileOutcome::AlreadyProcessed);
        }

        sqlx::query("UPDATE bookings SET status = ?, final_paid = 1 WHERE id = ?")
            .bind(BookingStatus::Finalized)
            .bind(booking.id)
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;

        tracing::info!(
            "Final payment {} confirmed: booking {} fully paid",
            intent.payment_id,
            booking.id
        );
        self.notifier
            .send_user(
                intent.user_id,
                "✅ Финальная оплата получена! Спасибо — материалы проекта будут \
                 приходить по мере готовности.",
            )
            .await;
        self.notifier
            .send_operator(&format!(
                "💰 Полная оплата: {} ({}).",
                booking.display_name,
                intent.booking_date.format("%d.%m.%Y")
            ))
            .await;
        self.push_mirror_status(intent, MirrorStatus::FullyPaid).await;
        Ok(ReconcileOutcome::Finalized {
            user_id: intent.user_id,
        })
    }

    async fn mark_failed(
        &self,
        intent: &PaymentIntent,
        reported: PaymentStatus,
    ) -> Result<ReconcileOutcome, CoreError> {
        let claimed = sqlx::query(
            "UPDATE payments SET status = ? WHERE payment_id = ? AND status = ?",
        )
        .bind(reported)
        .bind(&intent.payment_id)
        .bind(PaymentStatus::Pending)
        .execute(self.pool)
        .await?
        .rows_affected();
        if claimed == 0 {
            return Ok(ReconcileOutcome::AlreadyProcessed);
        }
        tracing::info!(
            "Payment {} closed as {:?}; booking left as-is",
            intent.payment_id,
            reported
        );
        Ok(ReconcileOutcome::MarkedFailed)
    }

    /// One-shot gate for alerts about a stuck deferral. The poll loop
    /// re-reports the same stuck payment every pass until the operator
    /// refunds it, but the operator must be paged exactly once.
    async fn claim_deferral_alert(&self, payment_id: &str) -> Result<bool, CoreError> {
        let claimed = sqlx::query(
            "UPDATE payments SET deferral_alerted = 1
             WHERE payment_id = ? AND deferral_alerted = 0",
        )
        .bind(payment_id)
        .execute(self.pool)
        .await?
        .rows_affected();
        Ok(claimed > 0)
    }

    async fn push_mirror_status(&self, intent: &PaymentIntent, status: MirrorStatus) {
        if let Err(e) = self
            .mirror
            .update_status_cell(intent.user_id, intent.booking_date, status)
            .await
        {
            tracing::warn!(
                "Mirror status update failed for payment {}: {}",
                intent.payment_id,
                e
            );
        }
    }
}

// ── Tests ──
