use axum::{extract::State, http::StatusCode, Json};
use std::sync::Arc;

use crate::gateway::WebhookEvent;
use crate::reconcile::{ReconcileOutcome, Reconciler};
use crate::AppState;

/// POST /api/payments/webhook — gateway status notification.
///
/// Always answers 200 so the gateway stops retrying; reconciliation is
/// idempotent, so a retry after a 500 (local store failure) is safe too.
pub async fn payment_webhook(
    State(state): State<Arc<AppState>>,
    Json(event): Json<WebhookEvent>,
) -> StatusCode {
    tracing::info!(
        "Gateway webhook: event={}, payment_id={}, status={}",
        event.event,
        event.object.id,
        event.object.status
    );

    let reconciler = Reconciler {
        pool: &state.pool,
        mirror: &state.mirror,
        notifier: &state.notifier,
    };
    match reconciler
        .reconcile(&event.object.id, event.reported_status())
        .await
    {
        Ok(outcome) => {
            if outcome == ReconcileOutcome::Deferred {
                tracing::info!("Webhook for {} deferred; poll will retry", event.object.id);
            }
            StatusCode::OK
        }
        Err(e) => {
            tracing::error!("Webhook reconcile failed for {}: {}", event.object.id, e);
            StatusCode::INTERNAL_SERVER_ERROR
        }
    }
}
