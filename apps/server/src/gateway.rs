//! YooKassa payment gateway client: create payments, poll their status,
//! issue refunds. The gateway owns all money movement; this module only
//! talks to its HTTP API and translates its status vocabulary.

use serde::Deserialize;

use crate::error::CoreError;
use crate::models::{PaymentKind, PaymentStatus};

#[derive(Debug, Clone)]
pub struct CreatedPayment {
    pub payment_id: String,
    pub confirmation_url: String,
}

/// Metadata attached to each gateway payment so a stray webhook can still be
/// traced to its origin.
#[derive(Debug, Clone)]
pub struct PaymentMeta {
    pub user_id: i64,
    pub booking_date: chrono::NaiveDate,
    pub kind: PaymentKind,
}

pub enum Gateway {
    YooKassa(YooKassaClient),
    #[cfg(test)]
    Mock(mock::MockGateway),
}

impl Gateway {
    pub async fn create_payment(
        &self,
        amount: i64,
        description: &str,
        meta: &PaymentMeta,
    ) -> Result<CreatedPayment, CoreError> {
        match self {
            Gateway::YooKassa(c) => c.create_payment(amount, description, meta).await,
            #[cfg(test)]
            Gateway::Mock(m) => m.create_payment(),
        }
    }

    pub async fn query_status(&self, payment_id: &str) -> Result<PaymentStatus, CoreError> {
        match self {
            Gateway::YooKassa(c) => c.query_status(payment_id).await,
            #[cfg(test)]
            Gateway::Mock(m) => m.query_status(payment_id),
        }
    }

    pub async fn create_refund(&self, payment_id: &str, amount: i64) -> Result<(), CoreError> {
        match self {
            Gateway::YooKassa(c) => c.create_refund(payment_id, amount).await,
            #[cfg(test)]
            Gateway::Mock(_) => Ok(()),
        }
    }
}

/// Map the gateway's status vocabulary onto ours. `waiting_for_capture` is
/// still in flight; anything unrecognized is treated as failed.
pub fn parse_gateway_status(raw: &str) -> PaymentStatus {
    match raw {
        "pending" | "waiting_for_capture" => PaymentStatus::Pending,
        "succeeded" => PaymentStatus::Succeeded,
        "canceled" => PaymentStatus::Canceled,
        _ => PaymentStatus::Failed,
    }
}

// ── Webhook payload ──

#[derive(Debug, Deserialize)]
pub struct WebhookEvent {
    pub event: String,
    pub object: WebhookObject,
}

#[derive(Debug, Deserialize)]
pub struct WebhookObject {
    pub id: String,
    pub status: String,
}

impl WebhookEvent {
    pub fn reported_status(&self) -> PaymentStatus {
        parse_gateway_status(&self.object.status)
    }
}

// ── HTTP client ──

pub struct YooKassaClient {
    http: reqwest::Client,
    shop_id: String,
    secret_key: String,
    return_url: String,
}

impl YooKassaClient {
    pub fn new(shop_id: String, secret_key: String, return_url: String) -> Self {
        Self {
            http: reqwest::Client::new(),
            shop_id,
            secret_key,
            return_url,
        }
    }

    async fn create_payment(
        &self,
        amount: i64,
        description: &str,
        meta: &PaymentMeta,
    ) -> Result<CreatedPayment, CoreError> {
        let idempotence_key = format!(
            "{}-{}-{}",
            meta.user_id,
            meta.booking_date,
            chrono::Utc::now().timestamp_millis()
        );

        let kind = match meta.kind {
            PaymentKind::Deposit => "deposit",
            PaymentKind::Final => "final",
        };

        let body = serde_json::json!({
            "amount": {
                "value": format!("{}.00", amount),
                "currency": "RUB"
            },
            "capture": true,
            "confirmation": {
                "type": "redirect",
                "return_url": self.return_url
            },
            "description": description,
            "metadata": {
                "user_id": meta.user_id.to_string(),
                "booking_date": meta.booking_date.to_string(),
                "kind": kind
            }
        });

        let resp = self
            .http
            .post("https://api.yookassa.ru/v3/payments")
            .basic_auth(&self.shop_id, Some(&self.secret_key))
            .header("Idempotence-Key", &idempotence_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| CoreError::Gateway(e.to_string()))?;

        if !resp.status().is_success() {
            let status = resp.status();
            let text = resp.text().await.unwrap_or_default();
            tracing::error!("YooKassa payment creation failed: {} - {}", status, text);
            return Err(CoreError::Gateway(format!("create returned {}", status)));
        }

        let json: serde_json::Value = resp
            .json()
            .await
            .map_err(|e| CoreError::Gateway(e.to_string()))?;

        let payment_id = json["id"]
            .as_str()
            .ok_or_else(|| CoreError::Gateway("missing payment id".into()))?
            .to_string();
        let confirmation_url = json["confirmation"]["confirmation_url"]
            .as_str()
            .ok_or_else(|| CoreError::Gateway("missing confirmation URL".into()))?
            .to_string();

        tracing::info!(
            "Gateway payment {} created for user {} ({:?}, {} ₽)",
            payment_id,
            meta.user_id,
            meta.kind,
            amount
        );
        Ok(CreatedPayment {
            payment_id,
            confirmation_url,
        })
    }

    async fn query_status(&self, payment_id: &str) -> Result<PaymentStatus, CoreError> {
        let url = format!("https://api.yookassa.ru/v3/payments/{}", payment_id);
        let resp = self
            .http
            .get(&url)
            .basic_auth(&self.shop_id, Some(&self.secret_key))
            .send()
            .await
            .map_err(|e| CoreError::Gateway(e.to_string()))?;

        if !resp.status().is_success() {
            return Err(CoreError::Gateway(format!(
                "status query returned {}",
                resp.status()
            )));
        }

        let json: serde_json::Value = resp
            .json()
            .await
            .map_err(|e| CoreError::Gateway(e.to_string()))?;
        let raw = json["status"]
            .as_str()
            .ok_or_else(|| CoreError::Gateway("missing status field".into()))?;
        Ok(parse_gateway_status(raw))
    }

    async fn create_refund(&self, payment_id: &str, amount: i64) -> Result<(), CoreError> {
        let idempotence_key = format!(
            "refund-{}-{}",
            payment_id,
            chrono::Utc::now().timestamp_millis()
        );

        let body = serde_json::json!({
            "payment_id": payment_id,
            "amount": {
                "value": format!("{}.00", amount),
                "currency": "RUB"
            }
        });

        let resp = self
            .http
            .post("https://api.yookassa.ru/v3/refunds")
            .basic_auth(&self.shop_id, Some(&self.secret_key))
            .header("Idempotence-Key", &idempotence_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| CoreError::Gateway(e.to_string()))?;

        if !resp.status().is_success() {
            let status = resp.status();
            let text = resp.text().await.unwrap_or_default();
            tracing::error!("YooKassa refund failed: {} - {}", status, text);
            return Err(CoreError::Gateway(format!("refund returned {}", status)));
        }

        tracing::info!("Gateway refund created for payment {}", payment_id);
        Ok(())
    }
}

// ── Scripted gateway (tests) ──


// ── Tests ──

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_vocabulary_maps_onto_ours() {
        assert_eq!(parse_gateway_status("pending"), PaymentStatus::Pending);
        assert_eq!(
            parse_gateway_status("waiting_for_capture"),
            PaymentStatus::Pending
        );
        assert_eq!(parse_gateway_status("succeeded"), PaymentStatus::Succeeded);
        assert_eq!(parse_gateway_status("canceled"), PaymentStatus::Canceled);
        assert_eq!(parse_gateway_status("exploded"), PaymentStatus::Failed);
    }

    #[test]
    fn webhook_payload_parses() {
        let raw = r#"{
            "type": "notification",
            "event": "payment.succeeded",
            "object": { "id": "2d6f1c8a-000f", "status": "succeeded", "paid": true }
        }"#;
        let event: WebhookEvent = serde_json::from_str(raw).unwrap();
        assert_eq!(event.event, "payment.succeeded");
        assert_eq!(event.object.id, "2d6f1c8a-000f");
        assert_eq!(event.reported_status(), PaymentStatus::Succeeded);
    }
}
