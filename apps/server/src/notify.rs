//! Chat notification sink. Fire-and-forget: send failures are logged, never
//! propagated — a dead chat must not undo a confirmed payment.

pub enum Notifier {
    Telegram(TelegramNotifier),
    Disabled,
    #[cfg(test)]
    Recording(recording::RecordingNotifier),
}

impl Notifier {
    pub async fn send_user(&self, chat_id: i64, text: &str) {
        match self {
            Notifier::Telegram(t) => t.send(chat_id, text).await,
            Notifier::Disabled => {}
            #[cfg(test)]
            Notifier::Recording(r) => r.record_user(chat_id, text),
        }
    }

    pub async fn send_operator(&self, text: &str) {
        match self {
            Notifier::Telegram(t) => t.send(t.operator_chat_id, text).await,
            Notifier::Disabled => {}
            #[cfg(test)]
            Notifier::Recording(r) => r.record_operator(text),
        }
    }
}

pub struct TelegramNotifier {
    http: reqwest::Client,
    bot_token: String,
    pub operator_chat_id: i64,
}

impl TelegramNotifier {
    pub fn new(bot_token: String, operator_chat_id: i64) -> Self {
        Self {
            http: reqwest::Client::new(),
            bot_token,
            operator_chat_id,
        }
    }

    async fn send(&self, chat_id: i64, text: &str) {
        let url = format!("https://api.telegram.org/bot{}/sendMessage", self.bot_token);
        let result = self
            .http
            .post(&url)
            .json(&serde_json::json!({
                "chat_id": chat_id,
                "text": text,
                "parse_mode": "HTML"
            }))
            .send()
            .await;

        match result {
            Ok(resp) if !resp.status().is_success() => {
                tracing::error!("Telegram sendMessage to {} returned {}", chat_id, resp.status());
            }
            Err(e) => tracing::error!("Telegram sendMessage to {} failed: {}", chat_id, e),
            _ => {}
        }
    }
}

// ── Recording sink (tests) ──
