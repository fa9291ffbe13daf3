//! Notification dispatcher — routes events to Telegram and webhooks.
//!
//! All sends are fire-and-forget: the caller is never blocked beyond
//! issuing the call, and delivery failures are logged, not propagated.

use std::sync::Arc;

use secrecy::{ExposeSecret, SecretString};
use tracing::warn;

use crate::error::NotifyError;
use crate::store::Database;

/// Sends plain-text messages to a Telegram chat via the Bot API.
#[derive(Clone)]
pub struct TelegramNotifier {
    bot_token: SecretString,
    chat_id: String,
    client: reqwest::Client,
}

impl TelegramNotifier {
    pub fn new(bot_token: SecretString, chat_id: String) -> Self {
        Self {
            bot_token,
            chat_id,
            client: reqwest::Client::new(),
        }
    }

    fn api_url(&self, method: &str) -> String {
        format!(
            "https://api.telegram.org/bot{}/{method}",
            self.bot_token.expose_secret()
        )
    }

    /// Send a single text message to the configured chat.
    pub async fn send(&self, text: &str) -> Result<(), NotifyError> {
        let body = serde_json::json!({
            "chat_id": self.chat_id,
            "text": text,
        });

        let resp = self
            .client
            .post(self.api_url("sendMessage"))
            .json(&body)
            .send()
            .await
            .map_err(|e| NotifyError::SendFailed {
                channel: "telegram".into(),
                reason: e.to_string(),
            })?;

        if !resp.status().is_success() {
            let status = resp.status();
            let detail = resp.text().await.unwrap_or_default();
            return Err(NotifyError::SendFailed {
                channel: "telegram".into(),
                reason: format!("sendMessage failed ({status}): {detail}"),
            });
        }
        Ok(())
    }
}

/// Posts event payloads to enabled webhook subscriptions.
#[derive(Clone)]
pub struct WebhookFirer {
    db: Arc<dyn Database>,
    client: reqwest::Client,
}

impl WebhookFirer {
    pub fn new(db: Arc<dyn Database>) -> Self {
        Self {
            db,
            client: reqwest::Client::new(),
        }
    }

    /// Deliver an event to every enabled webhook subscribed to it.
    pub async fn fire(&self, event: &str, payload: &serde_json::Value) {
        let hooks = match self.db.list_enabled_webhooks().await {
            Ok(hooks) => hooks,
            Err(e) => {
                warn!(error = %e, "Failed to load webhooks");
                return;
            }
        };

        let envelope = serde_json::json!({
            "event": event,
            "payload": payload,
            "timestamp": chrono::Utc::now().to_rfc3339(),
        });

        for hook in hooks.into_iter().filter(|h| h.matches(event)) {
            let result = self.client.post(&hook.url).json(&envelope).send().await;
            match result {
                Ok(resp) if !resp.status().is_success() => {
                    warn!(hook = %hook.name, status = %resp.status(), "Webhook returned error");
                }
                Ok(_) => {}
                Err(e) => warn!(hook = %hook.name, error = %e, "Webhook delivery failed"),
            }
        }
    }
}

/// Routes notification events to all configured sinks. Either sink may be
/// absent (disabled).
pub struct Dispatcher {
    telegram: Option<TelegramNotifier>,
    webhooks: Option<WebhookFirer>,
}

impl Dispatcher {
    pub fn new(telegram: Option<TelegramNotifier>, webhooks: Option<WebhookFirer>) -> Self {
        Self { telegram, webhooks }
    }

    /// A dispatcher with no sinks; every send is a no-op.
    pub fn disabled() -> Self {
        Self {
            telegram: None,
            webhooks: None,
        }
    }

    /// Dispatch a structured event to all sinks. Fire-and-forget.
    pub fn send(&self, event: &str, payload: serde_json::Value) {
        if let Some(telegram) = self.telegram.clone() {
            let text = format!("[{event}] {payload}");
            tokio::spawn(async move {
                if let Err(e) = telegram.send(&text).await {
                    warn!(error = %e, "Telegram notification failed");
                }
            });
        }
        if let Some(webhooks) = self.webhooks.clone() {
            let event = event.to_string();
            tokio::spawn(async move {
                webhooks.fire(&event, &payload).await;
            });
        }
    }

    /// Send a plain message via Telegram only. Fire-and-forget.
    pub fn send_direct(&self, message: &str) {
        if let Some(telegram) = self.telegram.clone() {
            let message = message.to_string();
            tokio::spawn(async move {
                if let Err(e) = telegram.send(&message).await {
                    warn!(error = %e, "Telegram notification failed");
                }
            });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn telegram_api_url() {
        let notifier = TelegramNotifier::new(SecretString::from("123:ABC"), "42".into());
        assert_eq!(
            notifier.api_url("getMe"),
            "https://api.telegram.org/bot123:ABC/getMe"
        );
    }

    #[tokio::test]
    async fn disabled_dispatcher_is_inert() {
        let d = Dispatcher::disabled();
        d.send("task.complete", serde_json::json!({"task": "t"}));
        d.send_direct("hello");
    }
}
