use async_trait::async_trait;
use market_core::{Control, EngineError, EngineResult, Messenger};
use reqwest::Client;
use serde_json::json;

/// Telegram Bot API implementation of the operator channel.
pub struct TelegramMessenger {
    client: Client,
    bot_token: String,
    chat_id: String,
}

impl TelegramMessenger {
    pub fn new(bot_token: String, chat_id: String) -> Self {
        Self {
            client: Client::new(),
            bot_token,
            chat_id,
        }
    }

    fn api_url(&self, method: &str) -> String {
        format!("https://api.telegram.org/bot{}/{}", self.bot_token, method)
    }

    async fn post(&self, method: &str, payload: serde_json::Value) -> EngineResult<()> {
        if self.bot_token.is_empty() {
            tracing::debug!("telegram not configured, skipping notification");
            return Ok(());
        }

        let response = self
            .client
            .post(self.api_url(method))
            .json(&payload)
            .send()
            .await
            .map_err(|e| EngineError::Messenger(e.to_string()))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(EngineError::Messenger(format!(
                "telegram {method} failed {status}: {body}"
            )));
        }
        Ok(())
    }
}

#[async_trait]
impl Messenger for TelegramMessenger {
    async fn send(&self, text: &str) -> EngineResult<()> {
        self.post(
            "sendMessage",
            json!({
                "chat_id": self.chat_id,
                "text": text,
            }),
        )
        .await
    }

    async fn send_with_controls(&self, text: &str, controls: &[Vec<Control>]) -> EngineResult<()> {
        let keyboard: Vec<Vec<serde_json::Value>> = controls
            .iter()
            .map(|row| {
                row.iter()
                    .map(|c| json!({ "text": c.label, "callback_data": c.callback }))
                    .collect()
            })
            .collect();

        self.post(
            "sendMessage",
            json!({
                "chat_id": self.chat_id,
                "text": text,
                "reply_markup": { "inline_keyboard": keyboard },
            }),
        )
        .await
    }
}
