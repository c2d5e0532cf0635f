use anyhow::Result;
use market_core::OperatorAction;
use reqwest::Client;
use serde::Deserialize;
use serde_json::json;
use tokio::sync::mpsc;

#[derive(Debug, Deserialize)]
struct UpdatesResponse {
    ok: bool,
    #[serde(default)]
    result: Vec<Update>,
}

#[derive(Debug, Deserialize)]
struct Update {
    update_id: i64,
    callback_query: Option<CallbackQuery>,
}

#[derive(Debug, Deserialize)]
struct CallbackQuery {
    id: String,
    data: Option<String>,
}

/// Long-poll `getUpdates` and forward decoded callback presses as
/// [`OperatorAction`] events. Exits when the receiver side closes or the
/// shutdown signal fires.
pub async fn run_update_loop(
    bot_token: String,
    tx: mpsc::Sender<OperatorAction>,
    mut shutdown: tokio::sync::watch::Receiver<bool>,
) -> Result<()> {
    if bot_token.is_empty() {
        tracing::info!("telegram not configured, operator actions disabled");
        return Ok(());
    }

    let client = Client::new();
    let base = format!("https://api.telegram.org/bot{bot_token}");
    let mut offset: i64 = 0;

    loop {
        let poll = client
            .get(format!("{base}/getUpdates"))
            .query(&[("offset", offset.to_string()), ("timeout", "25".to_string())])
            .send();

        let response = tokio::select! {
            r = poll => r,
            _ = shutdown.changed() => {
                if *shutdown.borrow() {
                    return Ok(());
                }
                continue;
            }
        };

        let updates = match response {
            Ok(r) => match r.json::<UpdatesResponse>().await {
                Ok(u) if u.ok => u.result,
                Ok(_) => {
                    tracing::warn!("getUpdates returned ok=false");
                    tokio::time::sleep(std::time::Duration::from_secs(5)).await;
                    continue;
                }
                Err(e) => {
                    tracing::warn!("getUpdates parse failed: {e}");
                    tokio::time::sleep(std::time::Duration::from_secs(5)).await;
                    continue;
                }
            },
            Err(e) => {
                tracing::warn!("getUpdates request failed: {e}");
                tokio::time::sleep(std::time::Duration::from_secs(5)).await;
                continue;
            }
        };

        for update in updates {
            offset = offset.max(update.update_id + 1);
            let Some(callback) = update.callback_query else {
                continue;
            };

            // ack so the client stops showing a spinner
            let ack = client
                .post(format!("{base}/answerCallbackQuery"))
                .json(&json!({ "callback_query_id": callback.id }))
                .send()
                .await;
            if let Err(e) = ack {
                tracing::debug!("answerCallbackQuery failed: {e}");
            }

            let Some(data) = callback.data else { continue };
            match OperatorAction::decode(&data) {
                Some(action) => {
                    if tx.send(action).await.is_err() {
                        return Ok(());
                    }
                }
                None => tracing::warn!("unrecognized callback payload: {data}"),
            }
        }
    }
}
