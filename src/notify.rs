use reqwest::Client;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::{info, warn};

/// Push notifications through the ServerChan relay. Best-effort: delivery
/// failures are logged and dropped, never propagated into the detection
/// loops.
pub struct ServerChanNotifier {
    client: Client,
    send_key: String,
}

#[derive(Debug, Error)]
pub enum NotifyError {
    #[error("http request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("ServerChan rejected the push: {0}")]
    Api(String),
}

impl ServerChanNotifier {
    /// Returns `None` when no send key is configured, gracefully
    /// disabling push delivery.
    pub fn new(send_key: &str) -> Option<Self> {
        if send_key.is_empty() {
            warn!("ServerChan notifier is not configured (missing send key)");
            return None;
        }
        Some(Self {
            client: Client::new(),
            send_key: send_key.to_string(),
        })
    }

    pub async fn push(&self, title: &str, body: &str) -> Result<(), NotifyError> {
        let url = format!("https://sctapi.ftqq.com/{}.send", self.send_key);

        let resp = self
            .client
            .post(&url)
            .form(&[("title", title), ("desp", body)])
            .timeout(Duration::from_secs(10))
            .send()
            .await?;

        let value: serde_json::Value = resp.json().await?;
        if value.get("code").and_then(|c| c.as_i64()) != Some(0) {
            let message = value
                .get("message")
                .and_then(|m| m.as_str())
                .unwrap_or("unknown error")
                .to_string();
            return Err(NotifyError::Api(message));
        }

        Ok(())
    }
}

/// Fire-and-forget delivery on its own task, so a slow relay can never
/// delay the next candle's evaluation.
pub fn spawn_push(notifier: Arc<ServerChanNotifier>, title: String, body: String) {
    tokio::spawn(async move {
        match notifier.push(&title, &body).await {
            Ok(()) => info!("push delivered: {}", title),
            Err(e) => warn!("push failed ({}): {}", title, e),
        }
    });
}
