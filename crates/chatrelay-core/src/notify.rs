//! Fire-and-forget notification sink.
//!
//! Used for startup and periodic-report notices. Delivery failures are
//! logged and never propagate into request handling.

use reqwest::Client;
use serde_json::json;

/// Notification sink client. With no sink URL configured it is a no-op.
pub struct Notifier {
    client: Client,
    sink_url: Option<String>,
}

impl Notifier {
    pub fn new(sink_url: Option<String>) -> Self {
        Self {
            client: Client::new(),
            sink_url,
        }
    }

    /// Deliver a text notice. Never fails the caller.
    pub async fn send(&self, text: &str) {
        let Some(url) = &self.sink_url else {
            return;
        };

        let result = self
            .client
            .post(url)
            .json(&json!({ "text": text }))
            .send()
            .await;

        match result {
            Ok(response) if response.status().is_success() => {
                tracing::debug!("Notification delivered");
            }
            Ok(response) => {
                tracing::warn!(status = %response.status(), "Notification sink rejected notice");
            }
            Err(error) => {
                tracing::warn!(%error, "Failed to deliver notification");
            }
        }
    }
}
