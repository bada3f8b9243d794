use async_trait::async_trait;
use reqwest::Client;
use serde_json::{Value, json};
use tracing::{info, instrument};

use super::{Notifier, NotifierError, check_response};
use crate::alerts::{AlertPayload, format_alert_message};
use crate::config::Webhook;

/// Posts a JSON document to an arbitrary URL
#[derive(Debug, Clone)]
pub struct WebhookNotifier {
    client: Client,
    webhook: Webhook,
    hostname: String,
}

impl WebhookNotifier {
    pub fn new(webhook: Webhook, hostname: &str) -> Self {
        Self {
            client: Client::new(),
            webhook,
            hostname: hostname.to_string(),
        }
    }

    pub fn body(&self, payload: &AlertPayload) -> Value {
        json!({
            "message": format_alert_message(payload, &self.hostname),
            "host": self.hostname,
            "payload": payload,
            "timestamp": payload.timestamp.to_rfc3339()
        })
    }
}

#[async_trait]
impl Notifier for WebhookNotifier {
    fn name(&self) -> &'static str {
        "webhook"
    }

    #[instrument(skip(self, payload), fields(kind = %payload.kind))]
    async fn send(&self, payload: &AlertPayload) -> Result<(), NotifierError> {
        let response = self
            .client
            .post(&self.webhook.url)
            .json(&self.body(payload))
            .send()
            .await?;

        check_response(response).await?;
        info!("Successfully sent webhook alert");
        Ok(())
    }
}
