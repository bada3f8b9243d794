use async_trait::async_trait;
use reqwest::Client;
use serde::Serialize;
use tracing::{info, instrument};

use super::{Notifier, NotifierError, check_response};
use crate::alerts::{AlertPayload, format_alert_message};

#[derive(Debug, Clone, Serialize)]
struct SendMessage<'a> {
    chat_id: &'a str,
    text: String,
    parse_mode: &'static str,
}

/// Sends alerts through the Telegram Bot API
#[derive(Debug, Clone)]
pub struct TelegramNotifier {
    client: Client,
    endpoint: String,
    chat_id: String,
    hostname: String,
}

impl TelegramNotifier {
    pub fn new(api_base: &str, token: String, chat_id: String, hostname: &str) -> Self {
        Self {
            client: Client::new(),
            endpoint: format!("{}/bot{}/sendMessage", api_base.trim_end_matches('/'), token),
            chat_id,
            hostname: hostname.to_string(),
        }
    }
}

#[async_trait]
impl Notifier for TelegramNotifier {
    fn name(&self) -> &'static str {
        "telegram"
    }

    #[instrument(skip(self, payload), fields(kind = %payload.kind))]
    async fn send(&self, payload: &AlertPayload) -> Result<(), NotifierError> {
        let body = SendMessage {
            chat_id: &self.chat_id,
            text: format_alert_message(payload, &self.hostname),
            parse_mode: "Markdown",
        };

        let response = self.client.post(&self.endpoint).json(&body).send().await?;

        check_response(response).await?;
        info!("Successfully sent Telegram alert");
        Ok(())
    }
}
