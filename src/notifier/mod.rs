//! Outbound alert transports
//!
//! Each transport performs a single HTTP POST per alert. A non-2xx answer
//! or a transport error is reported back so the evaluator can leave its
//! cooldown untouched.

pub mod discord;
pub mod telegram;
pub mod webhook;

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use reqwest::Response;
use tracing::error;

use crate::alerts::AlertPayload;
use crate::config::{AlertChannel, ConfigError};

pub use discord::DiscordNotifier;
pub use telegram::TelegramNotifier;
pub use webhook::WebhookNotifier;

#[async_trait]
pub trait Notifier: Send + Sync {
    fn name(&self) -> &'static str;

    async fn send(&self, payload: &AlertPayload) -> Result<(), NotifierError>;
}

#[derive(Debug, Clone, PartialEq)]
pub enum NotifierError {
    /// The request could not be sent (DNS, connect, TLS, ...)
    Request(String),
    /// The endpoint answered with a non-success status
    Status { code: u16, body: String },
    /// No answer within the call timeout
    Timeout,
}

impl fmt::Display for NotifierError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NotifierError::Request(msg) => write!(f, "alert request failed: {msg}"),
            NotifierError::Status { code, body } => {
                write!(f, "alert endpoint answered {code}: {body}")
            }
            NotifierError::Timeout => write!(f, "alert delivery timed out"),
        }
    }
}

impl std::error::Error for NotifierError {}

impl From<reqwest::Error> for NotifierError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            NotifierError::Timeout
        } else {
            NotifierError::Request(err.to_string())
        }
    }
}

/// Turn a non-success response into an error, keeping the body for the log
pub(crate) async fn check_response(response: Response) -> Result<(), NotifierError> {
    let status = response.status();
    if status.is_success() {
        return Ok(());
    }

    let body = response.text().await.unwrap_or_default();
    error!("alert endpoint failed with status {status}: {body}");
    Err(NotifierError::Status {
        code: status.as_u16(),
        body,
    })
}

/// Build the transport for a configured channel
pub fn build_notifier(
    channel: &AlertChannel,
    hostname: &str,
) -> Result<Arc<dyn Notifier>, ConfigError> {
    let notifier: Arc<dyn Notifier> = match channel {
        AlertChannel::Discord(discord) => Arc::new(DiscordNotifier::new(discord.clone(), hostname)),
        AlertChannel::Webhook(webhook) => Arc::new(WebhookNotifier::new(webhook.clone(), hostname)),
        AlertChannel::Telegram(telegram) => {
            let token = telegram
                .bot_token
                .clone()
                .ok_or(ConfigError::MissingCredential {
                    channel: "telegram",
                    field: "bot_token",
                })?;
            let chat_id = telegram
                .chat_id
                .clone()
                .ok_or(ConfigError::MissingCredential {
                    channel: "telegram",
                    field: "chat_id",
                })?;
            Arc::new(TelegramNotifier::new(
                &telegram.api_base,
                token,
                chat_id,
                hostname,
            ))
        }
    };

    Ok(notifier)
}
