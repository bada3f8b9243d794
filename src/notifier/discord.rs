use async_trait::async_trait;
use reqwest::Client;
use serde::Serialize;
use tracing::{info, instrument};

use super::{Notifier, NotifierError, check_response};
use crate::alerts::{AlertContext, AlertPayload, describe_mode};
use crate::config::Discord;
use crate::{ResourceKind, TopProcess};

const RED: u32 = 15158332;
const ORANGE: u32 = 15105570;

#[derive(Debug, Clone, Serialize)]
pub struct Message {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub embeds: Vec<Embed>,
}

#[derive(Debug, Clone, Serialize)]
pub struct Embed {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub color: Option<u32>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub fields: Vec<EmbedField>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub footer: Option<EmbedFooter>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct EmbedField {
    pub name: String,
    pub value: String,
    pub inline: bool,
}

impl EmbedField {
    fn new(name: impl ToString, value: impl ToString, inline: bool) -> Self {
        Self {
            name: name.to_string(),
            value: value.to_string(),
            inline,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct EmbedFooter {
    pub text: String,
}

#[derive(Default)]
pub struct MessageBuilder {
    content: Option<String>,
    embeds: Vec<Embed>,
}

impl MessageBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn content(mut self, content: impl ToString) -> Self {
        self.content = Some(content.to_string());
        self
    }

    pub fn add_embed(mut self, embed: Embed) -> Self {
        self.embeds.push(embed);
        self
    }

    pub fn build(self) -> Message {
        Message {
            content: self.content,
            embeds: self.embeds,
        }
    }
}

/// Posts alert embeds to a Discord webhook
#[derive(Debug, Clone)]
pub struct DiscordNotifier {
    client: Client,
    discord: Discord,
    hostname: String,
}

impl DiscordNotifier {
    pub fn new(discord: Discord, hostname: &str) -> Self {
        Self {
            client: Client::new(),
            discord,
            hostname: hostname.to_string(),
        }
    }

    pub fn build_message(&self, payload: &AlertPayload) -> Message {
        let mut builder = MessageBuilder::new().add_embed(self.build_embed(payload));
        if let Some(user_id) = &self.discord.user_id {
            builder = builder.content(format!(
                "{} ({} ~ {:.1}%) <@{user_id}>",
                emoji(payload.kind),
                self.hostname,
                payload.current_value
            ));
        }
        builder.build()
    }

    pub fn build_embed(&self, payload: &AlertPayload) -> Embed {
        let color = if payload.current_value >= 95.0 {
            RED
        } else {
            ORANGE
        };

        let mut fields = vec![
            EmbedField::new(
                format!("{} Current Usage", emoji(payload.kind)),
                format!("{:.1}%", payload.current_value),
                true,
            ),
            EmbedField::new("⚠️ Threshold", format!("{}%", payload.threshold), true),
            EmbedField::new(
                "📊 Status",
                create_progress_bar(payload.current_value, payload.threshold),
                false,
            ),
            EmbedField::new("🕒 Measured", describe_mode(&payload.mode), true),
        ];

        match &payload.context {
            AlertContext::Cpu {
                core_count,
                top_processes,
            } => {
                fields.push(EmbedField::new("🧮 Cores", core_count, true));
                if !top_processes.is_empty() {
                    fields.push(EmbedField::new(
                        "🔝 Top Processes",
                        process_lines(top_processes, |p| p.cpu_percent, "CPU"),
                        false,
                    ));
                }
            }
            AlertContext::Memory {
                total_gb,
                used_gb,
                free_gb,
                top_processes,
            } => {
                fields.push(EmbedField::new(
                    "💾 Memory",
                    format!("{used_gb} GB used / {total_gb} GB ({free_gb} GB free)"),
                    false,
                ));
                if !top_processes.is_empty() {
                    fields.push(EmbedField::new(
                        "🔝 Top Processes",
                        process_lines(top_processes, |p| p.mem_percent, "MEM"),
                        false,
                    ));
                }
            }
            AlertContext::Disk {
                total_gb,
                used_gb,
                free_gb,
                mount_point,
            } => {
                fields.push(EmbedField::new(
                    "🗄️ Filesystem",
                    format!("`{mount_point}`: {used_gb} GB used / {total_gb} GB ({free_gb} GB free)"),
                    false,
                ));
            }
        }

        Embed {
            title: Some(format!("{} {} Usage Alert", emoji(payload.kind), title(payload.kind))),
            description: Some(format!(
                "Host **{}** {} usage has exceeded the threshold!",
                self.hostname, payload.kind
            )),
            color: Some(color),
            fields,
            footer: Some(EmbedFooter {
                text: format!("Host: {}", self.hostname),
            }),
            timestamp: Some(payload.timestamp.to_rfc3339()),
        }
    }
}

fn emoji(kind: ResourceKind) -> &'static str {
    match kind {
        ResourceKind::Cpu => "💻",
        ResourceKind::Memory => "🧠",
        ResourceKind::Disk => "💽",
    }
}

fn title(kind: ResourceKind) -> &'static str {
    match kind {
        ResourceKind::Cpu => "CPU",
        ResourceKind::Memory => "Memory",
        ResourceKind::Disk => "Disk",
    }
}

fn process_lines<F>(processes: &[TopProcess], metric: F, label: &str) -> String
where
    F: Fn(&TopProcess) -> f32,
{
    processes
        .iter()
        .map(|p| {
            format!(
                "`{}` (pid {}, {}) {:.1}% {label}",
                p.name,
                p.pid,
                p.user,
                metric(p)
            )
        })
        .collect::<Vec<_>>()
        .join("\n")
}

fn create_progress_bar(current: f64, limit: f64) -> String {
    let ratio = if limit > 0.0 { current / limit } else { 1.0 };
    let percentage = ratio * 100.0;
    let filled = ((ratio * 10.0) as usize).min(10);
    let empty = 10 - filled;

    let bar = "█".repeat(filled) + &"░".repeat(empty);
    let status_emoji = if percentage >= 100.0 {
        "🔴"
    } else if percentage >= 80.0 {
        "🟠"
    } else if percentage >= 60.0 {
        "🟡"
    } else {
        "🟢"
    };

    format!("{} `{}` {:.1}% of threshold", status_emoji, bar, percentage)
}

#[async_trait]
impl Notifier for DiscordNotifier {
    fn name(&self) -> &'static str {
        "discord"
    }

    #[instrument(skip(self, payload), fields(kind = %payload.kind))]
    async fn send(&self, payload: &AlertPayload) -> Result<(), NotifierError> {
        let message = self.build_message(payload);
        let response = self
            .client
            .post(&self.discord.url)
            .json(&message)
            .send()
            .await?;

        check_response(response).await?;
        info!("Successfully sent Discord message");
        Ok(())
    }
}
