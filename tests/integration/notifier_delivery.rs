//! Delivery of alerts over HTTP against a mock server

use std::time::Duration;

use assert_matches::assert_matches;
use chrono::Utc;
use health_monitor::ResourceKind;
use health_monitor::alerts::{AlertContext, AlertPayload, EvaluationMode};
use health_monitor::config::{Discord, Telegram, Webhook};
use health_monitor::notifier::{
    DiscordNotifier, Notifier, NotifierError, TelegramNotifier, WebhookNotifier,
};
use serde_json::Value;
use wiremock::matchers::{body_partial_json, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn disk_payload(value: f64) -> AlertPayload {
    AlertPayload {
        kind: ResourceKind::Disk,
        current_value: value,
        threshold: 80.0,
        timestamp: Utc::now(),
        mode: EvaluationMode::Instantaneous,
        context: AlertContext::Disk {
            total_gb: 500,
            used_gb: 460,
            free_gb: 40,
            mount_point: "/".to_string(),
        },
    }
}

async fn received_json(server: &MockServer) -> Vec<Value> {
    server
        .received_requests()
        .await
        .unwrap_or_default()
        .iter()
        .map(|request| serde_json::from_slice(&request.body).unwrap())
        .collect()
}

#[tokio::test]
async fn test_webhook_posts_json_document() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/alerts"))
        .and(body_partial_json(serde_json::json!({
            "host": "storage-2",
            "payload": { "kind": "disk", "threshold": 80.0 }
        })))
        .respond_with(ResponseTemplate::new(204))
        .expect(1)
        .mount(&server)
        .await;

    let notifier = WebhookNotifier::new(
        Webhook {
            url: format!("{}/alerts", server.uri()),
        },
        "storage-2",
    );

    notifier.send(&disk_payload(92.0)).await.unwrap();

    let bodies = received_json(&server).await;
    assert_eq!(bodies[0]["payload"]["context"]["mount_point"], "/");
    assert!(bodies[0]["message"].as_str().unwrap().contains("92.0%"));
}

#[tokio::test]
async fn test_discord_posts_embed_with_mention() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/webhooks/1/abc"))
        .respond_with(ResponseTemplate::new(204))
        .expect(1)
        .mount(&server)
        .await;

    let notifier = DiscordNotifier::new(
        Discord {
            url: format!("{}/api/webhooks/1/abc", server.uri()),
            user_id: Some("4242".to_string()),
        },
        "storage-2",
    );

    notifier.send(&disk_payload(97.5)).await.unwrap();

    let bodies = received_json(&server).await;
    let body = &bodies[0];
    assert!(body["content"].as_str().unwrap().contains("<@4242>"));

    let embed = &body["embeds"][0];
    assert!(embed["title"].as_str().unwrap().contains("Disk"));
    assert_eq!(embed["footer"]["text"], "Host: storage-2");
    assert!(embed["fields"].as_array().unwrap().len() >= 4);
}

#[tokio::test]
async fn test_telegram_send_message() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/bot123:abc/sendMessage"))
        .and(body_partial_json(serde_json::json!({
            "chat_id": "-1001",
            "parse_mode": "Markdown"
        })))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({"ok": true})))
        .expect(1)
        .mount(&server)
        .await;

    let telegram = Telegram {
        bot_token: Some("123:abc".to_string()),
        chat_id: Some("-1001".to_string()),
        api_base: server.uri(),
    };
    let notifier = TelegramNotifier::new(
        &telegram.api_base,
        telegram.bot_token.clone().unwrap(),
        telegram.chat_id.clone().unwrap(),
        "storage-2",
    );

    notifier.send(&disk_payload(85.0)).await.unwrap();

    let bodies = received_json(&server).await;
    let text = bodies[0]["text"].as_str().unwrap();
    assert!(text.contains("High Disk Usage"));
    assert!(text.contains("`storage-2`"));
}

#[tokio::test]
async fn test_error_status_is_reported() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(500).set_body_string("upstream down"))
        .mount(&server)
        .await;

    let notifier = WebhookNotifier::new(
        Webhook {
            url: server.uri(),
        },
        "storage-2",
    );

    let result = notifier.send(&disk_payload(85.0)).await;
    assert_eq!(
        result,
        Err(NotifierError::Status {
            code: 500,
            body: "upstream down".to_string()
        })
    );
}

#[tokio::test]
async fn test_slow_endpoint_is_bounded_by_caller() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200).set_delay(Duration::from_secs(5)))
        .mount(&server)
        .await;

    let notifier = WebhookNotifier::new(
        Webhook {
            url: server.uri(),
        },
        "storage-2",
    );

    let outcome = health_monitor::util::bounded(
        Duration::from_millis(100),
        notifier.send(&disk_payload(85.0)),
    )
    .await;
    assert_matches!(outcome, None);
}

#[tokio::test]
async fn test_unreachable_endpoint() {
    let notifier = WebhookNotifier::new(
        Webhook {
            // port 9 (discard) is not listening in the test environment
            url: "http://127.0.0.1:9/alerts".to_string(),
        },
        "storage-2",
    );

    assert_matches!(
        notifier.send(&disk_payload(85.0)).await,
        Err(NotifierError::Request(_))
    );
}
