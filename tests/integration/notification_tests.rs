//! Webhook notifications against a local endpoint.

use agent_relay::config::{NotifyConfig, NotifyEvent};
use agent_relay::notifications::{payload, Notifier, Provider};
use serde_json::json;

use super::test_helpers::WebhookSink;

fn config(slack: Option<&str>, discord: Option<&str>) -> NotifyConfig {
    NotifyConfig {
        slack_webhook_url: slack.map(str::to_owned),
        discord_webhook_url: discord.map(str::to_owned),
        ..NotifyConfig::default()
    }
}

#[test]
fn payload_shape_follows_the_provider() {
    assert_eq!(payload(Provider::Slack, "hi"), json!({ "text": "hi" }));
    assert_eq!(payload(Provider::Discord, "hi"), json!({ "content": "hi" }));
}

#[test]
fn no_webhook_means_no_notifier() {
    assert!(Notifier::from_config(&NotifyConfig::default())
        .expect("build")
        .is_none());
}

#[tokio::test]
async fn every_webhook_receives_subscribed_events() {
    let slack = WebhookSink::start().await;
    let discord = WebhookSink::start().await;
    let notifier = Notifier::from_config(&config(Some(&slack.url), Some(&discord.url)))
        .expect("build")
        .expect("configured");

    notifier.notify(NotifyEvent::Blocked, "T-1 is blocked: no creds").await;

    assert_eq!(slack.bodies(), vec![json!({ "text": "T-1 is blocked: no creds" })]);
    assert_eq!(
        discord.bodies(),
        vec![json!({ "content": "T-1 is blocked: no creds" })]
    );
}

#[tokio::test]
async fn unsubscribed_events_are_not_sent() {
    let slack = WebhookSink::start().await;
    let mut config = config(Some(&slack.url), None);
    config.events = vec![NotifyEvent::Failure];
    let notifier = Notifier::from_config(&config).expect("build").expect("configured");

    assert!(!notifier.is_enabled(NotifyEvent::Start));
    notifier.notify(NotifyEvent::Start, "started").await;
    notifier.notify(NotifyEvent::Failure, "failed").await;

    assert_eq!(slack.bodies(), vec![json!({ "text": "failed" })]);
}

#[tokio::test]
async fn failing_webhooks_do_not_stop_the_others() {
    let broken = WebhookSink::answering(500).await;
    let discord = WebhookSink::start().await;
    let notifier = Notifier::from_config(&config(Some(&broken.url), Some(&discord.url)))
        .expect("build")
        .expect("configured");

    notifier.notify(NotifyEvent::Complete, "done").await;

    assert_eq!(broken.bodies().len(), 1);
    assert_eq!(discord.bodies(), vec![json!({ "content": "done" })]);
}
