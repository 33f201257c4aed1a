//! Command channel tests over the in-process channel transport.
//!
//! Run with: cargo test --test orchestration

mod common;

use std::sync::Arc;

use herald::bus::{ChannelPubSub, PubSubClient};
use herald::orchestration::{webhook, DispatchMode, HandlerState, OrchestrationHandler};
use herald::protocol::{CommandChannel, CommandMessage, CommandPublisher};

use common::{settle, CountingWebhookActions, RecordingSink};

async fn webhook_instance(
    bus: &Arc<dyn PubSubClient>,
    instance_id: &str,
) -> (OrchestrationHandler, CountingWebhookActions) {
    let actions = CountingWebhookActions::default();
    let dispatcher = webhook::dispatcher(
        Arc::new(actions.clone()),
        instance_id,
        DispatchMode::Concurrent,
    );
    let handler = OrchestrationHandler::new(
        Arc::clone(bus),
        CommandChannel::default(),
        Arc::new(dispatcher.spawn()),
    );
    handler
        .init_subscriber()
        .await
        .expect("Failed to subscribe");
    (handler, actions)
}

#[tokio::test]
async fn test_fan_out_to_every_instance() {
    let bus: Arc<dyn PubSubClient> = Arc::new(ChannelPubSub::new());
    let (first, first_actions) = webhook_instance(&bus, "webhook-1").await;
    let (second, second_actions) = webhook_instance(&bus, "webhook-2").await;

    let publisher = CommandPublisher::new(Arc::clone(&bus), CommandChannel::default(), "main-1");
    let receivers = publisher
        .send(CommandMessage::new("reloadLicense"))
        .await
        .unwrap();
    settle().await;

    assert_eq!(receivers, 2);
    assert_eq!(first_actions.license_reloads(), 1);
    assert_eq!(second_actions.license_reloads(), 1);

    first.shutdown().await.unwrap();
    second.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_targeted_command_reaches_one_instance() {
    let bus: Arc<dyn PubSubClient> = Arc::new(ChannelPubSub::new());
    let (_first, first_actions) = webhook_instance(&bus, "webhook-1").await;
    let (_second, second_actions) = webhook_instance(&bus, "webhook-2").await;

    let publisher = CommandPublisher::new(Arc::clone(&bus), CommandChannel::default(), "main-1");
    publisher
        .send(CommandMessage::new("reloadLicense").with_targets(["webhook-2"]))
        .await
        .unwrap();
    settle().await;

    assert_eq!(first_actions.license_reloads(), 0);
    assert_eq!(second_actions.license_reloads(), 1);
}

#[tokio::test]
async fn test_instance_ignores_its_own_commands() {
    let bus: Arc<dyn PubSubClient> = Arc::new(ChannelPubSub::new());
    let (_handler, actions) = webhook_instance(&bus, "webhook-1").await;

    let publisher = CommandPublisher::new(Arc::clone(&bus), CommandChannel::default(), "webhook-1");
    publisher
        .send(CommandMessage::new("reloadLicense"))
        .await
        .unwrap();
    settle().await;

    assert_eq!(actions.license_reloads(), 0);
}

#[tokio::test]
async fn test_channel_mismatch_is_silent() {
    let bus: Arc<dyn PubSubClient> = Arc::new(ChannelPubSub::new());
    let sink = RecordingSink::default();
    let handler = OrchestrationHandler::new(
        Arc::clone(&bus),
        CommandChannel::new("cluster-a.commands"),
        Arc::new(sink.clone()),
    );
    handler.init_subscriber().await.unwrap();

    bus.publish("cluster-b.commands", r#"{"command":"reloadLicense"}"#)
        .await
        .unwrap();
    bus.publish("cluster-a.commands", r#"{"command":"restartEventBus"}"#)
        .await
        .unwrap();
    settle().await;

    assert_eq!(sink.submitted(), vec![r#"{"command":"restartEventBus"}"#]);
    assert_eq!(handler.state(), HandlerState::Subscribed);
}
