//! herald-webhook: command receiver for webhook instances
//!
//! Subscribes to the cluster-wide command channel and runs the webhook role's
//! dispatch table for every command addressed to this instance.
//!
//! ## Architecture
//! ```text
//! [herald-send / main instance] --PUBLISH--> [command channel]
//!                                                   |
//!                                                   v
//!                                  [herald-webhook] x N (fan-out)
//! ```
//!
//! ## Configuration
//! - `--config <path>` or HERALD_CONFIG: YAML config file (optional)
//! - HERALD__MESSAGING__TYPE: `channel` or `redis`
//! - HERALD__ORCHESTRATION__COMMAND_CHANNEL: Channel name shared by the cluster
//! - HERALD_LOG: Log filter (default: info)

use std::sync::Arc;

use tracing::{error, info};

use herald::bus::init_pubsub;
use herald::config::Config;
use herald::orchestration::{webhook, OrchestrationHandler, TracingWebhookActions};
use herald::protocol::CommandChannel;
use herald::utils::bootstrap::{init_tracing, shutdown_signal};

/// Value of `--config <path>`, if given.
fn config_path(mut args: impl Iterator<Item = String>) -> Option<String> {
    while let Some(arg) = args.next() {
        if arg == "--config" {
            return args.next();
        }
    }
    None
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    init_tracing();

    let config = Config::load(config_path(std::env::args().skip(1)).as_deref())?;
    let instance_id = config.orchestration.resolve_instance_id();
    let channel = CommandChannel::new(&config.orchestration.command_channel);

    let client = init_pubsub(&config.messaging)
        .await
        .map_err(|e| e as Box<dyn std::error::Error>)?;

    let dispatcher = webhook::dispatcher(
        Arc::new(TracingWebhookActions),
        instance_id.clone(),
        config.orchestration.dispatch_mode,
    );
    let handler = OrchestrationHandler::new(client, channel, Arc::new(dispatcher.spawn()));
    handler.init_subscriber().await?;

    info!(
        instance_id = %instance_id,
        channel = %handler.channel(),
        "herald-webhook started"
    );

    shutdown_signal().await;

    info!("herald-webhook shutting down");
    if let Err(e) = handler.shutdown().await {
        error!(error = %e, "Failed to close command subscriber");
    }

    Ok(())
}
