//! herald-send: publish one command on the command channel
//!
//! ## Usage
//! ```text
//! herald-send <command> [payload-json] [--target <instance-id>]...
//! herald-send reloadLicense
//! herald-send community-package-install '{"packageName":"n8n-nodes-foo"}' --target webhook-2
//! ```
//!
//! Uses the same configuration as herald-webhook. The published command is
//! stamped with this process's instance id.

use tracing::info;

use herald::bus::init_pubsub;
use herald::config::Config;
use herald::protocol::{CommandChannel, CommandMessage, CommandPublisher};
use herald::utils::bootstrap::init_tracing;

const USAGE: &str = "usage: herald-send <command> [payload-json] [--target <instance-id>]...";

fn parse_args(
    mut args: impl Iterator<Item = String>,
) -> Result<CommandMessage, Box<dyn std::error::Error>> {
    let mut command = None;
    let mut payload = None;
    let mut targets = Vec::new();

    while let Some(arg) = args.next() {
        match arg.as_str() {
            "--target" => targets.push(args.next().ok_or(USAGE)?),
            _ if command.is_none() => command = Some(arg),
            _ if payload.is_none() => payload = Some(serde_json::from_str(&arg)?),
            _ => return Err(USAGE.into()),
        }
    }

    let mut message = CommandMessage::new(command.ok_or(USAGE)?);
    if let Some(payload) = payload {
        message = message.with_payload(payload);
    }
    if !targets.is_empty() {
        message = message.with_targets(targets);
    }
    Ok(message)
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    init_tracing();

    let message = parse_args(std::env::args().skip(1))?;
    let config = Config::load(None)?;
    let instance_id = config.orchestration.resolve_instance_id();

    let client = init_pubsub(&config.messaging)
        .await
        .map_err(|e| e as Box<dyn std::error::Error>)?;
    let publisher = CommandPublisher::new(
        client,
        CommandChannel::new(&config.orchestration.command_channel),
        instance_id,
    );

    let receivers = publisher.send(message).await?;
    info!(receivers, "herald-send done");

    Ok(())
}
