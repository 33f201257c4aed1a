//! Publishing commands onto the command channel.

use std::sync::Arc;

use tracing::info;

use super::{CommandChannel, CommandMessage};
use crate::bus::{BusError, PubSubClient, Result};

/// Publishes commands on the command channel, stamped with this instance's id.
#[derive(Clone)]
pub struct CommandPublisher {
    client: Arc<dyn PubSubClient>,
    channel: CommandChannel,
    instance_id: String,
}

impl CommandPublisher {
    pub fn new(
        client: Arc<dyn PubSubClient>,
        channel: CommandChannel,
        instance_id: impl Into<String>,
    ) -> Self {
        Self {
            client,
            channel,
            instance_id: instance_id.into(),
        }
    }

    pub fn channel(&self) -> &CommandChannel {
        &self.channel
    }

    /// Publish a command. Returns the receiver count reported by the transport.
    ///
    /// An existing `sender_id` is overwritten with this instance's id.
    pub async fn send(&self, message: CommandMessage) -> Result<usize> {
        let message = message.with_sender(self.instance_id.clone());
        let text = message
            .encode()
            .map_err(|e| BusError::Publish(format!("encode {}: {}", message.command, e)))?;

        let receivers = self.client.publish(self.channel.name(), &text).await?;
        info!(
            command = %message.command,
            channel = %self.channel,
            receivers,
            "Published command"
        );
        Ok(receivers)
    }
}
