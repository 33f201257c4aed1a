//! Command channel protocol.
//!
//! Defines the channel identity shared by every instance and the JSON
//! envelope carried on it:
//!
//! ```json
//! {"command":"reloadLicense","senderId":"main-1","targets":["webhook-2"],"payload":{}}
//! ```
//!
//! Only `command` is required. Instances that disagree on the channel name
//! never see each other's commands; the name must be rolled out in lockstep.

mod publisher;

pub use publisher::CommandPublisher;

use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

/// Channel used when none is configured.
pub const DEFAULT_COMMAND_CHANNEL: &str = "herald.commands";

/// Command kinds understood by at least one instance role.
pub mod commands {
    pub const RELOAD_LICENSE: &str = "reloadLicense";
    pub const RESTART_EVENT_BUS: &str = "restartEventBus";
    pub const RELOAD_EXTERNAL_SECRETS_PROVIDERS: &str = "reloadExternalSecretsProviders";
    pub const COMMUNITY_PACKAGE_INSTALL: &str = "community-package-install";
    pub const COMMUNITY_PACKAGE_UPDATE: &str = "community-package-update";
    pub const COMMUNITY_PACKAGE_UNINSTALL: &str = "community-package-uninstall";
}

/// Errors decoding a command envelope.
#[derive(Debug, thiserror::Error)]
pub enum DecodeError {
    #[error("Malformed command message: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Command message must be a JSON object")]
    NotAnObject,

    #[error("Command message has an empty command kind")]
    EmptyCommand,
}

/// Name of the cluster-wide command channel.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CommandChannel(Arc<str>);

impl CommandChannel {
    pub fn new(name: impl AsRef<str>) -> Self {
        Self(Arc::from(name.as_ref()))
    }

    pub fn name(&self) -> &str {
        &self.0
    }

    /// True if a message delivered on `channel` belongs to this command channel.
    pub fn matches(&self, channel: &str) -> bool {
        &*self.0 == channel
    }
}

impl Default for CommandChannel {
    fn default() -> Self {
        Self::new(DEFAULT_COMMAND_CHANNEL)
    }
}

impl fmt::Display for CommandChannel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A command broadcast between instances.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CommandMessage {
    /// Command kind, the dispatch table key.
    pub command: String,
    /// Instance that published the command.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sender_id: Option<String>,
    /// Instances the command is addressed to. `None` addresses everyone.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub targets: Option<Vec<String>>,
    /// Command parameters.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payload: Option<serde_json::Value>,
}

impl CommandMessage {
    pub fn new(command: impl Into<String>) -> Self {
        Self {
            command: command.into(),
            sender_id: None,
            targets: None,
            payload: None,
        }
    }

    pub fn with_payload(mut self, payload: serde_json::Value) -> Self {
        self.payload = Some(payload);
        self
    }

    pub fn with_targets<I, S>(mut self, targets: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.targets = Some(targets.into_iter().map(Into::into).collect());
        self
    }

    pub fn with_sender(mut self, sender_id: impl Into<String>) -> Self {
        self.sender_id = Some(sender_id.into());
        self
    }

    /// Decode an envelope from the raw text received on the channel.
    pub fn decode(raw: &str) -> Result<Self, DecodeError> {
        // Derived Deserialize also accepts the sequence form of a struct
        let value: serde_json::Value = serde_json::from_str(raw)?;
        if !value.is_object() {
            return Err(DecodeError::NotAnObject);
        }
        let message: Self = serde_json::from_value(value)?;
        if message.command.trim().is_empty() {
            return Err(DecodeError::EmptyCommand);
        }
        Ok(message)
    }

    /// Encode to the JSON text published on the channel.
    pub fn encode(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    /// True if `targets` is absent or names `instance_id`.
    pub fn is_addressed_to(&self, instance_id: &str) -> bool {
        match &self.targets {
            None => true,
            Some(targets) => targets.iter().any(|t| t == instance_id),
        }
    }

    /// True if this instance published the command.
    pub fn is_sent_by(&self, instance_id: &str) -> bool {
        self.sender_id.as_deref() == Some(instance_id)
    }

    /// Read a string field from the payload object.
    pub fn payload_str(&self, field: &str) -> Option<&str> {
        self.payload.as_ref()?.get(field)?.as_str()
    }
}
