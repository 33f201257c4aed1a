//! Command channel and dispatch configuration.

use serde::Deserialize;
use uuid::Uuid;

use super::ConfigError;
use crate::orchestration::DispatchMode;
use crate::protocol::DEFAULT_COMMAND_CHANNEL;

/// Orchestration configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct OrchestrationConfig {
    /// Cluster-wide command channel. Every instance must use the same value.
    pub command_channel: String,
    /// Identity of this instance. Generated when not set.
    pub instance_id: Option<String>,
    /// Whether commands may run concurrently.
    pub dispatch_mode: DispatchMode,
}

impl Default for OrchestrationConfig {
    fn default() -> Self {
        Self {
            command_channel: DEFAULT_COMMAND_CHANNEL.to_string(),
            instance_id: None,
            dispatch_mode: DispatchMode::default(),
        }
    }
}

impl OrchestrationConfig {
    /// The configured instance id, or a fresh random one.
    ///
    /// Call once per process and keep the result.
    pub fn resolve_instance_id(&self) -> String {
        match &self.instance_id {
            Some(id) if !id.trim().is_empty() => id.clone(),
            _ => Uuid::new_v4().to_string(),
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.command_channel.trim().is_empty() {
            return Err(ConfigError::Invalid(
                "orchestration.command_channel must not be empty".to_string(),
            ));
        }
        Ok(())
    }
}
