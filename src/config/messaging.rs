//! Messaging and pub/sub transport configuration types.

use serde::Deserialize;

use crate::utils::retry::DEFAULT_CONNECT_RETRIES;

/// Messaging type discriminator.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessagingType {
    /// In-process broadcast channel (no external broker).
    #[default]
    Channel,
    /// Redis PUBLISH/SUBSCRIBE.
    Redis,
}

/// Messaging configuration (discriminated union).
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct MessagingConfig {
    /// Messaging type discriminator.
    #[serde(rename = "type")]
    pub messaging_type: MessagingType,
    /// Redis-specific configuration.
    pub redis: RedisConfig,
}

/// Redis-specific configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RedisConfig {
    /// Redis connection URL.
    pub url: String,
    /// Connection retries before startup fails.
    pub connect_retries: usize,
}

impl Default for RedisConfig {
    fn default() -> Self {
        Self {
            url: "redis://localhost:6379".to_string(),
            connect_retries: DEFAULT_CONNECT_RETRIES,
        }
    }
}
