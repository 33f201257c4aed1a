//! Publish/subscribe transport for cross-instance messages.
//!
//! This module contains:
//! - `PubSubClient` trait: publishing and subscriber acquisition
//! - `Subscriber` trait: channel subscription and handler registration
//! - `MessageHandler` trait: For processing delivered messages
//! - Implementations: in-process channel, Redis, Mock

use std::sync::Arc;

use async_trait::async_trait;
use futures::future::BoxFuture;
use tracing::info;

use crate::config::{MessagingConfig, MessagingType};

// Implementation modules
#[cfg(feature = "channel")]
pub mod channel;
pub mod dispatch;
pub mod listener;
pub mod mock;
#[cfg(feature = "redis")]
pub mod redis;

// Re-exports
#[cfg(feature = "channel")]
pub use channel::{ChannelPubSub, ChannelSubscriber};
pub use dispatch::HandlerRegistry;
pub use listener::ListenerSlot;
pub use mock::{MockFailures, MockPubSub, MockSubscriber};
#[cfg(feature = "redis")]
pub use self::redis::{RedisPubSub, RedisSubscriber};

// ============================================================================
// Traits
// ============================================================================

/// Result type for bus operations.
pub type Result<T> = std::result::Result<T, BusError>;

/// Errors that can occur during bus operations.
#[derive(Debug, thiserror::Error)]
pub enum BusError {
    #[error("Connection failed: {0}")]
    Connection(String),

    #[error("Publish failed: {0}")]
    Publish(String),

    #[error("Subscribe failed: {0}")]
    Subscribe(String),

    #[error("Handler '{name}' is already registered on this subscriber")]
    DuplicateHandler { name: String },

    #[error("Handler '{name}' failed: {message}")]
    HandlerFailed { name: String, message: String },

    #[error("Subscriber is already listening")]
    AlreadyListening,

    #[error("Subscriber has been shut down")]
    Closed,

    #[cfg(feature = "redis")]
    #[error("Redis error: {0}")]
    Redis(#[from] ::redis::RedisError),
}

/// A message as delivered by the transport.
///
/// `channel` is the channel the message arrived on; `payload` is the text
/// exactly as published.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BusMessage {
    pub channel: String,
    pub payload: String,
}

impl BusMessage {
    pub fn new(channel: impl Into<String>, payload: impl Into<String>) -> Self {
        Self {
            channel: channel.into(),
            payload: payload.into(),
        }
    }
}

/// Handler for processing messages delivered to a subscriber.
///
/// Every registered handler sees every message on every channel the
/// subscriber is subscribed to. Topic filtering is the handler's job.
pub trait MessageHandler: Send + Sync {
    /// Process a delivered message.
    fn handle(&self, message: Arc<BusMessage>) -> BoxFuture<'static, Result<()>>;
}

/// A dedicated subscriber connection.
///
/// Lifecycle: `subscribe` to one or more channels, register handlers with
/// `add_message_handler`, then `start_listening` to begin delivery.
/// `shutdown` closes the connection; messages in flight are dropped.
#[async_trait]
pub trait Subscriber: Send + Sync {
    /// Subscribe this connection to a channel.
    async fn subscribe(&self, channel: &str) -> Result<()>;

    /// Register a handler under `name`.
    ///
    /// Names are unique per subscriber: registering the same name twice
    /// fails with [`BusError::DuplicateHandler`].
    async fn add_message_handler(&self, name: &str, handler: Arc<dyn MessageHandler>)
        -> Result<()>;

    /// Start delivering messages to the registered handlers.
    async fn start_listening(&self) -> Result<()>;

    /// Close the connection and stop delivery.
    async fn shutdown(&self) -> Result<()>;
}

/// Client for a shared message bus.
#[async_trait]
pub trait PubSubClient: Send + Sync {
    /// Acquire a new dedicated subscriber connection.
    async fn subscriber(&self) -> Result<Arc<dyn Subscriber>>;

    /// Publish `payload` on `channel`.
    ///
    /// Returns the number of subscribers the transport delivered to, when the
    /// transport reports it.
    async fn publish(&self, channel: &str, payload: &str) -> Result<usize>;
}

// ============================================================================
// Factory
// ============================================================================

/// Initialize the pub/sub client based on configuration.
///
/// Requires the corresponding feature to be enabled:
/// - Channel: `--features channel` (included in default)
/// - Redis: `--features redis`
pub async fn init_pubsub(
    config: &MessagingConfig,
) -> std::result::Result<Arc<dyn PubSubClient>, Box<dyn std::error::Error + Send + Sync>> {
    match config.messaging_type {
        MessagingType::Channel => {
            #[cfg(feature = "channel")]
            {
                info!(messaging_type = "channel", "Pub/sub client initialized");
                Ok(Arc::new(ChannelPubSub::new()))
            }

            #[cfg(not(feature = "channel"))]
            {
                Err("Channel support requires the 'channel' feature. Rebuild with --features channel".into())
            }
        }
        MessagingType::Redis => {
            #[cfg(feature = "redis")]
            {
                let backoff = crate::utils::retry::connection_backoff(config.redis.connect_retries);
                let client = RedisPubSub::connect_with_backoff(&config.redis.url, backoff).await?;
                info!(messaging_type = "redis", "Pub/sub client initialized");
                Ok(Arc::new(client))
            }

            #[cfg(not(feature = "redis"))]
            {
                Err("Redis support requires the 'redis' feature. Rebuild with --features redis".into())
            }
        }
    }
}
