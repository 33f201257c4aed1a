//! Redis pub/sub implementation.
//!
//! Publishing goes through a shared `ConnectionManager`. Every subscriber
//! opens its own dedicated pub/sub connection, since a Redis connection in
//! subscribe mode cannot run other commands.
//!
//! Redis only delivers messages for channels the connection subscribed to.
//! Channels must be subscribed before `start_listening`: the connection is
//! handed to the listener task at that point.
//!
//! If the subscriber connection drops, the listener reopens it with the
//! client's backoff and resubscribes every channel before resuming delivery.
//! Messages published while disconnected are lost (Redis pub/sub keeps no
//! backlog).

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use backon::{ExponentialBuilder, Retryable};
use futures::StreamExt;
use redis::aio::{ConnectionManager, PubSub};
use redis::{AsyncCommands, Client, RedisError};
use tokio::sync::{Mutex as AsyncMutex, RwLock};
use tracing::{debug, error, info, warn};

use super::{
    BusError, BusMessage, HandlerRegistry, ListenerSlot, MessageHandler, PubSubClient, Result,
    Subscriber,
};
use crate::utils::retry::{connection_backoff, DEFAULT_CONNECT_RETRIES};

/// Redis pub/sub client.
pub struct RedisPubSub {
    client: Client,
    publisher: ConnectionManager,
    backoff: ExponentialBuilder,
}

impl RedisPubSub {
    /// Connect to Redis, retrying with the standard connection backoff.
    ///
    /// # Arguments
    /// * `url` - Redis connection URL (e.g., redis://localhost:6379)
    pub async fn connect(url: &str) -> Result<Self> {
        Self::connect_with_backoff(url, connection_backoff(DEFAULT_CONNECT_RETRIES)).await
    }

    /// Connect to Redis with a custom backoff.
    pub async fn connect_with_backoff(url: &str, backoff: ExponentialBuilder) -> Result<Self> {
        let client = Client::open(url)?;
        let publisher = (|| ConnectionManager::new(client.clone()))
            .retry(backoff)
            .notify(|err: &RedisError, delay: Duration| {
                warn!(url = %url, error = %err, retry_in = ?delay, "Redis connection failed, retrying");
            })
            .await?;

        info!(url = %url, "Connected to Redis");

        Ok(Self {
            client,
            publisher,
            backoff,
        })
    }
}

#[async_trait]
impl PubSubClient for RedisPubSub {
    async fn subscriber(&self) -> Result<Arc<dyn Subscriber>> {
        let client = self.client.clone();
        let pubsub = (|| {
            let client = client.clone();
            async move { client.get_async_pubsub().await }
        })
        .retry(self.backoff)
        .notify(|err: &RedisError, delay: Duration| {
            warn!(error = %err, retry_in = ?delay, "Redis subscriber connection failed, retrying");
        })
        .await?;

        debug!("Opened Redis subscriber connection");
        Ok(Arc::new(RedisSubscriber::new(
            pubsub,
            self.client.clone(),
            self.backoff,
        )))
    }

    #[tracing::instrument(name = "bus.publish", skip_all, fields(channel = %channel))]
    async fn publish(&self, channel: &str, payload: &str) -> Result<usize> {
        let mut conn = self.publisher.clone();
        let receivers: usize = conn
            .publish(channel, payload)
            .await
            .map_err(|e| BusError::Publish(e.to_string()))?;

        debug!(receivers, "Published message to Redis");
        Ok(receivers)
    }
}

/// Dedicated Redis subscriber connection.
pub struct RedisSubscriber {
    /// Connection until `start_listening` moves it into the listener task.
    pubsub: AsyncMutex<Option<PubSub>>,
    client: Client,
    backoff: ExponentialBuilder,
    channels: RwLock<Vec<String>>,
    handlers: HandlerRegistry,
    listener: ListenerSlot,
}

impl RedisSubscriber {
    fn new(pubsub: PubSub, client: Client, backoff: ExponentialBuilder) -> Self {
        Self {
            pubsub: AsyncMutex::new(Some(pubsub)),
            client,
            backoff,
            channels: RwLock::new(Vec::new()),
            handlers: HandlerRegistry::new(),
            listener: ListenerSlot::new(),
        }
    }

    /// Channels this connection is subscribed to.
    pub async fn channels(&self) -> Vec<String> {
        self.channels.read().await.clone()
    }

    fn unavailable(&self) -> BusError {
        if self.listener.is_closed() {
            BusError::Closed
        } else {
            BusError::AlreadyListening
        }
    }
}

#[async_trait]
impl Subscriber for RedisSubscriber {
    async fn subscribe(&self, channel: &str) -> Result<()> {
        let mut guard = self.pubsub.lock().await;
        let pubsub = guard.as_mut().ok_or_else(|| self.unavailable())?;

        pubsub
            .subscribe(channel)
            .await
            .map_err(|e| BusError::Subscribe(format!("{}: {}", channel, e)))?;
        self.channels.write().await.push(channel.to_string());

        info!(channel = %channel, "Subscribed to Redis channel");
        Ok(())
    }

    async fn add_message_handler(
        &self,
        name: &str,
        handler: Arc<dyn MessageHandler>,
    ) -> Result<()> {
        if self.listener.is_closed() {
            return Err(BusError::Closed);
        }
        let count = self.handlers.register(name, handler).await?;
        info!(handler = %name, handler_count = count, "Handler added to Redis subscriber");
        Ok(())
    }

    async fn start_listening(&self) -> Result<()> {
        let pubsub = self
            .pubsub
            .lock()
            .await
            .take()
            .ok_or_else(|| self.unavailable())?;
        let channels = self.channels().await;

        let task = tokio::spawn(listen(
            pubsub,
            Resubscribe {
                client: self.client.clone(),
                backoff: self.backoff,
                channels: channels.clone(),
            },
            self.handlers.clone(),
            self.listener.closed_flag(),
        ));
        self.listener.install(task)?;

        info!(channels = ?channels, "Redis subscriber started");
        Ok(())
    }

    async fn shutdown(&self) -> Result<()> {
        if !self.listener.close() {
            return Ok(());
        }

        // Dropping the connection (idle or inside the listener) closes it
        self.pubsub.lock().await.take();

        info!("Redis subscriber shut down");
        Ok(())
    }
}

/// What the listener needs to rebuild a dropped subscription.
struct Resubscribe {
    client: Client,
    backoff: ExponentialBuilder,
    channels: Vec<String>,
}

impl Resubscribe {
    async fn connect(&self) -> std::result::Result<PubSub, RedisError> {
        let client = &self.client;
        let channels = self.channels.as_slice();

        (move || async move {
            let mut pubsub = client.get_async_pubsub().await?;
            for channel in channels {
                pubsub.subscribe(channel).await?;
            }
            Ok::<PubSub, RedisError>(pubsub)
        })
        .retry(self.backoff)
        .notify(|err: &RedisError, delay: Duration| {
            warn!(error = %err, retry_in = ?delay, "Redis resubscribe failed, retrying");
        })
        .await
    }
}

/// Deliver messages until shut down, resubscribing whenever the connection drops.
async fn listen(
    mut pubsub: PubSub,
    resubscribe: Resubscribe,
    handlers: HandlerRegistry,
    closed: Arc<AtomicBool>,
) {
    loop {
        let mut stream = Box::pin(pubsub.into_on_message());
        while let Some(msg) = stream.next().await {
            let channel = msg.get_channel_name().to_string();
            let payload: String = match msg.get_payload() {
                Ok(payload) => payload,
                Err(e) => {
                    warn!(channel = %channel, error = %e, "Dropping non-text Redis message");
                    continue;
                }
            };

            debug!(channel = %channel, "Received message via Redis");
            handlers
                .dispatch(&Arc::new(BusMessage { channel, payload }))
                .await;
        }
        drop(stream);

        if closed.load(Ordering::SeqCst) {
            break;
        }
        error!(
            channels = ?resubscribe.channels,
            "Redis subscription lost, reconnecting"
        );

        pubsub = match resubscribe.connect().await {
            Ok(pubsub) => pubsub,
            Err(e) => {
                error!(
                    channels = ?resubscribe.channels,
                    error = %e,
                    "Giving up on Redis subscription, no further messages will be delivered"
                );
                break;
            }
        };
        info!(channels = ?resubscribe.channels, "Redis subscription restored");
    }
}
