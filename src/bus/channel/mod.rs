//! In-memory channel-based pub/sub for single-process deployments.
//!
//! Uses a tokio broadcast channel shared by every subscriber created from the
//! same [`ChannelPubSub`]. Each subscriber keeps its own set of subscribed
//! channels and drops everything else, the way a broker-side subscription
//! would. Ideal for local development and testing without external
//! dependencies.

use std::collections::HashSet;
use std::sync::{Arc, Mutex, PoisonError};

use async_trait::async_trait;
use tokio::sync::{broadcast, RwLock};
use tracing::{debug, error, info};

use super::{
    BusError, BusMessage, HandlerRegistry, ListenerSlot, MessageHandler, PubSubClient, Result,
    Subscriber,
};

/// Channel capacity for broadcast.
const CHANNEL_CAPACITY: usize = 1024;

/// In-memory pub/sub bus using a tokio broadcast channel.
///
/// Every subscriber gets its own copy of each message (fan-out).
#[derive(Clone)]
pub struct ChannelPubSub {
    sender: broadcast::Sender<Arc<BusMessage>>,
}

impl ChannelPubSub {
    /// Create a new channel bus.
    pub fn new() -> Self {
        let (sender, _) = broadcast::channel(CHANNEL_CAPACITY);
        info!("Channel pub/sub initialized");
        Self { sender }
    }

    /// Create a subscriber sharing this bus.
    pub fn create_subscriber(&self) -> ChannelSubscriber {
        ChannelSubscriber::new(self.sender.clone())
    }
}

impl Default for ChannelPubSub {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl PubSubClient for ChannelPubSub {
    async fn subscriber(&self) -> Result<Arc<dyn Subscriber>> {
        Ok(Arc::new(self.create_subscriber()))
    }

    #[tracing::instrument(name = "bus.publish", skip_all, fields(channel = %channel))]
    async fn publish(&self, channel: &str, payload: &str) -> Result<usize> {
        let message = Arc::new(BusMessage::new(channel, payload));

        // Send to channel (no receivers is fine for publish-only scenarios)
        match self.sender.send(message) {
            Ok(receivers) => {
                debug!(receivers, "Published message to channel bus");
                Ok(receivers)
            }
            Err(_) => {
                debug!("Published message (no receivers)");
                Ok(0)
            }
        }
    }
}

/// Subscriber connection on a [`ChannelPubSub`].
pub struct ChannelSubscriber {
    sender: broadcast::Sender<Arc<BusMessage>>,
    channels: Arc<RwLock<HashSet<String>>>,
    handlers: HandlerRegistry,
    /// Receiver opened on first subscribe, handed to the listener task.
    receiver: Mutex<Option<broadcast::Receiver<Arc<BusMessage>>>>,
    listener: ListenerSlot,
}

impl ChannelSubscriber {
    fn new(sender: broadcast::Sender<Arc<BusMessage>>) -> Self {
        Self {
            sender,
            channels: Arc::new(RwLock::new(HashSet::new())),
            handlers: HandlerRegistry::new(),
            receiver: Mutex::new(None),
            listener: ListenerSlot::new(),
        }
    }

    /// Channels this subscriber currently receives.
    pub async fn channels(&self) -> Vec<String> {
        let mut channels: Vec<String> = self.channels.read().await.iter().cloned().collect();
        channels.sort();
        channels
    }

    /// Names of the registered handlers.
    pub async fn handler_names(&self) -> Vec<String> {
        self.handlers.names().await
    }

    fn ensure_open(&self) -> Result<()> {
        if self.listener.is_closed() {
            return Err(BusError::Closed);
        }
        Ok(())
    }

    /// Open the receiver before listening starts, so messages published
    /// between subscribe and start_listening are kept.
    fn open_receiver(&self) {
        if self.listener.is_listening() {
            return;
        }
        let mut receiver = self.receiver.lock().unwrap_or_else(PoisonError::into_inner);
        if receiver.is_none() {
            *receiver = Some(self.sender.subscribe());
        }
    }
}

#[async_trait]
impl Subscriber for ChannelSubscriber {
    async fn subscribe(&self, channel: &str) -> Result<()> {
        self.ensure_open()?;
        self.open_receiver();
        self.channels.write().await.insert(channel.to_string());
        info!(channel = %channel, "Subscribed to channel");
        Ok(())
    }

    async fn add_message_handler(
        &self,
        name: &str,
        handler: Arc<dyn MessageHandler>,
    ) -> Result<()> {
        self.ensure_open()?;
        let count = self.handlers.register(name, handler).await?;
        info!(handler = %name, handler_count = count, "Handler added to channel subscriber");
        Ok(())
    }

    async fn start_listening(&self) -> Result<()> {
        self.listener.ensure_idle()?;

        let opened = self
            .receiver
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        let mut receiver = match opened {
            Some(receiver) => receiver,
            None => self.sender.subscribe(),
        };
        let channels = Arc::clone(&self.channels);
        let handlers = self.handlers.clone();

        // Spawn consumer task
        let task = tokio::spawn(async move {
            loop {
                match receiver.recv().await {
                    Ok(message) => {
                        if !channels.read().await.contains(&message.channel) {
                            continue;
                        }

                        debug!(channel = %message.channel, "Received message via channel bus");
                        handlers.dispatch(&message).await;
                    }
                    Err(broadcast::error::RecvError::Lagged(n)) => {
                        error!(skipped = n, "Channel subscriber lagged, skipped messages");
                    }
                    Err(broadcast::error::RecvError::Closed) => {
                        info!("Channel closed, stopping subscriber");
                        break;
                    }
                }
            }
        });
        self.listener.install(task)?;

        info!("Channel subscriber started");
        Ok(())
    }

    async fn shutdown(&self) -> Result<()> {
        if !self.listener.close() {
            return Ok(());
        }
        self.receiver
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();

        info!("Channel subscriber shut down");
        Ok(())
    }
}
