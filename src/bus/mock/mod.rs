//! Mock pub/sub implementation for testing.
//!
//! Nothing is delivered on its own: tests push messages through
//! [`MockSubscriber::deliver`] and inspect what was subscribed, registered and
//! published. Each stage of subscriber setup can be made to fail.

use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::RwLock;

use super::{BusError, BusMessage, HandlerRegistry, MessageHandler, PubSubClient, Result, Subscriber};

/// Which subscriber setup step should fail.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MockFailures {
    pub connect: bool,
    pub subscribe: bool,
    pub add_handler: bool,
    pub start: bool,
    pub shutdown: bool,
    pub publish: bool,
}

/// Mock pub/sub client for testing.
#[derive(Default)]
pub struct MockPubSub {
    published: RwLock<Vec<BusMessage>>,
    subscribers: RwLock<Vec<Arc<MockSubscriber>>>,
    failures: RwLock<MockFailures>,
}

impl MockPubSub {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn set_failures(&self, failures: MockFailures) {
        *self.failures.write().await = failures;
    }

    pub async fn published(&self) -> Vec<BusMessage> {
        self.published.read().await.clone()
    }

    pub async fn subscriber_count(&self) -> usize {
        self.subscribers.read().await.len()
    }

    /// The subscribers handed out so far, in creation order.
    pub async fn subscribers(&self) -> Vec<Arc<MockSubscriber>> {
        self.subscribers.read().await.clone()
    }

    /// Deliver a message to every listening subscriber subscribed to `channel`.
    pub async fn deliver(&self, channel: &str, payload: &str) {
        for subscriber in self.subscribers().await {
            if subscriber.is_subscribed(channel).await {
                subscriber.deliver(channel, payload).await;
            }
        }
    }
}

#[async_trait]
impl PubSubClient for MockPubSub {
    async fn subscriber(&self) -> Result<Arc<dyn Subscriber>> {
        let failures = *self.failures.read().await;
        if failures.connect {
            return Err(BusError::Connection("Mock connection failure".to_string()));
        }
        let subscriber = Arc::new(MockSubscriber::new(failures));
        self.subscribers.write().await.push(Arc::clone(&subscriber));
        Ok(subscriber as Arc<dyn Subscriber>)
    }

    async fn publish(&self, channel: &str, payload: &str) -> Result<usize> {
        if self.failures.read().await.publish {
            return Err(BusError::Publish("Mock publish failure".to_string()));
        }
        self.published
            .write()
            .await
            .push(BusMessage::new(channel, payload));
        Ok(self.subscribers.read().await.len())
    }
}

/// Subscriber handed out by [`MockPubSub`].
pub struct MockSubscriber {
    failures: MockFailures,
    channels: RwLock<Vec<String>>,
    handlers: HandlerRegistry,
    listening: RwLock<bool>,
    closed: RwLock<bool>,
}

impl MockSubscriber {
    fn new(failures: MockFailures) -> Self {
        Self {
            failures,
            channels: RwLock::new(Vec::new()),
            handlers: HandlerRegistry::new(),
            listening: RwLock::new(false),
            closed: RwLock::new(false),
        }
    }

    pub async fn channels(&self) -> Vec<String> {
        self.channels.read().await.clone()
    }

    pub async fn is_subscribed(&self, channel: &str) -> bool {
        self.channels.read().await.iter().any(|c| c == channel)
    }

    pub async fn handler_names(&self) -> Vec<String> {
        self.handlers.names().await
    }

    pub async fn is_listening(&self) -> bool {
        *self.listening.read().await
    }

    pub async fn is_closed(&self) -> bool {
        *self.closed.read().await
    }

    /// Run every registered handler on a message, as the transport would.
    ///
    /// Does nothing unless the subscriber is listening and not closed.
    pub async fn deliver(&self, channel: &str, payload: &str) -> bool {
        if !self.is_listening().await || self.is_closed().await {
            return false;
        }
        let message = Arc::new(BusMessage::new(channel, payload));
        self.handlers.dispatch(&message).await
    }
}

#[async_trait]
impl Subscriber for MockSubscriber {
    async fn subscribe(&self, channel: &str) -> Result<()> {
        if self.failures.subscribe {
            return Err(BusError::Subscribe("Mock subscribe failure".to_string()));
        }
        self.channels.write().await.push(channel.to_string());
        Ok(())
    }

    async fn add_message_handler(
        &self,
        name: &str,
        handler: Arc<dyn MessageHandler>,
    ) -> Result<()> {
        if self.failures.add_handler {
            return Err(BusError::Subscribe("Mock handler registration failure".to_string()));
        }
        self.handlers.register(name, handler).await?;
        Ok(())
    }

    async fn start_listening(&self) -> Result<()> {
        if self.failures.start {
            return Err(BusError::Connection("Mock listen failure".to_string()));
        }
        let mut listening = self.listening.write().await;
        if *listening {
            return Err(BusError::AlreadyListening);
        }
        *listening = true;
        Ok(())
    }

    async fn shutdown(&self) -> Result<()> {
        if self.failures.shutdown {
            return Err(BusError::Connection("Mock shutdown failure".to_string()));
        }
        *self.closed.write().await = true;
        Ok(())
    }
}
