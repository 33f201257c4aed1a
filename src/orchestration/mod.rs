//! Cross-instance command orchestration.
//!
//! An [`OrchestrationHandler`] gives an instance role the ability to receive
//! cluster-wide commands. It owns one subscriber connection, subscribes it to
//! the command channel, and registers a single receiver that forwards raw
//! command text to the role's [`CommandSink`]. Decoding and execution live in
//! [`dispatch`]; role-specific tables live in role modules such as
//! [`webhook`].
//!
//! Lifecycle is an explicit state machine:
//!
//! ```text
//! Uninitialized --init_subscriber--> Subscribing --ok--> Subscribed --shutdown--> Closed
//!                                         |
//!                                         +--transport error--> Failed
//! any state but Uninitialized --init_subscriber--> Failed (AlreadyInitialized)
//! ```

pub mod dispatch;
pub mod webhook;

pub use dispatch::{
    ActionError, CommandAction, CommandDispatcher, CommandRoute, DispatchHandle, DispatchMode,
    DispatchOutcome, DispatchTable, SkipReason,
};
pub use webhook::{TracingWebhookActions, WebhookActions};

use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use futures::future::BoxFuture;
use tracing::{debug, error, info, warn};

use crate::bus::{self, BusError, BusMessage, MessageHandler, PubSubClient, Subscriber};
use crate::protocol::CommandChannel;

/// Name the command receiver is registered under on the subscriber.
pub const ORCHESTRATION_HANDLER_NAME: &str = "OrchestrationMessageReceiver";

/// Result type for orchestration operations.
pub type Result<T> = std::result::Result<T, OrchestrationError>;

/// Errors from the orchestration handler lifecycle.
#[derive(Debug, thiserror::Error)]
pub enum OrchestrationError {
    #[error("init_subscriber called while {state}; a second subscription would process every command twice")]
    AlreadyInitialized { state: HandlerState },

    #[error("Transport error: {0}")]
    Transport(#[from] BusError),
}

/// Lifecycle of an [`OrchestrationHandler`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HandlerState {
    Uninitialized,
    Subscribing,
    Subscribed,
    Failed(String),
    Closed,
}

impl fmt::Display for HandlerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HandlerState::Uninitialized => f.write_str("uninitialized"),
            HandlerState::Subscribing => f.write_str("subscribing"),
            HandlerState::Subscribed => f.write_str("subscribed"),
            HandlerState::Failed(reason) => write!(f, "failed ({})", reason),
            HandlerState::Closed => f.write_str("closed"),
        }
    }
}

/// One-way submission of raw command text to a dispatch layer.
///
/// Implementations must not block and must not fail back to the caller:
/// errors belong to the dispatch layer's own reporting.
pub trait CommandSink: Send + Sync {
    fn submit(&self, raw: String);
}

/// Transport handler that forwards command channel messages to a sink.
///
/// Messages on any other channel are ignored, so the subscriber connection
/// can carry other channels without affecting command processing.
pub struct CommandChannelReceiver {
    channel: CommandChannel,
    sink: Arc<dyn CommandSink>,
}

impl CommandChannelReceiver {
    pub fn new(channel: CommandChannel, sink: Arc<dyn CommandSink>) -> Self {
        Self { channel, sink }
    }
}

impl MessageHandler for CommandChannelReceiver {
    fn handle(&self, message: Arc<BusMessage>) -> BoxFuture<'static, bus::Result<()>> {
        if self.channel.matches(&message.channel) {
            self.sink.submit(message.payload.clone());
        } else {
            debug!(channel = %message.channel, "Ignoring message on non-command channel");
        }
        Box::pin(async { Ok(()) })
    }
}

/// Receives cluster-wide commands for one instance role.
pub struct OrchestrationHandler {
    client: Arc<dyn PubSubClient>,
    channel: CommandChannel,
    sink: Arc<dyn CommandSink>,
    state: Mutex<HandlerState>,
    subscriber: Mutex<Option<Arc<dyn Subscriber>>>,
}

impl OrchestrationHandler {
    pub fn new(
        client: Arc<dyn PubSubClient>,
        channel: CommandChannel,
        sink: Arc<dyn CommandSink>,
    ) -> Self {
        Self {
            client,
            channel,
            sink,
            state: Mutex::new(HandlerState::Uninitialized),
            subscriber: Mutex::new(None),
        }
    }

    pub fn channel(&self) -> &CommandChannel {
        &self.channel
    }

    pub fn state(&self) -> HandlerState {
        self.state_guard().clone()
    }

    /// Subscribe to the command channel and start receiving commands.
    ///
    /// Call at most once. Any later call fails with
    /// [`OrchestrationError::AlreadyInitialized`] and moves the handler to
    /// `Failed`; the existing subscription keeps running. Transport failures
    /// are returned as-is; retrying is up to the caller.
    pub async fn init_subscriber(&self) -> Result<()> {
        self.begin_subscribing()?;

        match self.connect().await {
            Ok(subscriber) => {
                *self.subscriber_guard() = Some(subscriber);
                self.finish_subscribing(HandlerState::Subscribed);
                info!(
                    channel = %self.channel,
                    handler = ORCHESTRATION_HANDLER_NAME,
                    "Subscribed to command channel"
                );
                Ok(())
            }
            Err(e) => {
                error!(channel = %self.channel, error = %e, "Failed to subscribe to command channel");
                self.finish_subscribing(HandlerState::Failed(e.to_string()));
                Err(e.into())
            }
        }
    }

    /// Close the subscriber connection. Dispatches already submitted are not
    /// waited for.
    ///
    /// The handler is `Closed` afterwards even if the transport reports an
    /// error while closing.
    pub async fn shutdown(&self) -> Result<()> {
        let subscriber = self.subscriber_guard().take();
        *self.state_guard() = HandlerState::Closed;
        if let Some(subscriber) = subscriber {
            subscriber.shutdown().await?;
            info!(channel = %self.channel, "Command subscriber closed");
        }
        Ok(())
    }

    fn begin_subscribing(&self) -> Result<()> {
        let mut state = self.state_guard();
        if *state == HandlerState::Uninitialized {
            *state = HandlerState::Subscribing;
            return Ok(());
        }

        let previous = state.clone();
        warn!(state = %previous, "init_subscriber called more than once");
        *state = HandlerState::Failed(format!("init_subscriber called again while {}", previous));
        Err(OrchestrationError::AlreadyInitialized { state: previous })
    }

    /// Leave `Subscribing`, unless a repeat call already marked the handler failed.
    fn finish_subscribing(&self, next: HandlerState) {
        let mut state = self.state_guard();
        if *state == HandlerState::Subscribing {
            *state = next;
        }
    }

    async fn connect(&self) -> bus::Result<Arc<dyn Subscriber>> {
        let subscriber = self.client.subscriber().await?;

        if let Err(e) = self.register(subscriber.as_ref()).await {
            // Release the half-configured connection
            if let Err(close_err) = subscriber.shutdown().await {
                warn!(error = %close_err, "Failed to close subscriber after setup error");
            }
            return Err(e);
        }

        Ok(subscriber)
    }

    async fn register(&self, subscriber: &dyn Subscriber) -> bus::Result<()> {
        subscriber.subscribe(self.channel.name()).await?;
        let receiver = CommandChannelReceiver::new(self.channel.clone(), Arc::clone(&self.sink));
        subscriber
            .add_message_handler(ORCHESTRATION_HANDLER_NAME, Arc::new(receiver))
            .await?;
        subscriber.start_listening().await
    }

    fn state_guard(&self) -> MutexGuard<'_, HandlerState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn subscriber_guard(&self) -> MutexGuard<'_, Option<Arc<dyn Subscriber>>> {
        self.subscriber.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
