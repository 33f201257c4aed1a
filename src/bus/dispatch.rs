//! Handler registry and dispatch.
//!
//! Every transport keeps its registered handlers in a [`HandlerRegistry`] and
//! fans each delivered message out to all of them.

use std::sync::Arc;

use tokio::sync::RwLock;
use tracing::{debug, error};

use super::{BusError, BusMessage, MessageHandler, Result};

/// A named handler attached to a subscriber.
struct Registration {
    name: String,
    handler: Arc<dyn MessageHandler>,
}

/// Named message handlers attached to one subscriber connection.
#[derive(Default, Clone)]
pub struct HandlerRegistry {
    handlers: Arc<RwLock<Vec<Registration>>>,
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a handler. Returns the number of registered handlers.
    ///
    /// A name that is already present is rejected; the existing handler stays.
    pub async fn register(&self, name: &str, handler: Arc<dyn MessageHandler>) -> Result<usize> {
        let mut handlers = self.handlers.write().await;
        if handlers.iter().any(|r| r.name == name) {
            return Err(BusError::DuplicateHandler {
                name: name.to_string(),
            });
        }
        handlers.push(Registration {
            name: name.to_string(),
            handler,
        });
        Ok(handlers.len())
    }

    pub async fn len(&self) -> usize {
        self.handlers.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.handlers.read().await.is_empty()
    }

    pub async fn names(&self) -> Vec<String> {
        self.handlers
            .read()
            .await
            .iter()
            .map(|r| r.name.clone())
            .collect()
    }

    /// Dispatch a message to all registered handlers.
    ///
    /// Calls each handler in registration order, logging errors but continuing
    /// to subsequent handlers. Returns `true` if all handlers succeeded.
    pub async fn dispatch(&self, message: &Arc<BusMessage>) -> bool {
        // Snapshot under the read lock, then release before awaiting handlers
        let handlers: Vec<(String, Arc<dyn MessageHandler>)> = {
            let guard = self.handlers.read().await;
            guard
                .iter()
                .map(|r| (r.name.clone(), Arc::clone(&r.handler)))
                .collect()
        };

        let mut all_succeeded = true;
        for (name, handler) in handlers {
            if let Err(e) = handler.handle(Arc::clone(message)).await {
                error!(
                    handler = %name,
                    channel = %message.channel,
                    error = %e,
                    "Handler failed"
                );
                all_succeeded = false;
            } else {
                debug!(handler = %name, channel = %message.channel, "Handler completed");
            }
        }

        all_succeeded
    }
}
