//! Test utilities and recording implementations.
//!
//! Recording doubles for the transport handler, the command sink and role
//! actions, so unit tests can assert on exactly what crossed each boundary.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use futures::future::BoxFuture;
use tokio::sync::broadcast;

use crate::bus::{BusMessage, MessageHandler, Result as BusResult};
use crate::orchestration::{
    ActionError, CommandAction, CommandSink, DispatchOutcome, WebhookActions,
};
use crate::protocol::CommandMessage;

/// Time given to spawned tasks to drain their queues.
const SETTLE: Duration = Duration::from_millis(50);

/// Let spawned listener and dispatch tasks run.
pub async fn settle() {
    tokio::time::sleep(SETTLE).await;
}

/// Wait for the next dispatch outcome, failing the test after one second.
pub async fn next_outcome(rx: &mut broadcast::Receiver<DispatchOutcome>) -> DispatchOutcome {
    tokio::time::timeout(Duration::from_secs(1), rx.recv())
        .await
        .expect("timed out waiting for dispatch outcome")
        .expect("outcome channel closed")
}

/// Transport handler that records every message it is given.
#[derive(Clone, Default)]
pub struct RecordingHandler {
    received: Arc<Mutex<Vec<BusMessage>>>,
}

impl RecordingHandler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn received(&self) -> Vec<BusMessage> {
        self.received.lock().unwrap().clone()
    }

    pub fn payloads(&self) -> Vec<String> {
        self.received().into_iter().map(|m| m.payload).collect()
    }
}

impl MessageHandler for RecordingHandler {
    fn handle(&self, message: Arc<BusMessage>) -> BoxFuture<'static, BusResult<()>> {
        self.received.lock().unwrap().push((*message).clone());
        Box::pin(async { Ok(()) })
    }
}

/// Command sink that records submitted raw messages instead of dispatching.
#[derive(Clone, Default)]
pub struct RecordingSink {
    submitted: Arc<Mutex<Vec<String>>>,
}

impl RecordingSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn submitted(&self) -> Vec<String> {
        self.submitted.lock().unwrap().clone()
    }
}

impl CommandSink for RecordingSink {
    fn submit(&self, raw: String) {
        self.submitted.lock().unwrap().push(raw);
    }
}

/// Action that records the commands it ran, optionally after a delay.
#[derive(Clone, Default)]
pub struct RecordingAction {
    calls: Arc<Mutex<Vec<CommandMessage>>>,
    delay: Option<Duration>,
}

impl RecordingAction {
    pub fn new() -> Self {
        Self::default()
    }

    /// Share the call log with `self` but wait `delay` before recording.
    pub fn delayed(&self, delay: Duration) -> Self {
        Self {
            calls: Arc::clone(&self.calls),
            delay: Some(delay),
        }
    }

    pub fn calls(&self) -> Vec<CommandMessage> {
        self.calls.lock().unwrap().clone()
    }

    pub fn commands(&self) -> Vec<String> {
        self.calls().into_iter().map(|c| c.command).collect()
    }
}

#[async_trait]
impl CommandAction for RecordingAction {
    async fn execute(&self, command: &CommandMessage) -> Result<(), ActionError> {
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        self.calls.lock().unwrap().push(command.clone());
        Ok(())
    }
}

/// Action that always fails.
pub struct FailingAction;

#[async_trait]
impl CommandAction for FailingAction {
    async fn execute(&self, _command: &CommandMessage) -> Result<(), ActionError> {
        Err(ActionError::Failed("license server unreachable".to_string()))
    }
}

/// Action that panics.
pub struct PanickingAction;

#[async_trait]
impl CommandAction for PanickingAction {
    async fn execute(&self, _command: &CommandMessage) -> Result<(), ActionError> {
        panic!("action blew up");
    }
}

/// Webhook role collaborator that records calls by name.
#[derive(Clone, Default)]
pub struct RecordingWebhookActions {
    calls: Arc<Mutex<Vec<String>>>,
}

impl RecordingWebhookActions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    fn record(&self, call: String) -> Result<(), ActionError> {
        self.calls.lock().unwrap().push(call);
        Ok(())
    }
}

#[async_trait]
impl WebhookActions for RecordingWebhookActions {
    async fn reload_license(&self) -> Result<(), ActionError> {
        self.record("reload_license".to_string())
    }

    async fn restart_event_bus(&self) -> Result<(), ActionError> {
        self.record("restart_event_bus".to_string())
    }

    async fn reload_external_secrets_providers(&self) -> Result<(), ActionError> {
        self.record("reload_external_secrets_providers".to_string())
    }

    async fn install_or_update_package(
        &self,
        name: &str,
        version: Option<&str>,
    ) -> Result<(), ActionError> {
        self.record(format!(
            "install_or_update_package {} {}",
            name,
            version.unwrap_or("latest")
        ))
    }

    async fn remove_package(&self, name: &str) -> Result<(), ActionError> {
        self.record(format!("remove_package {}", name))
    }
}
