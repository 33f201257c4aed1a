//! Command dispatch: decode, route, execute.
//!
//! A [`DispatchTable`] maps command kinds to actions for one instance role.
//! [`CommandDispatcher::spawn`] starts a worker that owns the table and
//! returns a [`DispatchHandle`], the one-way sink the orchestration handler
//! submits raw messages to. Results never flow back through the sink; they
//! are logged and broadcast as [`DispatchOutcome`]s.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use tokio::sync::{broadcast, mpsc};
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

use super::CommandSink;
use crate::protocol::CommandMessage;

/// Capacity of the outcome broadcast channel.
const OUTCOME_CAPACITY: usize = 256;

/// Errors raised by command actions.
#[derive(Debug, thiserror::Error)]
pub enum ActionError {
    #[error("Invalid payload: {0}")]
    InvalidPayload(String),

    #[error("{0}")]
    Failed(String),
}

/// An action an instance role runs for one command kind.
#[async_trait]
pub trait CommandAction: Send + Sync {
    async fn execute(&self, command: &CommandMessage) -> Result<(), ActionError>;
}

/// How accepted commands are scheduled relative to each other.
///
/// The transport gives no ordering guarantee, so this choice is always
/// explicit.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DispatchMode {
    /// Each command runs in its own task; actions must tolerate overlap.
    #[default]
    Concurrent,
    /// One command at a time, in arrival order.
    Serial,
}

/// Routing entry for one command kind.
#[derive(Clone)]
pub struct CommandRoute {
    action: Arc<dyn CommandAction>,
    debounce: Option<Duration>,
    allow_self_send: bool,
}

impl CommandRoute {
    pub fn new(action: impl CommandAction + 'static) -> Self {
        Self {
            action: Arc::new(action),
            debounce: None,
            allow_self_send: false,
        }
    }

    /// Drop repeats of this command arriving within `window` of the last accepted one.
    pub fn debounce(mut self, window: Duration) -> Self {
        self.debounce = Some(window);
        self
    }

    /// Also run this command when this instance published it.
    pub fn allow_self_send(mut self) -> Self {
        self.allow_self_send = true;
        self
    }

    pub fn debounce_window(&self) -> Option<Duration> {
        self.debounce
    }

    pub fn allows_self_send(&self) -> bool {
        self.allow_self_send
    }
}

/// Mapping from command kind to the action a role runs for it.
#[derive(Clone)]
pub struct DispatchTable {
    role: String,
    routes: HashMap<String, CommandRoute>,
}

impl DispatchTable {
    pub fn new(role: impl Into<String>) -> Self {
        Self {
            role: role.into(),
            routes: HashMap::new(),
        }
    }

    /// Add a route. A later route for the same kind replaces the earlier one.
    pub fn route(mut self, command: impl Into<String>, route: CommandRoute) -> Self {
        self.routes.insert(command.into(), route);
        self
    }

    pub fn role(&self) -> &str {
        &self.role
    }

    pub fn get(&self, command: &str) -> Option<&CommandRoute> {
        self.routes.get(command)
    }

    /// Supported command kinds, sorted.
    pub fn commands(&self) -> Vec<&str> {
        let mut commands: Vec<&str> = self.routes.keys().map(String::as_str).collect();
        commands.sort_unstable();
        commands
    }
}

/// Why an addressed-elsewhere command was skipped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    /// Published by this instance.
    SelfSent,
    /// `targets` does not include this instance.
    NotTargeted,
}

impl fmt::Display for SkipReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SkipReason::SelfSent => f.write_str("sent by this instance"),
            SkipReason::NotTargeted => f.write_str("not targeted at this instance"),
        }
    }
}

/// What happened to one submitted message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DispatchOutcome {
    Executed { command: String },
    Failed { command: String, error: String },
    DecodeFailed { error: String },
    Unsupported { command: String },
    Skipped { command: String, reason: SkipReason },
    Debounced { command: String },
}

impl DispatchOutcome {
    /// The command kind, when the message decoded.
    pub fn command(&self) -> Option<&str> {
        match self {
            DispatchOutcome::Executed { command }
            | DispatchOutcome::Failed { command, .. }
            | DispatchOutcome::Unsupported { command }
            | DispatchOutcome::Skipped { command, .. }
            | DispatchOutcome::Debounced { command } => Some(command),
            DispatchOutcome::DecodeFailed { .. } => None,
        }
    }
}

/// Last accepted time per command kind.
#[derive(Debug, Default)]
struct Debouncer {
    last_accepted: HashMap<String, Instant>,
}

impl Debouncer {
    /// Returns `false` if `command` was accepted less than `window` ago.
    fn accept(&mut self, command: &str, window: Duration, now: Instant) -> bool {
        if let Some(last) = self.last_accepted.get(command) {
            if now.saturating_duration_since(*last) < window {
                return false;
            }
        }
        self.last_accepted.insert(command.to_string(), now);
        true
    }
}

/// Owns a role's dispatch table and runs its commands.
pub struct CommandDispatcher {
    table: Arc<DispatchTable>,
    instance_id: String,
    mode: DispatchMode,
    outcomes: broadcast::Sender<DispatchOutcome>,
}

impl CommandDispatcher {
    pub fn new(table: DispatchTable, instance_id: impl Into<String>, mode: DispatchMode) -> Self {
        let (outcomes, _) = broadcast::channel(OUTCOME_CAPACITY);
        Self {
            table: Arc::new(table),
            instance_id: instance_id.into(),
            mode,
            outcomes,
        }
    }

    /// Receive outcomes of every message dispatched from now on.
    pub fn subscribe_outcomes(&self) -> broadcast::Receiver<DispatchOutcome> {
        self.outcomes.subscribe()
    }

    /// Start the dispatch worker.
    ///
    /// The worker stops once every [`DispatchHandle`] is dropped. Commands
    /// already running keep going in their own tasks.
    pub fn spawn(self) -> DispatchHandle {
        let (tx, mut rx) = mpsc::unbounded_channel::<String>();
        let role: Arc<str> = Arc::from(self.table.role());

        info!(
            role = %self.table.role(),
            instance_id = %self.instance_id,
            mode = ?self.mode,
            commands = ?self.table.commands(),
            "Command dispatcher started"
        );

        let outcomes = self.outcomes.clone();
        tokio::spawn(async move {
            let mut debouncer = Debouncer::default();
            while let Some(raw) = rx.recv().await {
                let Some((message, route)) = self.accept(&raw, &mut debouncer) else {
                    continue;
                };
                let run = run_action(
                    Arc::clone(&route.action),
                    message,
                    self.outcomes.clone(),
                );
                match self.mode {
                    DispatchMode::Serial => run.await,
                    DispatchMode::Concurrent => {
                        tokio::spawn(run);
                    }
                }
            }
            debug!(role = %self.table.role(), "Command dispatcher stopped");
        });

        DispatchHandle {
            tx,
            role,
            outcomes,
        }
    }

    /// Decode and route one raw message, reporting anything that stops it.
    fn accept(
        &self,
        raw: &str,
        debouncer: &mut Debouncer,
    ) -> Option<(CommandMessage, CommandRoute)> {
        let role = self.table.role();

        let message = match CommandMessage::decode(raw) {
            Ok(message) => message,
            Err(e) => {
                error!(role = %role, error = %e, "Failed to decode command message");
                self.report(DispatchOutcome::DecodeFailed {
                    error: e.to_string(),
                });
                return None;
            }
        };
        let command = message.command.clone();
        debug!(
            role = %role,
            command = %command,
            sender_id = ?message.sender_id,
            "Received command message"
        );

        let route = self.table.get(&command);
        let allow_self_send = route.map(CommandRoute::allows_self_send).unwrap_or(false);
        let skip = if !allow_self_send && message.is_sent_by(&self.instance_id) {
            Some(SkipReason::SelfSent)
        } else if !message.is_addressed_to(&self.instance_id) {
            Some(SkipReason::NotTargeted)
        } else {
            None
        };
        if let Some(reason) = skip {
            debug!(role = %role, command = %command, reason = %reason, "Skipping command");
            self.report(DispatchOutcome::Skipped { command, reason });
            return None;
        }

        let Some(route) = route else {
            warn!(role = %role, command = %command, "Unsupported command for this role");
            self.report(DispatchOutcome::Unsupported { command });
            return None;
        };

        if let Some(window) = route.debounce {
            if !debouncer.accept(&command, window, Instant::now()) {
                debug!(role = %role, command = %command, window = ?window, "Debounced command");
                self.report(DispatchOutcome::Debounced { command });
                return None;
            }
        }

        Some((message, route.clone()))
    }

    fn report(&self, outcome: DispatchOutcome) {
        // No receivers is fine
        let _ = self.outcomes.send(outcome);
    }
}

/// Run one action in its own task so a panic cannot take the worker down.
async fn run_action(
    action: Arc<dyn CommandAction>,
    message: CommandMessage,
    outcomes: broadcast::Sender<DispatchOutcome>,
) {
    let command = message.command.clone();
    let task = tokio::spawn(async move { action.execute(&message).await });

    let outcome = match task.await {
        Ok(Ok(())) => {
            info!(command = %command, "Command executed");
            DispatchOutcome::Executed { command }
        }
        Ok(Err(e)) => {
            error!(command = %command, error = %e, "Command failed");
            DispatchOutcome::Failed {
                command,
                error: e.to_string(),
            }
        }
        Err(e) => {
            error!(command = %command, error = %e, "Command action panicked");
            DispatchOutcome::Failed {
                command,
                error: format!("action panicked: {}", e),
            }
        }
    };
    let _ = outcomes.send(outcome);
}

/// Submission side of a running [`CommandDispatcher`].
#[derive(Clone)]
pub struct DispatchHandle {
    tx: mpsc::UnboundedSender<String>,
    role: Arc<str>,
    outcomes: broadcast::Sender<DispatchOutcome>,
}

impl DispatchHandle {
    pub fn role(&self) -> &str {
        &self.role
    }

    /// Receive outcomes of every message dispatched from now on.
    pub fn subscribe_outcomes(&self) -> broadcast::Receiver<DispatchOutcome> {
        self.outcomes.subscribe()
    }
}

impl CommandSink for DispatchHandle {
    fn submit(&self, raw: String) {
        if self.tx.send(raw).is_err() {
            warn!(role = %self.role, "Command dispatcher stopped, dropping message");
        }
    }
}
