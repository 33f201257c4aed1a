//! Webhook role: the commands a webhook instance reacts to.
//!
//! Each command kind is bound to one [`WebhookActions`] method. Package
//! commands read `packageName` (required) and `packageVersion` (optional)
//! from the payload.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tracing::info;

use super::dispatch::{
    ActionError, CommandAction, CommandDispatcher, CommandRoute, DispatchMode, DispatchTable,
};
use crate::protocol::{commands, CommandMessage};

/// Role name used in logs and dispatch tables.
pub const ROLE: &str = "webhook";

const LICENSE_DEBOUNCE: Duration = Duration::from_millis(500);
const DEFAULT_DEBOUNCE: Duration = Duration::from_millis(200);

/// Operations a webhook instance performs on command.
#[async_trait]
pub trait WebhookActions: Send + Sync {
    async fn reload_license(&self) -> Result<(), ActionError>;

    async fn restart_event_bus(&self) -> Result<(), ActionError>;

    async fn reload_external_secrets_providers(&self) -> Result<(), ActionError>;

    /// Install `name`, or update it if already installed. `None` means latest.
    async fn install_or_update_package(
        &self,
        name: &str,
        version: Option<&str>,
    ) -> Result<(), ActionError>;

    async fn remove_package(&self, name: &str) -> Result<(), ActionError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum WebhookCommand {
    ReloadLicense,
    RestartEventBus,
    ReloadExternalSecretsProviders,
    InstallPackage,
    UpdatePackage,
    UninstallPackage,
}

impl WebhookCommand {
    const ALL: [WebhookCommand; 6] = [
        WebhookCommand::ReloadLicense,
        WebhookCommand::RestartEventBus,
        WebhookCommand::ReloadExternalSecretsProviders,
        WebhookCommand::InstallPackage,
        WebhookCommand::UpdatePackage,
        WebhookCommand::UninstallPackage,
    ];

    fn kind(self) -> &'static str {
        match self {
            WebhookCommand::ReloadLicense => commands::RELOAD_LICENSE,
            WebhookCommand::RestartEventBus => commands::RESTART_EVENT_BUS,
            WebhookCommand::ReloadExternalSecretsProviders => {
                commands::RELOAD_EXTERNAL_SECRETS_PROVIDERS
            }
            WebhookCommand::InstallPackage => commands::COMMUNITY_PACKAGE_INSTALL,
            WebhookCommand::UpdatePackage => commands::COMMUNITY_PACKAGE_UPDATE,
            WebhookCommand::UninstallPackage => commands::COMMUNITY_PACKAGE_UNINSTALL,
        }
    }

    fn debounce(self) -> Duration {
        match self {
            WebhookCommand::ReloadLicense => LICENSE_DEBOUNCE,
            _ => DEFAULT_DEBOUNCE,
        }
    }
}

/// Adapts one webhook command to the generic [`CommandAction`].
struct WebhookAction {
    command: WebhookCommand,
    actions: Arc<dyn WebhookActions>,
}

#[async_trait]
impl CommandAction for WebhookAction {
    async fn execute(&self, message: &CommandMessage) -> Result<(), ActionError> {
        match self.command {
            WebhookCommand::ReloadLicense => self.actions.reload_license().await,
            WebhookCommand::RestartEventBus => self.actions.restart_event_bus().await,
            WebhookCommand::ReloadExternalSecretsProviders => {
                self.actions.reload_external_secrets_providers().await
            }
            WebhookCommand::InstallPackage | WebhookCommand::UpdatePackage => {
                let name = package_name(message)?;
                self.actions
                    .install_or_update_package(name, message.payload_str("packageVersion"))
                    .await
            }
            WebhookCommand::UninstallPackage => {
                let name = package_name(message)?;
                self.actions.remove_package(name).await
            }
        }
    }
}

fn package_name(message: &CommandMessage) -> Result<&str, ActionError> {
    message
        .payload_str("packageName")
        .filter(|name| !name.is_empty())
        .ok_or_else(|| {
            ActionError::InvalidPayload(format!("{} requires payload.packageName", message.command))
        })
}

/// Dispatch table for the webhook role.
pub fn dispatch_table(actions: Arc<dyn WebhookActions>) -> DispatchTable {
    WebhookCommand::ALL
        .into_iter()
        .fold(DispatchTable::new(ROLE), |table, command| {
            let action = WebhookAction {
                command,
                actions: Arc::clone(&actions),
            };
            table.route(
                command.kind(),
                CommandRoute::new(action).debounce(command.debounce()),
            )
        })
}

/// Dispatcher running the webhook table for `instance_id`.
pub fn dispatcher(
    actions: Arc<dyn WebhookActions>,
    instance_id: impl Into<String>,
    mode: DispatchMode,
) -> CommandDispatcher {
    CommandDispatcher::new(dispatch_table(actions), instance_id, mode)
}

/// [`WebhookActions`] that only logs what it was asked to do.
///
/// Stands in for the real subsystems when running the webhook binary on its
/// own.
#[derive(Debug, Clone, Default)]
pub struct TracingWebhookActions;

#[async_trait]
impl WebhookActions for TracingWebhookActions {
    async fn reload_license(&self) -> Result<(), ActionError> {
        info!(role = ROLE, "Reloading license");
        Ok(())
    }

    async fn restart_event_bus(&self) -> Result<(), ActionError> {
        info!(role = ROLE, "Restarting event bus");
        Ok(())
    }

    async fn reload_external_secrets_providers(&self) -> Result<(), ActionError> {
        info!(role = ROLE, "Reloading external secrets providers");
        Ok(())
    }

    async fn install_or_update_package(
        &self,
        name: &str,
        version: Option<&str>,
    ) -> Result<(), ActionError> {
        info!(role = ROLE, package = %name, version = ?version, "Installing or updating package");
        Ok(())
    }

    async fn remove_package(&self, name: &str) -> Result<(), ActionError> {
        info!(role = ROLE, package = %name, "Removing package");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::sync::broadcast;

    use crate::orchestration::{CommandSink, DispatchHandle, DispatchOutcome};
    use crate::test_utils::{next_outcome, RecordingWebhookActions};

    fn start(
        actions: &RecordingWebhookActions,
    ) -> (DispatchHandle, broadcast::Receiver<DispatchOutcome>) {
        let dispatcher = dispatcher(Arc::new(actions.clone()), "webhook-1", DispatchMode::Serial);
        let outcomes = dispatcher.subscribe_outcomes();
        (dispatcher.spawn(), outcomes)
    }

    #[test]
    fn test_table_covers_webhook_commands() {
        let table = dispatch_table(Arc::new(TracingWebhookActions));

        assert_eq!(table.role(), ROLE);
        assert_eq!(
            table.commands(),
            vec![
                "community-package-install",
                "community-package-uninstall",
                "community-package-update",
                "reloadExternalSecretsProviders",
                "reloadLicense",
                "restartEventBus",
            ]
        );
    }

    #[test]
    fn test_debounce_windows() {
        let table = dispatch_table(Arc::new(TracingWebhookActions));

        let license = table.get(commands::RELOAD_LICENSE).unwrap();
        assert_eq!(license.debounce_window(), Some(Duration::from_millis(500)));
        let bus = table.get(commands::RESTART_EVENT_BUS).unwrap();
        assert_eq!(bus.debounce_window(), Some(Duration::from_millis(200)));
        assert!(table
            .commands()
            .iter()
            .all(|c| !table.get(c).unwrap().allows_self_send()));
    }

    #[tokio::test]
    async fn test_reload_license_runs_action() {
        let actions = RecordingWebhookActions::new();
        let (handle, mut outcomes) = start(&actions);

        handle.submit(r#"{"command":"reloadLicense"}"#.to_string());

        assert_eq!(
            next_outcome(&mut outcomes).await,
            DispatchOutcome::Executed {
                command: "reloadLicense".to_string()
            }
        );
        assert_eq!(actions.calls(), vec!["reload_license"]);
    }

    #[tokio::test]
    async fn test_package_commands_read_payload() {
        let actions = RecordingWebhookActions::new();
        let (handle, mut outcomes) = start(&actions);

        handle.submit(
            r#"{"command":"community-package-install","payload":{"packageName":"n8n-nodes-foo","packageVersion":"1.2.0"}}"#
                .to_string(),
        );
        next_outcome(&mut outcomes).await;
        handle.submit(
            r#"{"command":"community-package-update","payload":{"packageName":"n8n-nodes-bar"}}"#
                .to_string(),
        );
        next_outcome(&mut outcomes).await;
        handle.submit(
            r#"{"command":"community-package-uninstall","payload":{"packageName":"n8n-nodes-foo"}}"#
                .to_string(),
        );
        next_outcome(&mut outcomes).await;

        assert_eq!(
            actions.calls(),
            vec![
                "install_or_update_package n8n-nodes-foo 1.2.0",
                "install_or_update_package n8n-nodes-bar latest",
                "remove_package n8n-nodes-foo",
            ]
        );
    }

    #[tokio::test]
    async fn test_package_command_without_name_fails() {
        let actions = RecordingWebhookActions::new();
        let (handle, mut outcomes) = start(&actions);

        handle.submit(r#"{"command":"community-package-uninstall","payload":{}}"#.to_string());

        match next_outcome(&mut outcomes).await {
            DispatchOutcome::Failed { command, error } => {
                assert_eq!(command, "community-package-uninstall");
                assert!(error.contains("packageName"));
            }
            other => panic!("expected failure, got {:?}", other),
        }
        assert!(actions.calls().is_empty());
    }

    #[tokio::test]
    async fn test_worker_commands_unsupported_for_webhook() {
        let actions = RecordingWebhookActions::new();
        let (handle, mut outcomes) = start(&actions);

        handle.submit(r#"{"command":"getWorkerStatus"}"#.to_string());

        assert_eq!(
            next_outcome(&mut outcomes).await,
            DispatchOutcome::Unsupported {
                command: "getWorkerStatus".to_string()
            }
        );
    }
}
