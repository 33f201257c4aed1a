//! Shared helpers for integration tests.

#![allow(dead_code)]

use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;

use herald::orchestration::{ActionError, CommandSink, WebhookActions};

/// Time given to listener and dispatch tasks to drain.
pub async fn settle() {
    tokio::time::sleep(Duration::from_millis(100)).await;
}

/// Unique channel name so concurrent runs against a shared broker don't mix.
pub fn unique_channel(prefix: &str) -> String {
    format!("{}.{}", prefix, &uuid::Uuid::new_v4().simple().to_string()[..8])
}

#[derive(Clone, Default)]
pub struct RecordingSink {
    submitted: Arc<Mutex<Vec<String>>>,
}

impl RecordingSink {
    pub fn submitted(&self) -> Vec<String> {
        self.submitted.lock().unwrap().clone()
    }
}

impl CommandSink for RecordingSink {
    fn submit(&self, raw: String) {
        self.submitted.lock().unwrap().push(raw);
    }
}

/// Counts license reloads; every other action is a no-op.
#[derive(Clone, Default)]
pub struct CountingWebhookActions {
    license_reloads: Arc<Mutex<usize>>,
}

impl CountingWebhookActions {
    pub fn license_reloads(&self) -> usize {
        *self.license_reloads.lock().unwrap()
    }
}

#[async_trait]
impl WebhookActions for CountingWebhookActions {
    async fn reload_license(&self) -> Result<(), ActionError> {
        *self.license_reloads.lock().unwrap() += 1;
        Ok(())
    }

    async fn restart_event_bus(&self) -> Result<(), ActionError> {
        Ok(())
    }

    async fn reload_external_secrets_providers(&self) -> Result<(), ActionError> {
        Ok(())
    }

    async fn install_or_update_package(
        &self,
        _name: &str,
        _version: Option<&str>,
    ) -> Result<(), ActionError> {
        Ok(())
    }

    async fn remove_package(&self, _name: &str) -> Result<(), ActionError> {
        Ok(())
    }
}
