//! Durable queue of actuator commands, polled and acknowledged by gateways.
//!
//! Delayed commands need no timer thread: a command becomes visible purely
//! by the `execute_after <= now` filter evaluated at poll time.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use uuid::Uuid;

use super::rules::CommandKind;
use crate::error::Error;
use crate::store::{CommandStatus, PendingCommand, Store};
use crate::telemetry::PayloadMap;

/// Upper bound on commands returned per poll.
pub const MAX_COMMANDS_PER_POLL: usize = 25;

/// Acknowledgment outcomes a gateway may report.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AckStatus {
    Sent,
    Failed,
}

impl From<AckStatus> for CommandStatus {
    fn from(status: AckStatus) -> Self {
        match status {
            AckStatus::Sent => CommandStatus::Sent,
            AckStatus::Failed => CommandStatus::Failed,
        }
    }
}

/// Wire shape of a due command handed to a polling gateway.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DueCommand {
    pub id: String,
    pub device_identifier: String,
    pub command: PayloadMap,
}

/// Expand a logical command into the payload target devices interpret.
/// The queue itself is payload-agnostic.
pub fn command_payload(kind: CommandKind) -> PayloadMap {
    let value = match kind {
        CommandKind::TurnOn => json!({ "state": "ON", "fx": "ON" }),
        CommandKind::TurnOff => json!({ "state": "OFF", "fx": "OFF" }),
        CommandKind::Toggle => json!({ "toggle": true }),
    };
    match value {
        Value::Object(map) => map,
        _ => PayloadMap::new(),
    }
}

/// Queue operations over the backing store.
#[derive(Clone)]
pub struct CommandQueue {
    store: Arc<dyn Store>,
}

impl CommandQueue {
    pub fn new(store: Arc<dyn Store>) -> Self {
        Self { store }
    }

    /// Insert one pending command, returning its id.
    #[allow(clippy::too_many_arguments)]
    pub async fn enqueue(
        &self,
        home_id: &str,
        gateway_identifier: &str,
        device_identifier: &str,
        kind: CommandKind,
        automation_id: Option<&str>,
        execute_after: i64,
        now: i64,
    ) -> Result<String, Error> {
        let command = PendingCommand {
            id: Uuid::new_v4().to_string(),
            home_id: home_id.to_string(),
            gateway_identifier: gateway_identifier.to_string(),
            device_identifier: device_identifier.to_string(),
            command: command_payload(kind),
            status: CommandStatus::Pending,
            automation_id: automation_id.map(str::to_string),
            execute_after,
            created_at: now,
            sent_at: None,
            error: None,
        };
        let id = command.id.clone();
        self.store.insert_command(command).await?;
        Ok(id)
    }

    /// Due pending commands for one gateway, oldest-created first.
    pub async fn poll(&self, gateway_identifier: &str, now: i64) -> Result<Vec<DueCommand>, Error> {
        let rows = self
            .store
            .due_commands(gateway_identifier, now, MAX_COMMANDS_PER_POLL)
            .await?;
        Ok(rows
            .into_iter()
            .map(|row| DueCommand {
                id: row.id,
                device_identifier: row.device_identifier,
                command: row.command,
            })
            .collect())
    }

    /// Transition a command to `sent` or `failed`, exactly once.
    pub async fn acknowledge(
        &self,
        command_id: &str,
        gateway_identifier: &str,
        status: AckStatus,
        error: Option<String>,
        now: i64,
    ) -> Result<(), Error> {
        self.store
            .ack_command(command_id, gateway_identifier, status.into(), error, now)
            .await
    }

    /// Whether a rule still has an outstanding pending command.
    pub async fn has_pending_for_automation(&self, automation_id: &str) -> Result<bool, Error> {
        Ok(!self
            .store
            .pending_commands_for_automation(automation_id)
            .await?
            .is_empty())
    }

    /// Drop every pending command linked to a rule. Used when fresh motion
    /// disarms an armed timer.
    pub async fn cancel_for_automation(&self, automation_id: &str) -> Result<usize, Error> {
        self.store
            .delete_pending_commands_for_automation(automation_id)
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;

    #[test]
    fn test_command_payloads() {
        assert_eq!(
            Value::Object(command_payload(CommandKind::TurnOn)),
            json!({ "state": "ON", "fx": "ON" })
        );
        assert_eq!(
            Value::Object(command_payload(CommandKind::TurnOff)),
            json!({ "state": "OFF", "fx": "OFF" })
        );
        assert_eq!(
            Value::Object(command_payload(CommandKind::Toggle)),
            json!({ "toggle": true })
        );
    }

    #[tokio::test]
    async fn test_enqueue_poll_ack_cycle() {
        let store = Arc::new(MemoryStore::new());
        let queue = CommandQueue::new(store);

        let id = queue
            .enqueue("home-1", "gw-1", "light-1", CommandKind::TurnOn, None, 0, 0)
            .await
            .unwrap();

        let due = queue.poll("gw-1", 10).await.unwrap();
        assert_eq!(due.len(), 1);
        assert_eq!(due[0].id, id);
        assert_eq!(due[0].device_identifier, "light-1");
        assert_eq!(due[0].command["state"], "ON");

        queue
            .acknowledge(&id, "gw-1", AckStatus::Sent, None, 20)
            .await
            .unwrap();
        assert!(queue.poll("gw-1", 30).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_delayed_command_invisible_until_due() {
        let store = Arc::new(MemoryStore::new());
        let queue = CommandQueue::new(store);

        queue
            .enqueue(
                "home-1",
                "gw-1",
                "light-1",
                CommandKind::TurnOff,
                Some("rule-1"),
                1_000,
                0,
            )
            .await
            .unwrap();

        assert!(queue.poll("gw-1", 999).await.unwrap().is_empty());
        assert_eq!(queue.poll("gw-1", 1_000).await.unwrap().len(), 1);
        assert!(queue.has_pending_for_automation("rule-1").await.unwrap());
    }

    #[tokio::test]
    async fn test_cancel_for_automation() {
        let store = Arc::new(MemoryStore::new());
        let queue = CommandQueue::new(store);

        queue
            .enqueue(
                "home-1",
                "gw-1",
                "light-1",
                CommandKind::TurnOff,
                Some("rule-1"),
                1_000,
                0,
            )
            .await
            .unwrap();

        assert_eq!(queue.cancel_for_automation("rule-1").await.unwrap(), 1);
        assert!(!queue.has_pending_for_automation("rule-1").await.unwrap());
        assert!(queue.poll("gw-1", 2_000).await.unwrap().is_empty());
    }
}
