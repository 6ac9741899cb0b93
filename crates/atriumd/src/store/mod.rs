//! Persisted records and the storage seam.
//!
//! Every entity is scoped by home; cross-home references are rejected at
//! write time. The coordinator exclusively owns rule state and the command
//! lifecycle; gateways only ever read commands addressed to their own
//! identifier and write acknowledgments for them.

pub mod memory;

pub use memory::MemoryStore;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::engine::rules::{AutomationRule, RuleDraft};
use crate::error::Error;
use crate::telemetry::PayloadMap;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Home {
    pub id: String,
    pub name: String,
    pub invite_code: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GatewayStatus {
    Pending,
    Active,
    Inactive,
}

/// A field gateway (hub) relaying telemetry and executing commands.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Gateway {
    pub id: String,
    /// Globally unique identifier chosen by the gateway itself.
    pub identifier: String,
    pub home_id: String,
    pub name: String,
    #[serde(rename = "type")]
    pub kind: Option<String>,
    pub status: GatewayStatus,
    pub last_seen: i64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeviceStatus {
    Pending,
    Paired,
}

/// An end device behind a gateway. The home link is denormalized from the
/// gateway for query convenience.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Device {
    pub id: String,
    pub identifier: String,
    pub gateway_id: String,
    pub home_id: String,
    #[serde(rename = "type")]
    pub kind: String,
    pub status: DeviceStatus,
    pub name: Option<String>,
    pub last_seen: i64,
    /// Latest raw telemetry payload, kept opaque.
    pub data: Option<PayloadMap>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CommandStatus {
    Pending,
    Sent,
    Failed,
}

/// A queued actuator command, invisible to pollers until `execute_after`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PendingCommand {
    pub id: String,
    pub home_id: String,
    pub gateway_identifier: String,
    pub device_identifier: String,
    pub command: PayloadMap,
    pub status: CommandStatus,
    pub automation_id: Option<String>,
    pub execute_after: i64,
    pub created_at: i64,
    pub sent_at: Option<i64>,
    pub error: Option<String>,
}

/// Result of a gateway registration attempt.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RegisterOutcome {
    pub gateway_id: String,
    pub status: GatewayStatus,
}

/// Normalize a device type tag: lower-cased, trimmed, defaulting to "other".
pub fn normalize_device_kind(kind: Option<&str>) -> String {
    let normalized = kind.unwrap_or_default().trim().to_lowercase();
    if normalized.is_empty() {
        "other".to_string()
    } else {
        normalized
    }
}

/// Storage seam for homes, gateways, devices, rules, and commands.
///
/// Implementations must run each method as one atomic unit so the
/// evaluator's read-modify-write sequences cannot interleave per rule.
#[async_trait]
pub trait Store: Send + Sync {
    // Homes. Home CRUD itself belongs to the surrounding product; the
    // coordinator only resolves invite codes and scopes queries.
    async fn insert_home(&self, name: &str, invite_code: &str) -> Result<Home, Error>;
    async fn home_by_invite_code(&self, invite_code: &str) -> Result<Option<Home>, Error>;

    // Gateways
    async fn register_gateway(
        &self,
        invite_code: &str,
        identifier: &str,
        name: &str,
        kind: Option<&str>,
        now: i64,
    ) -> Result<RegisterOutcome, Error>;
    async fn heartbeat_gateway(&self, identifier: &str, now: i64)
        -> Result<GatewayStatus, Error>;
    async fn gateway_by_identifier(&self, identifier: &str) -> Result<Option<Gateway>, Error>;
    async fn gateway_by_id(&self, id: &str) -> Result<Option<Gateway>, Error>;
    async fn gateways_for_home(&self, home_id: &str) -> Result<Vec<Gateway>, Error>;
    async fn set_gateway_status(&self, gateway_id: &str, status: GatewayStatus)
        -> Result<(), Error>;

    // Devices
    async fn upsert_device(
        &self,
        gateway: &Gateway,
        identifier: &str,
        kind: Option<&str>,
        data: Option<PayloadMap>,
        now: i64,
    ) -> Result<Device, Error>;
    async fn device_by_identifier(&self, identifier: &str) -> Result<Option<Device>, Error>;
    async fn device_by_id(&self, id: &str) -> Result<Option<Device>, Error>;
    async fn pair_device(&self, device_id: &str, name: &str) -> Result<(), Error>;
    async fn unpair_device(&self, device_id: &str) -> Result<(), Error>;
    async fn paired_devices_for_gateway(
        &self,
        gateway_identifier: &str,
    ) -> Result<Vec<Device>, Error>;

    // Rules
    async fn put_rule(
        &self,
        rule_id: Option<&str>,
        draft: RuleDraft,
        now: i64,
    ) -> Result<String, Error>;
    async fn remove_rule(&self, rule_id: &str) -> Result<(), Error>;
    async fn rule_by_id(&self, rule_id: &str) -> Result<Option<AutomationRule>, Error>;
    /// Enabled rules bound to a trigger device, scoped to its home.
    async fn rules_for_trigger_device(
        &self,
        home_id: &str,
        trigger_device_id: &str,
    ) -> Result<Vec<AutomationRule>, Error>;
    async fn set_rule_outcome(&self, rule_id: &str, outcome: bool, now: i64) -> Result<(), Error>;

    // Commands
    async fn insert_command(&self, command: PendingCommand) -> Result<(), Error>;
    async fn pending_commands_for_automation(
        &self,
        automation_id: &str,
    ) -> Result<Vec<PendingCommand>, Error>;
    async fn delete_pending_commands_for_automation(
        &self,
        automation_id: &str,
    ) -> Result<usize, Error>;
    /// Pending commands due for one gateway, oldest-created first.
    async fn due_commands(
        &self,
        gateway_identifier: &str,
        now: i64,
        limit: usize,
    ) -> Result<Vec<PendingCommand>, Error>;
    async fn ack_command(
        &self,
        command_id: &str,
        gateway_identifier: &str,
        status: CommandStatus,
        error: Option<String>,
        now: i64,
    ) -> Result<(), Error>;
}
