//! In-memory store for tests and single-node deployments.

use std::collections::HashMap;

use async_trait::async_trait;
use tokio::sync::Mutex;
use uuid::Uuid;

use super::{
    CommandStatus, Device, DeviceStatus, Gateway, GatewayStatus, Home, PendingCommand,
    RegisterOutcome, Store, normalize_device_kind,
};
use crate::engine::rules::{AutomationRule, RuleDraft};
use crate::error::Error;
use crate::telemetry::PayloadMap;

#[derive(Default)]
struct Inner {
    homes: HashMap<String, Home>,
    gateways: HashMap<String, Gateway>,
    devices: HashMap<String, Device>,
    rules: HashMap<String, AutomationRule>,
    commands: HashMap<String, PendingCommand>,
}

/// Store backed by process memory.
///
/// One lock covers all tables, so every store call is a serializable
/// transaction; the evaluator's check-pending / delete / insert sequences
/// for a single rule run between calls and rely on the caller holding no
/// interleaved state.
#[derive(Default)]
pub struct MemoryStore {
    inner: Mutex<Inner>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

fn new_id() -> String {
    Uuid::new_v4().to_string()
}

impl Inner {
    fn gateway_by_identifier(&self, identifier: &str) -> Option<&Gateway> {
        self.gateways.values().find(|g| g.identifier == identifier)
    }

    fn device_by_identifier(&self, identifier: &str) -> Option<&Device> {
        self.devices.values().find(|d| d.identifier == identifier)
    }

    /// Reject rule references to devices outside the rule's home.
    fn require_home_device(&self, device_id: &str, home_id: &str, role: &str) -> Result<(), Error> {
        match self.devices.get(device_id) {
            Some(device) if device.home_id == home_id => Ok(()),
            _ => Err(Error::InvalidArgument(format!("invalid {role} device"))),
        }
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn insert_home(&self, name: &str, invite_code: &str) -> Result<Home, Error> {
        let mut inner = self.inner.lock().await;
        let home = Home {
            id: new_id(),
            name: name.to_string(),
            invite_code: invite_code.to_string(),
        };
        inner.homes.insert(home.id.clone(), home.clone());
        Ok(home)
    }

    async fn home_by_invite_code(&self, invite_code: &str) -> Result<Option<Home>, Error> {
        let inner = self.inner.lock().await;
        Ok(inner
            .homes
            .values()
            .find(|h| h.invite_code == invite_code)
            .cloned())
    }

    async fn register_gateway(
        &self,
        invite_code: &str,
        identifier: &str,
        name: &str,
        kind: Option<&str>,
        now: i64,
    ) -> Result<RegisterOutcome, Error> {
        let mut inner = self.inner.lock().await;

        let home_id = inner
            .homes
            .values()
            .find(|h| h.invite_code == invite_code)
            .map(|h| h.id.clone())
            .ok_or_else(|| Error::InvalidArgument("invalid invite code".to_string()))?;

        let existing = inner
            .gateway_by_identifier(identifier)
            .map(|g| (g.id.clone(), g.home_id.clone(), g.status));
        if let Some((id, existing_home_id, status)) = existing {
            if existing_home_id != home_id {
                return Err(Error::InvalidArgument(
                    "gateway is already registered to another home".to_string(),
                ));
            }
            // Re-registration refreshes metadata but never resets status.
            if let Some(gateway) = inner.gateways.get_mut(&id) {
                gateway.name = name.to_string();
                gateway.kind = kind.map(str::to_string);
                gateway.last_seen = now;
            }
            return Ok(RegisterOutcome {
                gateway_id: id,
                status,
            });
        }

        let gateway = Gateway {
            id: new_id(),
            identifier: identifier.to_string(),
            home_id,
            name: name.to_string(),
            kind: Some(kind.unwrap_or("raspberry_pi").to_string()),
            status: GatewayStatus::Pending,
            last_seen: now,
        };
        let outcome = RegisterOutcome {
            gateway_id: gateway.id.clone(),
            status: gateway.status,
        };
        inner.gateways.insert(gateway.id.clone(), gateway);
        Ok(outcome)
    }

    async fn heartbeat_gateway(
        &self,
        identifier: &str,
        now: i64,
    ) -> Result<GatewayStatus, Error> {
        let mut inner = self.inner.lock().await;
        let id = inner
            .gateway_by_identifier(identifier)
            .map(|g| g.id.clone())
            .ok_or_else(|| Error::NotFound("gateway not found".to_string()))?;
        let gateway = inner
            .gateways
            .get_mut(&id)
            .ok_or_else(|| Error::NotFound("gateway not found".to_string()))?;
        gateway.last_seen = now;
        Ok(gateway.status)
    }

    async fn gateway_by_identifier(&self, identifier: &str) -> Result<Option<Gateway>, Error> {
        let inner = self.inner.lock().await;
        Ok(inner.gateway_by_identifier(identifier).cloned())
    }

    async fn gateway_by_id(&self, id: &str) -> Result<Option<Gateway>, Error> {
        let inner = self.inner.lock().await;
        Ok(inner.gateways.get(id).cloned())
    }

    async fn gateways_for_home(&self, home_id: &str) -> Result<Vec<Gateway>, Error> {
        let inner = self.inner.lock().await;
        Ok(inner
            .gateways
            .values()
            .filter(|g| g.home_id == home_id)
            .cloned()
            .collect())
    }

    async fn set_gateway_status(
        &self,
        gateway_id: &str,
        status: GatewayStatus,
    ) -> Result<(), Error> {
        let mut inner = self.inner.lock().await;
        let gateway = inner
            .gateways
            .get_mut(gateway_id)
            .ok_or_else(|| Error::NotFound("gateway not found".to_string()))?;
        gateway.status = status;
        Ok(())
    }

    async fn upsert_device(
        &self,
        gateway: &Gateway,
        identifier: &str,
        kind: Option<&str>,
        data: Option<PayloadMap>,
        now: i64,
    ) -> Result<Device, Error> {
        let mut inner = self.inner.lock().await;
        let normalized_kind = normalize_device_kind(kind);

        let existing_id = inner.device_by_identifier(identifier).map(|d| d.id.clone());
        if let Some(id) = existing_id {
            // Pairing status and friendly name survive telemetry updates.
            let device = inner
                .devices
                .get_mut(&id)
                .ok_or_else(|| Error::NotFound("device not found".to_string()))?;
            device.kind = normalized_kind;
            device.last_seen = now;
            device.data = data;
            device.gateway_id = gateway.id.clone();
            device.home_id = gateway.home_id.clone();
            return Ok(device.clone());
        }

        let device = Device {
            id: new_id(),
            identifier: identifier.to_string(),
            gateway_id: gateway.id.clone(),
            home_id: gateway.home_id.clone(),
            kind: normalized_kind,
            status: DeviceStatus::Pending,
            name: None,
            last_seen: now,
            data,
        };
        inner.devices.insert(device.id.clone(), device.clone());
        Ok(device)
    }

    async fn device_by_identifier(&self, identifier: &str) -> Result<Option<Device>, Error> {
        let inner = self.inner.lock().await;
        Ok(inner.device_by_identifier(identifier).cloned())
    }

    async fn device_by_id(&self, id: &str) -> Result<Option<Device>, Error> {
        let inner = self.inner.lock().await;
        Ok(inner.devices.get(id).cloned())
    }

    async fn pair_device(&self, device_id: &str, name: &str) -> Result<(), Error> {
        let mut inner = self.inner.lock().await;
        let device = inner
            .devices
            .get_mut(device_id)
            .ok_or_else(|| Error::NotFound("device not found".to_string()))?;
        device.status = DeviceStatus::Paired;
        device.name = Some(name.to_string());
        Ok(())
    }

    async fn unpair_device(&self, device_id: &str) -> Result<(), Error> {
        let mut inner = self.inner.lock().await;
        // Deletion allows the device to be re-discovered on its next pulse.
        inner
            .devices
            .remove(device_id)
            .map(|_| ())
            .ok_or_else(|| Error::NotFound("device not found".to_string()))
    }

    async fn paired_devices_for_gateway(
        &self,
        gateway_identifier: &str,
    ) -> Result<Vec<Device>, Error> {
        let inner = self.inner.lock().await;
        let Some(gateway) = inner.gateway_by_identifier(gateway_identifier) else {
            return Ok(Vec::new());
        };
        Ok(inner
            .devices
            .values()
            .filter(|d| d.home_id == gateway.home_id && d.status == DeviceStatus::Paired)
            .cloned()
            .collect())
    }

    async fn put_rule(
        &self,
        rule_id: Option<&str>,
        draft: RuleDraft,
        now: i64,
    ) -> Result<String, Error> {
        draft.validate()?;

        let mut inner = self.inner.lock().await;
        inner.require_home_device(&draft.trigger_device_id, &draft.home_id, "trigger")?;
        inner.require_home_device(&draft.true_target_device_id, &draft.home_id, "true action")?;
        if let Some(false_target) = &draft.false_target_device_id {
            inner.require_home_device(false_target, &draft.home_id, "false action")?;
        }

        if let Some(rule_id) = rule_id {
            let existing = inner
                .rules
                .get_mut(rule_id)
                .filter(|r| r.home_id == draft.home_id)
                .ok_or_else(|| Error::NotFound("automation not found".to_string()))?;
            existing.name = draft.name;
            existing.enabled = draft.enabled;
            existing.trigger_type = draft.trigger_type;
            existing.trigger_device_id = draft.trigger_device_id;
            existing.temperature_comparator = draft.temperature_comparator;
            existing.temperature_threshold = draft.temperature_threshold;
            existing.pir_state = draft.pir_state;
            existing.pir_no_motion_delay_seconds = draft.pir_no_motion_delay_seconds;
            existing.true_target_device_id = draft.true_target_device_id;
            existing.true_command = draft.true_command;
            existing.false_target_device_id = draft.false_target_device_id;
            existing.false_command = draft.false_command;
            existing.updated_at = now;
            return Ok(rule_id.to_string());
        }

        let rule = AutomationRule {
            id: new_id(),
            home_id: draft.home_id,
            name: draft.name,
            enabled: draft.enabled,
            trigger_type: draft.trigger_type,
            trigger_device_id: draft.trigger_device_id,
            temperature_comparator: draft.temperature_comparator,
            temperature_threshold: draft.temperature_threshold,
            pir_state: draft.pir_state,
            pir_no_motion_delay_seconds: draft.pir_no_motion_delay_seconds,
            true_target_device_id: draft.true_target_device_id,
            true_command: draft.true_command,
            false_target_device_id: draft.false_target_device_id,
            false_command: draft.false_command,
            last_outcome: None,
            created_at: now,
            updated_at: now,
        };
        let id = rule.id.clone();
        inner.rules.insert(id.clone(), rule);
        Ok(id)
    }

    async fn remove_rule(&self, rule_id: &str) -> Result<(), Error> {
        let mut inner = self.inner.lock().await;
        inner
            .rules
            .remove(rule_id)
            .map(|_| ())
            .ok_or_else(|| Error::NotFound("automation not found".to_string()))
    }

    async fn rule_by_id(&self, rule_id: &str) -> Result<Option<AutomationRule>, Error> {
        let inner = self.inner.lock().await;
        Ok(inner.rules.get(rule_id).cloned())
    }

    async fn rules_for_trigger_device(
        &self,
        home_id: &str,
        trigger_device_id: &str,
    ) -> Result<Vec<AutomationRule>, Error> {
        let inner = self.inner.lock().await;
        Ok(inner
            .rules
            .values()
            .filter(|r| {
                r.home_id == home_id && r.enabled && r.trigger_device_id == trigger_device_id
            })
            .cloned()
            .collect())
    }

    async fn set_rule_outcome(&self, rule_id: &str, outcome: bool, now: i64) -> Result<(), Error> {
        let mut inner = self.inner.lock().await;
        let rule = inner
            .rules
            .get_mut(rule_id)
            .ok_or_else(|| Error::NotFound("automation not found".to_string()))?;
        rule.last_outcome = Some(outcome);
        rule.updated_at = now;
        Ok(())
    }

    async fn insert_command(&self, command: PendingCommand) -> Result<(), Error> {
        let mut inner = self.inner.lock().await;
        inner.commands.insert(command.id.clone(), command);
        Ok(())
    }

    async fn pending_commands_for_automation(
        &self,
        automation_id: &str,
    ) -> Result<Vec<PendingCommand>, Error> {
        let inner = self.inner.lock().await;
        Ok(inner
            .commands
            .values()
            .filter(|c| {
                c.status == CommandStatus::Pending
                    && c.automation_id.as_deref() == Some(automation_id)
            })
            .cloned()
            .collect())
    }

    async fn delete_pending_commands_for_automation(
        &self,
        automation_id: &str,
    ) -> Result<usize, Error> {
        let mut inner = self.inner.lock().await;
        let doomed: Vec<String> = inner
            .commands
            .values()
            .filter(|c| {
                c.status == CommandStatus::Pending
                    && c.automation_id.as_deref() == Some(automation_id)
            })
            .map(|c| c.id.clone())
            .collect();
        for id in &doomed {
            inner.commands.remove(id);
        }
        Ok(doomed.len())
    }

    async fn due_commands(
        &self,
        gateway_identifier: &str,
        now: i64,
        limit: usize,
    ) -> Result<Vec<PendingCommand>, Error> {
        let inner = self.inner.lock().await;
        let mut due: Vec<PendingCommand> = inner
            .commands
            .values()
            .filter(|c| {
                c.status == CommandStatus::Pending
                    && c.gateway_identifier == gateway_identifier
                    && c.execute_after <= now
            })
            .cloned()
            .collect();
        due.sort_by_key(|c| c.created_at);
        due.truncate(limit);
        Ok(due)
    }

    async fn ack_command(
        &self,
        command_id: &str,
        gateway_identifier: &str,
        status: CommandStatus,
        error: Option<String>,
        now: i64,
    ) -> Result<(), Error> {
        let mut inner = self.inner.lock().await;
        let command = inner
            .commands
            .get_mut(command_id)
            .ok_or_else(|| Error::NotFound("command not found".to_string()))?;
        if command.gateway_identifier != gateway_identifier {
            return Err(Error::Mismatch("gateway mismatch".to_string()));
        }
        if command.status != CommandStatus::Pending {
            return Err(Error::InvalidArgument(
                "command already acknowledged".to_string(),
            ));
        }
        command.status = status;
        command.error = error;
        command.sent_at = Some(now);
        Ok(())
    }
}

#[cfg(test)]
impl MemoryStore {
    /// Plant a rule row without validation, for evaluator tests that need
    /// legacy or corrupted configurations.
    pub(crate) async fn insert_rule_raw(&self, rule: AutomationRule) {
        let mut inner = self.inner.lock().await;
        inner.rules.insert(rule.id.clone(), rule);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::rules::{CommandKind, Comparator, TriggerType};

    async fn seeded() -> (MemoryStore, Home, Gateway, Device, Device) {
        let store = MemoryStore::new();
        let home = store.insert_home("Test Home", "INVITE-1").await.unwrap();
        let outcome = store
            .register_gateway("INVITE-1", "gw-1", "Hub", None, 1)
            .await
            .unwrap();
        store
            .set_gateway_status(&outcome.gateway_id, GatewayStatus::Active)
            .await
            .unwrap();
        let gateway = store.gateway_by_id(&outcome.gateway_id).await.unwrap().unwrap();
        let sensor = store
            .upsert_device(&gateway, "sensor-1", Some("pir"), None, 1)
            .await
            .unwrap();
        let light = store
            .upsert_device(&gateway, "light-1", Some("light"), None, 1)
            .await
            .unwrap();
        (store, home, gateway, sensor, light)
    }

    fn temp_rule(home_id: &str, trigger: &str, target: &str) -> RuleDraft {
        RuleDraft {
            home_id: home_id.to_string(),
            name: "warm".to_string(),
            enabled: true,
            trigger_type: TriggerType::Temperature,
            trigger_device_id: trigger.to_string(),
            temperature_comparator: Some(Comparator::Gt),
            temperature_threshold: Some(25.0),
            pir_state: None,
            pir_no_motion_delay_seconds: None,
            true_target_device_id: target.to_string(),
            true_command: CommandKind::TurnOn,
            false_target_device_id: None,
            false_command: None,
        }
    }

    #[tokio::test]
    async fn test_register_is_idempotent_per_home() {
        let (store, _home, gateway, _, _) = seeded().await;

        // Same gateway re-registering keeps its id and (active) status.
        let second = store
            .register_gateway("INVITE-1", "gw-1", "Hub renamed", Some("pi5"), 2)
            .await
            .unwrap();
        assert_eq!(second.gateway_id, gateway.id);
        assert_eq!(second.status, GatewayStatus::Active);

        let refreshed = store.gateway_by_id(&gateway.id).await.unwrap().unwrap();
        assert_eq!(refreshed.name, "Hub renamed");
        assert_eq!(refreshed.last_seen, 2);
    }

    #[tokio::test]
    async fn test_register_conflict_across_homes() {
        let (store, _, _, _, _) = seeded().await;
        store.insert_home("Other", "INVITE-2").await.unwrap();

        let err = store
            .register_gateway("INVITE-2", "gw-1", "Hub", None, 2)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::InvalidArgument(_)));
    }

    #[tokio::test]
    async fn test_register_bad_invite_code() {
        let (store, _, _, _, _) = seeded().await;
        let err = store
            .register_gateway("NOPE", "gw-2", "Hub", None, 2)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::InvalidArgument(_)));
    }

    #[tokio::test]
    async fn test_heartbeat_refreshes_last_seen() {
        let (store, _, gateway, _, _) = seeded().await;
        let status = store.heartbeat_gateway("gw-1", 99).await.unwrap();
        assert_eq!(status, GatewayStatus::Active);
        let refreshed = store.gateway_by_id(&gateway.id).await.unwrap().unwrap();
        assert_eq!(refreshed.last_seen, 99);

        assert!(store.heartbeat_gateway("unknown", 99).await.is_err());
    }

    #[tokio::test]
    async fn test_upsert_device_preserves_pairing() {
        let (store, _, gateway, sensor, _) = seeded().await;
        store.pair_device(&sensor.id, "Hall sensor").await.unwrap();

        let payload = serde_json::json!({"motion": true})
            .as_object()
            .cloned()
            .unwrap();
        let updated = store
            .upsert_device(&gateway, "sensor-1", Some("PIR "), Some(payload), 50)
            .await
            .unwrap();
        assert_eq!(updated.id, sensor.id);
        assert_eq!(updated.status, DeviceStatus::Paired);
        assert_eq!(updated.name.as_deref(), Some("Hall sensor"));
        assert_eq!(updated.kind, "pir");
        assert_eq!(updated.last_seen, 50);
    }

    #[tokio::test]
    async fn test_unpair_deletes_for_rediscovery() {
        let (store, _, gateway, sensor, _) = seeded().await;
        store.unpair_device(&sensor.id).await.unwrap();
        assert!(store
            .device_by_identifier("sensor-1")
            .await
            .unwrap()
            .is_none());

        // Next pulse re-creates it as pending.
        let rediscovered = store
            .upsert_device(&gateway, "sensor-1", Some("pir"), None, 60)
            .await
            .unwrap();
        assert_eq!(rediscovered.status, DeviceStatus::Pending);
        assert_ne!(rediscovered.id, sensor.id);
    }

    #[tokio::test]
    async fn test_paired_devices_for_gateway() {
        let (store, _, _, sensor, light) = seeded().await;
        store.pair_device(&light.id, "Lamp").await.unwrap();

        let paired = store.paired_devices_for_gateway("gw-1").await.unwrap();
        assert_eq!(paired.len(), 1);
        assert_eq!(paired[0].identifier, "light-1");
        assert!(paired.iter().all(|d| d.id != sensor.id));

        assert!(store
            .paired_devices_for_gateway("unknown")
            .await
            .unwrap()
            .is_empty());
    }

    #[tokio::test]
    async fn test_put_rule_rejects_cross_home_devices() {
        let (store, _, _, sensor, light) = seeded().await;
        let other = store.insert_home("Other", "INVITE-2").await.unwrap();

        // Trigger and target live in the seeded home, not in `other`.
        let err = store
            .put_rule(None, temp_rule(&other.id, &sensor.id, &light.id), 1)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::InvalidArgument(_)));
    }

    #[tokio::test]
    async fn test_put_rule_update_keeps_outcome_memory() {
        let (store, home, _, sensor, light) = seeded().await;
        let rule_id = store
            .put_rule(None, temp_rule(&home.id, &sensor.id, &light.id), 1)
            .await
            .unwrap();
        store.set_rule_outcome(&rule_id, true, 2).await.unwrap();

        let updated_id = store
            .put_rule(Some(&rule_id), temp_rule(&home.id, &sensor.id, &light.id), 3)
            .await
            .unwrap();
        assert_eq!(updated_id, rule_id);
        let rule = store.rule_by_id(&rule_id).await.unwrap().unwrap();
        assert_eq!(rule.last_outcome, Some(true));
        assert_eq!(rule.created_at, 1);
        assert_eq!(rule.updated_at, 3);
    }

    #[tokio::test]
    async fn test_rules_for_trigger_device_filters_disabled() {
        let (store, home, _, sensor, light) = seeded().await;
        store
            .put_rule(None, temp_rule(&home.id, &sensor.id, &light.id), 1)
            .await
            .unwrap();
        let mut disabled = temp_rule(&home.id, &sensor.id, &light.id);
        disabled.enabled = false;
        store.put_rule(None, disabled, 1).await.unwrap();

        let rules = store
            .rules_for_trigger_device(&home.id, &sensor.id)
            .await
            .unwrap();
        assert_eq!(rules.len(), 1);
    }

    fn command(id: &str, gateway: &str, execute_after: i64, created_at: i64) -> PendingCommand {
        PendingCommand {
            id: id.to_string(),
            home_id: "home-1".to_string(),
            gateway_identifier: gateway.to_string(),
            device_identifier: "light-1".to_string(),
            command: PayloadMap::new(),
            status: CommandStatus::Pending,
            automation_id: None,
            execute_after,
            created_at,
            sent_at: None,
            error: None,
        }
    }

    #[tokio::test]
    async fn test_due_commands_filter_order_and_cap() {
        let store = MemoryStore::new();
        store.insert_command(command("c-late", "gw-1", 500, 3)).await.unwrap();
        store.insert_command(command("c-b", "gw-1", 0, 2)).await.unwrap();
        store.insert_command(command("c-a", "gw-1", 0, 1)).await.unwrap();
        store.insert_command(command("c-other", "gw-2", 0, 1)).await.unwrap();

        let due = store.due_commands("gw-1", 100, 25).await.unwrap();
        assert_eq!(
            due.iter().map(|c| c.id.as_str()).collect::<Vec<_>>(),
            vec!["c-a", "c-b"]
        );

        let capped = store.due_commands("gw-1", 100, 1).await.unwrap();
        assert_eq!(capped.len(), 1);
        assert_eq!(capped[0].id, "c-a");

        // Delayed command becomes visible once its time arrives.
        let later = store.due_commands("gw-1", 500, 25).await.unwrap();
        assert_eq!(later.len(), 3);
    }

    #[tokio::test]
    async fn test_ack_wrong_gateway_is_mismatch() {
        let store = MemoryStore::new();
        store.insert_command(command("c-1", "gw-1", 0, 1)).await.unwrap();

        let err = store
            .ack_command("c-1", "gw-2", CommandStatus::Sent, None, 10)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Mismatch(_)));
    }

    #[tokio::test]
    async fn test_ack_transitions_exactly_once() {
        let store = MemoryStore::new();
        store.insert_command(command("c-1", "gw-1", 0, 1)).await.unwrap();

        store
            .ack_command("c-1", "gw-1", CommandStatus::Failed, Some("bulb offline".into()), 10)
            .await
            .unwrap();
        assert!(store.due_commands("gw-1", 100, 25).await.unwrap().is_empty());

        let err = store
            .ack_command("c-1", "gw-1", CommandStatus::Sent, None, 11)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::InvalidArgument(_)));
    }
}
