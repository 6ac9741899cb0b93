//! The rule-evaluation state machine.
//!
//! Invoked once per ingested telemetry event. Each enabled rule bound to the
//! triggering device is evaluated independently; one misconfigured rule is
//! logged and skipped, never blocking the others. The only memory carried
//! between events is each rule's `last_outcome`, so steady readings produce
//! no repeated actuation (level-triggered edges) and armed no-motion timers
//! survive flapping sensor streams without stacking commands.

use std::sync::Arc;

use tracing::{debug, warn};

use super::commands::CommandQueue;
use super::rules::{AutomationRule, PirState, Trigger};
use crate::error::Error;
use crate::store::{Device, Gateway, Store};
use crate::telemetry::{self, PayloadMap};

/// Counters returned per ingestion for observability.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Evaluation {
    pub evaluated: usize,
    pub queued: usize,
}

pub struct RuleEvaluator {
    store: Arc<dyn Store>,
    queue: CommandQueue,
}

impl RuleEvaluator {
    pub fn new(store: Arc<dyn Store>, queue: CommandQueue) -> Self {
        Self { store, queue }
    }

    /// Evaluate every enabled rule triggered by `device` against one event.
    pub async fn evaluate_device_update(
        &self,
        device: &Device,
        payload: &PayloadMap,
        now: i64,
    ) -> Result<Evaluation, Error> {
        let rules = self
            .store
            .rules_for_trigger_device(&device.home_id, &device.id)
            .await?;

        let mut evaluation = Evaluation::default();
        for rule in rules {
            evaluation.evaluated += 1;
            match self.evaluate_rule(&rule, payload, now).await {
                Ok(queued) => evaluation.queued += queued,
                Err(error) => {
                    warn!(rule = %rule.id, %error, "skipping rule after evaluation error");
                }
            }
        }

        debug!(
            device = %device.identifier,
            evaluated = evaluation.evaluated,
            queued = evaluation.queued,
            "rule evaluation complete"
        );
        Ok(evaluation)
    }

    async fn evaluate_rule(
        &self,
        rule: &AutomationRule,
        payload: &PayloadMap,
        now: i64,
    ) -> Result<usize, Error> {
        let outcome = match rule.trigger()? {
            Trigger::Temperature {
                comparator,
                threshold,
            } => {
                let Some(value) = telemetry::parse_temperature(payload) else {
                    return Ok(0);
                };
                comparator.compare(value, threshold)
            }
            Trigger::MotionImmediate { desired } => {
                let Some(motion) = telemetry::parse_motion(payload) else {
                    return Ok(0);
                };
                match desired {
                    PirState::Motion => motion,
                    PirState::NoMotion => !motion,
                }
            }
            Trigger::MotionArmed { delay_seconds } => {
                let Some(motion) = telemetry::parse_motion(payload) else {
                    return Ok(0);
                };
                return self.evaluate_armed(rule, motion, delay_seconds, now).await;
            }
        };

        self.dispatch_edge(rule, outcome, now).await
    }

    /// Level-triggered dispatch: act only when the computed outcome differs
    /// from the rule's memory.
    async fn dispatch_edge(
        &self,
        rule: &AutomationRule,
        outcome: bool,
        now: i64,
    ) -> Result<usize, Error> {
        if rule.last_outcome == Some(outcome) {
            return Ok(0);
        }

        let (target_id, command) = if outcome {
            (
                Some(rule.true_target_device_id.as_str()),
                Some(rule.true_command),
            )
        } else {
            (rule.false_target_device_id.as_deref(), rule.false_command)
        };

        let (Some(target_id), Some(command)) = (target_id, command) else {
            // Unconfigured branch: remember the edge, command nothing.
            self.store.set_rule_outcome(&rule.id, outcome, now).await?;
            return Ok(0);
        };

        let Some((target, gateway)) = self.resolve_target(&rule.home_id, target_id).await? else {
            return Ok(0);
        };

        self.queue
            .enqueue(
                &rule.home_id,
                &gateway.identifier,
                &target.identifier,
                command,
                Some(&rule.id),
                now,
                now,
            )
            .await?;
        self.store.set_rule_outcome(&rule.id, outcome, now).await?;
        Ok(1)
    }

    /// Armed-timer sub-state-machine for no-motion rules with a delay.
    ///
    /// Arm on no-motion, disarm on any fresh motion. At most one pending
    /// command exists per rule: a flapping no-motion stream is a no-op while
    /// armed, and motion cancels the outstanding command before it fires.
    async fn evaluate_armed(
        &self,
        rule: &AutomationRule,
        motion: bool,
        delay_seconds: u32,
        now: i64,
    ) -> Result<usize, Error> {
        if motion {
            let cancelled = self.queue.cancel_for_automation(&rule.id).await?;
            if cancelled > 0 {
                debug!(rule = %rule.id, cancelled, "motion resumed, disarmed pending command");
            }
            if rule.last_outcome != Some(false) {
                self.store.set_rule_outcome(&rule.id, false, now).await?;
            }
            return Ok(0);
        }

        if self.queue.has_pending_for_automation(&rule.id).await? {
            return Ok(0);
        }

        let Some((target, gateway)) = self
            .resolve_target(&rule.home_id, &rule.true_target_device_id)
            .await?
        else {
            return Ok(0);
        };

        let execute_after = now + i64::from(delay_seconds) * 1000;
        self.queue
            .enqueue(
                &rule.home_id,
                &gateway.identifier,
                &target.identifier,
                rule.true_command,
                Some(&rule.id),
                execute_after,
                now,
            )
            .await?;
        self.store.set_rule_outcome(&rule.id, true, now).await?;
        Ok(1)
    }

    /// Resolve a target device and its owning gateway, skipping silently on
    /// anything missing or cross-home.
    async fn resolve_target(
        &self,
        home_id: &str,
        device_id: &str,
    ) -> Result<Option<(Device, Gateway)>, Error> {
        let Some(device) = self.store.device_by_id(device_id).await? else {
            return Ok(None);
        };
        if device.home_id != home_id {
            return Ok(None);
        }
        let Some(gateway) = self.store.gateway_by_id(&device.gateway_id).await? else {
            return Ok(None);
        };
        if gateway.home_id != home_id {
            return Ok(None);
        }
        Ok(Some((device, gateway)))
    }
}
