//! Automation rule definitions.
//!
//! Rules are stored as optional-field records (the shape the external rule
//! editor writes) but resolve once at load time into a [`Trigger`] tagged
//! union, so evaluation never re-branches on raw strings.

use serde::{Deserialize, Serialize};

use crate::error::Error;

/// Minimum no-motion delay before an armed rule may fire.
pub const MIN_NO_MOTION_DELAY_SECONDS: u32 = 30;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TriggerType {
    Pir,
    Temperature,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Comparator {
    #[serde(rename = ">")]
    Gt,
    #[serde(rename = ">=")]
    Ge,
    #[serde(rename = "<")]
    Lt,
    #[serde(rename = "<=")]
    Le,
}

impl Comparator {
    pub fn compare(self, value: f64, threshold: f64) -> bool {
        match self {
            Comparator::Gt => value > threshold,
            Comparator::Ge => value >= threshold,
            Comparator::Lt => value < threshold,
            Comparator::Le => value <= threshold,
        }
    }
}

/// Desired state for a motion rule.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PirState {
    Motion,
    NoMotion,
}

/// Logical actuator command; the queue expands it to a payload map.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CommandKind {
    TurnOn,
    TurnOff,
    Toggle,
}

/// Trigger configuration resolved from a rule's optional fields.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Trigger {
    Temperature {
        comparator: Comparator,
        threshold: f64,
    },
    /// Level-triggered motion compare, fires on outcome change.
    MotionImmediate { desired: PirState },
    /// Armed-timer motion rule: arms a delayed command on no-motion,
    /// disarmed by any fresh motion.
    MotionArmed { delay_seconds: u32 },
}

/// A persisted automation rule.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AutomationRule {
    pub id: String,
    pub home_id: String,
    pub name: String,
    pub enabled: bool,
    pub trigger_type: TriggerType,
    pub trigger_device_id: String,
    pub temperature_comparator: Option<Comparator>,
    pub temperature_threshold: Option<f64>,
    pub pir_state: Option<PirState>,
    pub pir_no_motion_delay_seconds: Option<u32>,
    pub true_target_device_id: String,
    pub true_command: CommandKind,
    pub false_target_device_id: Option<String>,
    pub false_command: Option<CommandKind>,
    /// Edge-detection memory: the only evaluation state kept between events.
    pub last_outcome: Option<bool>,
    pub created_at: i64,
    pub updated_at: i64,
}

impl AutomationRule {
    /// Resolve this rule's trigger variant.
    ///
    /// A `no_motion` rule below the minimum delay degrades to the
    /// level-triggered form instead of arming a timer.
    pub fn trigger(&self) -> Result<Trigger, Error> {
        match self.trigger_type {
            TriggerType::Temperature => {
                let (Some(comparator), Some(threshold)) =
                    (self.temperature_comparator, self.temperature_threshold)
                else {
                    return Err(Error::InvalidArgument(
                        "temperature rule missing comparator or threshold".to_string(),
                    ));
                };
                if !threshold.is_finite() {
                    return Err(Error::InvalidArgument(
                        "temperature threshold must be finite".to_string(),
                    ));
                }
                Ok(Trigger::Temperature {
                    comparator,
                    threshold,
                })
            }
            TriggerType::Pir => {
                let Some(desired) = self.pir_state else {
                    return Err(Error::InvalidArgument(
                        "motion rule missing desired state".to_string(),
                    ));
                };
                match (desired, self.pir_no_motion_delay_seconds) {
                    (PirState::NoMotion, Some(delay)) if delay >= MIN_NO_MOTION_DELAY_SECONDS => {
                        Ok(Trigger::MotionArmed {
                            delay_seconds: delay,
                        })
                    }
                    _ => Ok(Trigger::MotionImmediate { desired }),
                }
            }
        }
    }
}

/// Rule fields as written by the external rule editor; validated before the
/// store accepts them.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RuleDraft {
    pub home_id: String,
    pub name: String,
    pub enabled: bool,
    pub trigger_type: TriggerType,
    pub trigger_device_id: String,
    pub temperature_comparator: Option<Comparator>,
    pub temperature_threshold: Option<f64>,
    pub pir_state: Option<PirState>,
    pub pir_no_motion_delay_seconds: Option<u32>,
    pub true_target_device_id: String,
    pub true_command: CommandKind,
    pub false_target_device_id: Option<String>,
    pub false_command: Option<CommandKind>,
}

impl RuleDraft {
    /// Shape validation that needs no store access. Cross-home checks happen
    /// in the store, which can resolve the referenced devices.
    pub fn validate(&self) -> Result<(), Error> {
        match self.trigger_type {
            TriggerType::Temperature => {
                let threshold_ok = self.temperature_threshold.is_some_and(f64::is_finite);
                if self.temperature_comparator.is_none() || !threshold_ok {
                    return Err(Error::InvalidArgument(
                        "temperature rule requires a comparator and a finite threshold"
                            .to_string(),
                    ));
                }
            }
            TriggerType::Pir => {
                let Some(desired) = self.pir_state else {
                    return Err(Error::InvalidArgument(
                        "motion rule requires a desired state".to_string(),
                    ));
                };
                if desired == PirState::NoMotion {
                    let delay_ok = self
                        .pir_no_motion_delay_seconds
                        .is_some_and(|d| d >= MIN_NO_MOTION_DELAY_SECONDS);
                    if !delay_ok {
                        return Err(Error::InvalidArgument(format!(
                            "no-motion delay must be at least {MIN_NO_MOTION_DELAY_SECONDS} seconds"
                        )));
                    }
                }
            }
        }

        // False branch target and command are configured together or not at all.
        match (&self.false_target_device_id, &self.false_command) {
            (Some(_), None) => {
                return Err(Error::InvalidArgument(
                    "false branch target configured without a command".to_string(),
                ));
            }
            (None, Some(_)) => {
                return Err(Error::InvalidArgument(
                    "false branch command configured without a target".to_string(),
                ));
            }
            _ => {}
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn draft() -> RuleDraft {
        RuleDraft {
            home_id: "home-1".to_string(),
            name: "test".to_string(),
            enabled: true,
            trigger_type: TriggerType::Temperature,
            trigger_device_id: "dev-1".to_string(),
            temperature_comparator: Some(Comparator::Gt),
            temperature_threshold: Some(25.0),
            pir_state: None,
            pir_no_motion_delay_seconds: None,
            true_target_device_id: "dev-2".to_string(),
            true_command: CommandKind::TurnOn,
            false_target_device_id: None,
            false_command: None,
        }
    }

    fn rule(draft: RuleDraft) -> AutomationRule {
        AutomationRule {
            id: "rule-1".to_string(),
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
            created_at: 0,
            updated_at: 0,
        }
    }

    #[test]
    fn test_comparator_semantics() {
        assert!(Comparator::Gt.compare(26.0, 25.0));
        assert!(!Comparator::Gt.compare(25.0, 25.0));
        assert!(Comparator::Ge.compare(25.0, 25.0));
        assert!(Comparator::Lt.compare(24.0, 25.0));
        assert!(Comparator::Le.compare(25.0, 25.0));
        assert!(!Comparator::Le.compare(25.1, 25.0));
    }

    #[test]
    fn test_temperature_rule_requires_comparator_and_threshold() {
        let mut d = draft();
        d.temperature_comparator = None;
        assert!(d.validate().is_err());

        let mut d = draft();
        d.temperature_threshold = Some(f64::NAN);
        assert!(d.validate().is_err());
    }

    #[test]
    fn test_no_motion_delay_minimum() {
        let mut d = draft();
        d.trigger_type = TriggerType::Pir;
        d.temperature_comparator = None;
        d.temperature_threshold = None;
        d.pir_state = Some(PirState::NoMotion);
        d.pir_no_motion_delay_seconds = Some(29);
        assert!(d.validate().is_err());

        d.pir_no_motion_delay_seconds = Some(30);
        assert!(d.validate().is_ok());
    }

    #[test]
    fn test_false_branch_configured_together() {
        let mut d = draft();
        d.false_target_device_id = Some("dev-3".to_string());
        assert!(d.validate().is_err());

        d.false_command = Some(CommandKind::TurnOff);
        assert!(d.validate().is_ok());

        d.false_target_device_id = None;
        assert!(d.validate().is_err());
    }

    #[test]
    fn test_trigger_resolution() {
        let temp = rule(draft());
        assert_eq!(
            temp.trigger().unwrap(),
            Trigger::Temperature {
                comparator: Comparator::Gt,
                threshold: 25.0
            }
        );

        let mut d = draft();
        d.trigger_type = TriggerType::Pir;
        d.pir_state = Some(PirState::NoMotion);
        d.pir_no_motion_delay_seconds = Some(60);
        assert_eq!(
            rule(d).trigger().unwrap(),
            Trigger::MotionArmed { delay_seconds: 60 }
        );

        // Sub-minimum delay degrades to the immediate form.
        let mut d = draft();
        d.trigger_type = TriggerType::Pir;
        d.pir_state = Some(PirState::NoMotion);
        d.pir_no_motion_delay_seconds = Some(10);
        assert_eq!(
            rule(d).trigger().unwrap(),
            Trigger::MotionImmediate {
                desired: PirState::NoMotion
            }
        );
    }

    #[test]
    fn test_misconfigured_rule_is_invalid_argument() {
        let mut d = draft();
        d.temperature_comparator = None;
        let r = rule(d);
        assert!(matches!(r.trigger(), Err(Error::InvalidArgument(_))));
    }

    #[test]
    fn test_wire_names_round_trip() {
        let json = serde_json::to_string(&Comparator::Ge).unwrap();
        assert_eq!(json, "\">=\"");
        let kind: CommandKind = serde_json::from_str("\"turn_on\"").unwrap();
        assert_eq!(kind, CommandKind::TurnOn);
        let state: PirState = serde_json::from_str("\"no_motion\"").unwrap();
        assert_eq!(state, PirState::NoMotion);
    }
}
