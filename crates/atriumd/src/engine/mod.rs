//! Rule evaluation and command dispatch.

pub mod commands;
pub mod evaluator;
pub mod rules;

pub use commands::{AckStatus, CommandQueue, DueCommand, MAX_COMMANDS_PER_POLL};
pub use evaluator::{Evaluation, RuleEvaluator};
pub use rules::{
    AutomationRule, CommandKind, Comparator, MIN_NO_MOTION_DELAY_SECONDS, PirState, RuleDraft,
    Trigger, TriggerType,
};
