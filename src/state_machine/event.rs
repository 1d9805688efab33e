//! Events published by a wizard

use crate::error::{ErrorValue, HookPhase};
use crate::state_machine::state::{Context, StepData, StepName};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// What caused a step change
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TransitionKind {
    #[serde(rename = "next")]
    Next,
    #[serde(rename = "back")]
    Back,
    #[serde(rename = "goto")]
    GoTo,
}

impl TransitionKind {
    pub fn as_str(self) -> &'static str {
        match self {
            TransitionKind::Next => "next",
            TransitionKind::Back => "back",
            TransitionKind::GoTo => "goto",
        }
    }
}

/// Payload delivered to transition observers once a step change is committed
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransitionEvent {
    pub from: StepName,
    pub to: StepName,
    pub context: Context,
    /// Data of the step that was left, as committed
    pub data: Option<StepData>,
    #[serde(rename = "type")]
    pub kind: TransitionKind,
}

/// Everything a wizard broadcasts to `events()` subscribers
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum WizardEvent {
    Transition(TransitionEvent),
    /// Emitted by a hook through its `emit` handle
    Custom {
        step: StepName,
        name: String,
        payload: Value,
    },
    HookFailed {
        step: StepName,
        phase: HookPhase,
        error: ErrorValue,
    },
    PersistenceFailed {
        operation: String,
        message: String,
    },
    Restored {
        step: StepName,
    },
    Reset {
        step: StepName,
    },
}
