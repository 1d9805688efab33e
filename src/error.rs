//! Error types for wizard operations

use crate::db::DbError;
use crate::state_machine::{RuntimeStatus, StepName};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::fmt;
use thiserror::Error;

/// Caller-defined failure payload.
///
/// Validators and hooks fail with an arbitrary JSON value, which is stored
/// verbatim in `WizardState::errors`. The error taxonomy is up to the caller.
pub type ErrorValue = Value;

/// Phase of a step lifecycle that can fail and be retried
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HookPhase {
    Validate,
    BeforeExit,
    BeforeEnter,
}

impl fmt::Display for HookPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            HookPhase::Validate => "validate",
            HookPhase::BeforeExit => "before_exit",
            HookPhase::BeforeEnter => "before_enter",
        };
        f.write_str(name)
    }
}

/// Errors surfaced by the wizard engine
#[derive(Debug, Error)]
pub enum WizardError {
    #[error("Validation failed for step '{step}': {error}")]
    Validation { step: StepName, error: ErrorValue },

    #[error("Step '{step}' refused to exit")]
    ExitGuardRejected { step: StepName },

    #[error("Step '{step}' refused entry")]
    EnterGuardRejected { step: StepName },

    #[error("{phase} hook failed for step '{step}': {error}")]
    HookExecution {
        step: StepName,
        phase: HookPhase,
        error: ErrorValue,
    },

    #[error("A transition is already in progress")]
    TransitionInProgress,

    #[error("Step '{step}' has no next step")]
    NoNextStep { step: StepName },

    #[error("No history to go back to")]
    NoHistory,

    #[error("Unknown step: {0}")]
    UnknownStep(StepName),

    #[error("Step '{step}' is not the active step (active: '{active}')")]
    StepNotActive { step: StepName, active: StepName },

    #[error("Step '{step}' cannot change status from {from} to {to}")]
    InvalidStatusTransition {
        step: StepName,
        from: RuntimeStatus,
        to: RuntimeStatus,
    },

    #[error("Invalid step registry: {0}")]
    InvalidRegistry(String),

    #[error("Persisted snapshot is invalid: {0}")]
    CorruptSnapshot(String),

    #[error("Persistence failed: {0}")]
    Persistence(#[from] PersistenceError),

    #[error("Wizard has been destroyed")]
    Destroyed,
}

pub type WizardResult<T> = Result<T, WizardError>;

impl WizardError {
    /// Stable machine-readable name of the error kind
    pub fn kind(&self) -> &'static str {
        match self {
            WizardError::Validation { .. } => "validation",
            WizardError::ExitGuardRejected { .. } => "exit_guard_rejected",
            WizardError::EnterGuardRejected { .. } => "enter_guard_rejected",
            WizardError::HookExecution { .. } => "hook_execution",
            WizardError::TransitionInProgress => "transition_in_progress",
            WizardError::NoNextStep { .. } => "no_next_step",
            WizardError::NoHistory => "no_history",
            WizardError::UnknownStep(_) => "unknown_step",
            WizardError::StepNotActive { .. } => "step_not_active",
            WizardError::InvalidStatusTransition { .. } => "invalid_status_transition",
            WizardError::InvalidRegistry(_) => "invalid_registry",
            WizardError::CorruptSnapshot(_) => "corrupt_snapshot",
            WizardError::Persistence(_) => "persistence",
            WizardError::Destroyed => "destroyed",
        }
    }

    /// The step this error is about, if any
    pub fn step(&self) -> Option<&str> {
        match self {
            WizardError::Validation { step, .. }
            | WizardError::ExitGuardRejected { step }
            | WizardError::EnterGuardRejected { step }
            | WizardError::HookExecution { step, .. }
            | WizardError::NoNextStep { step }
            | WizardError::StepNotActive { step, .. }
            | WizardError::InvalidStatusTransition { step, .. } => Some(step),
            WizardError::UnknownStep(step) => Some(step),
            _ => None,
        }
    }

    /// Value recorded in `WizardState::errors` for this failure.
    ///
    /// Caller-supplied payloads (validation and hook failures) are returned
    /// verbatim; engine-generated failures become `{kind, message}` objects.
    pub fn to_value(&self) -> ErrorValue {
        match self {
            WizardError::Validation { error, .. } | WizardError::HookExecution { error, .. } => {
                error.clone()
            }
            other => json!({
                "kind": other.kind(),
                "message": other.to_string(),
            }),
        }
    }
}

/// Errors from a persistence adapter
#[derive(Debug, Error)]
pub enum PersistenceError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Serialization error: {0}")]
    Serde(#[from] serde_json::Error),
    #[error(transparent)]
    Database(#[from] DbError),
    #[error("{0}")]
    Other(String),
}

impl PersistenceError {
    pub fn other(message: impl Into<String>) -> Self {
        PersistenceError::Other(message.into())
    }
}
