//! Wizard state types

use crate::error::ErrorValue;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::fmt;

/// Step identifier, unique within a registry
pub type StepName = String;

/// Data carried by a single step
pub type StepData = Value;

/// Payload shared by every step of a wizard
pub type Context = Value;

// ============================================================================
// Runtime Status
// ============================================================================

/// Per-step runtime status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RuntimeStatus {
    #[default]
    Idle,
    Loading,
    Error,
    /// Step failed for good; no further status changes
    Terminated,
    /// Step deliberately bypassed
    Skipped,
}

impl RuntimeStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            RuntimeStatus::Idle => "idle",
            RuntimeStatus::Loading => "loading",
            RuntimeStatus::Error => "error",
            RuntimeStatus::Terminated => "terminated",
            RuntimeStatus::Skipped => "skipped",
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, RuntimeStatus::Terminated)
    }

    /// Whether a step in this status still counts toward required progress
    pub fn counts_toward_progress(self) -> bool {
        !matches!(self, RuntimeStatus::Terminated | RuntimeStatus::Skipped)
    }
}

impl fmt::Display for RuntimeStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ============================================================================
// Step Metadata
// ============================================================================

/// Descriptive metadata attached to a step
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StepMeta {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tags: Vec<String>,
    /// Hidden steps are left out of visible step lists and progress
    #[serde(default)]
    pub hidden: bool,
    /// Caller-defined fields
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl StepMeta {
    pub fn labeled(label: impl Into<String>) -> Self {
        Self {
            label: Some(label.into()),
            ..Self::default()
        }
    }

    #[must_use]
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    #[must_use]
    pub fn with_tag(mut self, tag: impl Into<String>) -> Self {
        self.tags.push(tag.into());
        self
    }

    #[must_use]
    pub fn hidden(mut self) -> Self {
        self.hidden = true;
        self
    }

    #[must_use]
    pub fn with_extra(mut self, key: impl Into<String>, value: Value) -> Self {
        self.extra.insert(key.into(), value);
        self
    }
}

// ============================================================================
// History
// ============================================================================

/// Snapshot of the navigable part of the state, taken before a forward transition
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoryEntry {
    pub step: StepName,
    pub context: Context,
    pub data: BTreeMap<StepName, StepData>,
}

impl HistoryEntry {
    pub fn capture(state: &WizardState) -> Self {
        Self {
            step: state.step.clone(),
            context: state.context.clone(),
            data: state.data.clone(),
        }
    }
}

// ============================================================================
// Wizard State
// ============================================================================

/// The complete state of one wizard instance.
///
/// Every update produces a new value; the store hands out shared immutable
/// snapshots, so a `WizardState` held by a caller never changes underneath it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WizardState {
    /// Active step
    pub step: StepName,
    /// Committed data per step
    #[serde(default)]
    pub data: BTreeMap<StepName, StepData>,
    #[serde(default)]
    pub context: Context,
    /// Runtime status per step; absent means idle
    #[serde(default)]
    pub runtime: BTreeMap<StepName, RuntimeStatus>,
    #[serde(default)]
    pub meta: BTreeMap<StepName, StepMeta>,
    /// Last failure per step
    #[serde(default)]
    pub errors: BTreeMap<StepName, ErrorValue>,
    /// Attempt count of the last retried phase per step
    #[serde(default)]
    pub attempts: BTreeMap<StepName, u32>,
    /// Oldest first
    #[serde(default)]
    pub history: Vec<HistoryEntry>,
    #[serde(default)]
    pub is_loading: bool,
    #[serde(default)]
    pub is_transitioning: bool,
}

impl WizardState {
    pub fn new(step: impl Into<StepName>, context: Context) -> Self {
        Self {
            step: step.into(),
            data: BTreeMap::new(),
            context,
            runtime: BTreeMap::new(),
            meta: BTreeMap::new(),
            errors: BTreeMap::new(),
            attempts: BTreeMap::new(),
            history: Vec::new(),
            is_loading: false,
            is_transitioning: false,
        }
    }

    pub fn status(&self, step: &str) -> RuntimeStatus {
        self.runtime.get(step).copied().unwrap_or_default()
    }

    pub fn step_data(&self, step: &str) -> Option<&StepData> {
        self.data.get(step)
    }

    pub fn error(&self, step: &str) -> Option<&ErrorValue> {
        self.errors.get(step)
    }

    pub fn meta(&self, step: &str) -> Option<&StepMeta> {
        self.meta.get(step)
    }

    pub fn is_hidden(&self, step: &str) -> bool {
        self.meta.get(step).is_some_and(|m| m.hidden)
    }

    pub fn is_busy(&self) -> bool {
        self.is_loading || self.is_transitioning
    }

    /// Apply a persisted snapshot on top of this state.
    ///
    /// Scalars present in the snapshot replace ours; maps are extended key by
    /// key. Busy flags are never restored.
    #[must_use]
    pub fn merge_persisted(&self, persisted: PersistedState) -> Self {
        let mut next = self.clone();
        if let Some(step) = persisted.step {
            next.step = step;
        }
        if let Some(context) = persisted.context {
            next.context = context;
        }
        if let Some(data) = persisted.data {
            next.data.extend(data);
        }
        if let Some(runtime) = persisted.runtime {
            next.runtime.extend(runtime);
        }
        if let Some(meta) = persisted.meta {
            next.meta.extend(meta);
        }
        if let Some(errors) = persisted.errors {
            next.errors.extend(errors);
        }
        if let Some(attempts) = persisted.attempts {
            next.attempts.extend(attempts);
        }
        if let Some(history) = persisted.history {
            next.history = history;
        }
        next.is_loading = false;
        next.is_transitioning = false;
        next
    }

    /// Every step name this state refers to
    pub(crate) fn referenced_steps(&self) -> impl Iterator<Item = &str> {
        std::iter::once(self.step.as_str())
            .chain(self.data.keys().map(String::as_str))
            .chain(self.runtime.keys().map(String::as_str))
            .chain(self.history.iter().map(|h| h.step.as_str()))
    }
}

/// Persisted form of a wizard state, possibly partial.
///
/// Adapters may return snapshots written by older versions or by hand, so
/// every field is optional.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PersistedState {
    pub step: Option<StepName>,
    pub data: Option<BTreeMap<StepName, StepData>>,
    pub context: Option<Context>,
    pub runtime: Option<BTreeMap<StepName, RuntimeStatus>>,
    pub meta: Option<BTreeMap<StepName, StepMeta>>,
    pub errors: Option<BTreeMap<StepName, ErrorValue>>,
    pub attempts: Option<BTreeMap<StepName, u32>>,
    pub history: Option<Vec<HistoryEntry>>,
}

impl From<WizardState> for PersistedState {
    fn from(state: WizardState) -> Self {
        Self {
            step: Some(state.step),
            data: Some(state.data),
            context: Some(state.context),
            runtime: Some(state.runtime),
            meta: Some(state.meta),
            errors: Some(state.errors),
            attempts: Some(state.attempts),
            history: Some(state.history),
        }
    }
}

/// Shallow merge of `patch` onto `base`.
///
/// When both are objects the patch keys overwrite the base keys; otherwise
/// the patch replaces the base.
pub fn merge_data(base: Option<&StepData>, patch: StepData) -> StepData {
    match (base, patch) {
        (Some(Value::Object(base)), Value::Object(patch)) => {
            let mut merged = base.clone();
            merged.extend(patch);
            Value::Object(merged)
        }
        (_, patch) => patch,
    }
}
