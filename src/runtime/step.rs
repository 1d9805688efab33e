//! Per-step handle

use super::engine::Wizard;
use crate::error::{ErrorValue, WizardError, WizardResult};
use crate::state_machine::{RuntimeStatus, StepData, StepMeta, StepName, WizardState};
use std::fmt;
use std::sync::Arc;

/// View of one step, bound to the snapshot it was created from.
///
/// Reads come from that snapshot. Mutations go through the wizard and return
/// a new handle over the resulting snapshot; the old handle keeps showing the
/// old values.
#[derive(Clone)]
pub struct StepHandle {
    wizard: Wizard,
    name: StepName,
    state: Arc<WizardState>,
}

impl fmt::Debug for StepHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StepHandle")
            .field("name", &self.name)
            .field("status", &self.status())
            .field("is_current", &self.is_current())
            .finish_non_exhaustive()
    }
}

/// Same step, same snapshot
impl PartialEq for StepHandle {
    fn eq(&self, other: &Self) -> bool {
        self.name == other.name && Arc::ptr_eq(&self.state, &other.state)
    }
}

impl StepHandle {
    pub(super) fn new(wizard: Wizard, name: StepName, state: Arc<WizardState>) -> Self {
        Self {
            wizard,
            name,
            state,
        }
    }

    fn rebind(&self, state: Arc<WizardState>) -> Self {
        Self::new(self.wizard.clone(), self.name.clone(), state)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Snapshot this handle reads from
    pub fn state(&self) -> &Arc<WizardState> {
        &self.state
    }

    /// Committed data
    pub fn data(&self) -> Option<&StepData> {
        self.state.step_data(&self.name)
    }

    /// Committed data, falling back to the step's default
    pub fn resolved_data(&self) -> Option<StepData> {
        let definition = self.wizard.registry().get(&self.name).ok()?;
        definition.resolve_data(&self.state.context, self.data())
    }

    pub fn status(&self) -> RuntimeStatus {
        self.state.status(&self.name)
    }

    pub fn error(&self) -> Option<&ErrorValue> {
        self.state.error(&self.name)
    }

    pub fn meta(&self) -> Option<&StepMeta> {
        self.state.meta(&self.name)
    }

    pub fn attempts(&self) -> u32 {
        self.state.attempts.get(&self.name).copied().unwrap_or(0)
    }

    pub fn is_current(&self) -> bool {
        self.state.step == self.name
    }

    // ========================================================================
    // Mutation
    // ========================================================================

    pub fn set_data(&self, data: StepData) -> WizardResult<Self> {
        self.wizard
            .set_step_data(&self.name, data)
            .map(|s| self.rebind(s))
    }

    /// Shallow-merge `patch` onto the existing data
    pub fn update_data(&self, patch: StepData) -> WizardResult<Self> {
        self.wizard
            .merge_step_data(&self.name, patch)
            .map(|s| self.rebind(s))
    }

    pub fn update_data_with<F>(&self, f: F) -> WizardResult<Self>
    where
        F: FnOnce(Option<&StepData>) -> StepData,
    {
        self.wizard
            .update_step_data(&self.name, f)
            .map(|s| self.rebind(s))
    }

    /// Record `error` and move to `error` status
    pub fn mark_error(&self, error: ErrorValue) -> WizardResult<Self> {
        self.wizard
            .mark_step_error(&self.name, error)
            .map(|s| self.rebind(s))
    }

    pub fn clear_error(&self) -> WizardResult<Self> {
        self.wizard
            .clear_step_error(&self.name)
            .map(|s| self.rebind(s))
    }

    fn mark(&self, status: RuntimeStatus) -> WizardResult<Self> {
        self.wizard
            .set_step_status(&self.name, status)
            .map(|s| self.rebind(s))
    }

    pub fn mark_loading(&self) -> WizardResult<Self> {
        self.mark(RuntimeStatus::Loading)
    }

    pub fn mark_idle(&self) -> WizardResult<Self> {
        self.mark(RuntimeStatus::Idle)
    }

    pub fn mark_skipped(&self) -> WizardResult<Self> {
        self.mark(RuntimeStatus::Skipped)
    }

    pub fn mark_terminated(&self) -> WizardResult<Self> {
        self.mark(RuntimeStatus::Terminated)
    }

    pub fn set_meta(&self, meta: StepMeta) -> WizardResult<Self> {
        self.wizard
            .set_step_meta(&self.name, meta)
            .map(|s| self.rebind(s))
    }

    pub fn update_meta<F>(&self, f: F) -> WizardResult<Self>
    where
        F: FnOnce(&mut StepMeta),
    {
        self.wizard
            .update_step_meta(&self.name, f)
            .map(|s| self.rebind(s))
    }

    // ========================================================================
    // Navigation (active step only)
    // ========================================================================

    fn ensure_active(&self) -> WizardResult<()> {
        let active = self.wizard.current_step();
        if active == self.name {
            Ok(())
        } else {
            Err(WizardError::StepNotActive {
                step: self.name.clone(),
                active,
            })
        }
    }

    pub async fn next(&self, data: Option<StepData>) -> WizardResult<Arc<WizardState>> {
        self.ensure_active()?;
        self.wizard.next(data).await
    }

    pub async fn go_to(
        &self,
        target: &str,
        data: Option<StepData>,
    ) -> WizardResult<Arc<WizardState>> {
        self.ensure_active()?;
        self.wizard.go_to(target, data).await
    }

    pub async fn back(&self) -> WizardResult<Arc<WizardState>> {
        self.ensure_active()?;
        self.wizard.back().await
    }
}
