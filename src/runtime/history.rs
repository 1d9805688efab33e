//! History stack and whole-state snapshots

use super::engine::Wizard;
use crate::config::HistoryConfig;
use crate::error::{WizardError, WizardResult};
use crate::state_machine::{HistoryEntry, WizardEvent, WizardState};
use std::sync::Arc;

/// Push `entry`, evicting the oldest entries beyond the configured bound.
/// Nothing is recorded while history is disabled.
pub(crate) fn push_history(
    history: &mut Vec<HistoryEntry>,
    entry: HistoryEntry,
    config: &HistoryConfig,
) {
    if !config.is_active() {
        return;
    }
    history.push(entry);
    trim_history(history, config);
}

pub(crate) fn trim_history(history: &mut Vec<HistoryEntry>, config: &HistoryConfig) {
    if !config.is_active() {
        history.clear();
        return;
    }
    if history.len() > config.max_size {
        let excess = history.len() - config.max_size;
        history.drain(..excess);
    }
}

impl Wizard {
    /// Independent copy of the whole state
    pub fn snapshot(&self) -> WizardState {
        WizardState::clone(&self.state())
    }

    /// Replace the live state wholesale, bypassing guards and hooks.
    ///
    /// Every step the snapshot names must be registered. Busy flags are
    /// cleared and history is trimmed to the configured bound.
    pub fn restore(&self, snapshot: WizardState) -> WizardResult<Arc<WizardState>> {
        let registry = &self.shared.registry;
        if let Some(unknown) = snapshot.referenced_steps().find(|s| !registry.contains(s)) {
            return Err(WizardError::UnknownStep(unknown.to_string()));
        }

        let history = self.shared.config.history;
        let step = snapshot.step.clone();
        let (state, ()) = self.mutate(|state| {
            if state.is_transitioning {
                return Err(WizardError::TransitionInProgress);
            }
            *state = snapshot;
            state.is_loading = false;
            state.is_transitioning = false;
            trim_history(&mut state.history, &history);
            Ok(())
        })?;

        let _ = self.shared.events.send(WizardEvent::Restored { step: step.clone() });
        tracing::info!(wizard_id = %self.id(), step = %step, "State restored from snapshot");
        Ok(state)
    }
}
