//! Derived views over a registry and a state snapshot
//!
//! Everything here is read-only. The free functions are pure; the `Wizard`
//! methods apply them to the latest snapshot.

use crate::config::ProgressMode;
use crate::registry::StepRegistry;
use crate::runtime::Wizard;
use crate::state_machine::{StepData, StepName, WizardState};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{HashSet, VecDeque};

/// Progress summary for display
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Progress {
    /// "Step N of M" over the visible steps
    pub label: String,
    /// 0.0 to 100.0
    pub percent: f64,
    /// Countable steps that are complete
    pub completed: usize,
    /// Required, visible steps still counting toward progress
    pub total: usize,
}

fn effective_data(registry: &StepRegistry, state: &WizardState, step: &str) -> StepData {
    registry
        .get(step)
        .ok()
        .and_then(|def| def.resolve_data(&state.context, state.step_data(step)))
        .unwrap_or(Value::Null)
}

/// Steps reachable from the first step, the active step or any step in
/// history, following each step's `next` against the current context
fn reachable_steps(registry: &StepRegistry, state: &WizardState) -> HashSet<StepName> {
    let mut seen: HashSet<StepName> = HashSet::new();
    let mut queue: VecDeque<StepName> = VecDeque::new();

    let roots = std::iter::once(registry.first())
        .chain(std::iter::once(state.step.as_str()))
        .chain(state.history.iter().map(|h| h.step.as_str()));
    for root in roots {
        if registry.contains(root) && seen.insert(root.to_string()) {
            queue.push_back(root.to_string());
        }
    }

    while let Some(step) = queue.pop_front() {
        let data = effective_data(registry, state, &step);
        let targets = match registry.resolve_next(&step, &state.context, &data) {
            Ok(targets) => targets,
            Err(e) => {
                tracing::debug!(step = %step, error = %e, "Skipping unresolvable next");
                continue;
            }
        };
        for target in targets {
            if seen.insert(target.clone()) {
                queue.push_back(target);
            }
        }
    }

    seen
}

/// Reachable, non-hidden steps in registry order
pub fn ordered_step_names(registry: &StepRegistry, state: &WizardState) -> Vec<StepName> {
    let reachable = reachable_steps(registry, state);
    registry
        .order()
        .iter()
        .filter(|name| reachable.contains(*name) && !state.is_hidden(name))
        .cloned()
        .collect()
}

fn is_complete(registry: &StepRegistry, state: &WizardState, step: &str) -> bool {
    registry
        .get(step)
        .is_ok_and(|def| def.is_complete(state.step_data(step), &state.context))
}

/// Ordered steps whose completion check passes
pub fn completed_steps(registry: &StepRegistry, state: &WizardState) -> Vec<StepName> {
    ordered_step_names(registry, state)
        .into_iter()
        .filter(|step| is_complete(registry, state, step))
        .collect()
}

/// Ordered steps not yet complete, excluding skipped and terminated ones
pub fn remaining_steps(registry: &StepRegistry, state: &WizardState) -> Vec<StepName> {
    ordered_step_names(registry, state)
        .into_iter()
        .filter(|step| {
            state.status(step).counts_toward_progress() && !is_complete(registry, state, step)
        })
        .collect()
}

#[allow(clippy::cast_precision_loss)] // Step counts are tiny
pub fn progress(registry: &StepRegistry, state: &WizardState, mode: ProgressMode) -> Progress {
    let ordered = ordered_step_names(registry, state);

    let countable: Vec<&StepName> = ordered
        .iter()
        .filter(|step| {
            state.status(step).counts_toward_progress()
                && registry
                    .get(step)
                    .is_ok_and(|def| def.required_for(&state.context))
        })
        .collect();
    let done: Vec<&StepName> = countable
        .iter()
        .copied()
        .filter(|step| is_complete(registry, state, step))
        .collect();

    let percent = match mode {
        ProgressMode::Count => ratio(done.len() as f64, countable.len() as f64),
        ProgressMode::Weighted => {
            let weight = |steps: &[&StepName]| -> f64 {
                steps
                    .iter()
                    .filter_map(|step| registry.get(step).ok())
                    .map(|def| def.weight_for(&state.context).max(0.0))
                    .sum()
            };
            ratio(weight(&done), weight(&countable))
        }
    };

    let position = match ordered.iter().position(|s| *s == state.step) {
        Some(index) => index + 1,
        None => (done.len() + 1).min(ordered.len()),
    };

    Progress {
        label: format!("Step {position} of {}", ordered.len()),
        percent,
        completed: done.len(),
        total: countable.len(),
    }
}

fn ratio(part: f64, whole: f64) -> f64 {
    if whole <= 0.0 {
        0.0
    } else {
        (part / whole * 100.0).clamp(0.0, 100.0)
    }
}

// ============================================================================
// Wizard helpers
// ============================================================================

impl Wizard {
    pub fn ordered_steps(&self) -> Vec<StepName> {
        ordered_step_names(self.registry(), &self.state())
    }

    pub fn completed_steps(&self) -> Vec<StepName> {
        completed_steps(self.registry(), &self.state())
    }

    pub fn remaining_steps(&self) -> Vec<StepName> {
        remaining_steps(self.registry(), &self.state())
    }

    /// Progress using the configured mode
    pub fn progress(&self) -> Progress {
        progress(self.registry(), &self.state(), self.config().progress_mode)
    }

    /// Whether `next(None)` would pass validation and both guards right now.
    /// Hooks are not run and nothing is written.
    pub async fn can_go_next(&self) -> bool {
        let state = self.state();
        let data = effective_data(self.registry(), &state, &state.step);
        let Ok(targets) = self
            .registry()
            .resolve_next(&state.step, &state.context, &data)
        else {
            return false;
        };
        match targets.into_iter().next() {
            Some(target) => self.dry_run(&state, &target, data).await,
            None => false,
        }
    }

    /// Whether `go_to(target, None)` would pass validation and both guards
    pub async fn can_go_to(&self, target: &str) -> bool {
        if !self.registry().contains(target) {
            return false;
        }
        let state = self.state();
        let data = effective_data(self.registry(), &state, &state.step);
        self.dry_run(&state, target, data).await
    }

    pub fn can_go_back(&self) -> bool {
        let state = self.state();
        !self.is_destroyed()
            && !state.is_transitioning
            && self.config().history.is_active()
            && !state.history.is_empty()
    }

    async fn dry_run(&self, state: &WizardState, to: &str, data: StepData) -> bool {
        if self.is_destroyed() || state.is_transitioning {
            return false;
        }
        let registry = self.registry();
        let (Ok(from_def), Ok(to_def)) = (registry.get(&state.step), registry.get(to)) else {
            return false;
        };

        if let Some(validate) = from_def.validator() {
            if validate(data.clone(), state.context.clone()).await.is_err() {
                return false;
            }
        }
        if let Some(can_exit) = from_def.exit_guard() {
            let args = crate::registry::GuardArgs {
                from: state.step.clone(),
                to: to.to_string(),
                context: state.context.clone(),
                data: Some(data),
            };
            if !can_exit(args).await {
                return false;
            }
        }
        if let Some(can_enter) = to_def.enter_guard() {
            let args = crate::registry::GuardArgs {
                from: state.step.clone(),
                to: to.to_string(),
                context: state.context.clone(),
                data: state.step_data(to).cloned(),
            };
            if !can_enter(args).await {
                return false;
            }
        }
        true
    }
}
