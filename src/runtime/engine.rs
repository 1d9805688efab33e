//! Transition engine
//!
//! A `Wizard` owns one flow instance: the store, the registry it was built
//! from, its observers and its persistence queue. Clones share everything.
//!
//! Forward transitions run validate, exit guard, exit hook, enter guard, then
//! commit the step change together with the history entry, then the enter
//! hook, observers and persistence. At most one transition is in flight; a
//! second one fails fast with `TransitionInProgress`.

use super::history::{push_history, trim_history};
use super::hooks::{with_retry, HookHandle};
use super::persistence::PersistenceQueue;
use super::step::StepHandle;
use super::traits::PersistenceAdapter;
use crate::config::{HistoryConfig, WizardConfig};
use crate::error::{ErrorValue, HookPhase, PersistenceError, WizardError, WizardResult};
use crate::registry::{GuardArgs, HookArgs, StepRegistry};
use crate::state_machine::{
    can_transition, merge_data, transition_status, Context, HistoryEntry, RuntimeStatus,
    StepData, StepMeta, StepName, TransitionEvent, TransitionKind, WizardEvent, WizardState,
};
use crate::store::{ListenerSet, Store, Subscription};
use serde_json::Value;
use std::fmt;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;
use tokio::sync::{broadcast, watch};

pub type TransitionObserver = dyn Fn(&TransitionEvent) + Send + Sync;

pub(super) struct WizardShared {
    pub(super) id: String,
    pub(super) registry: Arc<StepRegistry>,
    pub(super) config: WizardConfig,
    pub(super) store: Store,
    /// State the wizard was seeded with, before any persisted snapshot
    pub(super) initial: Arc<WizardState>,
    pub(super) events: broadcast::Sender<WizardEvent>,
    pub(super) observers: ListenerSet<TransitionObserver>,
    pub(super) persistence: PersistenceQueue,
}

/// Handle to one running wizard
#[derive(Clone)]
pub struct Wizard {
    pub(super) shared: Arc<WizardShared>,
}

impl fmt::Debug for Wizard {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Wizard")
            .field("id", &self.shared.id)
            .field("store", &self.shared.store)
            .field("config", &self.shared.config)
            .finish_non_exhaustive()
    }
}

enum Target {
    /// First candidate of the current step's `next`
    Resolve,
    Step(StepName),
}

// ============================================================================
// Builder
// ============================================================================

/// Builder for [`Wizard`]
pub struct WizardBuilder {
    registry: Arc<StepRegistry>,
    initial_step: Option<StepName>,
    initial_context: Context,
    config: WizardConfig,
    persistence: Option<Arc<dyn PersistenceAdapter>>,
    observers: Vec<Arc<TransitionObserver>>,
    id: Option<String>,
}

impl fmt::Debug for WizardBuilder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WizardBuilder")
            .field("initial_step", &self.initial_step)
            .field("config", &self.config)
            .field("persistence", &self.persistence.is_some())
            .field("observers", &self.observers.len())
            .finish_non_exhaustive()
    }
}

#[allow(clippy::return_self_not_must_use)] // Builder methods
impl WizardBuilder {
    /// Defaults to the first step in registry order
    pub fn initial_step(mut self, step: impl Into<StepName>) -> Self {
        self.initial_step = Some(step.into());
        self
    }

    pub fn initial_context(mut self, context: Context) -> Self {
        self.initial_context = context;
        self
    }

    pub fn config(mut self, config: WizardConfig) -> Self {
        self.config = config;
        self
    }

    pub fn history(mut self, history: HistoryConfig) -> Self {
        self.config.history = history;
        self
    }

    pub fn persistence(mut self, adapter: impl PersistenceAdapter + 'static) -> Self {
        self.persistence = Some(Arc::new(adapter));
        self
    }

    pub fn on_transition<F>(mut self, observer: F) -> Self
    where
        F: Fn(&TransitionEvent) + Send + Sync + 'static,
    {
        self.observers.push(Arc::new(observer));
        self
    }

    /// Instance id used in logs; a random UUID when unset
    pub fn id(mut self, id: impl Into<String>) -> Self {
        self.id = Some(id.into());
        self
    }

    /// Seed the state, merge any persisted snapshot and start the persistence worker.
    ///
    /// Fails with `UnknownStep` when the initial step or a step named by the
    /// persisted snapshot is not registered, and with `CorruptSnapshot` when the
    /// adapter returns data of the wrong shape.
    pub async fn build(self) -> WizardResult<Wizard> {
        let registry = self.registry;
        let initial_step = match self.initial_step {
            Some(step) => step,
            None => registry.first().to_string(),
        };
        registry.get(&initial_step)?;

        let mut initial = WizardState::new(initial_step, self.initial_context);
        for name in registry.order() {
            if let Some(meta) = registry.get(name)?.default_meta() {
                initial.meta.insert(name.clone(), meta.clone());
            }
        }

        let id = self.id.unwrap_or_else(|| uuid::Uuid::new_v4().to_string());

        let mut state = initial.clone();
        let mut restored = false;
        if let Some(adapter) = &self.persistence {
            match adapter.load().await {
                Ok(Some(persisted)) => {
                    state = initial.merge_persisted(persisted);
                    restored = true;
                }
                Ok(None) => {}
                Err(PersistenceError::Serde(e)) => {
                    tracing::warn!(wizard_id = %id, error = %e, "Persisted snapshot is corrupt");
                    return Err(WizardError::CorruptSnapshot(e.to_string()));
                }
                Err(e) => return Err(e.into()),
            }
        }
        if let Some(unknown) = state.referenced_steps().find(|s| !registry.contains(s)) {
            return Err(WizardError::UnknownStep(unknown.to_string()));
        }
        trim_history(&mut state.history, &self.config.history);

        let (events, _) = broadcast::channel(self.config.event_capacity.max(1));
        let persistence = match self.persistence {
            Some(adapter) => PersistenceQueue::spawn(id.clone(), adapter, events.clone()),
            None => PersistenceQueue::disabled(),
        };

        let observers = ListenerSet::new();
        for observer in self.observers {
            observers.insert(observer);
        }

        tracing::info!(
            wizard_id = %id,
            step = %state.step,
            steps = registry.len(),
            restored,
            "Wizard created"
        );

        Ok(Wizard {
            shared: Arc::new(WizardShared {
                id,
                registry,
                config: self.config,
                store: Store::new(state),
                initial: Arc::new(initial),
                events,
                observers,
                persistence,
            }),
        })
    }
}

// ============================================================================
// Flag guards
// ============================================================================

/// Clears `is_transitioning` when dropped, unless released explicitly
struct TransitionGuard<'a> {
    store: &'a Store,
    armed: bool,
}

impl<'a> TransitionGuard<'a> {
    /// Set the flag, failing if another transition holds it
    fn acquire(
        store: &'a Store,
        check: impl FnOnce(&WizardState) -> WizardResult<()>,
    ) -> WizardResult<(Self, Arc<WizardState>)> {
        let (start, ()) = store.try_update(|state| {
            if state.is_transitioning {
                return Err(WizardError::TransitionInProgress);
            }
            check(state)?;
            state.is_transitioning = true;
            Ok(())
        })?;
        Ok((Self { store, armed: true }, start))
    }

    /// Clear the flag in the same write as `f`
    fn release<F>(mut self, f: F) -> WizardResult<Arc<WizardState>>
    where
        F: FnOnce(&mut WizardState),
    {
        self.armed = false;
        self.store.update(|state| {
            state.is_transitioning = false;
            f(state);
        })
    }
}

impl Drop for TransitionGuard<'_> {
    fn drop(&mut self) {
        if self.armed {
            let _ = self.store.update(|state| state.is_transitioning = false);
        }
    }
}

/// Holds `is_loading` (and the step's `loading` status) while an enter hook runs
struct LoadingGuard<'a> {
    store: &'a Store,
    step: StepName,
    marked: bool,
    armed: bool,
}

impl<'a> LoadingGuard<'a> {
    fn begin(store: &'a Store, step: &str) -> WizardResult<Self> {
        let mut marked = false;
        store.update(|state| {
            state.is_loading = true;
            let current = state.status(step);
            if current != RuntimeStatus::Loading && can_transition(current, RuntimeStatus::Loading)
            {
                state.runtime.insert(step.to_string(), RuntimeStatus::Loading);
                marked = true;
            }
        })?;
        Ok(Self {
            store,
            step: step.to_string(),
            marked,
            armed: true,
        })
    }

    fn unwind(state: &mut WizardState, step: &str, marked: bool) {
        state.is_loading = false;
        if marked && state.status(step) == RuntimeStatus::Loading {
            state.runtime.insert(step.to_string(), RuntimeStatus::Idle);
        }
    }

    fn finish<F>(mut self, f: F) -> WizardResult<Arc<WizardState>>
    where
        F: FnOnce(&mut WizardState),
    {
        self.armed = false;
        let (step, marked) = (self.step.clone(), self.marked);
        self.store.update(|state| {
            Self::unwind(state, &step, marked);
            f(state);
        })
    }
}

impl Drop for LoadingGuard<'_> {
    fn drop(&mut self) {
        if self.armed {
            let (step, marked) = (&self.step, self.marked);
            let _ = self
                .store
                .update(|state| Self::unwind(state, step, marked));
        }
    }
}

// ============================================================================
// Wizard
// ============================================================================

impl Wizard {
    pub fn builder(registry: impl Into<Arc<StepRegistry>>) -> WizardBuilder {
        WizardBuilder {
            registry: registry.into(),
            initial_step: None,
            initial_context: Value::Object(serde_json::Map::new()),
            config: WizardConfig::default(),
            persistence: None,
            observers: Vec::new(),
            id: None,
        }
    }

    pub fn id(&self) -> &str {
        &self.shared.id
    }

    pub fn registry(&self) -> &StepRegistry {
        &self.shared.registry
    }

    pub fn config(&self) -> &WizardConfig {
        &self.shared.config
    }

    /// Latest committed snapshot
    pub fn state(&self) -> Arc<WizardState> {
        self.shared.store.get_state()
    }

    pub fn current_step(&self) -> StepName {
        self.state().step.clone()
    }

    /// Handle bound to `name` and the current snapshot
    pub fn step(&self, name: &str) -> WizardResult<StepHandle> {
        self.shared.registry.get(name)?;
        Ok(StepHandle::new(self.clone(), name.to_string(), self.state()))
    }

    /// Handle bound to the active step
    pub fn current(&self) -> StepHandle {
        let state = self.state();
        StepHandle::new(self.clone(), state.step.clone(), state)
    }

    // ========================================================================
    // Navigation
    // ========================================================================

    /// Move to the first candidate of the current step's `next`.
    ///
    /// `data` is validated and committed for the current step; without it the
    /// step's committed data (or its default) is validated instead.
    pub async fn next(&self, data: Option<StepData>) -> WizardResult<Arc<WizardState>> {
        self.transition(Target::Resolve, data, TransitionKind::Next)
            .await
    }

    /// Move to `target` whether or not it is listed in `next`
    pub async fn go_to(
        &self,
        target: &str,
        data: Option<StepData>,
    ) -> WizardResult<Arc<WizardState>> {
        self.shared.registry.get(target)?;
        self.transition(Target::Step(target.to_string()), data, TransitionKind::GoTo)
            .await
    }

    /// Restore the most recent history entry.
    ///
    /// Exit guards and hooks of the step being left do not run; the restored
    /// step's `before_enter` does.
    pub async fn back(&self) -> WizardResult<Arc<WizardState>> {
        let history_active = self.shared.config.history.is_active();
        let store = &self.shared.store;
        let (guard, start) = TransitionGuard::acquire(store, |state| {
            if !history_active || state.history.is_empty() {
                return Err(WizardError::NoHistory);
            }
            Ok(())
        })?;

        let from = start.step.clone();
        let Some(entry) = start.history.last().cloned() else {
            return Err(WizardError::NoHistory);
        };
        self.shared.registry.get(&entry.step)?;
        let to = entry.step.clone();

        tracing::debug!(wizard_id = %self.shared.id, from = %from, to = %to, "Going back");

        guard.release(|state| {
            state.history.pop();
            state.step = entry.step;
            state.context = entry.context;
            state.data = entry.data;
        })?;

        let data = start.step_data(&from).cloned();
        self.finish_transition(from, to, data, TransitionKind::Back)
            .await
    }

    #[allow(clippy::too_many_lines)]
    async fn transition(
        &self,
        target: Target,
        data: Option<StepData>,
        kind: TransitionKind,
    ) -> WizardResult<Arc<WizardState>> {
        let store = &self.shared.store;
        let registry = &self.shared.registry;
        let (guard, start) = TransitionGuard::acquire(store, |_| Ok(()))?;

        let from = start.step.clone();
        let definition = registry.get(&from)?;
        let entry = HistoryEntry::capture(&start);
        let retry = definition.retry_for(&start.context);

        // 1. Validate
        let data = match data {
            Some(data) => data,
            None => definition
                .resolve_data(&start.context, start.step_data(&from))
                .unwrap_or(Value::Null),
        };
        if let Some(validate) = definition.validator() {
            let context = start.context.clone();
            let result = with_retry(store, &from, HookPhase::Validate, retry, || {
                validate(data.clone(), context.clone())
            })
            .await;
            if let Err(error) = result {
                tracing::debug!(wizard_id = %self.shared.id, step = %from, error = %error, "Validation failed");
                return Err(self.fail(
                    guard,
                    &from,
                    WizardError::Validation {
                        step: from.clone(),
                        error,
                    },
                ));
            }
        }

        // 2. Commit the current step's data
        let committed = store.update(|state| {
            state.data.insert(from.clone(), data.clone());
            clear_error(state, &from);
        })?;

        // 3. Resolve the target against the committed data. The data stays
        // committed on failure, so the failure path persists it.
        let resolved = match target {
            Target::Step(step) => Ok(step),
            Target::Resolve => registry
                .resolve_next(&from, &committed.context, &data)
                .and_then(|targets| {
                    targets
                        .into_iter()
                        .next()
                        .ok_or_else(|| WizardError::NoNextStep { step: from.clone() })
                }),
        };
        let (to, target_definition) =
            match resolved.and_then(|to| registry.get(&to).map(|def| (to, def))) {
                Ok(found) => found,
                Err(e) => return Err(self.fail(guard, &from, e)),
            };

        tracing::debug!(
            wizard_id = %self.shared.id,
            from = %from,
            to = %to,
            kind = kind.as_str(),
            "Transition started"
        );

        // 4. Exit guard
        if let Some(can_exit) = definition.exit_guard() {
            let args = GuardArgs {
                from: from.clone(),
                to: to.clone(),
                context: store.get_state().context.clone(),
                data: Some(data.clone()),
            };
            if !can_exit(args).await {
                tracing::debug!(wizard_id = %self.shared.id, step = %from, "Exit guard vetoed");
                return Err(self.fail(
                    guard,
                    &from,
                    WizardError::ExitGuardRejected { step: from.clone() },
                ));
            }
        }

        // 5. Exit hook
        if let Some(before_exit) = definition.exit_hook() {
            let result = with_retry(store, &from, HookPhase::BeforeExit, retry, || {
                before_exit(HookArgs {
                    step: from.clone(),
                    from: from.clone(),
                    to: to.clone(),
                    context: store.get_state().context.clone(),
                    data: Some(data.clone()),
                    handle: self.hook_handle(&from),
                })
            })
            .await;
            if let Err(error) = result {
                self.report_hook_failure(&from, HookPhase::BeforeExit, &error);
                return Err(self.fail(
                    guard,
                    &from,
                    WizardError::HookExecution {
                        step: from.clone(),
                        phase: HookPhase::BeforeExit,
                        error,
                    },
                ));
            }
        }

        // 6. Enter guard
        if let Some(can_enter) = target_definition.enter_guard() {
            let current = store.get_state();
            let args = GuardArgs {
                from: from.clone(),
                to: to.clone(),
                context: current.context.clone(),
                data: current.step_data(&to).cloned(),
            };
            if !can_enter(args).await {
                tracing::debug!(wizard_id = %self.shared.id, step = %to, "Enter guard vetoed");
                return Err(self.fail(
                    guard,
                    &to,
                    WizardError::EnterGuardRejected { step: to.clone() },
                ));
            }
        }

        // 7. History and step change in one write
        let history = self.shared.config.history;
        guard.release(|state| {
            push_history(&mut state.history, entry, &history);
            state.step = to.clone();
        })?;

        self.finish_transition(from, to, Some(data), kind).await
    }

    /// Post-commit phases shared by every transition kind: enter hook,
    /// observers, persistence
    async fn finish_transition(
        &self,
        from: StepName,
        to: StepName,
        data: Option<StepData>,
        kind: TransitionKind,
    ) -> WizardResult<Arc<WizardState>> {
        let entered = self.run_enter_hook(&from, &to).await;

        let state = self.state();
        self.dispatch(TransitionEvent {
            from: from.clone(),
            to: to.clone(),
            context: state.context.clone(),
            data,
            kind,
        });
        self.persist();

        tracing::info!(
            wizard_id = %self.shared.id,
            from = %from,
            to = %to,
            kind = kind.as_str(),
            "Transition committed"
        );

        entered.map(|()| self.state())
    }

    async fn run_enter_hook(&self, from: &str, to: &str) -> WizardResult<()> {
        let store = &self.shared.store;
        let definition = self.shared.registry.get(to)?;
        let Some(before_enter) = definition.enter_hook() else {
            return Ok(());
        };

        let loading = LoadingGuard::begin(store, to)?;
        let start = store.get_state();
        let retry = definition.retry_for(&start.context);
        let data = definition.resolve_data(&start.context, start.step_data(to));

        let result = with_retry(store, to, HookPhase::BeforeEnter, retry, || {
            before_enter(HookArgs {
                step: to.to_string(),
                from: from.to_string(),
                to: to.to_string(),
                context: store.get_state().context.clone(),
                data: data.clone(),
                handle: self.hook_handle(to),
            })
        })
        .await;

        match result {
            Ok(seed) => {
                loading.finish(|state| {
                    if let Some(seed) = seed {
                        let merged = merge_data(state.data.get(to), seed);
                        state.data.insert(to.to_string(), merged);
                    }
                })?;
                Ok(())
            }
            Err(error) => {
                self.report_hook_failure(to, HookPhase::BeforeEnter, &error);
                loading.finish(|state| record_hook_error(state, to, error.clone()))?;
                Err(WizardError::HookExecution {
                    step: to.to_string(),
                    phase: HookPhase::BeforeEnter,
                    error,
                })
            }
        }
    }

    /// Record `error` under `step`, clear the transition flag and persist.
    /// Hook failures also move the step to `error`.
    fn fail(&self, guard: TransitionGuard<'_>, step: &str, error: WizardError) -> WizardError {
        let value = error.to_value();
        let hook_failed = matches!(error, WizardError::HookExecution { .. });
        if guard
            .release(|state| {
                if hook_failed {
                    record_hook_error(state, step, value);
                } else {
                    state.errors.insert(step.to_string(), value);
                }
            })
            .is_ok()
        {
            self.persist();
        }
        error
    }

    fn report_hook_failure(&self, step: &str, phase: HookPhase, error: &ErrorValue) {
        tracing::warn!(
            wizard_id = %self.shared.id,
            step = %step,
            phase = %phase,
            error = %error,
            "Hook failed"
        );
        let _ = self.shared.events.send(WizardEvent::HookFailed {
            step: step.to_string(),
            phase,
            error: error.clone(),
        });
    }

    fn hook_handle(&self, step: &str) -> HookHandle {
        HookHandle::new(step, self.shared.store.clone(), self.shared.events.clone())
    }

    /// Observers run synchronously; a panicking observer is logged and skipped
    fn dispatch(&self, event: TransitionEvent) {
        for observer in self.shared.observers.snapshot() {
            if catch_unwind(AssertUnwindSafe(|| observer(&event))).is_err() {
                tracing::warn!(
                    wizard_id = %self.shared.id,
                    from = %event.from,
                    to = %event.to,
                    "Transition observer panicked"
                );
            }
        }
        let _ = self.shared.events.send(WizardEvent::Transition(event));
    }

    pub(super) fn persist(&self) {
        self.shared.persistence.save(self.state());
    }

    // ========================================================================
    // Direct mutation
    // ========================================================================

    /// Apply `f` to a copy of the state, commit and persist
    pub(super) fn mutate<F, T>(&self, f: F) -> WizardResult<(Arc<WizardState>, T)>
    where
        F: FnOnce(&mut WizardState) -> WizardResult<T>,
    {
        let committed = self.shared.store.try_update(f)?;
        self.persist();
        Ok(committed)
    }

    fn mutate_step<F>(&self, step: &str, f: F) -> WizardResult<Arc<WizardState>>
    where
        F: FnOnce(&mut WizardState) -> WizardResult<()>,
    {
        self.shared.registry.get(step)?;
        self.mutate(f).map(|(state, ())| state)
    }

    pub fn update_context<F>(&self, f: F) -> WizardResult<Arc<WizardState>>
    where
        F: FnOnce(&mut Context),
    {
        self.mutate(|state| {
            f(&mut state.context);
            Ok(())
        })
        .map(|(state, ())| state)
    }

    /// Replace a step's data and clear its error
    pub fn set_step_data(&self, step: &str, data: StepData) -> WizardResult<Arc<WizardState>> {
        self.mutate_step(step, |state| {
            state.data.insert(step.to_string(), data);
            clear_error(state, step);
            Ok(())
        })
    }

    /// Shallow-merge `patch` into a step's data
    pub fn merge_step_data(&self, step: &str, patch: StepData) -> WizardResult<Arc<WizardState>> {
        self.mutate_step(step, |state| {
            let merged = merge_data(state.data.get(step), patch);
            state.data.insert(step.to_string(), merged);
            clear_error(state, step);
            Ok(())
        })
    }

    /// Replace a step's data with a function of its previous data
    pub fn update_step_data<F>(&self, step: &str, f: F) -> WizardResult<Arc<WizardState>>
    where
        F: FnOnce(Option<&StepData>) -> StepData,
    {
        self.mutate_step(step, |state| {
            let next = f(state.data.get(step));
            state.data.insert(step.to_string(), next);
            clear_error(state, step);
            Ok(())
        })
    }

    pub fn set_step_error(&self, step: &str, error: ErrorValue) -> WizardResult<Arc<WizardState>> {
        self.mutate_step(step, |state| {
            state.errors.insert(step.to_string(), error);
            Ok(())
        })
    }

    /// Drop a step's error; a step in `error` goes back to `idle`
    pub fn clear_step_error(&self, step: &str) -> WizardResult<Arc<WizardState>> {
        self.mutate_step(step, |state| {
            clear_error(state, step);
            Ok(())
        })
    }

    /// Change a step's runtime status; illegal changes commit nothing
    pub fn set_step_status(
        &self,
        step: &str,
        status: RuntimeStatus,
    ) -> WizardResult<Arc<WizardState>> {
        self.mutate_step(step, |state| {
            let next = checked_status(state, step, status)?;
            state.runtime.insert(step.to_string(), next);
            Ok(())
        })
    }

    /// Record an error and move the step to `error` in one write
    pub(super) fn mark_step_error(
        &self,
        step: &str,
        error: ErrorValue,
    ) -> WizardResult<Arc<WizardState>> {
        self.mutate_step(step, |state| {
            let next = checked_status(state, step, RuntimeStatus::Error)?;
            state.runtime.insert(step.to_string(), next);
            state.errors.insert(step.to_string(), error);
            Ok(())
        })
    }

    pub fn set_step_meta(&self, step: &str, meta: StepMeta) -> WizardResult<Arc<WizardState>> {
        self.mutate_step(step, |state| {
            state.meta.insert(step.to_string(), meta);
            Ok(())
        })
    }

    pub fn update_step_meta<F>(&self, step: &str, f: F) -> WizardResult<Arc<WizardState>>
    where
        F: FnOnce(&mut StepMeta),
    {
        self.mutate_step(step, |state| {
            f(state.meta.entry(step.to_string()).or_default());
            Ok(())
        })
    }

    // ========================================================================
    // Lifecycle
    // ========================================================================

    /// Replace the state with the values the wizard was built with and clear
    /// the persisted snapshot
    pub fn reset(&self) -> WizardResult<Arc<WizardState>> {
        let initial = WizardState::clone(&self.shared.initial);
        let step = initial.step.clone();
        let (state, ()) = self.shared.store.try_update(|state| {
            if state.is_transitioning {
                return Err(WizardError::TransitionInProgress);
            }
            *state = initial;
            Ok(())
        })?;
        self.shared.persistence.clear();
        let _ = self.shared.events.send(WizardEvent::Reset { step: step.clone() });
        tracing::info!(wizard_id = %self.shared.id, step = %step, "Wizard reset");
        Ok(state)
    }

    /// Detach every listener and observer; later operations fail with `Destroyed`
    pub fn destroy(&self) {
        self.shared.store.close();
        self.shared.observers.clear();
        tracing::info!(wizard_id = %self.shared.id, "Wizard destroyed");
    }

    pub fn is_destroyed(&self) -> bool {
        self.shared.store.is_closed()
    }

    /// Wait for queued persistence writes to reach the adapter
    pub async fn flush(&self) {
        self.shared.persistence.flush().await;
    }

    // ========================================================================
    // Observation
    // ========================================================================

    /// Called synchronously after every committed state change
    pub fn subscribe<F>(&self, listener: F) -> Subscription
    where
        F: Fn(&WizardState) + Send + Sync + 'static,
    {
        self.shared.store.subscribe(listener)
    }

    pub fn watch(&self) -> watch::Receiver<Arc<WizardState>> {
        self.shared.store.watch()
    }

    pub fn events(&self) -> broadcast::Receiver<WizardEvent> {
        self.shared.events.subscribe()
    }

    pub fn on_transition<F>(&self, observer: F) -> Subscription
    where
        F: Fn(&TransitionEvent) + Send + Sync + 'static,
    {
        self.shared.observers.add(Arc::new(observer))
    }
}

fn checked_status(
    state: &WizardState,
    step: &str,
    to: RuntimeStatus,
) -> WizardResult<RuntimeStatus> {
    let from = state.status(step);
    transition_status(from, to).map_err(|_| WizardError::InvalidStatusTransition {
        step: step.to_string(),
        from,
        to,
    })
}

/// Drop a step's error and leave `error` status for `idle`
fn clear_error(state: &mut WizardState, step: &str) {
    state.errors.remove(step);
    if state.status(step) == RuntimeStatus::Error {
        state.runtime.insert(step.to_string(), RuntimeStatus::Idle);
    }
}

/// Record a hook failure and move the step to `error` where its status allows
fn record_hook_error(state: &mut WizardState, step: &str, error: ErrorValue) {
    if can_transition(state.status(step), RuntimeStatus::Error) {
        state.runtime.insert(step.to_string(), RuntimeStatus::Error);
    }
    state.errors.insert(step.to_string(), error);
}
