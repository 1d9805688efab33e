//! Mock implementations for testing
//!
//! These mocks enable end-to-end wizard tests without real I/O.

use super::traits::PersistenceAdapter;
use crate::error::PersistenceError;
use crate::registry::{StepDefinition, StepRegistry};
use crate::state_machine::{PersistedState, WizardState};
use async_trait::async_trait;
use serde_json::{json, Value};
use std::sync::Mutex;

// ============================================================================
// Mock Persistence
// ============================================================================

/// Records every call; optionally resumes from a preloaded snapshot
#[allow(dead_code)]
#[derive(Default)]
pub struct RecordingPersistence {
    preloaded: Mutex<Option<PersistedState>>,
    /// Every saved snapshot, in order
    pub saves: Mutex<Vec<WizardState>>,
    pub clears: Mutex<usize>,
    pub loads: Mutex<usize>,
}

#[allow(dead_code)]
impl RecordingPersistence {
    pub fn new() -> Self {
        Self::default()
    }

    /// Resume from `snapshot`, given as JSON in the persisted format
    pub fn preloaded(snapshot: Value) -> Self {
        let persisted = serde_json::from_value(snapshot).unwrap();
        Self {
            preloaded: Mutex::new(Some(persisted)),
            ..Self::default()
        }
    }

    pub fn saved(&self) -> Vec<WizardState> {
        self.saves.lock().unwrap().clone()
    }

    pub fn last_saved(&self) -> Option<WizardState> {
        self.saves.lock().unwrap().last().cloned()
    }

    pub fn clear_count(&self) -> usize {
        *self.clears.lock().unwrap()
    }
}

#[async_trait]
impl PersistenceAdapter for RecordingPersistence {
    async fn save(&self, state: &WizardState) -> Result<(), PersistenceError> {
        self.saves.lock().unwrap().push(state.clone());
        Ok(())
    }

    async fn load(&self) -> Result<Option<PersistedState>, PersistenceError> {
        *self.loads.lock().unwrap() += 1;
        Ok(self.preloaded.lock().unwrap().clone())
    }

    async fn clear(&self) -> Result<(), PersistenceError> {
        *self.clears.lock().unwrap() += 1;
        Ok(())
    }
}

/// Every save and clear fails
#[derive(Default)]
pub struct FailingPersistence;

#[async_trait]
impl PersistenceAdapter for FailingPersistence {
    async fn save(&self, _state: &WizardState) -> Result<(), PersistenceError> {
        Err(PersistenceError::other("disk full"))
    }

    async fn clear(&self) -> Result<(), PersistenceError> {
        Err(PersistenceError::other("disk full"))
    }
}

/// Load fails with an I/O error
#[derive(Default)]
pub struct UnreachablePersistence;

#[async_trait]
impl PersistenceAdapter for UnreachablePersistence {
    async fn save(&self, _state: &WizardState) -> Result<(), PersistenceError> {
        Ok(())
    }

    async fn load(&self) -> Result<Option<PersistedState>, PersistenceError> {
        Err(std::io::Error::new(std::io::ErrorKind::ConnectionRefused, "offline").into())
    }
}

// ============================================================================
// Registry Fixtures
// ============================================================================

/// a -> b -> c with no callbacks
pub fn linear_registry(names: &[&str]) -> StepRegistry {
    names
        .iter()
        .fold(StepRegistry::builder(), |builder, name| {
            builder.step(*name, StepDefinition::new())
        })
        .build()
        .unwrap()
}

/// Account step that requires an email, then plan, then done
pub fn signup_registry() -> StepRegistry {
    StepRegistry::builder()
        .step(
            "account",
            StepDefinition::new().validate_sync(|data, _| {
                if data["email"].as_str().is_some_and(|e| e.contains('@')) {
                    Ok(())
                } else {
                    Err(json!({ "field": "email", "reason": "invalid" }))
                }
            }),
        )
        .step("plan", StepDefinition::new())
        .step("done", StepDefinition::new())
        .build()
        .unwrap()
}

// ============================================================================
// Scenario Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{HistoryConfig, WizardConfig};
    use crate::error::{HookPhase, WizardError};
    use crate::registry::NextTargets;
    use crate::runtime::{MemoryPersistence, Wizard};
    use crate::state_machine::{RuntimeStatus, StepMeta, TransitionKind, WizardEvent};
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;
    use std::time::Duration;
    use tokio::sync::Notify;

    async fn wizard(registry: StepRegistry) -> Wizard {
        Wizard::builder(registry).build().await.unwrap()
    }

    fn history_steps(wizard: &Wizard) -> Vec<String> {
        wizard.state().history.iter().map(|h| h.step.clone()).collect()
    }

    // ---- validation ----

    #[tokio::test]
    async fn test_validated_linear_flow() {
        let wizard = wizard(signup_registry()).await;
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        let _sub = wizard.on_transition(move |event| {
            sink.lock()
                .unwrap()
                .push((event.from.clone(), event.to.clone(), event.kind));
        });

        let err = wizard.next(Some(json!({ "email": "nope" }))).await.unwrap_err();
        assert!(matches!(err, WizardError::Validation { ref step, .. } if step == "account"));
        let state = wizard.state();
        assert_eq!(state.step, "account");
        assert!(!state.is_transitioning);
        assert_eq!(
            state.error("account"),
            Some(&json!({ "field": "email", "reason": "invalid" }))
        );
        assert!(state.step_data("account").is_none());

        let state = wizard
            .next(Some(json!({ "email": "ada@example.com" })))
            .await
            .unwrap();
        assert_eq!(state.step, "plan");
        assert!(state.error("account").is_none());
        assert_eq!(state.step_data("account"), Some(&json!({ "email": "ada@example.com" })));
        assert_eq!(state.history.len(), 1);

        wizard.next(None).await.unwrap();
        assert_eq!(wizard.current_step(), "done");
        assert_eq!(
            *seen.lock().unwrap(),
            vec![
                ("account".to_string(), "plan".to_string(), TransitionKind::Next),
                ("plan".to_string(), "done".to_string(), TransitionKind::Next),
            ]
        );
    }

    #[tokio::test]
    async fn test_validation_is_idempotent() {
        let wizard = wizard(signup_registry()).await;
        let bad = json!({ "email": "x" });
        let first = wizard.next(Some(bad.clone())).await.unwrap_err();
        let after_first = wizard.state();
        let second = wizard.next(Some(bad)).await.unwrap_err();
        let after_second = wizard.state();

        assert_eq!(first.to_value(), second.to_value());
        assert_eq!(after_first.errors, after_second.errors);
        assert_eq!(after_first.step, after_second.step);
    }

    #[tokio::test]
    async fn test_next_without_data_validates_committed_data() {
        let wizard = wizard(signup_registry()).await;
        assert!(wizard.next(None).await.is_err());

        wizard
            .set_step_data("account", json!({ "email": "a@b.c" }))
            .unwrap();
        wizard.next(None).await.unwrap();
        assert_eq!(wizard.current_step(), "plan");
    }

    #[tokio::test]
    async fn test_next_on_last_step_commits_data_then_fails() {
        let wizard = Wizard::builder(linear_registry(&["a", "b"]))
            .initial_step("b")
            .build()
            .await
            .unwrap();
        let err = wizard.next(Some(json!({ "final": true }))).await.unwrap_err();
        assert!(matches!(err, WizardError::NoNextStep { ref step } if step == "b"));
        let state = wizard.state();
        assert_eq!(state.step_data("b"), Some(&json!({ "final": true })));
        assert!(!state.is_transitioning);
    }

    #[tokio::test]
    async fn test_unresolved_next_persists_submitted_data() {
        let registry = StepRegistry::builder()
            .step("a", StepDefinition::new().next(Vec::<String>::new()))
            .step("b", StepDefinition::new())
            .build()
            .unwrap();
        let adapter = Arc::new(RecordingPersistence::new());
        let wizard = Wizard::builder(registry)
            .persistence(Arc::clone(&adapter))
            .build()
            .await
            .unwrap();

        let err = wizard.next(Some(json!({ "x": 1 }))).await.unwrap_err();
        assert!(matches!(err, WizardError::NoNextStep { ref step } if step == "a"));
        wizard.flush().await;

        let saved = adapter.last_saved().unwrap();
        assert_eq!(saved.step_data("a"), Some(&json!({ "x": 1 })));
        assert_eq!(saved.error("a").unwrap()["kind"], "no_next_step");
        assert!(!saved.is_transitioning);
    }

    // ---- guards ----

    #[tokio::test]
    async fn test_enter_guard_veto_keeps_step_and_history() {
        let registry = StepRegistry::builder()
            .step("a", StepDefinition::new())
            .step("b", StepDefinition::new().can_enter_sync(|_| false))
            .build()
            .unwrap();
        let wizard = wizard(registry).await;

        let err = wizard.next(Some(json!({ "x": 1 }))).await.unwrap_err();
        assert!(matches!(err, WizardError::EnterGuardRejected { ref step } if step == "b"));

        let state = wizard.state();
        assert_eq!(state.step, "a");
        assert!(state.history.is_empty());
        assert!(!state.is_transitioning);
        assert_eq!(state.error("b").unwrap()["kind"], "enter_guard_rejected");
        // Data committed before the guard ran stays
        assert_eq!(state.step_data("a"), Some(&json!({ "x": 1 })));
    }

    #[tokio::test]
    async fn test_exit_guard_sees_committed_data() {
        let registry = StepRegistry::builder()
            .step(
                "a",
                StepDefinition::new().can_exit(|args| async move {
                    args.data.is_some_and(|d| d["confirmed"] == true)
                }),
            )
            .step("b", StepDefinition::new())
            .build()
            .unwrap();
        let wizard = wizard(registry).await;

        let err = wizard.next(Some(json!({ "confirmed": false }))).await.unwrap_err();
        assert!(matches!(err, WizardError::ExitGuardRejected { .. }));
        assert_eq!(wizard.current_step(), "a");
        assert!(wizard.state().history.is_empty());

        wizard.next(Some(json!({ "confirmed": true }))).await.unwrap();
        assert_eq!(wizard.current_step(), "b");
    }

    #[tokio::test]
    async fn test_can_go_next_has_no_side_effects() {
        let allow = Arc::new(std::sync::atomic::AtomicBool::new(false));
        let gate = Arc::clone(&allow);
        let registry = StepRegistry::builder()
            .step("a", StepDefinition::new())
            .step(
                "b",
                StepDefinition::new().can_enter_sync(move |_| gate.load(Ordering::SeqCst)),
            )
            .build()
            .unwrap();
        let wizard = wizard(registry).await;
        let before = wizard.state();

        assert!(!wizard.can_go_next().await);
        assert!(Arc::ptr_eq(&before, &wizard.state()));

        allow.store(true, Ordering::SeqCst);
        assert!(wizard.can_go_next().await);
        assert!(wizard.can_go_to("b").await);
        assert!(!wizard.can_go_to("missing").await);
        assert!(!wizard.can_go_back());
        assert_eq!(wizard.current_step(), "a");
    }

    // ---- navigation ----

    #[tokio::test]
    async fn test_go_to_unlisted_and_unknown() {
        let registry = StepRegistry::builder()
            .step("a", StepDefinition::new().next(["b"]))
            .step("b", StepDefinition::new())
            .step("c", StepDefinition::new())
            .build()
            .unwrap();
        let wizard = wizard(registry).await;
        let mut events = wizard.events();

        wizard.go_to("c", None).await.unwrap();
        assert_eq!(wizard.current_step(), "c");
        match events.recv().await.unwrap() {
            WizardEvent::Transition(event) => {
                assert_eq!(event.kind, TransitionKind::GoTo);
                assert_eq!(event.to, "c");
            }
            other => panic!("unexpected event: {other:?}"),
        }

        assert!(matches!(
            wizard.go_to("zzz", None).await,
            Err(WizardError::UnknownStep(name)) if name == "zzz"
        ));
        assert!(!wizard.state().is_transitioning);
    }

    #[tokio::test]
    async fn test_dynamic_next_uses_submitted_data() {
        let registry = StepRegistry::builder()
            .step(
                "plan",
                StepDefinition::new().next_with(|_, data| {
                    if data["tier"] == "pro" {
                        NextTargets::one("billing")
                    } else {
                        NextTargets::one("done")
                    }
                }),
            )
            .step("billing", StepDefinition::new())
            .step("done", StepDefinition::new())
            .build()
            .unwrap();
        let wizard = wizard(registry).await;

        wizard.next(Some(json!({ "tier": "pro" }))).await.unwrap();
        assert_eq!(wizard.current_step(), "billing");
        wizard.back().await.unwrap();
        wizard.next(Some(json!({ "tier": "free" }))).await.unwrap();
        assert_eq!(wizard.current_step(), "done");
    }

    #[tokio::test]
    async fn test_back_restores_step_context_and_data() {
        let registry = StepRegistry::builder()
            .step(
                "a",
                StepDefinition::new().before_exit(|args| async move {
                    args.handle
                        .update_context(|ctx| ctx["visited_a"] = json!(true))
                        .map(|()| None)
                        .map_err(|e| e.to_value())
                }),
            )
            .step("b", StepDefinition::new())
            .build()
            .unwrap();
        let wizard = Wizard::builder(registry)
            .initial_context(json!({ "user": "ada" }))
            .build()
            .await
            .unwrap();
        let before = wizard.snapshot();

        wizard.next(Some(json!({ "x": 1 }))).await.unwrap();
        assert_eq!(wizard.state().context["visited_a"], true);

        let state = wizard.back().await.unwrap();
        assert_eq!(state.step, before.step);
        assert_eq!(state.context, before.context);
        assert_eq!(state.data, before.data);
        assert!(state.history.is_empty());
        assert!(matches!(wizard.back().await, Err(WizardError::NoHistory)));
    }

    #[tokio::test]
    async fn test_history_capacity_evicts_oldest() {
        let wizard = Wizard::builder(linear_registry(&["a", "b", "c", "d"]))
            .history(HistoryConfig::bounded(2))
            .build()
            .await
            .unwrap();

        for _ in 0..3 {
            wizard.next(None).await.unwrap();
        }
        assert_eq!(wizard.current_step(), "d");
        assert_eq!(history_steps(&wizard), ["b", "c"]);

        wizard.back().await.unwrap();
        assert_eq!(wizard.current_step(), "c");
        wizard.back().await.unwrap();
        assert_eq!(wizard.current_step(), "b");
        assert!(matches!(wizard.back().await, Err(WizardError::NoHistory)));
        assert_eq!(wizard.current_step(), "b");
    }

    #[tokio::test]
    async fn test_disabled_history() {
        let wizard = Wizard::builder(linear_registry(&["a", "b"]))
            .history(HistoryConfig::disabled())
            .build()
            .await
            .unwrap();
        wizard.next(None).await.unwrap();
        assert!(wizard.state().history.is_empty());
        assert!(matches!(wizard.back().await, Err(WizardError::NoHistory)));
    }

    // ---- concurrency ----

    #[tokio::test]
    async fn test_second_transition_is_rejected_while_first_is_in_flight() {
        let gate = Arc::new(Notify::new());
        let waiter = Arc::clone(&gate);
        let registry = StepRegistry::builder()
            .step(
                "a",
                StepDefinition::new().validate(move |_, _| {
                    let waiter = Arc::clone(&waiter);
                    async move {
                        waiter.notified().await;
                        Ok(())
                    }
                }),
            )
            .step("b", StepDefinition::new())
            .step("c", StepDefinition::new())
            .build()
            .unwrap();
        let wizard = wizard(registry).await;

        let first = {
            let wizard = wizard.clone();
            tokio::spawn(async move { wizard.next(Some(json!({ "x": 1 }))).await })
        };
        let mut rx = wizard.watch();
        let _ = rx.wait_for(|s| s.is_transitioning).await.unwrap();

        assert!(matches!(
            wizard.next(None).await,
            Err(WizardError::TransitionInProgress)
        ));
        assert!(matches!(
            wizard.go_to("c", None).await,
            Err(WizardError::TransitionInProgress)
        ));
        assert!(matches!(wizard.reset(), Err(WizardError::TransitionInProgress)));
        // Direct mutation is still allowed mid-transition
        wizard.set_step_data("c", json!({ "early": true })).unwrap();

        gate.notify_one();
        let state = first.await.unwrap().unwrap();
        assert_eq!(state.step, "b");
        assert!(!state.is_transitioning);
        assert_eq!(state.step_data("c"), Some(&json!({ "early": true })));
    }

    // ---- retries ----

    #[tokio::test]
    async fn test_validation_retry_succeeds_and_records_attempts() {
        let calls = Arc::new(AtomicU32::new(0));
        let counter = Arc::clone(&calls);
        let registry = StepRegistry::builder()
            .step(
                "a",
                StepDefinition::new()
                    .retries(2, Duration::from_millis(1))
                    .validate(move |_, _| {
                        let n = counter.fetch_add(1, Ordering::SeqCst);
                        async move {
                            if n < 2 {
                                Err(json!("backend busy"))
                            } else {
                                Ok(())
                            }
                        }
                    }),
            )
            .step("b", StepDefinition::new())
            .build()
            .unwrap();
        let wizard = wizard(registry).await;

        wizard.next(None).await.unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        assert_eq!(wizard.state().attempts.get("a"), Some(&3));
        assert_eq!(wizard.step("a").unwrap().attempts(), 3);
    }

    // ---- hooks ----

    #[tokio::test]
    async fn test_before_exit_failure_keeps_committed_data() {
        let calls = Arc::new(AtomicU32::new(0));
        let counter = Arc::clone(&calls);
        let registry = StepRegistry::builder()
            .step(
                "a",
                StepDefinition::new().before_exit(move |_| {
                    let first = counter.fetch_add(1, Ordering::SeqCst) == 0;
                    async move {
                        if first {
                            Err(json!("save failed"))
                        } else {
                            Ok(None)
                        }
                    }
                }),
            )
            .step("b", StepDefinition::new())
            .build()
            .unwrap();
        let wizard = wizard(registry).await;
        let mut events = wizard.events();

        let err = wizard.next(Some(json!({ "x": 1 }))).await.unwrap_err();
        assert!(matches!(
            err,
            WizardError::HookExecution { phase: HookPhase::BeforeExit, .. }
        ));
        let state = wizard.state();
        assert_eq!(state.step, "a");
        assert_eq!(state.step_data("a"), Some(&json!({ "x": 1 })));
        assert_eq!(state.error("a"), Some(&json!("save failed")));
        assert_eq!(state.status("a"), RuntimeStatus::Error);
        assert!(state.history.is_empty());

        assert!(matches!(
            events.recv().await.unwrap(),
            WizardEvent::HookFailed { phase: HookPhase::BeforeExit, .. }
        ));

        // The next commit clears the error and the step leaves `error`
        let state = wizard.next(None).await.unwrap();
        assert_eq!(state.step, "b");
        assert!(state.error("a").is_none());
        assert_eq!(state.status("a"), RuntimeStatus::Idle);
    }

    #[tokio::test]
    async fn test_before_enter_seeds_data_and_clears_loading() {
        let loading_seen = Arc::new(Mutex::new(None));
        let seen = Arc::clone(&loading_seen);
        let registry = StepRegistry::builder()
            .step("a", StepDefinition::new())
            .step(
                "b",
                StepDefinition::new()
                    .data(json!({ "country": "NZ" }))
                    .before_enter(move |args| {
                        let seen = Arc::clone(&seen);
                        async move {
                            let store_state = args.handle.context();
                            *seen.lock().unwrap() = Some((args.data.clone(), store_state));
                            args.handle.emit("prefilled", json!({ "from": args.from.clone() }));
                            Ok(Some(json!({ "city": "Wellington" })))
                        }
                    }),
            )
            .build()
            .unwrap();
        let wizard = wizard(registry).await;
        let mut events = wizard.events();
        let statuses = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&statuses);
        let _sub = wizard.subscribe(move |state| {
            sink.lock().unwrap().push((state.is_loading, state.status("b")));
        });

        let state = wizard.next(None).await.unwrap();
        assert_eq!(state.step, "b");
        assert_eq!(state.step_data("b"), Some(&json!({ "city": "Wellington" })));
        assert!(!state.is_loading);
        assert_eq!(state.status("b"), RuntimeStatus::Idle);

        let seen = loading_seen.lock().unwrap().clone().unwrap();
        assert_eq!(seen.0, Some(json!({ "country": "NZ" })));
        assert!(statuses
            .lock()
            .unwrap()
            .contains(&(true, RuntimeStatus::Loading)));

        match events.recv().await.unwrap() {
            WizardEvent::Custom { step, name, payload } => {
                assert_eq!(step, "b");
                assert_eq!(name, "prefilled");
                assert_eq!(payload, json!({ "from": "a" }));
            }
            other => panic!("unexpected event: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_before_enter_failure_marks_step_error() {
        let registry = StepRegistry::builder()
            .step("a", StepDefinition::new())
            .step(
                "b",
                StepDefinition::new().before_enter(|_| async { Err(json!("loader down")) }),
            )
            .build()
            .unwrap();
        let observed = Arc::new(AtomicU32::new(0));
        let counter = Arc::clone(&observed);
        let wizard = Wizard::builder(registry)
            .on_transition(move |_| {
                counter.fetch_add(1, Ordering::SeqCst);
            })
            .build()
            .await
            .unwrap();

        let err = wizard.next(None).await.unwrap_err();
        assert!(matches!(
            err,
            WizardError::HookExecution { phase: HookPhase::BeforeEnter, ref step, .. } if step == "b"
        ));
        let state = wizard.state();
        assert_eq!(state.step, "b");
        assert_eq!(state.status("b"), RuntimeStatus::Error);
        assert_eq!(state.error("b"), Some(&json!("loader down")));
        assert!(!state.is_loading);
        assert_eq!(observed.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_panicking_observer_does_not_unwind() {
        let wizard = Wizard::builder(linear_registry(&["a", "b"]))
            .on_transition(|_| panic!("observer bug"))
            .build()
            .await
            .unwrap();
        let state = wizard.next(None).await.unwrap();
        assert_eq!(state.step, "b");
    }

    // ---- step handles ----

    #[tokio::test]
    async fn test_step_handle_mutations_return_new_handles() {
        let wizard = wizard(linear_registry(&["a", "b"])).await;
        let a = wizard.step("a").unwrap();

        let a2 = a.set_data(json!({ "x": 1, "y": 1 })).unwrap();
        assert!(a.data().is_none());
        assert_eq!(a2.data(), Some(&json!({ "x": 1, "y": 1 })));
        assert_ne!(a, a2);
        assert_eq!(a2, a2.clone());

        let a3 = a2.update_data(json!({ "y": 2 })).unwrap();
        assert_eq!(a3.data(), Some(&json!({ "x": 1, "y": 2 })));

        let a4 = a3
            .update_data_with(|prev| json!({ "count": prev.map_or(0, |p| p["x"].as_i64().unwrap_or(0)) + 1 }))
            .unwrap();
        assert_eq!(a4.data(), Some(&json!({ "count": 2 })));

        let meta = a4.set_meta(StepMeta::labeled("First")).unwrap();
        let meta = meta.update_meta(|m| m.tags.push("intro".into())).unwrap();
        assert_eq!(meta.meta().unwrap().label.as_deref(), Some("First"));
        assert_eq!(meta.meta().unwrap().tags, ["intro"]);
    }

    #[tokio::test]
    async fn test_step_handle_status_machine() {
        let wizard = wizard(linear_registry(&["a", "b"])).await;
        let b = wizard.step("b").unwrap();

        let b = b.mark_loading().unwrap();
        assert_eq!(b.status(), RuntimeStatus::Loading);
        let b = b.mark_error(json!("timeout")).unwrap();
        assert_eq!(b.status(), RuntimeStatus::Error);
        assert_eq!(b.error(), Some(&json!("timeout")));
        let b = b.clear_error().unwrap();
        assert!(b.error().is_none());
        assert_eq!(b.status(), RuntimeStatus::Idle);
        let b = b.mark_terminated().unwrap();

        let err = b.mark_idle().unwrap_err();
        assert!(matches!(
            err,
            WizardError::InvalidStatusTransition {
                from: RuntimeStatus::Terminated,
                to: RuntimeStatus::Idle,
                ..
            }
        ));
        assert_eq!(wizard.state().status("b"), RuntimeStatus::Terminated);
    }

    #[tokio::test]
    async fn test_step_handle_rejects_unlisted_status_changes() {
        let wizard = wizard(linear_registry(&["a", "b", "c"])).await;

        let b = wizard.step("b").unwrap().mark_skipped().unwrap();
        assert!(matches!(
            b.mark_idle().unwrap_err(),
            WizardError::InvalidStatusTransition {
                from: RuntimeStatus::Skipped,
                to: RuntimeStatus::Idle,
                ..
            }
        ));
        assert_eq!(wizard.state().status("b"), RuntimeStatus::Skipped);

        let c = wizard.step("c").unwrap().mark_error(json!("boom")).unwrap();
        assert!(matches!(
            c.mark_loading().unwrap_err(),
            WizardError::InvalidStatusTransition {
                from: RuntimeStatus::Error,
                to: RuntimeStatus::Loading,
                ..
            }
        ));
        assert_eq!(wizard.state().status("c"), RuntimeStatus::Error);
    }

    #[tokio::test]
    async fn test_writing_step_data_clears_error_status() {
        let wizard = wizard(linear_registry(&["a", "b"])).await;
        wizard.step("a").unwrap().mark_error(json!("bad")).unwrap();

        let state = wizard.set_step_data("a", json!({ "fixed": true })).unwrap();
        assert!(state.error("a").is_none());
        assert_eq!(state.status("a"), RuntimeStatus::Idle);

        wizard.step("b").unwrap().mark_error(json!("bad")).unwrap();
        let state = wizard.merge_step_data("b", json!({ "y": 1 })).unwrap();
        assert!(state.error("b").is_none());
        assert_eq!(state.status("b"), RuntimeStatus::Idle);
    }

    #[tokio::test]
    async fn test_skipped_step_leaves_progress() {
        let wizard = wizard(linear_registry(&["a", "b", "c"])).await;
        assert_eq!(wizard.progress().total, 3);

        wizard.step("c").unwrap().mark_skipped().unwrap();
        let progress = wizard.progress();
        assert_eq!(progress.total, 2);
        assert_eq!(progress.label, "Step 1 of 3");

        wizard.next(None).await.unwrap();
        let progress = wizard.progress();
        assert!((progress.percent - 50.0).abs() < 1e-9);
        assert_eq!(wizard.completed_steps(), ["a"]);
        assert_eq!(wizard.remaining_steps(), ["b"]);
    }

    #[tokio::test]
    async fn test_navigation_requires_active_step() {
        let wizard = wizard(linear_registry(&["a", "b"])).await;
        let b = wizard.step("b").unwrap();
        assert!(matches!(
            b.next(None).await,
            Err(WizardError::StepNotActive { ref step, ref active }) if step == "b" && active == "a"
        ));

        let a = wizard.current();
        assert!(a.is_current());
        a.next(None).await.unwrap();
        assert!(wizard.step("b").unwrap().is_current());
        assert!(matches!(a.back().await, Err(WizardError::StepNotActive { .. })));
    }

    #[tokio::test]
    async fn test_resolved_data_falls_back_to_default() {
        let registry = StepRegistry::builder()
            .step(
                "a",
                StepDefinition::new().data_with(|ctx, _| json!({ "email": ctx["email"] })),
            )
            .build()
            .unwrap();
        let wizard = Wizard::builder(registry)
            .initial_context(json!({ "email": "a@b.c" }))
            .build()
            .await
            .unwrap();
        let a = wizard.step("a").unwrap();
        assert!(a.data().is_none());
        assert_eq!(a.resolved_data(), Some(json!({ "email": "a@b.c" })));
        assert!(matches!(wizard.step("nope"), Err(WizardError::UnknownStep(_))));
    }

    // ---- snapshot / reset / destroy ----

    #[tokio::test]
    async fn test_snapshot_and_restore() {
        let wizard = wizard(linear_registry(&["a", "b", "c"])).await;
        wizard.next(Some(json!({ "x": 1 }))).await.unwrap();
        let snap = wizard.snapshot();

        wizard.next(None).await.unwrap();
        wizard.update_context(|ctx| ctx["late"] = json!(true)).unwrap();

        let restored = wizard.restore(snap.clone()).unwrap();
        assert_eq!(restored.step, "b");
        assert_eq!(*restored, snap);

        let mut bogus = snap;
        bogus.step = "ghost".into();
        assert!(matches!(wizard.restore(bogus), Err(WizardError::UnknownStep(_))));
        assert_eq!(wizard.current_step(), "b");
    }

    #[tokio::test]
    async fn test_reset_and_destroy() {
        let adapter = Arc::new(RecordingPersistence::new());
        let wizard = Wizard::builder(linear_registry(&["a", "b"]))
            .initial_context(json!({ "n": 0 }))
            .persistence(Arc::clone(&adapter))
            .build()
            .await
            .unwrap();
        wizard.next(Some(json!({ "x": 1 }))).await.unwrap();
        wizard.update_context(|ctx| ctx["n"] = json!(5)).unwrap();

        let state = wizard.reset().unwrap();
        assert_eq!(state.step, "a");
        assert_eq!(state.context, json!({ "n": 0 }));
        assert!(state.data.is_empty());
        assert!(state.history.is_empty());
        wizard.flush().await;
        assert_eq!(adapter.clear_count(), 1);

        let calls = Arc::new(AtomicU32::new(0));
        let counter = Arc::clone(&calls);
        let _sub = wizard.subscribe(move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        });
        wizard.destroy();
        assert!(wizard.is_destroyed());
        assert!(matches!(wizard.next(None).await, Err(WizardError::Destroyed)));
        assert!(matches!(
            wizard.set_step_data("a", json!(1)),
            Err(WizardError::Destroyed)
        ));
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    // ---- persistence ----

    #[tokio::test]
    async fn test_persisted_snapshot_overrides_initial_step() {
        let adapter = RecordingPersistence::preloaded(json!({ "step": "b", "data": { "b": { "x": 2 } } }));
        let wizard = Wizard::builder(linear_registry(&["a", "b", "c"]))
            .initial_step("a")
            .persistence(adapter)
            .build()
            .await
            .unwrap();

        let state = wizard.state();
        assert_eq!(state.step, "b");
        assert_eq!(state.step_data("b"), Some(&json!({ "x": 2 })));
        assert!(!state.is_transitioning);

        // Reset goes back to the configured initial values, not the snapshot
        assert_eq!(wizard.reset().unwrap().step, "a");
    }

    #[tokio::test]
    async fn test_saves_after_transitions_and_mutations() {
        let adapter = Arc::new(RecordingPersistence::new());
        let wizard = Wizard::builder(linear_registry(&["a", "b"]))
            .persistence(Arc::clone(&adapter))
            .build()
            .await
            .unwrap();
        assert_eq!(*adapter.loads.lock().unwrap(), 1);

        wizard.next(None).await.unwrap();
        wizard.merge_step_data("b", json!({ "y": 1 })).unwrap();
        wizard.flush().await;

        let saved = adapter.saved();
        assert_eq!(saved.len(), 2);
        assert_eq!(saved[0].step, "b");
        assert_eq!(saved[1].step_data("b"), Some(&json!({ "y": 1 })));
    }

    #[tokio::test]
    async fn test_persistence_failure_is_reported_not_raised() {
        let wizard = Wizard::builder(linear_registry(&["a", "b"]))
            .persistence(FailingPersistence)
            .build()
            .await
            .unwrap();
        let mut events = wizard.events();

        wizard.next(None).await.unwrap();
        wizard.flush().await;

        let mut failures = 0;
        while let Ok(event) = events.try_recv() {
            if let WizardEvent::PersistenceFailed { operation, message } = event {
                assert_eq!(operation, "save");
                assert_eq!(message, "disk full");
                failures += 1;
            }
        }
        assert_eq!(failures, 1);
    }

    #[tokio::test]
    async fn test_memory_persistence_resumes_across_instances() {
        let adapter = Arc::new(MemoryPersistence::new());
        let first = Wizard::builder(linear_registry(&["a", "b", "c"]))
            .persistence(Arc::clone(&adapter))
            .build()
            .await
            .unwrap();
        first.next(Some(json!({ "x": 1 }))).await.unwrap();
        first.flush().await;

        let second = Wizard::builder(linear_registry(&["a", "b", "c"]))
            .persistence(Arc::clone(&adapter))
            .build()
            .await
            .unwrap();
        assert_eq!(second.current_step(), "b");
        assert_eq!(second.state().history.len(), 1);
        second.back().await.unwrap();
        assert_eq!(second.current_step(), "a");
    }

    #[tokio::test]
    async fn test_corrupt_or_unknown_snapshot_fails_at_load() {
        let corrupt = MemoryPersistence::with_snapshot(json!({ "step": 7 }));
        let result = Wizard::builder(linear_registry(&["a"]))
            .persistence(corrupt)
            .build()
            .await;
        assert!(matches!(result, Err(WizardError::CorruptSnapshot(_))));

        let unknown = RecordingPersistence::preloaded(json!({ "step": "ghost" }));
        let result = Wizard::builder(linear_registry(&["a"]))
            .persistence(unknown)
            .build()
            .await;
        assert!(matches!(result, Err(WizardError::UnknownStep(name)) if name == "ghost"));

        let result = Wizard::builder(linear_registry(&["a"]))
            .persistence(UnreachablePersistence)
            .build()
            .await;
        assert!(matches!(result, Err(WizardError::Persistence(_))));
    }

    #[tokio::test]
    async fn test_loaded_history_is_trimmed_to_config() {
        let adapter = RecordingPersistence::preloaded(json!({
            "step": "c",
            "history": [
                { "step": "a", "context": {}, "data": {} },
                { "step": "b", "context": {}, "data": {} }
            ]
        }));
        let wizard = Wizard::builder(linear_registry(&["a", "b", "c"]))
            .config(WizardConfig::default().with_history(HistoryConfig::bounded(1)))
            .persistence(adapter)
            .build()
            .await
            .unwrap();
        assert_eq!(history_steps(&wizard), ["b"]);
    }

    #[tokio::test]
    async fn test_initial_meta_comes_from_definitions() {
        let registry = StepRegistry::builder()
            .step("a", StepDefinition::new().meta(StepMeta::labeled("Account")))
            .step("secret", StepDefinition::new().meta(StepMeta::default().hidden()))
            .step("b", StepDefinition::new())
            .build()
            .unwrap();
        let wizard = wizard(registry).await;
        assert_eq!(
            wizard.state().meta("a").and_then(|m| m.label.clone()),
            Some("Account".to_string())
        );
        assert_eq!(wizard.ordered_steps(), ["a", "b"]);
    }

    #[tokio::test]
    async fn test_unknown_initial_step() {
        let result = Wizard::builder(linear_registry(&["a"]))
            .initial_step("zzz")
            .build()
            .await;
        assert!(matches!(result, Err(WizardError::UnknownStep(_))));
    }
}
