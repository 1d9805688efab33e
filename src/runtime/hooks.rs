//! Hook plumbing: the handle hooks use to reach the wizard, and retries

use crate::error::{ErrorValue, HookPhase, WizardResult};
use crate::registry::RetryPolicy;
use crate::state_machine::{Context, StepName, WizardEvent};
use crate::store::Store;
use serde_json::Value;
use std::future::Future;
use tokio::sync::broadcast;

/// Handed to `before_enter` / `before_exit` hooks.
///
/// Context updates go through the store immediately, so later phases of the
/// same transition and any listener see them.
#[derive(Debug, Clone)]
pub struct HookHandle {
    step: StepName,
    store: Store,
    events: broadcast::Sender<WizardEvent>,
}

impl HookHandle {
    pub(crate) fn new(step: &str, store: Store, events: broadcast::Sender<WizardEvent>) -> Self {
        Self {
            step: step.to_string(),
            store,
            events,
        }
    }

    /// Step whose hook holds this handle
    pub fn step(&self) -> &str {
        &self.step
    }

    /// Latest committed context
    pub fn context(&self) -> Context {
        self.store.get_state().context.clone()
    }

    pub fn update_context<F>(&self, f: F) -> WizardResult<()>
    where
        F: FnOnce(&mut Context),
    {
        self.store.update(|state| f(&mut state.context))?;
        Ok(())
    }

    pub fn set_context(&self, context: Context) -> WizardResult<()> {
        self.update_context(|current| *current = context)
    }

    /// Broadcast a custom event to `events()` subscribers
    pub fn emit(&self, name: impl Into<String>, payload: Value) {
        // No subscribers is fine
        let _ = self.events.send(WizardEvent::Custom {
            step: self.step.clone(),
            name: name.into(),
            payload,
        });
    }
}

/// Run `op`, retrying failures per `policy`.
///
/// With retries enabled the number of attempts made is written to
/// `attempts[step]`, whether the phase ends in success or failure.
pub(crate) async fn with_retry<T, F, Fut>(
    store: &Store,
    step: &str,
    phase: HookPhase,
    policy: RetryPolicy,
    mut op: F,
) -> Result<T, ErrorValue>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, ErrorValue>>,
{
    let mut attempt: u32 = 1;
    let result = loop {
        match op().await {
            Ok(value) => break Ok(value),
            Err(error) if attempt <= policy.max_retries => {
                tracing::warn!(
                    step = %step,
                    phase = %phase,
                    attempt,
                    max_retries = policy.max_retries,
                    error = %error,
                    "Phase failed, retrying"
                );
                if !policy.delay.is_zero() {
                    tokio::time::sleep(policy.delay).await;
                }
                attempt += 1;
            }
            Err(error) => break Err(error),
        }
    };

    if policy.is_enabled() {
        let recorded = store.update(|state| {
            state.attempts.insert(step.to_string(), attempt);
        });
        if let Err(e) = recorded {
            tracing::debug!(step = %step, error = %e, "Could not record attempts");
        }
    }

    result
}
